//! Shared scaffolding for the integration tests: a scratch directory of
//! slab sources and one-call access to each pipeline stage.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use tabic::diag::{CompileError, CreateError, Kind};
use tabic::ir::Module;
use tabic::Bundle;

static NEXT_DIR: AtomicU32 = AtomicU32::new(0);

pub struct Workspace {
    pub dir: PathBuf,
    lib_dirs: Vec<PathBuf>,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = std::env::temp_dir().join(format!(
            "tabic-tests-{}-{}",
            std::process::id(),
            NEXT_DIR.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&dir).expect("scratch directory is creatable");
        Self {
            dir,
            lib_dirs: Vec::new(),
        }
    }

    /// Writes `<name>.tabi` with the given source.
    pub fn slab(&self, name: &str, source: &str) -> &Self {
        let path = self.dir.join(format!("{name}.tabi"));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("slab directory is creatable");
        }
        fs::write(path, source).expect("slab source is writable");
        self
    }

    /// Adds a library directory for external attachments and writes
    /// `<name>.tabi` inside it.
    pub fn lib_slab(&mut self, lib: &str, name: &str, source: &str) -> &mut Self {
        let dir = self.dir.join(lib);
        fs::create_dir_all(&dir).expect("library directory is creatable");
        fs::write(dir.join(format!("{name}.tabi")), source).expect("library slab is writable");
        if !self.lib_dirs.contains(&dir) {
            self.lib_dirs.push(dir);
        }
        self
    }

    pub fn create(&self, root: &str) -> Result<Bundle, CreateError> {
        tabic::create_bundle(root, &self.dir, &self.lib_dirs)
    }

    pub fn compile(&self, root: &str) -> Result<Bundle, CompileError> {
        tabic::compile_to_model(root, &self.dir, &self.lib_dirs)
    }

    /// Runs the full pipeline through lowering; panics on any user
    /// error, since callers hand it known-good sources.
    pub fn lower(&self, root: &str) -> (Bundle, Vec<Module>) {
        let bundle = self.compile(root).expect("source should compile");
        let modules = tabic::lower_bundle(&bundle);
        (bundle, modules)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

/// Asserts that compilation fails in the elaboration stage and that the
/// reported kinds include `kind`.
pub fn expect_elaborate_error(workspace: &Workspace, root: &str, kind: Kind) {
    match workspace.compile(root) {
        Ok(_) => panic!("expected {kind:?}, but compilation succeeded"),
        Err(CompileError::Create(e)) => {
            panic!("expected {kind:?} at elaboration, but creation failed: {e}")
        }
        Err(CompileError::Elaborate(e)) => {
            assert!(
                e.diagnostics.iter().any(|d| d.kind == kind),
                "expected {kind:?} among diagnostics, got: {:?}",
                e.diagnostics.iter().map(|d| d.kind).collect::<Vec<_>>()
            );
        }
    }
}

/// Finds a defined function by symbol across all modules.
pub fn find_function<'m>(modules: &'m [Module], symbol: &str) -> &'m tabic::ir::Function {
    modules
        .iter()
        .find_map(|m| m.functions.iter().find(|f| f.name == symbol))
        .unwrap_or_else(|| panic!("function {symbol} should be defined"))
}

/// All instructions of a function, in block order.
pub fn instructions(function: &tabic::ir::Function) -> impl Iterator<Item = &tabic::ir::Instruction> {
    function.blocks.iter().flat_map(|b| b.instrs.iter())
}

/// Number of calls to the given callee in a function.
pub fn calls_to(function: &tabic::ir::Function, callee: &str) -> usize {
    instructions(function)
        .filter(|i| matches!(&i.kind, tabic::ir::InstrKind::Call { callee: c, .. } if c == callee))
        .count()
}

//! The typed in-memory model of a compilation.
//!
//! Everything is owned by the [`Bundle`]: slabs, the type arena, the
//! function/context/dump/variable arenas. Cross-references (a call's
//! callee, a captured context, an attached slab, a reference's variable)
//! are typed indices into those arenas, never aliasing pointers, so the
//! model has no destruction-order hazards and can be traversed freely by
//! the elaborator and lowerer.

mod expression;
mod function;
mod statement;
mod types;
mod variable;

pub use expression::{
    BinOp, BinaryExpr, CallExpr, ExprKind, Expression, OperandClass, RefSegment, SegmentKind, ValueExpr, ValueRef,
};
pub use function::{ExternalFunction, Function, FunctionState, LocalFunction};
pub use statement::{
    Assignment, Block, Branch, CondBlock, Conditional, HeapedDecl, Label, Loop, ProcedureCall, ReturnStmt,
    StackedDecl, Statement, TableCrunch, TableDelete, TableInsert, TableMeasure, Unheap, VectorSet,
};
pub use types::{
    AddressType, AliasType, CollectionMember, CollectionType, Primitive, TableField, TableType, Type, TypeArena,
    VectorType,
};
pub use variable::{Context, Dump, Variable, VariableClass};

use std::path::PathBuf;

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::tree;

macro_rules! arena_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
        pub struct $name(u32);

        impl $name {
            pub fn from_index(index: usize) -> Self {
                Self(u32::try_from(index).expect("arena index fits in u32"))
            }

            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_id!(
    /// Index of a slab in [`Bundle::slabs`].
    SlabId
);
arena_id!(
    /// Index of a type in the bundle's [`TypeArena`].
    TypeId
);
arena_id!(
    /// Index of a function in [`Bundle::functions`].
    FuncId
);
arena_id!(
    /// Index of a context in [`Bundle::contexts`].
    ContextId
);
arena_id!(
    /// Index of a dump in [`Bundle::dumps`].
    DumpId
);
arena_id!(
    /// Index of a variable in [`Bundle::variables`].
    VarId
);

/// Whether a slab was referenced relative to its host (`local`) or found
/// on the library search path (`external`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlabDomain {
    Local,
    External,
}

/// One source file and its per-file compilation state.
///
/// Within one slab every attachment alias and every declared name is
/// unique; the loader raises `double-alias` otherwise. Slabs form a DAG
/// via attachments; re-attaching an already-loaded slab yields the cached
/// [`SlabId`].
#[derive(Debug)]
pub struct Slab {
    /// Canonical identifier, `LOCAL_<resolved-path>` or
    /// `EXTERNAL_<relative-id>`. Unique within the bundle.
    pub id: String,
    /// Short name: the final path segment of the id.
    pub name: String,
    /// Path of the `.tabi` file this slab was read from.
    pub path: PathBuf,
    /// Preprocessed source text.
    pub source: String,
    /// The parse tree, kept for the elaboration pass.
    pub tree: Option<tree::Node>,
    /// Attachment alias -> attached slab.
    pub attachments: IndexMap<String, SlabId>,
    pub functions: IndexMap<String, FuncId>,
    pub types: IndexMap<String, TypeId>,
    pub contexts: IndexMap<String, ContextId>,
    pub dumps: IndexMap<String, DumpId>,
}

impl Slab {
    pub fn new(id: String, path: PathBuf) -> Self {
        let name = id
            .rsplit(['/', '_'])
            .next()
            .unwrap_or(id.as_str())
            .to_string();
        Self {
            id,
            name,
            path,
            source: String::new(),
            tree: None,
            attachments: IndexMap::new(),
            functions: IndexMap::new(),
            types: IndexMap::new(),
            contexts: IndexMap::new(),
            dumps: IndexMap::new(),
        }
    }

    /// The slab id with path separators flattened, used for artifact and
    /// symbol names.
    pub fn flat_id(&self) -> String {
        self.id.replace('/', "_")
    }

    /// True if this slab declares `name` in any of its namespaces.
    pub fn declares(&self, name: &str) -> bool {
        self.functions.contains_key(name)
            || self.types.contains_key(name)
            || self.contexts.contains_key(name)
            || self.dumps.contains_key(name)
    }
}

/// The top-level compilation unit: every slab reachable from the root,
/// plus the arenas all cross-references index into.
#[derive(Debug)]
pub struct Bundle {
    pub slabs: Vec<Slab>,
    /// Canonical slab id -> arena index, the loader's cache.
    pub slab_index: AHashMap<String, SlabId>,
    pub root: SlabId,
    pub types: TypeArena,
    pub functions: Vec<Function>,
    pub contexts: Vec<Context>,
    pub dumps: Vec<Dump>,
    pub variables: Vec<Variable>,
}

impl Bundle {
    pub fn new() -> Self {
        Self {
            slabs: Vec::new(),
            slab_index: AHashMap::new(),
            root: SlabId::from_index(0),
            types: TypeArena::new(),
            functions: Vec::new(),
            contexts: Vec::new(),
            dumps: Vec::new(),
            variables: Vec::new(),
        }
    }

    pub fn slab(&self, id: SlabId) -> &Slab {
        &self.slabs[id.index()]
    }

    pub fn slab_mut(&mut self, id: SlabId) -> &mut Slab {
        &mut self.slabs[id.index()]
    }

    pub fn add_slab(&mut self, slab: Slab) -> SlabId {
        let id = SlabId::from_index(self.slabs.len());
        self.slab_index.insert(slab.id.clone(), id);
        self.slabs.push(slab);
        id
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.index()]
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.functions[id.index()]
    }

    pub fn add_function(&mut self, function: Function) -> FuncId {
        let id = FuncId::from_index(self.functions.len());
        self.functions.push(function);
        id
    }

    pub fn context(&self, id: ContextId) -> &Context {
        &self.contexts[id.index()]
    }

    pub fn context_mut(&mut self, id: ContextId) -> &mut Context {
        &mut self.contexts[id.index()]
    }

    pub fn add_context(&mut self, context: Context) -> ContextId {
        let id = ContextId::from_index(self.contexts.len());
        self.contexts.push(context);
        id
    }

    pub fn dump(&self, id: DumpId) -> &Dump {
        &self.dumps[id.index()]
    }

    pub fn dump_mut(&mut self, id: DumpId) -> &mut Dump {
        &mut self.dumps[id.index()]
    }

    pub fn add_dump(&mut self, dump: Dump) -> DumpId {
        let id = DumpId::from_index(self.dumps.len());
        self.dumps.push(dump);
        id
    }

    pub fn variable(&self, id: VarId) -> &Variable {
        &self.variables[id.index()]
    }

    pub fn add_variable(&mut self, variable: Variable) -> VarId {
        let id = VarId::from_index(self.variables.len());
        self.variables.push(variable);
        id
    }

    /// The fully qualified global symbol for a context or dump member,
    /// `<flat-slab-id>_<group>_<member>`.
    pub fn global_symbol(&self, var: VarId) -> String {
        let variable = self.variable(var);
        match &variable.class {
            VariableClass::Context { context, .. } => {
                let context = self.context(*context);
                let slab = self.slab(context.host);
                format!("{}_{}_{}", slab.flat_id(), context.name, variable.name)
            }
            VariableClass::Dump { dump, .. } => {
                let dump = self.dump(*dump);
                let slab = self.slab(dump.host);
                format!("{}_{}_{}", slab.flat_id(), dump.name, variable.name)
            }
            _ => unreachable!("only context and dump members have global symbols"),
        }
    }
}

impl Default for Bundle {
    fn default() -> Self {
        Self::new()
    }
}

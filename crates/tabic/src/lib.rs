//! tabic: a whole-program compiler front- and middle-end for the
//! Tabitha language.
//!
//! Given a root source file, the pipeline discovers and loads every slab
//! reachable via attachment declarations, elaborates each into a typed,
//! checked model, and lowers the model to one IR module per slab plus
//! the bundle-wide `_tabi_init` / `_tabi_destroy` pair. The emitter
//! writes each module as a textual `.bc`; object emission and linking
//! belong to the driver.
//!
//! The passes are exposed individually so embedders and tests can stop
//! at any stage:
//!
//! ```no_run
//! use std::path::{Path, PathBuf};
//!
//! let mut bundle = tabic::create_bundle("main", Path::new("."), &[] as &[PathBuf])
//!     .expect("bundle creation");
//! tabic::elaborate_bundle(&mut bundle).expect("elaboration");
//! let modules = tabic::lower_bundle(&bundle);
//! tabic::write_bundle(&bundle, &modules, Path::new("out")).expect("emission");
//! ```

mod create;
pub mod diag;
mod elaborate;
mod emit;
pub mod ir;
pub mod model;
mod pre;
mod reader;
pub mod tree;

mod lower;

pub use crate::create::create_bundle;
pub use crate::diag::{CompileError, CreateError, Diagnostic, Diagnostics, ElaborateError, Kind};
pub use crate::elaborate::elaborate_bundle;
pub use crate::emit::write_bundle;
pub use crate::lower::{lower_bundle, CoreFn};
pub use crate::model::Bundle;
pub use crate::pre::preprocess;
pub use crate::reader::parse as parse_slab_source;

use std::path::{Path, PathBuf};

/// Runs create + elaborate in one step, mapping each failure to its
/// stage so drivers can pick exit codes.
pub fn compile_to_model(root_file: &str, cwd: &Path, lib_paths: &[PathBuf]) -> Result<Bundle, CompileError> {
    let mut bundle = create_bundle(root_file, cwd, lib_paths)?;
    elaborate_bundle(&mut bundle)?;
    Ok(bundle)
}

/// Splits a `TABI_LIB`-style search path on the platform's delimiter
/// (`;` on Windows, `:` elsewhere).
pub fn split_lib_paths(raw: &str) -> Vec<PathBuf> {
    let delimiter = if cfg!(windows) { ';' } else { ':' };
    raw.split(delimiter)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

//! Variables and the two global variable groups, contexts and dumps.

use indexmap::IndexMap;

use super::{ContextId, DumpId, Expression, SlabId, TypeId, VarId};
use crate::tree;

/// Which storage discipline a variable follows.
#[derive(Debug)]
pub enum VariableClass {
    /// Payload lives in the declaring function's stack frame until the
    /// function returns.
    Stacked,
    /// The local slot holds a pointer; the payload is heap-allocated and
    /// must be released with `unheap`.
    Heaped,
    /// A member of a context: process-global, usable only by functions
    /// that captured the context.
    Context {
        context: ContextId,
        /// Static initializer, if declared. Lowered to the global's
        /// initial value; zero otherwise.
        init: Option<Expression>,
    },
    /// A member of a dump: process-global, no capture required.
    Dump { dump: DumpId, init: Option<Expression> },
}

/// Any named storage location. The meaning of the lowered handle depends
/// on the class: direct address for stacked/context/dump, a
/// handle-of-pointer for heaped.
#[derive(Debug)]
pub struct Variable {
    pub name: String,
    pub ty: TypeId,
    pub class: VariableClass,
}

/// A named group of globally addressable variables requiring explicit
/// capture by each function that uses them.
#[derive(Debug)]
pub struct Context {
    pub name: String,
    pub host: SlabId,
    pub node: tree::Node,
    /// Member name -> variable, filled by the elaborator.
    pub members: IndexMap<String, VarId>,
}

/// Like a context, but requiring no capture. A convenience escape hatch
/// for constants and debugging state.
#[derive(Debug)]
pub struct Dump {
    pub name: String,
    pub host: SlabId,
    pub node: tree::Node,
    pub members: IndexMap<String, VarId>,
}

//! Expressions and value references after elaboration.
//!
//! Every expression carries its concrete result type and source
//! position; every value reference carries the type of the value it
//! designates at each step of its path. The lowerer relies on both and
//! never re-checks.

use super::{FuncId, SlabId, TypeId, VarId};

/// Binary operators, listed from lowest to highest precedence. The
/// discriminant order *is* the precedence table: `-` binds loosest and
/// `!=` tightest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BinOp {
    Sub,
    Add,
    Mul,
    Div,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

impl BinOp {
    pub fn precedence(self) -> u8 {
        self as u8
    }

    /// True for the six comparison operators, whose result type is Truth.
    pub fn is_comparison(self) -> bool {
        self >= Self::Lt
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Sub => "-",
            Self::Add => "+",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

/// The primitive-equivalence class of a binary expression's operands,
/// selecting the instruction family during lowering: signed integer
/// arithmetic for the integer-like primitives, IEEE float for the float
/// ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandClass {
    Int,
    Float,
    Char,
}

/// A value reference read as an expression, optionally under the locate
/// operator `?` which yields the address instead of the value.
#[derive(Debug)]
pub struct ValueExpr {
    pub locate: bool,
    pub target: ValueRef,
}

#[derive(Debug)]
pub struct CallExpr {
    pub callee: FuncId,
    pub args: Vec<Expression>,
}

#[derive(Debug)]
pub struct BinaryExpr {
    pub op: BinOp,
    pub class: OperandClass,
    pub lhs: Box<Expression>,
    pub rhs: Box<Expression>,
}

#[derive(Debug)]
pub enum ExprKind {
    Null,
    Int(i32),
    Short(i16),
    Long(i64),
    Size(u64),
    Float(f32),
    Double(f64),
    Char(u8),
    Str(String),
    Truth(bool),
    Value(ValueExpr),
    Call(CallExpr),
    Paren(Box<Expression>),
    Binary(BinaryExpr),
}

/// A fully elaborated expression. `ty` is always concrete.
#[derive(Debug)]
pub struct Expression {
    pub kind: ExprKind,
    pub ty: TypeId,
    pub line: u32,
    pub col: u32,
}

/// One step of a value-reference path.
#[derive(Debug)]
pub enum SegmentKind {
    /// `.field` into a collection (address chains auto-stripped).
    Member { name: String, index: usize },
    /// `[expr]` into a vector; the index is of Int type.
    Element { index: Expression },
    /// `{field: id}` into a table: the row with the given id, then the
    /// named field. `field_index` counts the implicit `id`/`use` columns.
    Row {
        field: String,
        field_index: usize,
        id: Expression,
    },
}

/// A path segment together with the type it designates.
#[derive(Debug)]
pub struct RefSegment {
    pub kind: SegmentKind,
    pub ty: TypeId,
}

/// An l-value path: a head variable, a chain of segments, and an
/// optional trailing query `@` which dereferences one address level.
///
/// Context and dump members resolve to their member [`VarId`]s; the
/// variable's class tells the lowerer which storage to address.
#[derive(Debug)]
pub struct ValueRef {
    pub head: VarId,
    /// Slab the reference appears in; globals are materialized into this
    /// slab's module when lowered.
    pub slab: SlabId,
    pub head_ty: TypeId,
    pub segments: Vec<RefSegment>,
    pub query: bool,
    /// The type of the value finally designated, after segments and
    /// query.
    pub ty: TypeId,
}

impl ValueRef {
    /// The type designated just before the trailing query is applied.
    pub fn pre_query_ty(&self) -> TypeId {
        self.segments.last().map_or(self.head_ty, |s| s.ty)
    }
}

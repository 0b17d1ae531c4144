//! Statements and blocks after elaboration.

use indexmap::IndexMap;

use super::{Expression, FuncId, TypeId, ValueRef, VarId};

/// A lexical scope: an ordered statement list plus the variables
/// declared directly in it. Lookup walks the enclosing block chain and
/// then the function's argument list.
#[derive(Debug, Default)]
pub struct Block {
    pub statements: Vec<Statement>,
    pub variables: IndexMap<String, VarId>,
}

#[derive(Debug)]
pub struct ReturnStmt {
    pub value: Option<Expression>,
}

/// Declares a variable whose storage lives until function return.
#[derive(Debug)]
pub struct StackedDecl {
    pub var: VarId,
    pub init: Option<Expression>,
}

/// Declares a variable whose handle lives on the stack but whose payload
/// is heap-allocated.
#[derive(Debug)]
pub struct HeapedDecl {
    pub var: VarId,
    pub init: Option<Expression>,
}

#[derive(Debug)]
pub struct Assignment {
    pub target: ValueRef,
    pub value: Expression,
}

/// A condition paired with the block it guards.
#[derive(Debug)]
pub struct CondBlock {
    pub condition: Expression,
    pub block: Block,
}

#[derive(Debug)]
pub struct Conditional {
    pub arm: CondBlock,
}

/// Ordered condition/block twigs plus an optional default block; at most
/// one block executes.
#[derive(Debug)]
pub struct Branch {
    pub twigs: Vec<CondBlock>,
    pub otherwise: Option<Block>,
}

/// Runs the body zero or more times while the condition holds.
#[derive(Debug)]
pub struct Loop {
    pub condition: Expression,
    pub body: Block,
}

/// A function call whose result is discarded.
#[derive(Debug)]
pub struct ProcedureCall {
    pub callee: FuncId,
    pub args: Vec<Expression>,
}

/// Writes a contiguous run of vector elements starting at `from`.
#[derive(Debug)]
pub struct VectorSet {
    pub target: ValueRef,
    pub from: Expression,
    pub elements: Vec<Expression>,
}

/// Inserts one row. `cells` pairs with the declared fields in order
/// (excluding `id`/`use`); `None` cells store a zero value. The chosen id
/// is written through `id_out` when present.
#[derive(Debug)]
pub struct TableInsert {
    pub table: ValueRef,
    pub cells: Vec<Option<Expression>>,
    pub id_out: Option<ValueRef>,
}

#[derive(Debug)]
pub struct TableDelete {
    pub table: ValueRef,
    pub id: Expression,
}

#[derive(Debug)]
pub struct TableMeasure {
    pub table: ValueRef,
    pub out: ValueRef,
}

/// Compacts used rows to the top of the table, preserving order; the
/// topmost id is written through `top_out` when present.
#[derive(Debug)]
pub struct TableCrunch {
    pub table: ValueRef,
    pub top_out: Option<ValueRef>,
}

/// Ties a fuzzy vector to an address.
#[derive(Debug)]
pub struct Label {
    pub target: ValueRef,
    pub address: Expression,
}

/// Deallocates heap storage, structure-aware: owned subvectors, table
/// fields and nested collections are freed bottom-up before the root.
#[derive(Debug)]
pub struct Unheap {
    pub address: Expression,
    pub structure: TypeId,
}

#[derive(Debug)]
pub enum Statement {
    Return(ReturnStmt),
    Stacked(StackedDecl),
    Heaped(HeapedDecl),
    Assign(Assignment),
    If(Conditional),
    Branch(Branch),
    Loop(Loop),
    Call(ProcedureCall),
    VectorSet(VectorSet),
    TableInsert(TableInsert),
    TableDelete(TableDelete),
    TableMeasure(TableMeasure),
    TableCrunch(TableCrunch),
    Label(Label),
    Unheap(Unheap),
    Block(Block),
}

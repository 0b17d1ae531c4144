//! Diagnostics shared by the creation and elaboration passes.
//!
//! Every user-facing failure is a [`Diagnostic`]: a kind from the fixed
//! taxonomy, a source position, and free-form detail. Passes collect
//! diagnostics as they walk and keep going wherever an error is strictly
//! local (a bad expression inside a statement skips that statement, not
//! the pass); the pass fails at its boundary if anything was recorded.
//! The lowerer never produces diagnostics: it runs only on a model the
//! elaborator accepted, so a failure there is a compiler bug.

use std::fmt;

use serde::Serialize;
use strum::IntoStaticStr;

/// The fixed taxonomy of user-facing error kinds.
///
/// The serialized form is the kebab-case slug (`arg-type-mismatch` etc.)
/// used in machine-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    CannotRead,
    SyntaxError,
    DoubleAlias,
    SlabNotAttached,
    TypeNotFound,
    VariableNotFound,
    MemberNotOfCollection,
    MemberNotFound,
    IndexNotOfVector,
    IndexNotInteger,
    TableRefNotTable,
    IdNotInt,
    IdRefNotInt,
    FieldNotFound,
    MeasureNotInteger,
    VectorRefNotVector,
    QueryNotAddress,
    UnheapExpressionNotAddress,
    ConditionNotTruth,
    OperatorTypeMismatch,
    ArgTypeMismatch,
    CallArityMismatch,
    AssignmentTypeMismatch,
    ContextNotFound,
    ContextNotCaptured,
    DumpNotFound,
    FunctionNotFound,
    ExpressionNotRecognised,
}

impl Kind {
    /// Short human message for the kind, independent of any one site.
    pub fn message(self) -> &'static str {
        match self {
            Self::CannotRead => "cannot read file",
            Self::SyntaxError => "syntax error",
            Self::DoubleAlias => "alias or name declared more than once",
            Self::SlabNotAttached => "referenced slab is not attached",
            Self::TypeNotFound => "type not found in slab",
            Self::VariableNotFound => "variable not found",
            Self::MemberNotOfCollection => "member reference into a non-collection type",
            Self::MemberNotFound => "member not found",
            Self::IndexNotOfVector => "index reference into a non-vector type",
            Self::IndexNotInteger => "index expression is not an Int",
            Self::TableRefNotTable => "table reference is not a table",
            Self::IdNotInt => "row id expression is not an Int",
            Self::IdRefNotInt => "id reference is not an Int",
            Self::FieldNotFound => "table field not found",
            Self::MeasureNotInteger => "measure target is not an Int",
            Self::VectorRefNotVector => "vector reference is not a vector",
            Self::QueryNotAddress => "queried value is not an address",
            Self::UnheapExpressionNotAddress => "unheap expression is not an address",
            Self::ConditionNotTruth => "condition is not of Truth type",
            Self::OperatorTypeMismatch => "operand types mismatch under binary operator",
            Self::ArgTypeMismatch => "argument type mismatches the function definition",
            Self::CallArityMismatch => "function called with the wrong number of arguments",
            Self::AssignmentTypeMismatch => "expression type does not match the assignment target",
            Self::ContextNotFound => "context not found",
            Self::ContextNotCaptured => "context is not captured by the referencing function",
            Self::DumpNotFound => "dump not found",
            Self::FunctionNotFound => "function not found",
            Self::ExpressionNotRecognised => "expression not recognised",
        }
    }

    /// The kebab-case slug, e.g. `assignment-type-mismatch`.
    pub fn slug(self) -> &'static str {
        self.into()
    }
}

/// One reported failure: what went wrong, where, and with what detail.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub kind: Kind,
    pub line: u32,
    pub col: u32,
    /// Contextual detail: the offending name, the slab involved, the
    /// mismatched types rendered for humans.
    pub detail: String,
}

impl Diagnostic {
    pub fn new(kind: Kind, line: u32, col: u32, detail: impl Into<String>) -> Self {
        Self {
            kind,
            line,
            col,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.col, self.kind.message())?;
        if self.detail.is_empty() {
            Ok(())
        } else {
            write!(f, " ({})", self.detail)
        }
    }
}

/// A pass-scoped collector. Pushing never aborts anything by itself; the
/// pass checks [`Diagnostics::is_empty`] at its boundary.
#[derive(Debug, Default)]
pub struct Diagnostics {
    list: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.list.push(diagnostic);
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.list
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.list.iter()
    }
}

/// Failure of the creation pass (loading, preprocessing, parsing, shallow
/// declaration). The driver exits with code 1 on this.
#[derive(Debug)]
pub struct CreateError {
    pub diagnostics: Vec<Diagnostic>,
}

impl fmt::Display for CreateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in &self.diagnostics {
            writeln!(f, "{d}")?;
        }
        write!(f, "bundle creation failed with {} error(s)", self.diagnostics.len())
    }
}

impl std::error::Error for CreateError {}

/// Failure of the semantic elaboration pass. The driver exits with code 2
/// on this.
#[derive(Debug)]
pub struct ElaborateError {
    pub diagnostics: Vec<Diagnostic>,
}

impl fmt::Display for ElaborateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in &self.diagnostics {
            writeln!(f, "{d}")?;
        }
        write!(f, "elaboration failed with {} error(s)", self.diagnostics.len())
    }
}

impl std::error::Error for ElaborateError {}

/// Stage-discriminated compiler failure, for callers that drive the whole
/// pipeline and map stages to exit codes.
#[derive(Debug)]
pub enum CompileError {
    Create(CreateError),
    Elaborate(ElaborateError),
}

impl CompileError {
    /// Process exit code mandated for this failure stage.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Create(_) => 1,
            Self::Elaborate(_) => 2,
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Self::Create(e) => &e.diagnostics,
            Self::Elaborate(e) => &e.diagnostics,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create(e) => write!(f, "{e}"),
            Self::Elaborate(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<CreateError> for CompileError {
    fn from(error: CreateError) -> Self {
        Self::Create(error)
    }
}

impl From<ElaborateError> for CompileError {
    fn from(error: ElaborateError) -> Self {
        Self::Elaborate(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_slugs_are_kebab_case() {
        assert_eq!(Kind::ArgTypeMismatch.slug(), "arg-type-mismatch");
        assert_eq!(Kind::ExpressionNotRecognised.slug(), "expression-not-recognised");
        assert_eq!(Kind::IdNotInt.slug(), "id-not-int");
    }

    #[test]
    fn display_includes_position_and_detail() {
        let d = Diagnostic::new(Kind::VariableNotFound, 3, 14, "name `q`");
        assert_eq!(d.to_string(), "3:14: variable not found (name `q`)");
    }
}

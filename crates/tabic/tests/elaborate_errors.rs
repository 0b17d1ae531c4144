//! The elaboration error surface: each user-facing kind is reachable
//! and reported at the right stage.

mod common;

use common::{expect_elaborate_error, Workspace};
use tabic::diag::Kind;

fn single(source: &str) -> Workspace {
    let workspace = Workspace::new();
    workspace.slab("main", source);
    workspace
}

/// Calling a Float-typed formal with an Int argument reports
/// arg-type-mismatch at the argument's position.
#[test]
fn arg_type_mismatch() {
    let workspace = single(
        "function g (x: Float) { return }\nfunction main () -> Int { g(3)\nreturn 0 }",
    );
    expect_elaborate_error(&workspace, "main", Kind::ArgTypeMismatch);
}

/// A literal null is admitted against any formal type.
#[test]
fn null_argument_is_universal() {
    let workspace = single(
        "function g (p: Addr[Int]) { return }\nfunction main () -> Int { g(null)\nreturn 0 }",
    );
    workspace.compile("main").expect("null should be accepted for any formal");
}

#[test]
fn call_arity_mismatch() {
    let workspace = single("function g (x: Int) { return }\nfunction main () -> Int { g(1, 2)\nreturn 0 }");
    expect_elaborate_error(&workspace, "main", Kind::CallArityMismatch);
}

#[test]
fn variable_not_found() {
    let workspace = single("function main () -> Int { return missing }");
    expect_elaborate_error(&workspace, "main", Kind::VariableNotFound);
}

#[test]
fn function_not_found() {
    let workspace = single("function main () -> Int { return absent() }");
    expect_elaborate_error(&workspace, "main", Kind::FunctionNotFound);
}

#[test]
fn condition_not_truth() {
    let workspace = single("function main () -> Int { if 3 { return 1 }\nreturn 0 }");
    expect_elaborate_error(&workspace, "main", Kind::ConditionNotTruth);
}

/// Loop conditions are held to the same Truth requirement.
#[test]
fn loop_condition_not_truth() {
    let workspace = single("function main () -> Int { loop 1 { }\nreturn 0 }");
    expect_elaborate_error(&workspace, "main", Kind::ConditionNotTruth);
}

#[test]
fn assignment_type_mismatch() {
    let workspace = single("function main () -> Int { stacked x: Int = 1.5\nreturn 0 }");
    expect_elaborate_error(&workspace, "main", Kind::AssignmentTypeMismatch);
}

#[test]
fn operator_type_mismatch() {
    let workspace = single("function main () -> Int { stacked x: Int = 1 + 1.5\nreturn x }");
    expect_elaborate_error(&workspace, "main", Kind::OperatorTypeMismatch);
}

#[test]
fn type_not_found() {
    let workspace = single("function main () -> Int { stacked x: Ghost = 0\nreturn 0 }");
    expect_elaborate_error(&workspace, "main", Kind::TypeNotFound);
}

#[test]
fn slab_not_attached() {
    let workspace = single("function main () -> Int { stacked x: lib.Ghost = 0\nreturn 0 }");
    expect_elaborate_error(&workspace, "main", Kind::SlabNotAttached);
}

#[test]
fn member_not_of_collection() {
    let workspace = single("function main () -> Int { stacked x: Int = 0\nreturn x.y }");
    expect_elaborate_error(&workspace, "main", Kind::MemberNotOfCollection);
}

#[test]
fn member_not_found() {
    let workspace = single(
        "collection Point { x: Int }\nfunction main () -> Int { stacked p: Point\nreturn p.z }",
    );
    expect_elaborate_error(&workspace, "main", Kind::MemberNotFound);
}

#[test]
fn index_not_of_vector() {
    let workspace = single("function main () -> Int { stacked x: Int = 0\nreturn x[0] }");
    expect_elaborate_error(&workspace, "main", Kind::IndexNotOfVector);
}

#[test]
fn index_not_integer() {
    let workspace = single("function main () -> Int { stacked v: Vec[Int, 3]\nreturn v[1.5] }");
    expect_elaborate_error(&workspace, "main", Kind::IndexNotInteger);
}

#[test]
fn query_not_address() {
    let workspace = single("function main () -> Int { stacked x: Int = 1\nreturn x@ }");
    expect_elaborate_error(&workspace, "main", Kind::QueryNotAddress);
}

/// A query through an alias of an address type strips one level.
#[test]
fn query_through_alias_is_accepted() {
    let workspace = single(
        "alias IntPtr = Addr[Int]\n\
         function main () -> Int { stacked x: Int = 5\nstacked p: IntPtr = ?x\nreturn p@ }",
    );
    workspace.compile("main").expect("alias-of-address query should pass");
}

#[test]
fn unheap_expression_not_address() {
    let workspace = single("function main () -> Int { unheap 3 : Int\nreturn 0 }");
    expect_elaborate_error(&workspace, "main", Kind::UnheapExpressionNotAddress);
}

#[test]
fn table_ref_not_table() {
    let workspace = single("function main () -> Int { stacked x: Int = 0\ndelete x 0\nreturn 0 }");
    expect_elaborate_error(&workspace, "main", Kind::TableRefNotTable);
}

#[test]
fn id_not_int() {
    let workspace = single(
        "function main () -> Int { stacked t: Table[p: Int; 4]\ndelete t true\nreturn 0 }",
    );
    expect_elaborate_error(&workspace, "main", Kind::IdNotInt);
}

#[test]
fn id_ref_not_int() {
    let workspace = single(
        "function main () -> Int { stacked t: Table[p: Int; 4]\nstacked f: Float = 0.5\ninsert t (1) id f\nreturn 0 }",
    );
    expect_elaborate_error(&workspace, "main", Kind::IdRefNotInt);
}

#[test]
fn field_not_found() {
    let workspace = single(
        "function main () -> Int { stacked t: Table[p: Int; 4]\nreturn t{ghost: 0} }",
    );
    expect_elaborate_error(&workspace, "main", Kind::FieldNotFound);
}

#[test]
fn measure_not_integer() {
    let workspace = single(
        "function main () -> Int { stacked t: Table[p: Int; 4]\nstacked f: Float = 0.5\nmeasure t f\nreturn 0 }",
    );
    expect_elaborate_error(&workspace, "main", Kind::MeasureNotInteger);
}

#[test]
fn vector_ref_not_vector() {
    let workspace = single("function main () -> Int { stacked x: Int = 0\nset x from 0 = 1\nreturn 0 }");
    expect_elaborate_error(&workspace, "main", Kind::VectorRefNotVector);
}

/// Labeling a sized vector is rejected; only fuzzy vectors adopt
/// external storage.
#[test]
fn label_requires_fuzzy_vector() {
    let workspace = single(
        "function main () -> Int { stacked v: Vec[Int, 3]\nlabel v = null\nreturn 0 }",
    );
    expect_elaborate_error(&workspace, "main", Kind::VectorRefNotVector);
}

/// Reading a context member without capturing the context is an error
/// even when the context exists in the same slab.
#[test]
fn context_not_captured() {
    let workspace = single(
        "context C { n: Int = 7 }\nfunction main () -> Int { return C.n }",
    );
    expect_elaborate_error(&workspace, "main", Kind::ContextNotCaptured);
}

/// Capturing a context that does not exist reports context-not-found.
#[test]
fn context_not_found_in_captures() {
    let workspace = single("function main captures [Ghost] () -> Int { return 0 }");
    expect_elaborate_error(&workspace, "main", Kind::ContextNotFound);
}

/// An attachment-qualified group reference that names neither a context
/// nor a dump reports dump-not-found, the last group kind searched.
#[test]
fn qualified_group_not_found() {
    let workspace = Workspace::new();
    workspace
        .slab("lib", "function f () { return }")
        .slab(
            "main",
            "attach local lib\nfunction main () -> Int { return lib.Ghost.n }",
        );
    expect_elaborate_error(&workspace, "main", Kind::DumpNotFound);
}

/// Dump members need no capture.
#[test]
fn dump_member_needs_no_capture() {
    let workspace = single(
        "dump D { hits: Int = 0 }\nfunction main () -> Int { D.hits = D.hits + 1\nreturn D.hits }",
    );
    workspace.compile("main").expect("dump access should not need capture");
}

/// Elaboration keeps going after a statement-level error, so one run
/// reports several distinct diagnostics.
#[test]
fn multiple_diagnostics_per_run() {
    let workspace = single(
        "function main () -> Int { stacked x: Int = 1.5\nstacked y: Int = missing\nreturn 0 }",
    );
    match workspace.compile("main") {
        Err(error @ tabic::CompileError::Elaborate(_)) => {
            assert_eq!(error.exit_code(), 2, "elaboration failures map to exit code 2");
            let tabic::CompileError::Elaborate(e) = error else {
                unreachable!();
            };
            assert!(e.diagnostics.len() >= 2, "both statements report: {:?}", e.diagnostics);
        }
        other => panic!("expected elaboration failure, got {other:?}"),
    }
}

//! Invariants of the elaborated model: concrete types everywhere,
//! alias transparency, and structural determinism across runs.

mod common;

use common::Workspace;
use pretty_assertions::assert_eq;
use tabic::model::{Function, Statement, TypeId};

/// For an alias chain A -> B -> C -> Int, `types_match(A, Int)` holds.
#[test]
fn alias_chains_are_transparent() {
    let workspace = Workspace::new();
    workspace.slab(
        "main",
        "alias A = B\nalias B = C\nalias C = Int\nfunction main () -> A { return 0 }",
    );
    let bundle = workspace.compile("main").expect("aliases should elaborate");
    let root = bundle.slab(bundle.root);
    let a = root.types["A"];
    assert!(bundle.types.types_match(a, TypeId::INT), "A resolves to Int");
    assert_eq!(bundle.types.resolve(a), TypeId::INT);
}

/// An alias cycle is reported instead of looping.
#[test]
fn alias_cycles_are_reported() {
    let workspace = Workspace::new();
    workspace.slab("main", "alias A = B\nalias B = A\nfunction main () -> Int { return 0 }");
    assert!(workspace.compile("main").is_err(), "cycle must not elaborate");
}

/// Elaborating the same sources twice produces identical model
/// structure modulo object identity.
#[test]
fn elaboration_is_deterministic() {
    const SOURCE: &str = "\
collection Point { x: Int, y: Int }
context C { n: Int = 7 }
function add (a: Int, b: Int) -> Int { return a + b }
function main captures [C] () -> Int { stacked p: Point\np.x = add(C.n, 1)\nreturn p.x }";
    let first = {
        let workspace = Workspace::new();
        workspace.slab("main", SOURCE);
        workspace.compile("main").expect("source should compile")
    };
    let second = {
        let workspace = Workspace::new();
        workspace.slab("main", SOURCE);
        workspace.compile("main").expect("source should compile")
    };
    assert_eq!(first.slabs.len(), second.slabs.len());
    assert_eq!(first.types.len(), second.types.len());
    assert_eq!(first.functions.len(), second.functions.len());
    assert_eq!(first.variables.len(), second.variables.len());
    assert_eq!(first.contexts.len(), second.contexts.len());
}

/// Every elaborated function body statement carries concrete types:
/// spot-checked through the typed assignment in a known body.
#[test]
fn elaborated_bodies_are_fully_typed() {
    let workspace = Workspace::new();
    workspace.slab(
        "main",
        "collection Point { x: Int, y: Int }\n\
         function main () -> Int { stacked p: Point\np.x = 3\nreturn p.x }",
    );
    let bundle = workspace.compile("main").expect("source should compile");
    let root = bundle.slab(bundle.root);
    let main = &bundle.functions[root.functions["main"].index()];
    let Function::Local(main) = main else {
        panic!("main is a local function");
    };
    let body = main.body.as_ref().expect("main has a body");
    let assignment = body
        .statements
        .iter()
        .find_map(|s| match s {
            Statement::Assign(a) => Some(a),
            _ => None,
        })
        .expect("body contains the assignment");
    assert_eq!(assignment.target.ty, TypeId::INT, "p.x designates an Int");
    assert_eq!(assignment.value.ty, TypeId::INT);
    assert_eq!(assignment.target.segments.len(), 1, "one member step");
}

/// Collection members record their declaration order as indices.
#[test]
fn collection_member_indices_follow_declaration_order() {
    let workspace = Workspace::new();
    workspace.slab(
        "main",
        "collection Triple { a: Int, b: Float, c: Truth }\nfunction main () -> Int { return 0 }",
    );
    let bundle = workspace.compile("main").expect("source should compile");
    let root = bundle.slab(bundle.root);
    let triple = bundle
        .types
        .as_collection(root.types["Triple"])
        .expect("Triple is a collection");
    let indices: Vec<usize> = triple.members.values().map(|m| m.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(triple.members["b"].ty, TypeId::FLOAT);
}

/// Tables get the two implicit leading Int fields.
#[test]
fn tables_carry_implicit_id_and_use_fields() {
    let workspace = Workspace::new();
    workspace.slab(
        "main",
        "function main () -> Int { stacked t: Table[p: Int, q: Float; 8]\nreturn 0 }",
    );
    let bundle = workspace.compile("main").expect("source should compile");
    let root = bundle.slab(bundle.root);
    let main = &bundle.functions[root.functions["main"].index()];
    let Function::Local(main) = main else {
        panic!("main is local");
    };
    let body = main.body.as_ref().expect("body");
    let decl = body
        .statements
        .iter()
        .find_map(|s| match s {
            Statement::Stacked(d) => Some(d),
            _ => None,
        })
        .expect("the table declaration");
    let table = bundle
        .types
        .as_table(bundle.variable(decl.var).ty)
        .expect("t is a table");
    let names: Vec<&str> = table.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["id", "use", "p", "q"]);
    assert_eq!(table.fields[0].ty, TypeId::INT);
    assert_eq!(table.fields[1].ty, TypeId::INT);
    assert_eq!(table.declared_fields(), 2);
}

/// Operator precedence is normalized structurally when binaries are
/// built: `2 * 3 + 4` parses right-leaning but lowers as `(2*3) + 4`.
#[test]
fn binary_precedence_reassociates() {
    use tabic::model::{BinOp, ExprKind};

    let workspace = Workspace::new();
    workspace.slab("main", "function main () -> Int { return 2 * 3 + 4 }");
    let bundle = workspace.compile("main").expect("source should compile");
    let root = bundle.slab(bundle.root);
    let Function::Local(main) = &bundle.functions[root.functions["main"].index()] else {
        panic!("main is local");
    };
    let body = main.body.as_ref().expect("body");
    let Some(Statement::Return(ret)) = body.statements.first() else {
        panic!("return statement");
    };
    let value = ret.value.as_ref().expect("return value");
    let ExprKind::Binary(top) = &value.kind else {
        panic!("top is a binary expression");
    };
    assert_eq!(top.op, BinOp::Add, "the looser operator ends up at the top");
    let ExprKind::Binary(left) = &top.lhs.kind else {
        panic!("left child holds the tighter product");
    };
    assert_eq!(left.op, BinOp::Mul);
}

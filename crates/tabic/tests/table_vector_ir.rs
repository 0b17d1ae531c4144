//! The memory-model lowering rules: table operations, vector deep
//! copies, and structure-aware heap release.

mod common;

use common::{calls_to, find_function, instructions, Workspace};
use tabic::ir::{InstrKind, Value};

/// Heaped declaration and unheap: `core_alloc(4)` for the Int payload,
/// a store of 42 through the handle, and a matching `core_dealloc`.
#[test]
fn heaped_int_allocates_stores_and_frees() {
    let workspace = Workspace::new();
    workspace.slab(
        "main",
        "function main () -> Int { heaped x: Int = 42\nunheap ?x : Int\nreturn 0 }",
    );
    let (_, modules) = workspace.lower("main");
    let main = find_function(&modules, "_tabi_main");

    let allocs: Vec<_> = instructions(main)
        .filter(|i| matches!(&i.kind, InstrKind::Call { callee, .. } if callee == "core_alloc"))
        .collect();
    assert_eq!(allocs.len(), 1, "one heap allocation");
    assert!(
        matches!(&allocs[0].kind, InstrKind::Call { args, .. }
            if matches!(args.as_slice(), [Value::ConstInt { value: 4, .. }])),
        "an Int payload is four bytes: {allocs:?}"
    );
    assert!(
        instructions(main)
            .any(|i| matches!(&i.kind, InstrKind::Store { value: Value::ConstInt { value: 42, .. }, .. })),
        "the initializer stores 42"
    );
    assert_eq!(calls_to(main, "core_dealloc"), 1, "unheap frees the payload");
}

/// Vectors pass by value: the callee builds a fresh element array and
/// copies the caller's elements into it before the body runs.
#[test]
fn vector_argument_is_deep_copied() {
    let workspace = Workspace::new();
    workspace.slab(
        "main",
        "function f (v: Vec[Int, 3]) -> Int { v[0] = 99\nreturn v[0] }\n\
         function main () -> Int { stacked a: Vec[Int, 3]\nset a from 0 = 1, 2, 3\nreturn f(a) }",
    );
    let (_, modules) = workspace.lower("main");
    let f = find_function(&modules, "LOCAL_main::f");
    assert_eq!(calls_to(f, "core_memcpy"), 1, "the argument array is copied");
    let entry = &f.blocks[0];
    assert!(
        entry
            .instrs
            .iter()
            .any(|i| matches!(&i.kind, InstrKind::Alloca { count: Some(_), .. })),
        "a fresh element array is allocated in the entry block"
    );
}

/// A vector of vectors recurses: each element's storage is copied
/// inside a counted loop.
#[test]
fn nested_vector_argument_copies_elementwise() {
    let workspace = Workspace::new();
    workspace.slab(
        "main",
        "function f (v: Vec[Vec[Int, 2], 2]) { return }\n\
         function main () -> Int { stacked a: Vec[Vec[Int, 2], 2]\nf(a)\nreturn 0 }",
    );
    let (_, modules) = workspace.lower("main");
    let f = find_function(&modules, "LOCAL_main::f");
    assert!(calls_to(f, "core_memcpy") >= 2, "outer copy plus per-element copies");
    assert!(
        f.blocks.iter().any(|b| b.label.starts_with("subvec_copy")),
        "the element copy runs in a counted loop"
    );
}

/// Tables pass by value like vectors: the callee builds a fresh element
/// array per field (`id` and `use` included) and copies the caller's
/// storage into each before the body runs, so a delete in the callee
/// cannot touch the caller's rows.
#[test]
fn table_argument_is_deep_copied() {
    let workspace = Workspace::new();
    workspace.slab(
        "main",
        "function f (t: Table[p: Int, q: Float; 4]) { delete t 0 }\n\
         function main () -> Int { stacked t: Table[p: Int, q: Float; 4]\nf(t)\nreturn 0 }",
    );
    let (_, modules) = workspace.lower("main");
    let f = find_function(&modules, "LOCAL_main::f");
    assert_eq!(calls_to(f, "core_memcpy"), 4, "one copy per field: id, use, p, q");
    let dynamic_allocas = instructions(f)
        .filter(|i| matches!(&i.kind, InstrKind::Alloca { count: Some(_), .. }))
        .count();
    assert_eq!(dynamic_allocas, 4, "each field gets a fresh element array");
    assert_eq!(
        calls_to(f, "core_table_deleteRowByID"),
        1,
        "the body operates on the copied table"
    );
}

/// Table lifecycle: field arrays and `core_table_init` at declaration,
/// one `core_table_insertRow` per insert, delete and crunch through
/// their helpers, measure through `core_table_getNumUsed`.
#[test]
fn table_operations_call_the_runtime_helpers() {
    let workspace = Workspace::new();
    workspace.slab(
        "main",
        "function main () -> Int {\n\
         stacked t: Table[p: Int; 4]\n\
         stacked m: Int = 0\n\
         insert t (10)\n\
         insert t (20)\n\
         insert t (30)\n\
         delete t 1\n\
         crunch t\n\
         measure t m\n\
         return m }",
    );
    let (_, modules) = workspace.lower("main");
    let main = find_function(&modules, "_tabi_main");
    assert_eq!(calls_to(main, "core_table_init"), 1);
    assert_eq!(calls_to(main, "core_table_insertRow"), 3);
    assert_eq!(calls_to(main, "core_table_deleteRowByID"), 1);
    assert_eq!(calls_to(main, "core_table_crunch"), 1);
    assert_eq!(calls_to(main, "core_table_getNumUsed"), 1);

    // Insert without an id clause passes a null id-out slot.
    let insert_args = instructions(main).find_map(|i| match &i.kind {
        InstrKind::Call { callee, args, .. } if callee == "core_table_insertRow" => Some(args.clone()),
        _ => None,
    });
    let insert_args = insert_args.expect("an insert call exists");
    assert!(
        matches!(insert_args.last(), Some(Value::NullPtr { .. })),
        "null id-out: {insert_args:?}"
    );
}

/// Row references look up through `core_table_getRowByID` and then
/// address the selected field's element array.
#[test]
fn row_reference_resolves_through_the_lookup_helper() {
    let workspace = Workspace::new();
    workspace.slab(
        "main",
        "function main () -> Int { stacked t: Table[p: Int; 4]\ninsert t (10)\nreturn t{p: 0} }",
    );
    let (_, modules) = workspace.lower("main");
    let main = find_function(&modules, "_tabi_main");
    assert_eq!(calls_to(main, "core_table_getRowByID"), 1);
}

/// A zero-length vector allocates a zero-length element array without
/// error.
#[test]
fn zero_length_vectors_lower() {
    let workspace = Workspace::new();
    workspace.slab("main", "function main () -> Int { stacked v: Vec[Int, 0]\nreturn 0 }");
    let (_, modules) = workspace.lower("main");
    for module in &modules {
        module.verify().expect("module verifies");
    }
    let main = find_function(&modules, "_tabi_main");
    assert!(
        instructions(main).any(|i| matches!(&i.kind,
            InstrKind::Alloca { count: Some(Value::ConstInt { value: 0, .. }), .. })),
        "the element array is allocated with count zero"
    );
}

/// A fuzzy vector gets only its pointer slot; labeling stores the given
/// address into it.
#[test]
fn fuzzy_vectors_adopt_labeled_storage() {
    let workspace = Workspace::new();
    workspace.slab(
        "main",
        "function main () -> Int {\n\
         stacked v: Vec[Int, 4]\n\
         stacked w: Vec[Int]\n\
         label w = ?v[0]\n\
         return w[1] }",
    );
    let (_, modules) = workspace.lower("main");
    for module in &modules {
        module.verify().expect("module verifies");
    }
    let main = find_function(&modules, "_tabi_main");
    // The fuzzy vector triggers no element allocation of its own: only
    // v's sized array exists.
    let dynamic_allocas = instructions(main)
        .filter(|i| matches!(&i.kind, InstrKind::Alloca { count: Some(_), .. }))
        .count();
    assert_eq!(dynamic_allocas, 1, "only the sized vector allocates elements");
}

/// Unheaping a collection with a vector member frees the member's array
/// before the collection itself: two deallocations, array first.
#[test]
fn unheap_frees_owned_substructure() {
    let workspace = Workspace::new();
    workspace.slab(
        "main",
        "collection Holder { data: Vec[Int, 8], tag: Int }\n\
         function main () -> Int { heaped h: Holder\nunheap ?h : Holder\nreturn 0 }",
    );
    let (_, modules) = workspace.lower("main");
    let main = find_function(&modules, "_tabi_main");
    assert_eq!(
        calls_to(main, "core_dealloc"),
        2,
        "the member array and the collection payload are both freed"
    );
    assert!(calls_to(main, "core_alloc") >= 2, "allocation mirrors the teardown");
}

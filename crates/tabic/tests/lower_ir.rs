//! Lowering behavior at the IR level: function naming, the init/destroy
//! pair, terminator discipline, and the stack save/restore contract.

mod common;

use common::{calls_to, find_function, instructions, Workspace};
use tabic::ir::{InstrKind, Value};

/// Minimal program: `_tabi_main` returns the constant 0, and the
/// bundle-wide init/destroy immediately return void.
#[test]
fn minimal_return_lowers_to_tabi_main() {
    let workspace = Workspace::new();
    workspace.slab("main", "function main () -> Int { return 0 }");
    let (_, modules) = workspace.lower("main");
    assert_eq!(modules.len(), 1);

    let main = find_function(&modules, "_tabi_main");
    let last = instructions(main).last().expect("main has instructions");
    assert!(
        matches!(&last.kind, InstrKind::Ret { value: Some(Value::ConstInt { value: 0, .. }) }),
        "main returns zero, got {last:?}"
    );

    for name in ["_tabi_init", "_tabi_destroy"] {
        let f = find_function(&modules, name);
        assert_eq!(f.blocks.len(), 1, "{name} is a single block");
        assert!(
            matches!(f.blocks[0].instrs.as_slice(), [i] if matches!(i.kind, InstrKind::Ret { value: None })),
            "{name} immediately returns void"
        );
    }
}

/// Every module verifies: each basic block ends in exactly one
/// terminator.
#[test]
fn lowered_modules_verify() {
    let workspace = Workspace::new();
    workspace.slab(
        "main",
        "function main () -> Int {\n\
         stacked n: Int = 0\n\
         loop n < 3 { n = n + 1 }\n\
         if n == 3 { return 1 }\n\
         branch { n == 0 { return 2 } n == 1 { return 3 } otherwise { } }\n\
         return n }",
    );
    let (_, modules) = workspace.lower("main");
    for module in &modules {
        module.verify().expect("module verifies");
    }
}

/// Context roundtrip: a member with a static initializer becomes a
/// global initialized to 7; no dynamic work lands in `_tabi_init`; main
/// loads the global.
#[test]
fn context_member_globalizes_with_initializer() {
    let workspace = Workspace::new();
    workspace.slab(
        "a",
        "context C { n: Int = 7 }\nfunction main captures [C] () -> Int { return C.n }",
    );
    let (_, modules) = workspace.lower("a");
    let global = modules[0]
        .globals
        .iter()
        .find(|g| g.name == "LOCAL_a_C_n")
        .expect("context member is a global");
    assert!(
        matches!(&global.init, Some(Value::ConstInt { value: 7, .. })),
        "initialized to 7, got {:?}",
        global.init
    );

    let init = find_function(&modules, "_tabi_init");
    assert_eq!(calls_to(init, "core_alloc"), 0, "no dynamic setup for a plain Int");

    let main = find_function(&modules, "_tabi_main");
    let loads_global = instructions(main).any(|i| {
        matches!(&i.kind, InstrKind::Load { ptr: Value::Global { name, .. }, .. } if name == "LOCAL_a_C_n")
    });
    assert!(loads_global, "main loads the context global");
}

/// A context member owning dynamic storage allocates in `_tabi_init`
/// and frees in `_tabi_destroy`.
#[test]
fn dynamic_context_member_initializes_and_tears_down() {
    let workspace = Workspace::new();
    workspace.slab(
        "main",
        "context C { buf: Vec[Int, 16] }\nfunction main captures [C] () -> Int { return C.buf[0] }",
    );
    let (_, modules) = workspace.lower("main");
    let init = find_function(&modules, "_tabi_init");
    assert!(calls_to(init, "core_alloc") >= 1, "init allocates the vector storage");
    let destroy = find_function(&modules, "_tabi_destroy");
    assert!(calls_to(destroy, "core_dealloc") >= 1, "destroy mirrors the allocation");
}

/// Non-root local functions get slab-qualified symbols; externals keep
/// their exported names.
#[test]
fn function_symbols_are_qualified() {
    let workspace = Workspace::new();
    workspace
        .slab("util", "function helper () -> Int { return 4 }")
        .slab(
            "main",
            "attach local util\nfunction main () -> Int { return util.helper() }",
        );
    let (_, modules) = workspace.lower("main");
    assert!(
        modules
            .iter()
            .any(|m| m.functions.iter().any(|f| f.name == "LOCAL_util::helper")),
        "helper is slab-qualified"
    );
    let main = find_function(&modules, "_tabi_main");
    assert_eq!(calls_to(main, "LOCAL_util::helper"), 1);
}

/// Every return path in a local function restores the stack marker
/// saved at entry, immediately before the return.
#[test]
fn returns_restore_the_stack_marker() {
    let workspace = Workspace::new();
    workspace.slab(
        "main",
        "function main (k: Int) -> Int { if k > 0 { return 1 }\nreturn 0 }",
    );
    let (_, modules) = workspace.lower("main");
    for function in modules.iter().flat_map(|m| &m.functions) {
        if function.name == "_tabi_init" || function.name == "_tabi_destroy" {
            continue;
        }
        for block in &function.blocks {
            let Some(last) = block.instrs.last() else { continue };
            if matches!(last.kind, InstrKind::Ret { .. }) {
                let before = &block.instrs[block.instrs.len() - 2];
                assert!(
                    matches!(before.kind, InstrKind::StackRestore { .. }),
                    "a stackrestore precedes the return in {}::{}",
                    function.name,
                    block.label
                );
            }
        }
    }
}

/// A loop whose condition is initially false still emits the
/// save/restore scaffolding: one save at entry plus one per loop body.
#[test]
fn loops_bracket_the_stack_per_iteration() {
    let workspace = Workspace::new();
    workspace.slab("main", "function main () -> Int { loop false { stacked x: Int = 1 }\nreturn 0 }");
    let (_, modules) = workspace.lower("main");
    let main = find_function(&modules, "_tabi_main");
    let saves = instructions(main)
        .filter(|i| matches!(i.kind, InstrKind::StackSave))
        .count();
    assert_eq!(saves, 2, "entry save plus loop body save");
    let restores = instructions(main)
        .filter(|i| matches!(i.kind, InstrKind::StackRestore { .. }))
        .count();
    assert_eq!(restores, 2, "return restore plus back-edge restore");
    assert!(
        main.blocks.iter().any(|b| b.label.starts_with("loop_condition")),
        "loop scaffolding exists even for a never-true condition"
    );
}

/// A function returning None with no explicit return emits a void
/// return.
#[test]
fn missing_return_falls_through_to_void() {
    let workspace = Workspace::new();
    workspace.slab("main", "function noop () { }\nfunction main () -> Int { noop()\nreturn 0 }");
    let (_, modules) = workspace.lower("main");
    let noop = find_function(&modules, "LOCAL_main::noop");
    let last = instructions(noop).last().expect("noop has instructions");
    assert!(matches!(last.kind, InstrKind::Ret { value: None }), "void return emitted");
}

/// String literals intern as private constants and lower to pointers.
#[test]
fn string_literals_become_private_globals() {
    let workspace = Workspace::new();
    workspace
        .slab("lib", "external function printText (Addr[Char]) as print_text")
        .slab(
            "main",
            "attach local lib\nfunction main () -> Int { lib.printText(\"hi\")\nreturn 0 }",
        );
    let (_, modules) = workspace.lower("main");
    let root = &modules[0];
    assert!(
        root.globals.iter().any(|g| g.private && g.string.as_deref() == Some("hi")),
        "the literal is interned in the calling module"
    );
}

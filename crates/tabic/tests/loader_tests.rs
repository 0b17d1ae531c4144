//! Creation-pass behavior: attachment resolution, slab caching, alias
//! rules, and load failures.

mod common;

use common::Workspace;
use tabic::diag::Kind;

/// Attaching the same slab twice under different aliases yields the
/// same slab object.
#[test]
fn repeated_attachment_resolves_to_one_slab() {
    let workspace = Workspace::new();
    workspace
        .slab("util", "function id (x: Int) -> Int { return x }")
        .slab(
            "main",
            "attach local util as a\nattach local util as b\nfunction main () -> Int { return a.id(1) }",
        );
    let bundle = workspace.create("main").expect("bundle should load");
    let root = bundle.slab(bundle.root);
    assert_eq!(bundle.slabs.len(), 2, "util loads once");
    assert_eq!(
        root.attachments.get("a"),
        root.attachments.get("b"),
        "both aliases point at the same slab"
    );
}

/// With no `as` clause the alias defaults to the entire relative id,
/// path separators included; an `as` clause is how a nested attachment
/// gets a referencable name.
#[test]
fn attachment_alias_defaults_to_full_relative_id() {
    let workspace = Workspace::new();
    workspace
        .slab("phys/vector", "function zero () -> Int { return 0 }")
        .slab(
            "main",
            "attach local phys/vector\nattach local phys/vector as vec\nfunction main () -> Int { return vec.zero() }",
        );
    let bundle = workspace.create("main").expect("bundle should load");
    let root = bundle.slab(bundle.root);
    assert!(
        root.attachments.contains_key("phys/vector"),
        "the default alias is the relative id verbatim"
    );
    assert!(!root.attachments.contains_key("vector"), "no truncation to the last segment");
    assert_eq!(
        root.attachments.get("phys/vector"),
        root.attachments.get("vec"),
        "both aliases resolve to the same slab"
    );
    let attached = bundle.slab(root.attachments["vec"]);
    assert_eq!(attached.id, "LOCAL_phys/vector");
}

/// Two attachments under one alias are a double-alias failure.
#[test]
fn double_alias_is_rejected() {
    let workspace = Workspace::new();
    workspace
        .slab("one", "function f () { return }")
        .slab("two", "function g () { return }")
        .slab(
            "main",
            "attach local one as x\nattach local two as x\nfunction main () -> Int { return 0 }",
        );
    let error = workspace.create("main").expect_err("double alias should fail");
    assert!(error.diagnostics.iter().any(|d| d.kind == Kind::DoubleAlias));
}

/// Two declarations sharing one name within a slab are also a
/// double-alias failure.
#[test]
fn duplicate_declaration_name_is_rejected() {
    let workspace = Workspace::new();
    workspace.slab(
        "main",
        "function f () { return }\ncollection f { x: Int }\nfunction main () -> Int { return 0 }",
    );
    let error = workspace.create("main").expect_err("duplicate name should fail");
    assert!(error.diagnostics.iter().any(|d| d.kind == Kind::DoubleAlias));
}

/// A missing attachment target fails creation with cannot-read.
#[test]
fn unreadable_attachment_fails_creation() {
    let workspace = Workspace::new();
    workspace.slab("main", "attach local nowhere\nfunction main () -> Int { return 0 }");
    let error = workspace.create("main").expect_err("missing file should fail");
    assert!(error.diagnostics.iter().any(|d| d.kind == Kind::CannotRead));
}

/// External attachments resolve through the library search path and get
/// EXTERNAL_ canonical ids.
#[test]
fn external_attachment_searches_library_dirs() {
    let mut workspace = Workspace::new();
    workspace.lib_slab("libs", "stdio", "external function printInt (Int) as print_int");
    workspace.slab(
        "main",
        "attach external stdio\nfunction main () -> Int { stdio.printInt(1)\nreturn 0 }",
    );
    let bundle = workspace.create("main").expect("bundle should load");
    assert!(
        bundle.slabs.iter().any(|s| s.id == "EXTERNAL_stdio"),
        "external slab is canonicalized"
    );
}

/// A syntax error in any slab aborts creation.
#[test]
fn syntax_error_fails_creation() {
    let workspace = Workspace::new();
    workspace.slab("main", "function main ( { return 0 }");
    let error = workspace.create("main").expect_err("syntax error should fail");
    assert!(error.diagnostics.iter().any(|d| d.kind == Kind::SyntaxError));
}

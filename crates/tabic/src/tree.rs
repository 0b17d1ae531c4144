//! The syntax tree interface between the parser collaborator and the core.
//!
//! The core never sees concrete syntax: it consumes a tree of named nodes,
//! each carrying a nonterminal name, a token string, child nodes and a
//! source position. The bundled [`crate::reader`] produces this tree; any
//! other front end that produces the same node vocabulary would do.
//!
//! The node vocabulary is fixed by the constants in [`names`]; the
//! creation and elaboration passes match on those names and nothing else.

use serde::Serialize;

/// One node of the parse tree.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    /// Nonterminal name, one of the constants in [`names`].
    pub name: &'static str,
    /// The matched token text for leaf-ish nodes (names, literals,
    /// operators); empty for purely structural nodes.
    pub token: String,
    pub line: u32,
    pub col: u32,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(name: &'static str, line: u32, col: u32) -> Self {
        Self {
            name,
            token: String::new(),
            line,
            col,
            children: Vec::new(),
        }
    }

    pub fn leaf(name: &'static str, token: impl Into<String>, line: u32, col: u32) -> Self {
        Self {
            name,
            token: token.into(),
            line,
            col,
            children: Vec::new(),
        }
    }

    /// First child with the given name, if any.
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All children with the given name, in order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Node> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Token of the first child with the given name, or `None`.
    pub fn child_token(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.token.as_str())
    }
}

/// The node vocabulary. Grouped by the pass that consumes them.
pub mod names {
    // Slab structure.
    pub const SLAB: &str = "slab";
    pub const ATTACH: &str = "attach";
    pub const REL_ID: &str = "rel_id";
    pub const EXTERNAL: &str = "external";
    pub const ALIAS: &str = "alias";

    // Top-level declarations.
    pub const COLLECTION_DECL: &str = "collection_decl";
    pub const ALIAS_DECL: &str = "alias_decl";
    pub const CONTEXT_DECL: &str = "context_decl";
    pub const DUMP_DECL: &str = "dump_decl";
    pub const FUNCTION_DECL: &str = "function_decl";
    pub const EXTERNAL_FUNCTION_DECL: &str = "external_function_decl";
    pub const NAME: &str = "name";
    pub const MEMBER: &str = "member";
    pub const CAPTURES: &str = "captures";
    pub const GROUP_REF: &str = "group_ref";
    pub const PARAM: &str = "param";
    pub const EXTERNAL_NAME: &str = "external_name";

    // Type references.
    pub const TYPE_REF: &str = "type_ref";
    pub const PRIMITIVE_TYPE: &str = "primitive_type";
    pub const NAMED_TYPE: &str = "named_type";
    pub const SLAB_NAME: &str = "slab_name";
    pub const TYPE_NAME: &str = "type_name";
    pub const ADDRESS_TYPE: &str = "address_type";
    pub const VECTOR_TYPE: &str = "vector_type";
    pub const TABLE_TYPE: &str = "table_type";
    pub const TABLE_FIELD: &str = "table_field";

    // Statements.
    pub const BLOCK: &str = "block";
    pub const STATEMENT: &str = "statement";
    pub const RETURN_STMT: &str = "return_stmt";
    pub const STACKED_DECL: &str = "stacked_decl";
    pub const HEAPED_DECL: &str = "heaped_decl";
    pub const ASSIGN_STMT: &str = "assign_stmt";
    pub const CALL_STMT: &str = "call_stmt";
    pub const IF_STMT: &str = "if_stmt";
    pub const BRANCH_STMT: &str = "branch_stmt";
    pub const TWIG: &str = "twig";
    pub const OTHERWISE: &str = "otherwise";
    pub const LOOP_STMT: &str = "loop_stmt";
    pub const VECTOR_SET_STMT: &str = "vector_set_stmt";
    pub const FROM_INDEX: &str = "from_index";
    pub const TABLE_INSERT_STMT: &str = "table_insert_stmt";
    pub const CELL: &str = "cell";
    pub const NULL_CELL: &str = "null_cell";
    pub const ID_REF: &str = "id_ref";
    pub const TABLE_DELETE_STMT: &str = "table_delete_stmt";
    pub const TABLE_MEASURE_STMT: &str = "table_measure_stmt";
    pub const TABLE_CRUNCH_STMT: &str = "table_crunch_stmt";
    pub const LABEL_STMT: &str = "label_stmt";
    pub const UNHEAP_STMT: &str = "unheap_stmt";

    // Expressions.
    pub const EXPR: &str = "expr";
    pub const BINARY_EXPR: &str = "binary_expr";
    pub const OPERATOR: &str = "operator";
    pub const SINGLETON_EXPR: &str = "singleton_expr";
    pub const NULL_LIT: &str = "null_lit";
    pub const INT_LIT: &str = "int_lit";
    pub const SHORT_LIT: &str = "short_lit";
    pub const LONG_LIT: &str = "long_lit";
    pub const SIZE_LIT: &str = "size_lit";
    pub const FLOAT_LIT: &str = "float_lit";
    pub const DOUBLE_LIT: &str = "double_lit";
    pub const CHAR_LIT: &str = "char_lit";
    pub const STRING_LIT: &str = "string_lit";
    pub const TRUTH_LIT: &str = "truth_lit";
    pub const VALUE_EXPR: &str = "value_expr";
    pub const LOCATE: &str = "locate";
    pub const CALL_EXPR: &str = "call_expr";
    pub const PAREN_EXPR: &str = "paren_expr";

    // Value references.
    pub const VALUE_REF: &str = "value_ref";
    pub const IDENT: &str = "ident";
    pub const MEMBER_REF: &str = "member_ref";
    pub const ELEMENT_REF: &str = "element_ref";
    pub const ROW_REF: &str = "row_ref";
    pub const QUERY: &str = "query";

    // Function references.
    pub const FUNCTION_REF: &str = "function_ref";
    pub const FUNCTION_NAME: &str = "function_name";
}

//! The bundled source reader: a lexer and recursive-descent parser that
//! produce the named-node tree of [`crate::tree`].
//!
//! This stands in for the grammar-file-driven parser collaborator; the
//! rest of the pipeline only ever sees the tree interface. The surface
//! syntax is sketched in the repository README.

use std::str::FromStr;

use crate::diag::{Diagnostic, Kind};
use crate::model::Primitive;
use crate::tree::{Node, names};

/// Parses one slab's source text into a tree rooted at a `slab` node.
pub fn parse(source: &str) -> Result<Node, Diagnostic> {
    let tokens = lex(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_slab()
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    IntLit { digits: String, suffix: Option<char> },
    FloatLit { text: String, double: bool },
    StringLit(String),
    CharLit(u8),
    Punct(&'static str),
    Newline,
    Eof,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Self::Ident(s) => format!("`{s}`"),
            Self::IntLit { digits, .. } => format!("number `{digits}`"),
            Self::FloatLit { text, .. } => format!("number `{text}`"),
            Self::StringLit(_) => "string literal".to_string(),
            Self::CharLit(_) => "character literal".to_string(),
            Self::Punct(p) => format!("`{p}`"),
            Self::Newline => "end of line".to_string(),
            Self::Eof => "end of file".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: u32,
    col: u32,
}

const PUNCTS: [&str; 23] = [
    "->", "==", "!=", "<=", ">=", "{", "}", "(", ")", "[", "]", ",", ":", ";", ".", "?", "@", "=", "<", ">", "+", "-",
    "/",
];

fn lex(source: &str) -> Result<Vec<Token>, Diagnostic> {
    let mut tokens: Vec<Token> = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0usize;
    let mut line = 1u32;
    let mut col = 1u32;
    // Newlines inside parentheses and square brackets do not terminate
    // statements.
    let mut nesting = 0i32;

    macro_rules! push {
        ($tok:expr, $line:expr, $col:expr) => {
            tokens.push(Token {
                tok: $tok,
                line: $line,
                col: $col,
            })
        };
    }

    while i < chars.len() {
        let c = chars[i];
        let (tline, tcol) = (line, col);
        match c {
            ' ' | '\t' | '\r' => {
                i += 1;
                col += 1;
            }
            '\n' => {
                if nesting == 0 && !matches!(tokens.last().map(|t| &t.tok), Some(Tok::Newline) | None) {
                    push!(Tok::Newline, tline, tcol);
                }
                i += 1;
                line += 1;
                col = 1;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                    col += 1;
                }
            }
            '*' => {
                push!(Tok::Punct("*"), tline, tcol);
                i += 1;
                col += 1;
            }
            '"' => {
                i += 1;
                col += 1;
                let mut s = String::new();
                loop {
                    match chars.get(i) {
                        None | Some('\n') => {
                            return Err(Diagnostic::new(Kind::SyntaxError, tline, tcol, "unterminated string literal"));
                        }
                        Some('"') => {
                            i += 1;
                            col += 1;
                            break;
                        }
                        Some('\\') => {
                            let escaped = unescape(chars.get(i + 1).copied(), tline, tcol)?;
                            s.push(escaped as char);
                            i += 2;
                            col += 2;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                            col += 1;
                        }
                    }
                }
                push!(Tok::StringLit(s), tline, tcol);
            }
            '\'' => {
                let value = match chars.get(i + 1) {
                    Some('\\') => {
                        let v = unescape(chars.get(i + 2).copied(), tline, tcol)?;
                        i += 4;
                        col += 4;
                        v
                    }
                    Some(&ch) if ch != '\'' => {
                        i += 3;
                        col += 3;
                        ch as u8
                    }
                    _ => {
                        return Err(Diagnostic::new(Kind::SyntaxError, tline, tcol, "malformed character literal"));
                    }
                };
                if chars.get(i - 1) != Some(&'\'') {
                    return Err(Diagnostic::new(Kind::SyntaxError, tline, tcol, "unterminated character literal"));
                }
                push!(Tok::CharLit(value), tline, tcol);
            }
            _ if c.is_ascii_digit() => {
                let mut digits = String::new();
                while i < chars.len() && chars[i].is_ascii_digit() {
                    digits.push(chars[i]);
                    i += 1;
                    col += 1;
                }
                if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(char::is_ascii_digit) {
                    let mut text = digits;
                    text.push('.');
                    i += 1;
                    col += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        text.push(chars[i]);
                        i += 1;
                        col += 1;
                    }
                    let double = chars.get(i) == Some(&'d');
                    if double {
                        i += 1;
                        col += 1;
                    }
                    push!(Tok::FloatLit { text, double }, tline, tcol);
                } else {
                    let suffix = match chars.get(i).copied() {
                        Some(s @ ('s' | 'l' | 'z')) if !chars.get(i + 1).is_some_and(|c| c.is_alphanumeric()) => {
                            i += 1;
                            col += 1;
                            Some(s)
                        }
                        _ => None,
                    };
                    push!(Tok::IntLit { digits, suffix }, tline, tcol);
                }
            }
            _ if c.is_alphabetic() || c == '_' => {
                let mut s = String::new();
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    s.push(chars[i]);
                    i += 1;
                    col += 1;
                }
                push!(Tok::Ident(s), tline, tcol);
            }
            _ => {
                let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
                let punct = PUNCTS
                    .iter()
                    .find(|p| rest.starts_with(**p))
                    .copied()
                    .ok_or_else(|| {
                        Diagnostic::new(Kind::SyntaxError, tline, tcol, format!("unexpected character `{c}`"))
                    })?;
                match punct {
                    "(" | "[" => nesting += 1,
                    ")" | "]" => nesting -= 1,
                    _ => {}
                }
                push!(Tok::Punct(punct), tline, tcol);
                i += punct.len();
                col += u32::try_from(punct.len()).unwrap_or(1);
            }
        }
    }
    tokens.push(Token {
        tok: Tok::Eof,
        line,
        col,
    });
    Ok(tokens)
}

fn unescape(escaped: Option<char>, line: u32, col: u32) -> Result<u8, Diagnostic> {
    match escaped {
        Some('n') => Ok(b'\n'),
        Some('t') => Ok(b'\t'),
        Some('r') => Ok(b'\r'),
        Some('0') => Ok(0),
        Some('\\') => Ok(b'\\'),
        Some('\'') => Ok(b'\''),
        Some('"') => Ok(b'"'),
        other => Err(Diagnostic::new(
            Kind::SyntaxError,
            line,
            col,
            format!("unknown escape sequence {other:?}"),
        )),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)]
    }

    fn bump(&mut self) -> Token {
        let t = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek().tok, Tok::Newline) {
            self.bump();
        }
    }

    fn error(&self, expected: &str) -> Diagnostic {
        let t = self.peek();
        Diagnostic::new(
            Kind::SyntaxError,
            t.line,
            t.col,
            format!("expected {expected}, found {}", t.tok.describe()),
        )
    }

    fn expect_punct(&mut self, punct: &str) -> Result<Token, Diagnostic> {
        if matches!(&self.peek().tok, Tok::Punct(p) if *p == punct) {
            Ok(self.bump())
        } else {
            Err(self.error(&format!("`{punct}`")))
        }
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if matches!(&self.peek().tok, Tok::Punct(p) if *p == punct) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(&self.peek().tok, Tok::Ident(s) if s == keyword) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<(String, u32, u32), Diagnostic> {
        if let Tok::Ident(_) = &self.peek().tok {
            let t = self.bump();
            let Tok::Ident(s) = t.tok else { unreachable!() };
            Ok((s, t.line, t.col))
        } else {
            Err(self.error(what))
        }
    }

    fn at_ident(&self, keyword: &str) -> bool {
        matches!(&self.peek().tok, Tok::Ident(s) if s == keyword)
    }

    fn parse_slab(&mut self) -> Result<Node, Diagnostic> {
        let mut slab = Node::new(names::SLAB, 1, 1);
        loop {
            self.skip_newlines();
            let word = match &self.peek().tok {
                Tok::Eof => break,
                Tok::Ident(word) => word.clone(),
                _ => return Err(self.error("a top-level declaration")),
            };
            let form = match word.as_str() {
                "attach" => self.parse_attach()?,
                "collection" => self.parse_collection_decl()?,
                "alias" => self.parse_alias_decl()?,
                "context" => self.parse_group_decl(names::CONTEXT_DECL, "context")?,
                "dump" => self.parse_group_decl(names::DUMP_DECL, "dump")?,
                "function" => self.parse_function_decl()?,
                "external" => self.parse_external_function_decl()?,
                _ => return Err(self.error("a top-level declaration")),
            };
            slab.children.push(form);
        }
        Ok(slab)
    }

    fn parse_attach(&mut self) -> Result<Node, Diagnostic> {
        let kw = self.bump();
        let mut node = Node::new(names::ATTACH, kw.line, kw.col);
        let external = if self.eat_keyword("external") {
            true
        } else {
            // `local` is the default and may be spelled out.
            self.eat_keyword("local");
            false
        };
        if external {
            node.children.push(Node::leaf(names::EXTERNAL, "", kw.line, kw.col));
        }
        let (mut rel, line, col) = self.expect_ident("an attachment id")?;
        while self.eat_punct("/") {
            let (seg, _, _) = self.expect_ident("a path segment")?;
            rel.push('/');
            rel.push_str(&seg);
        }
        node.children.push(Node::leaf(names::REL_ID, rel, line, col));
        if self.eat_keyword("as") {
            let (alias, aline, acol) = self.expect_ident("an alias name")?;
            node.children.push(Node::leaf(names::ALIAS, alias, aline, acol));
        }
        Ok(node)
    }

    fn parse_collection_decl(&mut self) -> Result<Node, Diagnostic> {
        let kw = self.bump();
        let mut node = Node::new(names::COLLECTION_DECL, kw.line, kw.col);
        let (name, line, col) = self.expect_ident("a collection name")?;
        node.children.push(Node::leaf(names::NAME, name, line, col));
        self.expect_punct("{")?;
        loop {
            self.skip_newlines();
            if self.eat_punct("}") {
                break;
            }
            let (member_name, mline, mcol) = self.expect_ident("a member name")?;
            self.expect_punct(":")?;
            let ty = self.parse_type_ref()?;
            let mut member = Node::new(names::MEMBER, mline, mcol);
            member.children.push(Node::leaf(names::NAME, member_name, mline, mcol));
            member.children.push(ty);
            node.children.push(member);
            self.eat_punct(",");
        }
        Ok(node)
    }

    fn parse_alias_decl(&mut self) -> Result<Node, Diagnostic> {
        let kw = self.bump();
        let mut node = Node::new(names::ALIAS_DECL, kw.line, kw.col);
        let (name, line, col) = self.expect_ident("an alias name")?;
        node.children.push(Node::leaf(names::NAME, name, line, col));
        self.expect_punct("=")?;
        node.children.push(self.parse_type_ref()?);
        Ok(node)
    }

    /// Contexts and dumps share a shape: named members with a type and an
    /// optional static initializer.
    fn parse_group_decl(&mut self, node_name: &'static str, what: &str) -> Result<Node, Diagnostic> {
        let kw = self.bump();
        let mut node = Node::new(node_name, kw.line, kw.col);
        let (name, line, col) = self.expect_ident(&format!("a {what} name"))?;
        node.children.push(Node::leaf(names::NAME, name, line, col));
        self.expect_punct("{")?;
        loop {
            self.skip_newlines();
            if self.eat_punct("}") {
                break;
            }
            let (member_name, mline, mcol) = self.expect_ident("a member name")?;
            self.expect_punct(":")?;
            let ty = self.parse_type_ref()?;
            let mut member = Node::new(names::MEMBER, mline, mcol);
            member.children.push(Node::leaf(names::NAME, member_name, mline, mcol));
            member.children.push(ty);
            if self.eat_punct("=") {
                member.children.push(self.parse_expr()?);
            }
            node.children.push(member);
            self.eat_punct(",");
        }
        Ok(node)
    }

    fn parse_function_decl(&mut self) -> Result<Node, Diagnostic> {
        let kw = self.bump();
        let mut node = Node::new(names::FUNCTION_DECL, kw.line, kw.col);
        let (name, line, col) = self.expect_ident("a function name")?;
        node.children.push(Node::leaf(names::NAME, name, line, col));
        if self.eat_keyword("captures") {
            let open = self.expect_punct("[")?;
            let mut captures = Node::new(names::CAPTURES, open.line, open.col);
            loop {
                let (first, gline, gcol) = self.expect_ident("a context name")?;
                let mut group = Node::new(names::GROUP_REF, gline, gcol);
                if self.eat_punct(".") {
                    let (ctx, cline, ccol) = self.expect_ident("a context name")?;
                    group.children.push(Node::leaf(names::SLAB_NAME, first, gline, gcol));
                    group.children.push(Node::leaf(names::NAME, ctx, cline, ccol));
                } else {
                    group.children.push(Node::leaf(names::NAME, first, gline, gcol));
                }
                captures.children.push(group);
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct("]")?;
            node.children.push(captures);
        }
        self.expect_punct("(")?;
        while !self.eat_punct(")") {
            let (param_name, pline, pcol) = self.expect_ident("a parameter name")?;
            self.expect_punct(":")?;
            let ty = self.parse_type_ref()?;
            let mut param = Node::new(names::PARAM, pline, pcol);
            param.children.push(Node::leaf(names::NAME, param_name, pline, pcol));
            param.children.push(ty);
            node.children.push(param);
            if !self.eat_punct(",") && !matches!(self.peek().tok, Tok::Punct(")")) {
                return Err(self.error("`,` or `)`"));
            }
        }
        if self.eat_punct("->") {
            node.children.push(self.parse_type_ref()?);
        }
        self.skip_newlines();
        node.children.push(self.parse_block()?);
        Ok(node)
    }

    fn parse_external_function_decl(&mut self) -> Result<Node, Diagnostic> {
        let kw = self.bump();
        if !self.eat_keyword("function") {
            return Err(self.error("`function`"));
        }
        let mut node = Node::new(names::EXTERNAL_FUNCTION_DECL, kw.line, kw.col);
        let (name, line, col) = self.expect_ident("a function name")?;
        node.children.push(Node::leaf(names::NAME, name, line, col));
        self.expect_punct("(")?;
        // Argument types are wrapped in param nodes so the bare type_ref
        // child stays unambiguous as the return type.
        while !self.eat_punct(")") {
            let ty = self.parse_type_ref()?;
            let mut param = Node::new(names::PARAM, ty.line, ty.col);
            param.children.push(ty);
            node.children.push(param);
            if !self.eat_punct(",") && !matches!(self.peek().tok, Tok::Punct(")")) {
                return Err(self.error("`,` or `)`"));
            }
        }
        if self.eat_punct("->") {
            node.children.push(self.parse_type_ref()?);
        }
        if self.eat_keyword("as") {
            let (external, eline, ecol) = self.expect_ident("an exported name")?;
            node.children.push(Node::leaf(names::EXTERNAL_NAME, external, eline, ecol));
        }
        Ok(node)
    }

    fn parse_type_ref(&mut self) -> Result<Node, Diagnostic> {
        let t = self.peek().clone();
        let mut node = Node::new(names::TYPE_REF, t.line, t.col);
        let Tok::Ident(word) = &t.tok else {
            return Err(self.error("a type"));
        };
        match word.as_str() {
            "Addr" => {
                self.bump();
                self.expect_punct("[")?;
                let mut addr = Node::new(names::ADDRESS_TYPE, t.line, t.col);
                addr.children.push(self.parse_type_ref()?);
                self.expect_punct("]")?;
                node.children.push(addr);
            }
            "Vec" => {
                self.bump();
                self.expect_punct("[")?;
                let mut vec = Node::new(names::VECTOR_TYPE, t.line, t.col);
                vec.children.push(self.parse_type_ref()?);
                if self.eat_punct(",") {
                    vec.children.push(self.parse_expr()?);
                }
                self.expect_punct("]")?;
                node.children.push(vec);
            }
            "Table" => {
                self.bump();
                self.expect_punct("[")?;
                let mut table = Node::new(names::TABLE_TYPE, t.line, t.col);
                loop {
                    let (field_name, fline, fcol) = self.expect_ident("a field name")?;
                    self.expect_punct(":")?;
                    let ty = self.parse_type_ref()?;
                    let mut field = Node::new(names::TABLE_FIELD, fline, fcol);
                    field.children.push(Node::leaf(names::NAME, field_name, fline, fcol));
                    field.children.push(ty);
                    table.children.push(field);
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct(";")?;
                table.children.push(self.parse_expr()?);
                self.expect_punct("]")?;
                node.children.push(table);
            }
            _ if Primitive::from_str(word).is_ok() => {
                self.bump();
                node.children
                    .push(Node::leaf(names::PRIMITIVE_TYPE, word.clone(), t.line, t.col));
            }
            _ => {
                self.bump();
                let mut named = Node::new(names::NAMED_TYPE, t.line, t.col);
                if self.eat_punct(".") {
                    let (type_name, nline, ncol) = self.expect_ident("a type name")?;
                    named.children.push(Node::leaf(names::SLAB_NAME, word.clone(), t.line, t.col));
                    named.children.push(Node::leaf(names::TYPE_NAME, type_name, nline, ncol));
                } else {
                    named
                        .children
                        .push(Node::leaf(names::TYPE_NAME, word.clone(), t.line, t.col));
                }
                node.children.push(named);
            }
        }
        Ok(node)
    }

    fn parse_block(&mut self) -> Result<Node, Diagnostic> {
        let open = self.expect_punct("{")?;
        let mut block = Node::new(names::BLOCK, open.line, open.col);
        loop {
            self.skip_newlines();
            while self.eat_punct(";") {
                self.skip_newlines();
            }
            if self.eat_punct("}") {
                break;
            }
            if matches!(self.peek().tok, Tok::Eof) {
                return Err(self.error("`}`"));
            }
            let inner = self.parse_statement()?;
            let mut statement = Node::new(names::STATEMENT, inner.line, inner.col);
            statement.children.push(inner);
            block.children.push(statement);
        }
        Ok(block)
    }

    fn parse_statement(&mut self) -> Result<Node, Diagnostic> {
        let t = self.peek().clone();
        match &t.tok {
            Tok::Punct("{") => self.parse_block(),
            Tok::Ident(word) => match word.as_str() {
                "return" => {
                    self.bump();
                    let mut node = Node::new(names::RETURN_STMT, t.line, t.col);
                    if !matches!(self.peek().tok, Tok::Newline | Tok::Punct("}") | Tok::Punct(";")) {
                        node.children.push(self.parse_expr()?);
                    }
                    Ok(node)
                }
                "stacked" => self.parse_var_decl(names::STACKED_DECL),
                "heaped" => self.parse_var_decl(names::HEAPED_DECL),
                "if" => {
                    self.bump();
                    let mut node = Node::new(names::IF_STMT, t.line, t.col);
                    node.children.push(self.parse_expr()?);
                    node.children.push(self.parse_block()?);
                    Ok(node)
                }
                "branch" => self.parse_branch(),
                "loop" => {
                    self.bump();
                    let mut node = Node::new(names::LOOP_STMT, t.line, t.col);
                    node.children.push(self.parse_expr()?);
                    node.children.push(self.parse_block()?);
                    Ok(node)
                }
                "set" => {
                    self.bump();
                    let mut node = Node::new(names::VECTOR_SET_STMT, t.line, t.col);
                    node.children.push(self.parse_value_ref()?);
                    if !self.eat_keyword("from") {
                        return Err(self.error("`from`"));
                    }
                    let from_tok = self.peek().clone();
                    let mut from = Node::new(names::FROM_INDEX, from_tok.line, from_tok.col);
                    from.children.push(self.parse_expr()?);
                    node.children.push(from);
                    self.expect_punct("=")?;
                    loop {
                        node.children.push(self.parse_expr()?);
                        if !self.eat_punct(",") {
                            break;
                        }
                    }
                    Ok(node)
                }
                "insert" => {
                    self.bump();
                    let mut node = Node::new(names::TABLE_INSERT_STMT, t.line, t.col);
                    node.children.push(self.parse_value_ref()?);
                    self.expect_punct("(")?;
                    while !self.eat_punct(")") {
                        let cell_tok = self.peek().clone();
                        let mut cell = Node::new(names::CELL, cell_tok.line, cell_tok.col);
                        if self.at_ident("null") {
                            self.bump();
                            cell.children.push(Node::leaf(names::NULL_CELL, "", cell_tok.line, cell_tok.col));
                        } else {
                            cell.children.push(self.parse_expr()?);
                        }
                        node.children.push(cell);
                        if !self.eat_punct(",") && !matches!(self.peek().tok, Tok::Punct(")")) {
                            return Err(self.error("`,` or `)`"));
                        }
                    }
                    if self.eat_keyword("id") {
                        let id_tok = self.peek().clone();
                        let mut id = Node::new(names::ID_REF, id_tok.line, id_tok.col);
                        id.children.push(self.parse_value_ref()?);
                        node.children.push(id);
                    }
                    Ok(node)
                }
                "delete" => {
                    self.bump();
                    let mut node = Node::new(names::TABLE_DELETE_STMT, t.line, t.col);
                    node.children.push(self.parse_value_ref()?);
                    node.children.push(self.parse_expr()?);
                    Ok(node)
                }
                "measure" => {
                    self.bump();
                    let mut node = Node::new(names::TABLE_MEASURE_STMT, t.line, t.col);
                    node.children.push(self.parse_value_ref()?);
                    node.children.push(self.parse_value_ref()?);
                    Ok(node)
                }
                "crunch" => {
                    self.bump();
                    let mut node = Node::new(names::TABLE_CRUNCH_STMT, t.line, t.col);
                    node.children.push(self.parse_value_ref()?);
                    if matches!(self.peek().tok, Tok::Ident(_)) {
                        node.children.push(self.parse_value_ref()?);
                    }
                    Ok(node)
                }
                "label" => {
                    self.bump();
                    let mut node = Node::new(names::LABEL_STMT, t.line, t.col);
                    node.children.push(self.parse_value_ref()?);
                    self.expect_punct("=")?;
                    node.children.push(self.parse_expr()?);
                    Ok(node)
                }
                "unheap" => {
                    self.bump();
                    let mut node = Node::new(names::UNHEAP_STMT, t.line, t.col);
                    node.children.push(self.parse_expr()?);
                    if self.eat_punct(":") {
                        node.children.push(self.parse_type_ref()?);
                    }
                    Ok(node)
                }
                _ => {
                    // A bare identifier begins either a procedure call or
                    // an assignment to a value reference.
                    if self.at_call_start() {
                        let mut node = Node::new(names::CALL_STMT, t.line, t.col);
                        self.parse_call_into(&mut node)?;
                        Ok(node)
                    } else {
                        let mut node = Node::new(names::ASSIGN_STMT, t.line, t.col);
                        node.children.push(self.parse_value_ref()?);
                        self.expect_punct("=")?;
                        node.children.push(self.parse_expr()?);
                        Ok(node)
                    }
                }
            },
            _ => Err(self.error("a statement")),
        }
    }

    fn parse_var_decl(&mut self, node_name: &'static str) -> Result<Node, Diagnostic> {
        let kw = self.bump();
        let mut node = Node::new(node_name, kw.line, kw.col);
        let (name, line, col) = self.expect_ident("a variable name")?;
        node.children.push(Node::leaf(names::NAME, name, line, col));
        self.expect_punct(":")?;
        node.children.push(self.parse_type_ref()?);
        if self.eat_punct("=") {
            node.children.push(self.parse_expr()?);
        }
        Ok(node)
    }

    fn parse_branch(&mut self) -> Result<Node, Diagnostic> {
        let kw = self.bump();
        let mut node = Node::new(names::BRANCH_STMT, kw.line, kw.col);
        self.expect_punct("{")?;
        loop {
            self.skip_newlines();
            if self.eat_punct("}") {
                break;
            }
            if self.at_ident("otherwise") {
                let other_tok = self.bump();
                let mut otherwise = Node::new(names::OTHERWISE, other_tok.line, other_tok.col);
                otherwise.children.push(self.parse_block()?);
                node.children.push(otherwise);
                continue;
            }
            let twig_tok = self.peek().clone();
            let mut twig = Node::new(names::TWIG, twig_tok.line, twig_tok.col);
            twig.children.push(self.parse_expr()?);
            twig.children.push(self.parse_block()?);
            node.children.push(twig);
        }
        Ok(node)
    }

    /// True when the upcoming tokens are `name (` or `name . name (`: a
    /// call rather than a value reference.
    fn at_call_start(&self) -> bool {
        matches!(self.peek_at(1).tok, Tok::Punct("("))
            || (matches!(self.peek_at(1).tok, Tok::Punct("."))
                && matches!(self.peek_at(2).tok, Tok::Ident(_))
                && matches!(self.peek_at(3).tok, Tok::Punct("(")))
    }

    /// Parses `[slab.]name(args...)` into `node` as a FUNCTION_REF child
    /// followed by argument EXPR children.
    fn parse_call_into(&mut self, node: &mut Node) -> Result<(), Diagnostic> {
        let (first, line, col) = self.expect_ident("a function name")?;
        let mut func_ref = Node::new(names::FUNCTION_REF, line, col);
        if self.eat_punct(".") {
            let (func, fline, fcol) = self.expect_ident("a function name")?;
            func_ref.children.push(Node::leaf(names::SLAB_NAME, first, line, col));
            func_ref.children.push(Node::leaf(names::FUNCTION_NAME, func, fline, fcol));
        } else {
            func_ref.children.push(Node::leaf(names::FUNCTION_NAME, first, line, col));
        }
        node.children.push(func_ref);
        self.expect_punct("(")?;
        while !self.eat_punct(")") {
            node.children.push(self.parse_expr()?);
            if !self.eat_punct(",") && !matches!(self.peek().tok, Tok::Punct(")")) {
                return Err(self.error("`,` or `)`"));
            }
        }
        Ok(())
    }

    fn parse_expr(&mut self) -> Result<Node, Diagnostic> {
        let start = self.peek().clone();
        let singleton = self.parse_singleton()?;
        let mut expr = Node::new(names::EXPR, start.line, start.col);
        if let Some(op) = self.peek_operator() {
            let op_tok = self.bump();
            let mut binary = Node::new(names::BINARY_EXPR, start.line, start.col);
            binary.children.push(singleton);
            binary.children.push(Node::leaf(names::OPERATOR, op, op_tok.line, op_tok.col));
            binary.children.push(self.parse_expr()?);
            expr.children.push(binary);
        } else {
            expr.children.push(singleton);
        }
        Ok(expr)
    }

    fn peek_operator(&self) -> Option<&'static str> {
        match &self.peek().tok {
            Tok::Punct(p @ ("+" | "-" | "*" | "/" | "<" | ">" | "<=" | ">=" | "==" | "!=")) => Some(*p),
            _ => None,
        }
    }

    fn parse_singleton(&mut self) -> Result<Node, Diagnostic> {
        let t = self.peek().clone();
        let mut node = Node::new(names::SINGLETON_EXPR, t.line, t.col);
        match &t.tok {
            Tok::Punct("(") => {
                self.bump();
                let mut paren = Node::new(names::PAREN_EXPR, t.line, t.col);
                paren.children.push(self.parse_expr()?);
                self.expect_punct(")")?;
                node.children.push(paren);
            }
            Tok::Punct("?") => {
                self.bump();
                let mut value = Node::new(names::VALUE_EXPR, t.line, t.col);
                value.children.push(Node::leaf(names::LOCATE, "", t.line, t.col));
                value.children.push(self.parse_value_ref()?);
                node.children.push(value);
            }
            Tok::Punct("-") => {
                self.bump();
                let lit = self.parse_numeric_literal(true)?;
                node.children.push(lit);
            }
            Tok::IntLit { .. } | Tok::FloatLit { .. } => {
                let lit = self.parse_numeric_literal(false)?;
                node.children.push(lit);
            }
            Tok::StringLit(s) => {
                self.bump();
                node.children.push(Node::leaf(names::STRING_LIT, s.clone(), t.line, t.col));
            }
            Tok::CharLit(c) => {
                self.bump();
                node.children
                    .push(Node::leaf(names::CHAR_LIT, (*c as char).to_string(), t.line, t.col));
            }
            Tok::Ident(word) => match word.as_str() {
                "null" => {
                    self.bump();
                    node.children.push(Node::leaf(names::NULL_LIT, "", t.line, t.col));
                }
                "true" | "false" => {
                    self.bump();
                    node.children.push(Node::leaf(names::TRUTH_LIT, word.clone(), t.line, t.col));
                }
                _ => {
                    if self.at_call_start() {
                        let mut call = Node::new(names::CALL_EXPR, t.line, t.col);
                        self.parse_call_into(&mut call)?;
                        node.children.push(call);
                    } else {
                        let mut value = Node::new(names::VALUE_EXPR, t.line, t.col);
                        value.children.push(self.parse_value_ref()?);
                        node.children.push(value);
                    }
                }
            },
            _ => return Err(self.error("an expression")),
        }
        Ok(node)
    }

    fn parse_numeric_literal(&mut self, negative: bool) -> Result<Node, Diagnostic> {
        let t = self.bump();
        match &t.tok {
            Tok::IntLit { digits, suffix } => {
                let text = if negative { format!("-{digits}") } else { digits.clone() };
                let name = match suffix {
                    Some('s') => names::SHORT_LIT,
                    Some('l') => names::LONG_LIT,
                    Some('z') => names::SIZE_LIT,
                    _ => names::INT_LIT,
                };
                Ok(Node::leaf(name, text, t.line, t.col))
            }
            Tok::FloatLit { text, double } => {
                let text = if negative { format!("-{text}") } else { text.clone() };
                let name = if *double { names::DOUBLE_LIT } else { names::FLOAT_LIT };
                Ok(Node::leaf(name, text, t.line, t.col))
            }
            _ => Err(self.error("a numeric literal")),
        }
    }

    fn parse_value_ref(&mut self) -> Result<Node, Diagnostic> {
        let (head, line, col) = self.expect_ident("a variable name")?;
        let mut node = Node::new(names::VALUE_REF, line, col);
        node.children.push(Node::leaf(names::IDENT, head, line, col));
        loop {
            let t = self.peek().clone();
            match &t.tok {
                Tok::Punct(".") => {
                    self.bump();
                    let (member, mline, mcol) = self.expect_ident("a member name")?;
                    let mut seg = Node::new(names::MEMBER_REF, mline, mcol);
                    seg.children.push(Node::leaf(names::NAME, member, mline, mcol));
                    node.children.push(seg);
                }
                Tok::Punct("[") => {
                    self.bump();
                    let mut seg = Node::new(names::ELEMENT_REF, t.line, t.col);
                    seg.children.push(self.parse_expr()?);
                    self.expect_punct("]")?;
                    node.children.push(seg);
                }
                // A row reference only when the braces read `{ name : `;
                // otherwise the brace opens a block and ends the ref.
                Tok::Punct("{")
                    if matches!(self.peek_at(1).tok, Tok::Ident(_)) && matches!(self.peek_at(2).tok, Tok::Punct(":")) =>
                {
                    self.bump();
                    let (field, fline, fcol) = self.expect_ident("a field name")?;
                    self.expect_punct(":")?;
                    let mut seg = Node::new(names::ROW_REF, fline, fcol);
                    seg.children.push(Node::leaf(names::NAME, field, fline, fcol));
                    seg.children.push(self.parse_expr()?);
                    self.expect_punct("}")?;
                    node.children.push(seg);
                }
                Tok::Punct("@") => {
                    self.bump();
                    node.children.push(Node::leaf(names::QUERY, "", t.line, t.col));
                    break;
                }
                _ => break,
            }
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Node {
        parse(src).expect("source should parse")
    }

    #[test]
    fn minimal_function_parses() {
        let slab = parse_ok("function main () -> Int { return 0 }");
        let func = slab.child(names::FUNCTION_DECL).expect("function decl");
        assert_eq!(func.child_token(names::NAME), Some("main"));
        assert!(func.child(names::TYPE_REF).is_some(), "return type recorded");
        let block = func.child(names::BLOCK).expect("body block");
        assert_eq!(block.children.len(), 1);
    }

    #[test]
    fn attach_records_domain_and_alias() {
        let slab = parse_ok("attach external stdio as io\nattach local phys/vector\n");
        let mut attaches = slab.children_named(names::ATTACH);
        let first = attaches.next().expect("first attach");
        assert!(first.child(names::EXTERNAL).is_some());
        assert_eq!(first.child_token(names::ALIAS), Some("io"));
        let second = attaches.next().expect("second attach");
        assert!(second.child(names::EXTERNAL).is_none());
        assert_eq!(second.child_token(names::REL_ID), Some("phys/vector"));
    }

    #[test]
    fn value_ref_segments_and_query() {
        let slab = parse_ok("function f () { a.b[3].c@ = t{x: 2} }");
        let func = slab.child(names::FUNCTION_DECL).expect("fn");
        let block = func.child(names::BLOCK).expect("block");
        let assign = block.children[0].child(names::ASSIGN_STMT).expect("assignment");
        let target = assign.child(names::VALUE_REF).expect("target ref");
        assert_eq!(target.child_token(names::IDENT), Some("a"));
        assert_eq!(target.children_named(names::MEMBER_REF).count(), 2);
        assert_eq!(target.children_named(names::ELEMENT_REF).count(), 1);
        assert!(target.child(names::QUERY).is_some());
    }

    #[test]
    fn row_ref_brace_is_not_confused_with_block() {
        let slab = parse_ok("function f (n: Int) -> Int { loop n < 3 { n = n + 1 }\nreturn n }");
        let func = slab.child(names::FUNCTION_DECL).expect("fn");
        let block = func.child(names::BLOCK).expect("block");
        assert_eq!(block.children.len(), 2, "loop and return");
    }

    #[test]
    fn numeric_literal_suffixes() {
        let slab = parse_ok("function f () { stacked a: Long = 5l\nstacked b: Double = -2.5d }");
        let func = slab.child(names::FUNCTION_DECL).expect("fn");
        let block = func.child(names::BLOCK).expect("block");
        let first = block.children[0].child(names::STACKED_DECL).expect("decl");
        let expr = first.child(names::EXPR).expect("initializer");
        let singleton = expr.child(names::SINGLETON_EXPR).expect("singleton");
        assert!(singleton.child(names::LONG_LIT).is_some());
        let second = block.children[1].child(names::STACKED_DECL).expect("decl");
        let lit = second
            .child(names::EXPR)
            .and_then(|e| e.child(names::SINGLETON_EXPR))
            .and_then(|s| s.child(names::DOUBLE_LIT))
            .expect("double literal");
        assert_eq!(lit.token, "-2.5");
    }

    #[test]
    fn unknown_character_is_a_syntax_error() {
        let err = parse("function f () { stacked a: Int = ^3 }").unwrap_err();
        assert_eq!(err.kind, Kind::SyntaxError);
    }
}

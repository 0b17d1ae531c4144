//! The semantic elaboration pass.
//!
//! Runs after every slab has been shallowly created. Resolves every
//! name, types every expression and checks every statement, producing
//! the fully typed model the lowerer consumes. Order matters: all types
//! across the bundle first, then contexts and dumps, then functions, so
//! that cross-slab references always find an elaborated target. A call
//! site additionally forces its callee's signature before checking
//! itself.
//!
//! Errors are collected, not thrown: a bad statement is skipped and its
//! block continues, which maximizes distinct diagnostics per run; the
//! pass fails at its boundary if anything was recorded.

use std::str::FromStr;

use indexmap::IndexMap;

use crate::diag::{Diagnostic, Diagnostics, ElaborateError, Kind};
use crate::model::{
    Assignment, BinOp, BinaryExpr, Block, Bundle, CallExpr, CollectionMember, CondBlock, Conditional, ContextId,
    Expression, ExprKind, FuncId, Function, FunctionState, HeapedDecl, Label, Loop, OperandClass, Primitive,
    ProcedureCall, RefSegment, ReturnStmt, SegmentKind, SlabId, StackedDecl, Statement, TableCrunch, TableDelete,
    TableField, TableInsert, TableMeasure, TableType, Type, TypeId, Unheap, ValueExpr, ValueRef, VariableClass,
    Variable, VarId, VectorSet, VectorType, AddressType,
};
use crate::tree::{names, Node};

/// Elaborates the whole bundle in place.
pub fn elaborate_bundle(bundle: &mut Bundle) -> Result<(), ElaborateError> {
    let mut e = Elaborator {
        bundle,
        diags: Diagnostics::new(),
        current_slab: SlabId::from_index(0),
        current_func: None,
        scopes: Vec::new(),
    };
    e.run();
    if e.diags.is_empty() {
        Ok(())
    } else {
        Err(ElaborateError {
            diagnostics: e.diags.into_vec(),
        })
    }
}

struct Elaborator<'b> {
    bundle: &'b mut Bundle,
    diags: Diagnostics,
    current_slab: SlabId,
    current_func: Option<FuncId>,
    /// Block-chain scopes of the function body under elaboration,
    /// innermost last. Each frame holds the variables declared so far in
    /// that block, so later declarations are invisible to earlier
    /// statements.
    scopes: Vec<IndexMap<String, VarId>>,
}

impl Elaborator<'_> {
    fn run(&mut self) {
        let slab_count = self.bundle.slabs.len();
        for slab in 0..slab_count {
            let slab = SlabId::from_index(slab);
            self.current_slab = slab;
            let type_ids: Vec<TypeId> = self.bundle.slab(slab).types.values().copied().collect();
            for id in type_ids {
                self.elaborate_type(id);
            }
        }
        for slab in 0..slab_count {
            let slab = SlabId::from_index(slab);
            self.current_slab = slab;
            let contexts: Vec<ContextId> = self.bundle.slab(slab).contexts.values().copied().collect();
            for id in contexts {
                self.elaborate_context(id);
            }
            let dumps: Vec<_> = self.bundle.slab(slab).dumps.values().copied().collect();
            for id in dumps {
                self.elaborate_dump(id);
            }
        }
        for slab in 0..slab_count {
            let slab = SlabId::from_index(slab);
            let funcs: Vec<FuncId> = self.bundle.slab(slab).functions.values().copied().collect();
            for id in funcs {
                self.elaborate_function(id);
            }
        }
    }

    // ---- types ----------------------------------------------------------

    fn elaborate_type(&mut self, id: TypeId) {
        match self.bundle.types.get(id) {
            Type::Collection(c) if !c.elaborated => {
                let node = c.node.clone();
                let host = c.host;
                if let Type::Collection(c) = self.bundle.types.get_mut(id) {
                    c.elaborated = true;
                }
                // Count expressions inside member types resolve against
                // the declaring slab, not whichever slab triggered the
                // elaboration.
                let saved_slab = self.current_slab;
                self.current_slab = host;
                let mut members = IndexMap::new();
                for (index, member) in node.children_named(names::MEMBER).enumerate() {
                    let name = member.child_token(names::NAME).unwrap_or_default().to_string();
                    let ty = member
                        .child(names::TYPE_REF)
                        .ok_or_else(|| syntax_hole(member))
                        .and_then(|t| self.get_or_create_type(t, host));
                    let ty = match ty {
                        Ok(ty) => ty,
                        Err(d) => {
                            self.diags.push(d);
                            TypeId::NONE
                        }
                    };
                    members.insert(name, CollectionMember { ty, index });
                }
                if let Type::Collection(c) = self.bundle.types.get_mut(id) {
                    c.members = members;
                }
                self.current_slab = saved_slab;
            }
            Type::Alias(a) if a.target.is_none() => {
                if a.resolving {
                    let d = Diagnostic::new(
                        Kind::TypeNotFound,
                        a.node.line,
                        a.node.col,
                        format!("alias cycle involving `{}`", a.name),
                    );
                    self.diags.push(d);
                    return;
                }
                let node = a.node.clone();
                let host = a.host;
                if let Type::Alias(a) = self.bundle.types.get_mut(id) {
                    a.resolving = true;
                }
                let saved_slab = self.current_slab;
                self.current_slab = host;
                let target = node
                    .child(names::TYPE_REF)
                    .ok_or_else(|| syntax_hole(&node))
                    .and_then(|t| self.get_or_create_type(t, host));
                self.current_slab = saved_slab;
                let target = match target {
                    Ok(t) => t,
                    Err(d) => {
                        self.diags.push(d);
                        TypeId::NONE
                    }
                };
                if let Type::Alias(a) = self.bundle.types.get_mut(id) {
                    a.target = Some(target);
                    a.resolving = false;
                }
            }
            _ => {}
        }
    }

    /// Resolves a `type_ref` node to a type id, constructing composite
    /// types as needed. `host` is the slab whose attachment table
    /// qualifies named references.
    fn get_or_create_type(&mut self, node: &Node, host: SlabId) -> Result<TypeId, Diagnostic> {
        let inner = node.children.first().ok_or_else(|| syntax_hole(node))?;
        match inner.name {
            names::PRIMITIVE_TYPE => {
                let primitive = Primitive::from_str(&inner.token).map_err(|_| syntax_hole(inner))?;
                Ok(self.bundle.types.primitive(primitive))
            }
            names::NAMED_TYPE => {
                let type_slab = match inner.child_token(names::SLAB_NAME) {
                    Some(slab_name) => {
                        *self.bundle.slab(host).attachments.get(slab_name).ok_or_else(|| {
                            Diagnostic::new(
                                Kind::SlabNotAttached,
                                inner.line,
                                inner.col,
                                format!(
                                    "referenced slab `{slab_name}`; host slab {}",
                                    self.bundle.slab(host).id
                                ),
                            )
                        })?
                    }
                    None => host,
                };
                let name = inner.child_token(names::TYPE_NAME).unwrap_or_default();
                let id = self.bundle.slab(type_slab).types.get(name).copied().ok_or_else(|| {
                    Diagnostic::new(
                        Kind::TypeNotFound,
                        inner.line,
                        inner.col,
                        format!("type `{name}` in slab {}", self.bundle.slab(type_slab).id),
                    )
                })?;
                // Aliases resolve eagerly so every later class query can
                // chase a complete chain.
                if matches!(self.bundle.types.get(id), Type::Alias(_)) {
                    self.elaborate_type(id);
                }
                Ok(id)
            }
            names::ADDRESS_TYPE => {
                let pointee = inner.child(names::TYPE_REF).ok_or_else(|| syntax_hole(inner))?;
                let points_to = self.get_or_create_type(pointee, host)?;
                Ok(self.bundle.types.alloc(Type::Address(AddressType { points_to })))
            }
            names::VECTOR_TYPE => {
                let elem_node = inner.child(names::TYPE_REF).ok_or_else(|| syntax_hole(inner))?;
                let elem = self.get_or_create_type(elem_node, host)?;
                let num_elem = match inner.child(names::EXPR) {
                    Some(count) => Some(self.elaborate_expr(count)?),
                    None => None,
                };
                Ok(self.bundle.types.alloc(Type::Vector(VectorType { elem, num_elem })))
            }
            names::TABLE_TYPE => {
                let mut fields = vec![
                    TableField {
                        name: "id".to_string(),
                        ty: TypeId::INT,
                    },
                    TableField {
                        name: "use".to_string(),
                        ty: TypeId::INT,
                    },
                ];
                for field in inner.children_named(names::TABLE_FIELD) {
                    let name = field.child_token(names::NAME).unwrap_or_default().to_string();
                    let ty_node = field.child(names::TYPE_REF).ok_or_else(|| syntax_hole(field))?;
                    let ty = self.get_or_create_type(ty_node, host)?;
                    fields.push(TableField { name, ty });
                }
                let rows_node = inner.child(names::EXPR).ok_or_else(|| syntax_hole(inner))?;
                let num_rows = self.elaborate_expr(rows_node)?;
                Ok(self.bundle.types.alloc(Type::Table(TableType { fields, num_rows })))
            }
            _ => Err(syntax_hole(node)),
        }
    }

    // ---- contexts and dumps ---------------------------------------------

    fn elaborate_context(&mut self, id: ContextId) {
        let node = self.bundle.context(id).node.clone();
        let host = self.bundle.context(id).host;
        for member in node.children_named(names::MEMBER) {
            let Some((name, var)) = self.elaborate_group_member(member, host, |init| VariableClass::Context {
                context: id,
                init,
            }) else {
                continue;
            };
            self.bundle.context_mut(id).members.insert(name, var);
        }
    }

    fn elaborate_dump(&mut self, id: crate::model::DumpId) {
        let node = self.bundle.dump(id).node.clone();
        let host = self.bundle.dump(id).host;
        for member in node.children_named(names::MEMBER) {
            let Some((name, var)) =
                self.elaborate_group_member(member, host, |init| VariableClass::Dump { dump: id, init })
            else {
                continue;
            };
            self.bundle.dump_mut(id).members.insert(name, var);
        }
    }

    fn elaborate_group_member(
        &mut self,
        member: &Node,
        host: SlabId,
        class: impl FnOnce(Option<Expression>) -> VariableClass,
    ) -> Option<(String, VarId)> {
        let name = member.child_token(names::NAME).unwrap_or_default().to_string();
        let ty = member
            .child(names::TYPE_REF)
            .ok_or_else(|| syntax_hole(member))
            .and_then(|t| self.get_or_create_type(t, host));
        let ty = match ty {
            Ok(ty) => ty,
            Err(d) => {
                self.diags.push(d);
                return None;
            }
        };
        let init = match member.child(names::EXPR) {
            Some(expr) => match self.elaborate_expr(expr) {
                Ok(expr) => Some(expr),
                Err(d) => {
                    self.diags.push(d);
                    None
                }
            },
            None => None,
        };
        let var = self.bundle.add_variable(Variable {
            name: name.clone(),
            ty,
            class: class(init),
        });
        Some((name, var))
    }

    // ---- functions ------------------------------------------------------

    fn elaborate_function(&mut self, id: FuncId) {
        if self.bundle.function(id).state() != FunctionState::Created {
            return;
        }
        match self.bundle.function(id) {
            Function::Local(f) => {
                let node = f.node.clone();
                let host = f.host;
                self.elaborate_local_function(id, &node, host);
            }
            Function::External(f) => {
                let node = f.node.clone();
                let host = f.host;
                self.elaborate_external_function(id, &node, host);
            }
        }
    }

    fn elaborate_local_function(&mut self, id: FuncId, node: &Node, host: SlabId) {
        let mut captures = Vec::new();
        if let Some(capture_list) = node.child(names::CAPTURES) {
            for group in capture_list.children_named(names::GROUP_REF) {
                match self.resolve_context_ref(group, host, None) {
                    Ok(ctx) => captures.push(ctx),
                    Err(d) => self.diags.push(d),
                }
            }
        }
        let return_type = match node.child(names::TYPE_REF) {
            Some(ty_node) => match self.get_or_create_type(ty_node, host) {
                Ok(ty) => ty,
                Err(d) => {
                    self.diags.push(d);
                    TypeId::NONE
                }
            },
            None => TypeId::NONE,
        };
        let mut args = Vec::new();
        for param in node.children_named(names::PARAM) {
            let name = param.child_token(names::NAME).unwrap_or_default().to_string();
            let ty = param
                .child(names::TYPE_REF)
                .ok_or_else(|| syntax_hole(param))
                .and_then(|t| self.get_or_create_type(t, host));
            let ty = match ty {
                Ok(ty) => ty,
                Err(d) => {
                    self.diags.push(d);
                    TypeId::NONE
                }
            };
            args.push(self.bundle.add_variable(Variable {
                name,
                ty,
                class: VariableClass::Stacked,
            }));
        }
        if let Function::Local(f) = self.bundle.function_mut(id) {
            f.captures = captures;
            f.return_type = return_type;
            f.args = args;
            f.state = FunctionState::Signature;
        }

        // Body elaboration happens with this function as the ambient
        // scope; the save/restore keeps callee elaboration forced from
        // call sites from clobbering it.
        let saved_slab = self.current_slab;
        let saved_func = self.current_func;
        let saved_scopes = std::mem::take(&mut self.scopes);
        self.current_slab = host;
        self.current_func = Some(id);
        let body = node.child(names::BLOCK).map(|b| self.elaborate_block(b));
        self.current_slab = saved_slab;
        self.current_func = saved_func;
        self.scopes = saved_scopes;

        if let Function::Local(f) = self.bundle.function_mut(id) {
            f.body = body;
            f.state = FunctionState::Complete;
        }
    }

    fn elaborate_external_function(&mut self, id: FuncId, node: &Node, host: SlabId) {
        let return_type = match node.child(names::TYPE_REF) {
            Some(ty_node) => match self.get_or_create_type(ty_node, host) {
                Ok(ty) => ty,
                Err(d) => {
                    self.diags.push(d);
                    TypeId::NONE
                }
            },
            None => TypeId::NONE,
        };
        let arg_nodes: Vec<Node> = node
            .children_named(names::PARAM)
            .filter_map(|p| p.child(names::TYPE_REF).cloned())
            .collect();
        let mut args = Vec::new();
        for ty_node in &arg_nodes {
            match self.get_or_create_type(ty_node, host) {
                Ok(ty) => args.push(ty),
                Err(d) => self.diags.push(d),
            }
        }
        if let Function::External(f) = self.bundle.function_mut(id) {
            f.return_type = return_type;
            f.args = args;
            f.state = FunctionState::Complete;
        }
    }

    /// Forces a callee's signature to exist before a call site checks
    /// arity and argument types against it.
    fn ensure_signature(&mut self, id: FuncId) {
        if self.bundle.function(id).state() == FunctionState::Created {
            let saved_slab = self.current_slab;
            let saved_func = self.current_func;
            let saved_scopes = std::mem::take(&mut self.scopes);
            self.current_slab = self.bundle.function(id).host();
            self.current_func = None;
            self.elaborate_function(id);
            self.current_slab = saved_slab;
            self.current_func = saved_func;
            self.scopes = saved_scopes;
        }
    }

    // ---- blocks and statements ------------------------------------------

    fn elaborate_block(&mut self, node: &Node) -> Block {
        self.scopes.push(IndexMap::new());
        let mut statements = Vec::new();
        for stmt_node in node.children_named(names::STATEMENT) {
            let Some(inner) = stmt_node.children.first() else {
                continue;
            };
            match self.elaborate_statement(inner) {
                Ok(statement) => statements.push(statement),
                Err(d) => self.diags.push(d),
            }
        }
        let variables = self.scopes.pop().unwrap_or_default();
        Block { statements, variables }
    }

    fn elaborate_statement(&mut self, node: &Node) -> Result<Statement, Diagnostic> {
        match node.name {
            names::BLOCK => Ok(Statement::Block(self.elaborate_block(node))),
            names::RETURN_STMT => {
                let value = match node.child(names::EXPR) {
                    Some(expr) => Some(self.elaborate_expr(expr)?),
                    None => None,
                };
                Ok(Statement::Return(ReturnStmt { value }))
            }
            names::STACKED_DECL => {
                let (var, init) = self.elaborate_var_decl(node, VariableClass::Stacked)?;
                Ok(Statement::Stacked(StackedDecl { var, init }))
            }
            names::HEAPED_DECL => {
                let (var, init) = self.elaborate_var_decl(node, VariableClass::Heaped)?;
                Ok(Statement::Heaped(HeapedDecl { var, init }))
            }
            names::ASSIGN_STMT => {
                let target_node = node.child(names::VALUE_REF).ok_or_else(|| syntax_hole(node))?;
                let target = self.elaborate_value_ref(target_node)?;
                let value_node = node.child(names::EXPR).ok_or_else(|| syntax_hole(node))?;
                let value = self.elaborate_expr(value_node)?;
                if !self.bundle.types.types_match(target.ty, value.ty) {
                    return Err(self.type_mismatch(Kind::AssignmentTypeMismatch, target.ty, value.ty, node));
                }
                Ok(Statement::Assign(Assignment { target, value }))
            }
            names::CALL_STMT => {
                let (callee, args) = self.elaborate_call(node)?;
                Ok(Statement::Call(ProcedureCall { callee, args }))
            }
            names::IF_STMT => {
                let condition = self.elaborate_condition(node)?;
                let block_node = node.child(names::BLOCK).ok_or_else(|| syntax_hole(node))?;
                let block = self.elaborate_block(block_node);
                Ok(Statement::If(Conditional {
                    arm: CondBlock { condition, block },
                }))
            }
            names::BRANCH_STMT => {
                let mut twigs = Vec::new();
                for twig in node.children_named(names::TWIG) {
                    let condition = self.elaborate_condition(twig)?;
                    let block_node = twig.child(names::BLOCK).ok_or_else(|| syntax_hole(twig))?;
                    let block = self.elaborate_block(block_node);
                    twigs.push(CondBlock { condition, block });
                }
                let otherwise = match node.child(names::OTHERWISE) {
                    Some(other) => {
                        let block_node = other.child(names::BLOCK).ok_or_else(|| syntax_hole(other))?;
                        Some(self.elaborate_block(block_node))
                    }
                    None => None,
                };
                Ok(Statement::Branch(crate::model::Branch { twigs, otherwise }))
            }
            names::LOOP_STMT => {
                let condition = self.elaborate_condition(node)?;
                let block_node = node.child(names::BLOCK).ok_or_else(|| syntax_hole(node))?;
                let body = self.elaborate_block(block_node);
                Ok(Statement::Loop(Loop { condition, body }))
            }
            names::VECTOR_SET_STMT => {
                let target_node = node.child(names::VALUE_REF).ok_or_else(|| syntax_hole(node))?;
                let target = self.elaborate_value_ref(target_node)?;
                let Some(vector) = self.bundle.types.as_vector(target.ty) else {
                    return Err(Diagnostic::new(Kind::VectorRefNotVector, node.line, node.col, ""));
                };
                let elem_ty = vector.elem;
                let from_node = node
                    .child(names::FROM_INDEX)
                    .and_then(|f| f.child(names::EXPR))
                    .ok_or_else(|| syntax_hole(node))?;
                let from = self.elaborate_expr(from_node)?;
                if !self.bundle.types.types_match(from.ty, TypeId::INT) {
                    return Err(Diagnostic::new(Kind::IndexNotInteger, from.line, from.col, ""));
                }
                let mut elements = Vec::new();
                for expr_node in node.children_named(names::EXPR) {
                    let element = self.elaborate_expr(expr_node)?;
                    if !self.bundle.types.types_match(element.ty, elem_ty) {
                        return Err(self.type_mismatch(Kind::AssignmentTypeMismatch, elem_ty, element.ty, expr_node));
                    }
                    elements.push(element);
                }
                Ok(Statement::VectorSet(VectorSet { target, from, elements }))
            }
            names::TABLE_INSERT_STMT => {
                let table_node = node.child(names::VALUE_REF).ok_or_else(|| syntax_hole(node))?;
                let table = self.elaborate_value_ref(table_node)?;
                let field_tys: Vec<TypeId> = match self.bundle.types.as_table(table.ty) {
                    Some(t) => t.fields[2..].iter().map(|f| f.ty).collect(),
                    None => return Err(Diagnostic::new(Kind::TableRefNotTable, node.line, node.col, "")),
                };
                let cell_nodes: Vec<&Node> = node.children_named(names::CELL).collect();
                if cell_nodes.len() != field_tys.len() {
                    return Err(Diagnostic::new(
                        Kind::FieldNotFound,
                        node.line,
                        node.col,
                        format!("insert provides {} values for {} fields", cell_nodes.len(), field_tys.len()),
                    ));
                }
                let mut cells = Vec::new();
                for (cell_node, field_ty) in cell_nodes.iter().zip(&field_tys) {
                    if cell_node.child(names::NULL_CELL).is_some() {
                        cells.push(None);
                        continue;
                    }
                    let expr_node = cell_node.child(names::EXPR).ok_or_else(|| syntax_hole(cell_node))?;
                    let expr = self.elaborate_expr(expr_node)?;
                    if expr.ty != TypeId::NONE && !self.bundle.types.types_match(expr.ty, *field_ty) {
                        return Err(self.type_mismatch(Kind::AssignmentTypeMismatch, *field_ty, expr.ty, expr_node));
                    }
                    cells.push(Some(expr));
                }
                let id_out = match node.child(names::ID_REF) {
                    Some(id_node) => {
                        let ref_node = id_node.child(names::VALUE_REF).ok_or_else(|| syntax_hole(id_node))?;
                        let id_ref = self.elaborate_value_ref(ref_node)?;
                        if !self.bundle.types.types_match(id_ref.ty, TypeId::INT) {
                            return Err(Diagnostic::new(Kind::IdRefNotInt, id_node.line, id_node.col, ""));
                        }
                        Some(id_ref)
                    }
                    None => None,
                };
                Ok(Statement::TableInsert(TableInsert { table, cells, id_out }))
            }
            names::TABLE_DELETE_STMT => {
                let table_node = node.child(names::VALUE_REF).ok_or_else(|| syntax_hole(node))?;
                let table = self.elaborate_value_ref(table_node)?;
                if self.bundle.types.as_table(table.ty).is_none() {
                    return Err(Diagnostic::new(Kind::TableRefNotTable, node.line, node.col, ""));
                }
                let id_node = node.child(names::EXPR).ok_or_else(|| syntax_hole(node))?;
                let id = self.elaborate_expr(id_node)?;
                if !self.bundle.types.types_match(id.ty, TypeId::INT) {
                    return Err(Diagnostic::new(Kind::IdNotInt, id.line, id.col, ""));
                }
                Ok(Statement::TableDelete(TableDelete { table, id }))
            }
            names::TABLE_MEASURE_STMT => {
                let mut refs = node.children_named(names::VALUE_REF);
                let table_node = refs.next().ok_or_else(|| syntax_hole(node))?;
                let out_node = refs.next().ok_or_else(|| syntax_hole(node))?;
                let table = self.elaborate_value_ref(table_node)?;
                if self.bundle.types.as_table(table.ty).is_none() {
                    return Err(Diagnostic::new(Kind::TableRefNotTable, table_node.line, table_node.col, ""));
                }
                let out = self.elaborate_value_ref(out_node)?;
                if !self.bundle.types.types_match(out.ty, TypeId::INT) {
                    return Err(Diagnostic::new(Kind::MeasureNotInteger, out_node.line, out_node.col, ""));
                }
                Ok(Statement::TableMeasure(TableMeasure { table, out }))
            }
            names::TABLE_CRUNCH_STMT => {
                let mut refs = node.children_named(names::VALUE_REF);
                let table_node = refs.next().ok_or_else(|| syntax_hole(node))?;
                let table = self.elaborate_value_ref(table_node)?;
                if self.bundle.types.as_table(table.ty).is_none() {
                    return Err(Diagnostic::new(Kind::TableRefNotTable, table_node.line, table_node.col, ""));
                }
                let top_out = match refs.next() {
                    Some(out_node) => {
                        let out = self.elaborate_value_ref(out_node)?;
                        if !self.bundle.types.types_match(out.ty, TypeId::INT) {
                            return Err(Diagnostic::new(Kind::IdRefNotInt, out_node.line, out_node.col, ""));
                        }
                        Some(out)
                    }
                    None => None,
                };
                Ok(Statement::TableCrunch(TableCrunch { table, top_out }))
            }
            names::LABEL_STMT => {
                let target_node = node.child(names::VALUE_REF).ok_or_else(|| syntax_hole(node))?;
                let target = self.elaborate_value_ref(target_node)?;
                let is_fuzzy = self
                    .bundle
                    .types
                    .as_vector(target.ty)
                    .is_some_and(|v| v.num_elem.is_none());
                if !is_fuzzy {
                    return Err(Diagnostic::new(
                        Kind::VectorRefNotVector,
                        target_node.line,
                        target_node.col,
                        "label target must be a fuzzy vector",
                    ));
                }
                let address_node = node.child(names::EXPR).ok_or_else(|| syntax_hole(node))?;
                let address = self.elaborate_expr(address_node)?;
                Ok(Statement::Label(Label { target, address }))
            }
            names::UNHEAP_STMT => {
                let address_node = node.child(names::EXPR).ok_or_else(|| syntax_hole(node))?;
                let address = self.elaborate_expr(address_node)?;
                let Some(addr_ty) = self.bundle.types.as_address(address.ty) else {
                    return Err(Diagnostic::new(Kind::UnheapExpressionNotAddress, node.line, node.col, ""));
                };
                let pointee = addr_ty.points_to;
                let structure = match node.child(names::TYPE_REF) {
                    Some(ty_node) => self.get_or_create_type(ty_node, self.current_slab)?,
                    None => pointee,
                };
                Ok(Statement::Unheap(Unheap { address, structure }))
            }
            _ => Err(Diagnostic::new(
                Kind::ExpressionNotRecognised,
                node.line,
                node.col,
                format!("unrecognised statement `{}`", node.name),
            )),
        }
    }

    fn elaborate_var_decl(
        &mut self,
        node: &Node,
        class: VariableClass,
    ) -> Result<(VarId, Option<Expression>), Diagnostic> {
        let name = node.child_token(names::NAME).unwrap_or_default().to_string();
        let ty_node = node.child(names::TYPE_REF).ok_or_else(|| syntax_hole(node))?;
        let ty = self.get_or_create_type(ty_node, self.current_slab)?;
        let var = self.bundle.add_variable(Variable {
            name: name.clone(),
            ty,
            class,
        });
        // Visible to subsequent statements of this block and its
        // children, but not to anything already elaborated.
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, var);
        }
        let init = match node.child(names::EXPR) {
            Some(expr_node) => {
                let init = self.elaborate_expr(expr_node)?;
                if !self.bundle.types.types_match(ty, init.ty) {
                    return Err(self.type_mismatch(Kind::AssignmentTypeMismatch, ty, init.ty, node));
                }
                Some(init)
            }
            None => None,
        };
        Ok((var, init))
    }

    fn elaborate_condition(&mut self, node: &Node) -> Result<Expression, Diagnostic> {
        let expr_node = node.child(names::EXPR).ok_or_else(|| syntax_hole(node))?;
        let condition = self.elaborate_expr(expr_node)?;
        if !self.bundle.types.types_match(condition.ty, TypeId::TRUTH) {
            return Err(Diagnostic::new(Kind::ConditionNotTruth, expr_node.line, expr_node.col, ""));
        }
        Ok(condition)
    }

    // ---- expressions ----------------------------------------------------

    fn elaborate_expr(&mut self, node: &Node) -> Result<Expression, Diagnostic> {
        if let Some(singleton) = node.child(names::SINGLETON_EXPR) {
            return self.elaborate_singleton(singleton);
        }
        if let Some(binary) = node.child(names::BINARY_EXPR) {
            return self.elaborate_binary(binary);
        }
        Err(Diagnostic::new(Kind::ExpressionNotRecognised, node.line, node.col, ""))
    }

    fn elaborate_binary(&mut self, node: &Node) -> Result<Expression, Diagnostic> {
        let lhs_node = node.child(names::SINGLETON_EXPR).ok_or_else(|| syntax_hole(node))?;
        let lhs = self.elaborate_singleton(lhs_node)?;
        let op_token = node.child_token(names::OPERATOR).unwrap_or_default();
        let op = bin_op_from_symbol(op_token).ok_or_else(|| syntax_hole(node))?;
        let rhs_node = node.child(names::EXPR).ok_or_else(|| syntax_hole(node))?;
        let rhs = self.elaborate_expr(rhs_node)?;
        self.build_binary(lhs, op, rhs, node.line, node.col)
    }

    /// Combines two typed operands under `op`, reassociating along the
    /// right spine so that operator precedence (and left associativity
    /// among equals) holds structurally. The parser hands the elaborator
    /// a fully right-leaning chain; this normalizes it as it is built.
    fn build_binary(
        &mut self,
        lhs: Expression,
        op: BinOp,
        rhs: Expression,
        line: u32,
        col: u32,
    ) -> Result<Expression, Diagnostic> {
        let Expression {
            kind,
            ty,
            line: rline,
            col: rcol,
        } = rhs;
        match kind {
            ExprKind::Binary(r) if op.precedence() >= r.op.precedence() => {
                let left = self.build_binary(lhs, op, *r.lhs, line, col)?;
                self.build_binary(left, r.op, *r.rhs, line, col)
            }
            kind => {
                let rhs = Expression {
                    kind,
                    ty,
                    line: rline,
                    col: rcol,
                };
                self.finish_binary(lhs, op, rhs, line, col)
            }
        }
    }

    fn finish_binary(
        &mut self,
        lhs: Expression,
        op: BinOp,
        rhs: Expression,
        line: u32,
        col: u32,
    ) -> Result<Expression, Diagnostic> {
        if !self.bundle.types.types_match(lhs.ty, rhs.ty) {
            return Err(self.type_mismatch_at(Kind::OperatorTypeMismatch, lhs.ty, rhs.ty, line, col));
        }
        let class = match self.bundle.types.as_primitive(lhs.ty) {
            Some(Primitive::Float | Primitive::Double) => OperandClass::Float,
            Some(Primitive::Char) => OperandClass::Char,
            Some(Primitive::None) | None => {
                return Err(self.type_mismatch_at(Kind::OperatorTypeMismatch, lhs.ty, rhs.ty, line, col));
            }
            Some(_) => OperandClass::Int,
        };
        let ty = if op.is_comparison() { TypeId::TRUTH } else { lhs.ty };
        Ok(Expression {
            kind: ExprKind::Binary(BinaryExpr {
                op,
                class,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            }),
            ty,
            line,
            col,
        })
    }

    fn elaborate_singleton(&mut self, node: &Node) -> Result<Expression, Diagnostic> {
        let inner = node.children.first().ok_or_else(|| syntax_hole(node))?;
        let (line, col) = (inner.line, inner.col);
        let make = |kind, ty| Expression { kind, ty, line, col };
        match inner.name {
            names::NULL_LIT => Ok(make(ExprKind::Null, TypeId::NONE)),
            names::INT_LIT => {
                let value = inner.token.parse::<i32>().map_err(|_| literal_range(inner))?;
                Ok(make(ExprKind::Int(value), TypeId::INT))
            }
            names::SHORT_LIT => {
                let value = inner.token.parse::<i16>().map_err(|_| literal_range(inner))?;
                Ok(make(ExprKind::Short(value), TypeId::SHORT))
            }
            names::LONG_LIT => {
                let value = inner.token.parse::<i64>().map_err(|_| literal_range(inner))?;
                Ok(make(ExprKind::Long(value), TypeId::LONG))
            }
            names::SIZE_LIT => {
                let value = inner.token.parse::<i64>().map_err(|_| literal_range(inner))?;
                let wrapped = u64::from_ne_bytes(value.to_ne_bytes());
                Ok(make(ExprKind::Size(wrapped), TypeId::SIZE))
            }
            names::FLOAT_LIT => {
                let value = inner.token.parse::<f32>().map_err(|_| literal_range(inner))?;
                Ok(make(ExprKind::Float(value), TypeId::FLOAT))
            }
            names::DOUBLE_LIT => {
                let value = inner.token.parse::<f64>().map_err(|_| literal_range(inner))?;
                Ok(make(ExprKind::Double(value), TypeId::DOUBLE))
            }
            names::CHAR_LIT => {
                let value = inner.token.bytes().next().unwrap_or(0);
                Ok(make(ExprKind::Char(value), TypeId::CHAR))
            }
            names::STRING_LIT => {
                let ty = self.bundle.types.alloc(Type::Address(AddressType {
                    points_to: TypeId::CHAR,
                }));
                Ok(make(ExprKind::Str(inner.token.clone()), ty))
            }
            names::TRUTH_LIT => Ok(make(ExprKind::Truth(inner.token == "true"), TypeId::TRUTH)),
            names::VALUE_EXPR => {
                let locate = inner.child(names::LOCATE).is_some();
                let ref_node = inner.child(names::VALUE_REF).ok_or_else(|| syntax_hole(inner))?;
                let target = self.elaborate_value_ref(ref_node)?;
                let mut ty = target.ty;
                if locate {
                    ty = self.bundle.types.alloc(Type::Address(AddressType { points_to: ty }));
                }
                Ok(make(ExprKind::Value(ValueExpr { locate, target }), ty))
            }
            names::CALL_EXPR => {
                let (callee, args) = self.elaborate_call(inner)?;
                let ty = self.bundle.function(callee).return_type();
                Ok(make(ExprKind::Call(CallExpr { callee, args }), ty))
            }
            names::PAREN_EXPR => {
                let expr_node = inner.child(names::EXPR).ok_or_else(|| syntax_hole(inner))?;
                let contents = self.elaborate_expr(expr_node)?;
                let ty = contents.ty;
                Ok(make(ExprKind::Paren(Box::new(contents)), ty))
            }
            _ => Err(Diagnostic::new(Kind::ExpressionNotRecognised, line, col, "")),
        }
    }

    /// Shared by call expressions and procedure-call statements: resolves
    /// the callee, forces its signature, checks arity and argument types.
    fn elaborate_call(&mut self, node: &Node) -> Result<(FuncId, Vec<Expression>), Diagnostic> {
        let func_ref = node.child(names::FUNCTION_REF).ok_or_else(|| syntax_hole(node))?;
        let func_slab = match func_ref.child_token(names::SLAB_NAME) {
            Some(slab_name) => *self
                .bundle
                .slab(self.current_slab)
                .attachments
                .get(slab_name)
                .ok_or_else(|| {
                    Diagnostic::new(
                        Kind::SlabNotAttached,
                        func_ref.line,
                        func_ref.col,
                        format!("referenced slab `{slab_name}`"),
                    )
                })?,
            None => self.current_slab,
        };
        let name = func_ref.child_token(names::FUNCTION_NAME).unwrap_or_default();
        let callee = self
            .bundle
            .slab(func_slab)
            .functions
            .get(name)
            .copied()
            .ok_or_else(|| {
                Diagnostic::new(
                    Kind::FunctionNotFound,
                    func_ref.line,
                    func_ref.col,
                    format!("function `{name}` in slab {}", self.bundle.slab(func_slab).id),
                )
            })?;
        self.ensure_signature(callee);

        let mut args = Vec::new();
        for expr_node in node.children_named(names::EXPR) {
            args.push(self.elaborate_expr(expr_node)?);
        }
        let formals: Vec<TypeId> = match self.bundle.function(callee) {
            Function::Local(f) => f.args.iter().map(|a| self.bundle.variable(*a).ty).collect(),
            Function::External(f) => f.args.clone(),
        };
        if formals.len() != args.len() {
            return Err(Diagnostic::new(
                Kind::CallArityMismatch,
                node.line,
                node.col,
                format!("`{name}` expects {} argument(s), got {}", formals.len(), args.len()),
            ));
        }
        for (arg, formal) in args.iter().zip(&formals) {
            // A literal null is admitted against any formal type.
            if arg.ty != TypeId::NONE && !self.bundle.types.types_match(arg.ty, *formal) {
                return Err(self.type_mismatch_at(Kind::ArgTypeMismatch, *formal, arg.ty, arg.line, arg.col));
            }
        }
        Ok((callee, args))
    }

    // ---- value references -----------------------------------------------

    fn elaborate_value_ref(&mut self, node: &Node) -> Result<ValueRef, Diagnostic> {
        let head_name = node.child_token(names::IDENT).unwrap_or_default().to_string();
        let mut segment_nodes: Vec<&Node> = node
            .children
            .iter()
            .filter(|c| matches!(c.name, names::MEMBER_REF | names::ELEMENT_REF | names::ROW_REF))
            .collect();
        let query = node.child(names::QUERY).is_some();

        let head = self.resolve_head(&head_name, &mut segment_nodes, node)?;
        let head_ty = self.bundle.variable(head).ty;

        let mut segments: Vec<RefSegment> = Vec::new();
        let mut current_ty = head_ty;
        for seg in segment_nodes {
            let segment = self.elaborate_segment(seg, current_ty)?;
            current_ty = segment.ty;
            segments.push(segment);
        }

        let mut final_ty = current_ty;
        if query {
            match self.bundle.types.as_address(final_ty) {
                Some(addr) => final_ty = addr.points_to,
                None => {
                    return Err(Diagnostic::new(Kind::QueryNotAddress, node.line, node.col, ""));
                }
            }
        }
        Ok(ValueRef {
            head,
            slab: self.current_slab,
            head_ty,
            segments,
            query,
            ty: final_ty,
        })
    }

    /// Resolves a reference head. The first identifier is tried as, in
    /// order: a variable in the block chain or argument list, a context
    /// name, a dump name, an attachment alias qualifying a context or
    /// dump in the attached slab. Context members demand capture.
    fn resolve_head(
        &mut self,
        name: &str,
        segment_nodes: &mut Vec<&Node>,
        node: &Node,
    ) -> Result<VarId, Diagnostic> {
        for scope in self.scopes.iter().rev() {
            if let Some(var) = scope.get(name) {
                return Ok(*var);
            }
        }
        if let Some(func) = self.current_func {
            if let Function::Local(f) = self.bundle.function(func) {
                for arg in &f.args {
                    if self.bundle.variable(*arg).name == name {
                        return Ok(*arg);
                    }
                }
            }
        }

        let slab = self.current_slab;
        if let Some(ctx) = self.bundle.slab(slab).contexts.get(name).copied() {
            self.check_captured(ctx, node)?;
            return self.group_member(GroupKind::Context(ctx), segment_nodes, node);
        }
        if let Some(dump) = self.bundle.slab(slab).dumps.get(name).copied() {
            return self.group_member(GroupKind::Dump(dump), segment_nodes, node);
        }
        if let Some(attached) = self.bundle.slab(slab).attachments.get(name).copied() {
            let Some(first) = segment_nodes.first() else {
                return Err(Diagnostic::new(
                    Kind::ContextNotFound,
                    node.line,
                    node.col,
                    format!("attachment `{name}` must qualify a context or dump member"),
                ));
            };
            let group_name = first.child_token(names::NAME).unwrap_or_default().to_string();
            if let Some(ctx) = self.bundle.slab(attached).contexts.get(&group_name).copied() {
                segment_nodes.remove(0);
                self.check_captured(ctx, node)?;
                return self.group_member(GroupKind::Context(ctx), segment_nodes, node);
            }
            if let Some(dump) = self.bundle.slab(attached).dumps.get(&group_name).copied() {
                segment_nodes.remove(0);
                return self.group_member(GroupKind::Dump(dump), segment_nodes, node);
            }
            // Contexts are searched first, dumps last; a miss on both is
            // reported against the last group kind tried.
            return Err(Diagnostic::new(
                Kind::DumpNotFound,
                node.line,
                node.col,
                format!(
                    "no context or dump named `{group_name}` in slab {}",
                    self.bundle.slab(attached).id
                ),
            ));
        }
        Err(Diagnostic::new(
            Kind::VariableNotFound,
            node.line,
            node.col,
            format!("name `{name}`"),
        ))
    }

    fn check_captured(&self, ctx: ContextId, node: &Node) -> Result<(), Diagnostic> {
        let Some(func) = self.current_func else {
            return Ok(());
        };
        let Function::Local(f) = self.bundle.function(func) else {
            return Ok(());
        };
        if f.captures.contains(&ctx) {
            Ok(())
        } else {
            Err(Diagnostic::new(
                Kind::ContextNotCaptured,
                node.line,
                node.col,
                format!(
                    "context `{}`; function `{}`",
                    self.bundle.context(ctx).name,
                    f.name
                ),
            ))
        }
    }

    fn group_member(
        &mut self,
        group: GroupKind,
        segment_nodes: &mut Vec<&Node>,
        node: &Node,
    ) -> Result<VarId, Diagnostic> {
        let Some(first) = segment_nodes.first() else {
            return Err(Diagnostic::new(
                Kind::MemberNotFound,
                node.line,
                node.col,
                "a context or dump is referenced without naming a member",
            ));
        };
        if first.name != names::MEMBER_REF {
            return Err(Diagnostic::new(Kind::MemberNotFound, first.line, first.col, ""));
        }
        let member_name = first.child_token(names::NAME).unwrap_or_default();
        let members = match group {
            GroupKind::Context(ctx) => &self.bundle.context(ctx).members,
            GroupKind::Dump(dump) => &self.bundle.dump(dump).members,
        };
        let var = members.get(member_name).copied().ok_or_else(|| {
            Diagnostic::new(
                Kind::MemberNotFound,
                first.line,
                first.col,
                format!("member `{member_name}`"),
            )
        })?;
        segment_nodes.remove(0);
        Ok(var)
    }

    fn elaborate_segment(&mut self, node: &Node, parent_ty: TypeId) -> Result<RefSegment, Diagnostic> {
        match node.name {
            names::MEMBER_REF => {
                let member_name = node.child_token(names::NAME).unwrap_or_default().to_string();
                // The parent may be Addr[Addr[...Collection]]; the chain
                // strips during lowering as well.
                let mut collection_ty = parent_ty;
                while let Some(addr) = self.bundle.types.as_address(collection_ty) {
                    collection_ty = addr.points_to;
                }
                let Some(collection) = self.bundle.types.as_collection(collection_ty) else {
                    return Err(Diagnostic::new(Kind::MemberNotOfCollection, node.line, node.col, ""));
                };
                let member = collection.members.get(&member_name).ok_or_else(|| {
                    Diagnostic::new(
                        Kind::MemberNotFound,
                        node.line,
                        node.col,
                        format!("member `{member_name}` of `{}`", collection.name),
                    )
                })?;
                let (index, ty) = (member.index, member.ty);
                Ok(RefSegment {
                    kind: SegmentKind::Member { name: member_name, index },
                    ty,
                })
            }
            names::ELEMENT_REF => {
                let index_node = node.child(names::EXPR).ok_or_else(|| syntax_hole(node))?;
                let index = self.elaborate_expr(index_node)?;
                if !self.bundle.types.types_match(index.ty, TypeId::INT) {
                    return Err(Diagnostic::new(Kind::IndexNotInteger, index_node.line, index_node.col, ""));
                }
                let mut vector_ty = parent_ty;
                while let Some(addr) = self.bundle.types.as_address(vector_ty) {
                    vector_ty = addr.points_to;
                }
                let Some(vector) = self.bundle.types.as_vector(vector_ty) else {
                    return Err(Diagnostic::new(Kind::IndexNotOfVector, node.line, node.col, ""));
                };
                let ty = vector.elem;
                Ok(RefSegment {
                    kind: SegmentKind::Element { index },
                    ty,
                })
            }
            names::ROW_REF => {
                let Some(table) = self.bundle.types.as_table(parent_ty) else {
                    return Err(Diagnostic::new(Kind::TableRefNotTable, node.line, node.col, ""));
                };
                let field_name = node.child_token(names::NAME).unwrap_or_default().to_string();
                let Some(field_index) = table.field_index(&field_name) else {
                    return Err(Diagnostic::new(
                        Kind::FieldNotFound,
                        node.line,
                        node.col,
                        format!("field `{field_name}`"),
                    ));
                };
                let ty = table.fields[field_index].ty;
                let id_node = node.child(names::EXPR).ok_or_else(|| syntax_hole(node))?;
                let id = self.elaborate_expr(id_node)?;
                if !self.bundle.types.types_match(id.ty, TypeId::INT) {
                    return Err(Diagnostic::new(Kind::IdNotInt, id_node.line, id_node.col, ""));
                }
                Ok(RefSegment {
                    kind: SegmentKind::Row {
                        field: field_name,
                        field_index,
                        id,
                    },
                    ty,
                })
            }
            _ => Err(syntax_hole(node)),
        }
    }

    // ---- context references ---------------------------------------------

    /// Resolves a `group_ref` to a context. `check_against` carries the
    /// capturing function when the reference occurs inside a body; `None`
    /// while elaborating a capture list itself.
    fn resolve_context_ref(
        &mut self,
        node: &Node,
        host: SlabId,
        check_against: Option<FuncId>,
    ) -> Result<ContextId, Diagnostic> {
        let ctx_slab = match node.child_token(names::SLAB_NAME) {
            Some(slab_name) => *self.bundle.slab(host).attachments.get(slab_name).ok_or_else(|| {
                Diagnostic::new(
                    Kind::SlabNotAttached,
                    node.line,
                    node.col,
                    format!("referenced slab `{slab_name}`; host slab {}", self.bundle.slab(host).id),
                )
            })?,
            None => host,
        };
        let name = node.child_token(names::NAME).unwrap_or_default();
        let ctx = self.bundle.slab(ctx_slab).contexts.get(name).copied().ok_or_else(|| {
            Diagnostic::new(
                Kind::ContextNotFound,
                node.line,
                node.col,
                format!("context `{name}` in slab {}", self.bundle.slab(ctx_slab).id),
            )
        })?;
        if let Some(func) = check_against {
            if let Function::Local(f) = self.bundle.function(func) {
                if !f.captures.contains(&ctx) {
                    return Err(Diagnostic::new(
                        Kind::ContextNotCaptured,
                        node.line,
                        node.col,
                        format!("context `{name}`; function `{}`", f.name),
                    ));
                }
            }
        }
        Ok(ctx)
    }

    // ---- helpers --------------------------------------------------------

    fn type_mismatch(&self, kind: Kind, expected: TypeId, found: TypeId, node: &Node) -> Diagnostic {
        self.type_mismatch_at(kind, expected, found, node.line, node.col)
    }

    fn type_mismatch_at(&self, kind: Kind, expected: TypeId, found: TypeId, line: u32, col: u32) -> Diagnostic {
        Diagnostic::new(
            kind,
            line,
            col,
            format!(
                "expected `{}`, found `{}`",
                self.bundle.types.describe(expected),
                self.bundle.types.describe(found)
            ),
        )
    }
}

enum GroupKind {
    Context(ContextId),
    Dump(crate::model::DumpId),
}

fn bin_op_from_symbol(symbol: &str) -> Option<BinOp> {
    Some(match symbol {
        "-" => BinOp::Sub,
        "+" => BinOp::Add,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "<" => BinOp::Lt,
        ">" => BinOp::Gt,
        "<=" => BinOp::Le,
        ">=" => BinOp::Ge,
        "==" => BinOp::Eq,
        "!=" => BinOp::Ne,
        _ => return None,
    })
}

/// A tree shape the reader never produces; reaching this means the tree
/// was built by hand and is missing a piece.
fn syntax_hole(node: &Node) -> Diagnostic {
    Diagnostic::new(
        Kind::ExpressionNotRecognised,
        node.line,
        node.col,
        format!("malformed `{}` node", node.name),
    )
}

fn literal_range(node: &Node) -> Diagnostic {
    Diagnostic::new(
        Kind::ExpressionNotRecognised,
        node.line,
        node.col,
        format!("literal `{}` out of range", node.token),
    )
}

//! Lowering of local function bodies: statements, control flow,
//! expressions and value references.

use smallvec::smallvec;

use super::{CoreFn, FnCtx, Lowerer};
use crate::ir::{self, ArithOp, Builder, FloatPredicate, IntPredicate, Module, Ty, Value};
use crate::model::{
    BinOp, Block, Expression, ExprKind, FuncId, LocalFunction, OperandClass, SegmentKind, Statement, Type, ValueRef,
    VariableClass,
};

impl Lowerer<'_> {
    /// Lowers one local function into its registered IR shell.
    ///
    /// The entry block allocates every stack slot up front and saves the
    /// machine stack pointer; this single save is what return paths and
    /// loop back-edges restore against. Heaped handles declared inside
    /// loops must survive iteration, which is why their slots are also
    /// hoisted here.
    pub(crate) fn lower_function(&self, module: &mut Module, id: FuncId, f: &LocalFunction) {
        let symbol = self.fn_symbol(id);
        let func_index = module.function_index(symbol).expect("function was registered");
        let mut b = Builder::at(module, func_index, ir::BlockId(0));
        let entry = b.append_block("stack_alloc");
        b.set_insert_point(entry);

        let mut fx = FnCtx {
            stack_state: None,
            var_store: ahash::AHashMap::new(),
        };
        fx.stack_state = Some(b.stack_save());

        // Arguments land in stack slots. Composite values passed by
        // value get their owned storage deep-copied so callee and caller
        // never alias.
        for (index, arg) in f.args.iter().enumerate() {
            let var = self.bundle.variable(*arg);
            let ty = self.ty(var.ty);
            let incoming = b.func().arg(index);
            let store = match self.bundle.types.get(self.bundle.types.resolve(var.ty)) {
                Type::Vector(v) if v.num_elem.is_some() => self.copy_vector(&mut b, &mut fx, var.ty, incoming),
                Type::Collection(_) => {
                    let slot = b.alloca(&ty);
                    b.store(incoming, slot.clone());
                    self.copy_subvectors(&mut b, &mut fx, var.ty, slot.clone());
                    slot
                }
                Type::Table(_) => self.copy_table(&mut b, &mut fx, var.ty, incoming),
                _ => {
                    let slot = b.alloca(&ty);
                    b.store(incoming, slot.clone());
                    slot
                }
            };
            fx.var_store.insert(*arg, store);
        }

        let body = f.body.as_ref().expect("local function has a body");
        self.allocate_stack_variables(&mut b, &mut fx, body);
        self.allocate_heap_handles(&mut b, &mut fx, body);

        let main_entry = b.append_block("main_block_entry");
        b.br(main_entry);
        b.set_insert_point(main_entry);
        self.lower_block(&mut b, &mut fx, body);

        // Terminator-less fall-through returns zero of the return type.
        if !b.current_terminated() {
            let saved = fx.stack_state.clone().expect("stack marker saved at entry");
            b.stack_restore(saved);
            let ret_ty = self.ty(f.return_type);
            if ret_ty == Ty::Void {
                b.ret_void();
            } else {
                b.ret(Self::zero_value(&ret_ty));
            }
        }
    }

    pub(crate) fn lower_block(&self, b: &mut Builder<'_>, fx: &mut FnCtx, block: &Block) {
        for statement in &block.statements {
            match statement {
                Statement::Return(ret) => {
                    let value = ret.value.as_ref().map(|e| self.lower_expr(b, fx, e));
                    let saved = fx.stack_state.clone().expect("stack marker saved at entry");
                    b.stack_restore(saved);
                    match value {
                        Some(value) => b.ret(value),
                        None => b.ret_void(),
                    }
                }
                Statement::Stacked(decl) => {
                    let var = self.bundle.variable(decl.var);
                    let store = fx.var_store[&decl.var].clone();
                    if self.bundle.types.owns_dynamic_storage(var.ty) {
                        self.allocate_stack_payload(b, fx, var.ty, store.clone());
                    }
                    if let Some(init) = &decl.init {
                        let value = self.lower_expr(b, fx, init);
                        b.store(value, store);
                    }
                }
                Statement::Heaped(decl) => {
                    let var = self.bundle.variable(decl.var);
                    let handle = fx.var_store[&decl.var].clone();
                    let payload = self.allocate_heap_type(b, fx, var.ty);
                    b.store(payload, handle.clone());
                    if let Some(init) = &decl.init {
                        let value = self.lower_expr(b, fx, init);
                        let ptr = b.load(&self.ty(var.ty).ptr_to(), handle);
                        b.store(value, ptr);
                    }
                }
                Statement::Assign(assign) => {
                    let value = self.lower_expr(b, fx, &assign.value);
                    let store = self.lower_value_ref(b, fx, &assign.target);
                    self.lower_assignment_store(b, fx, &assign.target, value, store);
                }
                Statement::Call(call) => {
                    let args: Vec<Value> = call.args.iter().map(|a| self.lower_expr(b, fx, a)).collect();
                    self.call_fn(b, call.callee, args);
                }
                Statement::If(cond) => self.lower_conditional(b, fx, cond),
                Statement::Branch(branch) => self.lower_branch(b, fx, branch),
                Statement::Loop(lp) => self.lower_loop(b, fx, lp),
                Statement::VectorSet(set) => self.lower_vector_set(b, fx, set),
                Statement::TableInsert(insert) => self.lower_table_insert(b, fx, insert),
                Statement::TableDelete(delete) => self.lower_table_delete(b, fx, delete),
                Statement::TableMeasure(measure) => self.lower_table_measure(b, fx, measure),
                Statement::TableCrunch(crunch) => self.lower_table_crunch(b, fx, crunch),
                Statement::Label(label) => {
                    let address = self.lower_expr(b, fx, &label.address);
                    let store = self.lower_value_ref(b, fx, &label.target);
                    b.store(address, store);
                }
                Statement::Unheap(unheap) => {
                    let address = self.lower_expr(b, fx, &unheap.address);
                    self.dealloc_type(b, fx, unheap.structure, address, true);
                }
                Statement::Block(inner) => self.lower_block(b, fx, inner),
            }
        }
    }

    /// Assignment stores are type-directed: sized vectors copy element
    /// storage, everything else stores the value into the target slot.
    fn lower_assignment_store(&self, b: &mut Builder<'_>, fx: &mut FnCtx, target: &ValueRef, value: Value, store: Value) {
        match self.bundle.types.get(self.bundle.types.resolve(target.ty)) {
            Type::Vector(v) => {
                if let Some(num_elem) = &v.num_elem {
                    let vec_ty = self.ty(target.ty);
                    let elem_ty = self.ty(v.elem);
                    let count = self.lower_expr(b, fx, num_elem);
                    let array = b.load(&vec_ty, store);
                    let bytes = b.arith(
                        ArithOp::Mul,
                        count,
                        Value::const_i32(i64::try_from(elem_ty.alloc_size()).expect("element size fits i64")),
                    );
                    self.call_core(b, CoreFn::MemCpy, smallvec![array, value, bytes]);
                } else {
                    b.store(value, store);
                }
            }
            _ => b.store(value, store),
        }
    }

    // ---- control flow ---------------------------------------------------

    fn lower_conditional(&self, b: &mut Builder<'_>, fx: &mut FnCtx, cond: &crate::model::Conditional) {
        let eval = b.append_block("condition_evaluate");
        b.br(eval);
        b.set_insert_point(eval);
        let condition = self.lower_expr(b, fx, &cond.arm.condition);
        let eval_done = b.insert_block();
        let start = b.append_block("consequence_start");
        b.set_insert_point(start);
        self.lower_block(b, fx, &cond.arm.block);
        let body_done = b.insert_block();
        let end = b.append_block("consequence_end");
        if !b.current_terminated() {
            b.set_insert_point(body_done);
            b.br(end);
        }
        b.set_insert_point(eval_done);
        b.cond_br(condition, start, end);
        b.set_insert_point(end);
    }

    /// Twigs chain: each condition evaluates in the fall-through block of
    /// the previous twig; terminator-less twig exits branch to a common
    /// `branch_end`.
    fn lower_branch(&self, b: &mut Builder<'_>, fx: &mut FnCtx, branch: &crate::model::Branch) {
        let mut open_exits: Vec<ir::BlockId> = Vec::new();
        for (index, twig) in branch.twigs.iter().enumerate() {
            let condition = self.lower_expr(b, fx, &twig.condition);
            let cond_done = b.insert_block();
            let start = b.append_block(&format!("twig_{index}_start"));
            let next = b.append_block(&format!("twig_{index}_end"));
            b.set_insert_point(cond_done);
            b.cond_br(condition, start, next);
            b.set_insert_point(start);
            self.lower_block(b, fx, &twig.block);
            if !b.current_terminated() {
                open_exits.push(b.insert_block());
            }
            b.set_insert_point(next);
        }
        if let Some(otherwise) = &branch.otherwise {
            self.lower_block(b, fx, otherwise);
        }
        if !b.current_terminated() {
            open_exits.push(b.insert_block());
        }
        let end = b.append_block("branch_end");
        for exit in open_exits {
            b.set_insert_point(exit);
            b.br(end);
        }
        b.set_insert_point(end);
    }

    /// The per-iteration stack save/restore brackets the body so stacked
    /// variables declared inside the loop cannot grow the frame without
    /// bound.
    fn lower_loop(&self, b: &mut Builder<'_>, fx: &mut FnCtx, lp: &crate::model::Loop) {
        let cond = b.append_block("loop_condition");
        b.br(cond);
        b.set_insert_point(cond);
        let condition = self.lower_expr(b, fx, &lp.condition);
        let cond_done = b.insert_block();
        let start = b.append_block("loop_direction_start");
        b.set_insert_point(start);
        let saved = b.stack_save();
        self.lower_block(b, fx, &lp.body);
        if !b.current_terminated() {
            b.stack_restore(saved);
            b.br(cond);
        }
        let end = b.append_block("loop_end");
        b.set_insert_point(cond_done);
        b.cond_br(condition, start, end);
        b.set_insert_point(end);
    }

    fn lower_vector_set(&self, b: &mut Builder<'_>, fx: &mut FnCtx, set: &crate::model::VectorSet) {
        let store = self.lower_value_ref(b, fx, &set.target);
        let mut index = self.lower_expr(b, fx, &set.from);
        let vec_ty = self.ty(set.target.ty);
        let elem_ty_id = self
            .bundle
            .types
            .as_vector(set.target.ty)
            .expect("vector-set target is a vector")
            .elem;
        let elem_ty = self.ty(elem_ty_id);
        let array = b.load(&vec_ty, store);
        for element in &set.elements {
            let elem_store = b.elem_gep(&elem_ty, array.clone(), index.clone());
            let value = self.lower_expr(b, fx, element);
            b.store(value, elem_store);
            index = b.arith(ArithOp::Add, index, Value::const_i32(1));
        }
    }

    // ---- expressions ----------------------------------------------------

    pub(crate) fn lower_expr(&self, b: &mut Builder<'_>, fx: &mut FnCtx, expr: &Expression) -> Value {
        match &expr.kind {
            ExprKind::Null => Value::NullPtr { ty: Ty::I8.ptr_to() },
            ExprKind::Int(v) => Value::ConstInt {
                ty: Ty::I32,
                value: i64::from(*v),
            },
            ExprKind::Short(v) => Value::ConstInt {
                ty: Ty::I16,
                value: i64::from(*v),
            },
            ExprKind::Long(v) => Value::ConstInt { ty: Ty::I64, value: *v },
            ExprKind::Size(v) => Value::ConstInt {
                ty: ir::size_ty(),
                value: i64::from_ne_bytes(v.to_ne_bytes()),
            },
            ExprKind::Float(v) => Value::ConstFloat {
                ty: Ty::F32,
                value: f64::from(*v),
            },
            ExprKind::Double(v) => Value::ConstFloat { ty: Ty::F64, value: *v },
            ExprKind::Char(v) => Value::ConstInt {
                ty: Ty::I8,
                value: i64::from(*v),
            },
            ExprKind::Str(text) => b.global_string(text),
            ExprKind::Truth(v) => Value::ConstInt {
                ty: Ty::I1,
                value: i64::from(*v),
            },
            ExprKind::Value(value_expr) => {
                let store = self.lower_value_ref(b, fx, &value_expr.target);
                if value_expr.locate {
                    store
                } else {
                    b.load(&self.ty(value_expr.target.ty), store)
                }
            }
            ExprKind::Call(call) => {
                let args: Vec<Value> = call.args.iter().map(|a| self.lower_expr(b, fx, a)).collect();
                self.call_fn(b, call.callee, args)
                    .unwrap_or(Value::NullPtr { ty: Ty::I8.ptr_to() })
            }
            ExprKind::Paren(inner) => self.lower_expr(b, fx, inner),
            ExprKind::Binary(binary) => {
                let lhs = self.lower_expr(b, fx, &binary.lhs);
                let rhs = self.lower_expr(b, fx, &binary.rhs);
                lower_binary(b, binary.op, binary.class, lhs, rhs)
            }
        }
    }

    // ---- value references -----------------------------------------------

    /// Computes the address a reference designates. Each step yields the
    /// storage of the value so far; a trailing query dereferences once
    /// more.
    pub(crate) fn lower_value_ref(&self, b: &mut Builder<'_>, fx: &mut FnCtx, value_ref: &ValueRef) -> Value {
        let variable = self.bundle.variable(value_ref.head);
        let head_ty = self.ty(variable.ty);
        let mut store = match &variable.class {
            VariableClass::Stacked => fx.var_store[&value_ref.head].clone(),
            // The slot holds the payload pointer; one extra load reaches
            // the payload itself.
            VariableClass::Heaped => {
                let slot = fx.var_store[&value_ref.head].clone();
                b.load(&head_ty.ptr_to(), slot)
            }
            VariableClass::Context { .. } | VariableClass::Dump { .. } => {
                let symbol = self.bundle.global_symbol(value_ref.head);
                b.module.get_or_insert_global(&symbol, head_ty)
            }
        };

        let mut current_ty = value_ref.head_ty;
        for segment in &value_ref.segments {
            match &segment.kind {
                SegmentKind::Member { index, .. } => {
                    // The parent may sit behind a chain of addresses.
                    let mut collection_ty = current_ty;
                    while let Some(addr) = self.bundle.types.as_address(collection_ty) {
                        let pointee = addr.points_to;
                        store = b.load(&self.ty(collection_ty), store);
                        collection_ty = pointee;
                    }
                    let struct_ty = self.ty(collection_ty);
                    store = b.struct_gep(&struct_ty, store, *index);
                }
                SegmentKind::Element { index } => {
                    let index_value = self.lower_expr(b, fx, index);
                    let mut vector_ty = current_ty;
                    let mut array = b.load(&self.ty(vector_ty), store);
                    while let Some(addr) = self.bundle.types.as_address(vector_ty) {
                        vector_ty = addr.points_to;
                        array = b.load(&self.ty(vector_ty), array);
                    }
                    let elem = self
                        .bundle
                        .types
                        .as_vector(vector_ty)
                        .expect("element reference into a vector")
                        .elem;
                    store = b.elem_gep(&self.ty(elem), array, index_value);
                }
                SegmentKind::Row { field_index, id, .. } => {
                    let id_value = self.lower_expr(b, fx, id);
                    let table = self
                        .bundle
                        .types
                        .as_table(current_ty)
                        .expect("row reference into a table");
                    let num_rows_expr = &table.num_rows;
                    let field_ty_id = table.fields[*field_index].ty;
                    let num_rows = self.lower_expr(b, fx, num_rows_expr);
                    let row = self
                        .call_core(
                            b,
                            CoreFn::TableGetById,
                            smallvec![store.clone(), num_rows, id_value],
                        )
                        .expect("row lookup yields an index");
                    let table_ty = self.ty(current_ty);
                    let field_store = b.struct_gep(&table_ty, store, *field_index);
                    let field_ty = self.ty(field_ty_id);
                    let array = b.load(&field_ty.ptr_to(), field_store);
                    store = b.elem_gep(&field_ty, array, row);
                }
            }
            current_ty = segment.ty;
        }

        if value_ref.query {
            store = b.load(&self.ty(value_ref.ty).ptr_to(), store);
        }
        store
    }
}

/// Picks the instruction family from the operand equivalence class:
/// signed integer arithmetic and comparisons for the integer-like
/// primitives (chars included), IEEE ordered float forms otherwise.
fn lower_binary(b: &mut Builder<'_>, op: BinOp, class: OperandClass, lhs: Value, rhs: Value) -> Value {
    let float = matches!(class, OperandClass::Float);
    match op {
        BinOp::Add => b.arith(if float { ArithOp::FAdd } else { ArithOp::Add }, lhs, rhs),
        BinOp::Sub => b.arith(if float { ArithOp::FSub } else { ArithOp::Sub }, lhs, rhs),
        BinOp::Mul => b.arith(if float { ArithOp::FMul } else { ArithOp::Mul }, lhs, rhs),
        BinOp::Div => b.arith(if float { ArithOp::FDiv } else { ArithOp::SDiv }, lhs, rhs),
        BinOp::Lt if float => b.fcmp(FloatPredicate::Olt, lhs, rhs),
        BinOp::Lt => b.icmp(IntPredicate::Slt, lhs, rhs),
        BinOp::Gt if float => b.fcmp(FloatPredicate::Ogt, lhs, rhs),
        BinOp::Gt => b.icmp(IntPredicate::Sgt, lhs, rhs),
        BinOp::Le if float => b.fcmp(FloatPredicate::Ole, lhs, rhs),
        BinOp::Le => b.icmp(IntPredicate::Sle, lhs, rhs),
        BinOp::Ge if float => b.fcmp(FloatPredicate::Oge, lhs, rhs),
        BinOp::Ge => b.icmp(IntPredicate::Sge, lhs, rhs),
        BinOp::Eq if float => b.fcmp(FloatPredicate::Oeq, lhs, rhs),
        BinOp::Eq => b.icmp(IntPredicate::Eq, lhs, rhs),
        BinOp::Ne if float => b.fcmp(FloatPredicate::One, lhs, rhs),
        BinOp::Ne => b.icmp(IntPredicate::Ne, lhs, rhs),
    }
}

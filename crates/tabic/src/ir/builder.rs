//! Instruction builder with an explicit insertion point.
//!
//! The builder is a value the lowerer threads through its recursion, so
//! any helper that moves the insertion point is forced to restore it in
//! the type of its own code, not behind a hidden global. One builder
//! works on one module at a time; the lowerer constructs a fresh builder
//! whenever it switches modules (per-slab bodies versus the bundle-wide
//! init/destroy pair).

use smallvec::SmallVec;

use super::{
    ArithOp, BasicBlock, BlockId, FloatPredicate, FnDecl, Function, GlobalVar, InstrKind, Instruction, IntPredicate,
    Module, Ty, Value,
};

pub struct Builder<'m> {
    pub module: &'m mut Module,
    func: usize,
    block: BlockId,
}

impl<'m> Builder<'m> {
    /// Positions a new builder at the end of `block` of `func`.
    pub fn at(module: &'m mut Module, func: usize, block: BlockId) -> Self {
        Self { module, func, block }
    }

    pub fn func(&self) -> &Function {
        &self.module.functions[self.func]
    }

    fn func_mut(&mut self) -> &mut Function {
        &mut self.module.functions[self.func]
    }

    pub fn func_index(&self) -> usize {
        self.func
    }

    pub fn insert_block(&self) -> BlockId {
        self.block
    }

    pub fn set_insert_point(&mut self, block: BlockId) {
        self.block = block;
    }

    /// Appends a new block to the current function; the insertion point
    /// does not move.
    pub fn append_block(&mut self, name: &str) -> BlockId {
        let func = self.func_mut();
        let label = format!("{}{}", name, func.next_label);
        func.next_label += 1;
        func.blocks.push(BasicBlock {
            label,
            instrs: Vec::new(),
        });
        BlockId(u32::try_from(func.blocks.len() - 1).expect("block count fits u32"))
    }

    pub fn current_terminated(&self) -> bool {
        self.func().blocks[self.block.index()].terminated()
    }

    fn push(&mut self, result_ty: Option<Ty>, kind: InstrKind) -> Option<Value> {
        let block = self.block;
        let func = self.func_mut();
        let result = result_ty.map(|ty| {
            let id = func.next_value;
            func.next_value += 1;
            (id, ty)
        });
        func.blocks[block.index()].instrs.push(Instruction {
            result: result.clone(),
            kind,
        });
        result.map(|(id, ty)| Value::Instr { id, ty })
    }

    pub fn alloca(&mut self, ty: &Ty) -> Value {
        self.push(Some(ty.ptr_to()), InstrKind::Alloca { ty: ty.clone(), count: None })
            .expect("alloca yields a value")
    }

    /// Dynamically sized stack allocation of `count` items.
    pub fn alloca_n(&mut self, ty: &Ty, count: Value) -> Value {
        self.push(
            Some(ty.ptr_to()),
            InstrKind::Alloca {
                ty: ty.clone(),
                count: Some(count),
            },
        )
        .expect("alloca yields a value")
    }

    pub fn load(&mut self, ty: &Ty, ptr: Value) -> Value {
        self.push(Some(ty.clone()), InstrKind::Load { ty: ty.clone(), ptr })
            .expect("load yields a value")
    }

    pub fn store(&mut self, value: Value, ptr: Value) {
        self.push(None, InstrKind::Store { value, ptr });
    }

    /// `getelementptr` into a struct: `[0, index]`, yielding a pointer to
    /// the member type.
    pub fn struct_gep(&mut self, struct_ty: &Ty, ptr: Value, index: usize) -> Value {
        let Ty::Struct(members) = struct_ty else {
            panic!("struct_gep on non-struct type {struct_ty:?}");
        };
        let member_ty = members[index].clone();
        let indices: SmallVec<[Value; 2]> = SmallVec::from_vec(vec![
            Value::const_i32(0),
            Value::const_i32(i64::try_from(index).expect("member index fits i64")),
        ]);
        self.push(
            Some(member_ty.ptr_to()),
            InstrKind::Gep {
                base_ty: struct_ty.clone(),
                ptr,
                indices,
            },
        )
        .expect("gep yields a value")
    }

    /// `getelementptr` by a single dynamic index over an element array.
    pub fn elem_gep(&mut self, elem_ty: &Ty, ptr: Value, index: Value) -> Value {
        let indices: SmallVec<[Value; 2]> = SmallVec::from_vec(vec![index]);
        self.push(
            Some(elem_ty.ptr_to()),
            InstrKind::Gep {
                base_ty: elem_ty.clone(),
                ptr,
                indices,
            },
        )
        .expect("gep yields a value")
    }

    /// Emits a call; `decl` is recorded in the module unless the callee
    /// is defined here. Returns the result value for non-void callees.
    pub fn call(&mut self, callee: &str, decl: &FnDecl, args: SmallVec<[Value; 4]>) -> Option<Value> {
        self.module.ensure_declared(callee, decl.clone());
        let ret = decl.ret.clone();
        let result_ty = if ret == Ty::Void { None } else { Some(ret.clone()) };
        self.push(
            result_ty,
            InstrKind::Call {
                callee: callee.to_string(),
                args,
                ret,
            },
        )
    }

    pub fn arith(&mut self, op: ArithOp, lhs: Value, rhs: Value) -> Value {
        let ty = lhs.ty();
        self.push(Some(ty), InstrKind::Arith { op, lhs, rhs })
            .expect("arith yields a value")
    }

    pub fn icmp(&mut self, pred: IntPredicate, lhs: Value, rhs: Value) -> Value {
        self.push(Some(Ty::I1), InstrKind::ICmp { pred, lhs, rhs })
            .expect("icmp yields a value")
    }

    pub fn fcmp(&mut self, pred: FloatPredicate, lhs: Value, rhs: Value) -> Value {
        self.push(Some(Ty::I1), InstrKind::FCmp { pred, lhs, rhs })
            .expect("fcmp yields a value")
    }

    pub fn stack_save(&mut self) -> Value {
        self.push(Some(Ty::I8.ptr_to()), InstrKind::StackSave)
            .expect("stacksave yields a value")
    }

    pub fn stack_restore(&mut self, saved: Value) {
        self.push(None, InstrKind::StackRestore { saved });
    }

    pub fn br(&mut self, target: BlockId) {
        self.push(None, InstrKind::Br { target });
    }

    pub fn cond_br(&mut self, cond: Value, then_to: BlockId, else_to: BlockId) {
        self.push(None, InstrKind::CondBr { cond, then_to, else_to });
    }

    pub fn ret(&mut self, value: Value) {
        self.push(None, InstrKind::Ret { value: Some(value) });
    }

    pub fn ret_void(&mut self) {
        self.push(None, InstrKind::Ret { value: None });
    }

    /// Interns a NUL-terminated private string constant and returns its
    /// address.
    pub fn global_string(&mut self, text: &str) -> Value {
        let name = format!(".str.{}", self.module.next_string);
        self.module.next_string += 1;
        let ty = Ty::Struct(vec![Ty::I8; text.len() + 1]);
        self.module.globals.push(GlobalVar {
            name: name.clone(),
            ty: ty.clone(),
            init: None,
            private: true,
            string: Some(text.to_string()),
        });
        Value::Global { name, pointee: ty }
    }
}

//! The IR lowering pass: typed model in, one IR module per slab out.
//!
//! The order of operations is fixed because declarations reference each
//! other: primitive and composite types lower first (into a bundle-wide
//! cache), then the per-slab modules and the bundle-wide `_tabi_init` /
//! `_tabi_destroy` pair are created, contexts and dumps globalize (with
//! dynamic setup into init and mirrored teardown into destroy), then
//! every function is registered (symbol + signature) before any body is
//! lowered.
//!
//! The lowerer assumes a model the elaborator accepted; nothing here
//! reports user errors.

mod alloc;
mod body;
mod dealloc;
mod runtime;
mod table;

pub use runtime::CoreFn;

use ahash::AHashMap;

use crate::ir::{self, BlockId, Builder, CallConv, FnDecl, GlobalVar, Module, Ty, Value};
use crate::model::{
    Bundle, ExprKind, Expression, FuncId, Function, Primitive, SlabId, Type, TypeId, VarId, VariableClass,
};

/// Lowers an elaborated bundle to one module per slab. Module order
/// matches slab arena order.
pub fn lower_bundle(bundle: &Bundle) -> Vec<Module> {
    let mut lowerer = Lowerer::new(bundle);
    lowerer.run();
    lowerer.modules
}

/// An insertion point that survives across builder lifetimes: the init
/// and destroy tails move as context setup code is appended.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    func: usize,
    tail: BlockId,
}

struct Lowerer<'b> {
    bundle: &'b Bundle,
    /// Lowered type per arena entry, indexed by `TypeId`.
    tys: Vec<Ty>,
    /// Fully qualified symbol per function.
    symbols: Vec<String>,
    /// IR signature per function.
    decls: Vec<FnDecl>,
    modules: Vec<Module>,
    init: Anchor,
    destroy: Anchor,
}

/// Per-function lowering state: where each variable's storage lives and
/// the stack marker saved on entry. Init/destroy emission uses an empty
/// context, since count expressions there are static.
pub(crate) struct FnCtx {
    pub stack_state: Option<Value>,
    pub var_store: AHashMap<VarId, Value>,
}

impl FnCtx {
    fn empty() -> Self {
        Self {
            stack_state: None,
            var_store: AHashMap::new(),
        }
    }
}

impl<'b> Lowerer<'b> {
    fn new(bundle: &'b Bundle) -> Self {
        Self {
            bundle,
            tys: Vec::new(),
            symbols: Vec::new(),
            decls: Vec::new(),
            modules: Vec::new(),
            init: Anchor {
                func: 0,
                tail: BlockId(0),
            },
            destroy: Anchor {
                func: 0,
                tail: BlockId(0),
            },
        }
    }

    fn run(&mut self) {
        self.lower_types();
        for slab in &self.bundle.slabs {
            self.modules.push(Module::new(format!("{}.ll", slab.name)));
        }
        self.create_init_destroy();
        self.build_contexts_and_dumps();
        self.terminate_init_destroy();
        self.register_functions();
        self.lower_bodies();
    }

    // ---- types ----------------------------------------------------------

    fn lower_types(&mut self) {
        for index in 0..self.bundle.types.len() {
            let ty = self.lower_ty(TypeId::from_index(index));
            self.tys.push(ty);
        }
    }

    fn lower_ty(&self, id: TypeId) -> Ty {
        match self.bundle.types.get(self.bundle.types.resolve(id)) {
            Type::Primitive(p) => match p {
                Primitive::Int => Ty::I32,
                Primitive::Short => Ty::I16,
                Primitive::Long => Ty::I64,
                Primitive::Size => ir::size_ty(),
                Primitive::Float => Ty::F32,
                Primitive::Double => Ty::F64,
                Primitive::Char => Ty::I8,
                Primitive::Truth => Ty::I1,
                Primitive::None => Ty::Void,
            },
            Type::Collection(c) => {
                let mut members = vec![Ty::Void; c.members.len()];
                for member in c.members.values() {
                    members[member.index] = self.lower_ty(member.ty);
                }
                Ty::Struct(members)
            }
            Type::Address(a) => self.lower_ty(a.points_to).ptr_to(),
            Type::Vector(v) => self.lower_ty(v.elem).ptr_to(),
            Type::Table(t) => Ty::Struct(t.fields.iter().map(|f| self.lower_ty(f.ty).ptr_to()).collect()),
            Type::Alias(_) => Ty::Void,
        }
    }

    /// The cached lowered type for `id`.
    pub(crate) fn ty(&self, id: TypeId) -> Ty {
        self.tys[self.bundle.types.resolve(id).index()].clone()
    }

    pub(crate) fn zero_value(ty: &Ty) -> Value {
        match ty {
            Ty::I1 | Ty::I8 | Ty::I16 | Ty::I32 | Ty::I64 => Value::ConstInt { ty: ty.clone(), value: 0 },
            Ty::F32 | Ty::F64 => Value::ConstFloat { ty: ty.clone(), value: 0.0 },
            Ty::Ptr(_) => Value::NullPtr { ty: ty.clone() },
            Ty::Struct(_) | Ty::Void => Value::Zero { ty: ty.clone() },
        }
    }

    // ---- init / destroy -------------------------------------------------

    fn create_init_destroy(&mut self) {
        let root = self.bundle.root.index();
        let module = &mut self.modules[root];
        for (anchor, name) in [(&mut self.init, "_tabi_init"), (&mut self.destroy, "_tabi_destroy")] {
            module
                .functions
                .push(ir::Function::new(name, vec![], Ty::Void, CallConv::host()));
            let func = module.functions.len() - 1;
            let mut b = Builder::at(module, func, BlockId(0));
            let entry = b.append_block("entry");
            *anchor = Anchor { func, tail: entry };
        }
    }

    fn terminate_init_destroy(&mut self) {
        let root = self.bundle.root.index();
        let module = &mut self.modules[root];
        for anchor in [self.init, self.destroy] {
            let mut b = Builder::at(module, anchor.func, anchor.tail);
            b.set_insert_point(anchor.tail);
            b.ret_void();
        }
    }

    // ---- contexts and dumps ---------------------------------------------

    fn build_contexts_and_dumps(&mut self) {
        for context in &self.bundle.contexts {
            for var in context.members.values() {
                self.build_global_member(*var, context.host, true);
            }
        }
        for dump in &self.bundle.dumps {
            for var in dump.members.values() {
                self.build_global_member(*var, dump.host, false);
            }
        }
    }

    /// Globalizes one context or dump member: an externally linked global
    /// with its static initial value in the host slab's module, plus,
    /// for context members owning dynamic storage, allocation in
    /// `_tabi_init` and mirrored teardown in `_tabi_destroy`.
    fn build_global_member(&mut self, var: VarId, host: SlabId, dynamic_allowed: bool) {
        let variable = self.bundle.variable(var);
        let symbol = self.bundle.global_symbol(var);
        let ty = self.ty(variable.ty);
        let init_expr = match &variable.class {
            VariableClass::Context { init, .. } | VariableClass::Dump { init, .. } => init.as_ref(),
            _ => None,
        };
        let init_value = init_expr.and_then(const_value).unwrap_or_else(|| Self::zero_value(&ty));
        self.modules[host.index()].globals.push(GlobalVar {
            name: symbol.clone(),
            ty: ty.clone(),
            init: Some(init_value),
            private: false,
            string: None,
        });

        if dynamic_allowed && self.bundle.types.owns_dynamic_storage(variable.ty) {
            let root = self.bundle.root.index();
            // Allocation runs at the current init tail; the global is
            // redeclared in the root module when it lives elsewhere.
            let mut module = std::mem::take(&mut self.modules[root]);
            {
                let mut b = Builder::at(&mut module, self.init.func, self.init.tail);
                let store = b.module.get_or_insert_global(&symbol, ty.clone());
                let mut fx = FnCtx::empty();
                self.allocate_heap_payload(&mut b, &mut fx, variable.ty, store);
                self.init.tail = b.insert_block();
            }
            {
                let mut b = Builder::at(&mut module, self.destroy.func, self.destroy.tail);
                let store = b.module.get_or_insert_global(&symbol, ty);
                let mut fx = FnCtx::empty();
                self.dealloc_type(&mut b, &mut fx, variable.ty, store, false);
                self.destroy.tail = b.insert_block();
            }
            self.modules[root] = module;
        }
    }

    // ---- functions ------------------------------------------------------

    /// Creates every function's IR handle and signature before any body
    /// lowers; the root slab's local `main` becomes `_tabi_main`, all
    /// others are `<slab-id>::<name>`, externals keep their exported
    /// name.
    fn register_functions(&mut self) {
        for function in &self.bundle.functions {
            let (symbol, params, ret) = match function {
                Function::Local(f) => {
                    let slab = self.bundle.slab(f.host);
                    let symbol = if f.name == "main" && f.host == self.bundle.root {
                        "_tabi_main".to_string()
                    } else {
                        format!("{}::{}", slab.id, f.name)
                    };
                    let params: Vec<Ty> = f.args.iter().map(|a| self.ty(self.bundle.variable(*a).ty)).collect();
                    (symbol, params, self.ty(f.return_type))
                }
                Function::External(f) => {
                    let params: Vec<Ty> = f.args.iter().map(|a| self.ty(*a)).collect();
                    (f.external_name.clone(), params, self.ty(f.return_type))
                }
            };
            let decl = FnDecl {
                params: params.clone(),
                ret: ret.clone(),
            };
            match function {
                Function::Local(f) => {
                    self.modules[f.host.index()]
                        .functions
                        .push(ir::Function::new(symbol.clone(), params, ret, CallConv::host()));
                }
                Function::External(f) => {
                    self.modules[f.host.index()].ensure_declared(&symbol, decl.clone());
                }
            }
            self.symbols.push(symbol);
            self.decls.push(decl);
        }
    }

    pub(crate) fn fn_symbol(&self, id: FuncId) -> &str {
        &self.symbols[id.index()]
    }

    pub(crate) fn fn_decl(&self, id: FuncId) -> &FnDecl {
        &self.decls[id.index()]
    }

    fn lower_bodies(&mut self) {
        for (index, function) in self.bundle.functions.iter().enumerate() {
            let Function::Local(f) = function else {
                continue;
            };
            if f.body.is_none() {
                continue;
            }
            let id = FuncId::from_index(index);
            let host = f.host.index();
            let mut module = std::mem::take(&mut self.modules[host]);
            self.lower_function(&mut module, id, f);
            self.modules[host] = module;
        }
    }

    // ---- shared emission helpers ---------------------------------------

    /// Calls a runtime helper.
    pub(crate) fn call_core(
        &self,
        b: &mut Builder<'_>,
        core: CoreFn,
        args: smallvec::SmallVec<[Value; 4]>,
    ) -> Option<Value> {
        b.call(core.symbol(), &core.decl(), args)
    }

    /// Calls a bundle function by id, declaring it in the current module
    /// when it is defined elsewhere.
    pub(crate) fn call_fn(&self, b: &mut Builder<'_>, callee: FuncId, args: Vec<Value>) -> Option<Value> {
        let decl = self.fn_decl(callee).clone();
        let symbol = self.fn_symbol(callee).to_string();
        b.call(&symbol, &decl, smallvec::SmallVec::from_vec(args))
    }

    /// Emits the counted loop `for i in 0..count { body }` used by every
    /// element-wise allocation, copy and teardown. The insertion point
    /// ends at the loop's exit block.
    pub(crate) fn counted_loop(
        &self,
        b: &mut Builder<'_>,
        prefix: &str,
        count: Value,
        mut emit_body: impl FnMut(&mut Builder<'_>, Value),
    ) {
        let index_slot = b.alloca(&Ty::I32);
        b.store(Value::const_i32(0), index_slot.clone());
        let cond = b.append_block(&format!("{prefix}_condition"));
        b.br(cond);
        b.set_insert_point(cond);
        let index = b.load(&Ty::I32, index_slot.clone());
        let more = b.icmp(ir::IntPredicate::Slt, index.clone(), count);
        let body = b.append_block(&format!("{prefix}_body"));
        b.set_insert_point(body);
        emit_body(b, index.clone());
        let next = b.arith(ir::ArithOp::Add, index, Value::const_i32(1));
        b.store(next, index_slot);
        b.br(cond);
        let end = b.append_block(&format!("{prefix}_end"));
        b.set_insert_point(cond);
        b.cond_br(more, body, end);
        b.set_insert_point(end);
    }
}

/// A static constant for a context or dump initializer; `None` for
/// anything that is not a plain literal (those globals zero-initialize).
fn const_value(expr: &Expression) -> Option<Value> {
    let value = match expr.kind {
        ExprKind::Int(v) => Value::ConstInt {
            ty: Ty::I32,
            value: i64::from(v),
        },
        ExprKind::Short(v) => Value::ConstInt {
            ty: Ty::I16,
            value: i64::from(v),
        },
        ExprKind::Long(v) => Value::ConstInt { ty: Ty::I64, value: v },
        ExprKind::Size(v) => Value::ConstInt {
            ty: ir::size_ty(),
            value: i64::from_ne_bytes(v.to_ne_bytes()),
        },
        ExprKind::Float(v) => Value::ConstFloat {
            ty: Ty::F32,
            value: f64::from(v),
        },
        ExprKind::Double(v) => Value::ConstFloat { ty: Ty::F64, value: v },
        ExprKind::Char(v) => Value::ConstInt {
            ty: Ty::I8,
            value: i64::from(v),
        },
        ExprKind::Truth(v) => Value::ConstInt {
            ty: Ty::I1,
            value: i64::from(v),
        },
        ExprKind::Null => Value::NullPtr { ty: Ty::I8.ptr_to() },
        _ => return None,
    };
    Some(value)
}

//! The stack/heap/context allocation matrix and the by-value deep
//! copies.
//!
//! Stack slots for every stacked variable are created once in the entry
//! block; dynamically sized payloads (vector elements, table fields)
//! are allocated at the declaration statement, where their count
//! expressions can be evaluated. Heap payloads go through `core_alloc`
//! and fully recurse up front. Context members reuse the heap path with
//! the builder positioned inside `_tabi_init`.

use smallvec::smallvec;

use super::{CoreFn, FnCtx, Lowerer};
use crate::ir::{Builder, Value};
use crate::model::{Block, Statement, Type, TypeId, VariableClass};

impl Lowerer<'_> {
    /// Creates a stack slot for every stacked variable declared anywhere
    /// beneath `block`, sub-blocks included. The up-front sweep is what
    /// lets the function save its stack marker exactly once.
    pub(crate) fn allocate_stack_variables(&self, b: &mut Builder<'_>, fx: &mut FnCtx, block: &Block) {
        for var in block.variables.values() {
            if matches!(self.bundle.variable(*var).class, VariableClass::Stacked) {
                let ty = self.ty(self.bundle.variable(*var).ty);
                let slot = b.alloca(&ty);
                fx.var_store.insert(*var, slot);
            }
        }
        for statement in &block.statements {
            match statement {
                Statement::Block(inner) => self.allocate_stack_variables(b, fx, inner),
                Statement::If(cond) => self.allocate_stack_variables(b, fx, &cond.arm.block),
                Statement::Branch(branch) => {
                    for twig in &branch.twigs {
                        self.allocate_stack_variables(b, fx, &twig.block);
                    }
                    if let Some(otherwise) = &branch.otherwise {
                        self.allocate_stack_variables(b, fx, otherwise);
                    }
                }
                Statement::Loop(lp) => self.allocate_stack_variables(b, fx, &lp.body),
                _ => {}
            }
        }
    }

    /// Creates the pointer-holding slot for every heaped variable's
    /// handle, in the entry block for the same reason: handles declared
    /// inside loops must survive iteration.
    pub(crate) fn allocate_heap_handles(&self, b: &mut Builder<'_>, fx: &mut FnCtx, block: &Block) {
        for var in block.variables.values() {
            if matches!(self.bundle.variable(*var).class, VariableClass::Heaped) {
                let ty = self.ty(self.bundle.variable(*var).ty);
                let slot = b.alloca(&ty.ptr_to());
                fx.var_store.insert(*var, slot);
            }
        }
        for statement in &block.statements {
            match statement {
                Statement::Block(inner) => self.allocate_heap_handles(b, fx, inner),
                Statement::If(cond) => self.allocate_heap_handles(b, fx, &cond.arm.block),
                Statement::Branch(branch) => {
                    for twig in &branch.twigs {
                        self.allocate_heap_handles(b, fx, &twig.block);
                    }
                    if let Some(otherwise) = &branch.otherwise {
                        self.allocate_heap_handles(b, fx, otherwise);
                    }
                }
                Statement::Loop(lp) => self.allocate_heap_handles(b, fx, &lp.body),
                _ => {}
            }
        }
    }

    /// Allocates the dynamically sized parts of a stack value in place:
    /// element arrays for sized vectors, per-field arrays plus
    /// `core_table_init` for tables, and recursion through collection
    /// members. `store` addresses storage of the lowered type.
    pub(crate) fn allocate_stack_payload(&self, b: &mut Builder<'_>, fx: &mut FnCtx, ty_id: TypeId, store: Value) {
        match self.bundle.types.get(self.bundle.types.resolve(ty_id)) {
            Type::Vector(v) => {
                let Some(num_elem) = &v.num_elem else {
                    return;
                };
                let elem_id = v.elem;
                let elem_ty = self.ty(elem_id);
                let count = self.lower_expr(b, fx, num_elem);
                let array = b.alloca_n(&elem_ty, count.clone());
                b.store(array.clone(), store);
                if self.bundle.types.owns_dynamic_storage(elem_id) {
                    self.counted_loop(b, "subvec_alloc", count, |b, index| {
                        let elem_store = b.elem_gep(&elem_ty, array.clone(), index);
                        self.allocate_stack_payload(b, fx, elem_id, elem_store);
                    });
                }
            }
            Type::Table(t) => {
                let table_ty = self.ty(ty_id);
                let count = self.lower_expr(b, fx, &t.num_rows);
                for (index, field) in t.fields.iter().enumerate() {
                    let field_ty = self.ty(field.ty);
                    let field_alloc = b.alloca_n(&field_ty, count.clone());
                    let field_store = b.struct_gep(&table_ty, store.clone(), index);
                    b.store(field_alloc, field_store);
                }
                self.call_core(b, CoreFn::TableInit, smallvec![store, count]);
            }
            Type::Collection(c) => {
                let struct_ty = self.ty(ty_id);
                let members: Vec<(usize, TypeId)> = c.members.values().map(|m| (m.index, m.ty)).collect();
                for (index, member_ty) in members {
                    if self.bundle.types.owns_dynamic_storage(member_ty) {
                        let member_store = b.struct_gep(&struct_ty, store.clone(), index);
                        self.allocate_stack_payload(b, fx, member_ty, member_store);
                    }
                }
            }
            _ => {}
        }
    }

    /// Heap-allocates storage for a value of the given type and returns
    /// the payload pointer. Owned substructure is allocated recursively.
    pub(crate) fn allocate_heap_type(&self, b: &mut Builder<'_>, fx: &mut FnCtx, ty_id: TypeId) -> Value {
        let ty = self.ty(ty_id);
        let size = Value::const_i32(i64::try_from(ty.alloc_size()).expect("type size fits i64"));
        let store = self
            .call_core(b, CoreFn::Alloc, smallvec![size])
            .expect("core_alloc yields a pointer");
        self.allocate_heap_payload(b, fx, ty_id, store.clone());
        store
    }

    /// Heap counterpart of [`Self::allocate_stack_payload`]; also the
    /// body of context initialization, with the builder positioned at
    /// the `_tabi_init` tail.
    pub(crate) fn allocate_heap_payload(&self, b: &mut Builder<'_>, fx: &mut FnCtx, ty_id: TypeId, store: Value) {
        match self.bundle.types.get(self.bundle.types.resolve(ty_id)) {
            Type::Vector(v) => {
                let Some(num_elem) = &v.num_elem else {
                    return;
                };
                let elem_id = v.elem;
                let elem_ty = self.ty(elem_id);
                let count = self.lower_expr(b, fx, num_elem);
                let elem_size = Value::const_i32(i64::try_from(elem_ty.alloc_size()).expect("element size fits i64"));
                let bytes = b.arith(crate::ir::ArithOp::Mul, elem_size, count.clone());
                let array = self
                    .call_core(b, CoreFn::Alloc, smallvec![bytes])
                    .expect("core_alloc yields a pointer");
                b.store(array.clone(), store);
                if self.bundle.types.owns_dynamic_storage(elem_id) {
                    self.counted_loop(b, "subvec_alloc", count, |b, index| {
                        let elem_store = b.elem_gep(&elem_ty, array.clone(), index);
                        self.allocate_heap_payload(b, fx, elem_id, elem_store);
                    });
                }
            }
            Type::Table(t) => {
                let table_ty = self.ty(ty_id);
                let count = self.lower_expr(b, fx, &t.num_rows);
                for (index, field) in t.fields.iter().enumerate() {
                    let field_ty = self.ty(field.ty);
                    let elem_size =
                        Value::const_i32(i64::try_from(field_ty.alloc_size()).expect("field size fits i64"));
                    let bytes = b.arith(crate::ir::ArithOp::Mul, count.clone(), elem_size);
                    let field_alloc = self
                        .call_core(b, CoreFn::Alloc, smallvec![bytes])
                        .expect("core_alloc yields a pointer");
                    let field_store = b.struct_gep(&table_ty, store.clone(), index);
                    b.store(field_alloc, field_store);
                }
                self.call_core(b, CoreFn::TableInit, smallvec![store, count]);
            }
            Type::Collection(c) => {
                let struct_ty = self.ty(ty_id);
                let members: Vec<(usize, TypeId)> = c.members.values().map(|m| (m.index, m.ty)).collect();
                for (index, member_ty) in members {
                    if self.bundle.types.owns_dynamic_storage(member_ty) {
                        let member_store = b.struct_gep(&struct_ty, store.clone(), index);
                        self.allocate_heap_payload(b, fx, member_ty, member_store);
                    }
                }
            }
            _ => {}
        }
    }

    /// Deep-copies a sized vector argument: a fresh element array,
    /// `core_memcpy` from the caller's storage, then element-wise
    /// recursion when elements themselves own storage. Returns the
    /// callee-side slot holding the new array pointer.
    pub(crate) fn copy_vector(&self, b: &mut Builder<'_>, fx: &mut FnCtx, ty_id: TypeId, incoming: Value) -> Value {
        let vector = self
            .bundle
            .types
            .as_vector(ty_id)
            .expect("deep copy applies to vectors");
        let elem_id = vector.elem;
        let num_elem = vector.num_elem.as_ref().expect("deep copy applies to sized vectors");
        let vec_ty = self.ty(ty_id);
        let elem_ty = self.ty(elem_id);

        let store = b.alloca(&vec_ty);
        let count = self.lower_expr(b, fx, num_elem);
        let array = b.alloca_n(&elem_ty, count.clone());
        let elem_size = Value::const_i32(i64::try_from(elem_ty.alloc_size()).expect("element size fits i64"));
        let bytes = b.arith(crate::ir::ArithOp::Mul, count.clone(), elem_size);
        self.call_core(b, CoreFn::MemCpy, smallvec![array.clone(), incoming.clone(), bytes]);
        b.store(array.clone(), store.clone());

        match self.bundle.types.get(self.bundle.types.resolve(elem_id)) {
            Type::Vector(inner) if inner.num_elem.is_some() => {
                // The memcpy above copied the caller's inner pointers;
                // replace each with its own deep copy.
                self.counted_loop(b, "subvec_copy", count, |b, index| {
                    let elem_store = b.elem_gep(&elem_ty, array.clone(), index.clone());
                    let incoming_elem_store = b.elem_gep(&elem_ty, incoming.clone(), index);
                    let incoming_elem = b.load(&elem_ty, incoming_elem_store);
                    let copy_slot = self.copy_vector(b, fx, elem_id, incoming_elem);
                    let copied = b.load(&elem_ty, copy_slot);
                    b.store(copied, elem_store);
                });
            }
            Type::Collection(_) => {
                self.counted_loop(b, "collection_copy", count, |b, index| {
                    let elem_store = b.elem_gep(&elem_ty, array.clone(), index);
                    self.copy_subvectors(b, fx, elem_id, elem_store);
                });
            }
            _ => {}
        }
        store
    }

    /// Deep-copies a table argument: a fresh element array per field,
    /// `core_memcpy` of the caller's field storage (the `id` and `use`
    /// columns included, so the copy starts with the same row
    /// occupancy), then row-wise recursion where a field owns storage
    /// of its own. Returns the callee-side slot holding the new field
    /// pointers.
    pub(crate) fn copy_table(&self, b: &mut Builder<'_>, fx: &mut FnCtx, ty_id: TypeId, incoming: Value) -> Value {
        let table = self.bundle.types.as_table(ty_id).expect("deep copy applies to tables");
        let field_ids: Vec<TypeId> = table.fields.iter().map(|f| f.ty).collect();
        let table_ty = self.ty(ty_id);

        let store = b.alloca(&table_ty);
        b.store(incoming, store.clone());
        let count = self.lower_expr(b, fx, &table.num_rows);
        for (index, field_id) in field_ids.iter().enumerate() {
            let field_ty = self.ty(*field_id);
            let field_store = b.struct_gep(&table_ty, store.clone(), index);
            let caller_array = b.load(&field_ty.ptr_to(), field_store.clone());
            let array = b.alloca_n(&field_ty, count.clone());
            let elem_size = Value::const_i32(i64::try_from(field_ty.alloc_size()).expect("field size fits i64"));
            let bytes = b.arith(crate::ir::ArithOp::Mul, count.clone(), elem_size);
            self.call_core(b, CoreFn::MemCpy, smallvec![array.clone(), caller_array, bytes]);
            b.store(array.clone(), field_store);

            match self.bundle.types.get(self.bundle.types.resolve(*field_id)) {
                Type::Vector(v) if v.num_elem.is_some() => {
                    let field_id = *field_id;
                    // The memcpy above copied the caller's per-row
                    // pointers; replace each with its own deep copy.
                    self.counted_loop(b, "field_copy", count.clone(), |b, row| {
                        let elem_store = b.elem_gep(&field_ty, array.clone(), row);
                        let caller_elem = b.load(&field_ty, elem_store.clone());
                        let copy_slot = self.copy_vector(b, fx, field_id, caller_elem);
                        let copied = b.load(&field_ty, copy_slot);
                        b.store(copied, elem_store);
                    });
                }
                Type::Collection(_) => {
                    let field_id = *field_id;
                    self.counted_loop(b, "field_copy", count.clone(), |b, row| {
                        let elem_store = b.elem_gep(&field_ty, array.clone(), row);
                        self.copy_subvectors(b, fx, field_id, elem_store);
                    });
                }
                _ => {}
            }
        }
        store
    }

    /// Replaces every owned vector inside a collection (recursively) with
    /// a deep copy, in place.
    pub(crate) fn copy_subvectors(&self, b: &mut Builder<'_>, fx: &mut FnCtx, ty_id: TypeId, store: Value) {
        let Some(collection) = self.bundle.types.as_collection(ty_id) else {
            return;
        };
        let struct_ty = self.ty(ty_id);
        let members: Vec<(usize, TypeId)> = collection.members.values().map(|m| (m.index, m.ty)).collect();
        for (index, member_ty) in members {
            match self.bundle.types.get(self.bundle.types.resolve(member_ty)) {
                Type::Vector(v) if v.num_elem.is_some() => {
                    let member_store = b.struct_gep(&struct_ty, store.clone(), index);
                    let member_value = b.load(&self.ty(member_ty), member_store.clone());
                    let copy_slot = self.copy_vector(b, fx, member_ty, member_value);
                    let copied = b.load(&self.ty(member_ty), copy_slot);
                    b.store(copied, member_store);
                }
                Type::Collection(_) => {
                    let member_store = b.struct_gep(&struct_ty, store.clone(), index);
                    self.copy_subvectors(b, fx, member_ty, member_store);
                }
                _ => {}
            }
        }
    }
}

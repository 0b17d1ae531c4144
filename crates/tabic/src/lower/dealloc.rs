//! Structure-aware deallocation: the lowering of `unheap` and of
//! context teardown in `_tabi_destroy`.
//!
//! Owned storage is freed bottom-up: a collection recurses on each
//! member, a sized vector walks its elements (recursing where elements
//! own storage) before freeing the element array, a table frees each
//! field array after walking its rows. The root pointer itself is freed
//! last, unless the caller has already moved one level down and
//! suppresses it.

use smallvec::smallvec;

use super::{CoreFn, FnCtx, Lowerer};
use crate::ir::{Builder, Value};
use crate::model::{Type, TypeId};

impl Lowerer<'_> {
    pub(crate) fn dealloc_type(
        &self,
        b: &mut Builder<'_>,
        fx: &mut FnCtx,
        ty_id: TypeId,
        store: Value,
        dealloc_base: bool,
    ) {
        match self.bundle.types.get(self.bundle.types.resolve(ty_id)) {
            Type::Primitive(_) | Type::Address(_) => {
                if dealloc_base {
                    self.call_core(b, CoreFn::Dealloc, smallvec![store]);
                }
            }
            Type::Collection(c) => {
                let struct_ty = self.ty(ty_id);
                let members: Vec<(usize, TypeId)> = c.members.values().map(|m| (m.index, m.ty)).collect();
                for (index, member_ty) in members {
                    if matches!(
                        self.bundle.types.get(self.bundle.types.resolve(member_ty)),
                        Type::Vector(_) | Type::Collection(_) | Type::Table(_)
                    ) {
                        let member_ptr = b.struct_gep(&struct_ty, store.clone(), index);
                        self.dealloc_type(b, fx, member_ty, member_ptr, false);
                    }
                }
                if dealloc_base {
                    self.call_core(b, CoreFn::Dealloc, smallvec![store]);
                }
            }
            Type::Vector(v) => {
                // A fuzzy vector owns nothing beyond its own slot.
                let Some(num_elem) = &v.num_elem else {
                    if dealloc_base {
                        self.call_core(b, CoreFn::Dealloc, smallvec![store]);
                    }
                    return;
                };
                let elem_id = v.elem;
                let vec_ty = self.ty(ty_id);
                let elem_ty = self.ty(elem_id);
                let array = b.load(&vec_ty, store.clone());
                if matches!(
                    self.bundle.types.get(self.bundle.types.resolve(elem_id)),
                    Type::Vector(_) | Type::Collection(_)
                ) {
                    let count = self.lower_expr(b, fx, num_elem);
                    self.counted_loop(b, "vec_dealloc", count, |b, index| {
                        let elem_ptr = b.elem_gep(&elem_ty, array.clone(), index);
                        self.dealloc_type(b, fx, elem_id, elem_ptr, false);
                    });
                }
                self.call_core(b, CoreFn::Dealloc, smallvec![array]);
                if dealloc_base {
                    self.call_core(b, CoreFn::Dealloc, smallvec![store]);
                }
            }
            Type::Table(t) => {
                let table_ty = self.ty(ty_id);
                let fields: Vec<TypeId> = t.fields.iter().map(|f| f.ty).collect();
                for (index, field_id) in fields.iter().enumerate() {
                    let field_ty = self.ty(*field_id);
                    let field_store = b.struct_gep(&table_ty, store.clone(), index);
                    let array = b.load(&field_ty.ptr_to(), field_store);
                    if matches!(
                        self.bundle.types.get(self.bundle.types.resolve(*field_id)),
                        Type::Vector(_) | Type::Collection(_) | Type::Table(_)
                    ) {
                        let num_rows = {
                            let table = self.bundle.types.as_table(ty_id).expect("table type");
                            self.lower_expr(b, fx, &table.num_rows)
                        };
                        let field_id = *field_id;
                        self.counted_loop(b, "field_dealloc", num_rows, |b, index| {
                            let elem_ptr = b.elem_gep(&field_ty, array.clone(), index);
                            self.dealloc_type(b, fx, field_id, elem_ptr, false);
                        });
                    }
                    self.call_core(b, CoreFn::Dealloc, smallvec![array]);
                }
                if dealloc_base {
                    self.call_core(b, CoreFn::Dealloc, smallvec![store]);
                }
            }
            Type::Alias(_) => {}
        }
    }
}

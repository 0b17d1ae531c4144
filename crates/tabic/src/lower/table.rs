//! Lowering of the table statements: insert, delete, measure, crunch.
//!
//! A table value is a struct of one element-array pointer per field,
//! with the implicit `id` and `use` fields first; the runtime helpers
//! receive the address of that struct plus the row count, which is
//! re-evaluated at every operation.

use smallvec::smallvec;

use super::{CoreFn, FnCtx, Lowerer};
use crate::ir::{Builder, Ty, Value};
use crate::model::{TableCrunch, TableDelete, TableInsert, TableMeasure, TypeId};

impl Lowerer<'_> {
    pub(crate) fn lower_table_insert(&self, b: &mut Builder<'_>, fx: &mut FnCtx, insert: &TableInsert) {
        let table_store = self.lower_value_ref(b, fx, &insert.table);
        let id_ptr = match &insert.id_out {
            Some(id_ref) => self.lower_value_ref(b, fx, id_ref),
            None => Value::NullPtr {
                ty: Ty::I32.ptr_to(),
            },
        };
        let (num_rows, field_ids) = self.table_shape(b, fx, insert.table.ty);
        let row = self
            .call_core(
                b,
                CoreFn::TableInsert,
                smallvec![table_store.clone(), num_rows, id_ptr],
            )
            .expect("insert yields a row index");

        let table_ty = self.ty(insert.table.ty);
        for (offset, cell) in insert.cells.iter().enumerate() {
            let field_index = offset + 2;
            let field_ty = self.ty(field_ids[offset]);
            let field_store = b.struct_gep(&table_ty, table_store.clone(), field_index);
            let array = b.load(&field_ty.ptr_to(), field_store);
            let elem_store = b.elem_gep(&field_ty, array, row.clone());
            match cell {
                Some(expr) => {
                    let value = self.lower_expr(b, fx, expr);
                    b.store(value, elem_store);
                }
                // A null cell stores the field's zero value.
                None => b.store(Self::zero_value(&field_ty), elem_store),
            }
        }
    }

    pub(crate) fn lower_table_delete(&self, b: &mut Builder<'_>, fx: &mut FnCtx, delete: &TableDelete) {
        let table_store = self.lower_value_ref(b, fx, &delete.table);
        let id = self.lower_expr(b, fx, &delete.id);
        let (num_rows, _) = self.table_shape(b, fx, delete.table.ty);
        self.call_core(b, CoreFn::TableDeleteById, smallvec![table_store, num_rows, id]);
    }

    pub(crate) fn lower_table_measure(&self, b: &mut Builder<'_>, fx: &mut FnCtx, measure: &TableMeasure) {
        let table_store = self.lower_value_ref(b, fx, &measure.table);
        let out_store = self.lower_value_ref(b, fx, &measure.out);
        let (num_rows, _) = self.table_shape(b, fx, measure.table.ty);
        let used = self
            .call_core(b, CoreFn::TableGetNumUsed, smallvec![table_store, num_rows])
            .expect("measure yields a count");
        b.store(used, out_store);
    }

    pub(crate) fn lower_table_crunch(&self, b: &mut Builder<'_>, fx: &mut FnCtx, crunch: &TableCrunch) {
        let table_store = self.lower_value_ref(b, fx, &crunch.table);
        let id_ptr = match &crunch.top_out {
            Some(out) => self.lower_value_ref(b, fx, out),
            None => Value::NullPtr {
                ty: Ty::I32.ptr_to(),
            },
        };
        let (num_rows, field_ids) = self.table_shape(b, fx, crunch.table.ty);
        let declared = field_ids.len();
        let declared_value = Value::const_i32(i64::try_from(declared).expect("field count fits i64"));

        // The helper compacts with per-field element sizes supplied
        // through a stack array.
        let sizes = b.alloca_n(&Ty::I32, declared_value.clone());
        for (offset, field_id) in field_ids.iter().enumerate() {
            let field_ty = self.ty(*field_id);
            let slot = b.elem_gep(
                &Ty::I32,
                sizes.clone(),
                Value::const_i32(i64::try_from(offset).expect("field offset fits i64")),
            );
            b.store(
                Value::const_i32(i64::try_from(field_ty.alloc_size()).expect("field size fits i64")),
                slot,
            );
        }
        self.call_core(
            b,
            CoreFn::TableCrunch,
            smallvec![table_store, num_rows, declared_value, sizes, id_ptr],
        );
    }

    /// The row count (lowered at this use site) and the declared field
    /// type ids, `id`/`use` excluded.
    fn table_shape(&self, b: &mut Builder<'_>, fx: &mut FnCtx, table_ty: TypeId) -> (Value, Vec<TypeId>) {
        let table = self.bundle.types.as_table(table_ty).expect("table operation on a table");
        let field_ids: Vec<TypeId> = table.fields[2..].iter().map(|f| f.ty).collect();
        let num_rows = self.lower_expr(b, fx, &table.num_rows);
        (num_rows, field_ids)
    }
}

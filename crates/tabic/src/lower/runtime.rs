//! The fixed set of runtime helpers the lowerer calls.
//!
//! These are declared, never defined: the linked `tabi_core` runtime
//! provides them. A table is passed as a pointer to its first field
//! pointer, so every table parameter is `ptr` here.

use crate::ir::{FnDecl, Ty};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreFn {
    /// `core_table_init(table, numRows)` zeros every `use` cell.
    TableInit,
    /// `core_table_insertRow(table, numRows, idOut) -> row`; claims the
    /// first free row with the smallest unused id, `-1` when full.
    TableInsert,
    /// `core_table_getRowByID(table, numRows, id) -> row`; claims a free
    /// row with the requested id when absent.
    TableGetById,
    /// `core_table_deleteRowByID(table, numRows, id)`.
    TableDeleteById,
    /// `core_table_getNumUsed(table, numRows) -> count`.
    TableGetNumUsed,
    /// `core_table_crunch(table, numRows, numFields, fieldSizes, topOut)`
    /// compacts used rows to the top, preserving order.
    TableCrunch,
    /// `core_alloc(numBytes) -> ptr`.
    Alloc,
    /// `core_dealloc(ptr)`.
    Dealloc,
    /// `core_memcpy(dest, src, numBytes)`.
    MemCpy,
}

impl CoreFn {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::TableInit => "core_table_init",
            Self::TableInsert => "core_table_insertRow",
            Self::TableGetById => "core_table_getRowByID",
            Self::TableDeleteById => "core_table_deleteRowByID",
            Self::TableGetNumUsed => "core_table_getNumUsed",
            Self::TableCrunch => "core_table_crunch",
            Self::Alloc => "core_alloc",
            Self::Dealloc => "core_dealloc",
            Self::MemCpy => "core_memcpy",
        }
    }

    pub fn decl(self) -> FnDecl {
        let ptr = Ty::I8.ptr_to();
        let int = Ty::I32;
        match self {
            Self::TableInit => FnDecl {
                params: vec![ptr, int],
                ret: Ty::Void,
            },
            Self::TableInsert => FnDecl {
                params: vec![ptr.clone(), int.clone(), Ty::I32.ptr_to()],
                ret: Ty::I32,
            },
            Self::TableGetById => FnDecl {
                params: vec![ptr, int.clone(), Ty::I32],
                ret: Ty::I32,
            },
            Self::TableDeleteById => FnDecl {
                params: vec![ptr, int.clone(), Ty::I32],
                ret: Ty::Void,
            },
            Self::TableGetNumUsed => FnDecl {
                params: vec![ptr, int],
                ret: Ty::I32,
            },
            Self::TableCrunch => FnDecl {
                params: vec![ptr, int.clone(), Ty::I32, Ty::I32.ptr_to(), Ty::I32.ptr_to()],
                ret: Ty::Void,
            },
            Self::Alloc => FnDecl {
                params: vec![int],
                ret: ptr,
            },
            Self::Dealloc => FnDecl {
                params: vec![ptr],
                ret: Ty::Void,
            },
            Self::MemCpy => FnDecl {
                params: vec![ptr.clone(), ptr, int],
                ret: Ty::Void,
            },
        }
    }
}

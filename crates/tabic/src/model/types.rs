//! The type side of the model: one enum over every type class, owned by
//! a bundle-wide arena.
//!
//! Primitives are pre-seeded at fixed low indices so `TypeId::INT` etc.
//! are plain constants and never need lookup. Composite types created
//! during elaboration (addresses, vectors, tables) are appended behind
//! them; named collection and alias types are allocated shallow by the
//! creation pass and filled in by the elaborator.

use indexmap::IndexMap;
use strum::{Display, EnumString};

use super::{Expression, SlabId, TypeId};
use crate::tree;

/// The primitive types, spelled exactly as their source keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
pub enum Primitive {
    Int,
    Short,
    Long,
    Size,
    Float,
    Double,
    Char,
    Truth,
    None,
}

/// One member of a collection type, recorded with its declaration index
/// because member references address struct fields by position.
#[derive(Debug, Clone)]
pub struct CollectionMember {
    pub ty: TypeId,
    pub index: usize,
}

/// A user-declared record with ordered named fields.
#[derive(Debug)]
pub struct CollectionType {
    pub name: String,
    pub host: SlabId,
    /// The defining tree node, consumed by the elaborator.
    pub node: tree::Node,
    /// Filled by the elaborator; empty until then.
    pub members: IndexMap<String, CollectionMember>,
    pub elaborated: bool,
}

/// A pointer to a value of the inner type.
#[derive(Debug)]
pub struct AddressType {
    pub points_to: TypeId,
}

/// An array of elements. `num_elem` is evaluated at each use site; when
/// absent the vector is fuzzy: a bare pointer with no owned storage that
/// must be labeled to existing memory before use.
#[derive(Debug)]
pub struct VectorType {
    pub elem: TypeId,
    pub num_elem: Option<Expression>,
}

#[derive(Debug)]
pub struct TableField {
    pub name: String,
    pub ty: TypeId,
}

/// A column-major record-set. `fields` always starts with the two
/// implicit `id` and `use` columns, both `Int`; `num_rows` is evaluated
/// at each use site.
#[derive(Debug)]
pub struct TableType {
    pub fields: Vec<TableField>,
    pub num_rows: Expression,
}

impl TableType {
    /// Number of user-declared fields, excluding `id` and `use`.
    pub fn declared_fields(&self) -> usize {
        self.fields.len() - 2
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// A named transparent indirection to another type. The target is
/// resolved by the elaborator; `types_match` and every class query chase
/// the chain, so no slot is ever overwritten in place.
#[derive(Debug)]
pub struct AliasType {
    pub name: String,
    pub host: SlabId,
    pub node: tree::Node,
    pub target: Option<TypeId>,
    /// Set while the target is being resolved, to detect alias cycles.
    pub resolving: bool,
}

#[derive(Debug)]
pub enum Type {
    Primitive(Primitive),
    Collection(CollectionType),
    Address(AddressType),
    Vector(VectorType),
    Table(TableType),
    Alias(AliasType),
}

/// All primitives in arena-seeding order. The position of each entry is
/// its fixed `TypeId` index.
const SEEDED: [Primitive; 9] = [
    Primitive::Int,
    Primitive::Short,
    Primitive::Long,
    Primitive::Size,
    Primitive::Float,
    Primitive::Double,
    Primitive::Char,
    Primitive::Truth,
    Primitive::None,
];

impl TypeId {
    pub const INT: TypeId = TypeId::well_known(0);
    pub const SHORT: TypeId = TypeId::well_known(1);
    pub const LONG: TypeId = TypeId::well_known(2);
    pub const SIZE: TypeId = TypeId::well_known(3);
    pub const FLOAT: TypeId = TypeId::well_known(4);
    pub const DOUBLE: TypeId = TypeId::well_known(5);
    pub const CHAR: TypeId = TypeId::well_known(6);
    pub const TRUTH: TypeId = TypeId::well_known(7);
    pub const NONE: TypeId = TypeId::well_known(8);

    const fn well_known(index: u32) -> Self {
        Self(index)
    }
}

/// Bundle-owned storage for every type in the compilation.
#[derive(Debug)]
pub struct TypeArena {
    items: Vec<Type>,
}

impl TypeArena {
    pub fn new() -> Self {
        let items = SEEDED.iter().map(|p| Type::Primitive(*p)).collect();
        Self { items }
    }

    pub fn get(&self, id: TypeId) -> &Type {
        &self.items[id.index()]
    }

    pub fn get_mut(&mut self, id: TypeId) -> &mut Type {
        &mut self.items[id.index()]
    }

    pub fn alloc(&mut self, ty: Type) -> TypeId {
        let id = TypeId::from_index(self.items.len());
        self.items.push(ty);
        id
    }

    pub fn primitive(&self, primitive: Primitive) -> TypeId {
        let index = SEEDED.iter().position(|p| *p == primitive).expect("seeded primitive");
        TypeId::from_index(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Follows alias indirections to the underlying type id. Unresolved
    /// aliases (only possible mid-elaboration) are returned as-is, and
    /// the walk is bounded so a reported alias cycle cannot hang later
    /// queries.
    pub fn resolve(&self, id: TypeId) -> TypeId {
        let mut current = id;
        for _ in 0..self.items.len() {
            match self.get(current) {
                Type::Alias(alias) => match alias.target {
                    Some(target) => current = target,
                    None => return current,
                },
                _ => return current,
            }
        }
        current
    }

    pub fn as_primitive(&self, id: TypeId) -> Option<Primitive> {
        match self.get(self.resolve(id)) {
            Type::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_address(&self, id: TypeId) -> Option<&AddressType> {
        match self.get(self.resolve(id)) {
            Type::Address(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_vector(&self, id: TypeId) -> Option<&VectorType> {
        match self.get(self.resolve(id)) {
            Type::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_table(&self, id: TypeId) -> Option<&TableType> {
        match self.get(self.resolve(id)) {
            Type::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_collection(&self, id: TypeId) -> Option<&CollectionType> {
        match self.get(self.resolve(id)) {
            Type::Collection(c) => Some(c),
            _ => None,
        }
    }

    /// Whether values of this type own dynamic storage: a sized vector, a
    /// table, or a collection containing either. Drives context
    /// initialization and stacked/heaped payload allocation.
    pub fn owns_dynamic_storage(&self, id: TypeId) -> bool {
        match self.get(self.resolve(id)) {
            Type::Vector(v) => v.num_elem.is_some(),
            Type::Table(_) => true,
            Type::Collection(c) => c.members.values().any(|m| self.owns_dynamic_storage(m.ty)),
            _ => false,
        }
    }

    /// The type equivalence relation used by every check in the
    /// elaborator. Aliases are chased on both sides; primitives and
    /// collections compare by identity; addresses compare recursively on
    /// their pointee; vectors and tables match at class level without
    /// descending into element or field types.
    pub fn types_match(&self, a: TypeId, b: TypeId) -> bool {
        let a = self.resolve(a);
        let b = self.resolve(b);
        match (self.get(a), self.get(b)) {
            (Type::Primitive(_), Type::Primitive(_)) | (Type::Collection(_), Type::Collection(_)) => a == b,
            (Type::Address(x), Type::Address(y)) => self.types_match(x.points_to, y.points_to),
            (Type::Vector(_), Type::Vector(_)) | (Type::Table(_), Type::Table(_)) => true,
            _ => false,
        }
    }

    /// Human-readable rendering for diagnostics.
    pub fn describe(&self, id: TypeId) -> String {
        match self.get(id) {
            Type::Primitive(p) => p.to_string(),
            Type::Collection(c) => c.name.clone(),
            Type::Address(a) => format!("Addr[{}]", self.describe(a.points_to)),
            Type::Vector(v) => {
                if v.num_elem.is_some() {
                    format!("Vec[{}, ..]", self.describe(v.elem))
                } else {
                    format!("Vec[{}]", self.describe(v.elem))
                }
            }
            Type::Table(t) => {
                let fields: Vec<String> = t.fields[2..]
                    .iter()
                    .map(|f| format!("{}: {}", f.name, self.describe(f.ty)))
                    .collect();
                format!("Table[{}; ..]", fields.join(", "))
            }
            Type::Alias(a) => a.name.clone(),
        }
    }
}

impl Default for TypeArena {
    fn default() -> Self {
        Self::new()
    }
}

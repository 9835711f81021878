//! The type pool: storage, deduplication, and the abstract layout oracle.

use rustc_hash::FxHashMap;

use crate::TypeId;

/// Structural description of a type.
///
/// Records are nominal: two records with the same parts but different
/// names intern to different entries.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeData {
    /// 64-bit signed integer.
    Int,
    /// 64-bit floating point.
    Float,
    /// Boolean.
    Bool,
    /// The unit type.
    Unit,
    /// The bottom type.
    Never,
    /// A record with named identity and ordered stored parts.
    Record { name: String, parts: Vec<TypeId> },
}

impl TypeData {
    /// The types of this type's stored parts. Empty for non-records.
    pub fn parts(&self) -> &[TypeId] {
        match self {
            TypeData::Record { parts, .. } => parts,
            _ => &[],
        }
    }
}

/// The abstract layout of a type at some record path.
///
/// This is the shape consumed by disaggregation: the type found at the
/// path, plus the types of its stored parts (empty for primitives).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AbstractLayout<'a> {
    /// The type at the queried path.
    pub ty: TypeId,
    /// Types of the stored parts of `ty`, in declaration order.
    pub parts: &'a [TypeId],
}

/// Append-only interner for all types in a compilation.
///
/// Primitives are pre-interned at the fixed indices declared on
/// [`TypeId`]; records are deduplicated through a hash map on their
/// structural description.
pub struct TypePool {
    items: Vec<TypeData>,
    intern_map: FxHashMap<TypeData, TypeId>,
}

impl TypePool {
    /// Create a pool with the primitives pre-interned.
    pub fn new() -> Self {
        let mut pool = Self {
            items: Vec::with_capacity(16),
            intern_map: FxHashMap::default(),
        };
        // Order must match the fixed indices on TypeId.
        for data in [
            TypeData::Int,
            TypeData::Float,
            TypeData::Bool,
            TypeData::Unit,
            TypeData::Never,
        ] {
            pool.intern(data);
        }
        pool
    }

    /// Intern a type, returning its index. Duplicates return the
    /// existing index.
    pub fn intern(&mut self, data: TypeData) -> TypeId {
        if let Some(&id) = self.intern_map.get(&data) {
            return id;
        }
        let raw = u32::try_from(self.items.len())
            .unwrap_or_else(|_| panic!("type count exceeds u32::MAX"));
        let id = TypeId::from_raw(raw);
        self.intern_map.insert(data.clone(), id);
        self.items.push(data);
        id
    }

    /// Intern a record type.
    pub fn record(&mut self, name: &str, parts: Vec<TypeId>) -> TypeId {
        self.intern(TypeData::Record {
            name: name.to_owned(),
            parts,
        })
    }

    /// Look up a type's structural description.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not an index into this pool.
    pub fn data(&self, id: TypeId) -> &TypeData {
        self.items
            .get(id.index())
            .unwrap_or_else(|| panic!("TypeId({}) not in pool", id.raw()))
    }

    /// The stored-part types of `id`. Empty for non-records.
    pub fn parts(&self, id: TypeId) -> &[TypeId] {
        self.data(id).parts()
    }

    /// Resolve the type reached by walking `path` from `ty`.
    ///
    /// # Panics
    ///
    /// Panics if any path step projects a part a type does not have —
    /// that indicates ill-typed IR, which callers must not feed here.
    pub fn type_at(&self, ty: TypeId, path: &[u32]) -> TypeId {
        let mut current = ty;
        for &offset in path {
            let parts = self.parts(current);
            current = *parts.get(offset as usize).unwrap_or_else(|| {
                panic!(
                    "part offset {offset} out of range for {} ({} parts)",
                    current,
                    parts.len(),
                )
            });
        }
        current
    }

    /// The abstract layout at `path` within `ty`: the type found there
    /// and the types of its stored parts.
    ///
    /// # Panics
    ///
    /// Panics on out-of-range path steps (ill-typed IR).
    pub fn abstract_layout(&self, ty: TypeId, path: &[u32]) -> AbstractLayout<'_> {
        let at = self.type_at(ty, path);
        AbstractLayout {
            ty: at,
            parts: self.parts(at),
        }
    }

    /// Number of interned types.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the pool holds no types. Never true in practice: the
    /// primitives are interned on construction.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Default for TypePool {
    fn default() -> Self {
        Self::new()
    }
}

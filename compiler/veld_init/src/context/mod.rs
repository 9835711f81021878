//! The abstract context: what every register holds and what every
//! symbolic cell contains at a program point.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use veld_ir::RegisterKey;
use veld_types::{TypeId, TypePool};

use crate::lattice::Object;
use crate::memory::{Cell, MemoryLocation};

/// What a register holds: the addresses a borrow may resolve to, or an
/// owned rvalue's state.
///
/// A `Locations` set is never empty, and every member appears in the
/// context's memory. Within one set, all cells share the same summary
/// (the locations-of-equal-extent invariant, established by earlier
/// passes); transfer functions probe the first member and apply
/// transitions to all of them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Locations(BTreeSet<MemoryLocation>),
    Object(Object),
}

impl Value {
    /// A location set with a single member.
    pub fn singleton(location: MemoryLocation) -> Value {
        Value::Locations(BTreeSet::from([location]))
    }

    /// The location set, if this is a borrow result.
    pub fn locations(&self) -> Option<&BTreeSet<MemoryLocation>> {
        match self {
            Value::Locations(set) => Some(set),
            Value::Object(_) => None,
        }
    }

    /// Component-wise join: location sets union, objects merge.
    ///
    /// # Panics
    ///
    /// Panics when joining a location set with an object — the IR type
    /// system rules that out, so hitting it means ill-typed IR.
    pub fn merge(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Locations(a), Value::Locations(b)) => {
                Value::Locations(a.union(b).cloned().collect())
            }
            (Value::Object(a), Value::Object(b)) => Value::Object(a.merge(b)),
            _ => panic!("join of a location set with an object (ill-typed IR)"),
        }
    }
}

/// Abstract state at a program point.
///
/// Equality is structural; both maps hold only canonical objects, so
/// structural equality is semantic equality. The empty context stands
/// for "no knowledge" (used for blocks all of whose predecessors are
/// unreachable).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Context {
    /// Register → value, for every register assigned on some path to
    /// this point and live on all of them.
    pub locals: FxHashMap<RegisterKey, Value>,
    /// Location → cell, for every live allocation and bound argument.
    pub memory: FxHashMap<MemoryLocation, Cell>,
}

impl Context {
    /// Merge with another context at a CFG join.
    ///
    /// Locals present in both sides are value-joined; locals missing
    /// from either side are dropped. Memory is unioned, joining cells
    /// that collide.
    ///
    /// # Panics
    ///
    /// Panics if colliding cells disagree on their type — cells never
    /// change type, so this means an earlier pass produced inconsistent
    /// IR.
    #[must_use]
    pub fn merge(&self, other: &Context) -> Context {
        let mut locals = FxHashMap::default();
        for (key, value) in &self.locals {
            if let Some(theirs) = other.locals.get(key) {
                locals.insert(*key, value.merge(theirs));
            }
        }

        let mut memory = self.memory.clone();
        for (location, cell) in &other.memory {
            match memory.entry(location.clone()) {
                std::collections::hash_map::Entry::Occupied(mut entry) => {
                    let mine = entry.get_mut();
                    assert!(
                        mine.ty == cell.ty,
                        "cells at {location:?} merge with different types",
                    );
                    mine.object = mine.object.merge(&cell.object);
                }
                std::collections::hash_map::Entry::Vacant(entry) => {
                    entry.insert(cell.clone());
                }
            }
        }

        Context { locals, memory }
    }

    /// Project the object at `location` and apply `f` to it in place.
    ///
    /// Walking into a sub-location disaggregates `Full` states lazily,
    /// one layout level per path step; after `f` returns, the root
    /// object is re-canonicalized so uniform mutations collapse back to
    /// `Full`.
    ///
    /// # Panics
    ///
    /// Panics if no cell exists at the location's root, or on
    /// projection through [`MemoryLocation::Null`] — both indicate a
    /// bug in an earlier pass or in the caller.
    pub fn with_object<R>(
        &mut self,
        types: &TypePool,
        location: &MemoryLocation,
        f: impl FnOnce(&mut Object) -> R,
    ) -> R {
        let (root, path) = match location {
            MemoryLocation::Null => panic!("projection through the null location"),
            MemoryLocation::Sub { root, path } => (root.as_ref(), path.as_slice()),
            other => (other, &[][..]),
        };
        let cell = self
            .memory
            .get_mut(root)
            .unwrap_or_else(|| panic!("no cell at {root:?}"));

        let mut ty = cell.ty;
        let mut object = &mut cell.object;
        for &offset in path {
            let parts = types.parts(ty);
            assert!(
                !parts.is_empty(),
                "projecting part {offset} of non-record type {ty}",
            );
            object.disaggregate(parts.len());
            let Object::Partial(children) = object else {
                unreachable!("disaggregated object is not partial");
            };
            object = children
                .get_mut(offset as usize)
                .unwrap_or_else(|| panic!("part offset {offset} out of range"));
            ty = parts[offset as usize];
        }

        let result = f(object);
        cell.object.canonicalize();
        result
    }

    /// The object at `location`, by value.
    ///
    /// Pure structural descent: a `Full` state is uniform, so any
    /// sub-location of it is that same state — no disaggregation (and
    /// no layout oracle) is needed to read.
    pub fn object_at(&self, location: &MemoryLocation) -> Object {
        let (root, path) = match location {
            MemoryLocation::Null => panic!("projection through the null location"),
            MemoryLocation::Sub { root, path } => (root.as_ref(), path.as_slice()),
            other => (other, &[][..]),
        };
        let cell = self
            .memory
            .get(root)
            .unwrap_or_else(|| panic!("no cell at {root:?}"));

        let mut object = &cell.object;
        for &offset in path {
            match object {
                Object::Full(_) => return object.clone(),
                Object::Partial(children) => {
                    object = children
                        .get(offset as usize)
                        .unwrap_or_else(|| panic!("part offset {offset} out of range"));
                }
            }
        }
        object.clone()
    }

    /// The type of the object at `location`.
    pub fn type_at(&self, types: &TypePool, location: &MemoryLocation) -> TypeId {
        let root = location.root();
        let cell = self
            .memory
            .get(root)
            .unwrap_or_else(|| panic!("no cell at {root:?}"));
        types.type_at(cell.ty, location.path())
    }
}

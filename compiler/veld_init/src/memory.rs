//! The symbolic memory model: abstract locations and their cells.

use veld_ir::{InstrId, RecordPath};
use veld_types::TypeId;

use crate::lattice::Object;

/// A symbolic address.
///
/// Locations are canonical by construction: a [`Sub`](Self::Sub) always
/// has a non-empty path and a non-`Sub` root, so structural equality
/// (and the derived ordering) is address equality.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemoryLocation {
    /// Sentinel used only for comparisons; projecting through it is a
    /// bug in the caller.
    Null,
    /// The cell bound to parameter `i` under a borrowing convention.
    Arg(u32),
    /// The cell produced by the `alloc_stack` instruction with this id.
    Inst(InstrId),
    /// A sub-location at a record path within `Arg` or `Inst`.
    Sub {
        root: Box<MemoryLocation>,
        path: RecordPath,
    },
}

impl MemoryLocation {
    /// This location extended by `path`, in canonical form.
    ///
    /// Appending the empty path returns the location unchanged;
    /// appending to a `Sub` concatenates paths rather than nesting.
    ///
    /// # Panics
    ///
    /// Panics when projecting through [`Null`](Self::Null).
    #[must_use]
    pub fn appending(&self, path: &RecordPath) -> MemoryLocation {
        if path.is_empty() {
            return self.clone();
        }
        match self {
            MemoryLocation::Null => panic!("projection through the null location"),
            MemoryLocation::Sub {
                root,
                path: existing,
            } => MemoryLocation::Sub {
                root: root.clone(),
                path: existing.appending(path),
            },
            root => MemoryLocation::Sub {
                root: Box::new(root.clone()),
                path: path.clone(),
            },
        }
    }

    /// The root location (`self` unless this is a `Sub`).
    pub fn root(&self) -> &MemoryLocation {
        match self {
            MemoryLocation::Sub { root, .. } => root,
            other => other,
        }
    }

    /// The record path relative to the root. Empty unless this is a
    /// `Sub`.
    pub fn path(&self) -> &[u32] {
        match self {
            MemoryLocation::Sub { path, .. } => path.as_slice(),
            _ => &[],
        }
    }
}

/// An abstract memory location's contents: a type and an object state.
///
/// The type is fixed at cell creation (argument binding or
/// `alloc_stack`) and never changes; only the object evolves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cell {
    pub ty: TypeId,
    pub object: Object,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use veld_ir::RecordPath;

    use super::*;

    fn arg() -> MemoryLocation {
        MemoryLocation::Arg(0)
    }

    #[test]
    fn appending_empty_path_is_identity() {
        assert_eq!(arg().appending(&RecordPath::empty()), arg());
        let sub = arg().appending(&RecordPath::from_slice(&[1]));
        assert_eq!(sub.appending(&RecordPath::empty()), sub);
    }

    #[test]
    fn appending_flattens_nested_subs() {
        let once = arg().appending(&RecordPath::from_slice(&[1]));
        let twice = once.appending(&RecordPath::from_slice(&[0, 2]));
        assert_eq!(
            twice,
            MemoryLocation::Sub {
                root: Box::new(arg()),
                path: RecordPath::from_slice(&[1, 0, 2]),
            },
        );
        assert_eq!(twice.root(), &arg());
        assert_eq!(twice.path(), &[1, 0, 2]);
    }

    #[test]
    #[should_panic(expected = "null location")]
    fn projecting_through_null_panics() {
        let _ = MemoryLocation::Null.appending(&RecordPath::from_slice(&[0]));
    }
}

//! The abstract value lattice: per-object initialization states.
//!
//! An object's state is one of *initialized*, *uninitialized*, or
//! *consumed* — the latter remembering which instructions consumed it,
//! so diagnostics can point at the consumer even across merges. Record
//! objects refine the whole-object view into per-part states lazily,
//! when a sub-path is first projected.
//!
//! # Merge direction
//!
//! The merge operator is *conservative*: uninitialized dominates
//! initialized (reading an object that is dead on one incoming edge
//! must be flagged) and consumed dominates everything (the consumer
//! set is the union of both sides).

use std::collections::BTreeSet;

use veld_ir::{BlockId, InstrId, RecordPath};

/// The program point that consumed an object: an instruction, or a
/// block's terminator (`cond_branch` and `return` consume operands).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Consumer {
    Instr(InstrId),
    Terminator(BlockId),
}

/// State of a whole object (or of a single part).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectState {
    /// The storage holds a live object.
    Initialized,
    /// The storage holds no object.
    Uninitialized,
    /// The object was moved out by the recorded consumers.
    ///
    /// Equality considers the underlying set: two consumed states are
    /// equal iff the same program points consumed them.
    Consumed(BTreeSet<Consumer>),
}

impl ObjectState {
    /// A consumed state with a single consumer.
    pub fn consumed_by(consumer: Consumer) -> Self {
        ObjectState::Consumed(BTreeSet::from([consumer]))
    }

    /// Conservative merge of two states.
    ///
    /// `Initialized` is the identity; `Uninitialized` dominates it;
    /// `Consumed` dominates everything and unions consumer sets.
    pub fn merge(&self, other: &ObjectState) -> ObjectState {
        use ObjectState::*;
        match (self, other) {
            (Initialized, x) | (x, Initialized) => x.clone(),
            (Uninitialized, Uninitialized) => Uninitialized,
            (Uninitialized, Consumed(c)) | (Consumed(c), Uninitialized) => Consumed(c.clone()),
            (Consumed(a), Consumed(b)) => Consumed(a.union(b).cloned().collect()),
        }
    }
}

/// Per-part view of an object of record type.
///
/// `Full(s)` means every part is in state `s`; `Partial` carries one
/// sub-object per stored part and is never empty. A `Partial` whose
/// canonical children are all the same `Full` state canonicalizes back
/// to `Full` — contexts only ever store canonical objects, so
/// structural equality is semantic equality.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Object {
    Full(ObjectState),
    Partial(Vec<Object>),
}

/// Five-way categorization of an object's state, as consumed by
/// transfer functions and diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Summary {
    FullyInitialized,
    FullyUninitialized,
    FullyConsumed(BTreeSet<Consumer>),
    /// Some parts initialized, the rest uninitialized.
    PartiallyInitialized(Vec<RecordPath>),
    /// At least one part consumed; `initialized` lists the live parts.
    PartiallyConsumed {
        consumers: BTreeSet<Consumer>,
        initialized: Vec<RecordPath>,
    },
}

impl Summary {
    /// The paths of initialized parts. The empty path means the whole
    /// object.
    pub fn initialized_paths(&self) -> Vec<RecordPath> {
        match self {
            Summary::FullyInitialized => vec![RecordPath::empty()],
            Summary::FullyUninitialized | Summary::FullyConsumed(_) => vec![],
            Summary::PartiallyInitialized(paths) => paths.clone(),
            Summary::PartiallyConsumed { initialized, .. } => initialized.clone(),
        }
    }
}

fn part_offset(i: usize) -> u32 {
    u32::try_from(i).unwrap_or_else(|_| panic!("record part index exceeds u32::MAX"))
}

impl Object {
    /// A whole-object state.
    pub fn full(state: ObjectState) -> Object {
        Object::Full(state)
    }

    /// A per-part state. `parts` must be non-empty.
    pub fn partial(parts: Vec<Object>) -> Object {
        assert!(!parts.is_empty(), "partial object with no parts");
        Object::Partial(parts)
    }

    /// Refine a `Full` state into `parts` identical sub-objects.
    ///
    /// No-op on objects that are already `Partial` (their arity must
    /// match). Inverse of canonicalization while the parts stay
    /// uniform.
    pub fn disaggregate(&mut self, parts: usize) {
        match self {
            Object::Full(state) => {
                assert!(parts > 0, "disaggregating into zero parts");
                let part = Object::Full(state.clone());
                *self = Object::Partial(vec![part; parts]);
            }
            Object::Partial(existing) => {
                assert!(
                    existing.len() == parts,
                    "object has {} parts, layout has {}",
                    existing.len(),
                    parts,
                );
            }
        }
    }

    /// Rewrite into canonical form: any `Partial` whose children are
    /// all the same `Full` state collapses to that `Full`. Idempotent.
    pub fn canonicalize(&mut self) {
        let collapsed = match self {
            Object::Full(_) => return,
            Object::Partial(parts) => {
                for part in parts.iter_mut() {
                    part.canonicalize();
                }
                match parts.as_slice() {
                    [Object::Full(first), rest @ ..]
                        if rest.iter().all(|p| matches!(p, Object::Full(s) if s == first)) =>
                    {
                        Object::Full(first.clone())
                    }
                    _ => return,
                }
            }
        };
        *self = collapsed;
    }

    /// This object in canonical form.
    #[must_use]
    pub fn canonical(mut self) -> Object {
        self.canonicalize();
        self
    }

    /// Conservative merge, part-wise. The result is canonical.
    ///
    /// # Panics
    ///
    /// Panics if both sides are `Partial` with different arities — the
    /// cells being merged then disagree on layout, which earlier passes
    /// must never produce.
    pub fn merge(&self, other: &Object) -> Object {
        let merged = match (self, other) {
            (Object::Full(a), Object::Full(b)) => Object::Full(a.merge(b)),
            (Object::Full(a), Object::Partial(parts)) => {
                let uniform = Object::Full(a.clone());
                Object::Partial(parts.iter().map(|p| uniform.merge(p)).collect())
            }
            (Object::Partial(parts), Object::Full(b)) => {
                let uniform = Object::Full(b.clone());
                Object::Partial(parts.iter().map(|p| p.merge(&uniform)).collect())
            }
            (Object::Partial(a), Object::Partial(b)) => {
                assert!(
                    a.len() == b.len(),
                    "merged objects have {} and {} parts",
                    a.len(),
                    b.len(),
                );
                Object::Partial(a.iter().zip(b).map(|(x, y)| x.merge(y)).collect())
            }
        };
        merged.canonical()
    }

    /// Categorize this object for transfer functions and diagnostics.
    pub fn summary(&self) -> Summary {
        if let Object::Full(state) = self {
            return match state {
                ObjectState::Initialized => Summary::FullyInitialized,
                ObjectState::Uninitialized => Summary::FullyUninitialized,
                ObjectState::Consumed(c) => Summary::FullyConsumed(c.clone()),
            };
        }

        let mut any_uninitialized = false;
        let mut consumers = BTreeSet::new();
        let mut initialized = Vec::new();
        let mut prefix = Vec::new();
        self.scan(&mut prefix, &mut any_uninitialized, &mut consumers, &mut initialized);

        if consumers.is_empty() {
            if initialized.is_empty() {
                Summary::FullyUninitialized
            } else if any_uninitialized {
                Summary::PartiallyInitialized(initialized)
            } else {
                Summary::FullyInitialized
            }
        } else if initialized.is_empty() && !any_uninitialized {
            Summary::FullyConsumed(consumers)
        } else {
            Summary::PartiallyConsumed {
                consumers,
                initialized,
            }
        }
    }

    fn scan(
        &self,
        prefix: &mut Vec<u32>,
        any_uninitialized: &mut bool,
        consumers: &mut BTreeSet<Consumer>,
        initialized: &mut Vec<RecordPath>,
    ) {
        match self {
            Object::Full(ObjectState::Initialized) => {
                initialized.push(RecordPath::from_slice(prefix));
            }
            Object::Full(ObjectState::Uninitialized) => *any_uninitialized = true,
            Object::Full(ObjectState::Consumed(c)) => consumers.extend(c.iter().copied()),
            Object::Partial(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    prefix.push(part_offset(i));
                    part.scan(prefix, any_uninitialized, consumers, initialized);
                    prefix.pop();
                }
            }
        }
    }

    /// Paths of all initialized parts, in ascending part order.
    pub fn initialized_paths(&self) -> Vec<RecordPath> {
        let mut out = Vec::new();
        self.initialized_into(&mut Vec::new(), &mut out);
        out
    }

    fn initialized_into(&self, prefix: &mut Vec<u32>, out: &mut Vec<RecordPath>) {
        match self {
            Object::Full(ObjectState::Initialized) => out.push(RecordPath::from_slice(prefix)),
            Object::Full(_) => {}
            Object::Partial(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    prefix.push(part_offset(i));
                    part.initialized_into(prefix, out);
                    prefix.pop();
                }
            }
        }
    }

    /// Paths of all parts that hold no live object (uninitialized or
    /// consumed), in ascending part order.
    pub fn uninitialized_or_consumed_paths(&self) -> Vec<RecordPath> {
        let mut out = Vec::new();
        self.uninitialized_or_consumed_into(&mut Vec::new(), &mut out);
        out
    }

    fn uninitialized_or_consumed_into(&self, prefix: &mut Vec<u32>, out: &mut Vec<RecordPath>) {
        match self {
            Object::Full(ObjectState::Initialized) => {}
            Object::Full(_) => out.push(RecordPath::from_slice(prefix)),
            Object::Partial(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    prefix.push(part_offset(i));
                    part.uninitialized_or_consumed_into(prefix, out);
                    prefix.pop();
                }
            }
        }
    }

    /// Paths that are initialized in `self` but not in `other`.
    ///
    /// This is the repair planner for edge reconciliation: each returned
    /// path needs a `load` + `deinit` at the predecessor's tail to bring
    /// `self` down to `other`. Paths come out in ascending part order,
    /// so repairs are deterministic.
    pub fn difference(&self, other: &Object) -> Vec<RecordPath> {
        let mut out = Vec::new();
        Self::difference_into(self, other, &mut Vec::new(), &mut out);
        out
    }

    fn difference_into(a: &Object, b: &Object, prefix: &mut Vec<u32>, out: &mut Vec<RecordPath>) {
        match (a, b) {
            (Object::Full(ObjectState::Initialized), other) => {
                other.uninitialized_or_consumed_into(prefix, out);
            }
            (Object::Full(_), _) => {}
            (Object::Partial(parts), Object::Full(state)) => {
                let uniform = Object::Full(state.clone());
                for (i, part) in parts.iter().enumerate() {
                    prefix.push(part_offset(i));
                    Self::difference_into(part, &uniform, prefix, out);
                    prefix.pop();
                }
            }
            (Object::Partial(parts), Object::Partial(others)) => {
                assert!(
                    parts.len() == others.len(),
                    "differenced objects have {} and {} parts",
                    parts.len(),
                    others.len(),
                );
                for (i, (part, other)) in parts.iter().zip(others).enumerate() {
                    prefix.push(part_offset(i));
                    Self::difference_into(part, other, prefix, out);
                    prefix.pop();
                }
            }
        }
    }
}

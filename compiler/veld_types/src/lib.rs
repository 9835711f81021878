//! Type system for Veld.
//!
//! All types live in a single append-only [`TypePool`] and are referenced
//! by [`TypeId`], a 32-bit index. Equality of types is O(1) index
//! comparison; the pool deduplicates structurally identical entries on
//! interning.
//!
//! The pool also serves as the *abstract layout oracle* for analysis
//! passes: [`TypePool::abstract_layout`] resolves a record path to the
//! type at that path together with the types of its stored parts. The
//! definite-initialization pass uses this to disaggregate whole-object
//! states into per-part states.

mod pool;
mod type_id;

pub use pool::{AbstractLayout, TypeData, TypePool};
pub use type_id::TypeId;

// TypeId is passed by value everywhere; keep it register-sized.
const _: () = assert!(std::mem::size_of::<TypeId>() == 4);

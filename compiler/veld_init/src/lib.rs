//! Definite-initialization analysis for Veld IR.
//!
//! This crate provides:
//!
//! - **The abstract value lattice** ([`ObjectState`], [`Object`],
//!   [`Summary`]) — initialization states with consumer provenance and
//!   lazy per-part refinement.
//! - **The symbolic memory model** ([`MemoryLocation`], [`Cell`]) —
//!   argument slots, stack cells, and record sub-locations.
//! - **The abstract context** ([`Context`], [`Value`]) — per-point
//!   register and memory state with a conservative merge.
//! - **The pass** ([`DefiniteInitialization`]) — a dominator-scheduled
//!   fixed-point driver over the per-opcode transfer functions, with
//!   edge reconciliation that *repairs* the program (inserting `load` +
//!   `deinit`) where initialization states diverge deterministically,
//!   and diagnostics where they cannot be repaired.
//!
//! # Guarantees
//!
//! After a successful run, every read sees initialized storage, every
//! `set` borrow and rebind sees uninitialized storage, and every
//! deallocation sees a dead cell. The pass is idempotent as a program
//! transformer: re-running it on its own output changes nothing.
//!
//! # Crate dependencies
//!
//! `veld_init` depends on `veld_ir` (IR, CFG, dominators), `veld_types`
//! (the abstract layout oracle behind disaggregation), and
//! `veld_diagnostic` (structured errors). It has no knowledge of any
//! other pass.

mod context;
mod eval;
pub mod lattice;
pub mod memory;
mod pass;
mod reconcile;

pub use context::{Context, Value};
pub use lattice::{Consumer, Object, ObjectState, Summary};
pub use memory::{Cell, MemoryLocation};
pub use pass::DefiniteInitialization;

#[cfg(test)]
pub(crate) mod test_helpers;

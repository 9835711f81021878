//! Veld IR — the compiler's typed intermediate representation.
//!
//! This crate provides:
//!
//! - **Source spans** ([`Span`]) — compact byte ranges shared with the
//!   diagnostics crate.
//! - **The block IR** ([`Module`], [`Function`], [`Block`], [`Op`],
//!   [`Terminator`]) — SSA-flavoured basic blocks over a function-wide
//!   instruction arena with stable [`InstrId`] addressing, so analysis
//!   passes can insert instructions without invalidating ids they hold.
//! - **CFG derivatives** ([`graph`]) — predecessor lists, postorder,
//!   and a dominator tree, shared by all passes that walk the CFG.
//!
//! The opcode set is the surface the definite-initialization pass
//! recognizes: explicit `borrow` / `load` / `store` / `deinit` object
//! movement over `alloc_stack` / `dealloc_stack` storage, plus calls
//! with per-argument passing [`Convention`]s.

pub mod graph;
mod ir;
mod span;

pub use ir::{
    Block, BlockId, Constant, Convention, Function, FunctionId, InsertionPoint, Instr, InstrId,
    Module, Op, Operand, Param, RecordPath, RegisterKey, Terminator,
};
pub use span::Span;

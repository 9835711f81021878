//! Diagnostic system for rich error reporting.
//!
//! Design goals:
//! - Error codes for searchability
//! - Clear messages (what went wrong)
//! - Primary span (where it went wrong)
//! - Context labels (why it's wrong)
//!
//! Analysis passes append diagnostics in visit order, which for
//! CFG-driven passes is not source order. [`DiagnosticQueue::flush`]
//! restores source order for display.

mod diagnostic;
mod queue;

pub use diagnostic::{Diagnostic, ErrorCode, Label, Severity};
pub use queue::DiagnosticQueue;

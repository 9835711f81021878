//! The definite-initialization pass driver.
//!
//! # Algorithm
//!
//! Forward abstract interpretation over the CFG with fixed-point
//! iteration, scheduled by the dominator tree:
//!
//! 1. Seed a FIFO work list with the breadth-first preorder of the
//!    dominator tree, so every block is first visited after its
//!    immediate dominator.
//! 2. Per visit, compute the block's before-context — synthesized from
//!    parameter conventions for the entry block, reconciled from
//!    predecessor exits otherwise (possibly repairing predecessors; see
//!    [`reconcile`](crate::reconcile)).
//! 3. If the before-context did not change, the block is done.
//!    Otherwise evaluate the block and decide: done when every
//!    predecessor is done, or when the only pending predecessor is the
//!    block itself and its after-context has stabilized (self-loops);
//!    re-enqueued otherwise.
//!
//! Repair insertions un-done the repaired predecessor and everything
//! done downstream of it, so their effects propagate before the pass
//! concludes. Termination follows from the lattice's finite height and
//! the merge's monotonicity: states only ever move toward
//! uninitialized/consumed, and repairs only push exits in that same
//! direction.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use veld_diagnostic::{Diagnostic, DiagnosticQueue};
use veld_ir::{
    graph::{compute_predecessors, DominatorTree},
    BlockId, Convention, Function, FunctionId, Module, RegisterKey,
};
use veld_types::TypePool;

use crate::context::{Context, Value};
use crate::eval::Evaluator;
use crate::lattice::{Object, ObjectState};
use crate::memory::{Cell, MemoryLocation};
use crate::reconcile::reconcile_edges;

/// The definite-initialization pass.
///
/// Proves that every object is fully initialized at every use, fully
/// uninitialized at every rebind of its storage, and dead at every
/// deallocation — inserting `deinit` (and `load`) instructions where
/// the program can be repaired deterministically, and reporting
/// diagnostics where it cannot.
///
/// Running the pass twice is equivalent to running it once: a second
/// run on a repaired module inserts nothing and reports nothing.
#[derive(Default)]
pub struct DefiniteInitialization {
    diagnostics: DiagnosticQueue,
}

impl DefiniteInitialization {
    /// Create the pass.
    pub fn new() -> Self {
        Self::default()
    }

    /// The pass's display name.
    pub fn name(&self) -> &'static str {
        "Definite initialization"
    }

    /// Diagnostics accumulated so far, in block-visit order.
    ///
    /// Visit order is dominator-BFS with re-enqueues, not source order;
    /// use [`flush_diagnostics`](Self::flush_diagnostics) for display.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.diagnostics.as_slice()
    }

    /// Drain the accumulated diagnostics in source order.
    pub fn flush_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.diagnostics.flush()
    }

    /// Analyze (and possibly repair) one function of `module`.
    ///
    /// Returns `true` on success, in which case the function is
    /// definitely initialized and any repairs have been applied.
    /// Returns `false` if a diagnostic was reported; the module may
    /// carry partial repairs and should be discarded.
    ///
    /// # Panics
    ///
    /// Panics on ill-formed input: unreachable blocks, `yielded`
    /// parameters, type-inconsistent merges. Those are bugs in earlier
    /// passes, not user errors.
    pub fn run(&mut self, module: &mut Module, function: FunctionId, types: &TypePool) -> bool {
        let func = module.function_mut(function);
        func.validate();

        let preds = compute_predecessors(func);
        let doms = DominatorTree::build(func);
        assert!(
            preds[func.entry.index()].is_empty(),
            "function {}: entry block has predecessors",
            func.name,
        );
        for block in func.blocks() {
            assert!(
                doms.is_reachable(block.id),
                "function {}: block {} is unreachable",
                func.name,
                block.id.raw(),
            );
        }

        tracing::debug!(
            function = %func.name,
            blocks = func.num_blocks(),
            "running definite initialization",
        );

        let entry = func.entry;
        let mut work: VecDeque<BlockId> = doms.breadth_first_preorder().into();
        let mut befores: FxHashMap<BlockId, Context> = FxHashMap::default();
        let mut afters: FxHashMap<BlockId, Context> = FxHashMap::default();
        let mut done: FxHashSet<BlockId> = FxHashSet::default();
        let mut visits = 0u32;

        while let Some(block) = work.pop_front() {
            if done.contains(&block) {
                continue;
            }
            visits += 1;

            let new_before = if block == entry {
                entry_context(func)
            } else {
                // A block is ready once its dominator and every forward
                // predecessor have exits to merge; otherwise it waits.
                let idom = doms
                    .immediate_dominator(block)
                    .unwrap_or_else(|| unreachable!("reachable non-entry block has a dominator"));
                let ready = afters.contains_key(&idom)
                    && preds[block.index()]
                        .iter()
                        .all(|p| doms.dominates(block, *p) || afters.contains_key(p));
                if !ready {
                    work.push_back(block);
                    continue;
                }
                let outcome =
                    reconcile_edges(func, types, &doms, &preds[block.index()], &afters);
                for repaired in outcome.repaired {
                    invalidate(func, repaired, &mut done, &mut befores, &mut afters, &mut work);
                }
                outcome.before
            };

            if befores.get(&block) == Some(&new_before) {
                done.insert(block);
                continue;
            }

            let mut context = new_before.clone();
            let result = Evaluator {
                func,
                types,
                diagnostics: &mut self.diagnostics,
            }
            .eval_block(block, &mut context);
            let previous_after = afters.insert(block, context);
            befores.insert(block, new_before);

            if result.is_err() {
                // A diagnostic was reported; anything found past this
                // point would be follow-on noise.
                tracing::debug!(
                    function = %func.name,
                    block = block.raw(),
                    "definite initialization failed",
                );
                return false;
            }

            let pending: Vec<BlockId> = preds[block.index()]
                .iter()
                .copied()
                .filter(|p| !done.contains(p))
                .collect();
            let stabilized = previous_after.as_ref() == afters.get(&block);
            if pending.is_empty() || (pending == [block] && stabilized) {
                done.insert(block);
            } else {
                work.push_back(block);
            }
        }

        tracing::debug!(function = %func.name, visits, "definite initialization converged");
        true
    }
}

/// Synthesize the entry block's before-context from the parameter
/// conventions: borrowing conventions bind an argument cell
/// (uninitialized for `set`), `sink` passes an owned object, and
/// `yielded` cannot reach this pass.
fn entry_context(func: &Function) -> Context {
    let mut context = Context::default();
    for (i, param) in func.params.iter().enumerate() {
        let i = u32::try_from(i).unwrap_or_else(|_| panic!("parameter count exceeds u32::MAX"));
        match param.convention {
            Convention::Let | Convention::Inout | Convention::Set => {
                let state = if param.convention == Convention::Set {
                    ObjectState::Uninitialized
                } else {
                    ObjectState::Initialized
                };
                let location = MemoryLocation::Arg(i);
                context.memory.insert(
                    location.clone(),
                    Cell {
                        ty: param.ty,
                        object: Object::full(state),
                    },
                );
                context
                    .locals
                    .insert(RegisterKey::Param(i), Value::singleton(location));
            }
            Convention::Sink => {
                context.locals.insert(
                    RegisterKey::Param(i),
                    Value::Object(Object::full(ObjectState::Initialized)),
                );
            }
            Convention::Yielded => {
                panic!("function {}: parameter {i} has yielded convention", func.name)
            }
        }
    }
    context
}

/// A repaired predecessor and everything marked done downstream of it
/// must be re-evaluated: drop them from the done set, forget their
/// stored contexts (their exits are stale, and an equality shortcut on
/// a stale before-context would skip the re-evaluation), and put them
/// back on the work list. With the after-context gone, the repaired
/// block counts as unvisited again, so other merges wait for its
/// re-evaluation instead of reading the stale exit.
fn invalidate(
    func: &Function,
    from: BlockId,
    done: &mut FxHashSet<BlockId>,
    befores: &mut FxHashMap<BlockId, Context>,
    afters: &mut FxHashMap<BlockId, Context>,
    work: &mut VecDeque<BlockId>,
) {
    let mut stale = vec![from];
    done.remove(&from);

    let mut stack = vec![from];
    while let Some(block) = stack.pop() {
        for succ in func.block(block).terminator.successors() {
            if done.remove(&succ) {
                stale.push(succ);
                stack.push(succ);
            }
        }
    }

    for block in stale {
        befores.remove(&block);
        afters.remove(&block);
        if !work.contains(&block) {
            work.push_back(block);
        }
    }
}

#[cfg(test)]
mod tests;

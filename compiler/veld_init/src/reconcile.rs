//! Edge reconciliation: computing a block's before-context from its
//! predecessors, and rewriting predecessors whose exits disagree with
//! the merge.
//!
//! The fold half is a plain context merge. The repair half is what
//! makes the pass a program transformer: for every live register whose
//! state at a predecessor's exit is *more initialized* than at the
//! merged entry, `load` + `deinit` pairs (or a bare `deinit` for rvalue
//! registers) go in before that predecessor's terminator, bringing the
//! exit down to the merge. Repaired predecessors must then be
//! re-evaluated, which the driver arranges through its done-set.

use rustc_hash::FxHashMap;

use veld_ir::{
    BlockId, Function, InsertionPoint, Op, Operand, RegisterKey, graph::DominatorTree,
};
use veld_types::TypePool;

use crate::context::{Context, Value};
use crate::lattice::{Object, ObjectState};

/// Result of reconciling one block's incoming edges.
pub(crate) struct ReconcileOutcome {
    /// The block's new before-context.
    pub before: Context,
    /// Predecessors that received repair insertions and must be
    /// re-evaluated.
    pub repaired: Vec<BlockId>,
}

/// Compute `block`'s before-context from its predecessors' exits and
/// repair any visited predecessor that disagrees with the merge.
///
/// Unvisited predecessors (back edges) contribute the after-context of
/// their nearest visited dominator instead — under the driver's
/// dominator-ordered schedule that walk always terminates at a visited
/// block.
pub(crate) fn reconcile_edges(
    func: &mut Function,
    types: &TypePool,
    doms: &DominatorTree,
    preds: &[BlockId],
    afters: &FxHashMap<BlockId, Context>,
) -> ReconcileOutcome {
    // Deduplicated source contexts for the fold.
    let mut sources: Vec<&Context> = Vec::new();
    for &pred in preds {
        let context = source_context(pred, doms, afters);
        if !sources.contains(&context) {
            sources.push(context);
        }
    }

    let before = match sources.as_slice() {
        [] => Context::default(),
        [single] => (*single).clone(),
        [first, rest @ ..] => rest.iter().fold((*first).clone(), |acc, s| acc.merge(s)),
    };

    let mut repaired = Vec::new();
    for &pred in preds {
        let Some(exit) = afters.get(&pred) else {
            continue;
        };
        if repair_predecessor(func, types, pred, exit, &before) {
            repaired.push(pred);
        }
    }

    ReconcileOutcome { before, repaired }
}

/// The after-context that `block` contributes to a merge: its own if it
/// has been visited, otherwise the nearest visited dominator's.
fn source_context<'a>(
    block: BlockId,
    doms: &DominatorTree,
    afters: &'a FxHashMap<BlockId, Context>,
) -> &'a Context {
    let mut current = block;
    loop {
        if let Some(context) = afters.get(&current) {
            return context;
        }
        current = doms.immediate_dominator(current).unwrap_or_else(|| {
            panic!(
                "no visited dominator above block {} during reconciliation",
                current.raw(),
            )
        });
    }
}

/// Insert repairs at `pred`'s tail for every live register whose exit
/// state is more initialized than the merged entry state. Returns
/// whether anything was inserted.
fn repair_predecessor(
    func: &mut Function,
    types: &TypePool,
    pred: BlockId,
    exit: &Context,
    entry: &Context,
) -> bool {
    // Sorted keys so repairs are a pure function of the input module.
    let mut keys: Vec<RegisterKey> = entry.locals.keys().copied().collect();
    keys.sort_unstable();

    let mut changed = false;
    for key in keys {
        let entry_value = &entry.locals[&key];
        let Some(exit_value) = exit.locals.get(&key) else {
            // The merge only retains registers present in every source;
            // a visited predecessor always contributed its own exit.
            debug_assert!(false, "live register {key:?} missing from a visited exit");
            continue;
        };
        match (exit_value, entry_value) {
            (Value::Object(exit_obj), Value::Object(entry_obj)) => {
                if exit_obj != entry_obj {
                    // Rvalue registers never refine per part: a state
                    // divergence here is whole-object.
                    assert!(
                        matches!(exit_obj, Object::Full(_)) && matches!(entry_obj, Object::Full(_)),
                        "divergent rvalue register {key:?} has per-part state at a merge",
                    );
                    // Repairable only when this exit still holds a live
                    // object the merge considers dead. Exits that are
                    // already dead diverge at most in consumer
                    // provenance, which the merge unions on its own.
                    if *exit_obj == Object::full(ObjectState::Initialized) {
                        func.insert(
                            Op::Deinit {
                                object: Operand::Register(key),
                            },
                            None,
                            InsertionPoint::BeforeTerminator(pred),
                        );
                        changed = true;
                    }
                }
            }
            (Value::Locations(exit_locations), Value::Locations(_)) => {
                let Some(probe) = exit_locations.first() else {
                    panic!("register {key:?} holds an empty location set");
                };
                if !exit.memory.contains_key(probe.root()) {
                    // The cell was deallocated on this path; the
                    // register is dead and there is nothing to repair.
                    continue;
                }
                // Locations of equal extent: one member's state stands
                // for the whole set, and one repair through the
                // register fixes every member.
                let exit_obj = exit.object_at(probe);
                let entry_obj = entry.object_at(probe);
                for path in exit_obj.difference(&entry_obj) {
                    let ty = exit.type_at(types, &probe.appending(&path));
                    let load = func.insert(
                        Op::Load {
                            ty,
                            source: Operand::Register(key),
                            path,
                        },
                        None,
                        InsertionPoint::BeforeTerminator(pred),
                    );
                    func.insert(
                        Op::Deinit {
                            object: Operand::result(load),
                        },
                        None,
                        InsertionPoint::BeforeTerminator(pred),
                    );
                    changed = true;
                }
            }
            _ => panic!("register {key:?} merges a location set with an object (ill-typed IR)"),
        }
    }

    if changed {
        tracing::debug!(
            function = %func.name,
            pred = pred.raw(),
            "repaired predecessor exit to match merge",
        );
    }
    changed
}

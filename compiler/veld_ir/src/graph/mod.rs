//! CFG derivatives shared by analysis passes: predecessor lists,
//! traversal orders, and a dominator tree.
//!
//! Passes tend to need these in combination (the definite-initialization
//! driver schedules on the dominator tree and merges over predecessor
//! lists), so they are computed once here, beside the IR, rather than
//! privately inside any single pass.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::{BlockId, Function};

fn block_id(index: usize) -> BlockId {
    BlockId::new(u32::try_from(index).unwrap_or_else(|_| panic!("block count exceeds u32::MAX")))
}

/// Compute the predecessor list for each block (deduplicated).
///
/// Returns a vector indexed by block index, where each entry is the
/// list of distinct predecessor blocks. A conditional branch with both
/// arms on one target contributes a single predecessor entry.
pub fn compute_predecessors(func: &Function) -> Vec<Vec<BlockId>> {
    let num_blocks = func.num_blocks();
    let mut predecessors: Vec<Vec<BlockId>> = vec![Vec::new(); num_blocks];

    for block in func.blocks() {
        let mut seen = FxHashSet::default();
        for succ in block.terminator.successors() {
            if succ.index() < num_blocks && seen.insert(succ) {
                predecessors[succ.index()].push(block.id);
            }
        }
    }

    predecessors
}

/// Postorder of the blocks reachable from the entry.
///
/// Depth-first, driven by an explicit stack of frames (a block paired
/// with its not-yet-explored successors) so that deeply nested CFGs
/// cannot overflow the call stack. A block is emitted once everything
/// explored below it has been emitted; reversing the result gives the
/// reverse postorder the dominator construction sweeps in.
pub fn compute_postorder(func: &Function) -> Vec<usize> {
    let num_blocks = func.num_blocks();
    let mut order = Vec::with_capacity(num_blocks);
    if num_blocks == 0 {
        return order;
    }

    let mut visited = vec![false; num_blocks];
    let mut frames: Vec<(usize, SmallVec<[BlockId; 2]>)> = Vec::new();

    let entry = func.entry.index();
    visited[entry] = true;
    frames.push((entry, func.blocks()[entry].terminator.successors()));

    while !frames.is_empty() {
        let next = frames.last_mut().and_then(|(_, pending)| pending.pop());
        match next {
            Some(succ) => {
                let succ = succ.index();
                if succ < num_blocks && !visited[succ] {
                    visited[succ] = true;
                    frames.push((succ, func.blocks()[succ].terminator.successors()));
                }
            }
            None => {
                // Every successor explored: this block's subtree is
                // complete.
                let (block, _) = frames.pop().unwrap_or_else(|| unreachable!());
                order.push(block);
            }
        }
    }

    order
}

/// Dominator tree over a function's CFG.
///
/// Built with the iterative refinement scheme of Cooper, Harvey and
/// Kennedy ("A Simple, Fast Dominance Algorithm"): sweep the blocks in
/// reverse postorder, replacing each block's dominator candidate by the
/// meet of its predecessors' candidates, until a sweep changes nothing.
/// Lowered functions have shallow loop nests, so this settles within a
/// few sweeps and needs none of the bookkeeping of Lengauer-Tarjan.
pub struct DominatorTree {
    /// Immediate dominator per block index. The entry maps to itself;
    /// unreachable blocks map to `None`.
    idom: Vec<Option<BlockId>>,
    /// The function's entry block.
    entry: BlockId,
}

impl DominatorTree {
    /// Build the dominator tree for a function.
    pub fn build(func: &Function) -> Self {
        let entry = func.entry;
        let num_blocks = func.num_blocks();
        if num_blocks == 0 {
            return Self {
                idom: Vec::new(),
                entry,
            };
        }

        let preds = compute_predecessors(func);
        let order = {
            let mut order = compute_postorder(func);
            order.reverse();
            order
        };

        // Where each block sits in reverse postorder. Unreachable
        // blocks keep the sentinel and never enter a meet.
        let mut position = vec![usize::MAX; num_blocks];
        for (at, &block) in order.iter().enumerate() {
            position[block] = at;
        }

        let mut idom: Vec<Option<BlockId>> = vec![None; num_blocks];
        idom[entry.index()] = Some(entry);

        loop {
            let mut changed = false;
            for &block in order.iter().skip(1) {
                // Meet the candidates of every predecessor processed so
                // far; predecessors without a candidate yet contribute
                // nothing this sweep.
                let candidate = preds[block]
                    .iter()
                    .filter(|p| idom[p.index()].is_some())
                    .fold(None, |acc, p| match acc {
                        None => Some(p.index()),
                        Some(current) => Some(meet(p.index(), current, &idom, &position)),
                    });
                if let Some(found) = candidate.map(block_id) {
                    if idom[block] != Some(found) {
                        idom[block] = Some(found);
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }

        Self { idom, entry }
    }

    /// The immediate dominator of `block`.
    ///
    /// `None` for the entry block and for blocks unreachable from it.
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        if block == self.entry {
            return None;
        }
        self.idom[block.index()]
    }

    /// Whether `block` is reachable from the entry.
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.idom[block.index()].is_some()
    }

    /// Does block `a` dominate block `b`?
    ///
    /// A block dominates itself; the entry dominates every reachable
    /// block. Answered by walking `b`'s dominator chain toward the
    /// entry.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            let Some(dom) = self.idom[current.index()] else {
                return false;
            };
            if dom == current {
                // Reached the entry without passing `a`.
                return false;
            }
            current = dom;
        }
    }

    /// Breadth-first preorder of the dominator tree, starting at the
    /// entry. Contains exactly the reachable blocks; children are
    /// visited in ascending block order.
    ///
    /// This is the order that seeds forward dataflow work lists: a
    /// block's dominator always appears before the block itself.
    pub fn breadth_first_preorder(&self) -> Vec<BlockId> {
        let num_blocks = self.idom.len();
        if num_blocks == 0 {
            return Vec::new();
        }

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); num_blocks];
        for (index, dom) in self.idom.iter().enumerate() {
            if let Some(dom) = dom {
                if dom.index() != index {
                    children[dom.index()].push(index);
                }
            }
        }

        let mut order = Vec::with_capacity(num_blocks);
        let mut queue = VecDeque::new();
        queue.push_back(self.entry.index());
        while let Some(index) = queue.pop_front() {
            order.push(block_id(index));
            queue.extend(children[index].iter().copied());
        }
        order
    }
}

/// The meet of two dominator candidates: the nearest block dominating
/// both.
///
/// Whichever candidate sits later in reverse postorder climbs its own
/// dominator chain one step; alternating climbs land both walks on a
/// common block eventually (at worst the entry, which dominates every
/// reachable block).
fn meet(a: usize, b: usize, idom: &[Option<BlockId>], position: &[usize]) -> usize {
    let (mut a, mut b) = (a, b);
    while a != b {
        if position[a] > position[b] {
            a = climb(a, idom);
        } else {
            b = climb(b, idom);
        }
    }
    a
}

/// One step up the dominator chain.
///
/// Only reachable blocks enter a meet, and their chains always lead to
/// the entry; a missing link means the tree under construction is
/// corrupt.
fn climb(block: usize, idom: &[Option<BlockId>]) -> usize {
    idom[block]
        .unwrap_or_else(|| panic!("dominator meet left the reachable region at block {block}"))
        .index()
}

extern crate bitvec;

use self::bitvec::prelude::*;

use crate::*;

/*
 * Custom type for storing the control flow graph of a function. Successor and
 * predecessor edges are both stored explicitly, so forward and backward
 * traversals are equally cheap. Blocks ending in a return are collected as
 * the exit set - a function may have several.
 */
#[derive(Debug, Clone)]
pub struct CFG {
    succs: Vec<Vec<BlockID>>,
    preds: Vec<Vec<BlockID>>,
    exits: Vec<BlockID>,
}

impl CFG {
    pub fn num_blocks(&self) -> usize {
        self.succs.len()
    }

    pub fn succs(&self, block: BlockID) -> &[BlockID] {
        &self.succs[block.idx()]
    }

    pub fn preds(&self, block: BlockID) -> &[BlockID] {
        &self.preds[block.idx()]
    }

    pub fn exits(&self) -> &[BlockID] {
        &self.exits
    }
}

/*
 * Top level CFG construction routine. Edges come straight from terminators.
 */
pub fn cfg(function: &Function) -> CFG {
    let mut succs: Vec<Vec<BlockID>> = vec![vec![]; function.blocks.len()];
    let mut preds: Vec<Vec<BlockID>> = vec![vec![]; function.blocks.len()];
    let mut exits = vec![];

    for (idx, block) in function.blocks.iter().enumerate() {
        let id = BlockID::new(idx);
        match block.term {
            Terminator::Jump { target } => {
                succs[idx].push(target);
                preds[target.idx()].push(id);
            }
            Terminator::Branch {
                cond: _,
                true_target,
                false_target,
            } => {
                succs[idx].push(true_target);
                preds[true_target.idx()].push(id);
                // A degenerate branch with equal targets contributes one edge.
                if false_target != true_target {
                    succs[idx].push(false_target);
                    preds[false_target.idx()].push(id);
                }
            }
            Terminator::Return { value: _ } => {
                exits.push(id);
            }
        }
    }

    CFG {
        succs,
        preds,
        exits,
    }
}

/*
 * Compute reverse post order of the blocks in a CFG, starting at the entry
 * block. Unreachable blocks don't appear in the order.
 */
pub fn reverse_postorder(cfg: &CFG) -> Vec<BlockID> {
    // Initialize order vector and bitset for tracking which blocks have been
    // visited.
    let order = Vec::with_capacity(cfg.num_blocks());
    let visited = bitvec![u8, Lsb0; 0; cfg.num_blocks()];

    // Order and visited are threaded through arguments / return pair of
    // reverse_postorder_helper for ownership reasons.
    let (mut order, _) = reverse_postorder_helper(BlockID::new(0), cfg, order, visited);

    // Reverse order in-place.
    order.reverse();
    order
}

fn reverse_postorder_helper(
    block: BlockID,
    cfg: &CFG,
    mut order: Vec<BlockID>,
    mut visited: BitVec<u8, Lsb0>,
) -> (Vec<BlockID>, BitVec<u8, Lsb0>) {
    if visited[block.idx()] {
        // If already visited, return early.
        (order, visited)
    } else {
        // Set visited to true.
        visited.set(block.idx(), true);

        // Iterate over successors.
        for succ in cfg.succs(block) {
            (order, visited) = reverse_postorder_helper(*succ, cfg, order, visited);
        }

        // After iterating successors, push this block.
        order.push(block);
        (order, visited)
    }
}

extern crate bitvec;

use std::collections::HashMap;

use self::bitvec::prelude::*;

use crate::*;

/*
 * Custom type for storing a dominator tree. For each block, store its
 * immediate dominator. The same type stores post-dominator trees - those are
 * just dominator trees over the reversed CFG, rooted at a virtual exit block
 * that joins every return block.
 */
#[derive(Debug, Clone)]
pub struct DomTree {
    idom: HashMap<BlockID, BlockID>,
}

impl DomTree {
    pub fn imm_dom(&self, x: BlockID) -> Option<BlockID> {
        self.idom.get(&x).map(|x| x.clone())
    }

    pub fn does_imm_dom(&self, a: BlockID, b: BlockID) -> bool {
        self.imm_dom(b) == Some(a)
    }

    pub fn does_dom(&self, a: BlockID, b: BlockID) -> bool {
        let mut iter = Some(b);

        // Go up dominator tree until finding a, or root of tree.
        while let Some(b) = iter {
            if b == a {
                return true;
            }
            iter = self.imm_dom(b);
        }
        false
    }

    pub fn does_prop_dom(&self, a: BlockID, b: BlockID) -> bool {
        a != b && self.does_dom(a, b)
    }
}

/*
 * Top level function for calculating dominator trees. Uses the iterative
 * algorithm from Cooper, Harvey, and Kennedy, "A Simple, Fast Dominance
 * Algorithm".
 */
pub fn dominator(cfg: &CFG) -> DomTree {
    let mut succs: Vec<Vec<BlockID>> = vec![vec![]; cfg.num_blocks()];
    let mut preds: Vec<Vec<BlockID>> = vec![vec![]; cfg.num_blocks()];
    for idx in 0..cfg.num_blocks() {
        succs[idx] = cfg.succs(BlockID::new(idx)).to_vec();
        preds[idx] = cfg.preds(BlockID::new(idx)).to_vec();
    }
    dominator_fixpoint(&succs, &preds, BlockID::new(0))
}

/*
 * Top level function for calculating post-dominator trees. The CFG is
 * reversed, and a virtual exit block (the fake_exit parameter, numbered one
 * past the real blocks) is wired up as the predecessor-side root, with edges
 * to every return block. Blocks that never reach a return (infinite loops)
 * are invisible from the virtual exit, and leaving them out would let a block
 * on a returning path spuriously post-dominate a predecessor of the loop. So
 * the virtual exit is additionally wired to one block of each such region,
 * making a never-returning path count like any other way of leaving.
 */
pub fn postdominator(cfg: &CFG, fake_exit: BlockID) -> DomTree {
    let num_nodes = cfg.num_blocks() + 1;
    assert!(fake_exit.idx() == cfg.num_blocks());
    let mut succs: Vec<Vec<BlockID>> = vec![vec![]; num_nodes];
    let mut preds: Vec<Vec<BlockID>> = vec![vec![]; num_nodes];

    // Reverse the CFG's edges.
    for idx in 0..cfg.num_blocks() {
        let id = BlockID::new(idx);
        for pred in cfg.preds(id) {
            succs[idx].push(*pred);
        }
        for succ in cfg.succs(id) {
            preds[idx].push(*succ);
        }
    }

    // The virtual exit flows into every return block.
    for exit in cfg.exits() {
        succs[fake_exit.idx()].push(*exit);
        preds[exit.idx()].push(fake_exit);
    }

    // Then into every region the return blocks can't see.
    let mut reached = mark_reachable(fake_exit, &succs, bitvec![u8, Lsb0; 0; num_nodes]);
    for idx in 0..cfg.num_blocks() {
        if !reached[idx] {
            let id = BlockID::new(idx);
            succs[fake_exit.idx()].push(id);
            preds[idx].push(fake_exit);
            reached = mark_reachable(id, &succs, reached);
        }
    }

    dominator_fixpoint(&succs, &preds, fake_exit)
}

fn mark_reachable(
    root: BlockID,
    succs: &Vec<Vec<BlockID>>,
    mut reached: BitVec<u8, Lsb0>,
) -> BitVec<u8, Lsb0> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if reached[node.idx()] {
            continue;
        }
        reached.set(node.idx(), true);
        for succ in succs[node.idx()].iter() {
            stack.push(*succ);
        }
    }
    reached
}

/*
 * Shared fixpoint core for both directions. Nodes unreachable from the root
 * get no immediate dominator entry.
 */
fn dominator_fixpoint(
    succs: &Vec<Vec<BlockID>>,
    preds: &Vec<Vec<BlockID>>,
    root: BlockID,
) -> DomTree {
    // Step 1: compute reverse post order from the root, and number the nodes
    // by their position in it.
    let rpo = graph_reverse_postorder(succs, root);
    let mut numbers: Vec<Option<usize>> = vec![None; succs.len()];
    for (number, id) in rpo.iter().enumerate() {
        numbers[id.idx()] = Some(number);
    }

    // Step 2: iterate to the fixpoint. The root's immediate dominator is
    // itself, temporarily, so intersect has a proper tree to climb.
    let mut idom: Vec<Option<BlockID>> = vec![None; succs.len()];
    idom[root.idx()] = Some(root);
    let mut change = true;
    while change {
        change = false;
        for b in rpo[1..].iter() {
            let mut new_idom: Option<BlockID> = None;
            for p in preds[b.idx()].iter() {
                if idom[p.idx()].is_none() {
                    continue;
                }
                new_idom = match new_idom {
                    None => Some(*p),
                    Some(cur) => Some(intersect(*p, cur, &idom, &numbers)),
                };
            }
            if new_idom.is_some() && idom[b.idx()] != new_idom {
                idom[b.idx()] = new_idom;
                change = true;
            }
        }
    }

    // Step 3: pack the solution into a tree. The root is left out, so that
    // imm_dom walks terminate there.
    let mut tree = HashMap::new();
    for idx in 0..succs.len() {
        let id = BlockID::new(idx);
        if id == root {
            continue;
        }
        if let Some(dom) = idom[idx] {
            tree.insert(id, dom);
        }
    }
    DomTree { idom: tree }
}

/*
 * Walk two nodes up the in-progress dominator tree until they meet. Nodes
 * are compared by reverse post order number, per the paper.
 */
fn intersect(
    mut a: BlockID,
    mut b: BlockID,
    idom: &Vec<Option<BlockID>>,
    numbers: &Vec<Option<usize>>,
) -> BlockID {
    while a != b {
        while numbers[a.idx()].unwrap() > numbers[b.idx()].unwrap() {
            a = idom[a.idx()].unwrap();
        }
        while numbers[b.idx()].unwrap() > numbers[a.idx()].unwrap() {
            b = idom[b.idx()].unwrap();
        }
    }
    a
}

/*
 * Reverse post order over an explicit adjacency list, for the dominator
 * fixpoint's internal graphs. cfg::reverse_postorder only handles the
 * forward CFG from the entry block.
 */
fn graph_reverse_postorder(succs: &Vec<Vec<BlockID>>, root: BlockID) -> Vec<BlockID> {
    let order = Vec::with_capacity(succs.len());
    let visited = bitvec![u8, Lsb0; 0; succs.len()];
    let (mut order, _) = graph_rpo_helper(root, succs, order, visited);
    order.reverse();
    order
}

fn graph_rpo_helper(
    node: BlockID,
    succs: &Vec<Vec<BlockID>>,
    mut order: Vec<BlockID>,
    mut visited: BitVec<u8, Lsb0>,
) -> (Vec<BlockID>, BitVec<u8, Lsb0>) {
    if visited[node.idx()] {
        (order, visited)
    } else {
        visited.set(node.idx(), true);
        for succ in succs[node.idx()].iter() {
            (order, visited) = graph_rpo_helper(*succ, succs, order, visited);
        }
        order.push(node);
        (order, visited)
    }
}

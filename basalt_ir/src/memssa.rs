use std::collections::HashMap;

use crate::*;

/*
 * The memory effect graph: one node per memory-effecting instruction,
 * mirroring data flow through memory the way SSA mirrors data flow through
 * registers. Def nodes wrap stores, Use nodes wrap loads and calls (calls
 * are opaque - their footprint can't be derived), and a Merge node sits at
 * the entry of every block with more than one CFG predecessor.
 *
 * Def and Use nodes have exactly one defining predecessor: the nearest
 * earlier effect node in program order, or the block's entry state when the
 * instruction is the first effect in its block. Restricted to any path that
 * doesn't cross a Merge, the defining-predecessor relation is acyclic and
 * totally ordered by program order.
 */
#[derive(Debug, Clone)]
pub enum MemoryNode {
    Def {
        inst: InstID,
    },
    Use {
        inst: InstID,
    },
    Merge {
        block: BlockID,
        preds: Box<[(BlockID, MemoryNodeID)]>,
    },
}

impl MemoryNode {
    pub fn is_def(&self) -> bool {
        if let MemoryNode::Def { inst: _ } = self {
            true
        } else {
            false
        }
    }

    pub fn inst(&self) -> Option<InstID> {
        match self {
            MemoryNode::Def { inst } | MemoryNode::Use { inst } => Some(*inst),
            MemoryNode::Merge { block: _, preds: _ } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemorySSA {
    nodes: Vec<MemoryNode>,
    defining: Vec<Option<MemoryNodeID>>,
    containing_block: Vec<BlockID>,
    node_of_inst: HashMap<InstID, MemoryNodeID>,
    defs: Vec<MemoryNodeID>,
    live: Vec<bool>,
}

/*
 * Top level memory effect graph construction. Blocks are visited in reverse
 * post order, so the exit state of every non-back-edge predecessor is known
 * by the time a block is processed; back edges only ever target blocks with
 * multiple predecessors, which get a Merge node up front, so their entry
 * state never depends on an unprocessed block. Merge incoming edges are
 * filled in afterwards, once every block's exit state is known. Unreachable
 * blocks get no nodes at all.
 */
pub fn memory_ssa(function: &Function, cfg: &CFG) -> MemorySSA {
    let rpo = reverse_postorder(cfg);
    let mut ssa = MemorySSA {
        nodes: vec![],
        defining: vec![],
        containing_block: vec![],
        node_of_inst: HashMap::new(),
        defs: vec![],
        live: vec![],
    };

    // Step 1: place a Merge at every reachable block with several
    // predecessors. Placement is deliberately unpruned - a Merge nothing
    // flows into is harmless, and pruning only ever helps precision, not
    // soundness.
    let mut merge_of_block: Vec<Option<MemoryNodeID>> = vec![None; function.blocks.len()];
    for block in rpo.iter() {
        if cfg.preds(*block).len() >= 2 {
            let id = ssa.push_node(
                MemoryNode::Merge {
                    block: *block,
                    preds: Box::new([]),
                },
                None,
                *block,
            );
            merge_of_block[block.idx()] = Some(id);
        }
    }

    // Step 2: thread each block's instructions into the effect chain.
    let mut exit_state: Vec<Option<MemoryNodeID>> = vec![None; function.blocks.len()];
    for block in rpo.iter() {
        let mut state = match merge_of_block[block.idx()] {
            Some(merge) => Some(merge),
            None => match cfg.preds(*block) {
                [pred] => exit_state[pred.idx()],
                _ => None,
            },
        };
        for (index, inst) in function.blocks[block.idx()].insts.iter().enumerate() {
            if !inst.has_memory_effect() {
                continue;
            }
            let inst_id = InstID::new(*block, index);
            let node = if inst.is_store() {
                MemoryNode::Def { inst: inst_id }
            } else {
                MemoryNode::Use { inst: inst_id }
            };
            let id = ssa.push_node(node, state, *block);
            ssa.node_of_inst.insert(inst_id, id);
            if inst.is_store() {
                ssa.defs.push(id);
            }
            state = Some(id);
        }
        exit_state[block.idx()] = state;
    }

    // Step 3: wire up Merge incoming edges from predecessor exit states.
    // Predecessors with no prior memory effect contribute nothing.
    for block in rpo.iter() {
        if let Some(merge) = merge_of_block[block.idx()] {
            let preds: Vec<(BlockID, MemoryNodeID)> = cfg
                .preds(*block)
                .iter()
                .filter_map(|pred| exit_state[pred.idx()].map(|state| (*pred, state)))
                .collect();
            ssa.nodes[merge.idx()] = MemoryNode::Merge {
                block: *block,
                preds: preds.into_boxed_slice(),
            };
        }
    }

    ssa
}

impl MemorySSA {
    fn push_node(
        &mut self,
        node: MemoryNode,
        defining: Option<MemoryNodeID>,
        block: BlockID,
    ) -> MemoryNodeID {
        let id = MemoryNodeID::new(self.nodes.len());
        self.nodes.push(node);
        self.defining.push(defining);
        self.containing_block.push(block);
        self.live.push(true);
        id
    }

    pub fn node(&self, id: MemoryNodeID) -> &MemoryNode {
        &self.nodes[id.idx()]
    }

    pub fn node_of(&self, inst: InstID) -> Option<MemoryNodeID> {
        self.node_of_inst.get(&inst).map(|id| *id)
    }

    /*
     * One hop back along the effect chain.
     */
    pub fn defining_pred(&self, id: MemoryNodeID) -> Option<MemoryNodeID> {
        self.defining[id.idx()]
    }

    pub fn containing_block(&self, id: MemoryNodeID) -> BlockID {
        self.containing_block[id.idx()]
    }

    /*
     * All Def nodes, in program order of the reverse post order block walk.
     */
    pub fn defs(&self) -> &[MemoryNodeID] {
        &self.defs
    }

    pub fn is_live(&self, id: MemoryNodeID) -> bool {
        self.live[id.idx()]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (MemoryNodeID, &MemoryNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(idx, _)| self.live[*idx])
            .map(|(idx, node)| (MemoryNodeID::new(idx), node))
    }

    /*
     * The nearest earlier access a Def may conflict with. Walks the defining
     * chain and returns the first node it cannot prove non-conflicting: a
     * Def or Use whose location overlaps, an opaque call that may reach the
     * store's target, or a Merge, beyond which nothing is knowable from a
     * flat walk. Returns None
     * when the chain runs out with no conflict - the store is the first
     * relevant access on its path.
     */
    pub fn nearest_conflicting_pred(
        &self,
        function: &Function,
        alias: &AliasAnalysis,
        def: MemoryNodeID,
    ) -> Option<MemoryNodeID> {
        let loc = match self.node(def) {
            MemoryNode::Def { inst } => alias.location_of(function.inst(*inst)),
            _ => None,
        }?;

        let mut iter = self.defining_pred(def);
        while let Some(cur) = iter {
            match self.node(cur) {
                MemoryNode::Def { inst } | MemoryNode::Use { inst } => {
                    match alias.location_of(function.inst(*inst)) {
                        Some(other) => {
                            if alias.classify(&loc, &other) != AliasRelation::NoOverlap {
                                return Some(cur);
                            }
                        }
                        // Opaque call. Conflicts with everything the callee
                        // could possibly reach.
                        None => {
                            if alias.call_may_access(&loc) {
                                return Some(cur);
                            }
                        }
                    }
                }
                MemoryNode::Merge { block: _, preds: _ } => return Some(cur),
            }
            iter = self.defining_pred(cur);
        }
        None
    }

    /*
     * Splice a node out of the graph after its instruction is deleted: every
     * node whose defining predecessor was the removed node is re-linked to
     * the removed node's own defining predecessor, and Merge incoming edges
     * are rerouted the same way, so chain connectivity survives for anything
     * walked afterwards. The node's slot stays allocated (IDs are indices),
     * it just stops being live.
     */
    pub fn remove_node(&mut self, id: MemoryNodeID) {
        let replacement = self.defining[id.idx()];
        for defining in self.defining.iter_mut() {
            if *defining == Some(id) {
                *defining = replacement;
            }
        }
        for idx in 0..self.nodes.len() {
            let rerouted = if let MemoryNode::Merge { block, preds } = &self.nodes[idx] {
                if preds.iter().any(|(_, pred)| *pred == id) {
                    let preds: Vec<(BlockID, MemoryNodeID)> = preds
                        .iter()
                        .filter_map(|(pred_block, pred)| {
                            if *pred == id {
                                replacement.map(|replacement| (*pred_block, replacement))
                            } else {
                                Some((*pred_block, *pred))
                            }
                        })
                        .collect();
                    Some((*block, preds))
                } else {
                    None
                }
            } else {
                None
            };
            if let Some((block, preds)) = rerouted {
                self.nodes[idx] = MemoryNode::Merge {
                    block,
                    preds: preds.into_boxed_slice(),
                };
            }
        }
        if let Some(inst) = self.nodes[id.idx()].inst() {
            self.node_of_inst.remove(&inst);
        }
        self.defs.retain(|def| *def != id);
        self.live[id.idx()] = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryNodeID(u32);

impl MemoryNodeID {
    pub fn new(x: usize) -> Self {
        MemoryNodeID(x as u32)
    }

    pub fn idx(&self) -> usize {
        self.0 as usize
    }
}

#[cfg(test)]
mod tests {
    use crate::*;

    fn build(text: &str) -> (Module, CFG, MemorySSA) {
        let module = parse(text).unwrap();
        let cfg = cfg(&module.functions[0]);
        let ssa = memory_ssa(&module.functions[0], &cfg);
        (module, cfg, ssa)
    }

    #[test]
    fn straight_line_chain() {
        let (_, _, ssa) = build(
            "
fn chain(p)
entry:
  one = constant(i64, 1)
  store(p, one, 8)
  x = load(p, 8)
  store(p, x, 8)
  ret()
",
        );
        // Def, Use, Def, threaded in program order.
        assert_eq!(ssa.defs().len(), 2);
        let first = ssa.node_of(InstID::new(BlockID::new(0), 1)).unwrap();
        let load = ssa.node_of(InstID::new(BlockID::new(0), 2)).unwrap();
        let second = ssa.node_of(InstID::new(BlockID::new(0), 3)).unwrap();
        assert_eq!(ssa.defining_pred(first), None);
        assert_eq!(ssa.defining_pred(load), Some(first));
        assert_eq!(ssa.defining_pred(second), Some(load));
    }

    #[test]
    fn merge_at_join_block() {
        let (_, _, ssa) = build(
            "
fn diamond(p, c)
entry:
  br(c, then, els)
then:
  store(p, c, 8)
  jmp(join)
els:
  store(p, c, 8)
  jmp(join)
join:
  store(p, c, 8)
  ret()
",
        );
        let join_store = ssa.node_of(InstID::new(BlockID::new(3), 0)).unwrap();
        let merge = ssa.defining_pred(join_store).unwrap();
        match ssa.node(merge) {
            MemoryNode::Merge { block, preds } => {
                assert_eq!(*block, BlockID::new(3));
                assert_eq!(preds.len(), 2);
            }
            _ => panic!("expected a merge at the join block"),
        }
    }

    #[test]
    fn remove_node_splices_chain() {
        let (_, _, ssa) = build(
            "
fn chain(p)
entry:
  one = constant(i64, 1)
  store(p, one, 8)
  store(p, one, 8)
  store(p, one, 8)
  ret()
",
        );
        let mut ssa = ssa;
        let first = ssa.node_of(InstID::new(BlockID::new(0), 1)).unwrap();
        let second = ssa.node_of(InstID::new(BlockID::new(0), 2)).unwrap();
        let third = ssa.node_of(InstID::new(BlockID::new(0), 3)).unwrap();
        ssa.remove_node(second);
        assert!(!ssa.is_live(second));
        assert_eq!(ssa.defining_pred(third), Some(first));
        assert_eq!(ssa.defs().len(), 2);
        ssa.remove_node(first);
        assert_eq!(ssa.defining_pred(third), None);
    }

    #[test]
    fn nodes_iterator_skips_removed() {
        let (_, _, ssa) = build(
            "
fn chain(p)
entry:
  one = constant(i64, 1)
  store(p, one, 8)
  x = load(p, 8)
  store(p, x, 8)
  ret()
",
        );
        let mut ssa = ssa;
        assert_eq!(ssa.nodes().count(), 3);
        let load = ssa.node_of(InstID::new(BlockID::new(0), 2)).unwrap();
        ssa.remove_node(load);
        let remaining: Vec<MemoryNodeID> = ssa.nodes().map(|(id, _)| id).collect();
        assert_eq!(remaining.len(), 2);
        assert!(!remaining.contains(&load));
    }
}

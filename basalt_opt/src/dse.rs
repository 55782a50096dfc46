extern crate basalt_ir;
extern crate log;

use std::collections::HashMap;
use std::collections::HashSet;

use self::basalt_ir::alias::*;
use self::basalt_ir::cfg::*;
use self::basalt_ir::dom::*;
use self::basalt_ir::ir::*;
use self::basalt_ir::memssa::*;

/*
 * Why a store candidate could not be proven dead. Every scanned removable
 * store either contributes to the dead set or gets exactly one of these.
 * Volatile and atomic stores are not scanned at all - they are not candidates
 * on either side of a kill.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /*
     * The effect chain ran out with no conflicting access - the store is the
     * first relevant write on its path.
     */
    NoPriorWrite,
    /*
     * The nearest conflicting access sits behind a merge of several control
     * flow paths, beyond which the flat chain walk doesn't reason.
     */
    MergedPaths,
    /*
     * A load or opaque call between the two stores may observe the earlier
     * value.
     */
    InterveningUse,
    /*
     * The prior conflicting store is volatile or atomic.
     */
    PriorNotRemovable,
    /*
     * The prior store's footprint is not provably the exact same byte range.
     */
    DifferentLocation,
    /*
     * Some path from the prior store to function exit dodges this overwrite
     * and every other overwrite of the same location.
     */
    NotPostDominated,
}

/*
 * What one run of dead store elimination did to one function. The dead list
 * holds instruction IDs as they were before compaction; they don't index into
 * the function once dse returns.
 */
#[derive(Debug, Clone)]
pub struct DseReport {
    pub changed: bool,
    pub eliminated: usize,
    pub dead: Vec<InstID>,
    pub rejections: Vec<(InstID, Rejection)>,
}

/*
 * Top level function to run dead store elimination on a function. A store is
 * dead when later removable stores provably overwrite the exact same byte
 * range on every path to function exit, with nothing in between that may read
 * it.
 *
 * The scan phase walks the Def nodes in reverse program order and treats each
 * removable store as a potential killer: its nearest conflicting predecessor
 * on the effect chain is the only node that can be its victim. A killer whose
 * block post-dominates its victim's block kills outright; killers that only
 * cover one branch arm each kill collectively, when every path out of the
 * victim's block runs into one of them before reaching an exit.
 *
 * The apply phase then gravestones the deduplicated dead set, splices each
 * removed node out of the effect graph, and compacts the blocks once at the
 * end. Nothing is mutated until every candidate has been judged, so no scan
 * decision can be invalidated mid-flight. The caller's analyses over this
 * function are stale afterwards whenever the report says changed.
 */
pub fn dse(
    function: &mut Function,
    cfg: &CFG,
    ssa: &mut MemorySSA,
    alias: &AliasAnalysis,
    postdom: &DomTree,
) -> DseReport {
    // Step 1: scan, pairing each killer with its victim. Rejections that
    // don't depend on control flow coverage are final here.
    let mut rejections = vec![];
    let mut kills: HashMap<InstID, Vec<InstID>> = HashMap::new();
    let mut victims = vec![];
    let defs: Vec<MemoryNodeID> = ssa.defs().to_vec();
    for killer in defs.iter().rev() {
        let killer_inst = match ssa.node(*killer) {
            MemoryNode::Def { inst } => *inst,
            _ => continue,
        };
        if !function.inst(killer_inst).is_removable_store() {
            continue;
        }

        let prior = match ssa.nearest_conflicting_pred(function, alias, *killer) {
            Some(prior) => prior,
            None => {
                rejections.push((killer_inst, Rejection::NoPriorWrite));
                continue;
            }
        };
        let prior_inst = match ssa.node(prior) {
            MemoryNode::Def { inst } => *inst,
            MemoryNode::Use { inst: _ } => {
                rejections.push((killer_inst, Rejection::InterveningUse));
                continue;
            }
            MemoryNode::Merge { block: _, preds: _ } => {
                rejections.push((killer_inst, Rejection::MergedPaths));
                continue;
            }
        };
        if !function.inst(prior_inst).is_removable_store() {
            rejections.push((killer_inst, Rejection::PriorNotRemovable));
            continue;
        }

        // Both locations exist, since both instructions are stores.
        // MustOverlap already means identical offset and identical size.
        let overlap = match (
            alias.location_of(function.inst(killer_inst)),
            alias.location_of(function.inst(prior_inst)),
        ) {
            (Some(a), Some(b)) => alias.classify(&a, &b),
            _ => AliasRelation::MayOverlap,
        };
        if overlap != AliasRelation::MustOverlap {
            rejections.push((killer_inst, Rejection::DifferentLocation));
            continue;
        }

        if !kills.contains_key(&prior_inst) {
            victims.push(prior_inst);
        }
        kills.entry(prior_inst).or_insert_with(Vec::new).push(killer_inst);
    }

    // Step 2: gate each victim on control flow coverage. One post-dominating
    // killer suffices; otherwise the killers must collectively catch every
    // path from the victim's block to an exit.
    let mut dead = vec![];
    for victim in victims {
        let killers = &kills[&victim];
        let killer_blocks: HashSet<BlockID> =
            killers.iter().map(|killer| killer.block).collect();
        let covered = killers
            .iter()
            .any(|killer| postdom.does_dom(killer.block, victim.block))
            || overwritten_on_every_path(cfg, victim.block, &killer_blocks);
        if covered {
            log::debug!(
                "{}: store at {}.{} is dead, overwritten by {} later store(s)",
                function.name,
                victim.block.idx(),
                victim.index,
                killers.len()
            );
            dead.push(victim);
        } else {
            for killer in killers.iter() {
                rejections.push((*killer, Rejection::NotPostDominated));
            }
        }
    }

    // Step 3: apply. Gravestone each dead store and splice its node out of
    // the effect graph, then compact all blocks at once, so instruction IDs
    // stay stable for the whole deletion phase.
    for inst in dead.iter() {
        if let Some(node) = ssa.node_of(*inst) {
            ssa.remove_node(node);
        }
        function.blocks[inst.block.idx()].insts[inst.index] = Instruction::Nop;
    }
    function.delete_gravestones();

    let eliminated = dead.len();
    log::debug!("{}: eliminated {} dead stores", function.name, eliminated);
    DseReport {
        changed: eliminated > 0,
        eliminated,
        dead,
        rejections,
    }
}

/*
 * Does every path leaving the victim's block run into a killer block before
 * reaching an exit? Killer blocks terminate a path safely - the chain walk
 * already proved nothing in them reads the location before the killer runs.
 * Reaching a return, or looping back around to the victim's own block, means
 * some execution escapes with the victim as its final write. So does reaching
 * a block that can never return: an execution stuck there keeps the victim's
 * value live forever, whatever the stuck blocks do with it.
 */
fn overwritten_on_every_path(
    cfg: &CFG,
    victim: BlockID,
    killer_blocks: &HashSet<BlockID>,
) -> bool {
    // Blocks from which some path still reaches a return.
    let mut can_exit = vec![false; cfg.num_blocks()];
    let mut stack: Vec<BlockID> = cfg.exits().to_vec();
    while let Some(block) = stack.pop() {
        if can_exit[block.idx()] {
            continue;
        }
        can_exit[block.idx()] = true;
        for pred in cfg.preds(block) {
            stack.push(*pred);
        }
    }

    let mut stack: Vec<BlockID> = cfg.succs(victim).to_vec();
    let mut visited = HashSet::new();
    while let Some(block) = stack.pop() {
        if killer_blocks.contains(&block) {
            continue;
        }
        if block == victim || cfg.succs(block).is_empty() || !can_exit[block.idx()] {
            return false;
        }
        if !visited.insert(block) {
            continue;
        }
        for succ in cfg.succs(block) {
            stack.push(*succ);
        }
    }
    true
}

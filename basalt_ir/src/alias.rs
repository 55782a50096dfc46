use std::collections::HashSet;

use crate::*;

/*
 * Result of comparing two memory locations. NoOverlap and MustOverlap are
 * proofs; MayOverlap is the absence of one. Everything downstream must treat
 * MayOverlap as "could be either", never as evidence.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasRelation {
    NoOverlap,
    MayOverlap,
    MustOverlap,
}

/*
 * An abstract memory footprint: the root object a pointer was derived from,
 * the constant byte offset from that root if one is known, and the access
 * size in bytes. Locations are only ever compared through
 * AliasAnalysis::classify, never structurally.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub root: Root,
    pub offset: Option<u64>,
    pub size: u64,
}

/*
 * The root object of a pointer. Slot roots are stack allocations, named by
 * the variable the slot instruction defines. Param roots are pointer-valued
 * parameters. Unknown covers pointers produced by arithmetic, loads, calls,
 * or variables with multiple definitions.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    Slot(VarID),
    Param(VarID),
    Unknown,
}

/*
 * The alias oracle for one function. Resolves every variable to a (root,
 * offset) pair up front by chasing single-definition chains through address
 * arithmetic, and tracks which slots escape (their address passed to a call,
 * stored to memory, or returned). All answers are over-approximations:
 * NoOverlap is only reported when disjointness is provable.
 */
#[derive(Debug, Clone)]
pub struct AliasAnalysis {
    roots: Vec<(Root, Option<u64>)>,
    escaped: HashSet<VarID>,
}

pub fn alias_analysis(function: &Function) -> AliasAnalysis {
    let defs = function.definitions();

    // Step 1: resolve every variable to its root and offset.
    let mut roots = vec![(Root::Unknown, None); function.var_names.len()];
    for idx in 0..function.var_names.len() {
        let mut visited = HashSet::new();
        roots[idx] = resolve(VarID::new(idx), function, &defs, &mut visited);
    }

    // Step 2: find escaping slots. A slot whose address is passed to a call,
    // stored as a value, or returned may be read through any unknown pointer
    // afterwards.
    let mut escaped = HashSet::new();
    let mut escape = |var: VarID| {
        if let (Root::Slot(slot), _) = roots[var.idx()] {
            escaped.insert(slot);
        }
    };
    for block in function.blocks.iter() {
        for inst in block.insts.iter() {
            match inst {
                Instruction::Store {
                    ptr: _,
                    value,
                    size: _,
                    volatile: _,
                    atomic: _,
                } => escape(*value),
                Instruction::Call {
                    dst: _,
                    callee: _,
                    args,
                } => {
                    for arg in args.iter() {
                        escape(*arg);
                    }
                }
                // A slot address fed into raw arithmetic can re-emerge as an
                // Unknown-rooted pointer, so it no longer stays private.
                Instruction::Binary {
                    dst: _,
                    left,
                    right,
                    op: _,
                } => {
                    escape(*left);
                    escape(*right);
                }
                _ => {}
            }
        }
        if let Terminator::Return { value: Some(value) } = block.term {
            escape(value);
        }
    }

    AliasAnalysis { roots, escaped }
}

/*
 * Chase a variable back to its root. Only single-definition chains are
 * followed - a variable assigned in two places resolves to Unknown, as does
 * anything data-dependent on a load, call, or full pointer arithmetic. The
 * visited set guards against definition cycles in malformed input.
 */
fn resolve(
    var: VarID,
    function: &Function,
    defs: &Vec<Option<InstID>>,
    visited: &mut HashSet<VarID>,
) -> (Root, Option<u64>) {
    if !visited.insert(var) {
        return (Root::Unknown, None);
    }
    if var.idx() < function.num_params {
        return (Root::Param(var), Some(0));
    }
    let def = match defs[var.idx()] {
        Some(def) => def,
        None => return (Root::Unknown, None),
    };
    match function.inst(def) {
        Instruction::Slot { dst, size: _ } => (Root::Slot(*dst), Some(0)),
        Instruction::Address {
            dst: _,
            base,
            offset,
        } => {
            let (root, base_offset) = resolve(*base, function, defs, visited);
            // An offset sum past u64 is not a constant offset anymore.
            (root, base_offset.and_then(|x| x.checked_add(*offset)))
        }
        _ => (Root::Unknown, None),
    }
}

impl AliasAnalysis {
    /*
     * The location an instruction reads or writes. Calls have none - their
     * footprint can't be bounded, which is exactly why the elimination walk
     * rejects them.
     */
    pub fn location_of(&self, inst: &Instruction) -> Option<Location> {
        match inst {
            Instruction::Load {
                dst: _,
                ptr,
                size,
                volatile: _,
            }
            | Instruction::Store {
                ptr,
                value: _,
                size,
                volatile: _,
                atomic: _,
            } => {
                let (root, offset) = self.roots[ptr.idx()];
                Some(Location {
                    root,
                    offset,
                    size: *size,
                })
            }
            _ => None,
        }
    }

    /*
     * Can an external call read or write this location? Calls can reach
     * anything except a slot whose address never escapes.
     */
    pub fn call_may_access(&self, loc: &Location) -> bool {
        match loc.root {
            Root::Slot(x) => self.escaped.contains(&x),
            _ => true,
        }
    }

    pub fn classify(&self, a: &Location, b: &Location) -> AliasRelation {
        match (a.root, b.root) {
            // Two distinct slots are distinct objects, full stop.
            (Root::Slot(x), Root::Slot(y)) if x != y => AliasRelation::NoOverlap,
            // A slot whose address never escapes can't be reached through a
            // parameter or an unknown pointer.
            (Root::Slot(x), Root::Param(_))
            | (Root::Slot(x), Root::Unknown)
            | (Root::Param(_), Root::Slot(x))
            | (Root::Unknown, Root::Slot(x))
                if !self.escaped.contains(&x) =>
            {
                AliasRelation::NoOverlap
            }
            (Root::Slot(x), Root::Slot(y)) => {
                debug_assert!(x == y);
                self.classify_same_root(a, b)
            }
            (Root::Param(x), Root::Param(y)) if x == y => self.classify_same_root(a, b),
            // Distinct parameters may point anywhere, including at each
            // other's target.
            _ => AliasRelation::MayOverlap,
        }
    }

    /*
     * Same root object: compare byte ranges, when both offsets are known. An
     * end that doesn't fit in u64 can't prove disjointness.
     */
    fn classify_same_root(&self, a: &Location, b: &Location) -> AliasRelation {
        match (a.offset, b.offset) {
            (Some(x), Some(y)) => {
                let a_before_b = x.checked_add(a.size).map_or(false, |end| end <= y);
                let b_before_a = y.checked_add(b.size).map_or(false, |end| end <= x);
                if x == y && a.size == b.size {
                    AliasRelation::MustOverlap
                } else if a_before_b || b_before_a {
                    AliasRelation::NoOverlap
                } else {
                    // Overlapping but unequal ranges - a partial overlap is
                    // still only MayOverlap for consumers that need identity.
                    AliasRelation::MayOverlap
                }
            }
            _ => AliasRelation::MayOverlap,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::*;

    fn analyze(text: &str) -> (Module, AliasAnalysis) {
        let module = parse(text).unwrap();
        let analysis = alias_analysis(&module.functions[0]);
        (module, analysis)
    }

    fn store_location(
        module: &Module,
        analysis: &AliasAnalysis,
        block: usize,
        index: usize,
    ) -> Location {
        let inst = &module.functions[0].blocks[block].insts[index];
        analysis.location_of(inst).unwrap()
    }

    #[test]
    fn distinct_slots_never_overlap() {
        let (module, analysis) = analyze(
            "
fn slots()
entry:
  a = slot(8)
  b = slot(8)
  one = constant(i64, 1)
  store(a, one, 8)
  store(b, one, 8)
  ret()
",
        );
        let la = store_location(&module, &analysis, 0, 3);
        let lb = store_location(&module, &analysis, 0, 4);
        assert_eq!(analysis.classify(&la, &lb), AliasRelation::NoOverlap);
        assert_eq!(analysis.classify(&la, &la), AliasRelation::MustOverlap);
    }

    #[test]
    fn params_may_overlap() {
        let (module, analysis) = analyze(
            "
fn params(p, q)
entry:
  one = constant(i64, 1)
  store(p, one, 8)
  store(q, one, 8)
  ret()
",
        );
        let lp = store_location(&module, &analysis, 0, 1);
        let lq = store_location(&module, &analysis, 0, 2);
        assert_eq!(analysis.classify(&lp, &lq), AliasRelation::MayOverlap);
        assert_eq!(analysis.classify(&lp, &lp), AliasRelation::MustOverlap);
    }

    #[test]
    fn same_root_disjoint_offsets() {
        let (module, analysis) = analyze(
            "
fn fields(s)
entry:
  x = address(s, 0)
  y = address(s, 4)
  one = constant(i32, 1)
  store(x, one, 4)
  store(y, one, 4)
  ret()
",
        );
        let lx = store_location(&module, &analysis, 0, 3);
        let ly = store_location(&module, &analysis, 0, 4);
        assert_eq!(analysis.classify(&lx, &ly), AliasRelation::NoOverlap);
    }

    #[test]
    fn huge_offsets_stay_conservative() {
        // x's byte range runs past the end of u64, and y's resolved offset
        // overflows outright. Neither comparison may panic, and neither may
        // claim disjointness.
        let (module, analysis) = analyze(
            "
fn huge(s)
entry:
  x = address(s, 18446744073709551615)
  y = address(x, 8)
  z = address(s, 18446744073709551611)
  one = constant(i64, 1)
  store(x, one, 8)
  store(y, one, 8)
  store(z, one, 8)
  ret()
",
        );
        let lx = store_location(&module, &analysis, 0, 4);
        let ly = store_location(&module, &analysis, 0, 5);
        let lz = store_location(&module, &analysis, 0, 6);
        assert_eq!(ly.offset, None);
        assert_eq!(analysis.classify(&lx, &ly), AliasRelation::MayOverlap);
        assert_eq!(analysis.classify(&lx, &lz), AliasRelation::MayOverlap);
        assert_eq!(analysis.classify(&lx, &lx), AliasRelation::MustOverlap);
    }

    #[test]
    fn escaped_slot_may_overlap_param() {
        let (module, analysis) = analyze(
            "
fn escapes(p)
entry:
  a = slot(8)
  one = constant(i64, 1)
  call(publish, a)
  store(a, one, 8)
  store(p, one, 8)
  ret()
",
        );
        let la = store_location(&module, &analysis, 0, 3);
        let lp = store_location(&module, &analysis, 0, 4);
        assert_eq!(analysis.classify(&la, &lp), AliasRelation::MayOverlap);
    }
}

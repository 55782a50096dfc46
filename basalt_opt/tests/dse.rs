extern crate basalt_ir;
extern crate basalt_opt;
extern crate pretty_assertions;

use self::pretty_assertions::assert_eq;

use basalt_ir::*;
use basalt_opt::*;

fn run_function(module: &mut Module, idx: usize) -> DseReport {
    let function = &mut module.functions[idx];
    let cfg = cfg(function);
    let alias = alias_analysis(function);
    let postdom = postdominator(&cfg, BlockID::new(function.blocks.len()));
    let mut ssa = memory_ssa(function, &cfg);
    dse(function, &cfg, &mut ssa, &alias, &postdom)
}

fn run(text: &str) -> (Module, DseReport) {
    let mut module = parse(text).unwrap();
    verify(&module).unwrap();
    let report = run_function(&mut module, 0);
    (module, report)
}

fn count_stores(function: &Function) -> usize {
    function
        .blocks
        .iter()
        .flat_map(|block| block.insts.iter())
        .filter(|inst| inst.is_store())
        .count()
}

fn rejected_with(report: &DseReport, rejection: Rejection) -> bool {
    report.rejections.iter().any(|(_, r)| *r == rejection)
}

#[test]
fn adjacent_overwrite_eliminated() {
    let (module, report) = run(
        "
fn overwrite(p)
entry:
  one = constant(i64, 1)
  two = constant(i64, 2)
  store(p, one, 8)
  store(p, two, 8)
  ret()
",
    );
    assert!(report.changed);
    assert_eq!(report.eliminated, 1);
    assert_eq!(report.dead, vec![InstID::new(BlockID::new(0), 2)]);
    assert_eq!(count_stores(&module.functions[0]), 1);
}

#[test]
fn chain_of_overwrites_eliminated() {
    let (module, report) = run(
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
    assert_eq!(report.eliminated, 2);
    assert_eq!(count_stores(&module.functions[0]), 1);
}

#[test]
fn overwrite_across_blocks_eliminated() {
    let (module, report) = run(
        "
fn linear(p)
entry:
  one = constant(i64, 1)
  store(p, one, 8)
  jmp(next)
next:
  two = constant(i64, 2)
  store(p, two, 8)
  ret()
",
    );
    assert_eq!(report.eliminated, 1);
    assert_eq!(count_stores(&module.functions[0]), 1);
}

#[test]
fn intervening_load_blocks_elimination() {
    let (module, report) = run(
        "
fn observed(p)
entry:
  one = constant(i64, 1)
  store(p, one, 8)
  x = load(p, 8)
  y = add(x, one)
  store(p, y, 8)
  ret()
",
    );
    assert!(!report.changed);
    assert!(rejected_with(&report, Rejection::InterveningUse));
    assert_eq!(count_stores(&module.functions[0]), 2);
}

#[test]
fn intervening_call_blocks_elimination() {
    let (module, report) = run(
        "
fn published(p)
entry:
  one = constant(i64, 1)
  store(p, one, 8)
  call(observe, p)
  store(p, one, 8)
  ret()
",
    );
    assert!(!report.changed);
    assert!(rejected_with(&report, Rejection::InterveningUse));
    assert_eq!(count_stores(&module.functions[0]), 2);
}

#[test]
fn unrelated_load_does_not_block() {
    // The load reads a private slot, so it can't observe the store to p.
    let (module, report) = run(
        "
fn unrelated(p)
entry:
  buf = slot(8)
  one = constant(i64, 1)
  store(p, one, 8)
  store(buf, one, 8)
  x = load(buf, 8)
  store(p, x, 8)
  ret()
",
    );
    assert_eq!(report.eliminated, 1);
    assert_eq!(count_stores(&module.functions[0]), 2);
}

#[test]
fn early_return_blocks_elimination() {
    let (module, report) = run(
        "
fn early(p, c)
entry:
  one = constant(i64, 1)
  store(p, one, 8)
  br(c, out, tail)
out:
  ret()
tail:
  store(p, c, 8)
  ret()
",
    );
    assert!(!report.changed);
    assert!(rejected_with(&report, Rejection::NotPostDominated));
    assert_eq!(count_stores(&module.functions[0]), 2);
}

#[test]
fn both_arms_overwriting_kill_entry_store() {
    // Neither arm post-dominates the entry block, but together they cover
    // every path out of it.
    let (module, report) = run(
        "
fn diamond(p, c)
entry:
  one = constant(i64, 1)
  store(p, one, 8)
  br(c, then, els)
then:
  two = constant(i64, 2)
  store(p, two, 8)
  jmp(join)
els:
  three = constant(i64, 3)
  store(p, three, 8)
  jmp(join)
join:
  ret()
",
    );
    assert!(report.changed);
    assert_eq!(report.eliminated, 1);
    assert_eq!(report.dead, vec![InstID::new(BlockID::new(0), 1)]);
    assert_eq!(count_stores(&module.functions[0]), 2);
}

#[test]
fn one_arm_overwriting_retains_entry_store() {
    let (module, report) = run(
        "
fn halfdiamond(p, c)
entry:
  one = constant(i64, 1)
  store(p, one, 8)
  br(c, then, join)
then:
  two = constant(i64, 2)
  store(p, two, 8)
  jmp(join)
join:
  ret()
",
    );
    assert!(!report.changed);
    assert!(rejected_with(&report, Rejection::NotPostDominated));
    assert_eq!(count_stores(&module.functions[0]), 2);
}

#[test]
fn nested_branches_overwriting_kill_entry_store() {
    // Three leaf arms, two of them behind a second branch. No single arm
    // post-dominates entry, but the three overwrites cover every path out.
    let (module, report) = run(
        "
fn nested(p, c, d)
entry:
  one = constant(i64, 1)
  store(p, one, 8)
  br(c, then, more)
then:
  two = constant(i64, 2)
  store(p, two, 8)
  jmp(join)
more:
  br(d, els, other)
els:
  three = constant(i64, 3)
  store(p, three, 8)
  jmp(join)
other:
  four = constant(i64, 4)
  store(p, four, 8)
  jmp(join)
join:
  ret()
",
    );
    assert!(report.changed);
    assert_eq!(report.eliminated, 1);
    assert_eq!(report.dead, vec![InstID::new(BlockID::new(0), 1)]);
    assert_eq!(count_stores(&module.functions[0]), 3);
}

#[test]
fn store_read_in_infinite_loop_retained() {
    // The spin arm never returns, so the overwrite on the returning arm
    // doesn't post-dominate entry, and the loop keeps reading the entry
    // store forever.
    let (module, report) = run(
        "
fn spinner(p, q, c)
entry:
  one = constant(i64, 1)
  store(p, one, 8)
  br(c, fin, spin)
fin:
  two = constant(i64, 2)
  store(p, two, 8)
  ret()
spin:
  x = load(p, 8)
  store(q, x, 8)
  jmp(spin)
",
    );
    assert!(!report.changed);
    assert!(rejected_with(&report, Rejection::NotPostDominated));
    assert_eq!(count_stores(&module.functions[0]), 3);
}

#[test]
fn no_exit_arm_blocks_collective_kill() {
    // Two arms overwrite, but a third arm spins forever without touching p.
    // An execution taking it keeps the entry store as its final write, so
    // the two overwrites don't collectively cover every path.
    let (module, report) = run(
        "
fn forked(p, c, d)
entry:
  one = constant(i64, 1)
  store(p, one, 8)
  br(c, then, more)
then:
  two = constant(i64, 2)
  store(p, two, 8)
  jmp(join)
more:
  br(d, els, spin)
els:
  three = constant(i64, 3)
  store(p, three, 8)
  jmp(join)
spin:
  jmp(spin)
join:
  ret()
",
    );
    assert!(!report.changed);
    assert!(rejected_with(&report, Rejection::NotPostDominated));
    assert_eq!(count_stores(&module.functions[0]), 3);
}

#[test]
fn merge_blocks_chain_walk() {
    // The join block's store sits behind a merge, so its chain walk can't
    // name a single victim; the arm stores themselves survive.
    let (module, report) = run(
        "
fn joined(p, c)
entry:
  br(c, then, els)
then:
  store(p, c, 8)
  jmp(join)
els:
  store(p, c, 8)
  jmp(join)
join:
  two = constant(i64, 2)
  store(p, two, 8)
  ret()
",
    );
    assert!(!report.changed);
    assert!(rejected_with(&report, Rejection::MergedPaths));
    assert_eq!(count_stores(&module.functions[0]), 3);
}

#[test]
fn may_alias_params_retained() {
    let (module, report) = run(
        "
fn params(p, q)
entry:
  one = constant(i64, 1)
  store(p, one, 8)
  store(q, one, 8)
  ret()
",
    );
    assert!(!report.changed);
    assert!(rejected_with(&report, Rejection::DifferentLocation));
    assert_eq!(count_stores(&module.functions[0]), 2);
}

#[test]
fn volatile_prior_retained() {
    let (module, report) = run(
        "
fn vol(p)
entry:
  one = constant(i64, 1)
  store.volatile(p, one, 8)
  store(p, one, 8)
  ret()
",
    );
    assert!(!report.changed);
    assert!(rejected_with(&report, Rejection::PriorNotRemovable));
}

#[test]
fn volatile_killer_not_scanned() {
    // A volatile overwrite is not a killer, so the plain store survives and
    // produces no rejection either way beyond its own scan.
    let (module, report) = run(
        "
fn vol(p)
entry:
  one = constant(i64, 1)
  store(p, one, 8)
  store.volatile(p, one, 8)
  ret()
",
    );
    assert!(!report.changed);
    assert_eq!(count_stores(&module.functions[0]), 2);
}

#[test]
fn atomic_prior_retained() {
    let (_, report) = run(
        "
fn atomics(p)
entry:
  one = constant(i64, 1)
  store.atomic(p, one, 8)
  store(p, one, 8)
  ret()
",
    );
    assert!(!report.changed);
    assert!(rejected_with(&report, Rejection::PriorNotRemovable));
}

#[test]
fn partial_overlap_retained() {
    // Same root, same start, different sizes: the larger store covers the
    // smaller one, but the footprints aren't identical.
    let (module, report) = run(
        "
fn partial(p)
entry:
  one = constant(i32, 1)
  big = constant(i64, 2)
  store(p, one, 4)
  store(p, big, 8)
  ret()
",
    );
    assert!(!report.changed);
    assert!(rejected_with(&report, Rejection::DifferentLocation));
    assert_eq!(count_stores(&module.functions[0]), 2);
}

#[test]
fn disjoint_fields_retained() {
    let (_, report) = run(
        "
fn fields(s)
entry:
  x = address(s, 0)
  y = address(s, 8)
  one = constant(i64, 1)
  store(x, one, 8)
  store(y, one, 8)
  ret()
",
    );
    assert!(!report.changed);
    assert!(rejected_with(&report, Rejection::NoPriorWrite));
}

#[test]
fn same_field_overwrite_eliminated() {
    let (module, report) = run(
        "
fn fields(s)
entry:
  x = address(s, 8)
  y = address(s, 8)
  one = constant(i64, 1)
  two = constant(i64, 2)
  store(x, one, 8)
  store(y, two, 8)
  ret()
",
    );
    assert_eq!(report.eliminated, 1);
    assert_eq!(count_stores(&module.functions[0]), 1);
}

#[test]
fn non_adjacent_kill_across_unrelated_store() {
    // The store to slot b can't alias slot a, so the chain walk steps over it
    // and still finds the kill.
    let (module, report) = run(
        "
fn interleaved()
entry:
  a = slot(8)
  b = slot(8)
  one = constant(i64, 1)
  two = constant(i64, 2)
  store(a, one, 8)
  store(b, one, 8)
  store(a, two, 8)
  ret()
",
    );
    assert_eq!(report.eliminated, 1);
    assert_eq!(count_stores(&module.functions[0]), 2);
}

#[test]
fn loop_stores_retained() {
    let (module, report) = run(
        "
fn looped(p, n)
entry:
  zero = constant(i64, 0)
  store(p, zero, 8)
  jmp(header)
header:
  i = load(p, 8)
  c = sub(n, i)
  br(c, body, exit)
body:
  one = constant(i64, 1)
  next = add(i, one)
  store(p, next, 8)
  jmp(header)
exit:
  ret()
",
    );
    // The init store is read in the loop header, and the body store's chain
    // walk runs into that same read.
    assert!(!report.changed);
    assert_eq!(count_stores(&module.functions[0]), 2);
}

#[test]
fn escaped_slot_retained_across_call() {
    let (_, report) = run(
        "
fn escapes()
entry:
  a = slot(8)
  one = constant(i64, 1)
  store(a, one, 8)
  call(publish, a)
  store(a, one, 8)
  ret()
",
    );
    assert!(!report.changed);
    assert!(rejected_with(&report, Rejection::InterveningUse));
}

#[test]
fn private_slot_killed_across_call() {
    // The callee never sees slot a's address, so the call can't read it.
    let (module, report) = run(
        "
fn private(p)
entry:
  a = slot(8)
  one = constant(i64, 1)
  store(a, one, 8)
  call(tick, p)
  two = constant(i64, 2)
  store(a, two, 8)
  ret()
",
    );
    assert_eq!(report.eliminated, 1);
    assert_eq!(count_stores(&module.functions[0]), 2);
}

#[test]
fn second_run_is_idempotent() {
    let mut module = parse(
        "
fn chain(p)
entry:
  one = constant(i64, 1)
  store(p, one, 8)
  store(p, one, 8)
  store(p, one, 8)
  ret()
",
    )
    .unwrap();
    let first = run_function(&mut module, 0);
    assert_eq!(first.eliminated, 2);
    let second = run_function(&mut module, 0);
    assert!(!second.changed);
    assert_eq!(second.eliminated, 0);
    assert_eq!(count_stores(&module.functions[0]), 1);
}

#[test]
fn every_function_in_module_processed() {
    let mut module = parse(
        "
fn first(p)
entry:
  one = constant(i64, 1)
  store(p, one, 8)
  store(p, one, 8)
  ret()

fn second(q)
entry:
  two = constant(i64, 2)
  store(q, two, 8)
  x = load(q, 8)
  store(q, x, 8)
  ret()
",
    )
    .unwrap();
    let mut pm = PassManager::new(module);
    pm.add_pass(Pass::Verify);
    pm.add_pass(Pass::Dse);
    let reports = pm.run_passes().unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].0, "first");
    assert_eq!(reports[0].1.eliminated, 1);
    assert!(!reports[1].1.changed);
    module = pm.into_module();
    assert_eq!(count_stores(&module.functions[0]), 1);
    assert_eq!(count_stores(&module.functions[1]), 2);
}

#[test]
fn printed_module_reparses_after_elimination() {
    let (module, report) = run(
        "
fn overwrite(p)
entry:
  one = constant(i64, 1)
  two = constant(i64, 2)
  store(p, one, 8)
  store(p, two, 8)
  ret()
",
    );
    assert!(report.changed);
    let mut printed = String::new();
    write_module(&module, &mut printed).unwrap();
    let reparsed = parse(&printed).unwrap();
    assert_eq!(verify(&reparsed), Ok(()));
    assert_eq!(count_stores(&reparsed.functions[0]), 1);
}

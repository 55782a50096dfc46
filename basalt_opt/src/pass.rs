extern crate basalt_ir;

use std::iter::zip;

use self::basalt_ir::alias::*;
use self::basalt_ir::cfg::*;
use self::basalt_ir::dom::*;
use self::basalt_ir::ir::*;
use self::basalt_ir::memssa::*;
use self::basalt_ir::verify::*;

use crate::dse::*;

/*
 * Passes that can be run on a module.
 */
#[derive(Debug, Clone)]
pub enum Pass {
    Verify,
    Dse,
}

/*
 * Manages passes to be run on an IR module. Transparently handles analysis
 * requirements for optimizations: analyses are computed lazily, cached
 * between passes, and thrown away as soon as a pass changes the module.
 */
#[derive(Debug, Clone)]
pub struct PassManager {
    module: Module,

    // Passes to run.
    passes: Vec<Pass>,

    // Cached analysis results, one per function.
    cfgs: Option<Vec<CFG>>,
    postdoms: Option<Vec<DomTree>>,
    aliases: Option<Vec<AliasAnalysis>>,
    memssas: Option<Vec<MemorySSA>>,
}

impl PassManager {
    pub fn new(module: Module) -> Self {
        PassManager {
            module,
            passes: vec![],
            cfgs: None,
            postdoms: None,
            aliases: None,
            memssas: None,
        }
    }

    pub fn add_pass(&mut self, pass: Pass) {
        self.passes.push(pass);
    }

    fn make_cfgs(&mut self) {
        if self.cfgs.is_none() {
            self.cfgs = Some(self.module.functions.iter().map(cfg).collect());
        }
    }

    fn make_postdoms(&mut self) {
        self.make_cfgs();
        if self.postdoms.is_none() {
            self.postdoms = Some(
                zip(&self.module.functions, self.cfgs.as_ref().unwrap())
                    .map(|(function, cfg)| {
                        postdominator(cfg, BlockID::new(function.blocks.len()))
                    })
                    .collect(),
            );
        }
    }

    fn make_aliases(&mut self) {
        if self.aliases.is_none() {
            self.aliases = Some(self.module.functions.iter().map(alias_analysis).collect());
        }
    }

    fn make_memssas(&mut self) {
        self.make_cfgs();
        if self.memssas.is_none() {
            self.memssas = Some(
                zip(&self.module.functions, self.cfgs.as_ref().unwrap())
                    .map(|(function, cfg)| memory_ssa(function, cfg))
                    .collect(),
            );
        }
    }

    fn clear_analyses(&mut self) {
        self.cfgs = None;
        self.postdoms = None;
        self.aliases = None;
        self.memssas = None;
    }

    /*
     * Run the added passes in order, collecting a report per function per
     * elimination pass. Verification failures abort the whole run.
     */
    pub fn run_passes(&mut self) -> Result<Vec<(String, DseReport)>, String> {
        let mut reports = vec![];
        let passes = self.passes.clone();
        for pass in passes {
            match pass {
                Pass::Verify => verify(&self.module)?,
                Pass::Dse => {
                    self.make_postdoms();
                    self.make_aliases();
                    self.make_memssas();

                    // Analyses are taken out of the cache so that the module
                    // can be borrowed mutably alongside them.
                    let cfgs = self.cfgs.take().unwrap();
                    let postdoms = self.postdoms.take().unwrap();
                    let aliases = self.aliases.take().unwrap();
                    let mut memssas = self.memssas.take().unwrap();
                    let mut changed = false;
                    for (idx, function) in self.module.functions.iter_mut().enumerate() {
                        let report = dse(
                            function,
                            &cfgs[idx],
                            &mut memssas[idx],
                            &aliases[idx],
                            &postdoms[idx],
                        );
                        changed |= report.changed;
                        reports.push((function.name.clone(), report));
                    }
                    if changed {
                        self.clear_analyses();
                    } else {
                        self.cfgs = Some(cfgs);
                        self.postdoms = Some(postdoms);
                        self.aliases = Some(aliases);
                        self.memssas = Some(memssas);
                    }
                }
            }
        }
        Ok(reports)
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn into_module(self) -> Module {
        self.module
    }
}

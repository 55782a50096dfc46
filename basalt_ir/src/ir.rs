extern crate ordered_float;

use std::fmt::Write;

/*
 * A module is a collection of functions plus the constants they intern.
 * Constants are stored once at the module level and referenced by ID, so that
 * instructions stay small and constants can be compared and hashed cheaply.
 */
#[derive(Debug, Clone)]
pub struct Module {
    pub functions: Vec<Function>,
    pub constants: Vec<Constant>,
}

/*
 * A function is an ordered list of basic blocks. The block at index 0 is the
 * entry block. Variables are function local and referred to by ID - the first
 * num_params variables are the function's parameters. Variable names are kept
 * around for printing and dot dumping.
 */
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub num_params: usize,
    pub var_names: Vec<String>,
    pub blocks: Vec<BasicBlock>,
}

/*
 * A basic block is a straight-line sequence of instructions ended by exactly
 * one terminator.
 */
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub name: String,
    pub insts: Vec<Instruction>,
    pub term: Terminator,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    Integer32(i32),
    Integer64(i64),
    Float32(ordered_float::OrderedFloat<f32>),
    Float64(ordered_float::OrderedFloat<f64>),
}

/*
 * Instructions either produce a value into a destination variable, or effect
 * memory, or both. Stores carry explicit volatile / atomic flags - volatile
 * or atomic stores are never candidates for removal by any optimization.
 * Nop is the gravestone instruction: passes that delete instructions swap in
 * a Nop and compact all blocks at once afterwards, so that instruction IDs
 * stay stable for the whole deletion phase.
 */
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Instruction {
    Nop,
    Slot {
        dst: VarID,
        size: u64,
    },
    Address {
        dst: VarID,
        base: VarID,
        offset: u64,
    },
    Constant {
        dst: VarID,
        cons: ConstantID,
    },
    Binary {
        dst: VarID,
        left: VarID,
        right: VarID,
        op: BinaryOperator,
    },
    Load {
        dst: VarID,
        ptr: VarID,
        size: u64,
        volatile: bool,
    },
    Store {
        ptr: VarID,
        value: VarID,
        size: u64,
        volatile: bool,
        atomic: bool,
    },
    Call {
        dst: Option<VarID>,
        callee: String,
        args: Box<[VarID]>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Terminator {
    Jump {
        target: BlockID,
    },
    Branch {
        cond: VarID,
        true_target: BlockID,
        false_target: BlockID,
    },
    Return {
        value: Option<VarID>,
    },
}

impl Instruction {
    pub fn dst(&self) -> Option<VarID> {
        match self {
            Instruction::Nop => None,
            Instruction::Slot { dst, size: _ } => Some(*dst),
            Instruction::Address {
                dst,
                base: _,
                offset: _,
            } => Some(*dst),
            Instruction::Constant { dst, cons: _ } => Some(*dst),
            Instruction::Binary {
                dst,
                left: _,
                right: _,
                op: _,
            } => Some(*dst),
            Instruction::Load {
                dst,
                ptr: _,
                size: _,
                volatile: _,
            } => Some(*dst),
            Instruction::Store { .. } => None,
            Instruction::Call {
                dst,
                callee: _,
                args: _,
            } => *dst,
        }
    }

    pub fn is_store(&self) -> bool {
        if let Instruction::Store { .. } = self {
            true
        } else {
            false
        }
    }

    /*
     * A store is removable only if it is neither volatile nor atomic. Only
     * removable stores participate in dead store elimination, on either side
     * of a kill.
     */
    pub fn is_removable_store(&self) -> bool {
        if let Instruction::Store {
            ptr: _,
            value: _,
            size: _,
            volatile,
            atomic,
        } = self
        {
            !volatile && !atomic
        } else {
            false
        }
    }

    /*
     * Does this instruction read or write memory? Calls count - they are
     * always treated as opaque effects, since all callees are external.
     */
    pub fn has_memory_effect(&self) -> bool {
        match self {
            Instruction::Load { .. } | Instruction::Store { .. } | Instruction::Call { .. } => true,
            _ => false,
        }
    }

    pub fn is_gravestone(&self) -> bool {
        *self == Instruction::Nop
    }
}

/*
 * Enum for storing the variables an instruction uses. Modeled so that the
 * common fixed-arity cases don't allocate.
 */
#[derive(Debug, Clone)]
pub enum InstUses<'a> {
    Zero,
    One([VarID; 1]),
    Two([VarID; 2]),
    Variable(&'a Box<[VarID]>),
}

impl<'a> AsRef<[VarID]> for InstUses<'a> {
    fn as_ref(&self) -> &[VarID] {
        match self {
            InstUses::Zero => &[],
            InstUses::One(x) => x,
            InstUses::Two(x) => x,
            InstUses::Variable(x) => x,
        }
    }
}

pub fn get_uses<'a>(inst: &'a Instruction) -> InstUses<'a> {
    match inst {
        Instruction::Nop => InstUses::Zero,
        Instruction::Slot { dst: _, size: _ } => InstUses::Zero,
        Instruction::Address {
            dst: _,
            base,
            offset: _,
        } => InstUses::One([*base]),
        Instruction::Constant { dst: _, cons: _ } => InstUses::Zero,
        Instruction::Binary {
            dst: _,
            left,
            right,
            op: _,
        } => InstUses::Two([*left, *right]),
        Instruction::Load {
            dst: _,
            ptr,
            size: _,
            volatile: _,
        } => InstUses::One([*ptr]),
        Instruction::Store {
            ptr,
            value,
            size: _,
            volatile: _,
            atomic: _,
        } => InstUses::Two([*ptr, *value]),
        Instruction::Call {
            dst: _,
            callee: _,
            args,
        } => InstUses::Variable(args),
    }
}

pub fn get_term_uses<'a>(term: &'a Terminator) -> InstUses<'a> {
    match term {
        Terminator::Jump { target: _ } => InstUses::Zero,
        Terminator::Branch {
            cond,
            true_target: _,
            false_target: _,
        } => InstUses::One([*cond]),
        Terminator::Return { value } => match value {
            Some(value) => InstUses::One([*value]),
            None => InstUses::Zero,
        },
    }
}

impl Function {
    /*
     * Compute, for each variable, its unique defining instruction.
     * Parameters, variables never assigned, and variables assigned more than
     * once all map to None - consumers must treat those conservatively.
     */
    pub fn definitions(&self) -> Vec<Option<InstID>> {
        let mut defs: Vec<Option<InstID>> = vec![None; self.var_names.len()];
        let mut multiple = vec![false; self.var_names.len()];
        for (block_idx, block) in self.blocks.iter().enumerate() {
            for (inst_idx, inst) in block.insts.iter().enumerate() {
                if let Some(dst) = inst.dst() {
                    if defs[dst.idx()].is_some() {
                        multiple[dst.idx()] = true;
                    }
                    defs[dst.idx()] = Some(InstID::new(BlockID::new(block_idx), inst_idx));
                }
            }
        }
        for (def, multiple) in defs.iter_mut().zip(multiple) {
            if multiple {
                *def = None;
            }
        }
        defs
    }

    /*
     * Compact out gravestones from every block. Any instruction IDs computed
     * before this call are invalid afterwards, so analyses over this function
     * must be recomputed.
     */
    pub fn delete_gravestones(&mut self) {
        for block in self.blocks.iter_mut() {
            block.insts.retain(|inst| !inst.is_gravestone());
        }
    }

    pub fn inst(&self, id: InstID) -> &Instruction {
        &self.blocks[id.block.idx()].insts[id.index]
    }

    pub fn write_inst<W: Write>(&self, inst: &Instruction, module: &Module, w: &mut W) -> std::fmt::Result {
        let var = |id: &VarID| self.var_names[id.idx()].clone();
        match inst {
            Instruction::Nop => write!(w, "nop()"),
            Instruction::Slot { dst, size } => write!(w, "{} = slot({})", var(dst), size),
            Instruction::Address { dst, base, offset } => {
                write!(w, "{} = address({}, {})", var(dst), var(base), offset)
            }
            Instruction::Constant { dst, cons } => match module.constants[cons.idx()] {
                Constant::Integer32(x) => write!(w, "{} = constant(i32, {})", var(dst), x),
                Constant::Integer64(x) => write!(w, "{} = constant(i64, {})", var(dst), x),
                Constant::Float32(x) => write!(w, "{} = constant(f32, {})", var(dst), x),
                Constant::Float64(x) => write!(w, "{} = constant(f64, {})", var(dst), x),
            },
            Instruction::Binary {
                dst,
                left,
                right,
                op,
            } => {
                let op = match op {
                    BinaryOperator::Add => "add",
                    BinaryOperator::Sub => "sub",
                    BinaryOperator::Mul => "mul",
                    BinaryOperator::Div => "div",
                };
                write!(w, "{} = {}({}, {})", var(dst), op, var(left), var(right))
            }
            Instruction::Load {
                dst,
                ptr,
                size,
                volatile,
            } => {
                let suffix = if *volatile { ".volatile" } else { "" };
                write!(w, "{} = load{}({}, {})", var(dst), suffix, var(ptr), size)
            }
            Instruction::Store {
                ptr,
                value,
                size,
                volatile,
                atomic,
            } => {
                let mut suffix = String::new();
                if *volatile {
                    suffix.push_str(".volatile");
                }
                if *atomic {
                    suffix.push_str(".atomic");
                }
                write!(w, "store{}({}, {}, {})", suffix, var(ptr), var(value), size)
            }
            Instruction::Call { dst, callee, args } => {
                if let Some(dst) = dst {
                    write!(w, "{} = call({}", var(dst), callee)?;
                } else {
                    write!(w, "call({}", callee)?;
                }
                for arg in args.iter() {
                    write!(w, ", {}", var(arg))?;
                }
                write!(w, ")")
            }
        }
    }

    pub fn write_term<W: Write>(&self, term: &Terminator, w: &mut W) -> std::fmt::Result {
        match term {
            Terminator::Jump { target } => {
                write!(w, "jmp({})", self.blocks[target.idx()].name)
            }
            Terminator::Branch {
                cond,
                true_target,
                false_target,
            } => write!(
                w,
                "br({}, {}, {})",
                self.var_names[cond.idx()],
                self.blocks[true_target.idx()].name,
                self.blocks[false_target.idx()].name
            ),
            Terminator::Return { value } => match value {
                Some(value) => write!(w, "ret({})", self.var_names[value.idx()]),
                None => write!(w, "ret()"),
            },
        }
    }
}

/*
 * Print a whole module back out in the textual IR format the parser accepts.
 */
pub fn write_module<W: Write>(module: &Module, w: &mut W) -> std::fmt::Result {
    for function in module.functions.iter() {
        write!(w, "fn {}(", function.name)?;
        for idx in 0..function.num_params {
            if idx > 0 {
                write!(w, ", ")?;
            }
            write!(w, "{}", function.var_names[idx])?;
        }
        write!(w, ")\n")?;
        for block in function.blocks.iter() {
            write!(w, "{}:\n", block.name)?;
            for inst in block.insts.iter() {
                write!(w, "  ")?;
                function.write_inst(inst, module, w)?;
                write!(w, "\n")?;
            }
            write!(w, "  ")?;
            function.write_term(&block.term, w)?;
            write!(w, "\n")?;
        }
        write!(w, "\n")?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarID(u32);

impl VarID {
    pub fn new(x: usize) -> Self {
        VarID(x as u32)
    }

    pub fn idx(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockID(u32);

impl BlockID {
    pub fn new(x: usize) -> Self {
        BlockID(x as u32)
    }

    pub fn idx(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstantID(u32);

impl ConstantID {
    pub fn new(x: usize) -> Self {
        ConstantID(x as u32)
    }

    pub fn idx(&self) -> usize {
        self.0 as usize
    }
}

/*
 * Instructions are identified by their containing block and their index
 * inside it. These IDs are stable as long as no instruction is deleted,
 * which is why deletion goes through gravestones.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstID {
    pub block: BlockID,
    pub index: usize,
}

impl InstID {
    pub fn new(block: BlockID, index: usize) -> Self {
        InstID { block, index }
    }
}

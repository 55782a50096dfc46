use crate::*;

/*
 * Top level function to verify a module. Checks every ID in the module is in
 * bounds and that a handful of structural rules hold, so that passes
 * downstream can index without checking. Returns a String error message if
 * verification fails.
 */
pub fn verify(module: &Module) -> Result<(), String> {
    for function in module.functions.iter() {
        verify_function(function, module)?;
    }
    Ok(())
}

fn verify_function(function: &Function, module: &Module) -> Result<(), String> {
    // A function with no blocks has no entry block.
    if function.blocks.is_empty() {
        Err(format!("Function {} has no blocks.", function.name))?;
    }
    if function.num_params > function.var_names.len() {
        Err(format!(
            "Function {} declares more parameters than variables.",
            function.name
        ))?;
    }

    let check_var = |var: VarID| {
        if var.idx() >= function.var_names.len() {
            Err(format!(
                "Function {} references out of bounds variable {}.",
                function.name,
                var.idx()
            ))
        } else {
            Ok(())
        }
    };
    let check_block = |block: BlockID| {
        if block.idx() >= function.blocks.len() {
            Err(format!(
                "Function {} references out of bounds block {}.",
                function.name,
                block.idx()
            ))
        } else {
            Ok(())
        }
    };

    for block in function.blocks.iter() {
        for inst in block.insts.iter() {
            if let Some(dst) = inst.dst() {
                check_var(dst)?;
            }
            for u in get_uses(inst).as_ref() {
                check_var(*u)?;
            }
            match inst {
                Instruction::Constant { dst: _, cons } => {
                    if cons.idx() >= module.constants.len() {
                        Err(format!(
                            "Function {} references out of bounds constant {}.",
                            function.name,
                            cons.idx()
                        ))?;
                    }
                }
                // Zero sized memory accesses have no meaningful footprint.
                Instruction::Slot { dst: _, size }
                | Instruction::Load {
                    dst: _,
                    ptr: _,
                    size,
                    volatile: _,
                }
                | Instruction::Store {
                    ptr: _,
                    value: _,
                    size,
                    volatile: _,
                    atomic: _,
                } => {
                    if *size == 0 {
                        Err(format!(
                            "Function {} contains a zero sized memory access.",
                            function.name
                        ))?;
                    }
                }
                _ => {}
            }
        }
        for u in get_term_uses(&block.term).as_ref() {
            check_var(*u)?;
        }
        match block.term {
            Terminator::Jump { target } => check_block(target)?,
            Terminator::Branch {
                cond: _,
                true_target,
                false_target,
            } => {
                check_block(true_target)?;
                check_block(false_target)?;
            }
            Terminator::Return { value: _ } => {}
        }
    }

    // Each slot must be defined exactly once - the alias analysis names slot
    // objects by their defining variable.
    let defs = function.definitions();
    for block in function.blocks.iter() {
        for inst in block.insts.iter() {
            if let Instruction::Slot { dst, size: _ } = inst {
                if defs[dst.idx()].is_none() {
                    Err(format!(
                        "Function {} defines slot variable {} more than once.",
                        function.name,
                        function.var_names[dst.idx()]
                    ))?;
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::*;

    #[test]
    fn verify_accepts_wellformed() {
        let module = parse(
            "
fn ok(p, c)
entry:
  one = constant(i64, 1)
  store(p, one, 8)
  br(c, a, b)
a:
  jmp(b)
b:
  ret()
",
        )
        .unwrap();
        assert_eq!(verify(&module), Ok(()));
    }

    #[test]
    fn verify_rejects_zero_sized_store() {
        let module = parse(
            "
fn bad(p)
entry:
  one = constant(i64, 1)
  store(p, one, 0)
  ret()
",
        )
        .unwrap();
        assert!(verify(&module).is_err());
    }

    #[test]
    fn verify_rejects_redefined_slot() {
        let module = parse(
            "
fn bad()
entry:
  a = slot(8)
  a = slot(16)
  ret()
",
        )
        .unwrap();
        assert!(verify(&module).is_err());
    }
}

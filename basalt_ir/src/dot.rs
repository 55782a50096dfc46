use crate::*;

/*
 * Dump a function's memory effect graph in the Graphviz dot format. Nodes are
 * grouped into clusters by containing block, Def and Use nodes are labeled
 * with the instruction they wrap, and Merge nodes are drawn as diamonds.
 * Solid edges are defining predecessor edges; dashed edges are Merge incoming
 * edges, labeled with the predecessor block they come from.
 */
pub fn write_dot<W: std::fmt::Write>(
    function: &Function,
    module: &Module,
    ssa: &MemorySSA,
    w: &mut W,
) -> std::fmt::Result {
    write!(w, "digraph \"{}\" {{\n", function.name)?;
    write!(w, "label=\"{}\"\n", function.name)?;
    write!(w, "compound=true\n")?;

    // One cluster per block that owns at least one node.
    for (block_idx, block) in function.blocks.iter().enumerate() {
        let members: Vec<_> = ssa
            .nodes()
            .filter(|(id, _)| ssa.containing_block(*id).idx() == block_idx)
            .collect();
        if members.is_empty() {
            continue;
        }
        write!(w, "subgraph cluster_{} {{\n", block_idx)?;
        write!(w, "label=\"{}\"\n", block.name)?;
        write!(w, "bgcolor=ivory2\n")?;
        for (id, node) in members {
            match node {
                MemoryNode::Def { inst } => {
                    let mut text = String::new();
                    function.write_inst(function.inst(*inst), module, &mut text)?;
                    write!(
                        w,
                        "node_{} [shape=box, style=filled, fillcolor=lightcoral, label=\"{}\"];\n",
                        id.idx(),
                        text
                    )?;
                }
                MemoryNode::Use { inst } => {
                    let mut text = String::new();
                    function.write_inst(function.inst(*inst), module, &mut text)?;
                    write!(
                        w,
                        "node_{} [shape=box, style=filled, fillcolor=lightskyblue, label=\"{}\"];\n",
                        id.idx(),
                        text
                    )?;
                }
                MemoryNode::Merge { block: _, preds: _ } => {
                    write!(
                        w,
                        "node_{} [shape=diamond, style=filled, fillcolor=orange, label=\"merge\"];\n",
                        id.idx()
                    )?;
                }
            }
        }
        write!(w, "}}\n")?;
    }

    // Defining predecessor edges, then Merge incoming edges.
    for (id, node) in ssa.nodes() {
        if let Some(pred) = ssa.defining_pred(id) {
            write!(w, "node_{} -> node_{};\n", pred.idx(), id.idx())?;
        }
        if let MemoryNode::Merge { block: _, preds } = node {
            for (pred_block, pred) in preds.iter() {
                write!(
                    w,
                    "node_{} -> node_{} [style=\"dashed\", label=\"from {}\"];\n",
                    pred.idx(),
                    id.idx(),
                    function.blocks[pred_block.idx()].name
                )?;
            }
        }
    }

    write!(w, "}}\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::*;

    #[test]
    fn dot_mentions_every_node() {
        let module = parse(
            "
fn diamond(p, c)
entry:
  store(p, c, 8)
  br(c, then, els)
then:
  store(p, c, 8)
  jmp(join)
els:
  x = load(p, 8)
  jmp(join)
join:
  ret()
",
        )
        .unwrap();
        let function = &module.functions[0];
        let cfg = cfg(function);
        let ssa = memory_ssa(function, &cfg);
        let mut out = String::new();
        write_dot(function, &module, &ssa, &mut out).unwrap();
        assert!(out.contains("digraph \"diamond\""));
        assert!(out.contains("merge"));
        for (id, _) in ssa.nodes() {
            assert!(out.contains(&format!("node_{} ", id.idx())));
        }
    }
}

//! Control-flow simplification
//!
//! Folds branches whose two arms land on the same block into a plain
//! `Jump` (a common result of `ConstantPropagation` collapsing a
//! condition derived from a compile-time-known CR bit), recomputes
//! predecessor lists from scratch, and clears blocks no longer
//! reachable from the entry. Blocks are never renumbered: other
//! passes and the backend address blocks by `BlockId`, so a dropped
//! block becomes an empty hole rather than shifting every later index.

use rustc_hash::FxHashSet;

use crate::ir::instr::{BlockId, HirFunction, Terminator};

use super::OptPass;

pub struct ControlFlowSimplification;

impl OptPass for ControlFlowSimplification {
    fn name(&self) -> &str {
        "control-flow-simplification"
    }

    fn run(&self, func: &mut HirFunction) {
        fold_degenerate_branches(func);
        recompute_predecessors(func);
        merge_trivial_successors(func);
        drop_unreachable_blocks(func);
        recompute_predecessors(func);
    }
}

/// Merge a block into its predecessor when that predecessor is the block's
/// only predecessor and reaches it by a plain `Jump`: the edge between them
/// is then the only way into the successor, so the two blocks can run as one
/// with the predecessor's instructions followed by the successor's. Runs to
/// a fixed point since folding one pair can expose another further down the
/// same chain.
fn merge_trivial_successors(func: &mut HirFunction) {
    loop {
        recompute_predecessors(func);
        let mut merged_any = false;
        let block_ids: Vec<BlockId> = func.blocks.iter().map(|b| b.id).collect();
        for pred_id in block_ids {
            let target = match &func.block(pred_id).terminator {
                Terminator::Jump(target) => *target,
                _ => continue,
            };
            if target == pred_id || target == func.entry {
                continue;
            }
            if func.block(target).predecessors.len() != 1 || func.block(target).predecessors[0] != pred_id {
                continue;
            }

            let target_instrs = func.block(target).instrs.clone();
            let target_terminator = func.block(target).terminator.clone();
            {
                let pred = func.block_mut(pred_id);
                pred.instrs.extend(target_instrs);
                pred.terminator = target_terminator;
            }
            {
                let absorbed = func.block_mut(target);
                absorbed.instrs.clear();
                absorbed.terminator = Terminator::Unset;
                absorbed.ordinal = None;
            }
            merged_any = true;
        }
        if !merged_any {
            break;
        }
    }
}

fn fold_degenerate_branches(func: &mut HirFunction) {
    for block in &mut func.blocks {
        let folded = match &block.terminator {
            Terminator::BranchTrue { then_block, else_block, .. }
            | Terminator::BranchFalse { then_block, else_block, .. }
                if then_block == else_block =>
            {
                Some(*then_block)
            }
            _ => None,
        };
        if let Some(target) = folded {
            block.terminator = Terminator::Jump(target);
        }
    }
}

/// Every block this terminator can transfer control to
pub fn successors(terminator: &Terminator) -> Vec<BlockId> {
    match terminator {
        Terminator::Jump(target) => vec![*target],
        Terminator::BranchTrue { then_block, else_block, .. }
        | Terminator::BranchFalse { then_block, else_block, .. } => vec![*then_block, *else_block],
        Terminator::Return(_) | Terminator::Unset => vec![],
    }
}

fn recompute_predecessors(func: &mut HirFunction) {
    for block in &mut func.blocks {
        block.predecessors.clear();
    }
    let edges: Vec<(BlockId, BlockId)> = func
        .blocks
        .iter()
        .flat_map(|b| successors(&b.terminator).into_iter().map(move |s| (b.id, s)))
        .collect();
    for (from, to) in edges {
        func.block_mut(to).predecessors.push(from);
    }
}

fn drop_unreachable_blocks(func: &mut HirFunction) {
    let mut reachable = FxHashSet::default();
    let mut worklist = vec![func.entry];
    reachable.insert(func.entry);
    while let Some(id) = worklist.pop() {
        for succ in successors(&func.block(id).terminator) {
            if reachable.insert(succ) {
                worklist.push(succ);
            }
        }
    }

    for block in &mut func.blocks {
        if !reachable.contains(&block.id) {
            block.instrs.clear();
            block.terminator = Terminator::Unset;
            block.ordinal = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::HirBuilder;
    use crate::ir::types::IrType;

    #[test]
    fn branch_with_identical_arms_becomes_a_jump() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        let entry = func.add_block();
        let target = func.add_block();
        {
            let mut builder = HirBuilder::new(&mut func);
            builder.switch_to_block(entry);
            let cond = builder.i64(1);
            let cond = builder.truncate(cond, IrType::I8);
            builder.branch_true(cond, target, target);
            builder.switch_to_block(target);
            builder.ret(None);
        }

        ControlFlowSimplification.run(&mut func);
        assert!(matches!(func.block(entry).terminator, Terminator::Jump(t) if t == target));
    }

    #[test]
    fn sole_successor_is_merged_into_its_only_predecessor() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        let entry = func.add_block();
        let middle = func.add_block();
        {
            let mut builder = HirBuilder::new(&mut func);
            builder.switch_to_block(entry);
            builder.branch(middle);
            builder.switch_to_block(middle);
            let v = builder.i64(7);
            builder.ret(Some(v));
        }

        ControlFlowSimplification.run(&mut func);
        assert!(!func.block(entry).instrs.is_empty());
        assert!(matches!(func.block(entry).terminator, Terminator::Return(Some(_))));
        assert!(func.block(middle).instrs.is_empty());
        assert!(matches!(func.block(middle).terminator, Terminator::Unset));
    }

    #[test]
    fn unreachable_block_is_cleared_but_not_renumbered() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        let entry = func.add_block();
        let dead = func.add_block();
        {
            let mut builder = HirBuilder::new(&mut func);
            builder.switch_to_block(entry);
            builder.ret(None);
            builder.switch_to_block(dead);
            let v = builder.i64(1);
            builder.ret(Some(v));
        }

        ControlFlowSimplification.run(&mut func);
        assert!(func.block(dead).instrs.is_empty());
        assert!(matches!(func.block(dead).terminator, Terminator::Unset));
        assert_eq!(func.blocks.len(), 2);
    }
}

//! Layout finalization
//!
//! Assigns each block reachable from the entry a layout ordinal in
//! reverse-postorder, and names every such block with a `LabelId` for the
//! backends to carry through into their own debug output. The backend and
//! interpreter both iterate blocks by ordinal rather than by `BlockId`, so
//! an unreachable block (left as a cleared hole by
//! `ControlFlowSimplification`) simply never gets an ordinal or label and
//! is skipped.
//!
//! A `Jump` to the block laid out immediately next needs no branch
//! instruction at all once blocks run in ordinal order; `lower_to_ivm`
//! elides it at that point, since ordinals are what makes a target
//! "next" and this pass is where they're assigned.

use rustc_hash::FxHashSet;

use crate::ir::instr::{BlockId, HirFunction};

use super::cfg_simplify::successors;
use super::OptPass;

pub struct Finalization;

impl OptPass for Finalization {
    fn name(&self) -> &str {
        "finalization"
    }

    fn run(&self, func: &mut HirFunction) {
        let order = postorder(func);
        let ordinals: Vec<BlockId> = order.into_iter().rev().collect();
        for (i, id) in ordinals.iter().enumerate() {
            func.block_mut(*id).ordinal = Some(i as u32);
        }
        for id in ordinals {
            if func.block(id).label.is_none() {
                let label = func.alloc_label();
                func.block_mut(id).label = Some(label);
            }
        }
    }
}

fn postorder(func: &HirFunction) -> Vec<BlockId> {
    let mut visited = FxHashSet::default();
    let mut order = Vec::new();
    let mut stack: Vec<(BlockId, bool)> = vec![(func.entry, false)];
    visited.insert(func.entry);

    while let Some((id, expanded)) = stack.pop() {
        if expanded {
            order.push(id);
            continue;
        }
        stack.push((id, true));
        for succ in successors(&func.block(id).terminator) {
            if visited.insert(succ) {
                stack.push((succ, false));
            }
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::HirBuilder;

    #[test]
    fn assigns_ordinals_in_reverse_postorder_from_entry() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        let entry = func.add_block();
        let mid = func.add_block();
        let tail = func.add_block();
        {
            let mut builder = HirBuilder::new(&mut func);
            builder.switch_to_block(entry);
            builder.branch(mid);
            builder.switch_to_block(mid);
            builder.branch(tail);
            builder.switch_to_block(tail);
            builder.ret(None);
        }

        Finalization.run(&mut func);
        assert_eq!(func.block(entry).ordinal, Some(0));
        assert_eq!(func.block(mid).ordinal, Some(1));
        assert_eq!(func.block(tail).ordinal, Some(2));
    }

    #[test]
    fn reachable_blocks_are_named_but_unreachable_ones_are_not() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        let entry = func.add_block();
        let dead = func.add_block();
        {
            let mut builder = HirBuilder::new(&mut func);
            builder.switch_to_block(entry);
            builder.ret(None);
            builder.switch_to_block(dead);
            builder.ret(None);
        }

        Finalization.run(&mut func);
        assert!(func.block(entry).label.is_some());
        assert!(func.block(dead).label.is_none());
    }

    #[test]
    fn unreachable_block_gets_no_ordinal() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        let entry = func.add_block();
        let dead = func.add_block();
        {
            let mut builder = HirBuilder::new(&mut func);
            builder.switch_to_block(entry);
            builder.ret(None);
            builder.switch_to_block(dead);
            builder.ret(None);
        }

        Finalization.run(&mut func);
        assert_eq!(func.block(entry).ordinal, Some(0));
        assert_eq!(func.block(dead).ordinal, None);
    }
}

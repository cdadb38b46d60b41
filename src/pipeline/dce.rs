//! Dead code elimination
//!
//! A value with no remaining use and no side effect is dropped. Runs to
//! a fixpoint, since removing one dead instruction can make its own
//! operands dead in turn (e.g. a constant feeding only a now-removed add).

use rustc_hash::FxHashSet;

use crate::ir::instr::{HirFunction, Terminator, ValueRef};

use super::OptPass;

pub struct DeadCodeElimination;

impl OptPass for DeadCodeElimination {
    fn name(&self) -> &str {
        "dead-code-elimination"
    }

    fn run(&self, func: &mut HirFunction) {
        loop {
            let used = collect_used(func);
            let mut changed = false;
            for block in &mut func.blocks {
                let before = block.instrs.len();
                block.instrs.retain(|instr| {
                    instr.has_side_effects()
                        || instr.dest().map(|d| used.contains(&d)).unwrap_or(true)
                        || instr.secondary_dest().map(|d| used.contains(&d)).unwrap_or(false)
                });
                if block.instrs.len() != before {
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }
}

fn collect_used(func: &HirFunction) -> FxHashSet<ValueRef> {
    let mut used = FxHashSet::default();
    for block in &func.blocks {
        for instr in &block.instrs {
            for operand in instr.operands() {
                used.insert(operand);
            }
        }
        match &block.terminator {
            Terminator::BranchTrue { cond, .. } | Terminator::BranchFalse { cond, .. } => {
                used.insert(*cond);
            }
            Terminator::Return(Some(v)) => {
                used.insert(*v);
            }
            _ => {}
        }
    }
    used
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::HirBuilder;
    use crate::ir::types::IrType;

    #[test]
    fn removes_a_pure_instruction_with_no_uses() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        let mut builder = HirBuilder::new(&mut func);
        let a = builder.i64(1);
        let b = builder.i64(2);
        let _unused = builder.add(a, b, IrType::I64);
        builder.ret(None);
        drop(builder);

        DeadCodeElimination.run(&mut func);
        assert!(func.blocks[0].instrs.is_empty());
    }

    #[test]
    fn keeps_instructions_with_side_effects() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        let mut builder = HirBuilder::new(&mut func);
        let addr = builder.i64(0x1000);
        let addr32 = builder.truncate(addr, IrType::I32);
        let value = builder.i64(7);
        let value32 = builder.truncate(value, IrType::I32);
        builder.store(addr32, value32, IrType::I32, crate::ir::types::Endianness::Big);
        builder.ret(None);
        drop(builder);

        DeadCodeElimination.run(&mut func);
        assert!(!func.blocks[0].instrs.is_empty());
    }
}

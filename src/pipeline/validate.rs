//! Post-pipeline HIR validation
//!
//! Optional (`Config::validate_hir`) sanity pass: every reachable block
//! must end in a real terminator, every operand must reference a value
//! the function actually allocated, every value must be defined exactly
//! once (SSA), every branch target must name a block that actually
//! exists, and the operands of type-sensitive opcodes must agree with
//! their destination's declared type. Catches pipeline bugs before they
//! reach the backend rather than producing a miscompiled guest function.

use rustc_hash::FxHashSet;

use crate::error::CompileError;
use crate::ir::instr::{BlockId, HirFunction, Instr, Terminator, ValueRef};
use crate::ir::types::IrType;

pub fn validate(func: &HirFunction) -> Result<(), CompileError> {
    let mut defined: FxHashSet<ValueRef> = FxHashSet::default();

    for block in &func.blocks {
        if block.ordinal.is_none() {
            continue;
        }
        if matches!(block.terminator, Terminator::Unset) {
            return Err(fail(func, block.id, "has no terminator"));
        }

        for instr in &block.instrs {
            for operand in instr.operands() {
                if !func.value_types.contains_key(&operand) {
                    return Err(fail(func, block.id, &format!("references undefined value {operand}")));
                }
            }
            for dest in instr.dest().into_iter().chain(instr.secondary_dest()) {
                if !defined.insert(dest) {
                    return Err(fail(func, block.id, &format!("redefines value {dest}")));
                }
            }
            check_signature(func, block.id, instr)?;
        }

        for target in successors(&block.terminator) {
            check_target(func, block.id, target)?;
        }
    }

    Ok(())
}

fn fail(func: &HirFunction, block: BlockId, reason: &str) -> CompileError {
    CompileError::ValidationFailed { address: func.address, reason: format!("block {block} {reason}") }
}

fn successors(terminator: &Terminator) -> Vec<BlockId> {
    match terminator {
        Terminator::Jump(target) => vec![*target],
        Terminator::BranchTrue { then_block, else_block, .. }
        | Terminator::BranchFalse { then_block, else_block, .. } => vec![*then_block, *else_block],
        Terminator::Return(_) | Terminator::Unset => vec![],
    }
}

fn check_target(func: &HirFunction, block: BlockId, target: BlockId) -> Result<(), CompileError> {
    let Some(targeted) = func.blocks.get(target.0 as usize) else {
        return Err(fail(func, block, &format!("branches to nonexistent block {target}")));
    };
    if matches!(targeted.terminator, Terminator::Unset) {
        return Err(fail(func, block, &format!("branches to cleared block {target}")));
    }
    Ok(())
}

/// Operand/destination type agreement for opcodes whose operands must share
/// a single width: arithmetic, bitwise, and compare ops all carry their
/// operand width on the dest (or, for compares, the operands) rather than on
/// the opcode itself, so nothing but cross-checking the IR catches a lifter
/// bug that mixes widths.
fn check_signature(func: &HirFunction, block: BlockId, instr: &Instr) -> Result<(), CompileError> {
    let ty = |v: ValueRef| func.value_type(v);

    match instr {
        Instr::Add { dest, lhs, rhs }
        | Instr::Sub { dest, lhs, rhs }
        | Instr::Mul { dest, lhs, rhs }
        | Instr::And { dest, lhs, rhs }
        | Instr::Or { dest, lhs, rhs }
        | Instr::Xor { dest, lhs, rhs } => {
            same_type(func, block, &[ty(*dest), ty(*lhs), ty(*rhs)], "dest/lhs/rhs")
        }
        Instr::Div { dest, lhs, rhs, .. } | Instr::Rem { dest, lhs, rhs, .. } => {
            same_type(func, block, &[ty(*dest), ty(*lhs), ty(*rhs)], "dest/lhs/rhs")
        }
        Instr::FAdd { dest, lhs, rhs, .. }
        | Instr::FSub { dest, lhs, rhs, .. }
        | Instr::FMul { dest, lhs, rhs, .. }
        | Instr::FDiv { dest, lhs, rhs, .. } => {
            same_type(func, block, &[ty(*dest), ty(*lhs), ty(*rhs)], "dest/lhs/rhs")
        }
        Instr::ICmp { dest, lhs, rhs, .. } => {
            same_type(func, block, &[ty(*lhs), ty(*rhs)], "lhs/rhs")?;
            if ty(*dest) != IrType::I8 {
                return Err(fail(func, block, &format!("compare dest {dest} must be I8, found {:?}", ty(*dest))));
            }
            Ok(())
        }
        Instr::FCmp { dest, lhs, rhs, .. } => {
            same_type(func, block, &[ty(*lhs), ty(*rhs)], "lhs/rhs")?;
            if ty(*dest) != IrType::I8 {
                return Err(fail(func, block, &format!("compare dest {dest} must be I8, found {:?}", ty(*dest))));
            }
            Ok(())
        }
        Instr::Move { dest, src } => same_type(func, block, &[ty(*dest), ty(*src)], "dest/src"),
        _ => Ok(()),
    }
}

fn same_type(func: &HirFunction, block: BlockId, tys: &[IrType], operands: &str) -> Result<(), CompileError> {
    if tys.windows(2).all(|w| w[0] == w[1]) {
        Ok(())
    } else {
        Err(fail(func, block, &format!("{operands} types disagree: {tys:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::HirBuilder;
    use crate::ir::instr::{Signedness, CmpOp};
    use crate::ir::types::IrType;

    #[test]
    fn rejects_a_reachable_block_with_no_terminator() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        func.block_mut(func.entry).ordinal = Some(0);
        assert!(validate(&func).is_err());
    }

    #[test]
    fn accepts_a_function_with_a_terminated_entry_block() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        {
            let mut builder = HirBuilder::new(&mut func);
            builder.ret(None);
        }
        func.block_mut(func.entry).ordinal = Some(0);
        assert!(validate(&func).is_ok());
    }

    #[test]
    fn rejects_a_value_defined_twice() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        {
            let mut builder = HirBuilder::new(&mut func);
            let a = builder.i64(1);
            builder.ret(Some(a));
        }
        // Force a second instruction to claim the same dest as an existing one.
        let dup = func.blocks[0].instrs[0].clone();
        func.blocks[0].instrs.push(dup);
        func.block_mut(func.entry).ordinal = Some(0);
        assert!(validate(&func).is_err());
    }

    #[test]
    fn rejects_a_branch_to_a_nonexistent_block() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        func.block_mut(func.entry).terminator = Terminator::Jump(BlockId(99));
        func.block_mut(func.entry).ordinal = Some(0);
        assert!(validate(&func).is_err());
    }

    #[test]
    fn rejects_a_branch_to_a_cleared_block() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        let entry = func.add_block();
        let dead = func.add_block();
        func.block_mut(entry).terminator = Terminator::Jump(dead);
        func.block_mut(entry).ordinal = Some(0);
        func.block_mut(dead).terminator = Terminator::Unset;
        assert!(validate(&func).is_err());
    }

    #[test]
    fn rejects_a_compare_with_mismatched_operand_widths() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        {
            let mut builder = HirBuilder::new(&mut func);
            let a = builder.load_context(0x10, IrType::I64);
            let b = builder.load_context(0x18, IrType::I32);
            let _cmp = builder.icmp(a, b, Signedness::Signed, CmpOp::Eq);
            builder.ret(None);
        }
        func.block_mut(func.entry).ordinal = Some(0);
        assert!(validate(&func).is_err());
    }
}

//! Constant propagation and folding
//!
//! Tracks which SSA values are known compile-time constants within a
//! block and folds purely-constant arithmetic, compares, and width
//! conversions into a single `Const*` instruction. Guest immediates
//! (`addi`, `cmpi`, ...) already surface as `Const*` instructions, so this
//! mostly collapses chains the lifter emits for address computation
//! against a fixed base and for condition-register tests. A branch whose
//! condition folds to a known constant is rewritten to the `Jump` it
//! always takes; `ControlFlowSimplification` then cleans up the
//! now-unreachable arm.

use rustc_hash::FxHashMap;

use crate::ir::instr::{CmpOp, HirFunction, Instr, Signedness, Terminator, ValueRef};
use crate::ir::types::IrType;

use super::OptPass;

#[derive(Clone, Copy)]
struct Known {
    /// Canonical value for `ty`: stored sign-extended to `i64`, as a
    /// `ConstI*` instruction would store it.
    value: i64,
    ty: IrType,
}

pub struct ConstantPropagation;

impl OptPass for ConstantPropagation {
    fn name(&self) -> &str {
        "constant-propagation"
    }

    fn run(&self, func: &mut HirFunction) {
        let types = func.value_types.clone();
        for block in &mut func.blocks {
            let mut known: FxHashMap<ValueRef, Known> = FxHashMap::default();
            for instr in &mut block.instrs {
                match instr {
                    Instr::ConstI8 { dest, value } => {
                        known.insert(*dest, Known { value: *value as i64, ty: IrType::I8 });
                    }
                    Instr::ConstI16 { dest, value } => {
                        known.insert(*dest, Known { value: *value as i64, ty: IrType::I16 });
                    }
                    Instr::ConstI32 { dest, value } => {
                        known.insert(*dest, Known { value: *value as i64, ty: IrType::I32 });
                    }
                    Instr::ConstI64 { dest, value } => {
                        known.insert(*dest, Known { value: *value, ty: IrType::I64 });
                    }
                    Instr::Add { dest, lhs, rhs } => {
                        fold_binary(&mut known, *dest, *lhs, *rhs, instr, i64::wrapping_add);
                    }
                    Instr::Sub { dest, lhs, rhs } => {
                        fold_binary(&mut known, *dest, *lhs, *rhs, instr, i64::wrapping_sub);
                    }
                    Instr::Mul { dest, lhs, rhs } => {
                        fold_binary(&mut known, *dest, *lhs, *rhs, instr, i64::wrapping_mul);
                    }
                    Instr::And { dest, lhs, rhs } => {
                        fold_binary(&mut known, *dest, *lhs, *rhs, instr, |a, b| a & b);
                    }
                    Instr::Or { dest, lhs, rhs } => {
                        fold_binary(&mut known, *dest, *lhs, *rhs, instr, |a, b| a | b);
                    }
                    Instr::Xor { dest, lhs, rhs } => {
                        fold_binary(&mut known, *dest, *lhs, *rhs, instr, |a, b| a ^ b);
                    }
                    Instr::ICmp { dest, lhs, rhs, signedness, op } => {
                        if let (Some(&a), Some(&b)) = (known.get(lhs), known.get(rhs)) {
                            if a.ty == b.ty {
                                let truthy = fold_icmp(a.ty, *signedness, *op, a.value, b.value);
                                let d = *dest;
                                let folded = Known { value: truthy as i64, ty: IrType::I8 };
                                *instr = Instr::ConstI8 { dest: d, value: truthy as i8 };
                                known.insert(d, folded);
                            }
                        }
                    }
                    Instr::ZeroExtend { dest, src } => {
                        if let Some(&s) = known.get(src) {
                            let dest_ty = ty_of(&types, *dest);
                            let widened = as_unsigned(s.ty, s.value) as i64;
                            let d = *dest;
                            let folded = Known { value: widened, ty: dest_ty };
                            *instr = to_const(d, folded);
                            known.insert(d, folded);
                        }
                    }
                    Instr::SignExtend { dest, src } => {
                        if let Some(&s) = known.get(src) {
                            let dest_ty = ty_of(&types, *dest);
                            let d = *dest;
                            let folded = Known { value: eval_width(s.ty, s.value), ty: dest_ty };
                            *instr = to_const(d, folded);
                            known.insert(d, folded);
                        }
                    }
                    Instr::Truncate { dest, src } => {
                        if let Some(&s) = known.get(src) {
                            let dest_ty = ty_of(&types, *dest);
                            let d = *dest;
                            let folded = Known { value: eval_width(dest_ty, s.value), ty: dest_ty };
                            *instr = to_const(d, folded);
                            known.insert(d, folded);
                        }
                    }
                    _ => {}
                }
            }

            let folded = match &block.terminator {
                Terminator::BranchTrue { cond, then_block, else_block } => {
                    known.get(cond).map(|k| if k.value != 0 { *then_block } else { *else_block })
                }
                Terminator::BranchFalse { cond, then_block, else_block } => {
                    known.get(cond).map(|k| if k.value != 0 { *else_block } else { *then_block })
                }
                _ => None,
            };
            if let Some(target) = folded {
                block.terminator = Terminator::Jump(target);
            }
        }
    }
}

fn fold_binary(
    known: &mut FxHashMap<ValueRef, Known>,
    dest: ValueRef,
    lhs: ValueRef,
    rhs: ValueRef,
    instr: &mut Instr,
    op: impl Fn(i64, i64) -> i64,
) {
    if let (Some(&a), Some(&b)) = (known.get(&lhs), known.get(&rhs)) {
        if a.ty == b.ty {
            let folded = Known { value: eval_width(a.ty, op(a.value, b.value)), ty: a.ty };
            *instr = to_const(dest, folded);
            known.insert(dest, folded);
        }
    }
}

fn ty_of(types: &FxHashMap<ValueRef, IrType>, v: ValueRef) -> IrType {
    types.get(&v).copied().unwrap_or(IrType::I64)
}

/// Canonical sign-extended-to-i64 form of `v` truncated to `ty`'s width
fn eval_width(ty: IrType, v: i64) -> i64 {
    match ty {
        IrType::I8 => v as i8 as i64,
        IrType::I16 => v as i16 as i64,
        IrType::I32 => v as i32 as i64,
        _ => v,
    }
}

fn as_unsigned(ty: IrType, v: i64) -> u64 {
    match ty {
        IrType::I8 => v as u8 as u64,
        IrType::I16 => v as u16 as u64,
        IrType::I32 => v as u32 as u64,
        _ => v as u64,
    }
}

fn fold_icmp(ty: IrType, signedness: Signedness, op: CmpOp, lhs: i64, rhs: i64) -> bool {
    let ord = match signedness {
        Signedness::Signed => eval_width(ty, lhs).cmp(&eval_width(ty, rhs)),
        Signedness::Unsigned => as_unsigned(ty, lhs).cmp(&as_unsigned(ty, rhs)),
    };
    use std::cmp::Ordering::*;
    match op {
        CmpOp::Eq => ord == Equal,
        CmpOp::Ne => ord != Equal,
        CmpOp::Lt => ord == Less,
        CmpOp::Le => ord != Greater,
        CmpOp::Gt => ord == Greater,
        CmpOp::Ge => ord != Less,
    }
}

fn to_const(dest: ValueRef, value: Known) -> Instr {
    match value.ty {
        IrType::I8 => Instr::ConstI8 { dest, value: value.value as i8 },
        IrType::I16 => Instr::ConstI16 { dest, value: value.value as i16 },
        IrType::I32 => Instr::ConstI32 { dest, value: value.value as i32 },
        _ => Instr::ConstI64 { dest, value: value.value },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::HirBuilder;
    use crate::ir::types::IrType;

    #[test]
    fn folds_add_of_two_constants() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        let mut builder = HirBuilder::new(&mut func);
        let a = builder.i64(2);
        let b = builder.i64(3);
        let _sum = builder.add(a, b, IrType::I64);
        builder.ret(None);
        drop(builder);

        ConstantPropagation.run(&mut func);
        assert!(matches!(func.blocks[0].instrs[2], Instr::ConstI64 { value: 5, .. }));
    }

    #[test]
    fn leaves_non_constant_operands_alone() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        let mut builder = HirBuilder::new(&mut func);
        let a = builder.load_context(0x10, IrType::I64);
        let b = builder.i64(3);
        let _sum = builder.add(a, b, IrType::I64);
        builder.ret(None);
        drop(builder);

        ConstantPropagation.run(&mut func);
        assert!(matches!(func.blocks[0].instrs[2], Instr::Add { .. }));
    }

    #[test]
    fn folds_compare_of_two_constants() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        let mut builder = HirBuilder::new(&mut func);
        let a = builder.i64(4);
        let b = builder.i64(4);
        let _eq = builder.icmp(a, b, Signedness::Signed, CmpOp::Eq);
        builder.ret(None);
        drop(builder);

        ConstantPropagation.run(&mut func);
        assert!(matches!(func.blocks[0].instrs[2], Instr::ConstI8 { value: 1, .. }));
    }

    #[test]
    fn rewrites_a_constant_condition_branch_to_a_jump() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        let entry = func.add_block();
        let then_block = func.add_block();
        let else_block = func.add_block();
        {
            let mut builder = HirBuilder::new(&mut func);
            builder.switch_to_block(entry);
            let cond = builder.i64(1);
            let cond = builder.truncate(cond, IrType::I8);
            builder.branch_true(cond, then_block, else_block);
            builder.switch_to_block(then_block);
            builder.ret(None);
            builder.switch_to_block(else_block);
            builder.ret(None);
        }

        ConstantPropagation.run(&mut func);
        assert!(matches!(func.block(entry).terminator, Terminator::Jump(t) if t == then_block));
    }
}

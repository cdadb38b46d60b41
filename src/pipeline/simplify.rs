//! Peephole algebraic simplification
//!
//! Rewrites identities like `x + 0`, `x - 0`, `x * 1`, and `x ^ x` into a
//! plain `Move` (or constant zero), folds a multiply by a known power of
//! two into a shift, fuses a shift fed by another constant shift of the
//! same kind into one, and collapses a redundant extend-of-extend or a
//! truncate that just undoes an earlier extend. These show up routinely
//! from the PPC lifter: `addi rX, rX, 0` is a common NOP idiom, and
//! `rlwinm` with a trivial mask can degenerate into one of these after
//! other lifting.

use rustc_hash::FxHashMap;

use crate::ir::instr::{HirFunction, Instr, Signedness, ValueRef};
use crate::ir::types::IrType;

use super::OptPass;

#[derive(Clone, Copy, PartialEq)]
enum ShiftKind {
    Left,
    Right(Signedness),
}

#[derive(Clone, Copy, PartialEq)]
enum ExtendKind {
    Zero,
    Sign,
}

pub struct Simplification;

impl OptPass for Simplification {
    fn name(&self) -> &str {
        "simplification"
    }

    fn run(&self, func: &mut HirFunction) {
        let types = func.value_types.clone();
        for block_idx in 0..func.blocks.len() {
            let instrs = std::mem::take(&mut func.blocks[block_idx].instrs);
            let mut consts: FxHashMap<ValueRef, i64> = FxHashMap::default();
            let mut shifts: FxHashMap<ValueRef, (ValueRef, i64, ShiftKind)> = FxHashMap::default();
            let mut extends: FxHashMap<ValueRef, (ValueRef, ExtendKind)> = FxHashMap::default();
            let mut rewritten = Vec::with_capacity(instrs.len());

            for instr in instrs {
                match instr {
                    Instr::ConstI8 { dest, value } => {
                        consts.insert(dest, value as i64);
                        rewritten.push(Instr::ConstI8 { dest, value });
                    }
                    Instr::ConstI16 { dest, value } => {
                        consts.insert(dest, value as i64);
                        rewritten.push(Instr::ConstI16 { dest, value });
                    }
                    Instr::ConstI32 { dest, value } => {
                        consts.insert(dest, value as i64);
                        rewritten.push(Instr::ConstI32 { dest, value });
                    }
                    Instr::ConstI64 { dest, value } => {
                        consts.insert(dest, value);
                        rewritten.push(Instr::ConstI64 { dest, value });
                    }

                    Instr::Add { dest, lhs, rhs } if consts.get(&rhs) == Some(&0) => {
                        rewritten.push(Instr::Move { dest, src: lhs });
                    }
                    Instr::Add { dest, lhs, rhs } if consts.get(&lhs) == Some(&0) => {
                        rewritten.push(Instr::Move { dest, src: rhs });
                    }
                    Instr::Sub { dest, lhs, rhs } if consts.get(&rhs) == Some(&0) => {
                        rewritten.push(Instr::Move { dest, src: lhs });
                    }
                    Instr::Or { dest, lhs, rhs } if consts.get(&rhs) == Some(&0) => {
                        rewritten.push(Instr::Move { dest, src: lhs });
                    }
                    Instr::Xor { dest, lhs, rhs } if lhs == rhs => {
                        rewritten.push(Instr::ConstI64 { dest, value: 0 });
                    }
                    Instr::Mul { dest, lhs, rhs } if consts.get(&rhs) == Some(&1) => {
                        rewritten.push(Instr::Move { dest, src: lhs });
                    }
                    Instr::Mul { dest, lhs, rhs } if consts.get(&lhs) == Some(&1) => {
                        rewritten.push(Instr::Move { dest, src: rhs });
                    }
                    Instr::Mul { dest, lhs, rhs }
                        if consts.get(&rhs).is_some_and(|&v| v > 1 && (v as u64).is_power_of_two()) =>
                    {
                        let shift_amount = consts[&rhs].trailing_zeros();
                        let amount_value = func.alloc_value(IrType::I8);
                        rewritten.push(Instr::ConstI8 { dest: amount_value, value: shift_amount as i8 });
                        consts.insert(amount_value, shift_amount as i64);
                        rewritten.push(Instr::Shl { dest, lhs, rhs: amount_value });
                        shifts.insert(dest, (lhs, shift_amount as i64, ShiftKind::Left));
                    }

                    Instr::Shl { dest, lhs, rhs } => {
                        let fused = consts.get(&rhs).copied().and_then(|amt2| {
                            let &(inner, amt1, kind) = shifts.get(&lhs)?;
                            (kind == ShiftKind::Left).then_some((inner, amt1 + amt2))
                        });
                        if let Some((inner, combined)) = fused {
                            let width = width_bits(ty_of(&types, dest)) as i64;
                            if combined < width {
                                let amount_value = func.alloc_value(IrType::I8);
                                rewritten.push(Instr::ConstI8 { dest: amount_value, value: combined as i8 });
                                consts.insert(amount_value, combined);
                                rewritten.push(Instr::Shl { dest, lhs: inner, rhs: amount_value });
                                shifts.insert(dest, (inner, combined, ShiftKind::Left));
                                continue;
                            }
                        }
                        if let Some(&amt) = consts.get(&rhs) {
                            shifts.insert(dest, (lhs, amt, ShiftKind::Left));
                        }
                        rewritten.push(Instr::Shl { dest, lhs, rhs });
                    }
                    Instr::Shr { dest, lhs, rhs, signedness } => {
                        let fused = consts.get(&rhs).copied().and_then(|amt2| {
                            let &(inner, amt1, kind) = shifts.get(&lhs)?;
                            (kind == ShiftKind::Right(signedness)).then_some((inner, amt1 + amt2))
                        });
                        if let Some((inner, combined)) = fused {
                            let width = width_bits(ty_of(&types, dest)) as i64;
                            if combined < width {
                                let amount_value = func.alloc_value(IrType::I8);
                                rewritten.push(Instr::ConstI8 { dest: amount_value, value: combined as i8 });
                                consts.insert(amount_value, combined);
                                rewritten.push(Instr::Shr { dest, lhs: inner, rhs: amount_value, signedness });
                                shifts.insert(dest, (inner, combined, ShiftKind::Right(signedness)));
                                continue;
                            }
                        }
                        if let Some(&amt) = consts.get(&rhs) {
                            shifts.insert(dest, (lhs, amt, ShiftKind::Right(signedness)));
                        }
                        rewritten.push(Instr::Shr { dest, lhs, rhs, signedness });
                    }

                    Instr::ZeroExtend { dest, src } => {
                        let folded_src = match extends.get(&src) {
                            Some(&(inner, ExtendKind::Zero)) => inner,
                            _ => src,
                        };
                        extends.insert(dest, (folded_src, ExtendKind::Zero));
                        rewritten.push(Instr::ZeroExtend { dest, src: folded_src });
                    }
                    Instr::SignExtend { dest, src } => {
                        let folded_src = match extends.get(&src) {
                            Some(&(inner, ExtendKind::Sign)) => inner,
                            _ => src,
                        };
                        extends.insert(dest, (folded_src, ExtendKind::Sign));
                        rewritten.push(Instr::SignExtend { dest, src: folded_src });
                    }
                    Instr::Truncate { dest, src } => {
                        match extends.get(&src) {
                            Some(&(inner, _)) if ty_of(&types, dest) == ty_of(&types, inner) => {
                                rewritten.push(Instr::Move { dest, src: inner });
                            }
                            _ => rewritten.push(Instr::Truncate { dest, src }),
                        }
                    }

                    other => rewritten.push(other),
                }
            }

            func.blocks[block_idx].instrs = rewritten;
        }
    }
}

fn ty_of(types: &FxHashMap<ValueRef, IrType>, v: ValueRef) -> IrType {
    types.get(&v).copied().unwrap_or(IrType::I64)
}

fn width_bits(ty: IrType) -> u32 {
    match ty {
        IrType::I8 => 8,
        IrType::I16 => 16,
        IrType::I32 => 32,
        _ => 64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::HirBuilder;
    use crate::ir::types::IrType;

    #[test]
    fn add_zero_becomes_a_move() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        let mut builder = HirBuilder::new(&mut func);
        let a = builder.load_context(0x10, IrType::I64);
        let zero = builder.i64(0);
        let _sum = builder.add(a, zero, IrType::I64);
        builder.ret(None);
        drop(builder);

        Simplification.run(&mut func);
        assert!(matches!(func.blocks[0].instrs[2], Instr::Move { .. }));
    }

    #[test]
    fn xor_self_becomes_zero() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        let mut builder = HirBuilder::new(&mut func);
        let a = builder.load_context(0x10, IrType::I64);
        let _z = builder.xor(a, a, IrType::I64);
        builder.ret(None);
        drop(builder);

        Simplification.run(&mut func);
        assert!(matches!(func.blocks[0].instrs[1], Instr::ConstI64 { value: 0, .. }));
    }

    #[test]
    fn mul_by_one_becomes_a_move() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        let mut builder = HirBuilder::new(&mut func);
        let a = builder.load_context(0x10, IrType::I64);
        let one = builder.i64(1);
        let _prod = builder.mul(a, one, IrType::I64);
        builder.ret(None);
        drop(builder);

        Simplification.run(&mut func);
        assert!(matches!(func.blocks[0].instrs[2], Instr::Move { .. }));
    }

    #[test]
    fn mul_by_power_of_two_becomes_a_shift() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        let mut builder = HirBuilder::new(&mut func);
        let a = builder.load_context(0x10, IrType::I64);
        let eight = builder.i64(8);
        let _prod = builder.mul(a, eight, IrType::I64);
        builder.ret(None);
        drop(builder);

        Simplification.run(&mut func);
        assert!(func.blocks[0].instrs.iter().any(|i| matches!(i, Instr::Shl { .. })));
    }

    #[test]
    fn chained_constant_shifts_fuse_into_one() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        let mut builder = HirBuilder::new(&mut func);
        let a = builder.load_context(0x10, IrType::I64);
        let two = builder.i64(2);
        let shifted_once = builder.shl(a, two, IrType::I64);
        let three = builder.i64(3);
        let shifted_twice = builder.shl(shifted_once, three, IrType::I64);
        builder.ret(None);
        drop(builder);

        Simplification.run(&mut func);
        let fused = func.blocks[0].instrs.iter().find_map(|i| match i {
            Instr::Shl { dest, lhs, rhs } if *dest == shifted_twice => Some((*lhs, *rhs)),
            _ => None,
        });
        let (lhs, rhs) = fused.expect("shifted_twice is still defined by a Shl");
        assert_eq!(lhs, a);
        let combined = func.blocks[0].instrs.iter().find_map(|c| match c {
            Instr::ConstI8 { dest, value } if *dest == rhs => Some(*value),
            _ => None,
        });
        assert_eq!(combined, Some(5));
    }

    #[test]
    fn truncate_after_zero_extend_back_to_the_original_width_becomes_a_move() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        let mut builder = HirBuilder::new(&mut func);
        let a = builder.load_context(0x10, IrType::I32);
        let widened = builder.zero_extend(a, IrType::I64);
        let _back = builder.truncate(widened, IrType::I32);
        builder.ret(None);
        drop(builder);

        Simplification.run(&mut func);
        assert!(matches!(func.blocks[0].instrs.last(), Some(Instr::Move { .. })));
    }
}

//! Interpreter backend (oracle)
//!
//! Does not emit host machine code. `compile_function` walks the HIR
//! directly into a flat, byte-compiled `IvmOp` program — one level below
//! HIR, with control-flow targets resolved to program offsets instead of
//! `BlockId`s and values addressed by a dense slot index instead of a
//! `ValueRef`. `execute` interprets that program against a guest register
//! file and the flat guest memory.
//!
//! This backend is the correctness reference: every opcode accepted by
//! the decoder must behave identically here and on the x64 backend before
//! the x64 sequence table gains an entry for it.

use crate::context::PpcContext;
use crate::error::{BackendError, RuntimeError};
use crate::ir::instr::{BlockId, CrBit, CrField, HirFunction, Instr, Signedness, Terminator, TrapReason, ValueRef};
use crate::ir::types::{Endianness, IrType};
use crate::memory::Memory;

use super::traits::{Backend, CompiledCode, GuestCallHandler, MachineInfo, TargetArch};

/// One step of the flat interpreter program
#[derive(Debug, Clone)]
pub enum IvmOp {
    Instr(Instr),
    Jump { target: usize },
    BranchTrue { cond: ValueRef, then_pc: usize, else_pc: usize },
    BranchFalse { cond: ValueRef, then_pc: usize, else_pc: usize },
    Return { value: Option<ValueRef> },
    /// A `Jump` whose target was the block laid out immediately next;
    /// falls through without touching the program counter.
    Nop,
}

/// The byte-compiled form `compile_function` produces
#[derive(Debug, Clone)]
pub struct IvmProgram {
    pub ops: Vec<IvmOp>,
    /// One past the highest `ValueRef` index referenced; sizes the slot file
    pub slot_count: u32,
}

pub fn lower_to_ivm(func: &HirFunction) -> IvmProgram {
    // Blocks are laid out by ordinal when Finalization has run; fall back
    // to declaration order for a function still under construction.
    let mut order: Vec<BlockId> = func.blocks.iter().map(|b| b.id).collect();
    order.sort_by_key(|id| func.block(*id).ordinal.unwrap_or(id.0));

    let mut block_start = vec![0usize; func.blocks.len()];
    let mut ops = Vec::new();
    for &id in &order {
        block_start[id.0 as usize] = ops.len();
        for instr in &func.block(id).instrs {
            ops.push(IvmOp::Instr(instr.clone()));
        }
        // terminator placeholder, patched below once every block's start is known
        ops.push(IvmOp::Return { value: None });
    }

    let mut cursor = 0usize;
    for &id in &order {
        let block = func.block(id);
        let body_len = block.instrs.len();
        cursor += body_len;
        ops[cursor] = match &block.terminator {
            Terminator::Jump(target) if block_start[target.0 as usize] == cursor + 1 => IvmOp::Nop,
            Terminator::Jump(target) => IvmOp::Jump { target: block_start[target.0 as usize] },
            Terminator::BranchTrue { cond, then_block, else_block } => IvmOp::BranchTrue {
                cond: *cond,
                then_pc: block_start[then_block.0 as usize],
                else_pc: block_start[else_block.0 as usize],
            },
            Terminator::BranchFalse { cond, then_block, else_block } => IvmOp::BranchFalse {
                cond: *cond,
                then_pc: block_start[then_block.0 as usize],
                else_pc: block_start[else_block.0 as usize],
            },
            Terminator::Return(value) => IvmOp::Return { value: *value },
            Terminator::Unset => IvmOp::Return { value: None },
        };
        cursor += 1;
    }

    let slot_count = func.value_types.keys().map(|v| v.0 + 1).max().unwrap_or(0);
    IvmProgram { ops, slot_count }
}

/// Dense storage for SSA values during interpretation. Integers and floats
/// are kept as raw bit patterns in the low 64 bits; vectors use all 128.
#[derive(Clone, Copy, Default)]
struct Slot(u128);

impl Slot {
    fn i64(v: i64) -> Self { Slot(v as u64 as u128) }
    fn u64(v: u64) -> Self { Slot(v as u128) }
    fn f64(v: f64) -> Self { Slot(v.to_bits() as u128) }
    fn v128(lanes: [u32; 4]) -> Self {
        let bits = (lanes[0] as u128) | ((lanes[1] as u128) << 32) | ((lanes[2] as u128) << 64) | ((lanes[3] as u128) << 96);
        Slot(bits)
    }
    fn bool_(v: bool) -> Self { Slot(v as u128) }

    fn as_i64(&self) -> i64 { self.0 as u64 as i64 }
    fn as_u64(&self) -> u64 { self.0 as u64 }
    fn as_i32(&self) -> i32 { self.0 as u32 as i32 }
    fn as_u32(&self) -> u32 { self.0 as u32 }
    fn as_f64(&self) -> f64 { f64::from_bits(self.0 as u64) }
    fn as_bool(&self) -> bool { (self.0 & 1) != 0 }
    fn as_lanes(&self) -> [u32; 4] {
        [
            self.0 as u32,
            (self.0 >> 32) as u32,
            (self.0 >> 64) as u32,
            (self.0 >> 96) as u32,
        ]
    }
}

/// Executes an `IvmProgram` against a live guest context and memory
pub struct Interpreter;

impl Interpreter {
    pub fn execute(
        program: &IvmProgram,
        ctx: &mut PpcContext,
        memory: &Memory,
        calls: &dyn GuestCallHandler,
    ) -> Result<(), RuntimeError> {
        let mut slots = vec![Slot::default(); program.slot_count as usize];
        let mut pc = 0usize;

        while pc < program.ops.len() {
            match &program.ops[pc] {
                IvmOp::Instr(instr) => {
                    exec_instr(instr, &mut slots, ctx, memory, calls)?;
                    pc += 1;
                }
                IvmOp::Jump { target } => pc = *target,
                IvmOp::BranchTrue { cond, then_pc, else_pc } => {
                    pc = if slots[cond.0 as usize].as_bool() { *then_pc } else { *else_pc };
                }
                IvmOp::BranchFalse { cond, then_pc, else_pc } => {
                    pc = if slots[cond.0 as usize].as_bool() { *else_pc } else { *then_pc };
                }
                IvmOp::Return { .. } => return Ok(()),
                IvmOp::Nop => pc += 1,
            }
        }
        Ok(())
    }
}

fn exec_instr(
    instr: &Instr,
    slots: &mut [Slot],
    ctx: &mut PpcContext,
    memory: &Memory,
    calls: &dyn GuestCallHandler,
) -> Result<(), RuntimeError> {
    let s = |v: ValueRef, slots: &[Slot]| slots[v.0 as usize];
    let instr = instr.clone();
    match instr {
        Instr::ConstI8 { dest, value } => slots[dest.0 as usize] = Slot::i64(value as i64),
        Instr::ConstI16 { dest, value } => slots[dest.0 as usize] = Slot::i64(value as i64),
        Instr::ConstI32 { dest, value } => slots[dest.0 as usize] = Slot::i64(value as i64),
        Instr::ConstI64 { dest, value } => slots[dest.0 as usize] = Slot::i64(value),
        Instr::ConstF32 { dest, value } => slots[dest.0 as usize] = Slot::f64(value as f64),
        Instr::ConstF64 { dest, value } => slots[dest.0 as usize] = Slot::f64(value),
        Instr::ConstV128 { dest, value } => slots[dest.0 as usize] = Slot::v128(value),

        Instr::LoadContext { dest, offset, ty } => {
            slots[dest.0 as usize] = load_context_slot(ctx, offset, ty);
        }
        Instr::StoreContext { offset, value, .. } => {
            store_context_slot(ctx, offset, s(value, slots));
        }

        Instr::Load { dest, addr, ty, endian } => {
            let a = s(addr, slots).as_u32();
            slots[dest.0 as usize] = load_memory(memory, a, ty, endian)?;
        }
        Instr::Store { addr, value, ty, endian, .. } => {
            let a = s(addr, slots).as_u32();
            store_memory(memory, a, s(value, slots), ty, endian)?;
        }
        Instr::LoadReserved { dest, addr, ty } => {
            let a = s(addr, slots).as_u32();
            slots[dest.0 as usize] = load_memory(memory, a, ty, Endianness::Big)?;
            ctx.reservation_address = Some(a);
            ctx.reservation_value = slots[dest.0 as usize].as_u64();
        }
        Instr::StoreConditional { dest, addr, value, ty, .. } => {
            let a = s(addr, slots).as_u32();
            let success = ctx.reservation_address == Some(a);
            if success {
                store_memory(memory, a, s(value, slots), ty, Endianness::Big)?;
            }
            ctx.reservation_address = None;
            slots[dest.0 as usize] = Slot::bool_(success);
            ctx.cr.fields[0].lt = false;
            ctx.cr.fields[0].gt = false;
            ctx.cr.fields[0].eq = success;
        }
        Instr::MemoryBarrier { .. } => {}

        Instr::Add { dest, lhs, rhs } => slots[dest.0 as usize] = Slot::i64(s(lhs, slots).as_i64().wrapping_add(s(rhs, slots).as_i64())),
        Instr::AddCarrying { dest, carry_out, lhs, rhs } => {
            let (l, r) = (s(lhs, slots).as_u64(), s(rhs, slots).as_u64());
            let (sum, carry) = l.overflowing_add(r);
            slots[dest.0 as usize] = Slot::u64(sum);
            slots[carry_out.0 as usize] = Slot::bool_(carry);
        }
        Instr::AddExtended { dest, carry_out, lhs, rhs, carry_in } => {
            let (l, r, c) = (s(lhs, slots).as_u64(), s(rhs, slots).as_u64(), s(carry_in, slots).as_bool() as u64);
            let (sum1, carry1) = l.overflowing_add(r);
            let (sum2, carry2) = sum1.overflowing_add(c);
            slots[dest.0 as usize] = Slot::u64(sum2);
            slots[carry_out.0 as usize] = Slot::bool_(carry1 || carry2);
        }
        Instr::AddOverflowing { dest, overflow_out, lhs, rhs } => {
            let (l, r) = (s(lhs, slots).as_i64(), s(rhs, slots).as_i64());
            let (sum, overflow) = l.overflowing_add(r);
            slots[dest.0 as usize] = Slot::i64(sum);
            slots[overflow_out.0 as usize] = Slot::bool_(overflow);
        }
        Instr::Sub { dest, lhs, rhs } => slots[dest.0 as usize] = Slot::i64(s(lhs, slots).as_i64().wrapping_sub(s(rhs, slots).as_i64())),
        Instr::SubCarrying { dest, carry_out, lhs, rhs } => {
            let (l, r) = (s(lhs, slots).as_u64(), s(rhs, slots).as_u64());
            let (diff, borrow) = l.overflowing_sub(r);
            slots[dest.0 as usize] = Slot::u64(diff);
            slots[carry_out.0 as usize] = Slot::bool_(!borrow);
        }
        Instr::SubExtended { dest, carry_out, lhs, rhs, carry_in } => {
            let (l, r, c) = (s(lhs, slots).as_u64(), s(rhs, slots).as_u64(), s(carry_in, slots).as_bool() as u64);
            let (d1, b1) = l.overflowing_sub(r);
            let (d2, b2) = d1.overflowing_sub(1u64.wrapping_sub(c));
            slots[dest.0 as usize] = Slot::u64(d2);
            slots[carry_out.0 as usize] = Slot::bool_(!(b1 || b2));
        }
        Instr::SubOverflowing { dest, overflow_out, lhs, rhs } => {
            let (l, r) = (s(lhs, slots).as_i64(), s(rhs, slots).as_i64());
            let (diff, overflow) = l.overflowing_sub(r);
            slots[dest.0 as usize] = Slot::i64(diff);
            slots[overflow_out.0 as usize] = Slot::bool_(overflow);
        }
        Instr::Neg { dest, src } => slots[dest.0 as usize] = Slot::i64(s(src, slots).as_i64().wrapping_neg()),
        Instr::Mul { dest, lhs, rhs } => slots[dest.0 as usize] = Slot::i64(s(lhs, slots).as_i64().wrapping_mul(s(rhs, slots).as_i64())),
        Instr::MulHigh { dest, lhs, rhs, signedness } => {
            let result = match signedness {
                Signedness::Signed => (((s(lhs, slots).as_i64() as i128) * (s(rhs, slots).as_i64() as i128)) >> 64) as i64,
                Signedness::Unsigned => (((s(lhs, slots).as_u64() as u128) * (s(rhs, slots).as_u64() as u128)) >> 64) as i64,
            };
            slots[dest.0 as usize] = Slot::i64(result);
        }
        Instr::MulOverflowing { dest, overflow_out, lhs, rhs } => {
            let (l, r) = (s(lhs, slots).as_i64(), s(rhs, slots).as_i64());
            let (prod, overflow) = l.overflowing_mul(r);
            slots[dest.0 as usize] = Slot::i64(prod);
            slots[overflow_out.0 as usize] = Slot::bool_(overflow);
        }
        Instr::Div { dest, lhs, rhs, signedness } => {
            let result = match signedness {
                Signedness::Signed => {
                    let (l, r) = (s(lhs, slots).as_i64(), s(rhs, slots).as_i64());
                    if r == 0 { 0 } else { l.wrapping_div(r) }
                }
                Signedness::Unsigned => {
                    let (l, r) = (s(lhs, slots).as_u64(), s(rhs, slots).as_u64());
                    (if r == 0 { 0 } else { l / r }) as i64
                }
            };
            slots[dest.0 as usize] = Slot::i64(result);
        }
        Instr::Rem { dest, lhs, rhs, signedness } => {
            let result = match signedness {
                Signedness::Signed => {
                    let (l, r) = (s(lhs, slots).as_i64(), s(rhs, slots).as_i64());
                    if r == 0 { 0 } else { l.wrapping_rem(r) }
                }
                Signedness::Unsigned => {
                    let (l, r) = (s(lhs, slots).as_u64(), s(rhs, slots).as_u64());
                    (if r == 0 { 0 } else { l % r }) as i64
                }
            };
            slots[dest.0 as usize] = Slot::i64(result);
        }

        Instr::And { dest, lhs, rhs } => slots[dest.0 as usize] = Slot::u64(s(lhs, slots).as_u64() & s(rhs, slots).as_u64()),
        Instr::Or { dest, lhs, rhs } => slots[dest.0 as usize] = Slot::u64(s(lhs, slots).as_u64() | s(rhs, slots).as_u64()),
        Instr::Xor { dest, lhs, rhs } => slots[dest.0 as usize] = Slot::u64(s(lhs, slots).as_u64() ^ s(rhs, slots).as_u64()),
        Instr::Not { dest, src } => slots[dest.0 as usize] = Slot::u64(!s(src, slots).as_u64()),
        Instr::Shl { dest, lhs, rhs } => slots[dest.0 as usize] = Slot::u64(s(lhs, slots).as_u64().wrapping_shl(s(rhs, slots).as_u32())),
        Instr::Shr { dest, lhs, rhs, signedness } => {
            let result = match signedness {
                Signedness::Signed => s(lhs, slots).as_i64().wrapping_shr(s(rhs, slots).as_u32()) as u64,
                Signedness::Unsigned => s(lhs, slots).as_u64().wrapping_shr(s(rhs, slots).as_u32()),
            };
            slots[dest.0 as usize] = Slot::u64(result);
        }
        Instr::Rotate { dest, src, amount } => {
            slots[dest.0 as usize] = Slot::u64(s(src, slots).as_u64().rotate_left(s(amount, slots).as_u32() & 63));
        }
        Instr::RotateAndMask { dest, src, rotate, mask_begin, mask_end } => {
            let rotated = (s(src, slots).as_u32()).rotate_left(rotate as u32);
            let mask = mask_range(mask_begin, mask_end);
            slots[dest.0 as usize] = Slot::u64((rotated & mask) as u64);
        }
        Instr::CountLeadingZeros { dest, src } => slots[dest.0 as usize] = Slot::u64(s(src, slots).as_u64().leading_zeros() as u64),

        Instr::ZeroExtend { dest, src } => slots[dest.0 as usize] = Slot::u64(s(src, slots).as_u64()),
        Instr::SignExtend { dest, src } => slots[dest.0 as usize] = Slot::i64(s(src, slots).as_i64()),
        Instr::Truncate { dest, src } => slots[dest.0 as usize] = Slot::u64(s(src, slots).as_u64()),
        Instr::IntToFloat { dest, src, signedness } => {
            let v = match signedness {
                Signedness::Signed => s(src, slots).as_i64() as f64,
                Signedness::Unsigned => s(src, slots).as_u64() as f64,
            };
            slots[dest.0 as usize] = Slot::f64(v);
        }
        Instr::FloatToInt { dest, src, signedness } => {
            let v = s(src, slots).as_f64();
            let bits = match signedness {
                Signedness::Signed => (v as i64) as u64,
                Signedness::Unsigned => v as u64,
            };
            slots[dest.0 as usize] = Slot::u64(bits);
        }
        Instr::FloatCast { dest, src } => slots[dest.0 as usize] = Slot::f64(s(src, slots).as_f64()),
        Instr::Bitcast { dest, src, .. } => slots[dest.0 as usize] = s(src, slots),

        Instr::FAdd { dest, lhs, rhs, .. } => slots[dest.0 as usize] = Slot::f64(s(lhs, slots).as_f64() + s(rhs, slots).as_f64()),
        Instr::FSub { dest, lhs, rhs, .. } => slots[dest.0 as usize] = Slot::f64(s(lhs, slots).as_f64() - s(rhs, slots).as_f64()),
        Instr::FMul { dest, lhs, rhs, .. } => slots[dest.0 as usize] = Slot::f64(s(lhs, slots).as_f64() * s(rhs, slots).as_f64()),
        Instr::FDiv { dest, lhs, rhs, .. } => slots[dest.0 as usize] = Slot::f64(s(lhs, slots).as_f64() / s(rhs, slots).as_f64()),
        Instr::FNeg { dest, src } => slots[dest.0 as usize] = Slot::f64(-s(src, slots).as_f64()),
        Instr::FAbs { dest, src } => slots[dest.0 as usize] = Slot::f64(s(src, slots).as_f64().abs()),
        Instr::FMulAdd { dest, a, b, c, .. } => {
            slots[dest.0 as usize] = Slot::f64(s(a, slots).as_f64().mul_add(s(b, slots).as_f64(), s(c, slots).as_f64()));
        }
        Instr::FSqrt { dest, src } => slots[dest.0 as usize] = Slot::f64(s(src, slots).as_f64().sqrt()),

        Instr::ICmp { dest, lhs, rhs, signedness, op } => {
            let result = match signedness {
                Signedness::Signed => cmp_bool(s(lhs, slots).as_i64(), s(rhs, slots).as_i64(), op),
                Signedness::Unsigned => cmp_bool(s(lhs, slots).as_u64(), s(rhs, slots).as_u64(), op),
            };
            slots[dest.0 as usize] = Slot::bool_(result);
        }
        Instr::FCmp { dest, lhs, rhs, op } => {
            slots[dest.0 as usize] = Slot::bool_(cmp_bool(s(lhs, slots).as_f64(), s(rhs, slots).as_f64(), op));
        }

        Instr::SetCrField { field, lhs, rhs, signedness } => {
            let (lt, gt, eq) = match signedness {
                Signedness::Signed => {
                    let (l, r) = (s(lhs, slots).as_i64(), s(rhs, slots).as_i64());
                    (l < r, l > r, l == r)
                }
                Signedness::Unsigned => {
                    let (l, r) = (s(lhs, slots).as_u64(), s(rhs, slots).as_u64());
                    (l < r, l > r, l == r)
                }
            };
            let nibble = &mut ctx.cr.fields[field.0 as usize];
            nibble.lt = lt;
            nibble.gt = gt;
            nibble.eq = eq;
        }
        Instr::GetCrBit { dest, field, bit } => {
            slots[dest.0 as usize] = Slot::bool_(read_cr_bit(ctx, field, bit));
        }
        Instr::SetCrBit { field, bit, value } => {
            write_cr_bit(ctx, field, bit, s(value, slots).as_bool());
        }
        Instr::MoveFromCr { dest } => slots[dest.0 as usize] = Slot::u64(ctx.cr.as_u32() as u64),
        Instr::MoveToCrFields { value, field_mask } => {
            let bits = s(value, slots).as_u32();
            for field in 0..8u8 {
                if field_mask & (0x80 >> field) != 0 {
                    let nibble_bits = (bits >> (28 - field as u32 * 4)) & 0xf;
                    ctx.cr.fields[field as usize] = crate::context::CrNibble::from_bits(nibble_bits as u8);
                }
            }
        }

        Instr::GetXerCarry { dest } => slots[dest.0 as usize] = Slot::bool_(ctx.xer.carry),
        Instr::SetXerCarry { value } => ctx.xer.carry = s(value, slots).as_bool(),
        Instr::SetXerOverflow { value } => {
            let v = s(value, slots).as_bool();
            ctx.xer.overflow = v;
            ctx.xer.summary_overflow |= v;
        }
        Instr::GetXerCount { dest } => slots[dest.0 as usize] = Slot::u64(ctx.xer.byte_count as u64),
        Instr::SetXerCount { value } => ctx.xer.byte_count = s(value, slots).as_u64() as u8,

        Instr::VSplat { dest, src } => {
            let lane = s(src, slots).as_u32();
            slots[dest.0 as usize] = Slot::v128([lane; 4]);
        }
        Instr::VExtractLane { dest, src, lane } => slots[dest.0 as usize] = Slot::u64(s(src, slots).as_lanes()[lane as usize] as u64),
        Instr::VInsertLane { dest, src, lane, value } => {
            let mut lanes = s(src, slots).as_lanes();
            lanes[lane as usize] = s(value, slots).as_u32();
            slots[dest.0 as usize] = Slot::v128(lanes);
        }
        Instr::VSwizzle { dest, src, lanes } => {
            let source = s(src, slots).as_lanes();
            let out = [source[lanes[0] as usize], source[lanes[1] as usize], source[lanes[2] as usize], source[lanes[3] as usize]];
            slots[dest.0 as usize] = Slot::v128(out);
        }
        Instr::VAdd { dest, lhs, rhs } => slots[dest.0 as usize] = vector_binop(s(lhs, slots), s(rhs, slots), u32::wrapping_add),
        Instr::VSub { dest, lhs, rhs } => slots[dest.0 as usize] = vector_binop(s(lhs, slots), s(rhs, slots), u32::wrapping_sub),
        Instr::VMul { dest, lhs, rhs } => slots[dest.0 as usize] = vector_binop(s(lhs, slots), s(rhs, slots), u32::wrapping_mul),
        Instr::VAnd { dest, lhs, rhs } => slots[dest.0 as usize] = vector_binop(s(lhs, slots), s(rhs, slots), |a, b| a & b),
        Instr::VOr { dest, lhs, rhs } => slots[dest.0 as usize] = vector_binop(s(lhs, slots), s(rhs, slots), |a, b| a | b),
        Instr::VXor { dest, lhs, rhs } => slots[dest.0 as usize] = vector_binop(s(lhs, slots), s(rhs, slots), |a, b| a ^ b),

        Instr::Call { dest, target, .. } => {
            calls.call(target, ctx)?;
            if let Some(dest) = dest {
                slots[dest.0 as usize] = Slot::u64(ctx.gpr[3]);
            }
        }
        Instr::CallIndirect { dest, target, .. } => {
            let addr = s(target, slots).as_u32();
            calls.call(addr, ctx)?;
            if let Some(dest) = dest {
                slots[dest.0 as usize] = Slot::u64(ctx.gpr[3]);
            }
        }
        Instr::Trap { cia, reason } => {
            return Err(match reason {
                TrapReason::InvalidInstruction => RuntimeError::InvalidMemoryAccess(cia),
                TrapReason::DebugBreak => RuntimeError::InvalidMemoryAccess(cia),
            });
        }

        Instr::Phi { .. } => {
            // Phis are only introduced by passes that run after this backend
            // would be invoked; none are emitted by the current pipeline.
        }
        Instr::Move { dest, src } => slots[dest.0 as usize] = s(src, slots),
    }
    Ok(())
}

fn mask_range(begin: u8, end: u8) -> u32 {
    let mut mask = 0u32;
    let mut i = begin;
    loop {
        mask |= 0x8000_0000u32 >> i;
        if i == end {
            break;
        }
        i = (i + 1) % 32;
    }
    mask
}

fn cmp_bool<T: PartialOrd>(lhs: T, rhs: T, op: crate::ir::instr::CmpOp) -> bool {
    use crate::ir::instr::CmpOp;
    match op {
        CmpOp::Eq => lhs == rhs,
        CmpOp::Ne => lhs != rhs,
        CmpOp::Lt => lhs < rhs,
        CmpOp::Le => lhs <= rhs,
        CmpOp::Gt => lhs > rhs,
        CmpOp::Ge => lhs >= rhs,
    }
}

fn vector_binop(lhs: Slot, rhs: Slot, op: impl Fn(u32, u32) -> u32) -> Slot {
    let (l, r) = (lhs.as_lanes(), rhs.as_lanes());
    Slot::v128([op(l[0], r[0]), op(l[1], r[1]), op(l[2], r[2]), op(l[3], r[3])])
}

fn read_cr_bit(ctx: &PpcContext, field: CrField, bit: CrBit) -> bool {
    let nibble = &ctx.cr.fields[field.0 as usize];
    match bit {
        CrBit::Lt => nibble.lt,
        CrBit::Gt => nibble.gt,
        CrBit::Eq => nibble.eq,
        CrBit::So => nibble.so,
    }
}

fn write_cr_bit(ctx: &mut PpcContext, field: CrField, bit: CrBit, value: bool) {
    let nibble = &mut ctx.cr.fields[field.0 as usize];
    match bit {
        CrBit::Lt => nibble.lt = value,
        CrBit::Gt => nibble.gt = value,
        CrBit::Eq => nibble.eq = value,
        CrBit::So => nibble.so = value,
    }
}

fn load_context_slot(ctx: &PpcContext, offset: u32, ty: IrType) -> Slot {
    // Safety: `offset` is always produced by `context::*_offset`, which
    // computes a byte offset into `PpcContext` via `offset_of!`.
    unsafe {
        let base = (ctx as *const PpcContext as *const u8).add(offset as usize);
        match ty {
            IrType::I8 => Slot::i64(*base as i8 as i64),
            IrType::I16 => Slot::i64(*(base as *const i16) as i64),
            IrType::I32 => Slot::i64(*(base as *const i32) as i64),
            IrType::I64 => Slot::i64(*(base as *const i64)),
            IrType::F32 => Slot::f64(*(base as *const f32) as f64),
            IrType::F64 => Slot::f64(*(base as *const f64)),
            IrType::V128 => Slot::v128(*(base as *const [u32; 4])),
        }
    }
}

/// `StoreContext` carries no `IrType` of its own, so the width is inferred
/// from where in `PpcContext` the offset lands: the vector bank is the only
/// 16-byte-wide field, everything else (gpr, fpr, lr, ctr) is 8 bytes.
fn store_context_slot(ctx: &mut PpcContext, offset: u32, value: Slot) {
    let vr_start = std::mem::offset_of!(PpcContext, vr) as u32;
    let vr_end = vr_start + (crate::context::VR_COUNT as u32) * 16;
    unsafe {
        let base = (ctx as *mut PpcContext as *mut u8).add(offset as usize);
        if offset >= vr_start && offset < vr_end {
            *(base as *mut [u32; 4]) = value.as_lanes();
        } else {
            *(base as *mut u64) = value.0 as u64;
        }
    }
}

fn load_memory(memory: &Memory, addr: u32, ty: IrType, endian: Endianness) -> Result<Slot, RuntimeError> {
    let map_err = |_| RuntimeError::InvalidMemoryAccess(addr);
    let slot = match (ty, endian) {
        (IrType::I8, _) => Slot::i64(memory.read_u8(addr).map_err(map_err)? as i8 as i64),
        (IrType::I16, Endianness::Big) => Slot::i64(memory.read_u16(addr).map_err(map_err)? as i16 as i64),
        (IrType::I32, Endianness::Big) => Slot::i64(memory.read_u32(addr).map_err(map_err)? as i32 as i64),
        (IrType::I64, Endianness::Big) => Slot::i64(memory.read_u64(addr).map_err(map_err)? as i64),
        (IrType::F32, Endianness::Big) => Slot::f64(f32::from_bits(memory.read_u32(addr).map_err(map_err)?) as f64),
        (IrType::F64, Endianness::Big) => Slot::f64(f64::from_bits(memory.read_u64(addr).map_err(map_err)?)),
        (_, Endianness::Little) => return Err(RuntimeError::InvalidMemoryAccess(addr)),
        (IrType::V128, _) => return Err(RuntimeError::InvalidMemoryAccess(addr)),
    };
    Ok(slot)
}

fn store_memory(memory: &Memory, addr: u32, value: Slot, ty: IrType, endian: Endianness) -> Result<(), RuntimeError> {
    let map_err = |_| RuntimeError::InvalidMemoryAccess(addr);
    match (ty, endian) {
        (IrType::I8, _) => memory.write_u8(addr, value.as_u64() as u8).map_err(map_err),
        (IrType::I16, Endianness::Big) => memory.write_u16(addr, value.as_u64() as u16).map_err(map_err),
        (IrType::I32, Endianness::Big) => memory.write_u32(addr, value.as_u32()).map_err(map_err),
        (IrType::I64, Endianness::Big) => memory.write_u64(addr, value.as_u64()).map_err(map_err),
        (IrType::F32, Endianness::Big) => memory.write_u32(addr, (value.as_f64() as f32).to_bits()).map_err(map_err),
        (IrType::F64, Endianness::Big) => memory.write_u64(addr, value.as_f64().to_bits()).map_err(map_err),
        _ => Err(RuntimeError::InvalidMemoryAccess(addr)),
    }
}

/// `Backend` adapter: serializes the `IvmProgram` pointer so it can flow
/// through the same `CompiledCode`/code-cache pipeline as the x64 backend.
/// The runtime recognizes an interpreted function by `target_arch()` and
/// calls `Interpreter::execute` directly rather than jumping into `code`.
pub struct InterpreterBackend;

impl Backend for InterpreterBackend {
    fn name(&self) -> &'static str {
        "interpreter"
    }

    fn compile_function(&self, func: &HirFunction) -> Result<CompiledCode, BackendError> {
        let program = lower_to_ivm(func);
        let boxed = Box::new(program);
        let ptr = Box::into_raw(boxed) as usize;
        Ok(CompiledCode { code: ptr.to_le_bytes().to_vec(), entry_offset: 0 })
    }

    fn machine_info(&self) -> MachineInfo {
        MachineInfo { integer_registers: 0, float_registers: 0, call_clobbered_mask: 0 }
    }

    fn target_arch(&self) -> TargetArch {
        TargetArch::Interpreted
    }
}

/// Recovers the `IvmProgram` pointer `InterpreterBackend::compile_function` packed
/// into `CompiledCode::code`. The caller must guarantee `code` came from that call.
///
/// # Safety
/// `code` must be the exact byte vector produced by `InterpreterBackend::compile_function`.
pub unsafe fn program_from_compiled(code: &[u8]) -> &'static IvmProgram {
    let ptr = usize::from_le_bytes(code.try_into().expect("interpreter CompiledCode is always 8 bytes"));
    &*(ptr as *const IvmProgram)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::HirBuilder;
    use crate::memory::Memory;
    use crate::pipeline::{cfg_simplify, finalize};
    use crate::pipeline::OptPass;
    use super::super::traits::NoGuestCalls;

    fn run(func: &mut HirFunction, ctx: &mut PpcContext, memory: &Memory) {
        cfg_simplify::ControlFlowSimplification.run(func);
        finalize::Finalization.run(func);
        let program = lower_to_ivm(func);
        Interpreter::execute(&program, ctx, memory, &NoGuestCalls).unwrap();
    }

    #[test]
    fn adds_two_constants_and_returns() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        let mut ctx = PpcContext::new();
        let memory = Memory::from_vec(vec![0u8; 0x10000]);
        {
            let mut builder = HirBuilder::new(&mut func);
            let a = builder.i64(2);
            let b = builder.i64(3);
            let sum = builder.add(a, b, IrType::I64);
            builder.store_context(crate::context::PpcContext::gpr_offset(3), sum);
            builder.ret(None);
        }

        run(&mut func, &mut ctx, &memory);
        assert_eq!(ctx.gpr[3], 5);
    }

    #[test]
    fn branch_true_takes_the_then_block() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        let entry = func.add_block();
        let then_block = func.add_block();
        let else_block = func.add_block();
        let mut ctx = PpcContext::new();
        let memory = Memory::from_vec(vec![0u8; 0x10000]);
        {
            let mut builder = HirBuilder::new(&mut func);
            builder.switch_to_block(entry);
            let cond = builder.i64(1);
            let cond = builder.truncate(cond, IrType::I8);
            builder.branch_true(cond, then_block, else_block);

            builder.switch_to_block(then_block);
            let one = builder.i64(1);
            builder.store_context(crate::context::PpcContext::gpr_offset(3), one);
            builder.ret(None);

            builder.switch_to_block(else_block);
            let two = builder.i64(2);
            builder.store_context(crate::context::PpcContext::gpr_offset(3), two);
            builder.ret(None);
        }

        run(&mut func, &mut ctx, &memory);
        assert_eq!(ctx.gpr[3], 1);
    }

    #[test]
    fn jump_to_the_lexically_next_block_is_elided() {
        // entry branches to then_block/else_block, both of which jump to a
        // shared tail; tail has two predecessors so ControlFlowSimplification
        // can't merge it into either one, but layout happens to place it
        // right after else_block, so only that jump is elided.
        let mut func = HirFunction::new(0x1000, "f".to_string());
        let entry = func.add_block();
        let then_block = func.add_block();
        let else_block = func.add_block();
        let tail = func.add_block();
        {
            let mut builder = HirBuilder::new(&mut func);
            builder.switch_to_block(entry);
            let cond = builder.i64(1);
            let cond = builder.truncate(cond, IrType::I8);
            builder.branch_true(cond, then_block, else_block);

            builder.switch_to_block(then_block);
            let one = builder.i64(1);
            builder.store_context(crate::context::PpcContext::gpr_offset(3), one);
            builder.branch(tail);

            builder.switch_to_block(else_block);
            let two = builder.i64(2);
            builder.store_context(crate::context::PpcContext::gpr_offset(3), two);
            builder.branch(tail);

            builder.switch_to_block(tail);
            builder.ret(None);
        }

        cfg_simplify::ControlFlowSimplification.run(&mut func);
        finalize::Finalization.run(&mut func);
        let program = lower_to_ivm(&func);
        assert!(program.ops.iter().any(|op| matches!(op, IvmOp::Nop)));
        assert!(program.ops.iter().any(|op| matches!(op, IvmOp::Jump { .. })));

        let mut ctx = PpcContext::new();
        let memory = Memory::from_vec(vec![0u8; 0x10000]);
        Interpreter::execute(&program, &mut ctx, &memory, &NoGuestCalls).unwrap();
        assert_eq!(ctx.gpr[3], 1);
    }

    #[test]
    fn stwcx_fails_without_a_live_reservation() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        let mut ctx = PpcContext::new();
        let memory = Memory::from_vec(vec![0u8; 0x10000]);
        let result_slot;
        {
            let mut builder = HirBuilder::new(&mut func);
            let addr = builder.i64(0x100);
            let addr = builder.truncate(addr, IrType::I32);
            let value = builder.i64(7);
            let value = builder.truncate(value, IrType::I32);
            let ok = builder.store_conditional(addr, value, IrType::I32);
            result_slot = ok;
            builder.store_context(crate::context::PpcContext::gpr_offset(3), ok);
            builder.ret(None);
        }

        run(&mut func, &mut ctx, &memory);
        assert_eq!(ctx.gpr[3], 0);
        let _ = result_slot;
    }
}

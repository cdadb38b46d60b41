//! PPC instruction lifting: raw words to HIR
//!
//! Takes a [`ScanResult`](super::scanner::ScanResult) and the guest memory
//! it was scanned from and produces a fully-formed [`HirFunction`]. Each
//! scanned block's body is lifted instruction-by-instruction; the
//! terminator word (if the block ends in a branch/call) is translated
//! separately since its control-flow edges are already known from the
//! scan phase.
//!
//! Opcode coverage here is deliberately partial: arithmetic-with-carry,
//! compare, big-endian load/store, the reservation pair, and one VMX128
//! lane-permute instruction, which is what the end-to-end test scenarios
//! exercise. Anything else lowers to a [`TrapReason::InvalidInstruction`]
//! trap rather than failing the whole translation, matching how the
//! engine handles guest code it hasn't modeled yet.

use rustc_hash::FxHashMap;

use crate::context::PpcContext;
use crate::error::DecodeError;
use crate::ir::builder::HirBuilder;
use crate::ir::instr::{BlockId, CmpOp, CrBit, CrField, HirFunction, Signedness, TrapReason, ValueRef};
use crate::ir::types::IrType;
use crate::memory::Memory;

use super::scanner::{BlockEnd, ScanResult};

/// Lift every block in `scan` to HIR, producing a complete function
pub fn lift_function(memory: &Memory, scan: &ScanResult, name: String) -> Result<HirFunction, DecodeError> {
    let mut func = HirFunction::new(scan.entry, name);
    let mut addr_to_block: FxHashMap<u32, BlockId> = FxHashMap::default();

    let entry_block = func.add_block();
    addr_to_block.insert(scan.entry, entry_block);
    for block in &scan.blocks {
        if block.start == scan.entry {
            continue;
        }
        let id = func.add_block();
        addr_to_block.insert(block.start, id);
    }

    let mut builder = HirBuilder::new(&mut func);
    for block in &scan.blocks {
        let id = addr_to_block[&block.start];
        builder.switch_to_block(id);

        let has_terminator_word = !matches!(
            block.terminator,
            BlockEnd::Fallthrough(_) | BlockEnd::FunctionEnd
        );
        let body_end = if has_terminator_word { block.end - 4 } else { block.end };

        let mut addr = block.start;
        while addr < body_end {
            let word = memory
                .read_u32(addr)
                .map_err(|_| DecodeError::AddressOutOfRange(addr))?;
            lift_instruction(&mut builder, addr, word);
            addr = addr.wrapping_add(4);
        }

        lower_terminator(&mut builder, memory, block.end, &block.terminator, &addr_to_block)?;
    }

    Ok(func)
}

fn lower_terminator(
    builder: &mut HirBuilder,
    memory: &Memory,
    block_end: u32,
    terminator: &BlockEnd,
    addr_to_block: &FxHashMap<u32, BlockId>,
) -> Result<(), DecodeError> {
    match *terminator {
        BlockEnd::Jump(target) => {
            builder.branch(addr_to_block[&target]);
        }
        BlockEnd::Branch { taken, not_taken } => {
            let word_addr = block_end - 4;
            let word = memory
                .read_u32(word_addr)
                .map_err(|_| DecodeError::AddressOutOfRange(word_addr))?;
            let cond = lift_branch_condition(builder, word);
            builder.branch_true(cond, addr_to_block[&taken], addr_to_block[&not_taken]);
        }
        BlockEnd::Call { target, return_addr } => {
            // Guest calling convention threads arguments through gpr3-gpr10;
            // the call's HIR only needs to model the control edge itself,
            // since register state lives in the shared context struct. `bl`
            // still has to set LR to the instruction after it so the callee's
            // `blr` returns to the right place.
            let ret = builder.i64(return_addr as i64);
            builder.store_context(PpcContext::lr_offset(), ret);
            builder.call(target, vec![], false, IrType::I64);
            if addr_to_block.contains_key(&return_addr) {
                builder.branch(addr_to_block[&return_addr]);
            } else {
                builder.ret(None);
            }
        }
        BlockEnd::CallIndirectCtr { return_addr } => {
            let ctr = builder.load_context(PpcContext::ctr_offset(), IrType::I64);
            let ret = builder.i64(return_addr as i64);
            builder.store_context(PpcContext::lr_offset(), ret);
            builder.call_indirect(ctr, vec![], false, IrType::I64);
            if addr_to_block.contains_key(&return_addr) {
                builder.branch(addr_to_block[&return_addr]);
            } else {
                builder.ret(None);
            }
        }
        BlockEnd::BranchToLr => {
            let lr = builder.load_context(PpcContext::lr_offset(), IrType::I64);
            builder.ret(Some(lr));
        }
        BlockEnd::BranchToCtr => {
            let ctr = builder.load_context(PpcContext::ctr_offset(), IrType::I64);
            builder.ret(Some(ctr));
        }
        BlockEnd::Fallthrough(target) => {
            builder.branch(addr_to_block[&target]);
        }
        BlockEnd::FunctionEnd => {
            builder.ret(None);
        }
    }
    Ok(())
}

/// Decode `bc`'s BO/BI fields into the boolean value the block's two
/// successors branch on
fn lift_branch_condition(builder: &mut HirBuilder, word: u32) -> ValueRef {
    let bo = (word >> 21) & 0x1f;
    let bi = (word >> 16) & 0x1f;
    let field = CrField((bi / 4) as u8);
    let bit = match bi % 4 {
        0 => CrBit::Lt,
        1 => CrBit::Gt,
        2 => CrBit::Eq,
        _ => CrBit::So,
    };
    let raw = builder.get_cr_bit(field, bit);
    if bo & 0x02 != 0 {
        raw
    } else {
        builder.not(raw, IrType::I8)
    }
}

fn gpr(builder: &mut HirBuilder, n: u32) -> ValueRef {
    if n == 0 {
        builder.i64(0)
    } else {
        builder.load_context(PpcContext::gpr_offset(n as u8), IrType::I64)
    }
}

fn set_gpr(builder: &mut HirBuilder, n: u32, value: ValueRef) {
    builder.store_context(PpcContext::gpr_offset(n as u8), value);
}

fn load_vr(builder: &mut HirBuilder, n: u32) -> ValueRef {
    builder.load_context(PpcContext::vr_offset(n as u8), IrType::V128)
}

fn store_vr(builder: &mut HirBuilder, n: u32, value: ValueRef) {
    builder.store_context(PpcContext::vr_offset(n as u8), value);
}

fn sign_extend_16(value: u32) -> i64 {
    (value as i16) as i64
}

fn effective_address(builder: &mut HirBuilder, ra: u32, disp: i64) -> ValueRef {
    let base = gpr(builder, ra);
    let disp_val = builder.i64(disp);
    let ea64 = builder.add(base, disp_val, IrType::I64);
    builder.truncate(ea64, IrType::I32)
}

fn indexed_address(builder: &mut HirBuilder, ra: u32, rb: u32) -> ValueRef {
    let base = gpr(builder, ra);
    let index = gpr(builder, rb);
    let ea64 = builder.add(base, index, IrType::I64);
    builder.truncate(ea64, IrType::I32)
}

fn record_cr0(builder: &mut HirBuilder, dest: ValueRef) {
    let zero = builder.i64(0);
    builder.set_cr_field(CrField(0), dest, zero, Signedness::Signed);
}

/// Lift a single instruction word. Emits a trap for anything unrecognized.
fn lift_instruction(builder: &mut HirBuilder, addr: u32, word: u32) {
    let primary = (word >> 26) & 0x3f;
    match primary {
        // addi / addis (rA == 0 means load-immediate rather than add)
        14 | 15 => {
            let rd = (word >> 21) & 0x1f;
            let ra = (word >> 16) & 0x1f;
            let simm = sign_extend_16(word & 0xffff);
            let imm = if primary == 15 { simm << 16 } else { simm };
            let imm_val = builder.i64(imm);
            let result = if ra == 0 {
                imm_val
            } else {
                let a = gpr(builder, ra);
                builder.add(a, imm_val, IrType::I64)
            };
            set_gpr(builder, rd, result);
        }

        // cmpi
        11 => {
            let crf_d = (word >> 23) & 0x7;
            let ra = (word >> 16) & 0x1f;
            let simm = sign_extend_16(word & 0xffff);
            let a = gpr(builder, ra);
            let b = builder.i64(simm);
            builder.set_cr_field(CrField(crf_d as u8), a, b, Signedness::Signed);
        }

        // lwz
        32 => {
            let rd = (word >> 21) & 0x1f;
            let ra = (word >> 16) & 0x1f;
            let disp = sign_extend_16(word & 0xffff);
            let ea = effective_address(builder, ra, disp);
            let loaded = builder.load(ea, IrType::I32, crate::ir::types::Endianness::Big);
            let widened = builder.zero_extend(loaded, IrType::I64);
            set_gpr(builder, rd, widened);
        }

        // stw
        36 => {
            let rs = (word >> 21) & 0x1f;
            let ra = (word >> 16) & 0x1f;
            let disp = sign_extend_16(word & 0xffff);
            let ea = effective_address(builder, ra, disp);
            let value64 = gpr(builder, rs);
            let value32 = builder.truncate(value64, IrType::I32);
            builder.store(ea, value32, IrType::I32, crate::ir::types::Endianness::Big);
        }

        // VMX128 lane permute (simplified single-source 4-lane swizzle)
        4 => {
            let xo = word & 0x3f;
            if xo == 0x3f {
                let vd = (word >> 21) & 0x1f;
                let va = (word >> 16) & 0x1f;
                let perm = ((word >> 10) & 0xff) as u8;
                let lanes = [perm & 0x3, (perm >> 2) & 0x3, (perm >> 4) & 0x3, (perm >> 6) & 0x3];
                let src = load_vr(builder, va);
                let dest = builder.vswizzle(src, lanes);
                store_vr(builder, vd, dest);
            } else {
                builder.trap(addr, TrapReason::InvalidInstruction);
            }
        }

        // Extended opcode group (add, subf, cmp, lwarx, stwcx.)
        31 => lift_extended(builder, addr, word),

        _ => builder.trap(addr, TrapReason::InvalidInstruction),
    }
}

fn lift_extended(builder: &mut HirBuilder, addr: u32, word: u32) {
    let xo = (word >> 1) & 0x3ff;
    let rc = word & 1 != 0;
    let rd = (word >> 21) & 0x1f;
    let ra = (word >> 16) & 0x1f;
    let rb = (word >> 11) & 0x1f;

    match xo {
        // add (OE=0, plain three-address add)
        266 => {
            let a = gpr(builder, ra);
            let b = gpr(builder, rb);
            let result = builder.add(a, b, IrType::I64);
            set_gpr(builder, rd, result);
            if rc {
                record_cr0(builder, result);
            }
        }
        // addc: rD = rA + rB, XER.CA set from the unsigned carry out
        10 => {
            let a = gpr(builder, ra);
            let b = gpr(builder, rb);
            let (result, carry) = builder.add_carrying(a, b, IrType::I64);
            set_gpr(builder, rd, result);
            builder.set_xer_carry(carry);
            if rc {
                record_cr0(builder, result);
            }
        }
        // adde: rD = rA + rB + XER.CA
        138 => {
            let a = gpr(builder, ra);
            let b = gpr(builder, rb);
            let carry_in = builder.get_xer_carry();
            let (result, carry_out) = builder.add_extended(a, b, carry_in, IrType::I64);
            set_gpr(builder, rd, result);
            builder.set_xer_carry(carry_out);
            if rc {
                record_cr0(builder, result);
            }
        }
        // subf: rD = rB - rA
        40 => {
            let a = gpr(builder, ra);
            let b = gpr(builder, rb);
            let result = builder.sub(b, a, IrType::I64);
            set_gpr(builder, rd, result);
            if rc {
                record_cr0(builder, result);
            }
        }
        // subfc: rD = rB - rA, XER.CA set from the unsigned borrow
        8 => {
            let a = gpr(builder, ra);
            let b = gpr(builder, rb);
            let (result, carry) = builder.sub_carrying(b, a, IrType::I64);
            set_gpr(builder, rd, result);
            builder.set_xer_carry(carry);
            if rc {
                record_cr0(builder, result);
            }
        }
        // cmp
        0 => {
            let crf_d = (word >> 23) & 0x7;
            let a = gpr(builder, ra);
            let b = gpr(builder, rb);
            builder.set_cr_field(CrField(crf_d as u8), a, b, Signedness::Signed);
        }
        // lwarx
        20 => {
            let ea = indexed_address(builder, ra, rb);
            let loaded = builder.load_reserved(ea, IrType::I32);
            let widened = builder.zero_extend(loaded, IrType::I64);
            set_gpr(builder, rd, widened);
        }
        // stwcx. — always record CR0
        150 => {
            let ea = indexed_address(builder, ra, rb);
            let value64 = gpr(builder, rd); // rD field holds rS for this form
            let value32 = builder.truncate(value64, IrType::I32);
            let success = builder.store_conditional(ea, value32, IrType::I32);
            let zero = builder.i64(0);
            builder.set_cr_field(CrField(0), zero, zero, Signedness::Signed);
            builder.set_cr_bit(CrField(0), CrBit::Eq, success);
        }
        _ => builder.trap(addr, TrapReason::InvalidInstruction),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::scanner::scan_function;

    fn encode_addi(rd: u32, ra: u32, simm: i16) -> u32 {
        (14 << 26) | (rd << 21) | (ra << 16) | (simm as u16 as u32)
    }

    fn encode_add(rd: u32, ra: u32, rb: u32) -> u32 {
        (31 << 26) | (rd << 21) | (ra << 16) | (rb << 11) | (266 << 1)
    }

    fn encode_bclr(bo: u32) -> u32 {
        (19 << 26) | (bo & 0x1f) << 21 | (16 << 1)
    }

    #[test]
    fn lifts_addi_and_add_into_gpr_arithmetic() {
        let mem = Memory::from_vec(vec![0u8; 0x10000]);
        mem.write_u32(0x1000, encode_addi(3, 0, 5)).unwrap();
        mem.write_u32(0x1004, encode_addi(4, 0, 7)).unwrap();
        mem.write_u32(0x1008, encode_add(5, 3, 4)).unwrap();
        mem.write_u32(0x100c, encode_bclr(20)).unwrap();

        let scan = scan_function(&mem, 0x1000, |_| false, |_| false).unwrap();
        let func = lift_function(&mem, &scan, "test_fn".to_string()).unwrap();

        assert_eq!(func.blocks.len(), 1);
        // 2x addi (const + store) + add (2x load + add + store) = 4 + 4
        assert_eq!(func.blocks[0].instrs.len(), 8);
    }

    #[test]
    fn lwz_lifts_to_big_endian_load() {
        let mem = Memory::from_vec(vec![0u8; 0x10000]);
        let lwz = (32 << 26) | (3 << 21) | (0 << 16) | 0x10u32;
        mem.write_u32(0x1000, lwz).unwrap();
        mem.write_u32(0x100c, encode_bclr(20)).unwrap();

        let scan = scan_function(&mem, 0x1000, |_| false, |_| false).unwrap();
        let func = lift_function(&mem, &scan, "test_fn".to_string()).unwrap();
        let has_be_load = func.blocks[0].instrs.iter().any(|i| {
            matches!(i, crate::ir::instr::Instr::Load { endian: crate::ir::types::Endianness::Big, .. })
        });
        assert!(has_be_load);
    }
}

//! HIR construction helpers
//!
//! A thin cursor over a `HirFunction` that the PPC lifters and the scanner
//! use to emit instructions without juggling block bookkeeping by hand.

use super::instr::{Block, BlockId, CmpOp, CrBit, CrField, HirFunction, Instr, InstrFlags,
    LabelId, Signedness, Terminator, TrapReason, ValueRef};
use super::types::{Endianness, IrType};

pub struct HirBuilder<'a> {
    func: &'a mut HirFunction,
    current_block: BlockId,
}

impl<'a> HirBuilder<'a> {
    pub fn new(func: &'a mut HirFunction) -> Self {
        let entry = func.entry;
        HirBuilder { func, current_block: entry }
    }

    pub fn current_block(&self) -> BlockId {
        self.current_block
    }

    pub fn switch_to_block(&mut self, block: BlockId) {
        self.current_block = block;
    }

    pub fn append_block(&mut self) -> BlockId {
        self.func.add_block()
    }

    /// Declares a branch target; the label is bound to a block with `mark_label`
    pub fn label(&mut self) -> LabelId {
        self.func.alloc_label()
    }

    /// Binds `label` to a fresh block, makes it current, and wires a
    /// fallthrough edge from whatever block was current before.
    pub fn mark_label(&mut self, label: LabelId) -> BlockId {
        let prev = self.current_block;
        let block = self.append_block();
        self.func.block_mut(block).label = Some(label);
        if !matches!(self.func.block(prev).terminator, Terminator::Unset) {
            // Caller already terminated prev explicitly (e.g. a branch); nothing to wire.
        } else {
            self.terminate(Terminator::Jump(block));
        }
        self.current_block = block;
        block
    }

    fn emit(&mut self, instr: Instr) {
        self.func.block_mut(self.current_block).instrs.push(instr);
    }

    pub fn terminate(&mut self, term: Terminator) {
        self.func.block_mut(self.current_block).terminator = term;
    }

    pub fn func(&self) -> &HirFunction {
        self.func
    }

    pub fn func_mut(&mut self) -> &mut HirFunction {
        self.func
    }

    // ===== Constants =====

    pub fn i32(&mut self, value: i32) -> ValueRef {
        let dest = self.func.alloc_value(IrType::I32);
        self.emit(Instr::ConstI32 { dest, value });
        dest
    }

    pub fn i64(&mut self, value: i64) -> ValueRef {
        let dest = self.func.alloc_value(IrType::I64);
        self.emit(Instr::ConstI64 { dest, value });
        dest
    }

    pub fn f64(&mut self, value: f64) -> ValueRef {
        let dest = self.func.alloc_value(IrType::F64);
        self.emit(Instr::ConstF64 { dest, value });
        dest
    }

    pub fn vec128(&mut self, lanes: [u32; 4]) -> ValueRef {
        let dest = self.func.alloc_value(IrType::V128);
        self.emit(Instr::ConstV128 { dest, value: lanes });
        dest
    }

    // ===== Context access =====

    pub fn load_context(&mut self, offset: u32, ty: IrType) -> ValueRef {
        let dest = self.func.alloc_value(ty);
        self.emit(Instr::LoadContext { dest, offset, ty });
        dest
    }

    pub fn store_context(&mut self, offset: u32, value: ValueRef) {
        self.emit(Instr::StoreContext { offset, value, flags: InstrFlags::default() });
    }

    // ===== Guest memory =====

    pub fn load(&mut self, addr: ValueRef, ty: IrType, endian: Endianness) -> ValueRef {
        let dest = self.func.alloc_value(ty);
        self.emit(Instr::Load { dest, addr, ty, endian });
        dest
    }

    pub fn store(&mut self, addr: ValueRef, value: ValueRef, ty: IrType, endian: Endianness) {
        self.emit(Instr::Store { addr, value, ty, endian, flags: InstrFlags::default() });
    }

    pub fn load_reserved(&mut self, addr: ValueRef, ty: IrType) -> ValueRef {
        let dest = self.func.alloc_value(ty);
        self.emit(Instr::LoadReserved { dest, addr, ty });
        dest
    }

    pub fn store_conditional(&mut self, addr: ValueRef, value: ValueRef, ty: IrType) -> ValueRef {
        let dest = self.func.alloc_value(IrType::I8);
        self.emit(Instr::StoreConditional { dest, addr, value, ty, flags: InstrFlags { volatile: true } });
        dest
    }

    // ===== Arithmetic =====

    pub fn add(&mut self, lhs: ValueRef, rhs: ValueRef, ty: IrType) -> ValueRef {
        let dest = self.func.alloc_value(ty);
        self.emit(Instr::Add { dest, lhs, rhs });
        dest
    }

    pub fn add_carrying(&mut self, lhs: ValueRef, rhs: ValueRef, ty: IrType) -> (ValueRef, ValueRef) {
        let dest = self.func.alloc_value(ty);
        let carry_out = self.func.alloc_value(IrType::I8);
        self.emit(Instr::AddCarrying { dest, carry_out, lhs, rhs });
        (dest, carry_out)
    }

    pub fn add_extended(&mut self, lhs: ValueRef, rhs: ValueRef, carry_in: ValueRef, ty: IrType) -> (ValueRef, ValueRef) {
        let dest = self.func.alloc_value(ty);
        let carry_out = self.func.alloc_value(IrType::I8);
        self.emit(Instr::AddExtended { dest, carry_out, lhs, rhs, carry_in });
        (dest, carry_out)
    }

    pub fn add_overflowing(&mut self, lhs: ValueRef, rhs: ValueRef, ty: IrType) -> (ValueRef, ValueRef) {
        let dest = self.func.alloc_value(ty);
        let overflow_out = self.func.alloc_value(IrType::I8);
        self.emit(Instr::AddOverflowing { dest, overflow_out, lhs, rhs });
        (dest, overflow_out)
    }

    pub fn sub(&mut self, lhs: ValueRef, rhs: ValueRef, ty: IrType) -> ValueRef {
        let dest = self.func.alloc_value(ty);
        self.emit(Instr::Sub { dest, lhs, rhs });
        dest
    }

    pub fn sub_carrying(&mut self, lhs: ValueRef, rhs: ValueRef, ty: IrType) -> (ValueRef, ValueRef) {
        let dest = self.func.alloc_value(ty);
        let carry_out = self.func.alloc_value(IrType::I8);
        self.emit(Instr::SubCarrying { dest, carry_out, lhs, rhs });
        (dest, carry_out)
    }

    pub fn sub_overflowing(&mut self, lhs: ValueRef, rhs: ValueRef, ty: IrType) -> (ValueRef, ValueRef) {
        let dest = self.func.alloc_value(ty);
        let overflow_out = self.func.alloc_value(IrType::I8);
        self.emit(Instr::SubOverflowing { dest, overflow_out, lhs, rhs });
        (dest, overflow_out)
    }

    pub fn neg(&mut self, src: ValueRef, ty: IrType) -> ValueRef {
        let dest = self.func.alloc_value(ty);
        self.emit(Instr::Neg { dest, src });
        dest
    }

    pub fn mul(&mut self, lhs: ValueRef, rhs: ValueRef, ty: IrType) -> ValueRef {
        let dest = self.func.alloc_value(ty);
        self.emit(Instr::Mul { dest, lhs, rhs });
        dest
    }

    pub fn mul_overflowing(&mut self, lhs: ValueRef, rhs: ValueRef, ty: IrType) -> (ValueRef, ValueRef) {
        let dest = self.func.alloc_value(ty);
        let overflow_out = self.func.alloc_value(IrType::I8);
        self.emit(Instr::MulOverflowing { dest, overflow_out, lhs, rhs });
        (dest, overflow_out)
    }

    pub fn div(&mut self, lhs: ValueRef, rhs: ValueRef, ty: IrType, signedness: Signedness) -> ValueRef {
        let dest = self.func.alloc_value(ty);
        self.emit(Instr::Div { dest, lhs, rhs, signedness });
        dest
    }

    // ===== Bitwise =====

    pub fn and(&mut self, lhs: ValueRef, rhs: ValueRef, ty: IrType) -> ValueRef {
        let dest = self.func.alloc_value(ty);
        self.emit(Instr::And { dest, lhs, rhs });
        dest
    }

    pub fn or(&mut self, lhs: ValueRef, rhs: ValueRef, ty: IrType) -> ValueRef {
        let dest = self.func.alloc_value(ty);
        self.emit(Instr::Or { dest, lhs, rhs });
        dest
    }

    pub fn xor(&mut self, lhs: ValueRef, rhs: ValueRef, ty: IrType) -> ValueRef {
        let dest = self.func.alloc_value(ty);
        self.emit(Instr::Xor { dest, lhs, rhs });
        dest
    }

    pub fn not(&mut self, src: ValueRef, ty: IrType) -> ValueRef {
        let dest = self.func.alloc_value(ty);
        self.emit(Instr::Not { dest, src });
        dest
    }

    pub fn shl(&mut self, lhs: ValueRef, rhs: ValueRef, ty: IrType) -> ValueRef {
        let dest = self.func.alloc_value(ty);
        self.emit(Instr::Shl { dest, lhs, rhs });
        dest
    }

    pub fn shr(&mut self, lhs: ValueRef, rhs: ValueRef, ty: IrType, signedness: Signedness) -> ValueRef {
        let dest = self.func.alloc_value(ty);
        self.emit(Instr::Shr { dest, lhs, rhs, signedness });
        dest
    }

    pub fn rotate_and_mask(&mut self, src: ValueRef, rotate: u8, mask_begin: u8, mask_end: u8, ty: IrType) -> ValueRef {
        let dest = self.func.alloc_value(ty);
        self.emit(Instr::RotateAndMask { dest, src, rotate, mask_begin, mask_end });
        dest
    }

    // ===== Conversions =====

    pub fn zero_extend(&mut self, src: ValueRef, ty: IrType) -> ValueRef {
        let dest = self.func.alloc_value(ty);
        self.emit(Instr::ZeroExtend { dest, src });
        dest
    }

    pub fn sign_extend(&mut self, src: ValueRef, ty: IrType) -> ValueRef {
        let dest = self.func.alloc_value(ty);
        self.emit(Instr::SignExtend { dest, src });
        dest
    }

    pub fn truncate(&mut self, src: ValueRef, ty: IrType) -> ValueRef {
        let dest = self.func.alloc_value(ty);
        self.emit(Instr::Truncate { dest, src });
        dest
    }

    // ===== Floating point =====

    pub fn fadd(&mut self, lhs: ValueRef, rhs: ValueRef, ty: IrType) -> ValueRef {
        let dest = self.func.alloc_value(ty);
        self.emit(Instr::FAdd { dest, lhs, rhs, rounding: super::instr::RoundingMode::Nearest });
        dest
    }

    pub fn fmul_add(&mut self, a: ValueRef, b: ValueRef, c: ValueRef, ty: IrType) -> ValueRef {
        let dest = self.func.alloc_value(ty);
        self.emit(Instr::FMulAdd { dest, a, b, c, rounding: super::instr::RoundingMode::Nearest });
        dest
    }

    // ===== Compares & condition register =====

    pub fn icmp(&mut self, lhs: ValueRef, rhs: ValueRef, signedness: Signedness, op: CmpOp) -> ValueRef {
        let dest = self.func.alloc_value(IrType::I8);
        self.emit(Instr::ICmp { dest, lhs, rhs, signedness, op });
        dest
    }

    pub fn set_cr_field(&mut self, field: CrField, lhs: ValueRef, rhs: ValueRef, signedness: Signedness) {
        self.emit(Instr::SetCrField { field, lhs, rhs, signedness });
    }

    pub fn get_cr_bit(&mut self, field: CrField, bit: CrBit) -> ValueRef {
        let dest = self.func.alloc_value(IrType::I8);
        self.emit(Instr::GetCrBit { dest, field, bit });
        dest
    }

    pub fn set_cr_bit(&mut self, field: CrField, bit: CrBit, value: ValueRef) {
        self.emit(Instr::SetCrBit { field, bit, value });
    }

    pub fn get_xer_carry(&mut self) -> ValueRef {
        let dest = self.func.alloc_value(IrType::I8);
        self.emit(Instr::GetXerCarry { dest });
        dest
    }

    pub fn set_xer_carry(&mut self, value: ValueRef) {
        self.emit(Instr::SetXerCarry { value });
    }

    pub fn set_xer_overflow(&mut self, value: ValueRef) {
        self.emit(Instr::SetXerOverflow { value });
    }

    // ===== Vector =====

    pub fn vswizzle(&mut self, src: ValueRef, lanes: [u8; 4]) -> ValueRef {
        let dest = self.func.alloc_value(IrType::V128);
        self.emit(Instr::VSwizzle { dest, src, lanes });
        dest
    }

    pub fn vadd(&mut self, lhs: ValueRef, rhs: ValueRef) -> ValueRef {
        let dest = self.func.alloc_value(IrType::V128);
        self.emit(Instr::VAdd { dest, lhs, rhs });
        dest
    }

    // ===== Control flow =====

    pub fn branch(&mut self, target: BlockId) {
        self.terminate(Terminator::Jump(target));
    }

    pub fn branch_true(&mut self, cond: ValueRef, then_block: BlockId, else_block: BlockId) {
        self.terminate(Terminator::BranchTrue { cond, then_block, else_block });
    }

    pub fn branch_false(&mut self, cond: ValueRef, then_block: BlockId, else_block: BlockId) {
        self.terminate(Terminator::BranchFalse { cond, then_block, else_block });
    }

    pub fn call(&mut self, target: u32, args: Vec<ValueRef>, returns: bool, ty: IrType) -> Option<ValueRef> {
        let dest = if returns { Some(self.func.alloc_value(ty)) } else { None };
        self.emit(Instr::Call { dest, target, args });
        dest
    }

    pub fn call_indirect(&mut self, target: ValueRef, args: Vec<ValueRef>, returns: bool, ty: IrType) -> Option<ValueRef> {
        let dest = if returns { Some(self.func.alloc_value(ty)) } else { None };
        self.emit(Instr::CallIndirect { dest, target, args });
        dest
    }

    pub fn trap(&mut self, cia: u32, reason: TrapReason) {
        self.emit(Instr::Trap { cia, reason });
    }

    pub fn ret(&mut self, value: Option<ValueRef>) {
        self.terminate(Terminator::Return(value));
    }
}

/// Convenience for tests: iterate a function's blocks in declaration order
pub fn blocks_in_order(func: &HirFunction) -> impl Iterator<Item = &Block> {
    func.blocks.iter()
}

//! HIR → Cranelift IR lowering
//!
//! Translates the backend-agnostic HIR (SSA form) into Cranelift IR.
//! Covers the scalar GPR/FPR arithmetic, big-endian memory access, and
//! control flow the sequence table is expected to carry; condition
//! register/XER bit-packing and vector lanes are not `repr(C)`-stable
//! for raw-offset codegen access yet and fall back to
//! `LowerError::UnsupportedInstruction`, same as the donor engine's
//! Cranelift backend fell back for anything outside its own supported
//! subset.

use cranelift_codegen::ir::{self, condcodes, types, InstBuilder, MemFlags};
use cranelift_codegen::ir::{AbiParam, ConstantData};
use cranelift_codegen::isa::CallConv;
use cranelift_frontend::{FunctionBuilder, Variable};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::instr::{BlockId, CmpOp, HirFunction, Instr, Signedness, Terminator, ValueRef};
use crate::ir::types::{Endianness, IrType};

/// State maintained during lowering of a single function
pub struct LoweringContext<'a> {
    value_vars: FxHashMap<ValueRef, Variable>,
    block_map: FxHashMap<BlockId, ir::Block>,
    func: &'a HirFunction,
    ctx_ptr: ir::Value,
    /// Host base address of guest memory, baked in as an immediate since it
    /// is stable for the process lifetime.
    membase: u64,
    /// Phi resolution: for each predecessor block, (phi_dest, source_value) pairs
    phi_copies: FxHashMap<BlockId, Vec<(ValueRef, ValueRef)>>,
    call_conv: CallConv,
}

fn cl_type(ty: IrType) -> Option<types::Type> {
    match ty {
        IrType::I8 => Some(types::I8),
        IrType::I16 => Some(types::I16),
        IrType::I32 => Some(types::I32),
        IrType::I64 => Some(types::I64),
        IrType::F32 => Some(types::F32),
        IrType::F64 => Some(types::F64),
        IrType::V128 => None,
    }
}

/// Blocks whose entry is reached by a predecessor declared later in the
/// function are loop headers; their Cranelift block must stay unsealed
/// until every predecessor has been lowered.
fn identify_loop_headers(func: &HirFunction) -> FxHashSet<BlockId> {
    let mut headers = FxHashSet::default();
    for block in &func.blocks {
        for pred in &block.predecessors {
            if pred.0 >= block.id.0 {
                headers.insert(block.id);
            }
        }
    }
    headers
}

fn build_phi_copies(func: &HirFunction) -> FxHashMap<BlockId, Vec<(ValueRef, ValueRef)>> {
    let mut copies: FxHashMap<BlockId, Vec<(ValueRef, ValueRef)>> = FxHashMap::default();
    for block in &func.blocks {
        for instr in &block.instrs {
            if let Instr::Phi { dest, sources } = instr {
                for (src_block, src_value) in sources {
                    copies.entry(*src_block).or_default().push((*dest, *src_value));
                }
            }
        }
    }
    copies
}

impl<'a> LoweringContext<'a> {
    /// Lower an entire HIR function into Cranelift IR. Takes ownership of
    /// the builder since `finalize()` consumes it.
    pub fn lower(
        func: &'a HirFunction,
        mut builder: FunctionBuilder<'_>,
        membase: u64,
        call_conv: CallConv,
    ) -> Result<(), LowerError> {
        let mut block_map = FxHashMap::default();
        for block in &func.blocks {
            block_map.insert(block.id, builder.create_block());
        }

        let loop_headers = identify_loop_headers(func);
        let phi_copies = build_phi_copies(func);

        let entry_block = block_map[&func.entry];
        builder.append_block_params_for_function_params(entry_block);
        builder.switch_to_block(entry_block);
        if !loop_headers.contains(&func.entry) {
            builder.seal_block(entry_block);
        }

        let ctx_ptr = builder.block_params(entry_block)[0];

        let mut ctx = LoweringContext {
            value_vars: FxHashMap::default(),
            block_map,
            func,
            ctx_ptr,
            membase,
            phi_copies,
            call_conv,
        };

        ctx.declare_all_values(&mut builder)?;

        let block_ids: Vec<_> = func.blocks.iter().map(|b| b.id).collect();
        for (idx, block_id) in block_ids.iter().enumerate() {
            let cl_block = ctx.block_map[block_id];
            if idx > 0 {
                builder.switch_to_block(cl_block);
                if !loop_headers.contains(block_id) {
                    builder.seal_block(cl_block);
                }
            }
            ctx.lower_block(*block_id, &mut builder)?;
        }

        for header_id in &loop_headers {
            builder.seal_block(ctx.block_map[header_id]);
        }

        builder.finalize();
        Ok(())
    }

    fn declare_all_values(&mut self, builder: &mut FunctionBuilder<'_>) -> Result<(), LowerError> {
        for (value, ty) in self.func.value_types.iter() {
            // Vector-typed values are only produced/consumed by ops this
            // backend doesn't lower yet; skip declaring a variable for them.
            if let Some(ty) = cl_type(*ty) {
                let var = builder.declare_var(ty);
                self.value_vars.insert(*value, var);
            }
        }
        Ok(())
    }

    fn var_for(&self, value: ValueRef) -> Result<Variable, LowerError> {
        self.value_vars
            .get(&value)
            .copied()
            .ok_or_else(|| LowerError::UnsupportedInstruction(format!("value {value} has no scalar representation")))
    }

    fn use_value(&self, builder: &mut FunctionBuilder<'_>, value: ValueRef) -> Result<ir::Value, LowerError> {
        Ok(builder.use_var(self.var_for(value)?))
    }

    fn def_value(&self, builder: &mut FunctionBuilder<'_>, value: ValueRef, val: ir::Value) -> Result<(), LowerError> {
        builder.def_var(self.var_for(value)?, val);
        Ok(())
    }

    fn lower_block(&mut self, block_id: BlockId, builder: &mut FunctionBuilder<'_>) -> Result<(), LowerError> {
        let block = self.func.block(block_id);
        let instrs = block.instrs.clone();
        let terminator_instr_is_unset = matches!(block.terminator, Terminator::Unset);

        for instr in &instrs {
            self.lower_instr(instr, builder)?;
        }

        if let Some(copies) = self.phi_copies.get(&block_id).cloned() {
            for (phi_dest, src_value) in copies {
                let val = self.use_value(builder, src_value)?;
                self.def_value(builder, phi_dest, val)?;
            }
        }

        if terminator_instr_is_unset {
            return Err(LowerError::UnsupportedInstruction("block has no terminator".to_string()));
        }
        let terminator = self.func.block(block_id).terminator.clone();
        self.lower_terminator(&terminator, builder)
    }

    fn lower_instr(&mut self, instr: &Instr, builder: &mut FunctionBuilder<'_>) -> Result<(), LowerError> {
        match instr {
            Instr::ConstI8 { dest, value } => {
                let v = builder.ins().iconst(types::I8, *value as i64);
                self.def_value(builder, *dest, v)?;
            }
            Instr::ConstI16 { dest, value } => {
                let v = builder.ins().iconst(types::I16, *value as i64);
                self.def_value(builder, *dest, v)?;
            }
            Instr::ConstI32 { dest, value } => {
                let v = builder.ins().iconst(types::I32, *value as i64);
                self.def_value(builder, *dest, v)?;
            }
            Instr::ConstI64 { dest, value } => {
                let v = builder.ins().iconst(types::I64, *value);
                self.def_value(builder, *dest, v)?;
            }
            Instr::ConstF32 { dest, value } => {
                let v = builder.ins().f32const(*value);
                self.def_value(builder, *dest, v)?;
            }
            Instr::ConstF64 { dest, value } => {
                let v = builder.ins().f64const(*value);
                self.def_value(builder, *dest, v)?;
            }

            Instr::LoadContext { dest, offset, ty } => {
                let cty = cl_type(*ty).ok_or_else(|| LowerError::UnsupportedInstruction("vector context load".to_string()))?;
                let v = builder.ins().load(cty, MemFlags::trusted(), self.ctx_ptr, *offset as i32);
                self.def_value(builder, *dest, v)?;
            }
            Instr::StoreContext { offset, value, .. } => {
                let v = self.use_value(builder, *value)?;
                builder.ins().store(MemFlags::trusted(), v, self.ctx_ptr, *offset as i32);
            }

            Instr::Load { dest, addr, ty, endian } => {
                if *endian != Endianness::Big {
                    return Err(LowerError::UnsupportedInstruction("little-endian guest load".to_string()));
                }
                let cty = cl_type(*ty).ok_or_else(|| LowerError::UnsupportedInstruction("vector memory load".to_string()))?;
                let host = self.host_address(builder, *addr)?;
                let loaded = builder.ins().load(cty, MemFlags::trusted(), host, 0);
                let v = if cty.bytes() > 1 { builder.ins().bswap(loaded) } else { loaded };
                self.def_value(builder, *dest, v)?;
            }
            Instr::Store { addr, value, ty, endian, .. } => {
                if *endian != Endianness::Big {
                    return Err(LowerError::UnsupportedInstruction("little-endian guest store".to_string()));
                }
                let cty = cl_type(*ty).ok_or_else(|| LowerError::UnsupportedInstruction("vector memory store".to_string()))?;
                let host = self.host_address(builder, *addr)?;
                let raw = self.use_value(builder, *value)?;
                let stored = if cty.bytes() > 1 { builder.ins().bswap(raw) } else { raw };
                builder.ins().store(MemFlags::trusted(), stored, host, 0);
            }
            Instr::MemoryBarrier { .. } => {
                builder.ins().fence();
            }

            Instr::Add { dest, lhs, rhs } => self.binop(builder, *dest, *lhs, *rhs, |b, l, r| b.ins().iadd(l, r))?,
            Instr::Sub { dest, lhs, rhs } => self.binop(builder, *dest, *lhs, *rhs, |b, l, r| b.ins().isub(l, r))?,
            Instr::Mul { dest, lhs, rhs } => self.binop(builder, *dest, *lhs, *rhs, |b, l, r| b.ins().imul(l, r))?,
            Instr::Div { dest, lhs, rhs, signedness } => {
                let op = *signedness;
                self.binop(builder, *dest, *lhs, *rhs, move |b, l, r| match op {
                    Signedness::Signed => b.ins().sdiv(l, r),
                    Signedness::Unsigned => b.ins().udiv(l, r),
                })?
            }
            Instr::Rem { dest, lhs, rhs, signedness } => {
                let op = *signedness;
                self.binop(builder, *dest, *lhs, *rhs, move |b, l, r| match op {
                    Signedness::Signed => b.ins().srem(l, r),
                    Signedness::Unsigned => b.ins().urem(l, r),
                })?
            }
            Instr::Neg { dest, src } => {
                let v = self.use_value(builder, *src)?;
                let r = builder.ins().ineg(v);
                self.def_value(builder, *dest, r)?;
            }

            Instr::AddCarrying { dest, carry_out, lhs, rhs } => {
                let l = self.use_value(builder, *lhs)?;
                let r = self.use_value(builder, *rhs)?;
                let (sum, carry) = builder.ins().uadd_overflow(l, r);
                self.def_value(builder, *dest, sum)?;
                self.def_value(builder, *carry_out, carry)?;
            }
            Instr::SubCarrying { dest, carry_out, lhs, rhs } => {
                let l = self.use_value(builder, *lhs)?;
                let r = self.use_value(builder, *rhs)?;
                let (diff, borrow) = builder.ins().usub_overflow(l, r);
                self.def_value(builder, *dest, diff)?;
                // PPC carry semantics for subtract-with-borrow are the
                // complement of the host borrow flag.
                let carry = builder.ins().bxor_imm(borrow, 1);
                self.def_value(builder, *carry_out, carry)?;
            }
            Instr::AddExtended { dest, carry_out, lhs, rhs, carry_in } => {
                let l = self.use_value(builder, *lhs)?;
                let r = self.use_value(builder, *rhs)?;
                let cin = self.use_value(builder, *carry_in)?;
                let cin64 = builder.ins().uextend(types::I64, cin);
                let (partial, c1) = builder.ins().uadd_overflow(l, r);
                let (sum, c2) = builder.ins().uadd_overflow(partial, cin64);
                let carry = builder.ins().bor(c1, c2);
                self.def_value(builder, *dest, sum)?;
                self.def_value(builder, *carry_out, carry)?;
            }
            Instr::SubExtended { dest, carry_out, lhs, rhs, carry_in } => {
                let l = self.use_value(builder, *lhs)?;
                let r = self.use_value(builder, *rhs)?;
                let cin = self.use_value(builder, *carry_in)?;
                let notcin = builder.ins().bxor_imm(cin, 1);
                let notcin64 = builder.ins().uextend(types::I64, notcin);
                let (partial, b1) = builder.ins().usub_overflow(l, r);
                let (diff, b2) = builder.ins().usub_overflow(partial, notcin64);
                let borrow = builder.ins().bor(b1, b2);
                let carry = builder.ins().bxor_imm(borrow, 1);
                self.def_value(builder, *dest, diff)?;
                self.def_value(builder, *carry_out, carry)?;
            }

            Instr::And { dest, lhs, rhs } => self.binop(builder, *dest, *lhs, *rhs, |b, l, r| b.ins().band(l, r))?,
            Instr::Or { dest, lhs, rhs } => self.binop(builder, *dest, *lhs, *rhs, |b, l, r| b.ins().bor(l, r))?,
            Instr::Xor { dest, lhs, rhs } => self.binop(builder, *dest, *lhs, *rhs, |b, l, r| b.ins().bxor(l, r))?,
            Instr::Not { dest, src } => {
                let v = self.use_value(builder, *src)?;
                let r = builder.ins().bnot(v);
                self.def_value(builder, *dest, r)?;
            }
            Instr::Shl { dest, lhs, rhs } => self.binop(builder, *dest, *lhs, *rhs, |b, l, r| b.ins().ishl(l, r))?,
            Instr::Shr { dest, lhs, rhs, signedness } => {
                let op = *signedness;
                self.binop(builder, *dest, *lhs, *rhs, move |b, l, r| match op {
                    Signedness::Signed => b.ins().sshr(l, r),
                    Signedness::Unsigned => b.ins().ushr(l, r),
                })?
            }
            Instr::RotateAndMask { dest, src, rotate, mask_begin, mask_end } => {
                let v = self.use_value(builder, *src)?;
                let ty = self.func.value_type(*src);
                let width = ty.size() as u32 * 8;
                let rotated = if *rotate == 0 {
                    v
                } else {
                    let amt = builder.ins().iconst(types::I32, *rotate as i64);
                    builder.ins().rotl(v, amt)
                };
                let mask = mask_range(*mask_begin, *mask_end, width);
                let mask_val = builder.ins().iconst(cl_type(ty).unwrap_or(types::I32), mask as i64);
                let result = builder.ins().band(rotated, mask_val);
                self.def_value(builder, *dest, result)?;
            }
            Instr::CountLeadingZeros { dest, src } => {
                let v = self.use_value(builder, *src)?;
                let r = builder.ins().clz(v);
                self.def_value(builder, *dest, r)?;
            }

            Instr::ZeroExtend { dest, src } => {
                let v = self.use_value(builder, *src)?;
                let target = cl_type(self.func.value_type(*dest)).ok_or_else(|| LowerError::UnsupportedInstruction("vector extend".to_string()))?;
                let r = builder.ins().uextend(target, v);
                self.def_value(builder, *dest, r)?;
            }
            Instr::SignExtend { dest, src } => {
                let v = self.use_value(builder, *src)?;
                let target = cl_type(self.func.value_type(*dest)).ok_or_else(|| LowerError::UnsupportedInstruction("vector extend".to_string()))?;
                let r = builder.ins().sextend(target, v);
                self.def_value(builder, *dest, r)?;
            }
            Instr::Truncate { dest, src } => {
                let v = self.use_value(builder, *src)?;
                let target = cl_type(self.func.value_type(*dest)).ok_or_else(|| LowerError::UnsupportedInstruction("vector truncate".to_string()))?;
                let r = builder.ins().ireduce(target, v);
                self.def_value(builder, *dest, r)?;
            }
            Instr::IntToFloat { dest, src, signedness } => {
                let v = self.use_value(builder, *src)?;
                let target = cl_type(self.func.value_type(*dest)).ok_or_else(|| LowerError::UnsupportedInstruction("vector conversion".to_string()))?;
                let r = match signedness {
                    Signedness::Signed => builder.ins().fcvt_from_sint(target, v),
                    Signedness::Unsigned => builder.ins().fcvt_from_uint(target, v),
                };
                self.def_value(builder, *dest, r)?;
            }
            Instr::FloatToInt { dest, src, signedness } => {
                let v = self.use_value(builder, *src)?;
                let target = cl_type(self.func.value_type(*dest)).ok_or_else(|| LowerError::UnsupportedInstruction("vector conversion".to_string()))?;
                let r = match signedness {
                    Signedness::Signed => builder.ins().fcvt_to_sint(target, v),
                    Signedness::Unsigned => builder.ins().fcvt_to_uint(target, v),
                };
                self.def_value(builder, *dest, r)?;
            }
            Instr::FloatCast { dest, src } => {
                let v = self.use_value(builder, *src)?;
                let src_ty = self.func.value_type(*src);
                let dst_ty = self.func.value_type(*dest);
                let r = match (src_ty, dst_ty) {
                    (IrType::F32, IrType::F64) => builder.ins().fpromote(types::F64, v),
                    (IrType::F64, IrType::F32) => builder.ins().fdemote(types::F32, v),
                    _ => v,
                };
                self.def_value(builder, *dest, r)?;
            }
            Instr::Bitcast { dest, src, ty } => {
                let v = self.use_value(builder, *src)?;
                let target = cl_type(*ty).ok_or_else(|| LowerError::UnsupportedInstruction("vector bitcast".to_string()))?;
                let r = builder.ins().bitcast(target, MemFlags::new(), v);
                self.def_value(builder, *dest, r)?;
            }

            Instr::FAdd { dest, lhs, rhs, .. } => self.binop(builder, *dest, *lhs, *rhs, |b, l, r| b.ins().fadd(l, r))?,
            Instr::FSub { dest, lhs, rhs, .. } => self.binop(builder, *dest, *lhs, *rhs, |b, l, r| b.ins().fsub(l, r))?,
            Instr::FMul { dest, lhs, rhs, .. } => self.binop(builder, *dest, *lhs, *rhs, |b, l, r| b.ins().fmul(l, r))?,
            Instr::FDiv { dest, lhs, rhs, .. } => self.binop(builder, *dest, *lhs, *rhs, |b, l, r| b.ins().fdiv(l, r))?,
            Instr::FNeg { dest, src } => {
                let v = self.use_value(builder, *src)?;
                let r = builder.ins().fneg(v);
                self.def_value(builder, *dest, r)?;
            }
            Instr::FAbs { dest, src } => {
                let v = self.use_value(builder, *src)?;
                let r = builder.ins().fabs(v);
                self.def_value(builder, *dest, r)?;
            }
            Instr::FSqrt { dest, src } => {
                let v = self.use_value(builder, *src)?;
                let r = builder.ins().sqrt(v);
                self.def_value(builder, *dest, r)?;
            }
            Instr::FMulAdd { dest, a, b, c, .. } => {
                let av = self.use_value(builder, *a)?;
                let bv = self.use_value(builder, *b)?;
                let cv = self.use_value(builder, *c)?;
                let r = builder.ins().fma(av, bv, cv);
                self.def_value(builder, *dest, r)?;
            }

            Instr::ICmp { dest, lhs, rhs, signedness, op } => {
                let cc = int_cc(*signedness, *op);
                let l = self.use_value(builder, *lhs)?;
                let r = self.use_value(builder, *rhs)?;
                let result = builder.ins().icmp(cc, l, r);
                self.def_value(builder, *dest, result)?;
            }
            Instr::FCmp { dest, lhs, rhs, op } => {
                let cc = float_cc(*op);
                let l = self.use_value(builder, *lhs)?;
                let r = self.use_value(builder, *rhs)?;
                let result = builder.ins().fcmp(cc, l, r);
                self.def_value(builder, *dest, result)?;
            }

            Instr::Move { dest, src } => {
                let v = self.use_value(builder, *src)?;
                self.def_value(builder, *dest, v)?;
            }
            Instr::Phi { .. } => {
                // Resolved via phi_copies in predecessor blocks.
            }
            Instr::Trap { .. } => {
                builder.ins().trap(ir::TrapCode::user(1).unwrap());
            }

            Instr::Call { dest, target, .. } => {
                let target_val = builder.ins().iconst(types::I64, *target as i64);
                self.lower_guest_call(builder, target_val, *dest)?;
            }
            Instr::CallIndirect { dest, target, .. } => {
                let target_val = self.use_value(builder, *target)?;
                self.lower_guest_call(builder, target_val, *dest)?;
            }

            Instr::ConstV128 { .. }
            | Instr::LoadReserved { .. }
            | Instr::StoreConditional { .. }
            | Instr::MulHigh { .. }
            | Instr::MulOverflowing { .. }
            | Instr::AddOverflowing { .. }
            | Instr::SubOverflowing { .. }
            | Instr::Rotate { .. }
            | Instr::SetCrField { .. }
            | Instr::GetCrBit { .. }
            | Instr::SetCrBit { .. }
            | Instr::MoveFromCr { .. }
            | Instr::MoveToCrFields { .. }
            | Instr::GetXerCarry { .. }
            | Instr::SetXerCarry { .. }
            | Instr::SetXerOverflow { .. }
            | Instr::GetXerCount { .. }
            | Instr::SetXerCount { .. }
            | Instr::VSplat { .. }
            | Instr::VExtractLane { .. }
            | Instr::VInsertLane { .. }
            | Instr::VSwizzle { .. }
            | Instr::VAdd { .. }
            | Instr::VSub { .. }
            | Instr::VMul { .. }
            | Instr::VAnd { .. }
            | Instr::VOr { .. }
            | Instr::VXor { .. } => {
                return Err(LowerError::UnsupportedInstruction(format!("{instr:?}")));
            }
        }
        Ok(())
    }

    fn binop(
        &mut self,
        builder: &mut FunctionBuilder<'_>,
        dest: ValueRef,
        lhs: ValueRef,
        rhs: ValueRef,
        f: impl FnOnce(&mut FunctionBuilder<'_>, ir::Value, ir::Value) -> ir::Value,
    ) -> Result<(), LowerError> {
        let l = self.use_value(builder, lhs)?;
        let r = self.use_value(builder, rhs)?;
        let result = f(builder, l, r);
        self.def_value(builder, dest, result)
    }

    /// Translate a 32-bit guest address value into a host pointer by adding
    /// the baked-in membase immediate.
    fn host_address(&self, builder: &mut FunctionBuilder<'_>, addr: ValueRef) -> Result<ir::Value, LowerError> {
        let guest = self.use_value(builder, addr)?;
        let guest64 = builder.ins().uextend(types::I64, guest);
        let base = builder.ins().iconst(types::I64, self.membase as i64);
        Ok(builder.ins().iadd(base, guest64))
    }

    /// Lower a guest `bl`/`bctrl` to a re-entry into the runtime: loads the
    /// `Processor` pointer `PpcContext::runtime` carries for the duration of
    /// this dispatch and calls `guest_call_trampoline` with it, the callee
    /// address, and the context pointer. The trampoline runs the callee (and
    /// anything it calls in turn) to completion before returning, mirroring
    /// a real call/`blr` pair; gpr3 by then already holds whatever the
    /// callee returned, so `dest` is read back from context rather than from
    /// the trampoline's own result.
    fn lower_guest_call(
        &mut self,
        builder: &mut FunctionBuilder<'_>,
        target: ir::Value,
        dest: Option<ValueRef>,
    ) -> Result<(), LowerError> {
        let mut sig = ir::Signature::new(self.call_conv);
        sig.params.push(AbiParam::new(types::I64));
        sig.params.push(AbiParam::new(types::I64));
        sig.params.push(AbiParam::new(types::I64));
        sig.returns.push(AbiParam::new(types::I64));
        let sig_ref = builder.import_signature(sig);

        let runtime = builder.ins().load(
            types::I64,
            MemFlags::trusted(),
            self.ctx_ptr,
            crate::context::PpcContext::runtime_offset() as i32,
        );
        let trampoline_addr = builder
            .ins()
            .iconst(types::I64, crate::runtime::processor::guest_call_trampoline as usize as i64);
        builder.ins().call_indirect(sig_ref, trampoline_addr, &[runtime, target, self.ctx_ptr]);

        if let Some(dest) = dest {
            let gpr3 = builder.ins().load(
                types::I64,
                MemFlags::trusted(),
                self.ctx_ptr,
                crate::context::PpcContext::gpr_offset(3) as i32,
            );
            self.def_value(builder, dest, gpr3)?;
        }
        Ok(())
    }

    fn lower_terminator(&self, term: &Terminator, builder: &mut FunctionBuilder<'_>) -> Result<(), LowerError> {
        match term {
            Terminator::Jump(target) => {
                let cl_target = self.block_map[target];
                builder.ins().jump(cl_target, &[]);
            }
            Terminator::BranchTrue { cond, then_block, else_block } => {
                let cond_val = self.use_value(builder, *cond)?;
                let then_cl = self.block_map[then_block];
                let else_cl = self.block_map[else_block];
                builder.ins().brif(cond_val, then_cl, &[], else_cl, &[]);
            }
            Terminator::BranchFalse { cond, then_block, else_block } => {
                let cond_val = self.use_value(builder, *cond)?;
                let then_cl = self.block_map[then_block];
                let else_cl = self.block_map[else_block];
                builder.ins().brif(cond_val, else_cl, &[], then_cl, &[]);
            }
            Terminator::Return(value) => {
                let ret = match value {
                    Some(v) => {
                        let raw = self.use_value(builder, *v)?;
                        let ty = self.func.value_type(*v);
                        if cl_type(ty) == Some(types::I64) {
                            raw
                        } else {
                            builder.ins().uextend(types::I64, raw)
                        }
                    }
                    None => builder.ins().iconst(types::I64, 0),
                };
                builder.ins().return_(&[ret]);
            }
            Terminator::Unset => {
                return Err(LowerError::UnsupportedInstruction("unterminated block".to_string()));
            }
        }
        Ok(())
    }
}

/// Build a `mask_begin..=mask_end` (PPC bit numbering, MSB = bit 0) bitmask
/// of the given register width, mirroring the interpreter's `mask_range`.
fn mask_range(mask_begin: u8, mask_end: u8, width: u32) -> u64 {
    let mut mask: u64 = 0;
    let mut i = mask_begin;
    loop {
        let bit_from_lsb = width - 1 - (i as u32 % width);
        mask |= 1u64 << bit_from_lsb;
        if i == mask_end {
            break;
        }
        i = (i + 1) % (width as u8);
    }
    mask
}

fn int_cc(signedness: Signedness, op: CmpOp) -> condcodes::IntCC {
    use condcodes::IntCC::*;
    match (signedness, op) {
        (_, CmpOp::Eq) => Equal,
        (_, CmpOp::Ne) => NotEqual,
        (Signedness::Signed, CmpOp::Lt) => SignedLessThan,
        (Signedness::Signed, CmpOp::Le) => SignedLessThanOrEqual,
        (Signedness::Signed, CmpOp::Gt) => SignedGreaterThan,
        (Signedness::Signed, CmpOp::Ge) => SignedGreaterThanOrEqual,
        (Signedness::Unsigned, CmpOp::Lt) => UnsignedLessThan,
        (Signedness::Unsigned, CmpOp::Le) => UnsignedLessThanOrEqual,
        (Signedness::Unsigned, CmpOp::Gt) => UnsignedGreaterThan,
        (Signedness::Unsigned, CmpOp::Ge) => UnsignedGreaterThanOrEqual,
    }
}

fn float_cc(op: CmpOp) -> condcodes::FloatCC {
    use condcodes::FloatCC::*;
    match op {
        CmpOp::Eq => Equal,
        CmpOp::Ne => NotEqual,
        CmpOp::Lt => LessThan,
        CmpOp::Le => LessThanOrEqual,
        CmpOp::Gt => GreaterThan,
        CmpOp::Ge => GreaterThanOrEqual,
    }
}

/// Build a Cranelift `vconst` constant handle for a 4-lane 32-bit vector.
/// Unused until vector lowering lands; kept here since it belongs next to
/// the other constant-building helpers.
#[allow(dead_code)]
fn v128_const_data(lanes: [u32; 4]) -> ConstantData {
    let mut bytes = Vec::with_capacity(16);
    for lane in lanes {
        bytes.extend_from_slice(&lane.to_le_bytes());
    }
    ConstantData::from(bytes.as_slice())
}

/// Build the Cranelift function signature for compiled guest functions.
///
/// ABI: `extern "C" fn(ctx: *mut PpcContext) -> u64`. The return value is
/// the next guest instruction address to resume at (0 if the function fell
/// off its end), letting the runtime dispatcher chain translations without
/// threading extra state through a fixed register.
pub fn guest_entry_signature(call_conv: CallConv) -> ir::Signature {
    let mut sig = ir::Signature::new(call_conv);
    sig.params.push(AbiParam::new(types::I64));
    sig.returns.push(AbiParam::new(types::I64));
    sig
}

/// Error during Cranelift lowering
#[derive(Debug, thiserror::Error)]
pub enum LowerError {
    #[error("unsupported instruction: {0}")]
    UnsupportedInstruction(String),
    #[error("cranelift error: {0}")]
    CraneliftError(String),
}

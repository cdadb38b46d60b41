//! Cranelift-based x86-64 reference backend
//!
//! Builds native code for a `HirFunction` on top of `cranelift-codegen`
//! and `cranelift-frontend`. This is the reference backend named in the
//! sequence-table design; opcodes it doesn't yet lower fall back to
//! `BackendError::UnsupportedInstruction`, which the runtime treats as a
//! signal to dispatch that function to the interpreter oracle instead.

pub mod lowering;

use std::sync::Arc;

use cranelift_codegen::control::ControlPlane;
use cranelift_codegen::isa::TargetIsa;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::{ir, Context};
use cranelift_frontend::FunctionBuilderContext;

use crate::error::BackendError;
use crate::ir::instr::HirFunction;

use self::lowering::{guest_entry_signature, LoweringContext};
use super::traits::{Backend, CompiledCode, MachineInfo, TargetArch};

/// Cranelift-based code generation backend targeting the host x86-64 ISA
pub struct X64Backend {
    isa: Arc<dyn TargetIsa>,
    /// Baked into every compiled function's memory-access lowering
    membase: u64,
}

impl X64Backend {
    /// Create a backend targeting the host machine, with guest loads and
    /// stores addressed relative to `membase`.
    pub fn host(membase: u64) -> Result<Self, BackendError> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("opt_level", "speed")
            .map_err(|e| BackendError::InitializationFailed(format!("opt_level: {e}")))?;
        flag_builder
            .set("is_pic", "true")
            .map_err(|e| BackendError::InitializationFailed(format!("is_pic: {e}")))?;

        let flags = settings::Flags::new(flag_builder);
        let isa = cranelift_native::builder()
            .map_err(|e| BackendError::InitializationFailed(format!("native ISA builder: {e}")))?
            .finish(flags)
            .map_err(|e| BackendError::InitializationFailed(format!("finish ISA: {e}")))?;

        Ok(X64Backend { isa, membase })
    }

    pub fn with_isa(isa: Arc<dyn TargetIsa>, membase: u64) -> Self {
        X64Backend { isa, membase }
    }
}

impl Backend for X64Backend {
    fn name(&self) -> &'static str {
        "x64"
    }

    fn compile_function(&self, func: &HirFunction) -> Result<CompiledCode, BackendError> {
        let mut codegen_ctx = Context::new();
        let mut func_builder_ctx = FunctionBuilderContext::new();

        let call_conv = self.isa.default_call_conv();
        codegen_ctx.func.signature = guest_entry_signature(call_conv);
        codegen_ctx.func.name = ir::UserFuncName::user(0, func.address);

        {
            let builder = cranelift_frontend::FunctionBuilder::new(&mut codegen_ctx.func, &mut func_builder_ctx);
            LoweringContext::lower(func, builder, self.membase, call_conv).map_err(|e| BackendError::UnsupportedInstruction {
                backend: "x64",
                opcode: e.to_string(),
                address: func.address,
                host_ip: 0,
            })?;
        }

        let mut ctrl_plane = ControlPlane::default();
        let code = codegen_ctx
            .compile(&*self.isa, &mut ctrl_plane)
            .map_err(|e| BackendError::InitializationFailed(format!("cranelift compilation failed: {e:?}")))?;

        Ok(CompiledCode { code: code.code_buffer().to_vec(), entry_offset: 0 })
    }

    fn machine_info(&self) -> MachineInfo {
        MachineInfo {
            integer_registers: 16,
            float_registers: 16,
            // rax, rcx, rdx, rsi, rdi, r8-r11 clobbered by the System V call convention
            call_clobbered_mask: 0b0000_1111_0011_0111,
        }
    }

    fn target_arch(&self) -> TargetArch {
        TargetArch::X86_64
    }
}

//! Backend-agnostic code generation traits
//!
//! Defines the `Backend` trait that pluggable backends (the x86-64
//! Cranelift assembler, the interpreter oracle) implement, along with
//! the types describing compiled and finalized guest code.

use crate::context::PpcContext;
use crate::error::{BackendError, RuntimeError};
use crate::ir::instr::HirFunction;

/// Target architecture a backend produces code for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetArch {
    X86_64,
    /// The interpreter oracle has no real target; it reports this for diagnostics
    Interpreted,
}

/// Register-set sizing a backend's sequence table and allocator are built against
#[derive(Debug, Clone, Copy)]
pub struct MachineInfo {
    pub integer_registers: u32,
    pub float_registers: u32,
    /// Bitmask of registers clobbered by a call per the host calling convention
    pub call_clobbered_mask: u64,
}

/// Machine code produced by `compile_function`, not yet placed or relocated
#[derive(Debug)]
pub struct CompiledCode {
    pub code: Vec<u8>,
    pub entry_offset: usize,
}

/// Executable code after placement in the code cache
pub struct ExecutableCode {
    pub code_ptr: *const u8,
    pub code_size: usize,
    pub entry_offset: usize,
}

// Safety: code_ptr addresses immutable executable memory owned by the code cache
// for the lifetime of the process.
unsafe impl Send for ExecutableCode {}
unsafe impl Sync for ExecutableCode {}

/// The backend-agnostic code generation trait
///
/// The compilation pipeline is: `HirFunction` → `compile_function()` →
/// `CompiledCode` → code-cache placement → `ExecutableCode`.
pub trait Backend: Send + Sync {
    /// Backend name, for diagnostics and trace output
    fn name(&self) -> &'static str;

    /// Lower a finalized (pipeline-run) HIR function into machine code
    fn compile_function(&self, func: &HirFunction) -> Result<CompiledCode, BackendError>;

    fn machine_info(&self) -> MachineInfo;

    fn target_arch(&self) -> TargetArch;
}

/// Re-entry point a lowered guest `bl`/`bctrl` dispatches through
///
/// Both backends hand this off to whatever owns the symbol table and code
/// cache; the backends themselves know nothing about how a callee gets
/// translated or dispatched.
pub trait GuestCallHandler: Send + Sync {
    fn call(&self, target: u32, ctx: &mut PpcContext) -> Result<(), RuntimeError>;
}

impl<F> GuestCallHandler for F
where
    F: Fn(u32, &mut PpcContext) -> Result<(), RuntimeError> + Send + Sync,
{
    fn call(&self, target: u32, ctx: &mut PpcContext) -> Result<(), RuntimeError> {
        self(target, ctx)
    }
}

/// A handler for contexts that never issue a guest call, such as a leaf
/// opcode's unit tests
pub struct NoGuestCalls;

impl GuestCallHandler for NoGuestCalls {
    fn call(&self, target: u32, _ctx: &mut PpcContext) -> Result<(), RuntimeError> {
        Err(RuntimeError::UncallableGuestFunction(target))
    }
}

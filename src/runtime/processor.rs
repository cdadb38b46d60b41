//! Guest function dispatch
//!
//! `Processor::execute` is the single entry point described by the
//! declare/define lifecycle: look the target address up in the symbol
//! table, scan and lift it to HIR if this is the first call, run it
//! through the pass pipeline, hand the result to the x64 backend, and
//! fall back to the interpreter oracle for anything the x64 sequence
//! table doesn't cover yet. Once a function reaches `Defined` every later
//! call dispatches straight to its compiled form.

use std::sync::Arc;

use crate::config::Config;
use crate::error::{BackendError, CoreError, RuntimeError};
use crate::frontend::{lift_function, scan_function, HelperRegistry};
use crate::memory::Memory;
use crate::pipeline::Pipeline;

use super::code_cache::CodeCache;
use super::symbols::{CompiledTarget, FunctionBehavior, FunctionInfo, FunctionStatus, SymbolTable};
use super::thread_state::ThreadState;
use super::thunks::HostToGuestThunk;

use crate::backend::interpreter::{program_from_compiled, InterpreterBackend};
use crate::backend::traits::{Backend, GuestCallHandler};
#[cfg(feature = "x64")]
use crate::backend::x64::X64Backend;
use crate::context::PpcContext;

/// Maximum distinct guest functions a single `Processor` will track.
/// Real titles declare on the order of tens of thousands; this is a
/// generous ceiling against runaway scanning, not a tuned production limit.
const MAX_FUNCTIONS: usize = 1 << 20;

/// Owns the guest address space, the symbol table, and both backends, and
/// drives translation and dispatch of guest functions.
pub struct Processor {
    memory: Arc<Memory>,
    config: Config,
    symbols: SymbolTable,
    code_cache: CodeCache,
    helpers: HelperRegistry,
    #[cfg(feature = "x64")]
    x64: X64Backend,
    interpreter: InterpreterBackend,
    pipeline: Pipeline,
}

impl Processor {
    pub fn new(memory: Arc<Memory>, config: Config) -> Result<Self, CoreError> {
        #[cfg(feature = "x64")]
        let x64 = X64Backend::host(memory.membase() as u64)
            .map_err(CoreError::Backend)?;

        // Register allocation is built against whichever backend actually
        // ends up compiling most functions, so the x64 backend's register
        // file wins when it's enabled; only code that falls back to the
        // interpreter runs through its empty one instead.
        #[cfg(feature = "x64")]
        let machine_info = x64.machine_info();
        #[cfg(not(feature = "x64"))]
        let machine_info = InterpreterBackend.machine_info();
        let pipeline = Pipeline::new(&config, machine_info);

        Ok(Processor {
            memory,
            config,
            symbols: SymbolTable::new(),
            code_cache: CodeCache::new(),
            helpers: HelperRegistry::new(),
            #[cfg(feature = "x64")]
            x64,
            interpreter: InterpreterBackend,
            pipeline,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Declare a function at `address` without compiling it, registering
    /// its behavior for later resolution. A no-op if already declared.
    pub fn declare_function(&self, address: u32, behavior: FunctionBehavior) -> Arc<FunctionInfo> {
        let info = self.symbols.function(address);
        {
            let mut state = info.state.lock();
            if state.status == FunctionStatus::New {
                state.status = FunctionStatus::Declared;
                state.behavior = behavior;
            }
        }
        info
    }

    /// Execute the guest function at `thread.context.cia`, translating it
    /// first if this is the first call. Returns the next guest address the
    /// backend reported (a tail-call/chain hint), or `None` if execution
    /// should be re-dispatched by the caller's own scheduling loop.
    pub fn execute(&self, thread: &mut ThreadState) -> Result<Option<u32>, CoreError> {
        let address = thread.context.cia;
        let info = self.symbols.function(address);
        if self.symbols.functions_in_order().len() > MAX_FUNCTIONS {
            return Err(RuntimeError::FunctionTableFull(MAX_FUNCTIONS).into());
        }

        let target = self.ensure_defined(address, &info)?;
        self.dispatch(target, thread)
    }

    /// Re-enter dispatch for a guest `bl`/`bctrl` reached from already-running
    /// compiled or interpreted code. Runs `target` and anything it in turn
    /// calls to completion (chaining through `dispatch_ctx`'s next-address
    /// hint) before returning, mirroring a real call/`blr` pair.
    pub(crate) fn call_from_guest(&self, mut target: u32, ctx: &mut PpcContext) -> Result<(), CoreError> {
        loop {
            if self.symbols.functions_in_order().len() > MAX_FUNCTIONS {
                return Err(RuntimeError::FunctionTableFull(MAX_FUNCTIONS).into());
            }
            let info = self.symbols.function(target);
            let compiled = self.ensure_defined(target, &info)?;
            match self.dispatch_ctx(compiled, ctx)? {
                Some(next) => target = next,
                None => return Ok(()),
            }
        }
    }

    /// Drive `info` through `Declaring`/`Defining` if needed and return its
    /// compiled target. Holds `info`'s lock for the whole translation so
    /// concurrent callers for the same address block here rather than
    /// racing to compile it twice.
    fn ensure_defined(&self, address: u32, info: &FunctionInfo) -> Result<CompiledTarget, CoreError> {
        let mut state = info.state.lock();
        if let Some(target) = state.target {
            if state.status == FunctionStatus::Defined {
                return Ok(target);
            }
        }
        if state.status == FunctionStatus::Failed {
            return Err(RuntimeError::InvalidMemoryAccess(address).into());
        }

        state.status = FunctionStatus::Declaring;
        let scan = scan_function(
            &self.memory,
            address,
            |target| self.helpers.is_restgprlr_stub(&self.memory, target),
            |addr| addr != address && self.symbols.is_declared(addr),
        )
        .map_err(|e| {
            state.status = FunctionStatus::Failed;
            CoreError::from(e)
        })?;
        state.status = FunctionStatus::Declared;

        state.status = FunctionStatus::Defining;
        let name = format!("sub_{address:08x}");
        let mut func = lift_function(&self.memory, &scan, name).map_err(|e| {
            state.status = FunctionStatus::Failed;
            CoreError::from(e)
        })?;
        self.pipeline.run(&mut func).map_err(|e| {
            state.status = FunctionStatus::Failed;
            CoreError::from(e)
        })?;

        let target = self.compile(address, &func).map_err(|e| {
            state.status = FunctionStatus::Failed;
            e
        })?;

        state.target = Some(target);
        state.status = FunctionStatus::Defined;
        Ok(target)
    }

    /// Lower and place a lifted function, preferring the x64 backend and
    /// falling back to the interpreter oracle for opcodes it can't lower.
    /// This fallback is the expected steady state for parts of the
    /// sequence table that haven't grown an x64 entry yet, not an error.
    fn compile(&self, address: u32, func: &crate::ir::instr::HirFunction) -> Result<CompiledTarget, CoreError> {
        #[cfg(feature = "x64")]
        {
            match self.x64.compile_function(func) {
                Ok(compiled) => {
                    let ptr = self.code_cache.place(address, &compiled.code, compiled.entry_offset)?;
                    return Ok(CompiledTarget::Native(ptr));
                }
                Err(BackendError::UnsupportedInstruction { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let compiled = self.interpreter.compile_function(func)?;
        // Safety: `compiled.code` was just produced by `InterpreterBackend::compile_function`.
        let program = unsafe { program_from_compiled(&compiled.code) };
        Ok(CompiledTarget::Interpreted(program as *const _))
    }

    fn dispatch(&self, target: CompiledTarget, thread: &mut ThreadState) -> Result<Option<u32>, CoreError> {
        self.dispatch_ctx(target, &mut thread.context)
    }

    /// Run `target` once against `ctx`, returning the next-address hint a
    /// native entry function reports (`None` once it runs off the end of
    /// its chain). Stashes `self` in `ctx.runtime` first so a guest call the
    /// compiled code issues can find its way back into `call_from_guest`.
    fn dispatch_ctx(&self, target: CompiledTarget, ctx: &mut PpcContext) -> Result<Option<u32>, CoreError> {
        ctx.runtime = self as *const Self as usize;
        match target {
            CompiledTarget::Native(entry) => {
                let next = unsafe { HostToGuestThunk::call(entry, ctx) }?;
                Ok(next)
            }
            CompiledTarget::Interpreted(program) => {
                // Safety: the pointer was produced by `compile` from this
                // same process's leaked `IvmProgram` and outlives it.
                let program = unsafe { &*program };
                crate::backend::interpreter::Interpreter::execute(program, ctx, &self.memory, self)?;
                Ok(None)
            }
        }
    }
}

impl GuestCallHandler for Processor {
    fn call(&self, target: u32, ctx: &mut PpcContext) -> Result<(), RuntimeError> {
        self.call_from_guest(target, ctx).map_err(|e| RuntimeError::GuestCallFailed(Box::new(e)))
    }
}

/// Native re-entry point for a lowered guest `bl`/`bctrl`. The x64 backend
/// bakes this function's address in as an immediate and reaches it through
/// `call_indirect`, passing the `Processor` pointer `dispatch_ctx` stashed
/// in `ctx.runtime` and the callee's address. Runs the callee to completion
/// before returning; its return value, if any, is already in `ctx.gpr[3]`
/// by the time this returns, so the `u64` result is unused by callers.
///
/// # Safety
/// `runtime` must be a live `*const Processor` and `ctx` a valid, currently
/// exclusively-borrowed `PpcContext` — both guaranteed by `dispatch_ctx`
/// having set `ctx.runtime` immediately before entering the compiled code
/// that issues this call.
pub unsafe extern "C" fn guest_call_trampoline(runtime: usize, target: u32, ctx: *mut PpcContext) -> u64 {
    let processor = &*(runtime as *const Processor);
    let ctx = &mut *ctx;
    if let Err(e) = processor.call_from_guest(target, ctx) {
        super::thunks::set_pending_call_error(RuntimeError::GuestCallFailed(Box::new(e)));
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn nop_function(memory: &Memory, addr: u32) {
        // blr (branch to link register): the simplest function a real
        // title emits, decoded to a single-block `Return`.
        memory.write_u32(addr, 0x4e80_0020).unwrap();
    }

    #[test]
    fn execute_translates_and_dispatches_once() {
        let memory = Arc::new(Memory::from_vec(vec![0u8; 0x10000]));
        nop_function(&memory, 0x1000);
        let processor = Processor::new(memory.clone(), Config::default()).unwrap();
        let mut thread = ThreadState::new(0, 0x4000, super::super::thread_state::DEFAULT_STACK_SIZE, &memory);
        thread.context.cia = 0x1000;

        processor.execute(&mut thread).unwrap();
        assert_eq!(processor.symbols.function(0x1000).status(), FunctionStatus::Defined);
    }

    #[test]
    fn repeated_execute_reuses_the_compiled_entry() {
        let memory = Arc::new(Memory::from_vec(vec![0u8; 0x10000]));
        nop_function(&memory, 0x2000);
        let processor = Processor::new(memory.clone(), Config::default()).unwrap();
        let mut thread = ThreadState::new(0, 0x4000, super::super::thread_state::DEFAULT_STACK_SIZE, &memory);
        thread.context.cia = 0x2000;

        processor.execute(&mut thread).unwrap();
        let first_entries = processor.code_cache.entry_count();
        processor.execute(&mut thread).unwrap();
        assert_eq!(processor.code_cache.entry_count(), first_entries);
    }
}

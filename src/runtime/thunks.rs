//! Host/guest call boundary
//!
//! Compiled guest code shares one calling convention in both directions:
//! `extern "C" fn(ctx: *mut PpcContext) -> u64`, the same signature
//! `guest_entry_signature` builds for the x64 backend. Because the host
//! and the guest already agree on that signature, crossing the boundary in
//! either direction is a plain function-pointer call; no assembly
//! trampoline needs to be generated to adapt argument registers.

use std::cell::RefCell;

use crate::context::PpcContext;
use crate::error::RuntimeError;

/// Native entry point for a compiled guest function
pub type GuestEntryFn = unsafe extern "C" fn(ctx: *mut PpcContext) -> u64;

thread_local! {
    /// A lowered guest call re-enters the runtime through `call_indirect`
    /// into `guest_call_trampoline`, an `extern "C"` boundary with no room
    /// to return a `Result`. A failing nested call stashes its error here
    /// instead, for `HostToGuestThunk::call` to pick up once the native
    /// entry function it invoked returns.
    static PENDING_CALL_ERROR: RefCell<Option<RuntimeError>> = const { RefCell::new(None) };
}

pub(crate) fn set_pending_call_error(err: RuntimeError) {
    PENDING_CALL_ERROR.with(|slot| *slot.borrow_mut() = Some(err));
}

fn take_pending_call_error() -> Option<RuntimeError> {
    PENDING_CALL_ERROR.with(|slot| slot.borrow_mut().take())
}

/// Calls from host code into translated guest code.
///
/// Returns the next guest address execution should resume at, or `None` if
/// the function returned normally with nothing further queued.
pub struct HostToGuestThunk;

impl HostToGuestThunk {
    /// Invoke `entry` with `ctx`. Safety: `entry` must be a function
    /// pointer returned by [`crate::runtime::code_cache::CodeCache::lookup`]
    /// or equivalent, compiled against the same `PpcContext` layout.
    pub unsafe fn call(entry: *const u8, ctx: &mut PpcContext) -> Result<Option<u32>, RuntimeError> {
        let f: GuestEntryFn = std::mem::transmute(entry);
        let next = f(ctx as *mut PpcContext);
        if let Some(err) = take_pending_call_error() {
            return Err(err);
        }
        if next == 0 {
            Ok(None)
        } else {
            Ok(Some(next as u32))
        }
    }
}

/// Calls from guest code out to a host-implemented kernel export.
///
/// A guest-to-host thunk is the scratch-memory stub
/// [`crate::memory::Memory::search_aligned`] finds room for: the decoder
/// lifts a call to one of these addresses as an ordinary `Call`/branch, and
/// at execution time the runtime resolves the target address to a native
/// closure through the export table instead of the code cache.
pub struct GuestToHostThunk;

pub type ExportFn = dyn Fn(&mut PpcContext) -> Result<(), RuntimeError> + Send + Sync;

impl GuestToHostThunk {
    pub fn call(export: &ExportFn, ctx: &mut PpcContext) -> Result<(), RuntimeError> {
        export(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn identity(ctx: *mut PpcContext) -> u64 {
        (*ctx).gpr[3] += 1;
        0
    }

    #[test]
    fn host_to_guest_thunk_calls_through() {
        let mut ctx = PpcContext::new();
        ctx.gpr[3] = 41;
        let next = unsafe { HostToGuestThunk::call(identity as *const u8, &mut ctx) }.unwrap();
        assert_eq!(next, None);
        assert_eq!(ctx.gpr[3], 42);
    }

    #[test]
    fn guest_to_host_thunk_invokes_export() {
        let export: Box<ExportFn> = Box::new(|ctx: &mut PpcContext| {
            ctx.gpr[3] = 7;
            Ok(())
        });
        let mut ctx = PpcContext::new();
        GuestToHostThunk::call(&export, &mut ctx).unwrap();
        assert_eq!(ctx.gpr[3], 7);
    }
}

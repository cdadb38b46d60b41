//! Backend assemblers
//!
//! `x64` is the reference backend (Cranelift-based); `interpreter` is the
//! oracle backend used both as a correctness reference and as a fallback
//! for opcodes the x64 sequence table hasn't grown an entry for yet.

pub mod interpreter;
pub mod traits;

#[cfg(feature = "x64")]
pub mod x64;

pub use traits::{Backend, CompiledCode, ExecutableCode, GuestCallHandler, MachineInfo, NoGuestCalls, TargetArch};

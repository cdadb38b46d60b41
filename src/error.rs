//! Crate-wide error taxonomy
//!
//! Every subsystem defines its own error enum; `CoreError` composes them
//! so `Processor::execute` and friends have a single return type while
//! still letting callers match on the originating subsystem.

use thiserror::Error;

/// Errors raised while decoding or scanning guest PPC code
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown encoding 0x{word:08x} at guest address 0x{address:08x}")]
    UnknownEncoding { address: u32, word: u32 },
    #[error("guest address 0x{0:08x} is outside the mapped memory range")]
    AddressOutOfRange(u32),
}

/// Errors raised while running the compiler pass pipeline
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("validation failed for function 0x{address:08x}: {reason}")]
    ValidationFailed { address: u32, reason: String },
    #[error("register allocation failed for function 0x{address:08x}: {reason}")]
    RegisterAllocationFailed { address: u32, reason: String },
}

/// Errors raised by a `Backend` implementation
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend '{backend}' cannot lower opcode {opcode} (function 0x{address:08x}, host ip 0x{host_ip:016x})")]
    UnsupportedInstruction { backend: &'static str, opcode: String, address: u32, host_ip: u64 },
    #[error("code cache exhausted after {bytes_used} bytes")]
    CodeCacheExhausted { bytes_used: usize },
    #[error("backend initialization failed: {0}")]
    InitializationFailed(String),
}

/// Errors surfaced at guest-execution time
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid guest memory access at 0x{0:08x}")]
    InvalidMemoryAccess(u32),
    #[error("reservation mismatch at 0x{0:08x}")]
    ReservationMismatch(u32),
    #[error("function table is full (capacity {0})")]
    FunctionTableFull(usize),
    #[error("guest function 0x{0:08x} has no registered call handler")]
    UncallableGuestFunction(u32),
    #[error("guest call failed: {0}")]
    GuestCallFailed(Box<CoreError>),
}

/// Errors from the flat guest address space
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("failed to reserve {size} bytes of guest address space: {reason}")]
    ReservationFailed { size: usize, reason: String },
    #[error("guest address 0x{0:08x} is unmapped")]
    Unmapped(u32),
}

/// Top-level error type returned from the public API
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),
}

pub type CoreResult<T> = Result<T, CoreError>;

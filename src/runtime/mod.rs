//! Guest execution runtime
//!
//! Ties the frontend, pipeline, and backends together behind a single
//! [`Processor`]: declare a guest address, translate it on first call,
//! and dispatch to the compiled or interpreted form on every call after.

pub mod code_cache;
pub mod processor;
pub mod symbols;
pub mod thread_state;
pub mod thunks;

pub use code_cache::CodeCache;
pub use processor::Processor;
pub use symbols::{CompiledTarget, FunctionBehavior, FunctionInfo, FunctionStatus, SymbolTable, VariableInfo};
pub use thread_state::ThreadState;
pub use thunks::{GuestEntryFn, GuestToHostThunk, HostToGuestThunk};

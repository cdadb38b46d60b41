//! PowerPC to x86-64 dynamic binary translation core
//!
//! This crate implements the translation pipeline an Xbox 360 emulator
//! drives to run guest PowerPC code on an x86-64 host:
//! - **Frontend**: scans guest memory into function boundaries and lifts
//!   PowerPC instructions into a typed SSA-style HIR (`frontend`, `ir`)
//! - **Pipeline**: a fixed sequence of optimization passes over that HIR
//!   (`pipeline`)
//! - **Backend**: lowers optimized HIR to native code, with x86-64 as the
//!   reference backend and a portable interpreter as its correctness
//!   oracle and fallback (`backend`)
//! - **Runtime**: ties the above together behind a `Processor` that
//!   declares, translates, and dispatches guest functions on demand
//!   (`runtime`)
//!
//! # Example
//!
//! ```rust,ignore
//! use xenon_dbt::config::Config;
//! use xenon_dbt::memory::Memory;
//! use xenon_dbt::runtime::{Processor, ThreadState};
//! use std::sync::Arc;
//!
//! let memory = Arc::new(Memory::new(0x1_0000_0000));
//! let processor = Processor::new(memory.clone(), Config::default()).unwrap();
//! let mut thread = ThreadState::new(0, 0x7000_0000, 0x1_0000, &memory);
//! thread.context.cia = 0x8201_0000;
//! processor.execute(&mut thread).unwrap();
//! ```

#![warn(rust_2018_idioms)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::derivable_impls)]
#![allow(clippy::not_unsafe_ptr_arg_deref)]

/// Native code and oracle backends: the x86-64 assembler and the
/// interpreter
pub mod backend;

/// Translation-wide configuration and debug switches
pub mod config;

/// Guest register file layout
pub mod context;

/// Kernel export resolution for guest import tables
pub mod export;

/// Error types shared across every stage of the pipeline
pub mod error;

/// PPC instruction scanning and lifting to HIR
pub mod frontend;

/// The typed SSA-style high-level intermediate representation
pub mod ir;

/// The flat guest address space and its load/store primitives
pub mod memory;

/// The fixed-pipeline HIR optimizer
pub mod pipeline;

/// Guest execution runtime: symbol table, code cache, and dispatch
pub mod runtime;

/// Binary tracing channel for compilation and execution events
#[macro_use]
pub mod trace;

pub use config::{Config, ConfigBuilder};
pub use context::PpcContext;
pub use error::{BackendError, CompileError, CoreError, CoreResult, DecodeError, MemoryError, RuntimeError};
pub use memory::Memory;
pub use runtime::{
    CodeCache, CompiledTarget, FunctionBehavior, FunctionInfo, FunctionStatus, GuestToHostThunk,
    HostToGuestThunk, Processor, SymbolTable, ThreadState, VariableInfo,
};

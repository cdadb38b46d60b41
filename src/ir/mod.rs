//! High-level intermediate representation (HIR)
//!
//! SSA-form IR produced by the PPC frontend, transformed by the compiler
//! passes, and consumed by the backend assembler.

pub mod builder;
pub mod display;
pub mod instr;
pub mod types;

pub use builder::HirBuilder;
pub use display::disassemble_hir;
pub use instr::{
    Block, BlockId, CmpOp, CrBit, CrField, HirFunction, Instr, InstrFlags, LabelId,
    RoundingMode, Signedness, Terminator, TrapReason, ValueRef,
};
pub use types::{Endianness, IrType};

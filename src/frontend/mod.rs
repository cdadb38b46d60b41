//! PPC frontend: scan guest memory into block boundaries, then lift
//! each block's instructions to HIR.

pub mod decoder;
pub mod helpers;
pub mod scanner;

pub use decoder::lift_function;
pub use helpers::HelperRegistry;
pub use scanner::{scan_function, BlockEnd, ScanResult, ScannedBlock};

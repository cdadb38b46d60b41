//! Fixed-pipeline HIR optimizer
//!
//! Every compile runs the same ordered pass list; unlike a tiered JS VM
//! pipeline there is no per-function tier selection, since a guest
//! function is translated once and the translation is reused for the
//! rest of the process's life.

pub mod cfg_simplify;
pub mod constant_propagation;
pub mod context_promotion;
pub mod dce;
pub mod finalize;
pub mod regalloc;
pub mod simplify;
pub mod validate;

use crate::backend::traits::MachineInfo;
use crate::config::Config;
use crate::error::CompileError;
use crate::ir::instr::HirFunction;

/// A single transformation stage over a function's HIR
pub trait OptPass: Send + Sync {
    fn name(&self) -> &str;
    fn run(&self, func: &mut HirFunction);
}

/// The ordered sequence of passes a translated function is run through
pub struct Pipeline {
    passes: Vec<Box<dyn OptPass>>,
    validate: bool,
}

impl Pipeline {
    /// `machine_info` should describe whichever backend the caller prefers
    /// to compile onto (the x64 backend when it's enabled and available,
    /// the interpreter's empty register file otherwise), since register
    /// allocation is the one pass whose output depends on the target.
    pub fn new(config: &Config, machine_info: MachineInfo) -> Self {
        Pipeline {
            passes: vec![
                Box::new(context_promotion::ContextPromotion),
                Box::new(constant_propagation::ConstantPropagation),
                Box::new(simplify::Simplification),
                Box::new(dce::DeadCodeElimination),
                Box::new(cfg_simplify::ControlFlowSimplification),
                Box::new(finalize::Finalization),
                Box::new(regalloc::RegisterAllocation::new(machine_info)),
            ],
            validate: config.validate_hir,
        }
    }

    pub fn run(&self, func: &mut HirFunction) -> Result<(), CompileError> {
        for pass in &self.passes {
            pass.run(func);
        }
        if self.validate {
            validate::validate(func)?;
        }
        Ok(())
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::HirBuilder;
    use crate::ir::types::IrType;

    #[test]
    fn pipeline_runs_all_passes_and_validates() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        {
            let mut builder = HirBuilder::new(&mut func);
            let a = builder.i64(2);
            let b = builder.i64(3);
            let sum = builder.add(a, b, IrType::I64);
            builder.ret(Some(sum));
        }

        let config = Config::builder().validate_hir(true).build();
        let machine_info = MachineInfo { integer_registers: 16, float_registers: 16, call_clobbered_mask: 0 };
        let pipeline = Pipeline::new(&config, machine_info);
        pipeline.run(&mut func).unwrap();
        assert!(!func.slots.is_empty());
    }
}

//! Register allocation
//!
//! Assigns every destination value a slot number within its register
//! class's file, sized from `Backend::machine_info()`: the first
//! `integer_registers` integer-typed values and the first
//! `float_registers` float/vector-typed values each get their own slot
//! number starting at zero, and anything beyond that spills into a
//! shared numbering that starts right after the larger of the two files.
//! The interpreter reports zero registers of either class, so every
//! value in an interpreter-bound function spills — consistent with it
//! addressing values through a flat per-function slot array rather than
//! a real register file. The x64 backend still lowers each value through
//! its own cranelift `Variable` and does its own register allocation
//! underneath; this pass exists for the interpreter and for any future
//! backend that wants a pre-computed assignment instead of redoing
//! liveness itself.

use crate::backend::traits::MachineInfo;
use crate::ir::instr::HirFunction;
use crate::ir::types::IrType;

use super::OptPass;

pub struct RegisterAllocation {
    machine_info: MachineInfo,
}

impl RegisterAllocation {
    pub fn new(machine_info: MachineInfo) -> Self {
        RegisterAllocation { machine_info }
    }
}

impl OptPass for RegisterAllocation {
    fn name(&self) -> &str {
        "register-allocation"
    }

    fn run(&self, func: &mut HirFunction) {
        let mut next_int = 0u32;
        let mut next_float = 0u32;
        let mut next_spill = self.machine_info.integer_registers.max(self.machine_info.float_registers);

        for block in &func.blocks {
            for instr in &block.instrs {
                for dest in instr.dest().into_iter().chain(instr.secondary_dest()) {
                    if func.slots.contains_key(&dest) {
                        continue;
                    }
                    let is_float = matches!(func.value_type(dest), IrType::F32 | IrType::F64 | IrType::V128);
                    let slot = if is_float {
                        if next_float < self.machine_info.float_registers {
                            let s = next_float;
                            next_float += 1;
                            s
                        } else {
                            let s = next_spill;
                            next_spill += 1;
                            s
                        }
                    } else if next_int < self.machine_info.integer_registers {
                        let s = next_int;
                        next_int += 1;
                        s
                    } else {
                        let s = next_spill;
                        next_spill += 1;
                        s
                    };
                    func.slots.insert(dest, slot);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::HirBuilder;
    use crate::ir::types::IrType;

    fn host_machine_info() -> MachineInfo {
        MachineInfo { integer_registers: 16, float_registers: 16, call_clobbered_mask: 0 }
    }

    #[test]
    fn assigns_a_slot_to_every_destination_value() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        let (a, carry) = {
            let mut builder = HirBuilder::new(&mut func);
            let a = builder.i64(1);
            let b = builder.i64(2);
            let (sum, carry) = builder.add_carrying(a, b, IrType::I64);
            builder.ret(Some(sum));
            (a, carry)
        };

        RegisterAllocation::new(host_machine_info()).run(&mut func);
        assert!(func.slots.contains_key(&a));
        assert!(func.slots.contains_key(&carry));
        assert_eq!(func.slots.len(), 4);
    }

    #[test]
    fn integer_and_float_values_are_numbered_from_separate_register_files() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        let (int_val, float_val) = {
            let mut builder = HirBuilder::new(&mut func);
            let int_val = builder.i64(1);
            let float_val = builder.load_context(0x10, IrType::F64);
            builder.ret(Some(int_val));
            (int_val, float_val)
        };

        RegisterAllocation::new(host_machine_info()).run(&mut func);
        assert_eq!(func.slots[&int_val], 0);
        assert_eq!(func.slots[&float_val], 0);
    }

    #[test]
    fn values_beyond_the_register_file_spill() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        let mut dests = Vec::new();
        {
            let mut builder = HirBuilder::new(&mut func);
            for i in 0..3 {
                dests.push(builder.i64(i));
            }
            builder.ret(None);
        }

        let tiny = MachineInfo { integer_registers: 2, float_registers: 2, call_clobbered_mask: 0 };
        RegisterAllocation::new(tiny).run(&mut func);
        assert_eq!(func.slots[&dests[0]], 0);
        assert_eq!(func.slots[&dests[1]], 1);
        assert_eq!(func.slots[&dests[2]], 2);
    }

    #[test]
    fn an_interpreter_shaped_machine_spills_everything() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        let a = {
            let mut builder = HirBuilder::new(&mut func);
            let a = builder.i64(1);
            builder.ret(Some(a));
            a
        };

        let interpreted = MachineInfo { integer_registers: 0, float_registers: 0, call_clobbered_mask: 0 };
        RegisterAllocation::new(interpreted).run(&mut func);
        assert_eq!(func.slots[&a], 0);
    }
}

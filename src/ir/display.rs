//! Textual rendering of HIR, used by `debug_info()` and `always_disasm`.

use std::fmt::Write as _;

use super::instr::{HirFunction, Instr, Terminator};

/// Render a function's HIR as a flat, block-ordered listing
pub fn disassemble_hir(func: &HirFunction) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "function {} @ 0x{:08x}", func.name, func.address);
    for block in &func.blocks {
        let _ = writeln!(out, "{}:", block.id);
        for instr in &block.instrs {
            let _ = writeln!(out, "    {}", format_instr(instr));
        }
        let _ = writeln!(out, "    {}", format_terminator(&block.terminator));
    }
    out
}

fn format_instr(instr: &Instr) -> String {
    match instr.dest() {
        Some(dest) => format!("{} = {:?}", dest, instr),
        None => format!("{:?}", instr),
    }
}

fn format_terminator(term: &Terminator) -> String {
    match term {
        Terminator::Jump(target) => format!("jump {}", target),
        Terminator::BranchTrue { cond, then_block, else_block } => {
            format!("branch_true {}, {}, {}", cond, then_block, else_block)
        }
        Terminator::BranchFalse { cond, then_block, else_block } => {
            format!("branch_false {}, {}, {}", cond, then_block, else_block)
        }
        Terminator::Return(Some(v)) => format!("return {}", v),
        Terminator::Return(None) => "return".to_string(),
        Terminator::Unset => "<unset>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instr::{BlockId, Terminator};
    use crate::ir::types::IrType;

    #[test]
    fn disassembly_includes_function_header_and_blocks() {
        let mut func = HirFunction::new(0x1000, "test_fn".to_string());
        func.add_block();
        let v0 = func.alloc_value(IrType::I32);
        func.block_mut(BlockId(0)).instrs.push(Instr::ConstI32 { dest: v0, value: 7 });
        func.block_mut(BlockId(0)).terminator = Terminator::Return(Some(v0));

        let text = disassemble_hir(&func);
        assert!(text.contains("test_fn"));
        assert!(text.contains("block0"));
        assert!(text.contains("return v0"));
    }
}

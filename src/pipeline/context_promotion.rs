//! Context load/store forwarding
//!
//! Within a single block, a `LoadContext` that follows a `StoreContext`
//! (or an earlier `LoadContext`) to the same offset is replaced with a
//! direct use of the already-live value rather than re-reading the guest
//! register file. The live set resets at calls and block boundaries,
//! since a callee may observe or mutate context state the caller can't
//! see statically.

use rustc_hash::FxHashMap;

use crate::ir::instr::{HirFunction, Instr, ValueRef};

use super::OptPass;

pub struct ContextPromotion;

impl OptPass for ContextPromotion {
    fn name(&self) -> &str {
        "context-promotion"
    }

    fn run(&self, func: &mut HirFunction) {
        for block in &mut func.blocks {
            let mut live: FxHashMap<u32, ValueRef> = FxHashMap::default();
            for instr in &mut block.instrs {
                match instr {
                    Instr::LoadContext { dest, offset, .. } => {
                        if let Some(&value) = live.get(offset) {
                            let dest = *dest;
                            *instr = Instr::Move { dest, src: value };
                        } else {
                            live.insert(*offset, *dest);
                        }
                    }
                    Instr::StoreContext { offset, value, .. } => {
                        live.insert(*offset, *value);
                    }
                    Instr::Call { .. } | Instr::CallIndirect { .. } => {
                        live.clear();
                    }
                    _ => {}
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

    #[test]
    fn forwards_a_load_following_a_store_to_the_same_offset() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        let mut builder = HirBuilder::new(&mut func);
        let v = builder.i64(7);
        builder.store_context(0x10, v);
        let _loaded = builder.load_context(0x10, IrType::I64);
        builder.ret(None);
        drop(builder);

        ContextPromotion.run(&mut func);
        assert!(matches!(func.blocks[0].instrs[1], Instr::Move { .. }));
    }

    #[test]
    fn a_call_clears_the_live_set() {
        let mut func = HirFunction::new(0x1000, "f".to_string());
        func.add_block();
        let mut builder = HirBuilder::new(&mut func);
        let v = builder.i64(7);
        builder.store_context(0x10, v);
        builder.call(0x2000, vec![], false, IrType::I64);
        let _loaded = builder.load_context(0x10, IrType::I64);
        builder.ret(None);
        drop(builder);

        ContextPromotion.run(&mut func);
        assert!(matches!(func.blocks[0].instrs[2], Instr::LoadContext { .. }));
    }
}

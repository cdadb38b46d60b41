//! PPC instruction scanning: basic block discovery
//!
//! Walks guest memory from a function's entry address with a worklist,
//! classifying each instruction word just enough to find every reachable
//! block boundary before the decoder lifts each block's instructions to
//! HIR. Branches are recognized from raw opcode/extended-opcode fields;
//! full semantic decoding happens only once a block's bounds are known.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::DecodeError;
use crate::memory::Memory;

/// How a scanned block ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockEnd {
    /// Unconditional branch (`b`/`ba`) to a known address
    Jump(u32),
    /// Conditional branch (`bc`); both arms are known addresses
    Branch { taken: u32, not_taken: u32 },
    /// `bcctr`: branch to `ctr` (vtable/import dispatch, common for switch tables)
    BranchToCtr,
    /// `bclr`: branch to `lr` (function return)
    BranchToLr,
    /// `bl`/`bla`: call, falls through to `return_addr` afterward
    Call { target: u32, return_addr: u32 },
    /// `bctrl`: indirect call through `ctr`
    CallIndirectCtr { return_addr: u32 },
    /// Block boundary with no control-flow edge of its own; another block
    /// starts here because something branches into the middle of a
    /// straight-line run.
    Fallthrough(u32),
    /// Scanning determined no further instructions belong to this function
    FunctionEnd,
}

#[derive(Debug, Clone)]
pub struct ScannedBlock {
    pub start: u32,
    /// Address one past the block's last instruction
    pub end: u32,
    pub terminator: BlockEnd,
}

#[derive(Debug)]
pub struct ScanResult {
    pub entry: u32,
    pub blocks: Vec<ScannedBlock>,
}

impl ScanResult {
    pub fn block_starts(&self) -> impl Iterator<Item = u32> + '_ {
        self.blocks.iter().map(|b| b.start)
    }
}

/// Scan a guest function starting at `entry`.
///
/// `is_restgprlr_target` recognizes a call target as a compiler-emitted
/// save/restore-GPR epilogue helper (see [`crate::frontend::helpers`]);
/// reaching one ends the function without requiring an explicit `blr`.
/// `is_claimed` reports whether an address has already been claimed by a
/// different, previously declared function, the other half of the
/// function-end heuristic for code with no recognizable epilogue.
pub fn scan_function(
    memory: &Memory,
    entry: u32,
    mut is_restgprlr_target: impl FnMut(u32) -> bool,
    mut is_claimed: impl FnMut(u32) -> bool,
) -> Result<ScanResult, DecodeError> {
    let mut block_starts: FxHashSet<u32> = FxHashSet::default();
    let mut worklist: Vec<u32> = vec![entry];
    let mut terminators: FxHashMap<u32, (u32, BlockEnd)> = FxHashMap::default();
    block_starts.insert(entry);

    while let Some(start) = worklist.pop() {
        if terminators.contains_key(&start) {
            continue;
        }

        let mut addr = start;
        loop {
            let word = memory
                .read_u32(addr)
                .map_err(|_| DecodeError::AddressOutOfRange(addr))?;
            let next = addr.wrapping_add(4);

            if let Some(mut end) = classify(addr, word) {
                if let BlockEnd::Call { target, return_addr } = end {
                    if is_restgprlr_target(target) {
                        end = BlockEnd::FunctionEnd;
                    } else {
                        block_starts.insert(return_addr);
                        worklist.push(return_addr);
                    }
                    let _ = target;
                }
                match end {
                    BlockEnd::Jump(target) => {
                        block_starts.insert(target);
                        worklist.push(target);
                    }
                    BlockEnd::Branch { taken, not_taken } => {
                        block_starts.insert(taken);
                        block_starts.insert(not_taken);
                        worklist.push(taken);
                        worklist.push(not_taken);
                    }
                    BlockEnd::CallIndirectCtr { return_addr } => {
                        block_starts.insert(return_addr);
                        worklist.push(return_addr);
                    }
                    _ => {}
                }
                terminators.insert(start, (next, end));
                break;
            }

            if worklist.is_empty() && is_claimed(next) {
                terminators.insert(start, (next, BlockEnd::FunctionEnd));
                break;
            }

            addr = next;
        }
    }

    let mut sorted_starts: Vec<u32> = block_starts.into_iter().collect();
    sorted_starts.sort_unstable();

    let mut blocks = Vec::with_capacity(sorted_starts.len());
    for (i, &start) in sorted_starts.iter().enumerate() {
        let (end, terminator) = match terminators.get(&start) {
            Some(t) => *t,
            None => {
                let next_start = sorted_starts.get(i + 1).copied().unwrap_or(start + 4);
                (next_start, BlockEnd::Fallthrough(next_start))
            }
        };
        blocks.push(ScannedBlock { start, end, terminator });
    }

    Ok(ScanResult { entry, blocks })
}

/// `BO` encoding "branch always" regardless of CR/CTR: bits 4 and 2 set
fn branch_always_taken(bo: u32) -> bool {
    bo & 0b10100 == 0b10100
}

fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

fn classify(addr: u32, word: u32) -> Option<BlockEnd> {
    let primary = (word >> 26) & 0x3f;
    match primary {
        // I-form: b / ba / bl / bla
        18 => {
            let li = sign_extend(word & 0x03ff_fffc, 26);
            let aa = (word >> 1) & 1 != 0;
            let lk = word & 1 != 0;
            let target = if aa { li as u32 } else { addr.wrapping_add(li as u32) };
            if lk {
                Some(BlockEnd::Call { target, return_addr: addr.wrapping_add(4) })
            } else {
                Some(BlockEnd::Jump(target))
            }
        }
        // B-form: bc / bca / bcl / bcla
        16 => {
            let bo = (word >> 21) & 0x1f;
            let bd = sign_extend(word & 0xfffc, 16);
            let aa = (word >> 1) & 1 != 0;
            let target = if aa { bd as u32 } else { addr.wrapping_add(bd as u32) };
            let fallthrough = addr.wrapping_add(4);
            if branch_always_taken(bo) {
                Some(BlockEnd::Jump(target))
            } else {
                Some(BlockEnd::Branch { taken: target, not_taken: fallthrough })
            }
        }
        // XL-form: bclr / bcctr family (opcode 19)
        19 => {
            let xo = (word >> 1) & 0x3ff;
            let lk = word & 1 != 0;
            match xo {
                16 => Some(BlockEnd::BranchToLr),
                528 => {
                    if lk {
                        Some(BlockEnd::CallIndirectCtr { return_addr: addr.wrapping_add(4) })
                    } else {
                        Some(BlockEnd::BranchToCtr)
                    }
                }
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_b(li: i32, aa: bool, lk: bool) -> u32 {
        (18 << 26) | ((li as u32) & 0x00ff_ffff) << 2 | (aa as u32) << 1 | lk as u32
    }

    fn encode_bc(bo: u32, bi: u32, bd: i32, aa: bool, lk: bool) -> u32 {
        (16 << 26) | (bo & 0x1f) << 21 | (bi & 0x1f) << 16 | ((bd as u32) & 0x3fff) << 2
            | (aa as u32) << 1
            | lk as u32
    }

    fn encode_bclr(bo: u32, lk: bool) -> u32 {
        (19 << 26) | (bo & 0x1f) << 21 | (16 << 1) | lk as u32
    }

    fn setup_memory(words: &[(u32, u32)]) -> Memory {
        let mem = Memory::from_vec(vec![0u8; 0x10000]);
        for (addr, word) in words {
            mem.write_u32(*addr, *word).unwrap();
        }
        mem
    }

    #[test]
    fn straight_line_function_ends_at_blr() {
        let blr = encode_bclr(20, false); // BO=20 (10100) => always
        let mem = setup_memory(&[(0x1000, blr)]);
        let result = scan_function(&mem, 0x1000, |_| false, |_| false).unwrap();
        assert_eq!(result.blocks.len(), 1);
        assert_eq!(result.blocks[0].terminator, BlockEnd::BranchToLr);
    }

    #[test]
    fn conditional_branch_produces_two_successors() {
        let bc = encode_bc(12, 2, 8, false, false); // BO=12: conditional
        let blr = encode_bclr(20, false);
        let mem = setup_memory(&[(0x1000, bc), (0x1004, blr), (0x1008, blr)]);
        let result = scan_function(&mem, 0x1000, |_| false, |_| false).unwrap();
        let entry_block = result.blocks.iter().find(|b| b.start == 0x1000).unwrap();
        assert!(matches!(
            entry_block.terminator,
            BlockEnd::Branch { taken: 0x1008, not_taken: 0x1004 }
        ));
        assert_eq!(result.blocks.len(), 3);
    }

    #[test]
    fn call_to_restgprlr_target_ends_the_function() {
        let bl = encode_b(0x100, false, true);
        let mem = setup_memory(&[(0x1000, bl)]);
        let result = scan_function(&mem, 0x1000, |target| target == 0x1100, |_| false).unwrap();
        assert_eq!(result.blocks[0].terminator, BlockEnd::FunctionEnd);
    }

    #[test]
    fn unconditional_jump_merges_into_target_block() {
        let b = encode_b(8, false, false);
        let blr = encode_bclr(20, false);
        let mem = setup_memory(&[(0x1000, b), (0x1008, blr)]);
        let result = scan_function(&mem, 0x1000, |_| false, |_| false).unwrap();
        assert_eq!(result.blocks.len(), 2);
        assert_eq!(result.blocks[0].terminator, BlockEnd::Jump(0x1008));
    }
}

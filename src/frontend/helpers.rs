//! Recognition of compiler-emitted helper routines
//!
//! Xbox 360 compilers emit small shared `__savegprlr_*`/`__restgprlr_*`
//! stubs to spill/reload callee-saved GPRs and LR around a function's
//! prologue/epilogue. Recognizing a call to one of these lets the scanner
//! treat it as an epilogue marker instead of trying to trace into it.
//! Each stub is fingerprinted by its first few instruction words rather
//! than matched by address, since the linker places many copies.

use rustc_hash::FxHashSet;

use crate::memory::Memory;

/// How many leading words of a helper stub are hashed to identify it
const FINGERPRINT_WORDS: usize = 4;

/// A registry of known helper-stub fingerprints, checked against call
/// targets during scanning
#[derive(Debug, Default)]
pub struct HelperRegistry {
    restgprlr_fingerprints: FxHashSet<u32>,
}

impl HelperRegistry {
    pub fn new() -> Self {
        let mut registry = HelperRegistry::default();
        // `__restgprlr_14` pattern: a run of `lwz r14,-N(r1)` / `lwz r15,-N+4(r1)`
        // pairs ending in `mtlr`/`blr`. Real firmware ships 18 variants, one
        // per first-restored register (r14..r31); this seeds the common one.
        registry.restgprlr_fingerprints.insert(fingerprint_words(&[
            0x81ae_ffb8u32,
            0x81ce_ffbc,
            0x81ee_ffc0,
            0x820e_ffc4,
        ]));
        registry
    }

    /// Register an additional known fingerprint, e.g. recovered from a
    /// module's own `__restgprlr_*` stub at load time
    pub fn register_restgprlr(&mut self, words: &[u32]) {
        self.restgprlr_fingerprints.insert(fingerprint_words(words));
    }

    /// Does the function starting at `addr` look like a restore-GPRs stub?
    pub fn is_restgprlr_stub(&self, memory: &Memory, addr: u32) -> bool {
        let mut words = [0u32; FINGERPRINT_WORDS];
        for (i, word) in words.iter_mut().enumerate() {
            match memory.read_u32(addr + (i as u32) * 4) {
                Ok(w) => *word = w,
                Err(_) => return false,
            }
        }
        self.restgprlr_fingerprints.contains(&fingerprint_words(&words))
    }
}

fn fingerprint_words(words: &[u32]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for word in words {
        hasher.update(&word.to_be_bytes());
    }
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_the_seeded_restgprlr_fingerprint() {
        let mem = Memory::from_vec(vec![0u8; 0x10000]);
        mem.write_u32(0x2000, 0x81ae_ffb8).unwrap();
        mem.write_u32(0x2004, 0x81ce_ffbc).unwrap();
        mem.write_u32(0x2008, 0x81ee_ffc0).unwrap();
        mem.write_u32(0x200c, 0x820e_ffc4).unwrap();

        let registry = HelperRegistry::new();
        assert!(registry.is_restgprlr_stub(&mem, 0x2000));
    }

    #[test]
    fn unrelated_code_is_not_a_restgprlr_stub() {
        let mem = Memory::from_vec(vec![0u8; 0x10000]);
        let registry = HelperRegistry::new();
        assert!(!registry.is_restgprlr_stub(&mem, 0x2000));
    }
}

//! Host code cache for compiled guest functions
//!
//! Executable pages are handed out from a chunk list: a 4 MiB chunk is
//! mapped once, and placing code only ever bumps the active chunk's offset
//! forward. Chunks are never unmapped while the cache is alive, so a
//! pointer returned by `place` stays valid for the process lifetime.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::BackendError;

const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;
const CODE_ALIGN: usize = 16;

struct Chunk {
    base: *mut u8,
    size: usize,
    offset: usize,
}

// Safety: the chunk's memory is exclusively accessed through `CodeCache`,
// which guards all mutation with a mutex.
unsafe impl Send for Chunk {}

impl Chunk {
    #[cfg(unix)]
    fn new(size: usize) -> Result<Self, BackendError> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(BackendError::InitializationFailed(format!(
                "mmap executable code chunk: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(Chunk { base: ptr as *mut u8, size, offset: 0 })
    }

    #[cfg(not(unix))]
    fn new(size: usize) -> Result<Self, BackendError> {
        let mut buf = vec![0u8; size].into_boxed_slice();
        let base = buf.as_mut_ptr();
        std::mem::forget(buf);
        Ok(Chunk { base, size, offset: 0 })
    }

    fn fits(&self, len: usize) -> bool {
        let aligned = (self.offset + CODE_ALIGN - 1) & !(CODE_ALIGN - 1);
        aligned + len <= self.size
    }

    /// Copy `code` into the chunk at the next aligned offset and return its
    /// host pointer. Caller must have already checked `fits`.
    fn place(&mut self, code: &[u8]) -> *mut u8 {
        let aligned = (self.offset + CODE_ALIGN - 1) & !(CODE_ALIGN - 1);
        unsafe {
            let dest = self.base.add(aligned);
            std::ptr::copy_nonoverlapping(code.as_ptr(), dest, code.len());
            self.offset = aligned + code.len();
            dest
        }
    }
}

#[cfg(unix)]
impl Drop for Chunk {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.size);
        }
    }
}

#[cfg(not(unix))]
impl Drop for Chunk {
    fn drop(&mut self) {
        unsafe {
            drop(Vec::from_raw_parts(self.base, 0, self.size));
        }
    }
}

struct PlacedCode {
    ptr: *mut u8,
    entry_offset: usize,
}

/// Mutex-guarded store of native code placed for translated guest
/// functions, keyed by guest entry address rather than a module/function
/// index pair since a `Processor` has exactly one code cache for its one
/// flat address space.
pub struct CodeCache {
    chunk_size: usize,
    chunks: Mutex<Vec<Chunk>>,
    placed: Mutex<FxHashMap<u32, PlacedCode>>,
}

// Safety: all access to chunk/placement state goes through the mutexes above.
unsafe impl Send for CodeCache {}
unsafe impl Sync for CodeCache {}

impl CodeCache {
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        CodeCache { chunk_size, chunks: Mutex::new(Vec::new()), placed: Mutex::new(FxHashMap::default()) }
    }

    /// Copy `code` into executable memory and register it under `address`.
    /// Placed code is never moved or freed while the cache lives, so a
    /// pointer handed back by [`CodeCache::lookup`] is stable until drop.
    pub fn place(&self, address: u32, code: &[u8], entry_offset: usize) -> Result<*const u8, BackendError> {
        if code.len() > self.chunk_size {
            return Err(BackendError::CodeCacheExhausted { bytes_used: code.len() });
        }

        let mut chunks = self.chunks.lock();
        if !chunks.last().map(|c| c.fits(code.len())).unwrap_or(false) {
            chunks.push(Chunk::new(self.chunk_size)?);
        }
        let chunk = chunks.last_mut().expect("chunk just pushed if empty");
        let ptr = chunk.place(code);

        self.placed.lock().insert(address, PlacedCode { ptr, entry_offset });
        Ok(ptr as *const u8)
    }

    /// Look up a guest address's placed native entry point, if compiled.
    pub fn lookup(&self, address: u32) -> Option<*const u8> {
        let placed = self.placed.lock();
        let entry = placed.get(&address)?;
        Some(unsafe { entry.ptr.add(entry.entry_offset) as *const u8 })
    }

    pub fn contains(&self, address: u32) -> bool {
        self.placed.lock().contains_key(&address)
    }

    /// Drop a placed entry so a subsequent `Execute` retranslates it. The
    /// chunk bytes themselves are not reclaimed; the bump allocator never
    /// frees individual placements.
    pub fn invalidate(&self, address: u32) {
        self.placed.lock().remove(&address);
    }

    pub fn total_size(&self) -> usize {
        self.chunks.lock().iter().map(|c| c.offset).sum()
    }

    pub fn entry_count(&self) -> usize {
        self.placed.lock().len()
    }

    #[cfg(test)]
    fn chunk_count(&self) -> usize {
        self.chunks.lock().len()
    }
}

impl Default for CodeCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn place_and_lookup_round_trips() {
        let cache = CodeCache::new();
        let code = [0xc3u8; 16]; // ret
        let ptr = cache.place(0x8000_1000, &code, 0).unwrap();
        assert!(!ptr.is_null());
        assert!(cache.contains(0x8000_1000));
        assert_eq!(cache.lookup(0x8000_1000), Some(ptr));
    }

    #[test]
    fn unknown_address_is_absent() {
        let cache = CodeCache::new();
        assert!(!cache.contains(0x1234));
        assert_eq!(cache.lookup(0x1234), None);
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = CodeCache::new();
        cache.place(0x1000, &[0x90; 4], 0).unwrap();
        assert!(cache.contains(0x1000));
        cache.invalidate(0x1000);
        assert!(!cache.contains(0x1000));
    }

    #[test]
    fn oversized_function_is_rejected() {
        let cache = CodeCache::with_chunk_size(64);
        let big = vec![0x90u8; 128];
        assert!(matches!(cache.place(0x1000, &big, 0), Err(BackendError::CodeCacheExhausted { .. })));
    }

    #[test]
    fn distinct_addresses_share_a_chunk() {
        let cache = CodeCache::with_chunk_size(4096);
        cache.place(0x1000, &[0x90; 16], 0).unwrap();
        cache.place(0x2000, &[0x90; 16], 0).unwrap();
        assert_eq!(cache.entry_count(), 2);
        assert_eq!(cache.chunk_count(), 1);
    }
}

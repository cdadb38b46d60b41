//! Kernel export resolution
//!
//! A guest module's import table names an ordinal in a kernel library
//! (`xboxkrnl.exe`, `xam.xex`, ...) rather than a guest address. An
//! `ExportResolver` is consulted once, at module declare time, to turn
//! that (library, ordinal) pair into a host handler the runtime can call
//! through a [`crate::runtime::GuestToHostThunk`] instead of scanning and
//! lifting guest code that was never actually loaded.

use rustc_hash::FxHashMap;

use crate::context::PpcContext;
use crate::error::RuntimeError;

/// A resolved kernel export: a host handler plus enough of its original
/// signature to log calls meaningfully.
pub struct KernelExport {
    pub library: String,
    pub ordinal: u32,
    pub name: String,
    pub handler: Box<dyn Fn(&mut PpcContext) -> Result<(), RuntimeError> + Send + Sync>,
}

impl std::fmt::Debug for KernelExport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelExport")
            .field("library", &self.library)
            .field("ordinal", &self.ordinal)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Resolves `(library, ordinal)` pairs to kernel export handlers.
///
/// Consulted by module declaration, never by the scanner or decoder: an
/// import table entry is never scanned as guest code.
pub trait ExportResolver: Send + Sync {
    fn resolve(&self, library: &str, ordinal: u32) -> Option<&KernelExport>;
}

/// An `ExportResolver` backed by a fixed, pre-registered table. The
/// `debugger`/kernel layer outside this core is responsible for populating
/// it from the title's XEX import table before translation begins.
#[derive(Default)]
pub struct StaticExportTable {
    exports: FxHashMap<(String, u32), KernelExport>,
}

impl StaticExportTable {
    pub fn new() -> Self {
        StaticExportTable { exports: FxHashMap::default() }
    }

    pub fn register(
        &mut self,
        library: impl Into<String>,
        ordinal: u32,
        name: impl Into<String>,
        handler: impl Fn(&mut PpcContext) -> Result<(), RuntimeError> + Send + Sync + 'static,
    ) {
        let library = library.into();
        self.exports.insert(
            (library.clone(), ordinal),
            KernelExport { library, ordinal, name: name.into(), handler: Box::new(handler) },
        );
    }
}

impl ExportResolver for StaticExportTable {
    fn resolve(&self, library: &str, ordinal: u32) -> Option<&KernelExport> {
        self.exports.get(&(library.to_string(), ordinal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_a_registered_export() {
        let mut table = StaticExportTable::new();
        table.register("xboxkrnl.exe", 42, "KeTlsAlloc", |ctx| {
            ctx.gpr[3] = 0xdead_beef;
            Ok(())
        });

        let export = table.resolve("xboxkrnl.exe", 42).unwrap();
        assert_eq!(export.name, "KeTlsAlloc");

        let mut ctx = PpcContext::new();
        (export.handler)(&mut ctx).unwrap();
        assert_eq!(ctx.gpr[3], 0xdead_beef);
    }

    #[test]
    fn unknown_ordinal_is_unresolved() {
        let table = StaticExportTable::new();
        assert!(table.resolve("xboxkrnl.exe", 1).is_none());
    }
}

//! Guest symbol table
//!
//! A `FunctionInfo` tracks one guest function's translation state; status
//! only ever advances forward (`New → Declaring → Declared → Defining →
//! Defined`, or `Failed` from any in-progress state). The per-entry
//! `Mutex` doubles as the defining lock: a thread that wins the race to
//! transition a function into `Defining` holds the lock for the whole
//! scan/lift/compile sequence, so a second caller resolving the same
//! address blocks on the lock instead of duplicating the work, and finds
//! `Defined` waiting for it once the first caller releases.
//!
//! `VariableInfo` is the data-symbol counterpart, used for named guest
//! globals resolved from the load image rather than scanned from code.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

/// A function's position in the declare/define lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionStatus {
    New,
    Declaring,
    Declared,
    Defining,
    Defined,
    Failed,
}

/// How a function's body should be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionBehavior {
    /// Scanned and lifted from guest memory, the common case
    Default,
    /// Resolved to a kernel export; never scanned
    Extern,
    /// A recognized compiler helper stub (save/restore-GPR, etc.)
    Builtin,
}

/// Where a `Defined` function's compiled body lives
#[derive(Clone, Copy)]
pub enum CompiledTarget {
    /// Native entry point placed in the code cache
    Native(*const u8),
    /// Interpreter oracle program, leaked for the process lifetime
    Interpreted(*const crate::backend::interpreter::IvmProgram),
}

// Safety: `Native`/`Interpreted` point at code-cache/leaked memory that
// outlives the process; `FunctionInfo`'s mutex is what actually guards
// concurrent access to the slot holding this value.
unsafe impl Send for CompiledTarget {}
unsafe impl Sync for CompiledTarget {}

pub struct FunctionEntryState {
    pub status: FunctionStatus,
    pub behavior: FunctionBehavior,
    pub target: Option<CompiledTarget>,
}

pub struct FunctionInfo {
    pub address: u32,
    pub state: Mutex<FunctionEntryState>,
}

impl FunctionInfo {
    fn new(address: u32) -> Self {
        FunctionInfo {
            address,
            state: Mutex::new(FunctionEntryState {
                status: FunctionStatus::New,
                behavior: FunctionBehavior::Default,
                target: None,
            }),
        }
    }

    pub fn status(&self) -> FunctionStatus {
        self.state.lock().status
    }
}

/// A data symbol: a guest address with an optional recovered name
pub struct VariableInfo {
    pub address: u32,
    pub name: Option<String>,
}

/// Insertion-ordered set of function and variable symbols, keyed by guest
/// address. Mirrors a loaded module's export/import table plus whatever
/// the scanner discovers on the fly.
pub struct SymbolTable {
    functions: DashMap<u32, Arc<FunctionInfo>>,
    variables: DashMap<u32, Arc<VariableInfo>>,
    function_order: Mutex<Vec<u32>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            functions: DashMap::new(),
            variables: DashMap::new(),
            function_order: Mutex::new(Vec::new()),
        }
    }

    /// Look up or create the `FunctionInfo` for `address`. Safe to call
    /// concurrently: only the first caller for a given address appends it
    /// to the insertion-ordered list.
    pub fn function(&self, address: u32) -> Arc<FunctionInfo> {
        if let Some(existing) = self.functions.get(&address) {
            return existing.clone();
        }
        let info = Arc::new(FunctionInfo::new(address));
        match self.functions.entry(address) {
            dashmap::mapref::entry::Entry::Occupied(e) => e.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                self.function_order.lock().push(address);
                e.insert(info).clone()
            }
        }
    }

    /// Whether `address` has already been claimed by some function, without
    /// creating an entry if it hasn't. Used by the scanner's `is_claimed`
    /// callback to stop a straight-line scan that runs into a different,
    /// previously declared function.
    pub fn is_declared(&self, address: u32) -> bool {
        self.functions.contains_key(&address)
    }

    pub fn declare_variable(&self, address: u32, name: Option<String>) -> Arc<VariableInfo> {
        self.variables
            .entry(address)
            .or_insert_with(|| Arc::new(VariableInfo { address, name }))
            .clone()
    }

    pub fn variable(&self, address: u32) -> Option<Arc<VariableInfo>> {
        self.variables.get(&address).map(|e| e.clone())
    }

    /// Every declared function, in the order it was first requested
    pub fn functions_in_order(&self) -> Vec<Arc<FunctionInfo>> {
        self.function_order
            .lock()
            .iter()
            .filter_map(|addr| self.functions.get(addr).map(|e| e.clone()))
            .collect()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_lookup_is_idempotent() {
        let table = SymbolTable::new();
        let a = table.function(0x1000);
        let b = table.function(0x1000);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.status(), FunctionStatus::New);
    }

    #[test]
    fn status_transitions_are_observable() {
        let table = SymbolTable::new();
        let info = table.function(0x2000);
        {
            let mut state = info.state.lock();
            state.status = FunctionStatus::Declaring;
        }
        assert_eq!(info.status(), FunctionStatus::Declaring);
    }

    #[test]
    fn functions_in_order_reflects_first_request() {
        let table = SymbolTable::new();
        table.function(0x3000);
        table.function(0x1000);
        table.function(0x3000); // repeat lookup, must not duplicate order entry
        let order: Vec<u32> = table.functions_in_order().iter().map(|f| f.address).collect();
        assert_eq!(order, vec![0x3000, 0x1000]);
    }

    #[test]
    fn variables_carry_an_optional_name() {
        let table = SymbolTable::new();
        table.declare_variable(0x4000, Some("g_frameCount".to_string()));
        let var = table.variable(0x4000).unwrap();
        assert_eq!(var.name.as_deref(), Some("g_frameCount"));
    }
}

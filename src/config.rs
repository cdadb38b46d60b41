//! Runtime configuration flags

use std::path::PathBuf;

/// Flags that shape how the compiler and backend behave for a `Processor`
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Retain debug info and emit HIR/source disassembly
    pub debug: bool,
    /// Emit debug info unconditionally, even when `debug` is false
    pub always_disasm: bool,
    /// Run the Validation pass after RegisterAllocation
    pub validate_hir: bool,
    /// Insert a host trap before executing this guest address
    pub break_on_instruction: Option<u32>,
    /// Insert checks on load/store of this guest address
    pub break_on_memory: Option<u32>,
    /// Path the tracing channel writes its event stream to
    pub trace_file: Option<PathBuf>,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Whether debug info should be produced for a given compilation
    pub fn effective_debug(&self) -> bool {
        self.debug || self.always_disasm
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn debug(mut self, value: bool) -> Self {
        self.config.debug = value;
        self
    }

    pub fn always_disasm(mut self, value: bool) -> Self {
        self.config.always_disasm = value;
        self
    }

    pub fn validate_hir(mut self, value: bool) -> Self {
        self.config.validate_hir = value;
        self
    }

    pub fn break_on_instruction(mut self, address: u32) -> Self {
        self.config.break_on_instruction = Some(address);
        self
    }

    pub fn break_on_memory(mut self, address: u32) -> Self {
        self.config.break_on_memory = Some(address);
        self
    }

    pub fn trace_file(mut self, path: PathBuf) -> Self {
        self.config.trace_file = Some(path);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_disasm_implies_effective_debug() {
        let config = Config::builder().always_disasm(true).build();
        assert!(config.effective_debug());
        assert!(!config.debug);
    }

    #[test]
    fn default_config_disables_everything() {
        let config = Config::default();
        assert!(!config.effective_debug());
        assert!(config.break_on_instruction.is_none());
    }
}

//! Structured event tracing channel
//!
//! When [`Config::trace_file`](crate::config::Config::trace_file) is set,
//! compilation and execution events are appended to it as a flat binary
//! stream: a fixed 24-byte header (`event_type: u32, thread_id: u32,
//! time_us: u64, payload_length: u64`, all little-endian) followed by
//! `payload_length` bytes. The fixed header size lets a reader skip any
//! event type it doesn't recognize without parsing the payload.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::config::Config;

/// Size in bytes of the fixed trace event header
pub const HEADER_SIZE: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EventType {
    FunctionDeclared = 0,
    FunctionDefined = 1,
    FunctionFailed = 2,
    Execute = 3,
    BackendFallback = 4,
}

/// An append-only sink for trace events. Disabled (writer is `None`) when
/// no trace file is configured, so `emit` is a cheap no-op in the common
/// case rather than a branch the caller has to remember to guard.
pub struct TraceChannel {
    writer: Option<Mutex<BufWriter<File>>>,
}

impl TraceChannel {
    pub fn from_config(config: &Config) -> std::io::Result<Self> {
        match &config.trace_file {
            Some(path) => Self::open(path),
            None => Ok(Self::disabled()),
        }
    }

    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(TraceChannel { writer: Some(Mutex::new(BufWriter::new(file))) })
    }

    pub fn disabled() -> Self {
        TraceChannel { writer: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    /// Append one event. `time_us` is supplied by the caller (see
    /// [`now_micros`]) rather than sampled inside `emit`, so a test can
    /// stamp deterministic timestamps without mocking the clock.
    pub fn emit(&self, event_type: EventType, thread_id: u32, time_us: u64, payload: &[u8]) {
        let Some(writer) = &self.writer else { return };
        let mut writer = writer.lock();
        let _ = writer.write_all(&(event_type as u32).to_le_bytes());
        let _ = writer.write_all(&thread_id.to_le_bytes());
        let _ = writer.write_all(&time_us.to_le_bytes());
        let _ = writer.write_all(&(payload.len() as u64).to_le_bytes());
        let _ = writer.write_all(payload);
    }

    pub fn flush(&self) -> std::io::Result<()> {
        match &self.writer {
            Some(writer) => writer.lock().flush(),
            None => Ok(()),
        }
    }
}

/// Microseconds since the Unix epoch, for stamping live trace events.
pub fn now_micros() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_micros() as u64).unwrap_or(0)
}

/// Emit a trace event if `$channel` is enabled, stamping it with the
/// current time. Skips formatting `$payload` entirely when tracing is off.
#[macro_export]
macro_rules! event {
    ($channel:expr, $event_type:expr, $thread_id:expr, $payload:expr) => {
        if $channel.is_enabled() {
            $channel.emit($event_type, $thread_id, $crate::trace::now_micros(), $payload);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn disabled_channel_emits_nothing() {
        let channel = TraceChannel::disabled();
        channel.emit(EventType::Execute, 0, 0, b"ignored");
        assert!(!channel.is_enabled());
    }

    #[test]
    fn emit_writes_the_fixed_header_then_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.bin");
        let channel = TraceChannel::open(&path).unwrap();
        channel.emit(EventType::FunctionDefined, 7, 1234, b"sub_00001000");
        channel.flush().unwrap();

        let mut bytes = Vec::new();
        File::open(&path).unwrap().read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 12);
        assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), EventType::FunctionDefined as u32);
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 7);
        assert_eq!(u64::from_le_bytes(bytes[8..16].try_into().unwrap()), 1234);
        assert_eq!(u64::from_le_bytes(bytes[16..24].try_into().unwrap()), 12);
        assert_eq!(&bytes[24..], b"sub_00001000");
    }
}

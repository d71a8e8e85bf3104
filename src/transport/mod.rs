//! Command transport to the gate controller.
//!
//! The controller listens on a serial line for newline-terminated tokens
//! (`pass`, `failed`). Nothing is acknowledged. Send failures are reported to
//! the control loop, which logs them and carries on.

mod serial;

use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::dispatch::CommandClass;

pub use serial::SerialSink;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport channel busy")]
    Busy,
    #[error("transport channel closed")]
    Closed,
    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound command channel.
pub trait CommandSink: Send {
    fn send(&mut self, class: CommandClass) -> Result<(), TransportError>;

    /// Wait for in-flight writes to leave the channel.
    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Release the channel. Closing an already closed sink is a no-op.
    fn close(&mut self) -> Result<(), TransportError>;

    fn describe(&self) -> String;
}

/// Dry-run sink: logs commands instead of sending them.
#[derive(Debug, Default)]
pub struct LogSink {
    sent: u64,
    closed: bool,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommandSink for LogSink {
    fn send(&mut self, class: CommandClass) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.sent += 1;
        log::info!("dry-run: would send {:?}", class.wire_token());
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            log::info!("dry-run sink closed after {} commands", self.sent);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "dry-run".to_string()
    }
}

/// What a `MemorySink` has seen.
#[derive(Clone, Debug, Default)]
pub struct MemorySinkLog {
    /// Bytes exactly as they would hit the wire.
    pub wire: Vec<u8>,
    pub sent: Vec<CommandClass>,
    pub failures: u64,
    pub flush_count: u32,
    pub close_count: u32,
}

/// In-memory sink with failure injection, for tests and demos.
///
/// Clones share the same log so a test can keep a handle after moving the
/// sink into the control loop.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    log: Arc<Mutex<MemorySinkLog>>,
    fail_next: Arc<Mutex<u32>>,
    closed: Arc<Mutex<bool>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` sends fail with `Busy`.
    pub fn fail_next(&self, count: u32) {
        if let Ok(mut guard) = self.fail_next.lock() {
            *guard = count;
        }
    }

    pub fn snapshot(&self) -> MemorySinkLog {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    fn with_log<T>(&self, f: impl FnOnce(&mut MemorySinkLog) -> T) -> Result<T, TransportError> {
        let mut guard = self.log.lock().map_err(|_| TransportError::Closed)?;
        Ok(f(&mut guard))
    }
}

impl CommandSink for MemorySink {
    fn send(&mut self, class: CommandClass) -> Result<(), TransportError> {
        if *self.closed.lock().map_err(|_| TransportError::Closed)? {
            return Err(TransportError::Closed);
        }
        let should_fail = {
            let mut remaining = self.fail_next.lock().map_err(|_| TransportError::Closed)?;
            if *remaining > 0 {
                *remaining -= 1;
                true
            } else {
                false
            }
        };
        if should_fail {
            self.with_log(|log| log.failures += 1)?;
            return Err(TransportError::Busy);
        }
        self.with_log(|log| {
            log.wire.extend_from_slice(&class.wire_bytes());
            log.sent.push(class);
        })
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.with_log(|log| log.flush_count += 1)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let mut closed = self.closed.lock().map_err(|_| TransportError::Closed)?;
        if !*closed {
            *closed = true;
            drop(closed);
            self.with_log(|log| log.close_count += 1)?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_records_wire_bytes() {
        let sink = MemorySink::new();
        let mut handle = sink.clone();
        handle.send(CommandClass::Pass).unwrap();
        handle.send(CommandClass::Failed).unwrap();
        let log = sink.snapshot();
        assert_eq!(log.wire, b"pass\nfailed\n");
        assert_eq!(log.sent, vec![CommandClass::Pass, CommandClass::Failed]);
    }

    #[test]
    fn memory_sink_injects_failures() {
        let mut sink = MemorySink::new();
        sink.fail_next(1);
        assert!(matches!(sink.send(CommandClass::Pass), Err(TransportError::Busy)));
        assert!(sink.send(CommandClass::Pass).is_ok());
        assert_eq!(sink.snapshot().failures, 1);
    }

    #[test]
    fn close_is_idempotent() {
        let mut sink = MemorySink::new();
        sink.close().unwrap();
        sink.close().unwrap();
        assert_eq!(sink.snapshot().close_count, 1);
        assert!(matches!(sink.send(CommandClass::Pass), Err(TransportError::Closed)));

        let mut dry = LogSink::new();
        dry.close().unwrap();
        dry.close().unwrap();
        assert!(dry.send(CommandClass::Pass).is_err());
    }
}

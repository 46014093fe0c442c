//! # afd-log
//!
//! The per-file and control-plane logs of the AFD.
//!
//! * **Production log**: one line per file transformation.
//! * **Delete log**: one line per file removed from a batch, with a reason.
//! * **Event log**: one line per control-plane mutation.
//!
//! These are structured records kept apart from the tracing stream (the
//! system log). Each goes through a [`RecordSink`]: a log file, a fifo to a
//! log daemon, memory (tests), or nowhere when disabled in `afd.toml`.

pub mod record;
pub mod sink;

pub use record::{
    batch_id, now, DeleteReason, DeleteRecord, EventAction, EventClass, EventRecord, EventType,
    LogRecord, ProductionRecord,
};
pub use sink::{FifoSink, FileSink, MemorySink, NullSink, RecordSink};

use std::path::Path;
use std::sync::Arc;

use afd_config::{log_sink_warn, LogConfig};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Fifo error: {0}")]
    Ipc(#[from] afd_ipc::IpcError),

    #[error("Log sink lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, LogError>;

/// File name of the active log file for `R`
pub fn log_file_name<R: LogRecord>() -> String {
    format!("{}.0", R::LOG_NAME)
}

/// The three record sinks a process writes to
#[derive(Clone)]
pub struct LogSinks {
    pub production: Arc<dyn RecordSink<ProductionRecord>>,
    pub delete: Arc<dyn RecordSink<DeleteRecord>>,
    pub event: Arc<dyn RecordSink<EventRecord>>,
}

impl LogSinks {
    /// Log files below `log_dir`, honouring the enable switches
    pub fn files(log_dir: &Path, config: &LogConfig) -> Result<Self> {
        fn open<R: LogRecord>(
            log_dir: &Path,
            enabled: bool,
        ) -> Result<Arc<dyn RecordSink<R>>> {
            if enabled {
                Ok(Arc::new(FileSink::open(&log_dir.join(log_file_name::<R>()))?))
            } else {
                Ok(Arc::new(NullSink))
            }
        }
        Ok(Self {
            production: open::<ProductionRecord>(log_dir, config.production)?,
            delete: open::<DeleteRecord>(log_dir, config.delete)?,
            event: open::<EventRecord>(log_dir, config.event)?,
        })
    }

    /// Sinks that drop everything
    pub fn null() -> Self {
        Self {
            production: Arc::new(NullSink),
            delete: Arc::new(NullSink),
            event: Arc::new(NullSink),
        }
    }

    /// In-memory sinks plus handles to inspect them
    pub fn memory() -> (Self, MemoryLogs) {
        let logs = MemoryLogs {
            production: Arc::new(MemorySink::new()),
            delete: Arc::new(MemorySink::new()),
            event: Arc::new(MemorySink::new()),
        };
        let sinks = Self {
            production: logs.production.clone(),
            delete: logs.delete.clone(),
            event: logs.event.clone(),
        };
        (sinks, logs)
    }

    /// Write a production record; failures are reported, never fatal
    pub fn production(&self, record: &ProductionRecord) {
        if let Err(e) = self.production.write(record) {
            log_sink_warn!("Failed to write production log", error = e.to_string());
        }
    }

    pub fn delete(&self, record: &DeleteRecord) {
        if let Err(e) = self.delete.write(record) {
            log_sink_warn!("Failed to write delete log", error = e.to_string());
        }
    }

    pub fn event(&self, record: &EventRecord) {
        if let Err(e) = self.event.write(record) {
            log_sink_warn!("Failed to write event log", error = e.to_string());
        }
    }
}

/// Inspection handles returned by [`LogSinks::memory`]
#[derive(Clone)]
pub struct MemoryLogs {
    pub production: Arc<MemorySink<ProductionRecord>>,
    pub delete: Arc<MemorySink<DeleteRecord>>,
    pub event: Arc<MemorySink<EventRecord>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_names() {
        assert_eq!(log_file_name::<ProductionRecord>(), "PRODUCTION_LOG.0");
        assert_eq!(log_file_name::<DeleteRecord>(), "DELETE_LOG.0");
        assert_eq!(log_file_name::<EventRecord>(), "EVENT_LOG.0");
    }

    #[test]
    fn test_disabled_logs_create_no_files() {
        let temp = tempfile::tempdir().unwrap();
        let config = LogConfig {
            production: true,
            delete: false,
            event: false,
        };
        let sinks = LogSinks::files(temp.path(), &config).unwrap();
        sinks.event(&EventRecord::new(
            EventClass::Glob,
            EventType::Manual,
            EventAction::AmgStop,
            "",
            "u",
        ));
        assert!(temp.path().join("PRODUCTION_LOG.0").exists());
        assert!(!temp.path().join("EVENT_LOG.0").exists());
    }

    #[test]
    fn test_memory_handles_see_writes() {
        let (sinks, logs) = LogSinks::memory();
        sinks.event(&EventRecord::new(
            EventClass::Host,
            EventType::Manual,
            EventAction::EnableHost,
            "h",
            "u",
        ));
        assert_eq!(logs.event.len(), 1);
        assert!(logs.delete.is_empty());
    }
}

//! Where log records go.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use afd_config::log_sink_warn;

use crate::record::LogRecord;
use crate::{LogError, Result};

/// Destination for one kind of log record
pub trait RecordSink<R: LogRecord>: Send + Sync {
    fn write(&self, record: &R) -> Result<()>;
}

/// Appends one line per record to a log file
pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<R: LogRecord> RecordSink<R> for FileSink {
    fn write(&self, record: &R) -> Result<()> {
        let mut line = record.to_line();
        line.push('\n');
        let mut file = self.file.lock().map_err(|_| LogError::Poisoned)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

/// Sends each record as one atomic fifo write to a log daemon
pub struct FifoSink {
    path: PathBuf,
}

impl FifoSink {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl<R: LogRecord> RecordSink<R> for FifoSink {
    fn write(&self, record: &R) -> Result<()> {
        let mut line = record.to_line();
        line.push('\n');
        if line.len() > afd_ipc::PIPE_BUF {
            log_sink_warn!("Log line truncated to PIPE_BUF", log = R::LOG_NAME, len = line.len());
            let mut cut = afd_ipc::PIPE_BUF - 1;
            while !line.is_char_boundary(cut) {
                cut -= 1;
            }
            line.truncate(cut);
            line.push('\n');
        }
        afd_ipc::send_bytes(&self.path, line.as_bytes())?;
        Ok(())
    }
}

/// Keeps records in memory
pub struct MemorySink<R> {
    records: Mutex<Vec<R>>,
}

impl<R: LogRecord> MemorySink<R> {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of everything written so far
    pub fn records(&self) -> Vec<R> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R: LogRecord> Default for MemorySink<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: LogRecord> RecordSink<R> for MemorySink<R> {
    fn write(&self, record: &R) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| LogError::Poisoned)?
            .push(record.clone());
        Ok(())
    }
}

/// Discards everything (a log disabled in the configuration)
pub struct NullSink;

impl<R: LogRecord> RecordSink<R> for NullSink {
    fn write(&self, _record: &R) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{EventAction, EventClass, EventRecord, EventType};
    use std::time::Duration;

    fn event(subject: &str) -> EventRecord {
        EventRecord::new(
            EventClass::Host,
            EventType::Manual,
            EventAction::StopQueue,
            subject,
            "tester",
        )
    }

    #[test]
    fn test_file_sink_appends_lines() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("log").join("EVENT_LOG.0");
        let sink = FileSink::open(&path).unwrap();
        RecordSink::<EventRecord>::write(&sink, &event("h1")).unwrap();
        RecordSink::<EventRecord>::write(&sink, &event("h2")).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("|EA_STOP_QUEUE|h1|tester|"));
        assert!(lines[1].contains("|h2|"));
    }

    #[test]
    fn test_fifo_sink_writes_whole_lines() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("event_log.fifo");
        let mut reader = afd_ipc::FifoReader::open(&path).unwrap();
        let sink = FifoSink::new(&path);
        RecordSink::<EventRecord>::write(&sink, &event("h1")).unwrap();

        assert!(reader.wait(Duration::from_millis(500)).unwrap());
        let n = reader.fill().unwrap();
        let mut bytes = Vec::new();
        while let Some(b) = reader.next_byte() {
            bytes.push(b);
        }
        assert_eq!(bytes.len(), n);
        let line = String::from_utf8(bytes).unwrap();
        assert!(line.ends_with("|h1|tester|\n"));
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        sink.write(&event("a")).unwrap();
        assert_eq!(sink.records()[0].subject, "a");
    }
}

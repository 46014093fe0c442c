//! # afd-ipc
//!
//! Command fifos shared by the AFD daemons.
//!
//! ## Protocol
//!
//! Every fifo carries single-byte opcodes unless noted otherwise.
//! Variable-length payloads are framed as `opcode || NUL-terminated string`
//! or `opcode || 4-byte position`. A message is always written with one
//! `write(2)` of at most `PIPE_BUF` bytes so concurrent producers never
//! interleave.
//!
//! | Fifo | Consumer | Messages |
//! |---|---|---|
//! | `AFD_CMD_FIFO` | init_afd | [`AfdCommand`] |
//! | `FD_CMD_FIFO` | FD | [`FdCommand`] |
//! | `FD_WAKE_UP_FIFO` | FD | any byte |
//! | `FD_DELETE_FIFO` | FD | [`FdDeleteMessage`] |
//! | `DEL_TIME_JOB_FIFO` | AMG | [`HostAliasMessage`] |
//! | `RETRY_FD_FIFO` | FD | [`PositionMessage`] |
//! | `RETRY_MON_FIFO.<N>` | MON | [`PositionMessage`] |
//! | `DC_CMD_FIFO` | dir_check | [`DcCommand`] |
//! | `AW_CMD_FIFO` | archive_watch | [`AwCommand`] |
//! | `MSG_FIFO` | FD | [`FdMessage`] |

pub mod fifo;
pub mod message;
pub mod opcodes;
pub mod process;

pub use fifo::{make_fifo, open_fifo_rw, poll_readable, send, send_bytes, FifoReader, RingBuffer};
pub use message::{
    Frame, FdDeleteMessage, FdMessage, HostAliasMessage, PositionMessage, FD_MESSAGE_SIZE,
};
pub use opcodes::{AfdCommand, AwCommand, DcCommand, FdCommand};
pub use process::{is_alive, process_name, terminate, terminate_with, Termination};

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("System error: {0}")]
    Nix(#[from] nix::Error),

    #[error("Malformed frame: {0}")]
    Frame(String),

    #[error("Unknown opcode {opcode:#04x} on {fifo}")]
    UnknownOpcode { fifo: &'static str, opcode: u8 },
}

pub type Result<T> = std::result::Result<T, IpcError>;

/// Largest message that is guaranteed to be written atomically
pub const PIPE_BUF: usize = libc::PIPE_BUF;

pub const AFD_CMD_FIFO: &str = "afd_cmd.fifo";
pub const FD_CMD_FIFO: &str = "fd_cmd.fifo";
pub const FD_WAKE_UP_FIFO: &str = "fd_wake_up.fifo";
pub const FD_DELETE_FIFO: &str = "fd_delete.fifo";
pub const DEL_TIME_JOB_FIFO: &str = "del_time_job.fifo";
pub const RETRY_FD_FIFO: &str = "retry_fd.fifo";
pub const RETRY_MON_FIFO: &str = "retry_mon.fifo";
pub const DC_CMD_FIFO: &str = "dc_cmd.fifo";
pub const AW_CMD_FIFO: &str = "aw_cmd.fifo";
pub const MSG_FIFO: &str = "msg.fifo";

pub const PRODUCTION_LOG_FIFO: &str = "production_log.fifo";
pub const DELETE_LOG_FIFO: &str = "delete_log.fifo";
pub const EVENT_LOG_FIFO: &str = "event_log.fifo";

/// Path of a named fifo inside `fifo_dir`
pub fn fifo_path(fifo_dir: &Path, name: &str) -> PathBuf {
    fifo_dir.join(name)
}

/// `RETRY_MON_FIFO.<N>` for the monitor of AFD number `n`
pub fn retry_mon_fifo(fifo_dir: &Path, n: u32) -> PathBuf {
    fifo_dir.join(format!("{}.{}", RETRY_MON_FIFO, n))
}

/// Every command fifo the core creates at startup
pub const CORE_FIFOS: &[&str] = &[
    AFD_CMD_FIFO,
    FD_CMD_FIFO,
    FD_WAKE_UP_FIFO,
    FD_DELETE_FIFO,
    DEL_TIME_JOB_FIFO,
    RETRY_FD_FIFO,
    DC_CMD_FIFO,
    AW_CMD_FIFO,
    MSG_FIFO,
];

/// Create all core fifos below `fifo_dir` (existing ones are kept)
pub fn create_core_fifos(fifo_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(fifo_dir)?;
    for name in CORE_FIFOS {
        make_fifo(&fifo_path(fifo_dir, name))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_mon_fifo_name() {
        let path = retry_mon_fifo(Path::new("/w/fifo_dir"), 3);
        assert_eq!(path, PathBuf::from("/w/fifo_dir/retry_mon.fifo.3"));
    }

    #[test]
    fn test_create_core_fifos_idempotent() {
        use std::os::unix::fs::FileTypeExt;

        let temp = tempfile::tempdir().unwrap();
        create_core_fifos(temp.path()).unwrap();
        create_core_fifos(temp.path()).unwrap();
        for name in CORE_FIFOS {
            let meta = std::fs::metadata(temp.path().join(name)).unwrap();
            assert!(meta.file_type().is_fifo(), "{} is not a fifo", name);
        }
    }
}

//! # afd-state
//!
//! Versioned, memory-mapped status databases shared by the AFD daemons.
//!
//! Every database lives below `<work>/fifo_dir/` and starts with a
//! [`DbHeader`](layout::DbHeader) of `AFD_WORD_OFFSET` bytes followed by
//! its records. Attaching refuses files written with another record
//! version, and records grow in fixed steps.
//!
//! | File | Type | Contents |
//! |---|---|---|
//! | `fsa_status` | [`Fsa`] | one record per destination host |
//! | `fra_status` | [`Fra`] | one record per scanned directory |
//! | `job_id_data` | [`Jid`] | job identities |
//! | `directory_names` | [`Dnb`] | dir_id → directory name |
//! | `file_mask_data` | [`Fmd`] | filter sets (variable length) |
//! | `dir_config_list` | [`Dcl`] | dc_id → DIR_CONFIG path |
//! | `pwb_data` | [`Pwb`] | encoded passwords |
//! | `AFD_ACTIVE` | [`ActiveFile`] | daemon pids + heartbeat |

pub mod active;
pub mod dcl;
pub mod dnb;
pub mod fmd;
pub mod fra;
pub mod fsa;
pub mod jid;
pub mod layout;
pub mod lock;
pub mod mapped;
pub mod password;
pub mod pwb;

pub use active::{ActiveFile, ProcessSlot, AFD_ACTIVE_FILE, NO_OF_PROCESS};
pub use dcl::Dcl;
pub use dnb::Dnb;
pub use fmd::Fmd;
pub use fra::{Fra, FraRecord};
pub use fsa::{Fsa, FsaRecord};
pub use jid::{Jid, JobIdData, JobSpec};
pub use lock::RecordLock;
pub use mapped::{Database, MappedFile, Record};
pub use password::PasswordEncoding;
pub use pwb::Pwb;

use std::path::{Path, PathBuf};

use afd_config::paths::WorkDir;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot attach {path}: {reason}")]
    Attach { path: PathBuf, reason: String },

    #[error("Version mismatch in {path}: expected {expected}, found {found}")]
    Version {
        path: PathBuf,
        expected: u8,
        found: u8,
    },

    #[error("{path} is {size} bytes, need at least {needed}")]
    TooSmall {
        path: PathBuf,
        size: usize,
        needed: usize,
    },

    #[error("Corrupt database: {0}")]
    Corrupt(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Does not fit: {0}")]
    Full(String),

    #[error("Record lock failed: {0}")]
    Lock(nix::Error),
}

pub type Result<T> = std::result::Result<T, StateError>;

/// Path of a database file inside the work directory
pub fn db_path(work: &WorkDir, name: &str) -> PathBuf {
    work.fifo_dir().join(name)
}

/// Convenience bundle for processes that need both status areas
pub struct StatusAreas {
    pub fra: Fra,
    pub fsa: Fsa,
}

impl StatusAreas {
    /// Attach FRA then FSA (the lock order)
    pub fn attach(fifo_dir: &Path) -> Result<Self> {
        let fra = Fra::attach(&fifo_dir.join(fra::FRA_FILE))?;
        let fsa = Fsa::attach(&fifo_dir.join(fsa::FSA_FILE))?;
        Ok(Self { fra, fsa })
    }

    pub fn open_or_create(fifo_dir: &Path) -> Result<Self> {
        let fra = Fra::open_or_create(&fifo_dir.join(fra::FRA_FILE))?;
        let fsa = Fsa::open_or_create(&fifo_dir.join(fsa::FSA_FILE))?;
        Ok(Self { fra, fsa })
    }

    /// Re-map both areas if another process resized them
    pub fn refresh(&mut self) -> Result<()> {
        self.fra.refresh()?;
        self.fsa.refresh()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afd_config::testing::TestEnvironment;

    #[test]
    fn test_status_areas_in_work_dir() {
        let env = TestEnvironment::new().unwrap();
        let fifo_dir = env.layout().fifo_dir();
        assert!(matches!(
            StatusAreas::attach(&fifo_dir),
            Err(StateError::Attach { .. })
        ));

        let mut areas = StatusAreas::open_or_create(&fifo_dir).unwrap();
        areas.fsa.push(FsaRecord::new("h1", "h1.example.org", 1)).unwrap();
        areas.fra.push(FraRecord::new("d1", 1, "/in")).unwrap();
        areas.refresh().unwrap();
        drop(areas);

        let areas = StatusAreas::attach(&fifo_dir).unwrap();
        assert_eq!(areas.fsa.len(), 1);
        assert_eq!(areas.fra.len(), 1);
        assert_eq!(db_path(&env.layout(), fsa::FSA_FILE), fifo_dir.join("fsa_status"));
    }
}

//! Work-directory layout.
//!
//! ```text
//! <work>/
//! ├── etc/         afd.toml, afd.users, rename.rule
//! ├── fifo_dir/    databases, fifos, counter files, AFD_ACTIVE
//! ├── files/
//! │   ├── pool/      prepared batches waiting for the option pipeline
//! │   ├── outgoing/  transformed batches handed to FD
//! │   └── store/     files saved by `exec -s`
//! └── log/         production, delete and event logs
//! ```

use std::io;
use std::path::{Path, PathBuf};

pub const ETC_DIR: &str = "etc";
pub const FIFO_DIR: &str = "fifo_dir";
pub const FILES_DIR: &str = "files";
pub const POOL_DIR: &str = "pool";
pub const OUTGOING_DIR: &str = "outgoing";
pub const STORE_DIR: &str = "store";
pub const LOG_DIR: &str = "log";

pub const AFD_USER_FILE: &str = "afd.users";
pub const RENAME_RULE_FILE: &str = "rename.rule";

/// Resolved paths below one work directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn etc_dir(&self) -> PathBuf {
        self.root.join(ETC_DIR)
    }

    pub fn fifo_dir(&self) -> PathBuf {
        self.root.join(FIFO_DIR)
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join(FILES_DIR)
    }

    pub fn pool_dir(&self) -> PathBuf {
        self.files_dir().join(POOL_DIR)
    }

    pub fn outgoing_dir(&self) -> PathBuf {
        self.files_dir().join(OUTGOING_DIR)
    }

    pub fn store_dir(&self) -> PathBuf {
        self.files_dir().join(STORE_DIR)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join(LOG_DIR)
    }

    pub fn user_file(&self) -> PathBuf {
        self.etc_dir().join(AFD_USER_FILE)
    }

    pub fn rename_rule_file(&self) -> PathBuf {
        self.etc_dir().join(RENAME_RULE_FILE)
    }

    /// Save directory used by `exec -s` for one batch identity.
    pub fn exec_store_dir(&self, creation_time: i64, unique_number: u32, split_job_counter: u32) -> PathBuf {
        self.store_dir().join(format!(
            "{:x}_{:x}_{:x}",
            creation_time, unique_number, split_job_counter
        ))
    }

    /// Create every directory of the layout.
    pub fn ensure_layout(&self) -> io::Result<()> {
        for dir in [
            self.etc_dir(),
            self.fifo_dir(),
            self.pool_dir(),
            self.outgoing_dir(),
            self.store_dir(),
            self.log_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

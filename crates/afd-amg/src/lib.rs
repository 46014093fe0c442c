//! # afd-amg
//!
//! The Automatic Message Generator: runs the ordered list of local options
//! of a job against one batch of files.
//!
//! ## Flow
//!
//! ```text
//! files/pool/<job>/<ct>_<un>_<sjc>/   prepared batch
//!        │
//!        ▼  Pipeline::run (rename, exec, extract, assemble, convert, ...)
//!        │
//! files/outgoing/<job>/<ct>_<un>_<sjc>/ ──► MSG_FIFO (FdMessage) ──► FD
//! ```
//!
//! Options fail forward: a malformed option is logged and skipped, a
//! per-file failure is logged and the batch continues. Only `exec -D`
//! ends a batch early.

pub mod assemble;
pub mod batch;
pub mod changes;
pub mod chopper;
pub mod convert;
pub mod daemon;
pub mod exec;
pub mod extract;
pub mod formats;
pub mod naming;
pub mod options;
pub mod pipeline;
pub mod pmatch;
pub mod rename;
pub mod rules;
pub mod scheduler;
pub mod wmo;

pub use batch::Batch;
pub use naming::{change_name, create_assembled_name, CounterFile, NameContext};
pub use options::LocalOption;
pub use pipeline::{JobContext, Pipeline, PipelineOutcome};
pub use pmatch::{first_match, pmatch, Filter, MatchResult};
pub use rules::{Rule, RuleSet};
pub use scheduler::Scheduler;

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while processing a batch
#[derive(Error, Debug)]
pub enum AmgError {
    #[error("Cannot attach to {what}: {reason}")]
    Attach { what: String, reason: String },

    #[error("Version mismatch: {0}")]
    Version(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error in `{input}`: {reason}")]
    Parse { input: String, reason: String },

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Command `{command}` failed with exit code {code}")]
    ExecFailed { command: String, code: i32 },

    #[error("Command `{command}` timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("Shared state error: {0}")]
    State(afd_state::StateError),

    #[error("Fifo error: {0}")]
    Ipc(#[from] afd_ipc::IpcError),

    #[error("Log error: {0}")]
    Log(#[from] afd_log::LogError),

    #[error("Bad batch directory {0}")]
    BatchDir(PathBuf),
}

impl AmgError {
    pub fn parse(input: impl Into<String>, reason: impl Into<String>) -> Self {
        AmgError::Parse {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

impl From<afd_state::StateError> for AmgError {
    fn from(e: afd_state::StateError) -> Self {
        use afd_state::StateError;
        match e {
            StateError::Attach { path, reason } => AmgError::Attach {
                what: path.display().to_string(),
                reason,
            },
            StateError::Version {
                path,
                expected,
                found,
            } => AmgError::Version(format!(
                "{}: expected {}, found {}",
                path.display(),
                expected,
                found
            )),
            other => AmgError::State(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, AmgError>;

/// Longest file name a batch entry may carry
pub const MAX_FILENAME_LENGTH: usize = afd_state::layout::MAX_FILENAME_LENGTH;

/// Largest `-N` suffix tried when avoiding a name collision
pub const MAX_COLLISION_SUFFIX: u32 = 999;

//! # afd-ctl
//!
//! Operator side of the AFD: everything `afdctl` can do to a running
//! system.
//!
//! ```text
//!  afdctl ──► permissions (afd.users) ──► Controller
//!                                            ├── FSA / FRA  (byte-range locked updates)
//!                                            ├── fifos      (FD_DELETE, DEL_TIME_JOB, RETRY_FD, ...)
//!                                            └── EVENT_LOG  (user, action, subject)
//! ```
//!
//! Every mutation is logged as an event. Verbs the user may not run are
//! dropped with a warning and counted in the exit code.

pub mod afdcfg;
pub mod control;
pub mod heartbeat;
pub mod jobs;
pub mod passwd;
pub mod permissions;

pub use control::{Controller, Verb};
pub use heartbeat::{check_afd_heartbeat, Liveness};
pub use permissions::{get_permissions, PermissionStatus, Permissions};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CtlError {
    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Cannot attach to {what}: {reason}")]
    Attach { what: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Fifo error: {0}")]
    Ipc(#[from] afd_ipc::IpcError),

    #[error("Shared state error: {0}")]
    State(afd_state::StateError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Usage: {0}")]
    Usage(String),
}

impl From<afd_state::StateError> for CtlError {
    fn from(e: afd_state::StateError) -> Self {
        use afd_state::StateError;
        match e {
            StateError::Attach { path, reason } => CtlError::Attach {
                what: path.display().to_string(),
                reason,
            },
            StateError::Version { path, expected, found } => CtlError::Attach {
                what: path.display().to_string(),
                reason: format!("version {} found, {} expected", found, expected),
            },
            StateError::NotFound(what) => CtlError::NotFound(what),
            other => CtlError::State(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, CtlError>;

/// Printed for every verb the user may not run
pub const PERMISSION_DENIED_STR: &str = "You do not have the permission to";

/// Exit code of a fatal error
pub const INCORRECT: u8 = 255;

/// Exit code of `afdctl cfg save|recover` when the file cannot be opened
pub const CFG_FILE_ERROR: u8 = 3;

/// Name of the calling user
pub fn current_user() -> String {
    nix::unistd::User::from_uid(nix::unistd::getuid())
        .ok()
        .flatten()
        .map(|u| u.name)
        .unwrap_or_else(|| "unknown".to_string())
}

/// Exit code for `failures` failed or dropped sub-operations
pub fn exit_code(failures: usize) -> u8 {
    failures.min(254) as u8
}

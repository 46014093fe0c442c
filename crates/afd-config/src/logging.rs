//! Structured logging utilities for AFD components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//! This is the "system log"; production, delete and event records go
//! through `afd-log` instead.
//!
//! # Usage
//!
//! ```ignore
//! use afd_config::{log_amg_warn, log_ctl_info};
//!
//! log_amg_warn!("Unknown option, skipped", option = "frobnicate");
//! log_ctl_info!("Host disabled", host = "site1");
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const AMG: &'static str = "AMG";
    pub const CTL: &'static str = "CTL";
    pub const STATE: &'static str = "STATE";
    pub const IPC: &'static str = "IPC";
    pub const SINK: &'static str = "SINK";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Map a `-v` count to a level (0 = warn).
    pub fn from_verbosity(count: u8) -> Self {
        match count {
            0 => LogLevel::Warn,
            1 => LogLevel::Info,
            2 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

// === AMG logging macros ===

#[macro_export]
macro_rules! log_amg_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = $crate::logging::Component::AMG, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_amg_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = $crate::logging::Component::AMG, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_amg_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::AMG, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_amg_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::AMG, $($key = $value,)* $msg)
    };
}

// === Control plane logging macros ===

#[macro_export]
macro_rules! log_ctl_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = $crate::logging::Component::CTL, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_ctl_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::CTL, $($key = $value,)* $msg)
    };
}

// === Shared state logging macros ===

#[macro_export]
macro_rules! log_state_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::STATE, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_state_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = $crate::logging::Component::STATE, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_state_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::STATE, $($key = $value,)* $msg)
    };
}

// === IPC logging macros ===

#[macro_export]
macro_rules! log_ipc_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = $crate::logging::Component::IPC, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_ipc_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::IPC, $($key = $value,)* $msg)
    };
}

// === Log sink macros ===

#[macro_export]
macro_rules! log_sink_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = $crate::logging::Component::SINK, $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup. `AFD_LOG` wins over `RUST_LOG`.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let filter = match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let env_filter = EnvFilter::try_from_env("AFD_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

//! Log record types.
//!
//! Each record renders to one `|`-separated line. Numeric identities
//! (times, job and directory ids, sizes) are lowercase hex, matching the
//! way the AFD names its batch directories.

use std::fmt;

/// A record that can be written to a log sink
pub trait LogRecord: Clone + Send + Sync + 'static {
    /// Name of the log this record belongs to
    const LOG_NAME: &'static str;

    /// One line, without the trailing newline
    fn to_line(&self) -> String;
}

/// Current Unix time in seconds
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// `<creation_time>_<unique_number>_<split_job_counter>` in hex
pub fn batch_id(creation_time: i64, unique_number: u32, split_job_counter: u32) -> String {
    format!("{:x}_{:x}_{:x}", creation_time, unique_number, split_job_counter)
}

// ---------------------------------------------------------------------------
// Production log
// ---------------------------------------------------------------------------

/// One transformation of one file by one option
#[derive(Debug, Clone, PartialEq)]
pub struct ProductionRecord {
    pub creation_time: i64,
    pub in_count: u32,
    pub out_count: u32,
    pub unique_number: u32,
    pub split_job_counter: u32,
    pub job_id: u32,
    pub dir_id: u32,
    pub wall_seconds: f64,
    pub cpu_sec: i64,
    pub cpu_usec: i64,
    pub in_name: String,
    pub in_size: i64,
    pub out_name: String,
    pub out_size: i64,
    pub return_code: i32,
    pub option: String,
}

impl LogRecord for ProductionRecord {
    const LOG_NAME: &'static str = "PRODUCTION_LOG";

    fn to_line(&self) -> String {
        format!(
            "{:x}|{:x}|{:x}|{:x}|{:x}|{:x}|{:x}|{:.3}|{:x}.{:06}|{}|{:x}|{}|{:x}|{}|{}",
            self.creation_time,
            self.in_count,
            self.out_count,
            self.unique_number,
            self.split_job_counter,
            self.job_id,
            self.dir_id,
            self.wall_seconds,
            self.cpu_sec,
            self.cpu_usec,
            self.in_name,
            self.in_size,
            self.out_name,
            self.out_size,
            self.return_code,
            self.option
        )
    }
}

// ---------------------------------------------------------------------------
// Delete log
// ---------------------------------------------------------------------------

/// Why a file was removed from a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeleteReason {
    ExecFailedDel = 1,
    ExecFailedStored = 2,
    RenameOverwrite = 3,
    ConversionFailed = 4,
    DelTimeJob = 5,
}

impl DeleteReason {
    pub fn name(self) -> &'static str {
        match self {
            DeleteReason::ExecFailedDel => "EXEC_FAILED_DEL",
            DeleteReason::ExecFailedStored => "EXEC_FAILED_STORED",
            DeleteReason::RenameOverwrite => "RENAME_OVERWRITE",
            DeleteReason::ConversionFailed => "CONVERSION_FAILED",
            DeleteReason::DelTimeJob => "DEL_TIME_JOB",
        }
    }
}

impl fmt::Display for DeleteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRecord {
    pub time: i64,
    pub reason: DeleteReason,
    pub host_alias: String,
    pub file_name: String,
    pub file_size: i64,
    pub job_id: u32,
    pub dir_id: u32,
    pub creation_time: i64,
    pub unique_number: u32,
    pub split_job_counter: u32,
    /// Process that removed the file
    pub origin: &'static str,
    /// Free text (exec command, rename target, ...)
    pub info: String,
}

impl LogRecord for DeleteRecord {
    const LOG_NAME: &'static str = "DELETE_LOG";

    fn to_line(&self) -> String {
        format!(
            "{:x}|{}|{}|{}|{:x}|{:x}|{:x}|{}|{}|{}",
            self.time,
            self.host_alias,
            self.reason,
            self.file_name,
            self.file_size,
            self.job_id,
            self.dir_id,
            batch_id(self.creation_time, self.unique_number, self.split_job_counter),
            self.origin,
            self.info
        )
    }
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

/// What kind of object an event concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    Glob,
    Dir,
    Host,
}

impl EventClass {
    pub fn name(self) -> &'static str {
        match self {
            EventClass::Glob => "EC_GLOB",
            EventClass::Dir => "EC_DIR",
            EventClass::Host => "EC_HOST",
        }
    }
}

/// Who caused an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Auto,
    Manual,
    External,
}

impl EventType {
    pub fn name(self) -> &'static str {
        match self {
            EventType::Auto => "ET_AUTO",
            EventType::Manual => "ET_MAN",
            EventType::External => "ET_EXT",
        }
    }
}

macro_rules! event_actions {
    ($($variant:ident = $code:literal => $name:literal,)*) => {
        /// Control-plane action recorded in the event log
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u16)]
        pub enum EventAction {
            $($variant = $code,)*
        }

        impl EventAction {
            pub fn name(self) -> &'static str {
                match self {
                    $(EventAction::$variant => $name,)*
                }
            }

            pub fn from_code(code: u16) -> Option<Self> {
                match code {
                    $($code => Some(EventAction::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

event_actions! {
    EnableHost = 1 => "EA_ENABLE_HOST",
    DisableHost = 2 => "EA_DISABLE_HOST",
    SwitchHost = 3 => "EA_SWITCH_HOST",
    RetryHost = 4 => "EA_RETRY_HOST",
    StartTransfer = 5 => "EA_START_TRANSFER",
    StopTransfer = 6 => "EA_STOP_TRANSFER",
    StartQueue = 7 => "EA_START_QUEUE",
    StopQueue = 8 => "EA_STOP_QUEUE",
    EnableDirectory = 9 => "EA_ENABLE_DIRECTORY",
    DisableDirectory = 10 => "EA_DISABLE_DIRECTORY",
    StartDirectory = 11 => "EA_START_DIRECTORY",
    StopDirectory = 12 => "EA_STOP_DIRECTORY",
    RescanDirectory = 13 => "EA_RESCAN_DIRECTORY",
    FdStart = 14 => "EA_FD_START",
    FdStop = 15 => "EA_FD_STOP",
    AmgStart = 16 => "EA_AMG_START",
    AmgStop = 17 => "EA_AMG_STOP",
    EnableArchive = 18 => "EA_ENABLE_ARCHIVE",
    DisableArchive = 19 => "EA_DISABLE_ARCHIVE",
    ChangeRealHostname = 20 => "EA_CHANGE_REAL_HOSTNAME",
    ModifyErrorsOffline = 21 => "EA_MODIFY_ERRORS_OFFLINE",
    EnableRetrieve = 22 => "EA_ENABLE_RETRIEVE",
    DisableRetrieve = 23 => "EA_DISABLE_RETRIEVE",
    EnableHostWarnTime = 24 => "EA_ENABLE_HOST_WARN_TIME",
    DisableHostWarnTime = 25 => "EA_DISABLE_HOST_WARN_TIME",
    EnableCreateSourceDir = 26 => "EA_ENABLE_CREATE_SOURCE_DIR",
    DisableCreateSourceDir = 27 => "EA_DISABLE_CREATE_SOURCE_DIR",
    EnableCreateTargetDir = 28 => "EA_ENABLE_CREATE_TARGET_DIR",
    DisableCreateTargetDir = 29 => "EA_DISABLE_CREATE_TARGET_DIR",
    EnableSimulateSendMode = 30 => "EA_ENABLE_SIMULATE_SEND_MODE",
    DisableSimulateSendMode = 31 => "EA_DISABLE_SIMULATE_SEND_MODE",
    EnableDirWarnTime = 32 => "EA_ENABLE_DIR_WARN_TIME",
    DisableDirWarnTime = 33 => "EA_DISABLE_DIR_WARN_TIME",
    EnableDebugHost = 34 => "EA_ENABLE_DEBUG_HOST",
    EnableTraceHost = 35 => "EA_ENABLE_TRACE_HOST",
    EnableFullTraceHost = 36 => "EA_ENABLE_FULL_TRACE_HOST",
    DisableDebugHost = 37 => "EA_DISABLE_DEBUG_HOST",
    SetPassword = 38 => "EA_SET_PASSWORD",
    Shutdown = 39 => "EA_SHUTDOWN",
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub time: i64,
    pub class: EventClass,
    pub event_type: EventType,
    pub action: EventAction,
    /// Host or directory alias; empty for global events
    pub subject: String,
    pub user: String,
    pub info: String,
}

impl EventRecord {
    pub fn new(
        class: EventClass,
        event_type: EventType,
        action: EventAction,
        subject: &str,
        user: &str,
    ) -> Self {
        Self {
            time: now(),
            class,
            event_type,
            action,
            subject: subject.to_string(),
            user: user.to_string(),
            info: String::new(),
        }
    }

    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }
}

impl LogRecord for EventRecord {
    const LOG_NAME: &'static str = "EVENT_LOG";

    fn to_line(&self) -> String {
        format!(
            "{:x}|{}|{}|{}|{}|{}|{}",
            self.time,
            self.class.name(),
            self.event_type.name(),
            self.action.name(),
            self.subject,
            self.user,
            self.info
        )
    }
}

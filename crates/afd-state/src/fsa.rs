//! Filetransfer-Status Area: one record per destination host.

use std::mem::offset_of;
use std::ops::{Deref, DerefMut};
use std::path::Path;

use afd_config::log_state_debug;

use crate::layout::{
    cstr, set_cstr, CURRENT_FSA_VERSION, MAX_FILENAME_LENGTH, MAX_HOSTNAME_LENGTH,
    MAX_MSG_NAME_LENGTH, MAX_NO_PARALLEL_JOBS, MAX_REAL_HOSTNAME_LENGTH, MAX_TOGGLE_STR_LENGTH,
};
use crate::mapped::{Database, Record};
use crate::{Result, StateError};

pub const FSA_FILE: &str = "fsa_status";
pub const FSA_STEP_SIZE: usize = 4;

// host_status bits
pub const PAUSE_QUEUE_STAT: u32 = 1;
pub const AUTO_PAUSE_QUEUE_STAT: u32 = 2;
pub const STOP_TRANSFER_STAT: u32 = 4;
pub const HOST_ERROR_OFFLINE: u32 = 8;
pub const HOST_ERROR_ACKNOWLEDGED: u32 = 16;
pub const HOST_WARN_TIME_REACHED: u32 = 32;

// special_flag bits
pub const HOST_DISABLED: u32 = 32;
pub const HOST_IN_DIR_CONFIG: u32 = 64;

pub const HOST_ONE: u8 = 1;
pub const HOST_TWO: u8 = 2;
pub const DEFAULT_TOGGLE_HOST: u8 = HOST_ONE;

/// Per-slot state of one transfer worker
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct JobStatus {
    pub proc_id: i32,
    pub job_id: u32,
    pub no_of_files: i32,
    pub no_of_files_done: i32,
    pub file_size: i64,
    pub file_size_done: i64,
    pub connect_status: u8,
    pub unique_name: [u8; MAX_MSG_NAME_LENGTH],
    pub file_name_in_use: [u8; MAX_FILENAME_LENGTH],
}

/// One FSA entry
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FsaRecord {
    pub host_alias: [u8; MAX_HOSTNAME_LENGTH + 1],
    pub real_hostname: [[u8; MAX_REAL_HOSTNAME_LENGTH]; 2],
    pub host_dsp_name: [u8; MAX_HOSTNAME_LENGTH + 2],
    pub host_toggle_str: [u8; MAX_TOGGLE_STR_LENGTH],
    pub toggle_pos: u8,
    pub original_toggle_pos: u8,
    pub host_toggle: u8,
    pub auto_toggle: u8,
    pub debug: u8,
    pub protocol: u32,
    pub host_id: u32,
    pub host_status: u32,
    pub special_flag: u32,
    pub allowed_transfers: i32,
    pub active_transfers: i32,
    pub max_errors: i32,
    pub error_counter: i32,
    pub total_file_counter: i32,
    pub total_file_size: i64,
    pub file_counter_done: u32,
    pub bytes_send: u64,
    pub last_connection: i64,
    pub job_status: [JobStatus; MAX_NO_PARALLEL_JOBS],
}

unsafe impl Record for FsaRecord {
    const NAME: &'static str = "FSA";
    const VERSION: u8 = CURRENT_FSA_VERSION;
    const STEP_SIZE: usize = FSA_STEP_SIZE;
}

/// Lock byte for `host_status` and `special_flag`
pub const LOCK_HS: usize = offset_of!(FsaRecord, host_status);
/// Lock byte for `error_counter`
pub const LOCK_EC: usize = offset_of!(FsaRecord, error_counter);
/// Lock byte for `total_file_counter` / `total_file_size`
pub const LOCK_TFC: usize = offset_of!(FsaRecord, total_file_counter);
/// Lock byte for transfer slot bookkeeping
pub const LOCK_CON: usize = offset_of!(FsaRecord, active_transfers);

/// Host debug level, cycled by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DebugMode {
    Normal = 0,
    Debug = 1,
    Trace = 2,
    FullTrace = 3,
}

impl DebugMode {
    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => DebugMode::Debug,
            2 => DebugMode::Trace,
            3 => DebugMode::FullTrace,
            _ => DebugMode::Normal,
        }
    }

    /// NORMAL → DEBUG → TRACE → FULL_TRACE → NORMAL
    pub fn next(self) -> Self {
        match self {
            DebugMode::Normal => DebugMode::Debug,
            DebugMode::Debug => DebugMode::Trace,
            DebugMode::Trace => DebugMode::FullTrace,
            DebugMode::FullTrace => DebugMode::Normal,
        }
    }
}

impl FsaRecord {
    /// A fresh host entry with one real hostname and `allowed` slots
    pub fn new(host_alias: &str, real_hostname: &str, allowed: i32) -> Self {
        let mut rec = Self::zeroed();
        set_cstr(&mut rec.host_alias, host_alias);
        set_cstr(&mut rec.real_hostname[0], real_hostname);
        rec.host_toggle = DEFAULT_TOGGLE_HOST;
        rec.allowed_transfers = allowed.clamp(0, MAX_NO_PARALLEL_JOBS as i32);
        rec.max_errors = 10;
        rec.refresh_dsp_name();
        rec
    }

    pub fn host_alias(&self) -> String {
        cstr(&self.host_alias).into_owned()
    }

    pub fn real_hostname(&self, index: usize) -> String {
        cstr(&self.real_hostname[index.min(1)]).into_owned()
    }

    pub fn host_dsp_name(&self) -> String {
        cstr(&self.host_dsp_name).into_owned()
    }

    /// Hostname currently selected by the toggle
    pub fn active_hostname(&self) -> String {
        let index = if self.host_toggle == HOST_TWO { 1 } else { 0 };
        self.real_hostname(index)
    }

    pub fn has_toggle(&self) -> bool {
        self.host_toggle_str[0] != 0
    }

    pub fn is_disabled(&self) -> bool {
        self.special_flag & HOST_DISABLED != 0
    }

    /// Configure a two-host toggle such as `[12]`
    pub fn set_toggle(&mut self, toggle_str: &str, second_hostname: &str) {
        set_cstr(&mut self.host_toggle_str, toggle_str);
        set_cstr(&mut self.real_hostname[1], second_hostname);
        self.toggle_pos = self.host_alias.iter().position(|&b| b == 0).unwrap_or(0) as u8;
        self.original_toggle_pos = self.toggle_pos;
        self.refresh_dsp_name();
    }

    /// Display name: alias plus the toggle character of the active host
    pub fn refresh_dsp_name(&mut self) {
        let alias = self.host_alias();
        set_cstr(&mut self.host_dsp_name, &alias);
        if self.has_toggle() {
            let pos = self.toggle_pos as usize;
            let ch = self.host_toggle_str[self.host_toggle as usize % MAX_TOGGLE_STR_LENGTH];
            if pos < self.host_dsp_name.len() - 1 {
                self.host_dsp_name[pos] = ch;
                self.host_dsp_name[pos + 1] = 0;
            }
        }
    }
}

/// The Filetransfer-Status Area
pub struct Fsa(Database<FsaRecord>);

impl Deref for Fsa {
    type Target = Database<FsaRecord>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Fsa {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Fsa {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self(Database::create(path)?))
    }

    pub fn attach(path: &Path) -> Result<Self> {
        Ok(Self(Database::attach(path)?))
    }

    pub fn open_or_create(path: &Path) -> Result<Self> {
        Ok(Self(Database::open_or_create(path)?))
    }

    /// Position of a host alias
    pub fn position(&mut self, host_alias: &str) -> Option<usize> {
        self.records()
            .iter()
            .position(|r| cstr(&r.host_alias) == host_alias)
    }

    pub fn require(&mut self, host_alias: &str) -> Result<usize> {
        self.position(host_alias)
            .ok_or_else(|| StateError::NotFound(format!("host {}", host_alias)))
    }

    /// XOR bits into `host_status` under `LOCK_HS`; returns the new value
    pub fn toggle_host_status(&mut self, pos: usize, bits: u32) -> Result<u32> {
        self.update(pos, LOCK_HS, |r| {
            r.host_status ^= bits;
            r.host_status
        })
    }

    /// XOR bits into `special_flag` under `LOCK_HS`; returns the new value
    pub fn toggle_special_flag(&mut self, pos: usize, bits: u32) -> Result<u32> {
        self.update(pos, LOCK_HS, |r| {
            r.special_flag ^= bits;
            r.special_flag
        })
    }

    /// Flip `host_toggle` between the two real hostnames.
    ///
    /// Returns the new toggle, or `None` when the host has no toggle.
    pub fn switch_host(&mut self, pos: usize) -> Result<Option<u8>> {
        self.update(pos, LOCK_HS, |r| {
            if !r.has_toggle() {
                return None;
            }
            r.host_toggle = if r.host_toggle == HOST_ONE {
                HOST_TWO
            } else {
                HOST_ONE
            };
            r.refresh_dsp_name();
            Some(r.host_toggle)
        })
    }

    /// Advance the debug level one step
    pub fn cycle_debug(&mut self, pos: usize) -> Result<DebugMode> {
        self.update(pos, LOCK_HS, |r| {
            let next = DebugMode::from_byte(r.debug).next();
            r.debug = next as u8;
            next
        })
    }

    /// Replace `real_hostname[index]`; false when the name was truncated
    pub fn set_real_hostname(&mut self, pos: usize, index: usize, name: &str) -> Result<bool> {
        if index > 1 {
            return Err(StateError::NotFound(format!("real hostname index {}", index)));
        }
        self.update(pos, LOCK_HS, |r| set_cstr(&mut r.real_hostname[index], name))
    }

    /// Claim a free transfer slot for `pid`.
    ///
    /// Returns `None` once `active_transfers` has reached `allowed_transfers`.
    pub fn claim_slot(&mut self, pos: usize, pid: i32, job_id: u32) -> Result<Option<usize>> {
        self.update(pos, LOCK_CON, |r| {
            if r.active_transfers >= r.allowed_transfers {
                return None;
            }
            let limit = (r.allowed_transfers as usize).min(MAX_NO_PARALLEL_JOBS);
            let slot = r.job_status[..limit].iter().position(|j| j.proc_id <= 0)?;
            r.job_status[slot].proc_id = pid;
            r.job_status[slot].job_id = job_id;
            r.active_transfers += 1;
            Some(slot)
        })
    }

    /// Give a transfer slot back
    pub fn release_slot(&mut self, pos: usize, slot: usize) -> Result<()> {
        if slot >= MAX_NO_PARALLEL_JOBS {
            return Err(StateError::NotFound(format!("job slot {}", slot)));
        }
        self.update(pos, LOCK_CON, |r| {
            if r.job_status[slot].proc_id > 0 {
                r.job_status[slot].proc_id = -1;
                r.job_status[slot].job_id = 0;
                r.active_transfers = (r.active_transfers - 1).max(0);
            }
        })
    }

    /// Worker pids currently owning transfer slots
    pub fn active_pids(&mut self, pos: usize) -> Result<Vec<i32>> {
        let rec = self.get(pos)?;
        Ok(rec
            .job_status
            .iter()
            .map(|j| j.proc_id)
            .filter(|&p| p > 0)
            .collect())
    }

    pub fn first_errors_offline(&self) -> u8 {
        self.header().first_errors_offline
    }

    pub fn set_first_errors_offline(&mut self, value: u8) -> Result<()> {
        let _lock = crate::lock::RecordLock::acquire(
            self.raw_fd(),
            crate::layout::AFD_FEATURE_FLAG_OFFSET_END as i64,
        )?;
        self.header_mut().first_errors_offline = value;
        log_state_debug!("Set first_errors_offline", value = value);
        Ok(())
    }
}

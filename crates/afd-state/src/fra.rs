//! Fileretrieve-Status Area: one record per scanned directory.

use std::mem::offset_of;
use std::ops::{Deref, DerefMut};
use std::path::Path;

use crate::layout::{
    cstr, set_cstr, CURRENT_FRA_VERSION, MAX_DIR_ALIAS_LENGTH, MAX_FRA_TIME_ENTRIES,
    MAX_HOSTNAME_LENGTH, MAX_RECIPIENT_LENGTH,
};
use crate::lock::{record_lock_offset, RecordLock};
use crate::mapped::{Database, Record};
use crate::{Result, StateError};

pub const FRA_FILE: &str = "fra_status";
pub const FRA_STEP_SIZE: usize = 8;

// dir_flag bits
pub const DIR_DISABLED: u32 = 1;
pub const DIR_STOPPED: u32 = 2;
pub const WARN_TIME_REACHED: u32 = 4;
pub const MAX_COPIED: u32 = 8;
pub const FILES_IN_QUEUE: u32 = 16;
pub const INFO_TIME_REACHED: u32 = 32;

/// One crontab-like timing template.
///
/// Each field is a bitmask: minute bits 0..59, hour bits 0..23, day of
/// month bits 1..31, month bits 0..11, day of week bits 0..6 (Sunday 0).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeEntry {
    pub minute: u64,
    pub hour: u32,
    pub day_of_month: u32,
    pub month: u16,
    pub day_of_week: u8,
    pub _pad: [u8; 5],
}

impl TimeEntry {
    /// Every minute of every day
    pub fn always() -> Self {
        Self {
            minute: (1u64 << 60) - 1,
            hour: (1u32 << 24) - 1,
            day_of_month: !1u32,
            month: (1u16 << 12) - 1,
            day_of_week: (1u8 << 7) - 1,
            _pad: [0; 5],
        }
    }

    pub fn matches(&self, minute: u32, hour: u32, day_of_month: u32, month0: u32, weekday: u32) -> bool {
        minute < 60
            && hour < 24
            && (1..=31).contains(&day_of_month)
            && month0 < 12
            && weekday < 7
            && self.minute & (1 << minute) != 0
            && self.hour & (1 << hour) != 0
            && self.day_of_month & (1 << day_of_month) != 0
            && self.month & (1 << month0) != 0
            && self.day_of_week & (1 << weekday) != 0
    }
}

/// One FRA entry
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FraRecord {
    pub dir_alias: [u8; MAX_DIR_ALIAS_LENGTH + 1],
    pub host_alias: [u8; MAX_HOSTNAME_LENGTH + 1],
    pub url: [u8; MAX_RECIPIENT_LENGTH],
    pub priority: u8,
    pub no_of_time_entries: u8,
    pub exec_lock: u8,
    pub dir_id: u32,
    pub dir_flag: u32,
    pub in_dc_flag: u32,
    pub files_in_dir: i32,
    pub files_queued: i32,
    pub next_check_time: i64,
    pub last_retrieval: i64,
    pub warn_time: i64,
    pub info_time: i64,
    pub bytes_in_dir: i64,
    pub te: [TimeEntry; MAX_FRA_TIME_ENTRIES],
}

unsafe impl Record for FraRecord {
    const NAME: &'static str = "FRA";
    const VERSION: u8 = CURRENT_FRA_VERSION;
    const STEP_SIZE: usize = FRA_STEP_SIZE;
}

/// Lock byte for `dir_flag`
pub const LOCK_DIR_FLAG: usize = offset_of!(FraRecord, dir_flag);
/// Lock byte serializing exec options of one directory
pub const LOCK_EXEC: usize = offset_of!(FraRecord, exec_lock);

impl FraRecord {
    pub fn new(dir_alias: &str, dir_id: u32, url: &str) -> Self {
        let mut rec = Self::zeroed();
        set_cstr(&mut rec.dir_alias, dir_alias);
        set_cstr(&mut rec.url, url);
        rec.dir_id = dir_id;
        rec.priority = b'9';
        rec
    }

    /// A retrieve directory bound to a remote host
    pub fn remote(dir_alias: &str, dir_id: u32, url: &str, host_alias: &str) -> Self {
        let mut rec = Self::new(dir_alias, dir_id, url);
        set_cstr(&mut rec.host_alias, host_alias);
        rec
    }

    pub fn dir_alias(&self) -> String {
        cstr(&self.dir_alias).into_owned()
    }

    pub fn host_alias(&self) -> String {
        cstr(&self.host_alias).into_owned()
    }

    pub fn url(&self) -> String {
        cstr(&self.url).into_owned()
    }

    /// True for directories fetched from a remote host
    pub fn is_remote(&self) -> bool {
        self.host_alias[0] != 0
    }

    pub fn time_entries(&self) -> &[TimeEntry] {
        let n = (self.no_of_time_entries as usize).min(MAX_FRA_TIME_ENTRIES);
        &self.te[..n]
    }
}

/// The Fileretrieve-Status Area
pub struct Fra(Database<FraRecord>);

impl Deref for Fra {
    type Target = Database<FraRecord>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Fra {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Fra {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self(Database::create(path)?))
    }

    pub fn attach(path: &Path) -> Result<Self> {
        Ok(Self(Database::attach(path)?))
    }

    pub fn open_or_create(path: &Path) -> Result<Self> {
        Ok(Self(Database::open_or_create(path)?))
    }

    pub fn position(&mut self, dir_alias: &str) -> Option<usize> {
        self.records()
            .iter()
            .position(|r| cstr(&r.dir_alias) == dir_alias)
    }

    pub fn require(&mut self, dir_alias: &str) -> Result<usize> {
        self.position(dir_alias)
            .ok_or_else(|| StateError::NotFound(format!("directory {}", dir_alias)))
    }

    pub fn position_by_id(&mut self, dir_id: u32) -> Option<usize> {
        self.records().iter().position(|r| r.dir_id == dir_id)
    }

    /// XOR bits into `dir_flag`; returns the new value
    pub fn toggle_dir_flag(&mut self, pos: usize, bits: u32) -> Result<u32> {
        self.update(pos, LOCK_DIR_FLAG, |r| {
            r.dir_flag ^= bits;
            r.dir_flag
        })
    }

    pub fn set_next_check_time(&mut self, pos: usize, when: i64) -> Result<()> {
        self.update(pos, LOCK_DIR_FLAG, |r| r.next_check_time = when)
    }

    pub fn set_last_retrieval(&mut self, pos: usize, when: i64) -> Result<()> {
        self.update(pos, LOCK_DIR_FLAG, |r| r.last_retrieval = when)
    }

    /// Serialize exec options of one directory; held for one exec call
    pub fn lock_exec(&mut self, pos: usize) -> Result<RecordLock> {
        self.get(pos)?;
        RecordLock::acquire(
            self.raw_fd(),
            record_lock_offset(pos, Database::<FraRecord>::RECORD_SIZE, LOCK_EXEC),
        )
    }
}

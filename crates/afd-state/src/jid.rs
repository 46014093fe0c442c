//! Job-ID Data: content-addressed job identities.
//!
//! A job is the tuple (dir_id, file_mask_id, loptions, soptions, recipient,
//! priority, host_alias). Its `job_id` is a CRC-32 over that tuple; on a
//! collision with a different tuple the hash is salted and recomputed.

use std::collections::HashSet;
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::Path;

use afd_config::{log_state_debug, log_state_info};

use crate::layout::{
    cstr, set_cstr, set_nul_list, split_nul_list, CURRENT_JID_VERSION, MAX_HOSTNAME_LENGTH,
    MAX_OPTION_LENGTH, MAX_RECIPIENT_LENGTH,
};
use crate::mapped::{Database, Record};
use crate::{Result, StateError};

pub const JOB_ID_DATA_FILE: &str = "job_id_data";
pub const CURRENT_MSG_LIST_FILE: &str = "current_job_id_list";
pub const JOB_ID_DATA_STEP_SIZE: usize = 16;

/// One JID entry
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct JobIdData {
    pub creation_time: i64,
    pub job_id: u32,
    pub dir_id: u32,
    pub file_mask_id: u32,
    pub dir_config_id: u32,
    pub host_id: u32,
    pub dir_id_pos: i32,
    pub no_of_loptions: i32,
    pub no_of_soptions: i32,
    pub priority: u8,
    pub host_alias: [u8; MAX_HOSTNAME_LENGTH + 1],
    pub recipient: [u8; MAX_RECIPIENT_LENGTH],
    pub loptions: [u8; MAX_OPTION_LENGTH],
    pub soptions: [u8; MAX_OPTION_LENGTH],
}

unsafe impl Record for JobIdData {
    const NAME: &'static str = "JID";
    const VERSION: u8 = CURRENT_JID_VERSION;
    const STEP_SIZE: usize = JOB_ID_DATA_STEP_SIZE;
}

/// Owned description of a job, as produced by a DIR_CONFIG parse
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobSpec {
    pub dir_id: u32,
    pub dir_id_pos: i32,
    pub file_mask_id: u32,
    pub dir_config_id: u32,
    pub host_alias: String,
    pub host_id: u32,
    pub recipient: String,
    pub loptions: Vec<String>,
    pub soptions: Vec<String>,
    pub priority: u8,
}

impl JobSpec {
    /// Bytes hashed into the job id
    fn fingerprint(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(512);
        out.extend_from_slice(&self.dir_id.to_le_bytes());
        out.extend_from_slice(&self.file_mask_id.to_le_bytes());
        for opt in &self.loptions {
            out.extend_from_slice(opt.as_bytes());
            out.push(0);
        }
        out.push(0xff);
        out.extend_from_slice(self.soptions.join("\n").as_bytes());
        out.push(0xff);
        out.extend_from_slice(self.recipient.as_bytes());
        out.push(self.priority);
        out.extend_from_slice(self.host_alias.as_bytes());
        out
    }

    /// Job id before any collision salting
    pub fn job_id(&self) -> u32 {
        crc32fast::hash(&self.fingerprint())
    }
}

impl JobIdData {
    pub fn host_alias(&self) -> String {
        cstr(&self.host_alias).into_owned()
    }

    pub fn recipient(&self) -> String {
        cstr(&self.recipient).into_owned()
    }

    pub fn loptions(&self) -> Vec<String> {
        split_nul_list(&self.loptions, self.no_of_loptions.max(0) as usize)
    }

    pub fn soptions(&self) -> Vec<String> {
        if self.no_of_soptions <= 0 {
            return Vec::new();
        }
        cstr(&self.soptions)
            .split('\n')
            .take(self.no_of_soptions as usize)
            .map(str::to_string)
            .collect()
    }

    pub fn to_spec(&self) -> JobSpec {
        JobSpec {
            dir_id: self.dir_id,
            dir_id_pos: self.dir_id_pos,
            file_mask_id: self.file_mask_id,
            dir_config_id: self.dir_config_id,
            host_alias: self.host_alias(),
            host_id: self.host_id,
            recipient: self.recipient(),
            loptions: self.loptions(),
            soptions: self.soptions(),
            priority: self.priority,
        }
    }

    fn from_spec(spec: &JobSpec, job_id: u32, creation_time: i64) -> Result<Self> {
        let mut rec = Self::zeroed();
        rec.creation_time = creation_time;
        rec.job_id = job_id;
        rec.dir_id = spec.dir_id;
        rec.dir_id_pos = spec.dir_id_pos;
        rec.file_mask_id = spec.file_mask_id;
        rec.dir_config_id = spec.dir_config_id;
        rec.host_id = spec.host_id;
        rec.priority = spec.priority;
        rec.no_of_loptions = spec.loptions.len() as i32;
        rec.no_of_soptions = spec.soptions.len() as i32;
        let fits = set_cstr(&mut rec.host_alias, &spec.host_alias)
            && set_cstr(&mut rec.recipient, &spec.recipient)
            && set_nul_list(&mut rec.loptions, &spec.loptions)
            && set_cstr(&mut rec.soptions, &spec.soptions.join("\n"));
        if !fits {
            return Err(StateError::Full(format!(
                "job for {} does not fit a JID record",
                spec.host_alias
            )));
        }
        Ok(rec)
    }

    fn same_tuple(&self, spec: &JobSpec) -> bool {
        let mine = self.to_spec();
        mine.dir_id == spec.dir_id
            && mine.file_mask_id == spec.file_mask_id
            && mine.loptions == spec.loptions
            && mine.soptions == spec.soptions
            && mine.recipient == spec.recipient
            && mine.priority == spec.priority
            && mine.host_alias == spec.host_alias
    }
}

/// True when two jobs carry the same option set.
///
/// The host alias counts as part of the option set.
pub fn same_options(a: &JobIdData, b: &JobIdData) -> bool {
    a.no_of_loptions == b.no_of_loptions
        && a.no_of_soptions == b.no_of_soptions
        && a.loptions() == b.loptions()
        && a.soptions() == b.soptions()
        && cstr(&a.host_alias) == cstr(&b.host_alias)
}

/// The Job-ID Data database
pub struct Jid(Database<JobIdData>);

impl Deref for Jid {
    type Target = Database<JobIdData>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Jid {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Jid {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self(Database::create(path)?))
    }

    pub fn attach(path: &Path) -> Result<Self> {
        Ok(Self(Database::attach(path)?))
    }

    pub fn open_or_create(path: &Path) -> Result<Self> {
        Ok(Self(Database::open_or_create(path)?))
    }

    pub fn position(&mut self, job_id: u32) -> Option<usize> {
        self.records().iter().position(|r| r.job_id == job_id)
    }

    pub fn lookup(&mut self, job_id: u32) -> Option<&JobIdData> {
        self.records().iter().find(|r| r.job_id == job_id)
    }

    /// Insert a job unless an entry with the same tuple already exists.
    ///
    /// Returns the job id and whether a new entry was written.
    pub fn insert(&mut self, spec: &JobSpec, creation_time: i64) -> Result<(u32, bool)> {
        let mut id = spec.job_id();
        loop {
            match self.lookup(id) {
                Some(existing) if existing.same_tuple(spec) => return Ok((id, false)),
                Some(_) => {
                    let mut salted = spec.fingerprint();
                    salted.extend_from_slice(&id.to_le_bytes());
                    let next = crc32fast::hash(&salted);
                    log_state_debug!("JID hash collision", job_id = id, next = next);
                    id = next;
                }
                None => break,
            }
        }
        let rec = JobIdData::from_spec(spec, id, creation_time)?;
        self.push(rec)?;
        Ok((id, true))
    }

    /// Drop every entry not named in `current`; returns how many went
    pub fn reclaim(&mut self, current: &[u32]) -> usize {
        let keep: HashSet<u32> = current.iter().copied().collect();
        let removed = self.retain(|r| keep.contains(&r.job_id));
        if removed > 0 {
            log_state_info!("Reclaimed unreferenced JID entries", removed = removed, remaining = self.len());
        }
        removed
    }

    /// Positions of every job sharing the option set of `job_id`
    pub fn sharing_options(&mut self, job_id: u32) -> Vec<usize> {
        let Some(base) = self.lookup(job_id) else {
            return Vec::new();
        };
        let base = *base;
        self.records()
            .iter()
            .enumerate()
            .filter(|(_, r)| same_options(&base, r))
            .map(|(i, _)| i)
            .collect()
    }
}

/// Write the current-JID list: an i32 count followed by the ids
pub fn write_current_list(path: &Path, ids: &[u32]) -> Result<()> {
    let mut out = Vec::with_capacity(4 + ids.len() * 4);
    out.extend_from_slice(&(ids.len() as i32).to_ne_bytes());
    for id in ids {
        out.extend_from_slice(&id.to_ne_bytes());
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &out)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_current_list(path: &Path) -> Result<Vec<u32>> {
    let bytes = fs::read(path)?;
    if bytes.len() < 4 {
        return Err(StateError::Corrupt(format!("{} has no count", path.display())));
    }
    let count = i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let count = usize::try_from(count)
        .map_err(|_| StateError::Corrupt(format!("{}: negative count", path.display())))?;
    if bytes.len() < 4 + count * 4 {
        return Err(StateError::Corrupt(format!(
            "{}: count {} but only {} bytes",
            path.display(),
            count,
            bytes.len()
        )));
    }
    Ok(bytes[4..4 + count * 4]
        .chunks_exact(4)
        .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

//! File-Mask Database: content-addressed filter sets.
//!
//! Entries are variable length and packed back to back after the header:
//! ```text
//! offset  field               size
//!  0      filter_count         4
//!  4      total_byte_length    4   (length of the masks block)
//!  8      file_mask_id         4
//! 12      unused               1
//! 13      masks                total_byte_length (NUL-terminated filters)
//!  ..     trailing byte        1
//! ```

use std::path::Path;

use afd_config::log_state_debug;

use crate::layout::CURRENT_FMD_VERSION;
use crate::mapped::MappedFile;
use crate::{Result, StateError};

pub const FILE_MASK_FILE: &str = "file_mask_data";
pub const FMD_STEP_SIZE: usize = 4096;

const ENTRY_FIXED: usize = 13;

/// One decoded mask set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMaskEntry {
    pub file_mask_id: u32,
    pub masks: Vec<String>,
}

/// Content id of a filter set
pub fn file_mask_id(masks: &[String]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for m in masks {
        hasher.update(m.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize()
}

fn read_i32(buf: &[u8], at: usize) -> i32 {
    i32::from_ne_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

pub struct Fmd {
    map: MappedFile,
}

impl Fmd {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self {
            map: MappedFile::create(path, CURRENT_FMD_VERSION, FMD_STEP_SIZE)?,
        })
    }

    pub fn attach(path: &Path) -> Result<Self> {
        let fmd = Self {
            map: MappedFile::attach(path, CURRENT_FMD_VERSION, 0)?,
        };
        fmd.entries()?;
        Ok(fmd)
    }

    pub fn open_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::attach(path)
        } else {
            Self::create(path)
        }
    }

    pub fn len(&self) -> usize {
        self.map.header().record_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode every entry, returning them with the bytes in use
    fn walk(&self) -> Result<(Vec<FileMaskEntry>, usize)> {
        let data = self.map.data();
        let mut entries = Vec::with_capacity(self.len());
        let mut pos = 0;
        for _ in 0..self.len() {
            if pos + ENTRY_FIXED > data.len() {
                return Err(StateError::Corrupt(format!("FMD entry header at {} truncated", pos)));
            }
            let filter_count = read_i32(data, pos);
            let total = read_i32(data, pos + 4);
            let id = read_i32(data, pos + 8) as u32;
            if filter_count < 0 || total < 0 {
                return Err(StateError::Corrupt(format!("FMD entry at {} has negative size", pos)));
            }
            let start = pos + ENTRY_FIXED;
            let end = start + total as usize;
            if end + 1 > data.len() {
                return Err(StateError::Corrupt(format!("FMD entry at {} overruns file", pos)));
            }
            let masks: Vec<String> = data[start..end]
                .split(|&b| b == 0)
                .take(filter_count as usize)
                .map(|s| String::from_utf8_lossy(s).into_owned())
                .collect();
            entries.push(FileMaskEntry {
                file_mask_id: id,
                masks,
            });
            pos = end + 1;
        }
        Ok((entries, pos))
    }

    pub fn entries(&self) -> Result<Vec<FileMaskEntry>> {
        Ok(self.walk()?.0)
    }

    pub fn lookup(&self, id: u32) -> Result<Option<Vec<String>>> {
        Ok(self
            .entries()?
            .into_iter()
            .find(|e| e.file_mask_id == id)
            .map(|e| e.masks))
    }

    /// Store a mask set unless an equal one exists; returns its id
    pub fn insert(&mut self, masks: &[String]) -> Result<u32> {
        let (entries, used) = self.walk()?;
        let mut id = file_mask_id(masks);
        while let Some(existing) = entries.iter().find(|e| e.file_mask_id == id) {
            if existing.masks == masks {
                return Ok(id);
            }
            id = crc32fast::hash(&id.to_le_bytes()) ^ file_mask_id(masks);
        }

        let mut block = Vec::new();
        for m in masks {
            block.extend_from_slice(m.as_bytes());
            block.push(0);
        }
        let needed = used + ENTRY_FIXED + block.len() + 1;
        if needed > self.map.data().len() {
            let steps = needed / FMD_STEP_SIZE + 1;
            self.map.resize(steps * FMD_STEP_SIZE)?;
        }

        let data = self.map.data_mut();
        data[used..used + 4].copy_from_slice(&(masks.len() as i32).to_ne_bytes());
        data[used + 4..used + 8].copy_from_slice(&(block.len() as i32).to_ne_bytes());
        data[used + 8..used + 12].copy_from_slice(&id.to_ne_bytes());
        data[used + 12] = 0;
        data[used + ENTRY_FIXED..used + ENTRY_FIXED + block.len()].copy_from_slice(&block);
        data[used + ENTRY_FIXED + block.len()] = 0;
        self.map.header_mut().record_count += 1;

        log_state_debug!("Stored file mask set", file_mask_id = id, filters = masks.len());
        Ok(id)
    }

    pub fn flush(&self) -> Result<()> {
        self.map.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn masks(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_equal_sets_share_storage() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join(FILE_MASK_FILE);
        let mut fmd = Fmd::create(&path).unwrap();

        let a = fmd.insert(&masks(&["*.txt", "!*.tmp"])).unwrap();
        let b = fmd.insert(&masks(&["GRIB*"])).unwrap();
        let a2 = fmd.insert(&masks(&["*.txt", "!*.tmp"])).unwrap();
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(fmd.len(), 2);
        fmd.flush().unwrap();
        drop(fmd);

        let fmd = Fmd::attach(&path).unwrap();
        assert_eq!(fmd.lookup(a).unwrap(), Some(masks(&["*.txt", "!*.tmp"])));
        assert_eq!(fmd.lookup(b).unwrap(), Some(masks(&["GRIB*"])));
        assert_eq!(fmd.lookup(0).unwrap(), None);
    }

    #[test]
    fn test_grows_past_one_step() {
        let temp = tempfile::tempdir().unwrap();
        let mut fmd = Fmd::create(&temp.path().join(FILE_MASK_FILE)).unwrap();
        let long = "m".repeat(200);
        let mut ids = Vec::new();
        for i in 0..40 {
            ids.push(fmd.insert(&[format!("{}{}", long, i)]).unwrap());
        }
        let entries = fmd.entries().unwrap();
        assert_eq!(entries.len(), 40);
        assert_eq!(entries.iter().map(|e| e.file_mask_id).collect::<Vec<_>>(), ids);
    }

    #[test]
    fn test_corrupt_count_detected() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join(FILE_MASK_FILE);
        let mut fmd = Fmd::create(&path).unwrap();
        fmd.insert(&masks(&["*"])).unwrap();
        fmd.map.header_mut().record_count = 500;
        fmd.flush().unwrap();
        drop(fmd);
        assert!(matches!(Fmd::attach(&path), Err(StateError::Corrupt(_))));
    }
}

//! Directory-Name Buffer: append-only `dir_id` → directory name map.

use std::ops::{Deref, DerefMut};
use std::path::Path;

use crate::layout::{cstr, set_cstr, CURRENT_DNB_VERSION, MAX_PATH_LENGTH};
use crate::mapped::{Database, Record};
use crate::{Result, StateError};

pub const DIR_NAME_FILE: &str = "directory_names";
pub const DIR_NAME_STEP_SIZE: usize = 16;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DirNameBuf {
    pub dir_id: u32,
    pub orig_dir_name: [u8; MAX_PATH_LENGTH],
}

unsafe impl Record for DirNameBuf {
    const NAME: &'static str = "DNB";
    const VERSION: u8 = CURRENT_DNB_VERSION;
    const STEP_SIZE: usize = DIR_NAME_STEP_SIZE;
}

impl DirNameBuf {
    pub fn name(&self) -> String {
        cstr(&self.orig_dir_name).into_owned()
    }
}

pub struct Dnb(Database<DirNameBuf>);

impl Deref for Dnb {
    type Target = Database<DirNameBuf>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Dnb {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Dnb {
    pub fn open_or_create(path: &Path) -> Result<Self> {
        Ok(Self(Database::open_or_create(path)?))
    }

    pub fn attach(path: &Path) -> Result<Self> {
        Ok(Self(Database::attach(path)?))
    }

    pub fn name_of(&mut self, dir_id: u32) -> Option<String> {
        self.records()
            .iter()
            .find(|r| r.dir_id == dir_id)
            .map(DirNameBuf::name)
    }

    /// Id of a directory name, appending a new entry the first time it is
    /// seen. Ids are never reused.
    pub fn lookup_or_insert(&mut self, name: &str) -> Result<(u32, usize)> {
        if let Some(pos) = self.records().iter().position(|r| cstr(&r.orig_dir_name) == name) {
            return Ok((self.records()[pos].dir_id, pos));
        }
        let mut id = crc32fast::hash(name.as_bytes());
        while self.records().iter().any(|r| r.dir_id == id) {
            id = crc32fast::hash(&[name.as_bytes(), &id.to_le_bytes()].concat());
        }
        let mut rec = DirNameBuf::zeroed();
        rec.dir_id = id;
        if !set_cstr(&mut rec.orig_dir_name, name) {
            return Err(StateError::Full(format!("directory name too long: {}", name)));
        }
        let pos = self.push(rec)?;
        Ok((id, pos))
    }
}

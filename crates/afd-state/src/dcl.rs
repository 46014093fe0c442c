//! DIR_CONFIG List: `dc_id` → DIR_CONFIG file path.

use std::ops::{Deref, DerefMut};
use std::path::Path;

use crate::layout::{cstr, set_cstr, CURRENT_DCL_VERSION, MAX_PATH_LENGTH};
use crate::mapped::{Database, Record};
use crate::{Result, StateError};

pub const DC_LIST_FILE: &str = "dir_config_list";
pub const DC_LIST_STEP_SIZE: usize = 4;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DirConfigList {
    pub dc_id: u32,
    pub dir_config_file: [u8; MAX_PATH_LENGTH],
}

unsafe impl Record for DirConfigList {
    const NAME: &'static str = "DCL";
    const VERSION: u8 = CURRENT_DCL_VERSION;
    const STEP_SIZE: usize = DC_LIST_STEP_SIZE;
}

impl DirConfigList {
    pub fn file(&self) -> String {
        cstr(&self.dir_config_file).into_owned()
    }
}

pub struct Dcl(Database<DirConfigList>);

impl Deref for Dcl {
    type Target = Database<DirConfigList>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Dcl {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Dcl {
    pub fn open_or_create(path: &Path) -> Result<Self> {
        Ok(Self(Database::open_or_create(path)?))
    }

    pub fn file_of(&mut self, dc_id: u32) -> Option<String> {
        self.records()
            .iter()
            .find(|r| r.dc_id == dc_id)
            .map(DirConfigList::file)
    }

    /// Register a DIR_CONFIG file, returning its id
    pub fn register(&mut self, file: &str) -> Result<u32> {
        if let Some(rec) = self.records().iter().find(|r| cstr(&r.dir_config_file) == file) {
            return Ok(rec.dc_id);
        }
        let mut id = crc32fast::hash(file.as_bytes());
        while self.records().iter().any(|r| r.dc_id == id) {
            id = id.wrapping_add(1);
        }
        let mut rec = DirConfigList::zeroed();
        rec.dc_id = id;
        if !set_cstr(&mut rec.dir_config_file, file) {
            return Err(StateError::Full(format!("DIR_CONFIG path too long: {}", file)));
        }
        self.push(rec)?;
        Ok(id)
    }

    /// Start a new generation: ids may be handed out again afterwards
    pub fn clear(&mut self) {
        self.retain(|_| false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_unique_ids() {
        let temp = tempfile::tempdir().unwrap();
        let mut dcl = Dcl::open_or_create(&temp.path().join(DC_LIST_FILE)).unwrap();
        let a = dcl.register("/etc/afd/DIR_CONFIG").unwrap();
        let b = dcl.register("/etc/afd/DIR_CONFIG.extra").unwrap();
        assert_ne!(a, b);
        assert_eq!(dcl.register("/etc/afd/DIR_CONFIG").unwrap(), a);
        assert_eq!(dcl.file_of(b).as_deref(), Some("/etc/afd/DIR_CONFIG.extra"));

        dcl.clear();
        assert!(dcl.is_empty());
        assert_eq!(dcl.register("/etc/afd/DIR_CONFIG").unwrap(), a);
    }
}

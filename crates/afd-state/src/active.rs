//! The AFD_ACTIVE file: daemon pids plus the init heartbeat word.
//!
//! Layout: `(NO_OF_PROCESS + 1)` native `pid_t` slots (the last one is
//! init_afd itself) followed by an unsigned heartbeat counter. The file is
//! always accessed with positioned reads and writes, never through a
//! mapping, so readers on network filesystems see fresh bytes.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::{Result, StateError};

pub const AFD_ACTIVE_FILE: &str = "AFD_ACTIVE";

/// Daemon slots in the pid table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ProcessSlot {
    Amg = 0,
    Fd = 1,
    SystemLog = 2,
    EventLog = 3,
    ReceiveLog = 4,
    TransferLog = 5,
    ProductionLog = 6,
    DeleteLog = 7,
    ArchiveWatch = 8,
    Statistics = 9,
    /// init_afd; stored after every regular process
    Init = 10,
}

/// Regular processes before the init slot
pub const NO_OF_PROCESS: usize = 10;

const PID_SIZE: usize = std::mem::size_of::<libc::pid_t>();

/// Byte offset of the heartbeat word
pub const HEARTBEAT_OFFSET: u64 = ((NO_OF_PROCESS + 1) * PID_SIZE) as u64;

pub const AFD_ACTIVE_SIZE: u64 = HEARTBEAT_OFFSET + std::mem::size_of::<u32>() as u64;

pub struct ActiveFile {
    path: PathBuf,
    file: File,
}

impl ActiveFile {
    /// Create a fresh file with every pid slot cleared
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(AFD_ACTIVE_SIZE)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len < AFD_ACTIVE_SIZE {
            return Err(StateError::TooSmall {
                path: path.to_path_buf(),
                size: len as usize,
                needed: AFD_ACTIVE_SIZE as usize,
            });
        }
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_at<const N: usize>(&mut self, offset: u64) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        Ok(())
    }

    pub fn pid(&mut self, slot: ProcessSlot) -> Result<libc::pid_t> {
        let offset = (slot as usize * PID_SIZE) as u64;
        Ok(libc::pid_t::from_ne_bytes(self.read_at::<PID_SIZE>(offset)?))
    }

    pub fn set_pid(&mut self, slot: ProcessSlot, pid: libc::pid_t) -> Result<()> {
        let offset = (slot as usize * PID_SIZE) as u64;
        self.write_at(offset, &pid.to_ne_bytes())
    }

    /// Current heartbeat word, read fresh from the file
    pub fn heartbeat(&mut self) -> Result<u32> {
        Ok(u32::from_ne_bytes(self.read_at::<4>(HEARTBEAT_OFFSET)?))
    }

    /// Advance the heartbeat word; returns the new value
    pub fn beat(&mut self) -> Result<u32> {
        let next = self.heartbeat()?.wrapping_add(1);
        self.write_at(HEARTBEAT_OFFSET, &next.to_ne_bytes())?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_offsets() {
        assert_eq!(HEARTBEAT_OFFSET as usize, (NO_OF_PROCESS + 1) * PID_SIZE);
        assert_eq!(ProcessSlot::Init as usize, NO_OF_PROCESS);
    }

    #[test]
    fn test_pids_and_heartbeat() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join(AFD_ACTIVE_FILE);
        let mut writer = ActiveFile::create(&path).unwrap();
        writer.set_pid(ProcessSlot::Init, 4242).unwrap();
        writer.set_pid(ProcessSlot::Amg, 4243).unwrap();
        assert_eq!(writer.beat().unwrap(), 1);
        assert_eq!(writer.beat().unwrap(), 2);

        let mut reader = ActiveFile::open(&path).unwrap();
        assert_eq!(reader.pid(ProcessSlot::Init).unwrap(), 4242);
        assert_eq!(reader.pid(ProcessSlot::Amg).unwrap(), 4243);
        assert_eq!(reader.pid(ProcessSlot::Fd).unwrap(), 0);
        assert_eq!(reader.heartbeat().unwrap(), 2);

        writer.beat().unwrap();
        assert_eq!(reader.heartbeat().unwrap(), 3);
    }

    #[test]
    fn test_short_file_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join(AFD_ACTIVE_FILE);
        std::fs::write(&path, [0u8; 4]).unwrap();
        assert!(matches!(ActiveFile::open(&path), Err(StateError::TooSmall { .. })));
    }
}

//! Memory-mapped database files.
//!
//! [`MappedFile`] owns the header + payload mapping of one file and knows
//! how to grow it. [`Database`] layers a typed, zero-based record array on
//! top for the fixed-size databases.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use afd_config::{log_state_debug, log_state_info, log_state_warn};

use crate::layout::{DbHeader, AFD_FEATURE_FLAG_OFFSET, AFD_WORD_OFFSET};
use crate::lock::{record_lock_offset, RecordLock};
use crate::{Result, StateError};

/// One mapped database file (header + payload)
pub struct MappedFile {
    path: PathBuf,
    file: File,
    mmap: MmapMut,
}

impl MappedFile {
    /// Create (or truncate) a database with `data_size` payload bytes
    pub fn create(path: &Path, record_version: u8, data_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let size = AFD_WORD_OFFSET + data_size;
        file.set_len(size as u64)?;

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let header = unsafe { &mut *(mmap.as_mut_ptr() as *mut DbHeader) };
        *header = DbHeader::new(record_version, size);
        mmap.flush()?;

        log_state_info!(
            "Created database",
            path = path.display().to_string(),
            size = size,
            version = record_version
        );
        Ok(Self {
            path: path.to_path_buf(),
            file,
            mmap,
        })
    }

    /// Attach to an existing database.
    ///
    /// Fails when the file is missing, shorter than its header claims, or
    /// was written with a different record version.
    pub fn attach(path: &Path, record_version: u8, record_size: usize) -> Result<Self> {
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StateError::Attach {
                    path: path.to_path_buf(),
                    reason: "file does not exist".into(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let size = file.metadata()?.len() as usize;
        if size < AFD_WORD_OFFSET {
            return Err(StateError::TooSmall {
                path: path.to_path_buf(),
                size,
                needed: AFD_WORD_OFFSET,
            });
        }

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let header = unsafe { &*(mmap.as_ptr() as *const DbHeader) };
        if header.record_version != record_version {
            return Err(StateError::Version {
                path: path.to_path_buf(),
                expected: record_version,
                found: header.record_version,
            });
        }

        let needed = AFD_WORD_OFFSET + header.record_count as usize * record_size;
        if size < needed {
            return Err(StateError::TooSmall {
                path: path.to_path_buf(),
                size,
                needed,
            });
        }

        log_state_debug!(
            "Attached database",
            path = path.display().to_string(),
            records = header.record_count
        );
        Ok(Self {
            path: path.to_path_buf(),
            file,
            mmap,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    pub fn header(&self) -> &DbHeader {
        unsafe { &*(self.mmap.as_ptr() as *const DbHeader) }
    }

    pub fn header_mut(&mut self) -> &mut DbHeader {
        unsafe { &mut *(self.mmap.as_mut_ptr() as *mut DbHeader) }
    }

    /// Payload after the header
    pub fn data(&self) -> &[u8] {
        &self.mmap[AFD_WORD_OFFSET..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.mmap[AFD_WORD_OFFSET..]
    }

    /// Grow or shrink the payload to `data_size` bytes and remap
    pub fn resize(&mut self, data_size: usize) -> Result<()> {
        let size = AFD_WORD_OFFSET + data_size;
        self.mmap.flush()?;
        self.file.set_len(size as u64)?;
        self.mmap = unsafe { MmapMut::map_mut(&self.file)? };
        self.header_mut().mapped_size = size as u32;
        log_state_debug!("Resized database", path = self.path.display().to_string(), size = size);
        Ok(())
    }

    /// Remap when another process resized the file.
    ///
    /// Returns true if the mapping moved.
    pub fn refresh(&mut self) -> Result<bool> {
        let announced = self.header().mapped_size as usize;
        if announced == self.mmap.len() {
            return Ok(false);
        }
        self.mmap = unsafe { MmapMut::map_mut(&self.file)? };
        log_state_debug!(
            "Re-attached after resize",
            path = self.path.display().to_string(),
            size = self.mmap.len()
        );
        Ok(true)
    }

    /// Feature-flag byte, read under the header lock
    pub fn feature_flags(&self) -> Result<u8> {
        let _lock = RecordLock::acquire(self.raw_fd(), AFD_FEATURE_FLAG_OFFSET as i64)?;
        Ok(self.header().feature_flags)
    }

    /// Set or clear feature-flag bits; returns the new flag byte
    pub fn set_feature_flags(&mut self, bits: u8, on: bool) -> Result<u8> {
        let _lock = RecordLock::acquire(self.raw_fd(), AFD_FEATURE_FLAG_OFFSET as i64)?;
        let header = self.header_mut();
        if on {
            header.feature_flags |= bits;
        } else {
            header.feature_flags &= !bits;
        }
        Ok(header.feature_flags)
    }

    pub fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }
}

/// A fixed-size record stored in a [`Database`].
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` plain data for which the all-zero bit
/// pattern is a valid value, with alignment of at most 8.
pub unsafe trait Record: Copy + 'static {
    /// Short database name used in errors and logs
    const NAME: &'static str;
    /// Compiled-in record version checked on attach
    const VERSION: u8;
    /// Records added per resize
    const STEP_SIZE: usize;

    fn zeroed() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

/// Typed, zero-based view of a fixed-size record database
pub struct Database<R: Record> {
    map: MappedFile,
    _marker: PhantomData<R>,
}

impl<R: Record> Database<R> {
    pub const RECORD_SIZE: usize = std::mem::size_of::<R>();

    /// Create an empty database with room for one step of records
    pub fn create(path: &Path) -> Result<Self> {
        debug_assert!(std::mem::align_of::<R>() <= 8);
        let map = MappedFile::create(path, R::VERSION, R::STEP_SIZE * Self::RECORD_SIZE)?;
        Ok(Self {
            map,
            _marker: PhantomData,
        })
    }

    pub fn attach(path: &Path) -> Result<Self> {
        let map = MappedFile::attach(path, R::VERSION, Self::RECORD_SIZE)?;
        Ok(Self {
            map,
            _marker: PhantomData,
        })
    }

    /// Attach, creating the file when it does not exist yet
    pub fn open_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::attach(path)
        } else {
            Self::create(path)
        }
    }

    pub fn path(&self) -> &Path {
        self.map.path()
    }

    pub fn header(&self) -> &DbHeader {
        self.map.header()
    }

    pub fn raw_fd(&self) -> RawFd {
        self.map.raw_fd()
    }

    /// Record count as currently announced in the header
    pub fn len(&self) -> usize {
        self.map.header().record_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records that fit in the current mapping
    pub fn capacity(&self) -> usize {
        self.map.data().len() / Self::RECORD_SIZE
    }

    /// Every announced record, re-attaching first if another process
    /// resized the file
    pub fn records(&mut self) -> &[R] {
        if let Err(e) = self.map.refresh() {
            log_state_warn!(
                "Re-attach failed, using old mapping",
                path = self.map.path().display().to_string(),
                error = e.to_string()
            );
        }
        self.mapped()
    }

    pub fn records_mut(&mut self) -> &mut [R] {
        let n = self.len().min(self.capacity());
        unsafe { std::slice::from_raw_parts_mut(self.map.data_mut().as_mut_ptr() as *mut R, n) }
    }

    /// Records visible through the current mapping
    fn mapped(&self) -> &[R] {
        let n = self.len().min(self.capacity());
        unsafe { std::slice::from_raw_parts(self.map.data().as_ptr() as *const R, n) }
    }

    fn check_pos(&self, pos: usize) -> Result<()> {
        if pos >= self.mapped().len() {
            return Err(StateError::NotFound(format!(
                "{} position {} (have {})",
                R::NAME,
                pos,
                self.len()
            )));
        }
        Ok(())
    }

    pub fn get(&mut self, pos: usize) -> Result<&R> {
        self.map.refresh()?;
        self.check_pos(pos)?;
        Ok(&self.mapped()[pos])
    }

    pub fn get_mut(&mut self, pos: usize) -> Result<&mut R> {
        self.map.refresh()?;
        self.check_pos(pos)?;
        Ok(&mut self.records_mut()[pos])
    }

    /// Append a record, growing the file by `STEP_SIZE` records when full
    pub fn push(&mut self, record: R) -> Result<usize> {
        self.map.refresh()?;
        let count = self.len();
        if count >= self.capacity() {
            let steps = count / R::STEP_SIZE + 1;
            self.map.resize(steps * R::STEP_SIZE * Self::RECORD_SIZE)?;
        }
        let data = self.map.data_mut();
        unsafe {
            let slot = (data.as_mut_ptr() as *mut R).add(count);
            std::ptr::write(slot, record);
        }
        self.map.header_mut().record_count = (count + 1) as u32;
        Ok(count)
    }

    /// Remove the record at `pos`, shifting later records down
    pub fn remove(&mut self, pos: usize) -> Result<R> {
        self.map.refresh()?;
        self.check_pos(pos)?;
        let records = self.records_mut();
        let removed = records[pos];
        records.copy_within(pos + 1.., pos);
        let count = records.len();
        self.map.header_mut().record_count = (count - 1) as u32;
        Ok(removed)
    }

    /// Keep only the records for which `keep` is true; returns how many went
    pub fn retain(&mut self, mut keep: impl FnMut(&R) -> bool) -> usize {
        let records = self.records_mut();
        let mut write = 0;
        for read in 0..records.len() {
            if keep(&records[read]) {
                records[write] = records[read];
                write += 1;
            }
        }
        let removed = records.len() - write;
        self.map.header_mut().record_count = write as u32;
        removed
    }

    /// Pick up a resize made by another process
    pub fn refresh(&mut self) -> Result<bool> {
        self.map.refresh()
    }

    /// Lock one field of one record
    pub fn lock_record(&self, pos: usize, field_offset: usize) -> Result<RecordLock> {
        self.check_pos(pos)?;
        RecordLock::acquire(
            self.raw_fd(),
            record_lock_offset(pos, Self::RECORD_SIZE, field_offset),
        )
    }

    /// Run `f` on a record while holding its field lock
    pub fn update<T>(
        &mut self,
        pos: usize,
        field_offset: usize,
        f: impl FnOnce(&mut R) -> T,
    ) -> Result<T> {
        let _lock = self.lock_record(pos, field_offset)?;
        Ok(f(&mut self.records_mut()[pos]))
    }

    pub fn feature_flags(&self) -> Result<u8> {
        self.map.feature_flags()
    }

    pub fn set_feature_flags(&mut self, bits: u8, on: bool) -> Result<u8> {
        self.map.set_feature_flags(bits, on)
    }

    pub(crate) fn header_mut(&mut self) -> &mut DbHeader {
        self.map.header_mut()
    }

    pub fn flush(&self) -> Result<()> {
        self.map.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[repr(C)]
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Sample {
        id: u32,
        value: i64,
    }

    unsafe impl Record for Sample {
        const NAME: &'static str = "sample";
        const VERSION: u8 = 9;
        const STEP_SIZE: usize = 4;
    }

    fn sample(id: u32) -> Sample {
        Sample {
            id,
            value: id as i64 * 10,
        }
    }

    #[test]
    fn test_create_push_and_reattach() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("sample.db");

        let mut db = Database::<Sample>::create(&path).unwrap();
        for i in 0..3 {
            assert_eq!(db.push(sample(i)).unwrap(), i as usize);
        }
        db.flush().unwrap();
        drop(db);

        let mut db = Database::<Sample>::attach(&path).unwrap();
        assert_eq!(db.len(), 3);
        assert_eq!(db.get(2).unwrap(), &sample(2));
        assert!(db.get(3).is_err());
    }

    #[test]
    fn test_resize_by_step() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("sample.db");
        let mut db = Database::<Sample>::create(&path).unwrap();
        assert_eq!(db.capacity(), 4);

        for i in 0..5 {
            db.push(sample(i)).unwrap();
        }
        assert_eq!(db.capacity(), 8);
        let expected = AFD_WORD_OFFSET + 8 * Database::<Sample>::RECORD_SIZE;
        assert_eq!(std::fs::metadata(&path).unwrap().len() as usize, expected);
        assert_eq!(db.header().mapped_size as usize, expected);
        assert_eq!(db.records().iter().map(|r| r.id).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_second_mapping_sees_resize() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("sample.db");
        let mut writer = Database::<Sample>::create(&path).unwrap();
        let mut reader = Database::<Sample>::attach(&path).unwrap();

        for i in 0..6 {
            writer.push(sample(i)).unwrap();
        }
        // The count is visible before the mapping catches up.
        assert_eq!(reader.len(), 6);
        assert_eq!(reader.capacity(), 4);
        assert!(reader.refresh().unwrap());
        assert_eq!(reader.capacity(), 8);
        assert!(!reader.refresh().unwrap());
    }

    #[test]
    fn test_reads_follow_resize_without_refresh() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("sample.db");
        let mut writer = Database::<Sample>::create(&path).unwrap();
        let mut reader = Database::<Sample>::attach(&path).unwrap();
        let mut other = Database::<Sample>::attach(&path).unwrap();

        for i in 0..10 {
            writer.push(sample(i)).unwrap();
        }
        assert_eq!(reader.records().iter().map(|r| r.id).collect::<Vec<_>>(), (0..10u32).collect::<Vec<_>>());
        assert_eq!(other.get(9).unwrap().id, 9);

        // A stale handle appends after the records it could not see.
        let mut stale = Database::<Sample>::attach(&path).unwrap();
        writer.push(sample(10)).unwrap();
        writer.push(sample(11)).unwrap();
        writer.push(sample(12)).unwrap();
        assert_eq!(stale.push(sample(13)).unwrap(), 13);
        assert_eq!(writer.get(13).unwrap().id, 13);
    }

    #[test]
    fn test_version_mismatch_refused() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("sample.db");
        MappedFile::create(&path, 1, 64).unwrap();

        match Database::<Sample>::attach(&path) {
            Err(StateError::Version {
                expected, found, ..
            }) => {
                assert_eq!(expected, 9);
                assert_eq!(found, 1);
            }
            other => panic!("expected version error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_missing_and_truncated_files() {
        let temp = tempdir().unwrap();
        let missing = temp.path().join("missing.db");
        assert!(matches!(
            Database::<Sample>::attach(&missing),
            Err(StateError::Attach { .. })
        ));

        let short = temp.path().join("short.db");
        std::fs::write(&short, [0u8; 8]).unwrap();
        assert!(matches!(
            Database::<Sample>::attach(&short),
            Err(StateError::TooSmall { .. })
        ));
    }

    #[test]
    fn test_remove_and_retain() {
        let temp = tempdir().unwrap();
        let mut db = Database::<Sample>::create(&temp.path().join("s.db")).unwrap();
        for i in 0..6 {
            db.push(sample(i)).unwrap();
        }
        assert_eq!(db.remove(1).unwrap().id, 1);
        assert_eq!(db.retain(|r| r.id % 2 == 0), 2);
        assert_eq!(db.records().iter().map(|r| r.id).collect::<Vec<_>>(), vec![0, 2, 4]);
    }

    #[test]
    fn test_update_under_lock() {
        let temp = tempdir().unwrap();
        let mut db = Database::<Sample>::create(&temp.path().join("s.db")).unwrap();
        db.push(sample(1)).unwrap();
        let new_value = db
            .update(0, 8, |r| {
                r.value += 5;
                r.value
            })
            .unwrap();
        assert_eq!(new_value, 15);
        assert!(db.update(4, 8, |_| ()).is_err());
    }

    #[test]
    fn test_feature_flags() {
        let temp = tempdir().unwrap();
        let mut db = Database::<Sample>::create(&temp.path().join("s.db")).unwrap();
        assert_eq!(db.feature_flags().unwrap(), 0);
        assert_eq!(db.set_feature_flags(0b101, true).unwrap(), 0b101);
        assert_eq!(db.set_feature_flags(0b001, false).unwrap(), 0b100);
    }
}

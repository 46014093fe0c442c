//! The file batch handed to the option pipeline.
//!
//! A batch is a scratch directory plus two parallel buffers: file names and
//! file sizes. Both buffers always have the same length; `files_to_send`
//! and `file_size` are derived from them and never stored separately.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{AmgError, Result};

/// Buffers grow in chunks of this many entries
pub const FILE_NAME_STEP_SIZE: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    dir: PathBuf,
    names: Vec<String>,
    sizes: Vec<i64>,
}

impl Batch {
    /// Empty batch bound to `dir`
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            names: Vec::new(),
            sizes: Vec::new(),
        }
    }

    /// Every regular, non-hidden file of `dir`, sorted by name
    pub fn scan(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut batch = Self::new(dir);
        for (name, size) in list_dir(dir)? {
            batch.push(name, size);
        }
        Ok(batch)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn sizes(&self) -> &[i64] {
        &self.sizes
    }

    pub fn name(&self, idx: usize) -> &str {
        &self.names[idx]
    }

    pub fn size(&self, idx: usize) -> i64 {
        self.sizes[idx]
    }

    pub fn files_to_send(&self) -> u32 {
        self.names.len() as u32
    }

    pub fn file_size(&self) -> i64 {
        self.sizes.iter().sum()
    }

    pub fn path_of(&self, idx: usize) -> PathBuf {
        self.dir.join(&self.names[idx])
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.names.iter().map(String::as_str).zip(self.sizes.iter().copied())
    }

    /// Snapshot of `(name, size)` pairs
    pub fn entries(&self) -> Vec<(String, i64)> {
        self.names.iter().cloned().zip(self.sizes.iter().copied()).collect()
    }

    pub fn push(&mut self, name: impl Into<String>, size: i64) {
        if self.names.len() == self.names.capacity() {
            self.names.reserve(FILE_NAME_STEP_SIZE);
            self.sizes.reserve(FILE_NAME_STEP_SIZE);
        }
        self.names.push(name.into());
        self.sizes.push(size);
    }

    pub fn remove(&mut self, idx: usize) -> (String, i64) {
        (self.names.remove(idx), self.sizes.remove(idx))
    }

    pub fn set_name(&mut self, idx: usize, name: impl Into<String>) {
        self.names[idx] = name.into();
    }

    pub fn set_size(&mut self, idx: usize, size: i64) {
        self.sizes[idx] = size;
    }

    pub fn clear(&mut self) {
        self.names.clear();
        self.sizes.clear();
    }

    /// Replace both buffers at once
    pub fn replace(&mut self, names: Vec<String>, sizes: Vec<i64>) {
        debug_assert_eq!(names.len(), sizes.len());
        self.names = names;
        self.sizes = sizes;
    }

    /// Resynchronise the buffers with the directory.
    ///
    /// Entries whose file vanished are dropped, sizes are refreshed, and
    /// files that appeared are appended in name order. Existing entries keep
    /// their position.
    pub fn recount(&mut self) -> Result<()> {
        let on_disk = list_dir(&self.dir)?;
        let mut names = Vec::with_capacity(on_disk.len());
        let mut sizes = Vec::with_capacity(on_disk.len());

        for name in &self.names {
            if let Ok(meta) = fs::metadata(self.dir.join(name)) {
                if meta.is_file() && !names.contains(name) {
                    names.push(name.clone());
                    sizes.push(meta.len() as i64);
                }
            }
        }
        for (name, size) in on_disk {
            if !names.contains(&name) {
                names.push(name);
                sizes.push(size);
            }
        }
        self.names = names;
        self.sizes = sizes;
        Ok(())
    }
}

/// Regular, non-hidden files of `dir` with their sizes, sorted by name
pub fn list_dir(dir: &Path) -> Result<Vec<(String, i64)>> {
    let read = fs::read_dir(dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AmgError::BatchDir(dir.to_path_buf()),
        _ => AmgError::Io(e),
    })?;
    let mut files = Vec::new();
    for entry in read {
        let entry = entry?;
        let meta = match entry.metadata() {
            Ok(m) => m,
            // Removed between readdir and stat
            Err(_) => continue,
        };
        if !meta.is_file() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        files.push((name, meta.len() as i64));
    }
    files.sort();
    Ok(files)
}

static TMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Write `data` to `dir/name` through a hidden temporary file, so a
/// rescan never sees a half written file. Returns the new size.
///
/// The temporary name does not depend on `name`: a target close to
/// NAME_MAX must still be writable.
pub fn write_file(dir: &Path, name: &str, data: &[u8]) -> Result<i64> {
    let seq = TMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let tmp = dir.join(format!(".{:x}.{:x}.tmp", std::process::id(), seq));
    if let Err(e) = fs::write(&tmp, data) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, dir.join(name)) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(data.len() as i64)
}

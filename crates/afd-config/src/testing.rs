//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - An isolated work directory with the full layout
//! - Batch directories with seeded files
//! - A matching `Config`
//!
//! # Usage
//!
//! ```ignore
//! use afd_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     let batch = env.create_batch("job", &[("a", b"xyz")]).unwrap();
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::{Config, WorkDir};

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated work directory for one test
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Work directory root
    pub work_dir: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let work_dir = temp_dir.path().join("afd");

        WorkDir::new(&work_dir).ensure_layout()?;

        Ok(Self {
            _temp_dir: temp_dir,
            work_dir,
            test_id,
        })
    }

    /// Layout helper
    pub fn layout(&self) -> WorkDir {
        WorkDir::new(&self.work_dir)
    }

    /// Default config bound to this work directory
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.paths.work_dir = self.work_dir.clone();
        cfg
    }

    /// Create a scratch batch directory below `files/` holding the given files
    pub fn create_batch(&self, name: &str, files: &[(&str, &[u8])]) -> anyhow::Result<PathBuf> {
        let dir = self.layout().files_dir().join("batch").join(name);
        std::fs::create_dir_all(&dir)?;
        for (file, content) in files {
            std::fs::write(dir.join(file), content)?;
        }
        Ok(dir)
    }

    /// Write a file below `<work>/etc`
    pub fn write_etc(&self, name: &str, content: &str) -> anyhow::Result<PathBuf> {
        let path = self.layout().etc_dir().join(name);
        std::fs::write(&path, content)?;
        Ok(path)
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_creates_directories() {
        let env = TestEnvironment::new().unwrap();
        assert!(env.layout().fifo_dir().exists());
        assert!(env.layout().store_dir().exists());
        assert!(env.layout().etc_dir().exists());
    }

    #[test]
    fn test_environment_is_unique() {
        let env1 = TestEnvironment::new().unwrap();
        let env2 = TestEnvironment::new().unwrap();
        assert_ne!(env1.work_dir, env2.work_dir);
        assert_ne!(env1.test_id, env2.test_id);
    }

    #[test]
    fn test_create_batch() {
        let env = TestEnvironment::new().unwrap();
        let dir = env.create_batch("b1", &[("a.txt", b"hello")]).unwrap();
        assert_eq!(std::fs::read(dir.join("a.txt")).unwrap(), b"hello");
    }

    #[test]
    fn test_config_points_at_work_dir() {
        let env = TestEnvironment::new().unwrap();
        assert_eq!(env.config().paths.work_dir, env.work_dir);
    }
}

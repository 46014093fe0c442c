//! # afd-config
//!
//! Configuration management for the AFD core daemons.
//!
//! Resolves the work directory and loads configuration from:
//! 1. `--work-dir` / explicit path handed to [`Config::load_from`]
//! 2. `AFD_WORK_DIR` environment variable
//! 3. `~/.afd` (fallback)
//!
//! The file itself lives at `<work>/etc/afd.toml`. Environment variables
//! (`AFD_EXEC_TIMEOUT`, `AFD_POOL_THREADS`) override file values.

pub mod logging;
pub mod paths;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

pub use paths::WorkDir;

/// Default timeout for `exec` options, in seconds.
pub const DEFAULT_EXEC_TIMEOUT: u64 = 3600;

/// Name of the configuration file below `<work>/etc`.
pub const AFD_CONFIG_FILE: &str = "afd.toml";

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> std::sync::RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub amg: AmgConfig,
    pub exec: ExecConfig,
    pub heartbeat: HeartbeatConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load config using the standard work-directory resolution.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::resolve_work_dir(None))
    }

    /// Load `<work_dir>/etc/afd.toml`, falling back to defaults when absent.
    pub fn load_from(work_dir: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        let path = work_dir.join(paths::ETC_DIR).join(AFD_CONFIG_FILE);
        if path.exists() {
            debug!("Loading config from {:?}", path);
            let contents = std::fs::read_to_string(&path)?;
            config = toml::from_str(&contents)?;
        }
        config.paths.work_dir = work_dir.to_path_buf();

        config.apply_env_overrides();
        Ok(config)
    }

    /// Work directory: explicit > `AFD_WORK_DIR` > `~/.afd`.
    pub fn resolve_work_dir(explicit: Option<&Path>) -> PathBuf {
        if let Some(dir) = explicit {
            return dir.to_path_buf();
        }
        if let Ok(dir) = std::env::var("AFD_WORK_DIR") {
            if !dir.is_empty() {
                return PathBuf::from(dir);
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".afd")
    }

    /// Work-directory layout helper for this config.
    pub fn work_dir(&self) -> WorkDir {
        WorkDir::new(&self.paths.work_dir)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(timeout) = std::env::var("AFD_EXEC_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.exec.default_exec_timeout = secs;
            }
        }
        if let Ok(threads) = std::env::var("AFD_POOL_THREADS") {
            if let Ok(n) = threads.parse() {
                self.amg.pool_threads = Some(n);
            }
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the AFD working tree (`fifo_dir`, `files`, `log`, `etc`)
    pub work_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            work_dir: Config::resolve_work_dir(None),
        }
    }
}

/// How the AMG runs option pipelines for ready batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheduling {
    /// One batch after the other on the daemon thread.
    Sequential,
    /// Work-stealing pool, one task per batch.
    Pool,
}

/// AMG (option pipeline) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AmgConfig {
    pub scheduling: Scheduling,
    /// Pool size (None = auto)
    pub pool_threads: Option<usize>,
    /// Poll timeout of the command loop in milliseconds
    pub rescan_interval_ms: u64,
}

impl Default for AmgConfig {
    fn default() -> Self {
        Self {
            scheduling: Scheduling::Pool,
            pool_threads: None,
            rescan_interval_ms: 1000,
        }
    }
}

/// Settings for the `exec` option family
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Timeout in seconds when `-t` is not given
    pub default_exec_timeout: u64,
    /// Base nice value; job priority is added on top. None leaves the
    /// scheduler priority untouched.
    pub exec_base_priority: Option<i32>,
    pub min_sched_priority: i32,
    pub max_sched_priority: i32,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            default_exec_timeout: DEFAULT_EXEC_TIMEOUT,
            exec_base_priority: None,
            min_sched_priority: 0,
            max_sched_priority: 19,
        }
    }
}

impl ExecConfig {
    /// Nice value for a job of the given priority character, if any.
    pub fn exec_priority(&self, job_priority: u8) -> Option<i32> {
        let base = self.exec_base_priority?;
        let offset = match job_priority {
            b'0'..=b'9' => (job_priority - b'0') as i32,
            b'a'..=b'z' => (job_priority - b'a') as i32 + 10,
            _ => 0,
        };
        Some((base + offset).clamp(self.min_sched_priority, self.max_sched_priority))
    }
}

/// Liveness probe defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Seconds to wait for the heartbeat word to advance
    pub wait_time_secs: u64,
    /// How often init_afd bumps the heartbeat word
    pub interval_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            wait_time_secs: 3,
            interval_ms: 1000,
        }
    }
}

/// Which record logs are written
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub production: bool,
    pub delete: bool,
    pub event: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            production: true,
            delete: true,
            event: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.exec.default_exec_timeout, DEFAULT_EXEC_TIMEOUT);
        assert_eq!(config.amg.scheduling, Scheduling::Pool);
        assert!(config.log.production);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[exec]"));
        assert!(toml_str.contains("[amg]"));
        assert!(toml_str.contains("scheduling = \"pool\""));
    }

    #[test]
    fn test_exec_priority_clamped() {
        let exec = ExecConfig {
            exec_base_priority: Some(5),
            min_sched_priority: 0,
            max_sched_priority: 19,
            ..Default::default()
        };
        assert_eq!(exec.exec_priority(b'0'), Some(5));
        assert_eq!(exec.exec_priority(b'9'), Some(14));
        assert_eq!(exec.exec_priority(b'z'), Some(19));
        assert_eq!(ExecConfig::default().exec_priority(b'3'), None);
    }

    #[test]
    fn test_load_from_missing_file_uses_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let config = Config::load_from(temp.path()).unwrap();
        assert_eq!(config.paths.work_dir, temp.path());
        assert_eq!(config.amg.rescan_interval_ms, 1000);
    }
}

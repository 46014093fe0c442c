//! Is an AFD running in this work directory?
//!
//! The probe reads init_afd's pid from `AFD_ACTIVE`, checks that the
//! process exists, then watches the heartbeat word. The word is read with
//! a positioned read every time, so a stale page cache can never fake
//! progress.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use afd_config::log_ctl_info;
use afd_ipc::{is_alive, process_name};
use afd_state::{ActiveFile, ProcessSlot, StateError};

use crate::Result;

/// Time between two heartbeat samples
pub const HEARTBEAT_SAMPLE: Duration = Duration::from_millis(100);

/// Probe result; the discriminant is the probe's exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Liveness {
    /// No AFD detected
    NotRunning = 0,
    /// The heartbeat advanced
    Active = 1,
    /// init_afd exists but the heartbeat did not move within `wait_time`
    Timeout = 2,
    /// init_afd exists but system_log or archive_watch is gone
    Stopped = 3,
}

impl Liveness {
    pub fn describe(self) -> &'static str {
        match self {
            Liveness::NotRunning => "AFD is not active",
            Liveness::Active => "AFD is active",
            Liveness::Timeout => "AFD heartbeat timed out",
            Liveness::Stopped => "AFD is stopped",
        }
    }
}

/// `/proc/<pid>/stat` reports the process as a zombie
fn is_zombie(pid: i32) -> bool {
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| {
            // The command name may contain spaces; the state follows the last ')'.
            let rest = &stat[stat.rfind(')')? + 1..];
            rest.split_whitespace().next().map(|s| s == "Z")
        })
        .unwrap_or(false)
}

/// The pid exists, is not a zombie and, when `expected_name` is given,
/// still runs that program (pids get reused).
fn process_matches(pid: i32, expected_name: Option<&str>) -> bool {
    if !is_alive(pid) || is_zombie(pid) {
        return false;
    }
    match (expected_name, process_name(pid)) {
        (Some(expected), Some(name)) => name == expected,
        _ => true,
    }
}

/// Probe the AFD whose `AFD_ACTIVE` file is `active_file`.
///
/// `expected_name` is init_afd's command name; pass `None` to skip the
/// pid-reuse check.
pub fn check_afd_heartbeat(active_file: &Path, wait_time: Duration, expected_name: Option<&str>) -> Result<Liveness> {
    let mut active = match ActiveFile::open(active_file) {
        Ok(active) => active,
        Err(StateError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Liveness::NotRunning)
        }
        Err(e) => return Err(e.into()),
    };

    let init_pid = active.pid(ProcessSlot::Init)?;
    if init_pid <= 0 || !process_matches(init_pid, expected_name) {
        return Ok(Liveness::NotRunning);
    }

    for slot in [ProcessSlot::SystemLog, ProcessSlot::ArchiveWatch] {
        let pid = active.pid(slot)?;
        if !process_matches(pid, None) {
            log_ctl_info!("AFD process gone", slot = slot as usize, pid = pid);
            return Ok(Liveness::Stopped);
        }
    }

    let start = active.heartbeat()?;
    let deadline = Instant::now() + wait_time;
    loop {
        thread::sleep(HEARTBEAT_SAMPLE);
        if active.heartbeat()? != start {
            return Ok(Liveness::Active);
        }
        if Instant::now() >= deadline {
            return Ok(Liveness::Timeout);
        }
        if !is_alive(init_pid) {
            return Ok(Liveness::NotRunning);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_not_running() {
        let dir = tempdir().unwrap();
        let liveness = check_afd_heartbeat(&dir.path().join("AFD_ACTIVE"), Duration::from_millis(200), None).unwrap();
        assert_eq!(liveness, Liveness::NotRunning);
    }

    #[test]
    fn test_cleared_pid_is_not_running() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("AFD_ACTIVE");
        ActiveFile::create(&path).unwrap();
        assert_eq!(
            check_afd_heartbeat(&path, Duration::from_millis(200), None).unwrap(),
            Liveness::NotRunning
        );
    }

    #[test]
    fn test_stalled_heartbeat_times_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("AFD_ACTIVE");
        let mut active = ActiveFile::create(&path).unwrap();
        let me = std::process::id() as i32;
        for slot in [ProcessSlot::Init, ProcessSlot::SystemLog, ProcessSlot::ArchiveWatch] {
            active.set_pid(slot, me).unwrap();
        }
        assert_eq!(
            check_afd_heartbeat(&path, Duration::from_millis(250), None).unwrap(),
            Liveness::Timeout
        );
    }

    #[test]
    fn test_dead_system_log_means_stopped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("AFD_ACTIVE");
        let mut active = ActiveFile::create(&path).unwrap();
        let me = std::process::id() as i32;
        active.set_pid(ProcessSlot::Init, me).unwrap();
        active.set_pid(ProcessSlot::ArchiveWatch, me).unwrap();
        assert_eq!(
            check_afd_heartbeat(&path, Duration::from_millis(200), None).unwrap(),
            Liveness::Stopped
        );
    }

    #[test]
    fn test_wrong_process_name_is_not_running() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("AFD_ACTIVE");
        let mut active = ActiveFile::create(&path).unwrap();
        active.set_pid(ProcessSlot::Init, std::process::id() as i32).unwrap();
        assert_eq!(
            check_afd_heartbeat(&path, Duration::from_millis(200), Some("init_afd_nope")).unwrap(),
            Liveness::NotRunning
        );
    }
}

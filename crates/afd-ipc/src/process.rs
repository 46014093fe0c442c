//! Signalling other AFD processes.

use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use afd_config::{log_ipc_debug, log_ipc_warn};

use crate::Result;

/// How long a process gets to exit after SIGINT
pub const TERMINATE_GRACE: Duration = Duration::from_secs(10);

/// Poll interval while waiting for it
pub const TERMINATE_POLL: Duration = Duration::from_millis(10);

/// How a terminated process went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Was already gone
    NotRunning,
    /// Exited after SIGINT
    Interrupted,
    /// Needed SIGKILL
    Killed,
}

/// Signal 0 probe. A process we may not signal still exists.
pub fn is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Command name of a running process, from `/proc/<pid>/comm`
pub fn process_name(pid: i32) -> Option<String> {
    std::fs::read_to_string(format!("/proc/{}/comm", pid))
        .ok()
        .map(|s| s.trim_end().to_string())
}

/// SIGINT `target`, wait up to `grace` in `TERMINATE_POLL` steps for
/// `exited` to report true, then SIGKILL.
///
/// `target` may be a negative pid to signal a process group.
pub fn terminate_with(
    target: Pid,
    grace: Duration,
    mut exited: impl FnMut() -> bool,
) -> Result<Termination> {
    match kill(target, Signal::SIGINT) {
        Ok(()) => {}
        Err(Errno::ESRCH) => return Ok(Termination::NotRunning),
        Err(e) => return Err(e.into()),
    }
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if exited() {
            log_ipc_debug!("process exited after SIGINT", pid = target.as_raw());
            return Ok(Termination::Interrupted);
        }
        thread::sleep(TERMINATE_POLL);
    }
    if exited() {
        return Ok(Termination::Interrupted);
    }
    log_ipc_warn!("process ignored SIGINT, sending SIGKILL", pid = target.as_raw());
    match kill(target, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(Termination::Killed),
        Err(e) => Err(e.into()),
    }
}

/// Terminate a process that is not our child
pub fn terminate(pid: i32, grace: Duration) -> Result<Termination> {
    if !is_alive(pid) {
        return Ok(Termination::NotRunning);
    }
    terminate_with(Pid::from_raw(pid), grace, || !is_alive(pid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_is_alive() {
        assert!(is_alive(std::process::id() as i32));
        assert!(!is_alive(0));
        assert!(!is_alive(-5));
    }

    #[test]
    fn test_process_name_of_self() {
        let name = process_name(std::process::id() as i32).unwrap();
        assert!(!name.is_empty());
    }

    #[test]
    fn test_terminate_child_with_sigint() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        let how = terminate_with(pid, Duration::from_secs(5), || {
            matches!(child.try_wait(), Ok(Some(_)))
        })
        .unwrap();
        assert_eq!(how, Termination::Interrupted);
    }

    #[test]
    fn test_terminate_sigkill_after_grace() {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("trap '' INT; sleep 30")
            .spawn()
            .unwrap();
        // Give the shell time to install the trap
        thread::sleep(Duration::from_millis(200));
        let pid = Pid::from_raw(child.id() as i32);
        let how = terminate_with(pid, Duration::from_millis(100), || {
            matches!(child.try_wait(), Ok(Some(_)))
        })
        .unwrap();
        assert_eq!(how, Termination::Killed);
        child.wait().unwrap();
    }
}

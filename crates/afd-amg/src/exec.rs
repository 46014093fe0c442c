//! The `exec` option: run a shell command inside the batch directory.
//!
//! The command runs as `cd <dir> && <cmd>`. With `%s` markers it runs once
//! per file, each marker replaced by the file name; without them it runs
//! once for the whole batch. Every run is followed by `check_changes`.

use std::fs::{self, DirBuilder, File, OpenOptions};
use std::os::unix::fs::DirBuilderExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use afd_config::{log_amg_debug, log_amg_warn};
use afd_log::DeleteReason;
use fs2::FileExt;
use nix::sys::resource::{getrusage, UsageWho};
use nix::unistd::Pid;

use crate::batch::{list_dir, Batch};
use crate::changes::{check_changes, RunStats};
use crate::options::{ExecLock, ExecSpec};
use crate::pipeline::{JobContext, OptionReport, Pipeline};
use crate::{AmgError, Result};

/// At most this many `%s` markers are substituted
pub const MAX_EXEC_FILE_SUBSTITUTION: usize = 10;

pub const EXEC_LOCK_FILE: &str = "EXEC_LOCK";

/// Return code recorded for a run killed by its timeout
pub const TIMEOUT_RETURN_CODE: i32 = -1;

const WAIT_POLL: Duration = Duration::from_millis(10);

/// Quote a file name for the shell when it holds `;` or a space
fn quote_name(name: &str) -> String {
    if name.contains(';') || name.contains(' ') {
        format!("\"{}\"", name)
    } else {
        name.to_string()
    }
}

/// Splice `name` into the first `MAX_EXEC_FILE_SUBSTITUTION` markers
pub fn substitute(command: &str, name: &str) -> String {
    let quoted = quote_name(name);
    let mut out = String::with_capacity(command.len() + quoted.len());
    let mut rest = command;
    let mut done = 0;
    while done < MAX_EXEC_FILE_SUBSTITUTION {
        let Some(at) = rest.find("%s") else {
            break;
        };
        out.push_str(&rest[..at]);
        out.push_str(&quoted);
        rest = &rest[at + 2..];
        done += 1;
    }
    out.push_str(rest);
    out
}

/// Outcome of one command run
#[derive(Debug, Clone, Copy)]
pub struct ExecOutcome {
    pub stats: RunStats,
    pub timed_out: bool,
}

impl ExecOutcome {
    pub fn failed(&self) -> bool {
        self.timed_out || self.stats.return_code != 0
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

fn child_cpu() -> (i64, i64) {
    match getrusage(UsageWho::RUSAGE_CHILDREN) {
        Ok(usage) => {
            let (u, s) = (usage.user_time(), usage.system_time());
            let usec = (u.tv_sec() + s.tv_sec()) * 1_000_000 + u.tv_usec() + s.tv_usec();
            (usec / 1_000_000, usec % 1_000_000)
        }
        Err(_) => (0, 0),
    }
}

/// Run `sh -c <command>` with a timeout and an optional nice value.
///
/// On timeout the command's process group gets SIGINT and, after the grace
/// period, SIGKILL.
pub fn run_command(command: &str, timeout: Duration, nice: Option<i32>) -> Result<ExecOutcome> {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .process_group(0);
    if let Some(nice) = nice {
        // SAFETY: setpriority is async-signal-safe.
        unsafe {
            cmd.pre_exec(move || {
                libc::setpriority(libc::PRIO_PROCESS, 0, nice);
                Ok(())
            });
        }
    }

    let cpu_before = child_cpu();
    let started = Instant::now();
    let mut child = cmd.spawn()?;
    let deadline = started + timeout;

    let (status, timed_out) = loop {
        if let Some(status) = child.try_wait()? {
            break (Some(status), false);
        }
        if Instant::now() >= deadline {
            let group = Pid::from_raw(-(child.id() as i32));
            afd_ipc::terminate_with(group, afd_ipc::process::TERMINATE_GRACE, || {
                matches!(child.try_wait(), Ok(Some(_)))
            })?;
            let _ = child.wait();
            break (None, true);
        }
        thread::sleep(WAIT_POLL);
    };

    let cpu_after = child_cpu();
    let used = (cpu_after.0 - cpu_before.0) * 1_000_000 + (cpu_after.1 - cpu_before.1);
    let return_code = match status {
        Some(status) => exit_code(status),
        None => TIMEOUT_RETURN_CODE,
    };
    Ok(ExecOutcome {
        stats: RunStats {
            return_code,
            wall_seconds: started.elapsed().as_secs_f64(),
            cpu_sec: used.max(0) / 1_000_000,
            cpu_usec: used.max(0) % 1_000_000,
        },
        timed_out,
    })
}

/// Exclusive exec lock; released when the file is dropped
fn acquire_lock(fifo_dir: &Path, job_id: u32, lock: Option<ExecLock>) -> Result<Option<File>> {
    let Some(lock) = lock else {
        return Ok(None);
    };
    let path = match lock {
        ExecLock::Job => fifo_dir.join(format!("{}.{:x}", EXEC_LOCK_FILE, job_id)),
        ExecLock::All => fifo_dir.join(EXEC_LOCK_FILE),
    };
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)?;
    file.lock_exclusive()?;
    Ok(Some(file))
}

/// Move a failed file into the store directory, copying across devices
pub fn store_file(store_dir: &Path, src: &Path, name: &str) -> std::io::Result<PathBuf> {
    DirBuilder::new().recursive(true).mode(0o755).create(store_dir)?;
    let dest = store_dir.join(name);
    match fs::rename(src, &dest) {
        Ok(()) => Ok(dest),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            fs::copy(src, &dest)?;
            fs::remove_file(src)?;
            Ok(dest)
        }
        Err(e) => Err(e),
    }
}

/// `-d` after a successful run; the command may have removed the file itself
fn remove_done(dir: &Path, name: &str) {
    if let Err(e) = fs::remove_file(dir.join(name)) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log_amg_warn!("Failed to remove file", file = name, error = e.to_string());
        }
    }
}

struct ExecRun<'a> {
    p: &'a Pipeline,
    ctx: &'a JobContext,
    spec: &'a ExecSpec,
    dir: PathBuf,
    prefix: String,
    timeout: Duration,
    nice: Option<i32>,
    option: &'a str,
}

impl ExecRun<'_> {
    fn exec(&self, command: &str, subject: Option<(&str, i64)>) -> Result<ExecOutcome> {
        let before = list_dir(&self.dir)?;
        let full = format!("{}{}", self.prefix, command);
        log_amg_debug!("exec", job_id = self.ctx.job_id, command = full.as_str());
        let outcome = run_command(&full, self.timeout, self.nice)?;
        if outcome.timed_out {
            log_amg_warn!(
                "exec timed out",
                job_id = self.ctx.job_id,
                command = command,
                timeout_secs = self.timeout.as_secs()
            );
        } else if outcome.stats.return_code != 0 {
            log_amg_warn!(
                "exec failed",
                job_id = self.ctx.job_id,
                command = command,
                return_code = outcome.stats.return_code
            );
        }
        check_changes(
            self.p.logs(),
            self.ctx,
            &self.dir,
            &before,
            subject,
            &outcome.stats,
            self.option,
        )?;
        Ok(outcome)
    }

    /// Save (`-s`) or delete one failed file
    fn dispose_failed(&self, name: &str, size: i64) {
        let path = self.dir.join(name);
        if !path.exists() {
            return;
        }
        if self.spec.save_failed {
            let store = self.p.work().exec_store_dir(
                self.ctx.creation_time,
                self.ctx.unique_number,
                self.ctx.split_job_counter,
            );
            match store_file(&store, &path, name) {
                Ok(_) => self.p.logs().delete(&self.ctx.delete_record(
                    DeleteReason::ExecFailedStored,
                    name,
                    size,
                    self.spec.command.as_str(),
                )),
                Err(e) => {
                    log_amg_warn!("Failed to store file", file = name, error = e.to_string());
                }
            }
        } else {
            self.p.discard(
                self.ctx,
                &self.dir,
                name,
                size,
                DeleteReason::ExecFailedDel,
                &self.spec.command,
            );
        }
    }

    /// `-D`: drop everything still in the directory
    fn dispose_all(&self) -> Result<()> {
        for (name, size) in list_dir(&self.dir)? {
            self.dispose_failed(&name, size);
        }
        Ok(())
    }
}

pub(crate) fn run(
    p: &Pipeline,
    ctx: &JobContext,
    batch: &mut Batch,
    spec: &ExecSpec,
    option: &str,
) -> Result<OptionReport> {
    let dir = batch.dir().to_path_buf();
    let dir_str = dir
        .to_str()
        .ok_or_else(|| AmgError::BatchDir(dir.clone()))?;
    let run = ExecRun {
        p,
        ctx,
        spec,
        prefix: format!("cd '{}' && ", dir_str.replace('\'', "'\\''")),
        dir: dir.clone(),
        timeout: Duration::from_secs(spec.timeout.unwrap_or(p.exec_config().default_exec_timeout)),
        nice: p.exec_config().exec_priority(ctx.priority),
        option,
    };
    let _lock = acquire_lock(&p.work().fifo_dir(), ctx.job_id, spec.lock)?;
    let mut report = OptionReport::default();

    if spec.substitutions() == 0 {
        let files = batch.entries();
        let outcome = run.exec(&spec.command, None)?;
        if outcome.failed() {
            report.failures += 1;
            if spec.delete_all_on_error && !outcome.timed_out {
                run.dispose_all()?;
                report.abort = true;
            } else if spec.delete_each || spec.save_failed {
                for (name, size) in &files {
                    run.dispose_failed(name, *size);
                }
            }
        } else if spec.delete_each {
            for (name, _) in &files {
                remove_done(&dir, name);
            }
        }
        return Ok(report);
    }

    for (name, size) in batch.entries() {
        if !dir.join(&name).exists() {
            continue;
        }
        let outcome = run.exec(&substitute(&spec.command, &name), Some((&name, size)))?;
        if outcome.failed() {
            report.failures += 1;
            if spec.delete_all_on_error && !outcome.timed_out {
                run.dispose_all()?;
                report.abort = true;
                return Ok(report);
            }
            if spec.delete_each || spec.save_failed {
                run.dispose_failed(&name, size);
            }
        } else if spec.delete_each {
            remove_done(&dir, &name);
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute() {
        assert_eq!(substitute("gzip %s", "a"), "gzip a");
        assert_eq!(substitute("cp %s %s.bak", "a b"), "cp \"a b\" \"a b\".bak");
        assert_eq!(substitute("x %s", "a;b"), "x \"a;b\"");
        assert_eq!(substitute("ls", "a"), "ls");
        let many = "%s ".repeat(12);
        let out = substitute(&many, "f");
        assert_eq!(out.matches('f').count(), MAX_EXEC_FILE_SUBSTITUTION);
        assert_eq!(out.matches("%s").count(), 2);
    }

    #[test]
    fn test_run_command_codes() {
        let ok = run_command("true", Duration::from_secs(5), None).unwrap();
        assert!(!ok.failed());
        let bad = run_command("exit 3", Duration::from_secs(5), None).unwrap();
        assert_eq!(bad.stats.return_code, 3);
        assert!(bad.failed());
    }

    #[test]
    fn test_run_command_timeout() {
        let started = Instant::now();
        let out = run_command("sleep 30", Duration::from_millis(200), Some(5)).unwrap();
        assert!(out.timed_out);
        assert_eq!(out.stats.return_code, TIMEOUT_RETURN_CODE);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_store_file() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("f1");
        fs::write(&src, b"1234567").unwrap();
        let store = temp.path().join("store").join("1_2_3");
        let dest = store_file(&store, &src, "f1").unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(dest).unwrap(), b"1234567");
    }

    #[test]
    fn test_lock_files() {
        let temp = tempfile::tempdir().unwrap();
        assert!(acquire_lock(temp.path(), 1, None).unwrap().is_none());
        let held = acquire_lock(temp.path(), 0x2a, Some(ExecLock::Job)).unwrap();
        assert!(held.is_some());
        assert!(temp.path().join("EXEC_LOCK.2a").exists());
        drop(held);
        assert!(acquire_lock(temp.path(), 1, Some(ExecLock::All)).unwrap().is_some());
    }
}

//! Host, directory and process commands.
//!
//! A [`Controller`] runs a list of [`Verb`]s against host or directory
//! aliases. Each verb flips its bit in the FSA or FRA under the record
//! lock, tells the daemon that owns the object through its fifo, and
//! writes one event-log line naming the user.

use std::path::PathBuf;
use std::time::Duration;

use afd_config::paths::WorkDir;
use afd_config::{log_ctl_info, log_ctl_warn};
use afd_ipc::message::{FdDeleteMessage, HostAliasMessage, PositionMessage};
use afd_ipc::{self as ipc, AfdCommand, FdCommand, Termination};
use afd_log::{EventAction, EventClass, EventRecord, EventType, LogSinks};
use afd_state::fra::{DIR_DISABLED, DIR_STOPPED, FRA_FILE};
use afd_state::fsa::{DebugMode, FSA_FILE, HOST_DISABLED, PAUSE_QUEUE_STAT, STOP_TRANSFER_STAT};
use afd_state::{Fra, Fsa};

use crate::permissions::Permissions;
use crate::{CtlError, Result};

/// What a verb acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Host,
    Directory,
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    EnableHost,
    DisableHost,
    StartTransfer,
    StopTransfer,
    StartQueue,
    StopQueue,
    SwitchHost,
    RetryHost,
    /// NORMAL → DEBUG → TRACE → FULL_TRACE → NORMAL
    DebugHost,
    EnableDirectory,
    DisableDirectory,
    StartDirectory,
    StopDirectory,
    RescanDirectory,
    StartAmg,
    StopAmg,
    StartFd,
    StopFd,
    Shutdown,
}

impl Verb {
    pub fn target(self) -> Target {
        use Verb::*;
        match self {
            EnableHost | DisableHost | StartTransfer | StopTransfer | StartQueue | StopQueue | SwitchHost
            | RetryHost | DebugHost => Target::Host,
            EnableDirectory | DisableDirectory | StartDirectory | StopDirectory | RescanDirectory => {
                Target::Directory
            }
            StartAmg | StopAmg | StartFd | StopFd | Shutdown => Target::Global,
        }
    }

    /// `afd.users` token granting this verb
    pub fn permission(self) -> &'static str {
        use Verb::*;
        match self {
            EnableHost | DisableHost => "disable_host",
            StartTransfer | StopTransfer => "startstop_transfer",
            StartQueue | StopQueue => "startstop_queue",
            SwitchHost => "switch_host",
            RetryHost => "retry",
            DebugHost => "debug",
            EnableDirectory | DisableDirectory => "disable_dir",
            StartDirectory | StopDirectory => "startstop_dir",
            RescanDirectory => "rescan",
            StartAmg | StopAmg | StartFd | StopFd | Shutdown => "startstop_afd",
        }
    }
}

/// The control plane of one work directory
pub struct Controller {
    work: WorkDir,
    user: String,
    logs: LogSinks,
    permissions: Permissions,
    grace: Duration,
}

impl Controller {
    pub fn new(work: WorkDir, user: impl Into<String>, logs: LogSinks, permissions: Permissions) -> Self {
        Self {
            work,
            user: user.into(),
            logs,
            permissions,
            grace: ipc::process::TERMINATE_GRACE,
        }
    }

    /// How long stopped transfer jobs get before SIGKILL
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    fn fifo(&self, name: &str) -> PathBuf {
        ipc::fifo_path(&self.work.fifo_dir(), name)
    }

    fn event(&self, class: EventClass, action: EventAction, subject: &str, info: Option<String>) {
        let mut record = EventRecord::new(class, EventType::Manual, action, subject, &self.user);
        if let Some(info) = info {
            record = record.with_info(info);
        }
        self.logs.event(&record);
    }

    /// Run `verbs` against the aliases of their kind.
    ///
    /// Verbs the user may not run are dropped. Returns the number of
    /// dropped verbs plus the number of failed (verb, alias) pairs; only
    /// an unusable FSA/FRA or fifo directory is an error.
    pub fn run(&self, verbs: &[Verb], hosts: &[String], dirs: &[String]) -> Result<usize> {
        let (verbs, dropped) = self.permissions.filter(verbs, |v| (v.permission(), true));
        if verbs.is_empty() {
            return Ok(dropped);
        }
        ipc::create_core_fifos(&self.work.fifo_dir())?;

        let mut fsa = if verbs.iter().any(|v| v.target() == Target::Host) {
            Some(Fsa::attach(&self.work.fifo_dir().join(FSA_FILE))?)
        } else {
            None
        };
        let mut fra = if verbs.iter().any(|v| v.target() == Target::Directory) {
            Some(Fra::attach(&self.work.fifo_dir().join(FRA_FILE))?)
        } else {
            None
        };

        let mut failures = 0;
        for verb in verbs {
            let outcome = match (verb.target(), fsa.as_mut(), fra.as_mut()) {
                (Target::Host, Some(fsa), _) => self.for_each(hosts, |alias| self.host_verb(fsa, verb, alias)),
                (Target::Directory, _, Some(fra)) => self.for_each(dirs, |alias| self.dir_verb(fra, verb, alias)),
                _ => self.global_verb(verb).map_or_else(
                    |e| {
                        eprintln!("{:?}: {}", verb, e);
                        1
                    },
                    |()| 0,
                ),
            };
            failures += outcome;
        }
        Ok(dropped + failures)
    }

    fn for_each(&self, aliases: &[String], mut apply: impl FnMut(&str) -> Result<()>) -> usize {
        let mut failures = 0;
        for alias in aliases {
            if let Err(e) = apply(alias) {
                eprintln!("{}: {}", alias, e);
                log_ctl_warn!("Command failed", alias = alias.as_str(), error = e.to_string());
                failures += 1;
            }
        }
        failures
    }

    fn host_verb(&self, fsa: &mut Fsa, verb: Verb, alias: &str) -> Result<()> {
        fsa.refresh()?;
        let pos = fsa.require(alias)?;
        let record = *fsa.get(pos)?;
        let class = EventClass::Host;

        match verb {
            Verb::EnableHost | Verb::DisableHost => {
                let disable = verb == Verb::DisableHost;
                if record.is_disabled() == disable {
                    println!("{} is already {}", alias, if disable { "disabled" } else { "enabled" });
                    return Ok(());
                }
                fsa.toggle_special_flag(pos, HOST_DISABLED)?;
                if disable {
                    ipc::send(&self.fifo(ipc::FD_DELETE_FIFO), &FdDeleteMessage::AllJobsFromHost(alias.to_string()))?;
                    ipc::send(&self.fifo(ipc::DEL_TIME_JOB_FIFO), &HostAliasMessage(alias.to_string()))?;
                    self.event(class, EventAction::DisableHost, alias, None);
                } else {
                    self.event(class, EventAction::EnableHost, alias, None);
                }
            }
            Verb::StartTransfer | Verb::StopTransfer => {
                let stop = verb == Verb::StopTransfer;
                if (record.host_status & STOP_TRANSFER_STAT != 0) == stop {
                    return Ok(());
                }
                fsa.toggle_host_status(pos, STOP_TRANSFER_STAT)?;
                if stop {
                    for pid in fsa.active_pids(pos)? {
                        let how = ipc::terminate(pid, self.grace)?;
                        if how == Termination::Killed {
                            log_ctl_warn!("Transfer job needed SIGKILL", host = alias, pid = pid);
                        }
                    }
                    self.event(class, EventAction::StopTransfer, alias, None);
                } else {
                    ipc::send_bytes(&self.fifo(ipc::FD_WAKE_UP_FIFO), &[0])?;
                    self.event(class, EventAction::StartTransfer, alias, None);
                }
            }
            Verb::StartQueue | Verb::StopQueue => {
                let stop = verb == Verb::StopQueue;
                if (record.host_status & PAUSE_QUEUE_STAT != 0) == stop {
                    return Ok(());
                }
                fsa.toggle_host_status(pos, PAUSE_QUEUE_STAT)?;
                let action = if stop {
                    EventAction::StopQueue
                } else {
                    EventAction::StartQueue
                };
                self.event(class, action, alias, None);
            }
            Verb::SwitchHost => match fsa.switch_host(pos)? {
                Some(toggle) => {
                    let name = fsa.get(pos)?.host_dsp_name();
                    self.event(class, EventAction::SwitchHost, alias, Some(format!("{} -> {}", toggle, name)));
                }
                None => return Err(CtlError::Usage(format!("{} has no second host to switch to", alias))),
            },
            Verb::RetryHost => {
                ipc::send(&self.fifo(ipc::RETRY_FD_FIFO), &PositionMessage(pos as i32))?;
                self.event(class, EventAction::RetryHost, alias, None);
            }
            Verb::DebugHost => {
                let action = match fsa.cycle_debug(pos)? {
                    DebugMode::Normal => EventAction::DisableDebugHost,
                    DebugMode::Debug => EventAction::EnableDebugHost,
                    DebugMode::Trace => EventAction::EnableTraceHost,
                    DebugMode::FullTrace => EventAction::EnableFullTraceHost,
                };
                self.event(class, action, alias, None);
            }
            _ => return Err(CtlError::Usage(format!("{:?} is not a host command", verb))),
        }
        log_ctl_info!("Host command done", host = alias, verb = format!("{:?}", verb));
        Ok(())
    }

    fn dir_verb(&self, fra: &mut Fra, verb: Verb, alias: &str) -> Result<()> {
        fra.refresh()?;
        let pos = fra.require(alias)?;
        let record = *fra.get(pos)?;
        let class = EventClass::Dir;

        match verb {
            Verb::EnableDirectory | Verb::DisableDirectory => {
                let disable = verb == Verb::DisableDirectory;
                if (record.dir_flag & DIR_DISABLED != 0) == disable {
                    return Ok(());
                }
                fra.toggle_dir_flag(pos, DIR_DISABLED)?;
                if disable {
                    if !record.host_alias().is_empty() {
                        ipc::send(
                            &self.fifo(ipc::FD_DELETE_FIFO),
                            &FdDeleteMessage::RetrievesFromDir(record.dir_alias()),
                        )?;
                    }
                    self.event(class, EventAction::DisableDirectory, alias, None);
                } else {
                    self.event(class, EventAction::EnableDirectory, alias, None);
                }
            }
            Verb::StartDirectory | Verb::StopDirectory => {
                let stop = verb == Verb::StopDirectory;
                if (record.dir_flag & DIR_STOPPED != 0) == stop {
                    return Ok(());
                }
                fra.toggle_dir_flag(pos, DIR_STOPPED)?;
                if stop && !record.host_alias().is_empty() {
                    ipc::send(
                        &self.fifo(ipc::FD_DELETE_FIFO),
                        &FdDeleteMessage::RetrievesFromDir(record.dir_alias()),
                    )?;
                }
                let action = if stop {
                    EventAction::StopDirectory
                } else {
                    EventAction::StartDirectory
                };
                self.event(class, action, alias, None);
            }
            Verb::RescanDirectory => {
                fra.set_next_check_time(pos, afd_log::now())?;
                ipc::send_bytes(&self.fifo(ipc::FD_CMD_FIFO), &[FdCommand::ForceRemoteDirCheck as u8])?;
                self.event(class, EventAction::RescanDirectory, alias, None);
            }
            _ => return Err(CtlError::Usage(format!("{:?} is not a directory command", verb))),
        }
        log_ctl_info!("Directory command done", dir = alias, verb = format!("{:?}", verb));
        Ok(())
    }

    fn global_verb(&self, verb: Verb) -> Result<()> {
        let (command, action) = match verb {
            Verb::StartAmg => (AfdCommand::StartAmg, EventAction::AmgStart),
            Verb::StopAmg => (AfdCommand::StopAmg, EventAction::AmgStop),
            Verb::StartFd => (AfdCommand::StartFd, EventAction::FdStart),
            Verb::StopFd => (AfdCommand::StopFd, EventAction::FdStop),
            Verb::Shutdown => (AfdCommand::Shutdown, EventAction::Shutdown),
            _ => return Err(CtlError::Usage(format!("{:?} needs a host or directory", verb))),
        };
        ipc::send_bytes(&self.fifo(ipc::AFD_CMD_FIFO), &[command as u8])?;
        self.event(EventClass::Glob, action, "", None);
        Ok(())
    }

    /// Replace real hostname `index` (0 or 1) of a host
    pub fn change_real_hostname(&self, alias: &str, index: usize, name: &str) -> Result<usize> {
        if !self.permissions.allows_command("change_real_hostname") {
            eprintln!("{} change the real hostname", crate::PERMISSION_DENIED_STR);
            return Ok(1);
        }
        let mut fsa = Fsa::attach(&self.work.fifo_dir().join(FSA_FILE))?;
        let pos = fsa.require(alias)?;
        let old = fsa.get(pos)?.real_hostname(index);
        if !fsa.set_real_hostname(pos, index, name)? {
            log_ctl_warn!("Real hostname truncated", host = alias, name = name);
        }
        self.event(
            EventClass::Host,
            EventAction::ChangeRealHostname,
            alias,
            Some(format!("{} -> {}", old, name)),
        );
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afd_config::testing::TestEnvironment;
    use afd_ipc::FifoReader;
    use afd_log::MemoryLogs;
    use afd_state::{FraRecord, FsaRecord};

    fn controller(env: &TestEnvironment, permissions: Permissions) -> (Controller, MemoryLogs) {
        let (sinks, logs) = LogSinks::memory();
        let ctl = Controller::new(env.layout(), "tester", sinks, permissions).with_grace(Duration::from_millis(200));
        (ctl, logs)
    }

    fn seed(env: &TestEnvironment) {
        let fifo_dir = env.layout().fifo_dir();
        let mut fsa = Fsa::open_or_create(&fifo_dir.join(FSA_FILE)).unwrap();
        let mut h2 = FsaRecord::new("h2", "one.example.org", 2);
        h2.set_toggle("[12]", "two.example.org");
        fsa.push(FsaRecord::new("h1", "h1.example.org", 2)).unwrap();
        fsa.push(h2).unwrap();
        let mut fra = Fra::open_or_create(&fifo_dir.join(FRA_FILE)).unwrap();
        fra.push(FraRecord::new("local", 1, "/in")).unwrap();
        fra.push(FraRecord::remote("site", 2, "ftp://site/out", "site")).unwrap();
    }

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_disable_host_notifies_fd_and_amg() {
        let env = TestEnvironment::new().unwrap();
        seed(&env);
        let fifo_dir = env.layout().fifo_dir();
        let mut fd_delete = FifoReader::open(&ipc::fifo_path(&fifo_dir, ipc::FD_DELETE_FIFO)).unwrap();
        let mut del_time = FifoReader::open(&ipc::fifo_path(&fifo_dir, ipc::DEL_TIME_JOB_FIFO)).unwrap();
        let (ctl, logs) = controller(&env, Permissions::all());

        assert_eq!(ctl.run(&[Verb::DisableHost], &s(&["h1"]), &[]).unwrap(), 0);

        let mut fsa = Fsa::attach(&fifo_dir.join(FSA_FILE)).unwrap();
        assert!(fsa.get(0).unwrap().is_disabled());
        assert_eq!(fd_delete.fill().unwrap(), 2 + "h1".len());
        assert_eq!(
            fd_delete.next_frame::<FdDeleteMessage>().unwrap(),
            Some(FdDeleteMessage::AllJobsFromHost("h1".into()))
        );
        del_time.fill().unwrap();
        assert_eq!(
            del_time.next_frame::<HostAliasMessage>().unwrap(),
            Some(HostAliasMessage("h1".into()))
        );
        let events = logs.event.records();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, EventAction::DisableHost);
        assert_eq!(events[0].user, "tester");
    }

    #[test]
    fn test_queue_and_transfer_bits() {
        let env = TestEnvironment::new().unwrap();
        seed(&env);
        let (ctl, logs) = controller(&env, Permissions::all());
        let hosts = s(&["h1"]);

        ctl.run(&[Verb::StopQueue, Verb::StopTransfer], &hosts, &[]).unwrap();
        let mut fsa = Fsa::attach(&env.layout().fifo_dir().join(FSA_FILE)).unwrap();
        let status = fsa.get(0).unwrap().host_status;
        assert_eq!(status & (PAUSE_QUEUE_STAT | STOP_TRANSFER_STAT), PAUSE_QUEUE_STAT | STOP_TRANSFER_STAT);

        // Already stopped: no second toggle, no second event.
        ctl.run(&[Verb::StopQueue], &hosts, &[]).unwrap();
        assert_eq!(logs.event.len(), 2);

        ctl.run(&[Verb::StartQueue, Verb::StartTransfer], &hosts, &[]).unwrap();
        assert_eq!(fsa.get(0).unwrap().host_status & (PAUSE_QUEUE_STAT | STOP_TRANSFER_STAT), 0);
        assert_eq!(logs.event.len(), 4);
    }

    #[test]
    fn test_switch_and_debug() {
        let env = TestEnvironment::new().unwrap();
        seed(&env);
        let (ctl, logs) = controller(&env, Permissions::all());

        // h1 has no toggle, h2 does
        assert_eq!(ctl.run(&[Verb::SwitchHost], &s(&["h1", "h2"]), &[]).unwrap(), 1);
        assert_eq!(ctl.run(&[Verb::DebugHost, Verb::DebugHost], &s(&["h2"]), &[]).unwrap(), 0);

        let actions: Vec<EventAction> = logs.event.records().iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![EventAction::SwitchHost, EventAction::EnableDebugHost, EventAction::EnableTraceHost]
        );
    }

    #[test]
    fn test_unknown_alias_counts_as_failure() {
        let env = TestEnvironment::new().unwrap();
        seed(&env);
        let (ctl, _logs) = controller(&env, Permissions::all());
        assert_eq!(ctl.run(&[Verb::RetryHost], &s(&["nope", "h1"]), &[]).unwrap(), 1);
    }

    #[test]
    fn test_rescan_sets_check_time_and_wakes_fd() {
        let env = TestEnvironment::new().unwrap();
        seed(&env);
        let fifo_dir = env.layout().fifo_dir();
        let mut fd_cmd = FifoReader::open(&ipc::fifo_path(&fifo_dir, ipc::FD_CMD_FIFO)).unwrap();
        let (ctl, _logs) = controller(&env, Permissions::all());

        let before = afd_log::now();
        ctl.run(&[Verb::RescanDirectory], &[], &s(&["site"])).unwrap();

        let mut fra = Fra::attach(&fifo_dir.join(FRA_FILE)).unwrap();
        assert!(fra.get(1).unwrap().next_check_time >= before);
        fd_cmd.fill().unwrap();
        assert_eq!(fd_cmd.next_byte(), Some(FdCommand::ForceRemoteDirCheck as u8));
    }

    #[test]
    fn test_global_command_byte() {
        let env = TestEnvironment::new().unwrap();
        let fifo_dir = env.layout().fifo_dir();
        let mut afd_cmd = FifoReader::open(&ipc::fifo_path(&fifo_dir, ipc::AFD_CMD_FIFO)).unwrap();
        let (ctl, logs) = controller(&env, Permissions::all());

        assert_eq!(ctl.run(&[Verb::StopAmg], &[], &[]).unwrap(), 0);
        afd_cmd.fill().unwrap();
        assert_eq!(afd_cmd.next_byte(), Some(AfdCommand::StopAmg as u8));
        assert_eq!(logs.event.records()[0].class, EventClass::Glob);
    }

    #[test]
    fn test_change_real_hostname() {
        let env = TestEnvironment::new().unwrap();
        seed(&env);
        let (ctl, logs) = controller(&env, Permissions::all());
        assert_eq!(ctl.change_real_hostname("h1", 0, "new.example.org").unwrap(), 0);

        let mut fsa = Fsa::attach(&env.layout().fifo_dir().join(FSA_FILE)).unwrap();
        assert_eq!(fsa.get(0).unwrap().real_hostname(0), "new.example.org");
        assert_eq!(logs.event.records()[0].info, "h1.example.org -> new.example.org");
    }
}

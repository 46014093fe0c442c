//! The AMG daemon loop.
//!
//! ```text
//!   poll(DC_CMD_FIFO, DEL_TIME_JOB_FIFO, rescan_interval)
//!        │
//!        ├─ DEL_TIME_JOB  host_alias\0 ──► drop that host's pool batches
//!        ├─ DC_CMD        opcode       ──► rescan / reload rules
//!        ▼
//!   files/pool/<job>/<ct>_<un>_<sjc>/  ──► Pipeline::run (scheduler)
//!        │
//!        ▼
//!   files/outgoing/<job>/<ct>_<un>_<sjc>/ + FdMessage on MSG_FIFO
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use afd_config::{log_amg_debug, log_amg_error, log_amg_info, log_amg_warn, Config, WorkDir};
use afd_ipc::{DcCommand, FdMessage, FifoReader, HostAliasMessage};
use afd_log::{DeleteReason, LogSinks};
use afd_state::active::{ActiveFile, ProcessSlot, AFD_ACTIVE_FILE};
use afd_state::dnb::{Dnb, DIR_NAME_FILE};
use afd_state::jid::{Jid, JOB_ID_DATA_FILE};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use walkdir::WalkDir;

use crate::batch::{list_dir, Batch};
use crate::pipeline::{JobContext, Pipeline, PipelineOutcome};
use crate::rules::RuleSet;
use crate::scheduler::Scheduler;
use crate::{AmgError, Result};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Install SIGINT/SIGTERM handlers that ask the loop to stop
pub fn install_signal_handlers() -> Result<()> {
    let action = SigAction::new(SigHandler::Handler(on_signal), SaFlags::empty(), SigSet::empty());
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores to an atomic.
        unsafe { signal::sigaction(sig, &action) }.map_err(afd_ipc::IpcError::from)?;
    }
    Ok(())
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

/// A prepared batch directory waiting in the pool
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PendingBatch {
    pub creation_time: i64,
    pub unique_number: u32,
    pub split_job_counter: u32,
    pub job_id: u32,
    pub dir: PathBuf,
}

impl PendingBatch {
    /// Parse `<job>/<ct>_<un>_<sjc>` (all hex)
    pub fn from_dir(dir: &Path) -> Option<Self> {
        let batch_name = dir.file_name()?.to_str()?;
        let job_name = dir.parent()?.file_name()?.to_str()?;
        let job_id = u32::from_str_radix(job_name, 16).ok()?;
        let mut parts = batch_name.split('_');
        let creation_time = i64::from_str_radix(parts.next()?, 16).ok()?;
        let unique_number = u32::from_str_radix(parts.next()?, 16).ok()?;
        let split_job_counter = u32::from_str_radix(parts.next()?, 16).ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            creation_time,
            unique_number,
            split_job_counter,
            job_id,
            dir: dir.to_path_buf(),
        })
    }

    pub fn batch_id(&self) -> String {
        afd_log::batch_id(self.creation_time, self.unique_number, self.split_job_counter)
    }
}

/// Every well-formed batch below `pool_dir`, oldest first
pub fn pending_batches(pool_dir: &Path) -> Vec<PendingBatch> {
    let mut batches: Vec<PendingBatch> = WalkDir::new(pool_dir)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .filter_map(|entry| {
            let batch = PendingBatch::from_dir(entry.path());
            if batch.is_none() {
                log_amg_debug!("Ignoring pool entry", path = entry.path().display().to_string());
            }
            batch
        })
        .collect();
    batches.sort();
    batches
}

/// A batch with its job resolved, ready for the pipeline
struct Work {
    pending: PendingBatch,
    ctx: JobContext,
    options: Vec<String>,
}

/// Outcome of one batch handed to the scheduler
#[derive(Debug)]
pub struct BatchResult {
    pub job_id: u32,
    pub outcome: PipelineOutcome,
    /// Set when the batch went to outgoing
    pub message: Option<FdMessage>,
}

pub struct Daemon {
    config: Config,
    work: WorkDir,
    pipeline: Pipeline,
    scheduler: Scheduler,
    rules: RuleSet,
    dc_cmd: FifoReader,
    del_time_job: FifoReader,
    msg_fifo: PathBuf,
}

impl Daemon {
    /// Create the fifos and open the log sinks for `config`'s work directory
    pub fn new(config: Config) -> Result<Self> {
        let logs = LogSinks::files(&config.work_dir().log_dir(), &config.log)?;
        Self::with_logs(config, logs)
    }

    pub fn with_logs(config: Config, logs: LogSinks) -> Result<Self> {
        let work = config.work_dir();
        work.ensure_layout()?;
        let fifo_dir = work.fifo_dir();
        afd_ipc::create_core_fifos(&fifo_dir)?;

        let rules = RuleSet::load(&work.rename_rule_file())?;
        let pipeline = Pipeline::new(work.clone(), config.exec.clone(), Arc::new(rules.clone()), logs);
        let scheduler = Scheduler::new(config.amg.scheduling, config.amg.pool_threads);

        Ok(Self {
            dc_cmd: FifoReader::open(&afd_ipc::fifo_path(&fifo_dir, afd_ipc::DC_CMD_FIFO))?,
            del_time_job: FifoReader::open(&afd_ipc::fifo_path(&fifo_dir, afd_ipc::DEL_TIME_JOB_FIFO))?,
            msg_fifo: afd_ipc::fifo_path(&fifo_dir, afd_ipc::MSG_FIFO),
            config,
            work,
            pipeline,
            scheduler,
            rules,
        })
    }

    pub fn work(&self) -> &WorkDir {
        &self.work
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Run until SIGINT/SIGTERM
    pub fn run(&mut self) -> Result<()> {
        self.register_pid(nix::unistd::getpid().as_raw());
        log_amg_info!(
            "AMG started",
            work_dir = self.work.root().display().to_string(),
            scheduler = format!("{:?}", self.scheduler)
        );

        let interval = Duration::from_millis(self.config.amg.rescan_interval_ms.max(1));
        while !shutdown_requested() {
            let fds = [self.dc_cmd.raw_fd(), self.del_time_job.raw_fd()];
            let ready = afd_ipc::poll_readable(&fds, interval)?;
            if ready.contains(&1) {
                self.handle_del_time_job()?;
            }
            if ready.contains(&0) {
                self.handle_dc_commands()?;
            }
            if let Err(e) = self.reload_rules(false) {
                log_amg_warn!("Cannot reload rename rules", error = e.to_string());
            }
            if let Err(e) = self.process_pending() {
                log_amg_error!("Batch scan failed", error = e.to_string());
            }
        }

        log_amg_info!("AMG stopping");
        self.register_pid(0);
        Ok(())
    }

    fn register_pid(&self, pid: i32) {
        let path = self.work.fifo_dir().join(AFD_ACTIVE_FILE);
        if !path.exists() {
            return;
        }
        if let Err(e) = ActiveFile::open(&path).and_then(|mut active| active.set_pid(ProcessSlot::Amg, pid)) {
            log_amg_warn!("Cannot update AFD_ACTIVE", error = e.to_string());
        }
    }

    /// Re-read the rule file if it changed, or unconditionally with `force`
    pub fn reload_rules(&mut self, force: bool) -> Result<bool> {
        let changed = if force {
            self.rules = RuleSet::load(&self.work.rename_rule_file())?;
            true
        } else {
            self.rules.reload_if_changed()?
        };
        if changed {
            self.pipeline.set_rules(Arc::new(self.rules.clone()));
        }
        Ok(changed)
    }

    fn handle_dc_commands(&mut self) -> Result<()> {
        self.dc_cmd.fill()?;
        while let Some(byte) = self.dc_cmd.next_byte() {
            match DcCommand::from_byte(byte) {
                Ok(DcCommand::CheckFileDir) => log_amg_debug!("Rescan requested"),
                Ok(DcCommand::RereadLocInterfaceFile) => {
                    self.reload_rules(true)?;
                    log_amg_info!("Rename rules re-read on request", rules = self.rules.len());
                }
                Ok(other) => log_amg_debug!("Command ignored", command = format!("{:?}", other)),
                Err(e) => log_amg_warn!("Bad command on DC_CMD_FIFO", error = e.to_string()),
            }
        }
        Ok(())
    }

    fn handle_del_time_job(&mut self) -> Result<()> {
        self.del_time_job.fill()?;
        while let Some(HostAliasMessage(alias)) = self.del_time_job.next_frame()? {
            let removed = self.delete_host_batches(&alias)?;
            log_amg_info!("Deleted pending batches", host = alias.as_str(), batches = removed);
        }
        Ok(())
    }

    fn attach_jid(&self) -> Option<Jid> {
        let path = self.work.fifo_dir().join(JOB_ID_DATA_FILE);
        match Jid::attach(&path) {
            Ok(jid) => Some(jid),
            Err(e) => {
                log_amg_debug!("No job database yet", error = e.to_string());
                None
            }
        }
    }

    /// Remove every pool batch whose job is bound to `host_alias`; returns
    /// the number of batches removed
    pub fn delete_host_batches(&self, host_alias: &str) -> Result<usize> {
        let Some(mut jid) = self.attach_jid() else {
            return Ok(0);
        };
        let mut removed = 0;
        for pending in pending_batches(&self.work.pool_dir()) {
            let Some(job) = jid.lookup(pending.job_id) else {
                continue;
            };
            if job.host_alias() != host_alias {
                continue;
            }
            let ctx = job_context(&pending, job, String::new());
            for (name, size) in list_dir(&pending.dir)? {
                self.pipeline.logs().delete(&ctx.delete_record(
                    DeleteReason::DelTimeJob,
                    &name,
                    size,
                    String::new(),
                ));
            }
            fs::remove_dir_all(&pending.dir)?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Run the pipeline on every pending batch and hand the results to FD
    pub fn process_pending(&self) -> Result<Vec<BatchResult>> {
        let pending = pending_batches(&self.work.pool_dir());
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        let Some(mut jid) = self.attach_jid() else {
            return Ok(Vec::new());
        };
        let mut dnb = Dnb::attach(&self.work.fifo_dir().join(DIR_NAME_FILE)).ok();

        let mut work = Vec::with_capacity(pending.len());
        for batch in pending {
            match jid.lookup(batch.job_id) {
                Some(job) => {
                    let dir_url = dnb.as_mut().and_then(|d| d.name_of(job.dir_id)).unwrap_or_default();
                    work.push(Work {
                        ctx: job_context(&batch, job, dir_url),
                        options: job.loptions(),
                        pending: batch,
                    });
                }
                None => {
                    log_amg_warn!(
                        "No job for batch, removed",
                        job_id = batch.job_id,
                        dir = batch.dir.display().to_string()
                    );
                    fs::remove_dir_all(&batch.dir)?;
                }
            }
        }
        drop(jid);

        let results = self.scheduler.run(work, |w| self.process_one(w));
        let mut done = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(result) => {
                    if let Some(message) = &result.message {
                        afd_ipc::send(&self.msg_fifo, message)?;
                    }
                    done.push(result);
                }
                Err(e) => log_amg_error!("Batch failed", error = e.to_string()),
            }
        }
        Ok(done)
    }

    fn process_one(&self, w: Work) -> Result<BatchResult> {
        let mut batch = Batch::scan(&w.pending.dir)?;
        let outcome = self.pipeline.run(&w.ctx, &w.options, &mut batch);
        log_amg_debug!(
            "Batch done",
            job_id = w.ctx.job_id,
            files = outcome.files_to_send,
            bytes = outcome.file_size,
            failures = outcome.failures
        );

        if batch.is_empty() {
            fs::remove_dir_all(&w.pending.dir)?;
            return Ok(BatchResult {
                job_id: w.ctx.job_id,
                outcome,
                message: None,
            });
        }

        let target = self
            .work
            .outgoing_dir()
            .join(format!("{:x}", w.ctx.job_id))
            .join(w.pending.batch_id());
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&w.pending.dir, &target).map_err(|e| {
            log_amg_error!(
                "Cannot move batch to outgoing",
                dir = w.pending.dir.display().to_string(),
                error = e.to_string()
            );
            AmgError::BatchDir(w.pending.dir.clone())
        })?;

        Ok(BatchResult {
            job_id: w.ctx.job_id,
            outcome,
            message: Some(FdMessage {
                creation_time: w.ctx.creation_time,
                file_size: outcome.file_size,
                job_id: w.ctx.job_id,
                split_job_counter: w.ctx.split_job_counter,
                files_to_send: outcome.files_to_send,
                dir_no: w.ctx.dir_id,
                unique_number: w.ctx.unique_number,
                priority: w.ctx.priority,
                originator: 0,
            }),
        })
    }
}

fn job_context(pending: &PendingBatch, job: &afd_state::jid::JobIdData, dir_url: String) -> JobContext {
    JobContext {
        job_id: pending.job_id,
        dir_id: job.dir_id,
        host_alias: job.host_alias(),
        priority: job.priority,
        creation_time: pending.creation_time,
        unique_number: pending.unique_number,
        split_job_counter: pending.split_job_counter,
        dir_url,
    }
}

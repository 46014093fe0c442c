//! The option pipeline.
//!
//! ```text
//!   READY ── parse ──► PARSED ── unknown ──► warn, next option
//!                        │
//!                        ▼ valid
//!                     RUNNING ── per-file failure ──► log, continue
//!                        │
//!                        ▼
//!                  SYNC_BUFFERS (recount) ──► READY
//! ```
//!
//! Every option mutates the batch directory and the name/size buffers.
//! After each option the buffers are resynchronised with the directory,
//! because an `exec` command may have created or removed files.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use afd_config::{log_amg_debug, log_amg_error, log_amg_warn, ExecConfig, WorkDir};
use afd_log::{DeleteReason, DeleteRecord, LogSinks, ProductionRecord};

use crate::batch::Batch;
use crate::options::LocalOption;
use crate::rules::RuleSet;
use crate::{assemble, convert, exec, extract, formats, rename, AmgError, Result};

/// Identity of the batch being processed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobContext {
    pub job_id: u32,
    pub dir_id: u32,
    pub host_alias: String,
    /// `'0'..='9'`, `'a'..='z'`
    pub priority: u8,
    pub creation_time: i64,
    pub unique_number: u32,
    pub split_job_counter: u32,
    /// Source directory URL, used by `with_path`
    pub dir_url: String,
}

impl JobContext {
    /// Production record template carrying this batch's identity
    pub fn production_record(&self, option: &str) -> ProductionRecord {
        ProductionRecord {
            creation_time: self.creation_time,
            in_count: 1,
            out_count: 1,
            unique_number: self.unique_number,
            split_job_counter: self.split_job_counter,
            job_id: self.job_id,
            dir_id: self.dir_id,
            wall_seconds: 0.0,
            cpu_sec: 0,
            cpu_usec: 0,
            in_name: String::new(),
            in_size: 0,
            out_name: String::new(),
            out_size: 0,
            return_code: 0,
            option: option.to_string(),
        }
    }

    pub fn delete_record(
        &self,
        reason: DeleteReason,
        file_name: &str,
        file_size: i64,
        info: impl Into<String>,
    ) -> DeleteRecord {
        DeleteRecord {
            time: afd_log::now(),
            reason,
            host_alias: self.host_alias.clone(),
            file_name: file_name.to_string(),
            file_size,
            job_id: self.job_id,
            dir_id: self.dir_id,
            creation_time: self.creation_time,
            unique_number: self.unique_number,
            split_job_counter: self.split_job_counter,
            origin: "amg",
            info: info.into(),
        }
    }
}

/// What one option did to the batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptionReport {
    /// Files the option could not handle
    pub failures: usize,
    /// The batch must not be processed further
    pub abort: bool,
}

/// Result of running all options of a job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub files_to_send: u32,
    pub file_size: i64,
    /// Options skipped with a warning
    pub skipped: usize,
    pub failures: usize,
    pub aborted: bool,
}

/// Per-worker option runner
#[derive(Clone)]
pub struct Pipeline {
    work: WorkDir,
    exec: ExecConfig,
    rules: Arc<RuleSet>,
    logs: LogSinks,
}

impl Pipeline {
    pub fn new(work: WorkDir, exec: ExecConfig, rules: Arc<RuleSet>, logs: LogSinks) -> Self {
        Self {
            work,
            exec,
            rules,
            logs,
        }
    }

    pub fn work(&self) -> &WorkDir {
        &self.work
    }

    pub fn exec_config(&self) -> &ExecConfig {
        &self.exec
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn set_rules(&mut self, rules: Arc<RuleSet>) {
        self.rules = rules;
    }

    pub fn logs(&self) -> &LogSinks {
        &self.logs
    }

    /// Run `options` in order against `batch`
    pub fn run(&self, ctx: &JobContext, options: &[String], batch: &mut Batch) -> PipelineOutcome {
        let mut outcome = PipelineOutcome::default();

        for raw in options {
            if batch.is_empty() {
                log_amg_debug!("Batch empty, remaining options skipped", job_id = ctx.job_id);
                break;
            }
            let option = match LocalOption::parse(raw) {
                Ok(option) => option,
                Err(e) => {
                    log_amg_warn!("Option skipped", job_id = ctx.job_id, error = e.to_string());
                    outcome.skipped += 1;
                    continue;
                }
            };

            let started = Instant::now();
            match self.apply(ctx, &option, raw.trim(), batch) {
                Ok(report) => {
                    outcome.failures += report.failures;
                    outcome.aborted |= report.abort;
                }
                Err(e) => {
                    log_amg_warn!(
                        "Option failed",
                        job_id = ctx.job_id,
                        option = raw.as_str(),
                        error = e.to_string()
                    );
                    outcome.skipped += 1;
                }
            }
            log_amg_debug!(
                "Option done",
                job_id = ctx.job_id,
                option = option.keyword(),
                files = batch.len(),
                elapsed_ms = started.elapsed().as_millis() as u64
            );

            if let Err(e) = batch.recount() {
                log_amg_error!(
                    "Cannot rescan batch directory",
                    dir = batch.dir().display().to_string(),
                    error = e.to_string()
                );
                batch.clear();
                outcome.aborted = true;
            }
            if outcome.aborted {
                batch.clear();
                break;
            }
        }

        outcome.files_to_send = batch.files_to_send();
        outcome.file_size = batch.file_size();
        outcome
    }

    fn apply(
        &self,
        ctx: &JobContext,
        option: &LocalOption,
        raw: &str,
        batch: &mut Batch,
    ) -> Result<OptionReport> {
        match option {
            LocalOption::Rename { rule, flags } => {
                let rule = self
                    .rules
                    .by_name(rule)
                    .ok_or_else(|| AmgError::parse(raw, format!("no rename rule `{}`", rule)))?;
                if rule.filters.is_empty() {
                    return Err(AmgError::parse(raw, "rename rule has no filters"));
                }
                rename::rename_by_rule(self, ctx, batch, rule, *flags, raw)
            }
            LocalOption::SRename {
                filter,
                rename_to,
                flags,
            } => rename::srename(self, ctx, batch, filter, rename_to, *flags, raw),
            LocalOption::Exec(spec) => exec::run(self, ctx, batch, spec, raw),
            LocalOption::Basename { overwrite } => rename::basename(self, ctx, batch, *overwrite, raw),
            LocalOption::Extension { overwrite } => {
                rename::extension(self, ctx, batch, *overwrite, raw)
            }
            LocalOption::Prefix { action, prefix } => {
                rename::prefix(self, ctx, batch, *action, prefix, raw)
            }
            LocalOption::ToUpper => rename::case_fold(self, ctx, batch, true, raw),
            LocalOption::ToLower => rename::case_fold(self, ctx, batch, false, raw),
            LocalOption::Lchmod(mode) => rename::lchmod(batch, *mode),
            LocalOption::Format(conversion) => formats::run(self, ctx, batch, conversion, raw),
            LocalOption::Extract(spec) => extract::run(self, ctx, batch, spec, raw),
            LocalOption::Assemble(spec) => assemble::run(self, ctx, batch, spec, raw),
            LocalOption::Convert(spec) => convert::run(self, ctx, batch, spec, raw),
        }
    }

    /// Unlink one batch file and write a delete record for it
    pub(crate) fn discard(
        &self,
        ctx: &JobContext,
        dir: &Path,
        name: &str,
        size: i64,
        reason: DeleteReason,
        info: &str,
    ) {
        if let Err(e) = std::fs::remove_file(dir.join(name)) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log_amg_warn!("Failed to remove file", file = name, error = e.to_string());
                return;
            }
        }
        self.logs.delete(&ctx.delete_record(reason, name, size, info));
    }
}

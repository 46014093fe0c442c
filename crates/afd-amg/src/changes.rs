//! Production records for commands that change the batch behind our back.
//!
//! An `exec` command may delete, create or rewrite any file of the batch
//! directory. The directory is listed before the command runs and
//! compared with a fresh listing afterwards.

use std::path::Path;

use afd_log::{LogSinks, ProductionRecord};

use crate::batch::list_dir;
use crate::pipeline::JobContext;
use crate::Result;

/// Resource usage and outcome of one command run
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunStats {
    pub return_code: i32,
    pub wall_seconds: f64,
    pub cpu_sec: i64,
    pub cpu_usec: i64,
}

/// Difference between two directory listings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    pub vanished: Vec<(String, i64)>,
    pub appeared: Vec<(String, i64)>,
    /// Same name, new size: `(name, old_size, new_size)`
    pub rewritten: Vec<(String, i64, i64)>,
}

impl Changes {
    pub fn between(before: &[(String, i64)], after: &[(String, i64)]) -> Self {
        let mut changes = Changes::default();
        for (name, size) in before {
            match after.iter().find(|(n, _)| n == name) {
                None => changes.vanished.push((name.clone(), *size)),
                Some((_, new_size)) if new_size != size => {
                    changes.rewritten.push((name.clone(), *size, *new_size))
                }
                Some(_) => {}
            }
        }
        for (name, size) in after {
            if !before.iter().any(|(n, _)| n == name) {
                changes.appeared.push((name.clone(), *size));
            }
        }
        changes
    }

    pub fn is_empty(&self) -> bool {
        self.vanished.is_empty() && self.appeared.is_empty() && self.rewritten.is_empty()
    }
}

/// Compare `dir` with `before` and write one production record per
/// (vanished, appeared) pair. When nothing changed, one record for
/// `subject` carries the return code. Returns the new listing.
pub fn check_changes(
    logs: &LogSinks,
    ctx: &JobContext,
    dir: &Path,
    before: &[(String, i64)],
    subject: Option<(&str, i64)>,
    stats: &RunStats,
    option: &str,
) -> Result<Vec<(String, i64)>> {
    let after = list_dir(dir)?;
    let changes = Changes::between(before, &after);

    let base = ProductionRecord {
        in_count: changes.vanished.len() as u32,
        out_count: changes.appeared.len() as u32,
        wall_seconds: stats.wall_seconds,
        cpu_sec: stats.cpu_sec,
        cpu_usec: stats.cpu_usec,
        return_code: stats.return_code,
        ..ctx.production_record(option)
    };

    if changes.is_empty() {
        let (name, size) = subject.unwrap_or(("", 0));
        logs.production(&ProductionRecord {
            in_count: 1,
            out_count: 1,
            in_name: name.to_string(),
            in_size: size,
            out_name: name.to_string(),
            out_size: size,
            ..base
        });
        return Ok(after);
    }

    let pairs = changes.vanished.len().max(changes.appeared.len());
    for i in 0..pairs {
        let (in_name, in_size) = changes.vanished.get(i).cloned().unwrap_or_default();
        let (out_name, out_size) = changes.appeared.get(i).cloned().unwrap_or_default();
        logs.production(&ProductionRecord {
            in_name,
            in_size,
            out_name,
            out_size,
            ..base.clone()
        });
    }
    for (name, old, new) in &changes.rewritten {
        logs.production(&ProductionRecord {
            in_count: 1,
            out_count: 1,
            in_name: name.clone(),
            in_size: *old,
            out_name: name.clone(),
            out_size: *new,
            ..base.clone()
        });
    }
    Ok(after)
}

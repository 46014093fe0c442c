//! Name rewriting options: `rename`, `srename`, `basename`, `extension`,
//! `prefix`, `toupper`, `tolower`, plus `lchmod`.
//!
//! All renames go through one engine. New names are first recorded in
//! shadow copies of the name/size buffers; `cleanup_rename_ow` then drops
//! entries evicted by an overwrite and installs the shadow buffers, so the
//! batch count changes exactly once per option.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use afd_config::log_amg_warn;
use afd_log::{DeleteReason, ProductionRecord};

use crate::batch::Batch;
use crate::naming::{change_name, NameContext, RENAME_COUNTER};
use crate::options::{PrefixAction, RenameFlags};
use crate::pipeline::{JobContext, OptionReport, Pipeline};
use crate::pmatch::Filter;
use crate::rules::Rule;
use crate::{Result, MAX_COLLISION_SUFFIX, MAX_FILENAME_LENGTH};

/// First free `<target>-N` for entry `me`, N counting up from 0.
///
/// Entry `me` already carrying a candidate counts as free.
fn free_name(shadow: &[String], dir: &Path, me: usize, target: &str) -> Option<String> {
    (0..=MAX_COLLISION_SUFFIX)
        .map(|n| format!("{}-{}", target, n))
        .find(|candidate| {
            if shadow[me] == *candidate {
                return true;
            }
            !shadow.iter().any(|s| s == candidate) && !dir.join(candidate).exists()
        })
}

/// Install the shadow buffers, dropping entries evicted by an overwrite
fn cleanup_rename_ow(batch: &mut Batch, names: Vec<String>, sizes: Vec<i64>) {
    let (names, sizes): (Vec<_>, Vec<_>) = names
        .into_iter()
        .zip(sizes)
        .filter(|(name, _)| !name.is_empty())
        .unzip();
    batch.replace(names, sizes);
}

/// Rename every batch file through `new_name`.
///
/// `new_name` returns `None` to leave a file alone. Without `overwrite` a
/// target that is taken gets a `-N` suffix; with it, the file holding the
/// target is evicted and logged.
pub(crate) fn rename_batch<F>(
    p: &Pipeline,
    ctx: &JobContext,
    batch: &mut Batch,
    overwrite: bool,
    option: &str,
    mut new_name: F,
) -> Result<OptionReport>
where
    F: FnMut(&str) -> Result<Option<String>>,
{
    let dir = batch.dir().to_path_buf();
    let mut names = batch.names().to_vec();
    let sizes = batch.sizes().to_vec();
    let mut report = OptionReport::default();

    for i in 0..names.len() {
        if names[i].is_empty() {
            continue;
        }
        let old = names[i].clone();
        let Some(mut target) = new_name(&old)? else {
            continue;
        };
        if target.is_empty() || target == old {
            continue;
        }
        if target.contains('/') {
            log_amg_warn!("Rename target contains a slash", file = old.as_str(), target = target.as_str());
            report.failures += 1;
            continue;
        }

        let holder = names.iter().position(|n| *n == target);
        if overwrite {
            if let Some(j) = holder {
                p.logs().delete(&ctx.delete_record(
                    DeleteReason::RenameOverwrite,
                    &names[j],
                    sizes[j],
                    format!("overwritten by {}", old),
                ));
                names[j].clear();
            }
        } else if holder.is_some() || dir.join(&target).exists() {
            match free_name(&names, &dir, i, &target) {
                Some(free) => target = free,
                None => {
                    log_amg_warn!("No free name left", file = old.as_str(), target = target.as_str());
                    report.failures += 1;
                    continue;
                }
            }
            if target == old {
                continue;
            }
        }

        if let Err(e) = fs::rename(dir.join(&old), dir.join(&target)) {
            log_amg_warn!("Rename failed", file = old.as_str(), target = target.as_str(), error = e.to_string());
            report.failures += 1;
            continue;
        }
        p.logs().production(&ProductionRecord {
            in_name: old,
            in_size: sizes[i],
            out_name: target.clone(),
            out_size: sizes[i],
            ..ctx.production_record(option)
        });
        names[i] = target;
    }

    cleanup_rename_ow(batch, names, sizes);
    Ok(report)
}

fn with_path(ctx: &JobContext, flags: RenameFlags, name: &str) -> String {
    if flags.with_path {
        format!("{}/{}", ctx.dir_url.trim_end_matches('/'), name)
    } else {
        name.to_string()
    }
}

pub(crate) fn rename_by_rule(
    p: &Pipeline,
    ctx: &JobContext,
    batch: &mut Batch,
    rule: &Rule,
    flags: RenameFlags,
    option: &str,
) -> Result<OptionReport> {
    let fifo_dir = p.work().fifo_dir();
    let names = NameContext::new(&fifo_dir, ctx.job_id, RENAME_COUNTER);
    rename_batch(p, ctx, batch, flags.overwrite, option, |file| {
        let subject = with_path(ctx, flags, file);
        match rule.find(&subject) {
            Some(k) => change_name(&subject, &rule.filters[k], &rule.rename_to[k], &names),
            None => Ok(None),
        }
    })
}

pub(crate) fn srename(
    p: &Pipeline,
    ctx: &JobContext,
    batch: &mut Batch,
    filter: &str,
    rename_to: &str,
    flags: RenameFlags,
    option: &str,
) -> Result<OptionReport> {
    let filter = Filter::parse(filter);
    let fifo_dir = p.work().fifo_dir();
    let names = NameContext::new(&fifo_dir, ctx.job_id, RENAME_COUNTER);
    rename_batch(p, ctx, batch, flags.overwrite, option, |file| {
        change_name(&with_path(ctx, flags, file), &filter, rename_to, &names)
    })
}

pub(crate) fn basename(
    p: &Pipeline,
    ctx: &JobContext,
    batch: &mut Batch,
    overwrite: bool,
    option: &str,
) -> Result<OptionReport> {
    rename_batch(p, ctx, batch, overwrite, option, |file| {
        Ok(file.find('.').filter(|&i| i > 0).map(|i| file[..i].to_string()))
    })
}

pub(crate) fn extension(
    p: &Pipeline,
    ctx: &JobContext,
    batch: &mut Batch,
    overwrite: bool,
    option: &str,
) -> Result<OptionReport> {
    rename_batch(p, ctx, batch, overwrite, option, |file| {
        Ok(file.rfind('.').filter(|&i| i > 0).map(|i| file[..i].to_string()))
    })
}

pub(crate) fn prefix(
    p: &Pipeline,
    ctx: &JobContext,
    batch: &mut Batch,
    action: PrefixAction,
    prefix: &str,
    option: &str,
) -> Result<OptionReport> {
    rename_batch(p, ctx, batch, false, option, |file| {
        Ok(match action {
            PrefixAction::Add => Some(format!("{}{}", prefix, file)),
            PrefixAction::Del => file
                .strip_prefix(prefix)
                .filter(|rest| !rest.is_empty())
                .map(str::to_string),
        })
    })
}

/// Target of every entry under a case fold, plus the entries left alone
/// for want of a free name.
///
/// Names that fold to the same text are served in byte order of their
/// current names: the first takes the folded name, the others the next
/// free `-N` suffixes. The order does not depend on the fold direction, so
/// `toupper` then `tolower` hands out names exactly as `tolower` does.
fn fold_targets(dir: &Path, names: &[String], upper: bool) -> (Vec<Option<String>>, usize) {
    let folded: Vec<String> = names
        .iter()
        .map(|n| {
            if upper {
                n.to_ascii_uppercase()
            } else {
                n.to_ascii_lowercase()
            }
        })
        .collect();
    let mut order: Vec<usize> = (0..names.len()).collect();
    order.sort_by(|&a, &b| names[a].cmp(&names[b]));

    let mut targets: Vec<Option<String>> = vec![None; names.len()];
    let mut first_of: HashMap<&str, usize> = HashMap::new();
    let mut taken: HashSet<String> = HashSet::new();
    for &i in &order {
        if !first_of.contains_key(folded[i].as_str()) {
            first_of.insert(folded[i].as_str(), i);
            taken.insert(folded[i].clone());
            targets[i] = Some(folded[i].clone());
        }
    }

    let in_batch: HashSet<&str> = names.iter().map(String::as_str).collect();
    let mut stuck = 0;
    for &i in &order {
        if targets[i].is_some() {
            continue;
        }
        let free = (0..=MAX_COLLISION_SUFFIX)
            .map(|n| format!("{}-{}", folded[i], n))
            .find(|c| {
                c.len() < MAX_FILENAME_LENGTH
                    && !taken.contains(c)
                    && (in_batch.contains(c.as_str()) || !dir.join(c).exists())
            });
        match free {
            Some(name) => {
                taken.insert(name.clone());
                targets[i] = Some(name);
            }
            None => {
                stuck += 1;
                // Stays put; its name may be the folded one, so the group
                // leader stays put too.
                if names[i] == folded[i] {
                    if let Some(&f) = first_of.get(folded[i].as_str()) {
                        targets[f] = None;
                    }
                }
            }
        }
    }
    (targets, stuck)
}

pub(crate) fn case_fold(
    p: &Pipeline,
    ctx: &JobContext,
    batch: &mut Batch,
    upper: bool,
    option: &str,
) -> Result<OptionReport> {
    let dir = batch.dir().to_path_buf();
    let names = batch.names().to_vec();
    let sizes = batch.sizes().to_vec();
    let (targets, stuck) = fold_targets(&dir, &names, upper);
    let mut report = OptionReport {
        failures: stuck,
        ..Default::default()
    };
    if stuck > 0 {
        log_amg_warn!("No free name left", option = option, files = stuck);
    }

    let moves: Vec<usize> = (0..names.len())
        .filter(|&i| matches!(&targets[i], Some(t) if *t != names[i]))
        .collect();
    let parked = |i: usize| format!(".{:x}.{}.fold", std::process::id(), i);
    let mut new_names = names.clone();

    // Every mover is parked first: a folded name may still be held by a
    // file that is about to move away.
    for (k, &i) in moves.iter().enumerate() {
        if let Err(e) = fs::rename(dir.join(&names[i]), dir.join(parked(i))) {
            log_amg_warn!("Rename failed", file = names[i].as_str(), error = e.to_string());
            report.failures += 1;
            for &j in moves[..k].iter().rev() {
                if let Err(e) = fs::rename(dir.join(parked(j)), dir.join(&names[j])) {
                    log_amg_warn!("Cannot restore file", file = names[j].as_str(), error = e.to_string());
                    new_names[j] = parked(j);
                }
            }
            batch.replace(new_names, sizes);
            return Ok(report);
        }
    }

    for &i in &moves {
        let Some(target) = targets[i].as_deref() else {
            continue;
        };
        if let Err(e) = fs::rename(dir.join(parked(i)), dir.join(target)) {
            log_amg_warn!("Rename failed", file = names[i].as_str(), target = target, error = e.to_string());
            report.failures += 1;
            new_names[i] = parked(i);
            continue;
        }
        p.logs().production(&ProductionRecord {
            in_name: names[i].clone(),
            in_size: sizes[i],
            out_name: target.to_string(),
            out_size: sizes[i],
            ..ctx.production_record(option)
        });
        new_names[i] = target.to_string();
    }

    batch.replace(new_names, sizes);
    Ok(report)
}

pub(crate) fn lchmod(batch: &Batch, mode: u32) -> Result<OptionReport> {
    let mut report = OptionReport::default();
    for i in 0..batch.len() {
        let path = batch.path_of(i);
        if let Err(e) = fs::set_permissions(&path, fs::Permissions::from_mode(mode)) {
            log_amg_warn!("chmod failed", file = batch.name(i), mode = mode, error = e.to_string());
            report.failures += 1;
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use afd_config::testing::TestEnvironment;
    use afd_log::{LogSinks, MemoryLogs};
    use std::sync::Arc;

    fn setup(files: &[(&str, &[u8])]) -> (TestEnvironment, Pipeline, MemoryLogs, Batch) {
        let env = TestEnvironment::new().unwrap();
        let (sinks, logs) = LogSinks::memory();
        let p = Pipeline::new(
            env.layout(),
            Default::default(),
            Arc::new(crate::rules::RuleSet::default()),
            sinks,
        );
        let dir = env.create_batch("r", files).unwrap();
        let batch = Batch::scan(&dir).unwrap();
        (env, p, logs, batch)
    }

    #[test]
    fn test_free_name_counts_up() {
        let temp = tempfile::tempdir().unwrap();
        let shadow: Vec<String> = ["out", "out-0", "x"].iter().map(|s| s.to_string()).collect();
        assert_eq!(free_name(&shadow, temp.path(), 2, "out").as_deref(), Some("out-1"));
        assert_eq!(free_name(&shadow, temp.path(), 1, "out").as_deref(), Some("out-0"));
    }

    #[test]
    fn test_three_way_collision_suffixes_increase() {
        let (_env, p, logs, mut batch) = setup(&[("a", b"1"), ("b", b"22"), ("c", b"333")]);
        let ctx = JobContext::default();
        let report = srename(&p, &ctx, &mut batch, "*", "out", RenameFlags::default(), "srename * out").unwrap();
        assert_eq!(report.failures, 0);
        assert_eq!(batch.names(), &["out", "out-0", "out-1"]);
        assert_eq!(batch.sizes(), &[1, 2, 3]);
        assert_eq!(logs.production.len(), 3);
        assert!(logs.delete.is_empty());
    }

    #[test]
    fn test_existing_foreign_file_not_clobbered() {
        let (_env, p, _logs, mut batch) = setup(&[("a", b"1")]);
        fs::write(batch.dir().join(".hidden"), b"x").unwrap();
        let ctx = JobContext::default();
        srename(&p, &ctx, &mut batch, "a", ".hidden", RenameFlags::default(), "srename").unwrap();
        assert_eq!(batch.names(), &[".hidden-0"]);
        assert_eq!(fs::read(batch.dir().join(".hidden")).unwrap(), b"x");
    }

    #[test]
    fn test_extension_and_prefix() {
        let (_env, p, _logs, mut batch) = setup(&[("a.tar.gz", b"1"), ("noext", b"2")]);
        let ctx = JobContext::default();
        extension(&p, &ctx, &mut batch, false, "extension").unwrap();
        assert_eq!(batch.names(), &["a.tar", "noext"]);

        prefix(&p, &ctx, &mut batch, PrefixAction::Add, "X_", "prefix add X_").unwrap();
        assert_eq!(batch.names(), &["X_a.tar", "X_noext"]);
        prefix(&p, &ctx, &mut batch, PrefixAction::Del, "X_", "prefix del X_").unwrap();
        assert_eq!(batch.names(), &["a.tar", "noext"]);
        assert!(batch.dir().join("noext").exists());
    }

    #[test]
    fn test_with_path_matches_directory_url() {
        let (_env, p, _logs, mut batch) = setup(&[("a.txt", b"1")]);
        let ctx = JobContext {
            dir_url: "/data/in/".into(),
            ..Default::default()
        };
        let flags = RenameFlags {
            overwrite: false,
            with_path: true,
        };
        srename(&p, &ctx, &mut batch, "/data/*/*.txt", "%*1_%*2", flags, "srename").unwrap();
        assert_eq!(batch.names(), &["in_a"]);
    }

    #[test]
    fn test_case_only_collision_is_order_independent() {
        let (_env, p, logs, mut lower) = setup(&[("A", b"1"), ("a", b"22")]);
        let ctx = JobContext::default();
        case_fold(&p, &ctx, &mut lower, false, "tolower").unwrap();
        let mut direct = lower.entries();
        direct.sort();
        assert_eq!(direct, vec![("a".to_string(), 1), ("a-0".to_string(), 2)]);
        assert_eq!(logs.production.len(), 2);

        let (_env, p, _logs, mut both) = setup(&[("A", b"1"), ("a", b"22")]);
        case_fold(&p, &ctx, &mut both, true, "toupper").unwrap();
        let mut upper = both.entries();
        upper.sort();
        assert_eq!(upper, vec![("A".to_string(), 1), ("A-0".to_string(), 2)]);
        case_fold(&p, &ctx, &mut both, false, "tolower").unwrap();
        let mut folded = both.entries();
        folded.sort();
        assert_eq!(folded, direct);
        assert_eq!(fs::read(both.dir().join("a-0")).unwrap(), b"22");
    }

    #[test]
    fn test_case_fold_skips_foreign_names() {
        let (_env, p, _logs, mut batch) = setup(&[("X", b"1"), ("x", b"22")]);
        fs::write(batch.dir().join("x-0"), b"foreign").unwrap();
        let report = case_fold(&p, &JobContext::default(), &mut batch, false, "tolower").unwrap();
        assert_eq!(report.failures, 0);
        let mut entries = batch.entries();
        entries.sort();
        assert_eq!(entries, vec![("x".to_string(), 1), ("x-1".to_string(), 2)]);
        assert_eq!(fs::read(batch.dir().join("x-0")).unwrap(), b"foreign");
    }

    #[test]
    fn test_lchmod() {
        let (_env, _p, _logs, batch) = setup(&[("a", b"1")]);
        lchmod(&batch, 0o640).unwrap();
        let mode = fs::metadata(batch.path_of(0)).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o640);
    }
}

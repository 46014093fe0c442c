//! Name templates and their counters.
//!
//! A template is literal text mixed with directives:
//!
//! | Directive | Expands to |
//! |---|---|
//! | `*` / `?` | next `*` / `?` capture of the rename filter |
//! | `%*N` / `%?N` | the N-th (1-based) `*` / `?` capture |
//! | `%o` | the original file name |
//! | `%n` | 4 hex digit unique counter |
//! | `%0Nd` / `%0Nx` | N digit job counter, decimal / hex |
//! | `%T<op><N><unit>` | time modifier for later `%t`; op `+ - * / %`, unit `S M H d` |
//! | `%t<c>` | current time formatted by letter `a A b B d j y Y m H M S U` |
//! | `%%` | a literal `%` |
//! | `\c` | `c` taken literally |
//!
//! Counters live in small files under `fifo_dir` guarded by an advisory
//! lock, so concurrent workers of the same job never hand out the same
//! value.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use afd_config::log_amg_warn;
use chrono::{Local, TimeZone};
use fs2::FileExt;

use crate::pmatch::{Captures, Filter};
use crate::{Result, MAX_FILENAME_LENGTH};

/// `%n` wraps at this value
pub const MAX_MSG_PER_SEC: u64 = 65535;

pub const ASSEMBLE_COUNTER: &str = "ASSEMBLE_FILE";
pub const RENAME_COUNTER: &str = "RENAME_FILE";
pub const SEQUENCE_COUNTER: &str = "SEQUENCE_FILE";
pub const UNIQUE_COUNTER_FILE: &str = "UNIQUE_COUNTER";

/// A monotonically increasing counter persisted in one file
#[derive(Debug, Clone)]
pub struct CounterFile {
    path: PathBuf,
}

impl CounterFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// `NNN_<KIND>.<job_id>` below `fifo_dir`, NNN being the counter width
    pub fn for_job(fifo_dir: &Path, kind: &str, width: usize, job_id: u32) -> Self {
        Self::new(fifo_dir.join(format!("{:03}_{}.{:x}", width, kind, job_id)))
    }

    /// The process-wide counter behind `%n`
    pub fn unique(fifo_dir: &Path) -> Self {
        Self::new(fifo_dir.join(UNIQUE_COUNTER_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the next value; the first call on a fresh file returns 0
    pub fn next(&self) -> Result<u64> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        file.lock_exclusive()?;

        let mut text = String::new();
        file.read_to_string(&mut text)?;
        let next = match text.trim().parse::<u64>() {
            Ok(current) => current.wrapping_add(1),
            Err(_) => 0,
        };
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", next)?;
        file.unlock()?;
        Ok(next)
    }
}

/// Everything a template may draw on besides the file name
#[derive(Debug, Clone)]
pub struct NameContext<'a> {
    pub fifo_dir: &'a Path,
    pub job_id: u32,
    /// Counter family used by `%0Nd` / `%0Nx`
    pub counter_kind: &'static str,
    /// Unix time `%t` is based on
    pub now: i64,
}

impl<'a> NameContext<'a> {
    pub fn new(fifo_dir: &'a Path, job_id: u32, counter_kind: &'static str) -> Self {
        Self {
            fifo_dir,
            job_id,
            counter_kind,
            now: Local::now().timestamp(),
        }
    }
}

/// Apply a rename filter and template to `src`.
///
/// `Ok(None)` when the filter does not take the name; `Ok(Some(""))` when
/// the template holds an unknown directive.
pub fn change_name(
    src: &str,
    filter: &Filter,
    template: &str,
    ctx: &NameContext<'_>,
) -> Result<Option<String>> {
    let Some(caps) = filter.captures(src) else {
        return Ok(None);
    };
    expand(template, Some(&caps), src, ctx).map(Some)
}

/// Build the output name of an `assemble` option
pub fn create_assembled_name(template: &str, ctx: &NameContext<'_>) -> Result<String> {
    expand(template, None, "", ctx)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeOp {
    Add,
    Sub,
    Mul,
    Div,
    Align,
}

/// `None` when the modified time does not fit an i64
fn apply_time(now: i64, modifier: Option<(TimeOp, i64)>) -> Option<i64> {
    match modifier {
        None => Some(now),
        Some((TimeOp::Add, v)) => now.checked_add(v),
        Some((TimeOp::Sub, v)) => now.checked_sub(v),
        Some((TimeOp::Mul, v)) => now.checked_mul(v),
        Some((TimeOp::Div, v)) if v != 0 => now.checked_div(v),
        Some((TimeOp::Align, v)) if v != 0 => now.checked_sub(now.rem_euclid(v)),
        Some(_) => Some(now),
    }
}

fn time_letter(letter: char, t: i64) -> Option<String> {
    if letter == 'U' {
        return Some(t.to_string());
    }
    let fmt = match letter {
        'a' => "%a",
        'A' => "%A",
        'b' => "%b",
        'B' => "%B",
        'd' => "%d",
        'j' => "%j",
        'y' => "%y",
        'Y' => "%Y",
        'm' => "%m",
        'H' => "%H",
        'M' => "%M",
        'S' => "%S",
        _ => return None,
    };
    let dt = Local.timestamp_opt(t, 0).single()?;
    Some(dt.format(fmt).to_string())
}

fn take_digits(chars: &[char], mut i: usize) -> (Option<u64>, usize) {
    let start = i;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i == start {
        return (None, i);
    }
    let n: String = chars[start..i].iter().collect();
    (n.parse().ok(), i)
}

fn expand(
    template: &str,
    caps: Option<&Captures>,
    original: &str,
    ctx: &NameContext<'_>,
) -> Result<String> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len() + 16);
    let mut next_star = 0usize;
    let mut next_single = 0usize;
    let mut modifier: Option<(TimeOp, i64)> = None;
    let mut i = 0;

    macro_rules! unknown {
        () => {{
            log_amg_warn!("Unknown directive in name template", template = template, at = i);
            return Ok(String::new());
        }};
    }

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' if i + 1 < chars.len() => {
                out.push(chars[i + 1]);
                i += 2;
            }
            '*' if caps.is_some() => {
                if let Some(s) = caps.and_then(|c| c.stars.get(next_star)) {
                    out.push_str(s);
                }
                next_star += 1;
                i += 1;
            }
            '?' if caps.is_some() => {
                if let Some(s) = caps.and_then(|c| c.singles.get(next_single)) {
                    out.push_str(s);
                }
                next_single += 1;
                i += 1;
            }
            '%' => {
                let Some(&d) = chars.get(i + 1) else {
                    unknown!();
                };
                match d {
                    '%' => {
                        out.push('%');
                        i += 2;
                    }
                    'o' => {
                        out.push_str(original);
                        i += 2;
                    }
                    '*' | '?' => {
                        let (n, end) = take_digits(&chars, i + 2);
                        let list = match (caps, d) {
                            (Some(c), '*') => &c.stars,
                            (Some(c), _) => &c.singles,
                            (None, _) => unknown!(),
                        };
                        match n {
                            Some(n) if n >= 1 => {
                                if let Some(s) = list.get(n as usize - 1) {
                                    out.push_str(s);
                                }
                            }
                            _ => unknown!(),
                        }
                        i = end;
                    }
                    'n' => {
                        let v = CounterFile::unique(ctx.fifo_dir).next()? % MAX_MSG_PER_SEC;
                        out.push_str(&format!("{:04x}", v));
                        i += 2;
                    }
                    '0' => {
                        let (width, end) = take_digits(&chars, i + 2);
                        let (Some(width), Some(&kind)) = (width, chars.get(end)) else {
                            unknown!();
                        };
                        let width = width as usize;
                        if width == 0 || width > 9 || (kind != 'd' && kind != 'x') {
                            unknown!();
                        }
                        let counter =
                            CounterFile::for_job(ctx.fifo_dir, ctx.counter_kind, width, ctx.job_id)
                                .next()?;
                        if kind == 'd' {
                            let v = counter % 10u64.pow(width as u32);
                            out.push_str(&format!("{:0w$}", v, w = width));
                        } else {
                            let v = counter % 16u64.pow(width as u32);
                            out.push_str(&format!("{:0w$x}", v, w = width));
                        }
                        i = end + 1;
                    }
                    'T' => {
                        let op = match chars.get(i + 2) {
                            Some('+') => TimeOp::Add,
                            Some('-') => TimeOp::Sub,
                            Some('*') => TimeOp::Mul,
                            Some('/') => TimeOp::Div,
                            Some('%') => TimeOp::Align,
                            _ => unknown!(),
                        };
                        let (n, end) = take_digits(&chars, i + 3);
                        let unit = match chars.get(end) {
                            Some('S') => 1,
                            Some('M') => 60,
                            Some('H') => 3600,
                            Some('d') => 86400,
                            _ => unknown!(),
                        };
                        let Some(v) = n
                            .and_then(|n| i64::try_from(n).ok())
                            .and_then(|n| n.checked_mul(unit))
                        else {
                            unknown!();
                        };
                        modifier = Some((op, v));
                        i = end + 1;
                    }
                    't' => {
                        let Some(&letter) = chars.get(i + 2) else {
                            unknown!();
                        };
                        let Some(text) = apply_time(ctx.now, modifier).and_then(|t| time_letter(letter, t)) else {
                            unknown!();
                        };
                        out.push_str(&text);
                        i += 3;
                    }
                    _ => unknown!(),
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    if out.len() >= MAX_FILENAME_LENGTH {
        log_amg_warn!("Generated name truncated", template = template, len = out.len());
        let mut cut = MAX_FILENAME_LENGTH - 1;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    }
    Ok(out)
}

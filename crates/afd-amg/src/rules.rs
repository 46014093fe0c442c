//! Rename rules (`<work>/etc/rename.rule`).
//!
//! ```text
//! # comment
//! [grib]
//! *.grb        %*1.grib
//! !*.tmp       unused
//! [upper]
//! *            %o
//! ```
//!
//! Each `[name]` header opens a rule; the lines below it are
//! `filter rename_to` pairs evaluated in declaration order.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use afd_config::{log_amg_info, log_amg_warn};

use crate::pmatch::Filter;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub name: String,
    pub filters: Vec<Filter>,
    pub rename_to: Vec<String>,
}

impl Rule {
    /// Index of the first filter taking `file_name`; an inverse hit ends the search
    pub fn find(&self, file_name: &str) -> Option<usize> {
        crate::pmatch::first_match(&self.filters, file_name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    path: Option<PathBuf>,
    mtime: Option<SystemTime>,
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Parse rule text; malformed lines are logged and skipped
    pub fn parse(text: &str) -> Self {
        let mut rules: Vec<Rule> = Vec::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(header) = line.strip_prefix('[') {
                match header.strip_suffix(']') {
                    Some(name) if !name.trim().is_empty() => rules.push(Rule {
                        name: name.trim().to_string(),
                        filters: Vec::new(),
                        rename_to: Vec::new(),
                    }),
                    _ => log_amg_warn!("Bad rule header", line = lineno + 1),
                }
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(filter), Some(to)) = (parts.next(), parts.next()) else {
                log_amg_warn!("Rule line needs a filter and a target", line = lineno + 1);
                continue;
            };
            let Some(rule) = rules.last_mut() else {
                log_amg_warn!("Rule line before any [header]", line = lineno + 1);
                continue;
            };
            rule.filters.push(Filter::parse(filter));
            rule.rename_to.push(to.to_string());
        }
        Self {
            path: None,
            mtime: None,
            rules,
        }
    }

    /// Load from a file; a missing file yields an empty set
    pub fn load(path: &Path) -> Result<Self> {
        let (text, mtime) = match fs::metadata(path) {
            Ok(meta) => (fs::read_to_string(path)?, meta.modified().ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (String::new(), None),
            Err(e) => return Err(e.into()),
        };
        let mut set = Self::parse(&text);
        set.path = Some(path.to_path_buf());
        set.mtime = mtime;
        Ok(set)
    }

    /// Re-read the rule file when its mtime moved; true when reloaded
    pub fn reload_if_changed(&mut self) -> Result<bool> {
        let Some(path) = self.path.clone() else {
            return Ok(false);
        };
        let current = fs::metadata(&path).ok().and_then(|m| m.modified().ok());
        if current == self.mtime {
            return Ok(false);
        }
        *self = Self::load(&path)?;
        log_amg_info!("Rename rules reloaded", rules = self.rules.len());
        Ok(true)
    }

    /// Index of the rule called `name`
    pub fn get_rule(&self, name: &str) -> Option<usize> {
        self.rules.iter().position(|r| r.name == name)
    }

    pub fn rule(&self, idx: usize) -> &Rule {
        &self.rules[idx]
    }

    pub fn by_name(&self, name: &str) -> Option<&Rule> {
        self.get_rule(name).map(|i| &self.rules[i])
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

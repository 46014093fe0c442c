//! `afd.users` permission evaluation.
//!
//! One line per user (or `user@host`), followed by a comma or whitespace
//! separated token list:
//!
//! ```text
//! # user         permissions
//! operator       afdcmd, view_passwd
//! admin@gate     all
//! guest          none
//! ```

use std::fs;
use std::path::Path;

use afd_config::log_ctl_warn;

use crate::{Result, PERMISSION_DENIED_STR};

/// Grants every verb
pub const ALL_PERMISSIONS: &str = "all";

/// Grants every host/directory/process command
pub const AFDCMD_PERMISSION: &str = "afdcmd";

/// An entry that grants nothing
pub const NO_PERMISSION: &str = "none";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    /// The user has an entry with at least one token
    Success,
    /// The user's entry grants nothing
    None,
    /// The user is not listed
    NoAccess,
    /// No `afd.users` file; every verb is allowed
    Incorrect,
}

/// The token list of one user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions {
    tokens: Vec<String>,
    all: bool,
}

impl Permissions {
    /// Everything allowed (no `afd.users` file)
    pub fn all() -> Self {
        Self {
            tokens: Vec::new(),
            all: true,
        }
    }

    pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Self {
        let tokens: Vec<String> = tokens.iter().map(|t| t.as_ref().to_string()).collect();
        Self {
            all: tokens.iter().any(|t| t == ALL_PERMISSIONS),
            tokens,
        }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Does the list grant `token`?
    pub fn allows(&self, token: &str) -> bool {
        self.all || self.tokens.iter().any(|t| t == token)
    }

    /// Like `allows`, with `afdcmd` standing in for every control verb
    pub fn allows_command(&self, token: &str) -> bool {
        self.allows(token) || self.allows(AFDCMD_PERMISSION)
    }

    /// Split `requested` into the items the user may run and the ones
    /// dropped. A warning is printed for every drop.
    pub fn filter<T: Copy>(&self, requested: &[T], token: impl Fn(T) -> (&'static str, bool)) -> (Vec<T>, usize) {
        let mut allowed = Vec::with_capacity(requested.len());
        let mut dropped = 0;
        for &item in requested {
            let (name, is_command) = token(item);
            let ok = if is_command {
                self.allows_command(name)
            } else {
                self.allows(name)
            };
            if ok {
                allowed.push(item);
            } else {
                eprintln!("{} {}", PERMISSION_DENIED_STR, name.replace('_', " "));
                log_ctl_warn!("Permission denied", permission = name);
                dropped += 1;
            }
        }
        (allowed, dropped)
    }
}

fn split_tokens(list: &str) -> Vec<String> {
    list.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Look `user` up in the users file.
///
/// `profile`, when given, is looked up instead of the real user name. An
/// entry `user@host` matches the bare user name too.
pub fn get_permissions(users_file: &Path, user: &str, profile: Option<&str>) -> Result<(PermissionStatus, Permissions)> {
    let text = match fs::read_to_string(users_file) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok((PermissionStatus::Incorrect, Permissions::all()))
        }
        Err(e) => return Err(e.into()),
    };
    let key = profile.unwrap_or(user);

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (name, list) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let bare = name.split('@').next().unwrap_or(name);
        if name != key && bare != key {
            continue;
        }
        let tokens = split_tokens(list);
        if tokens.is_empty() || tokens.iter().all(|t| t == NO_PERMISSION) {
            return Ok((PermissionStatus::None, Permissions::default()));
        }
        return Ok((PermissionStatus::Success, Permissions::from_tokens(&tokens)));
    }
    Ok((PermissionStatus::NoAccess, Permissions::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users(text: &str) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), text).unwrap();
        file
    }

    #[test]
    fn test_missing_file_grants_everything() {
        let (status, perms) = get_permissions(Path::new("/nonexistent/afd.users"), "bob", None).unwrap();
        assert_eq!(status, PermissionStatus::Incorrect);
        assert!(perms.allows("set_passwd"));
    }

    #[test]
    fn test_lookup() {
        let file = users("# comment\noperator afdcmd, view_passwd\nadmin@gate all\nguest none\n");
        let (status, perms) = get_permissions(file.path(), "operator", None).unwrap();
        assert_eq!(status, PermissionStatus::Success);
        assert!(perms.allows("view_passwd"));
        assert!(perms.allows_command("disable_host"));
        assert!(!perms.allows("set_passwd"));

        let (status, perms) = get_permissions(file.path(), "admin", None).unwrap();
        assert_eq!(status, PermissionStatus::Success);
        assert!(perms.allows("set_passwd"));

        assert_eq!(get_permissions(file.path(), "guest", None).unwrap().0, PermissionStatus::None);
        assert_eq!(get_permissions(file.path(), "eve", None).unwrap().0, PermissionStatus::NoAccess);
        assert_eq!(
            get_permissions(file.path(), "eve", Some("operator")).unwrap().0,
            PermissionStatus::Success
        );
    }

    #[test]
    fn test_filter_counts_drops() {
        let perms = Permissions::from_tokens(&["disable_host"]);
        let (allowed, dropped) = perms.filter(&[1, 2, 3], |v| match v {
            1 => ("disable_host", true),
            2 => ("switch_host", true),
            _ => ("set_passwd", false),
        });
        assert_eq!(allowed, vec![1]);
        assert_eq!(dropped, 2);
    }
}

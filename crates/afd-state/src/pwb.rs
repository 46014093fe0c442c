//! Password Buffer: `user@host` → encoded password.
//!
//! Entries are upserted by `set_pw` and never removed automatically.
//! Writers serialize on a lock of the record-count word.

use std::ops::{Deref, DerefMut};
use std::path::Path;

use afd_config::log_state_info;

use crate::layout::{
    cstr, set_cstr, CURRENT_PWB_VERSION, MAX_PASSWD_LENGTH, MAX_REAL_HOSTNAME_LENGTH,
    MAX_USER_NAME_LENGTH,
};
use crate::lock::RecordLock;
use crate::mapped::{Database, Record};
use crate::password::{self, PasswordEncoding};
use crate::{Result, StateError};

pub const PWB_DATA_FILE: &str = "pwb_data";
pub const PWB_STEP_SIZE: usize = 4;

const UH_NAME_LENGTH: usize = MAX_USER_NAME_LENGTH + MAX_REAL_HOSTNAME_LENGTH + 2;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PasswdBuf {
    pub uh_name: [u8; UH_NAME_LENGTH],
    pub passwd: [u8; MAX_PASSWD_LENGTH],
    /// Set once the entry has been replaced at least once
    pub dup_check: u8,
}

unsafe impl Record for PasswdBuf {
    const NAME: &'static str = "PWB";
    const VERSION: u8 = CURRENT_PWB_VERSION;
    const STEP_SIZE: usize = PWB_STEP_SIZE;
}

impl PasswdBuf {
    pub fn uh_name(&self) -> String {
        cstr(&self.uh_name).into_owned()
    }

    fn stored(&self) -> &[u8] {
        let end = self
            .passwd
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.passwd.len());
        &self.passwd[..end]
    }

    /// Encoding tag of the stored password
    pub fn encoding(&self) -> Option<PasswordEncoding> {
        let stored = self.stored();
        if stored.len() >= 3 && stored[0] == b'$' && stored[2] == b'$' {
            PasswordEncoding::from_tag(stored[1])
        } else {
            None
        }
    }

    pub fn password(&self) -> Result<String> {
        password::decode(self.stored())
    }
}

pub struct Pwb(Database<PasswdBuf>);

impl Deref for Pwb {
    type Target = Database<PasswdBuf>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Pwb {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// `user@host` key of an entry
pub fn uh_name(user: &str, host: &str) -> String {
    format!("{}@{}", user, host)
}

impl Pwb {
    pub fn open_or_create(path: &Path) -> Result<Self> {
        Ok(Self(Database::open_or_create(path)?))
    }

    pub fn attach(path: &Path) -> Result<Self> {
        Ok(Self(Database::attach(path)?))
    }

    pub fn position(&mut self, user: &str, host: &str) -> Option<usize> {
        let key = uh_name(user, host);
        self.records().iter().position(|r| cstr(&r.uh_name) == key)
    }

    /// Store or replace the password of `user@host`
    pub fn set_password(
        &mut self,
        user: &str,
        host: &str,
        plain: &str,
        encoding: PasswordEncoding,
    ) -> Result<usize> {
        let coded = password::encode(plain, encoding)?;
        if coded.len() >= MAX_PASSWD_LENGTH {
            return Err(StateError::Full(format!(
                "password for {}@{} too long for encoding {}",
                user,
                host,
                encoding.tag() as char
            )));
        }
        let key = uh_name(user, host);
        if key.len() >= UH_NAME_LENGTH {
            return Err(StateError::Full(format!("user@host too long: {}", key)));
        }

        let _writer = RecordLock::acquire(self.raw_fd(), 0)?;
        self.refresh()?;
        let pos = match self.position(user, host) {
            Some(pos) => {
                self.get_mut(pos)?.dup_check = 1;
                pos
            }
            None => {
                let mut rec = PasswdBuf::zeroed();
                set_cstr(&mut rec.uh_name, &key);
                self.push(rec)?
            }
        };
        let rec = self.get_mut(pos)?;
        rec.passwd.fill(0);
        rec.passwd[..coded.len()].copy_from_slice(&coded);
        self.flush()?;
        log_state_info!(
            "Stored password",
            uh_name = key.to_string(),
            encoding = (encoding.tag() as char).to_string()
        );
        Ok(pos)
    }

    pub fn get_password(&mut self, user: &str, host: &str) -> Result<Option<String>> {
        match self.position(user, host) {
            Some(pos) => Ok(Some(self.get(pos)?.password()?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_and_read_back() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join(PWB_DATA_FILE);
        let mut pwb = Pwb::open_or_create(&path).unwrap();

        pwb.set_password("ftp", "site", "s3cret", PasswordEncoding::Xor)
            .unwrap();
        pwb.set_password("anon", "mirror", "guest", PasswordEncoding::Legacy)
            .unwrap();
        assert_eq!(pwb.len(), 2);

        let pos = pwb
            .set_password("ftp", "site", "changed", PasswordEncoding::Plain)
            .unwrap();
        assert_eq!(pos, 0);
        assert_eq!(pwb.len(), 2);
        assert_eq!(pwb.get(0).unwrap().dup_check, 1);
        assert_eq!(pwb.get(0).unwrap().encoding(), Some(PasswordEncoding::Plain));
        drop(pwb);

        let mut pwb = Pwb::attach(&path).unwrap();
        assert_eq!(pwb.get_password("ftp", "site").unwrap().as_deref(), Some("changed"));
        assert_eq!(pwb.get_password("anon", "mirror").unwrap().as_deref(), Some("guest"));
        assert_eq!(pwb.get_password("nobody", "site").unwrap(), None);
    }

    #[test]
    fn test_grows_by_step() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join(PWB_DATA_FILE);
        let mut pwb = Pwb::open_or_create(&path).unwrap();
        for i in 0..(PWB_STEP_SIZE + 1) {
            pwb.set_password(&format!("u{}", i), "h", "pw", PasswordEncoding::Xor)
                .unwrap();
        }
        let expected = crate::layout::AFD_WORD_OFFSET
            + 2 * PWB_STEP_SIZE * std::mem::size_of::<PasswdBuf>();
        assert_eq!(std::fs::metadata(&path).unwrap().len() as usize, expected);
    }

    #[test]
    fn test_too_long_password_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let mut pwb = Pwb::open_or_create(&temp.path().join(PWB_DATA_FILE)).unwrap();
        let long = "p".repeat(60);
        assert!(matches!(
            pwb.set_password("u", "h", &long, PasswordEncoding::Xor),
            Err(StateError::Full(_))
        ));
        assert!(pwb.set_password("u", "h", &long, PasswordEncoding::Plain).is_ok());
    }
}

//! `set_pw` / `view_pw` on the password buffer.

use afd_config::paths::WorkDir;
use afd_log::{EventAction, EventClass, EventRecord, EventType, LogSinks};
use afd_state::pwb::PWB_DATA_FILE;
use afd_state::{PasswordEncoding, Pwb};

use crate::permissions::Permissions;
use crate::{CtlError, Result};

pub const SET_PASSWD_PERMISSION: &str = "set_passwd";
pub const VIEW_PASSWD_PERMISSION: &str = "view_passwd";

/// Store the password of `user@host`, creating the buffer when needed
#[allow(clippy::too_many_arguments)]
pub fn set_pw(
    work: &WorkDir,
    permissions: &Permissions,
    caller: &str,
    logs: &LogSinks,
    user: &str,
    host: &str,
    password: &str,
    encoding: PasswordEncoding,
) -> Result<()> {
    if !permissions.allows(SET_PASSWD_PERMISSION) {
        return Err(CtlError::Permission("set passwords".into()));
    }
    let mut pwb = Pwb::open_or_create(&work.fifo_dir().join(PWB_DATA_FILE))?;
    pwb.set_password(user, host, password, encoding)?;

    let record = EventRecord::new(EventClass::Host, EventType::Manual, EventAction::SetPassword, host, caller)
        .with_info(format!("user {}", user));
    logs.event(&record);
    Ok(())
}

/// Decoded password of `user@host`, if one is stored
pub fn view_pw(work: &WorkDir, permissions: &Permissions, user: &str, host: &str) -> Result<Option<String>> {
    if !permissions.allows(VIEW_PASSWD_PERMISSION) {
        return Err(CtlError::Permission("view passwords".into()));
    }
    let mut pwb = Pwb::attach(&work.fifo_dir().join(PWB_DATA_FILE))?;
    Ok(pwb.get_password(user, host)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use afd_config::testing::TestEnvironment;

    #[test]
    fn test_set_then_view() {
        let env = TestEnvironment::new().unwrap();
        let (sinks, logs) = LogSinks::memory();
        let all = Permissions::all();
        set_pw(&env.layout(), &all, "admin", &sinks, "ftp", "site", "s3cret", PasswordEncoding::Xor).unwrap();

        assert_eq!(view_pw(&env.layout(), &all, "ftp", "site").unwrap().as_deref(), Some("s3cret"));
        assert_eq!(view_pw(&env.layout(), &all, "ftp", "other").unwrap(), None);
        let events = logs.event.records();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, EventAction::SetPassword);
        assert_eq!(events[0].subject, "site");
    }

    #[test]
    fn test_permissions_are_checked() {
        let env = TestEnvironment::new().unwrap();
        let only_set = Permissions::from_tokens(&[SET_PASSWD_PERMISSION]);
        set_pw(&env.layout(), &only_set, "op", &LogSinks::null(), "u", "h", "pw", PasswordEncoding::Legacy).unwrap();
        assert!(matches!(
            view_pw(&env.layout(), &only_set, "u", "h"),
            Err(CtlError::Permission(_))
        ));
        let none = Permissions::default();
        assert!(matches!(
            set_pw(&env.layout(), &none, "op", &LogSinks::null(), "u", "h", "pw", PasswordEncoding::Plain),
            Err(CtlError::Permission(_))
        ));
    }
}

//! Mailbox lock naming and the mailbox-lock containment rule.
//!
//! A user's mailbox lock is `<spool>/<user>.lock`, or `$MAIL.lock` when the
//! environment names the mailbox. The trusted group is only ever used for a
//! path that has this shape and whose mailbox belongs to the caller.

use crate::config::LockConfig;
use crate::error::{LockError, Result};
use crate::lockfile::PATH_MAX;
use nix::unistd::{Uid, User, getuid};
use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Longest user name that goes into a lock name.
const USER_NAME_MAX: usize = 120;

const LOCK_SUFFIX: &str = ".lock";

/// The user whose mailbox the caller may lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxOwner {
    pub name: String,
    pub uid: Uid,
}

impl MailboxOwner {
    pub fn new(name: impl Into<String>, uid: Uid) -> Self {
        Self {
            name: name.into(),
            uid,
        }
    }

    /// The owner behind the real uid of this process.
    pub fn current() -> Result<Self> {
        let uid = getuid();
        match User::from_uid(uid) {
            Ok(Some(user)) => Ok(Self::new(user.name, uid)),
            _ => Err(LockError::UnknownUser),
        }
    }
}

/// `<user>.lock`, with the user name cut to a sane length.
pub fn lock_name(user: &str) -> String {
    let user: String = user.chars().take(USER_NAME_MAX).collect();
    format!("{}{}", user, LOCK_SUFFIX)
}

/// `<spool>/<user>.lock`.
pub fn spool_lock_path(spool_dir: &Path, user: &str) -> PathBuf {
    spool_dir.join(lock_name(user))
}

/// The mailbox lock of `owner`: `$MAIL.lock` if set and short enough,
/// otherwise the spool location.
pub fn mail_lock_path(owner: &MailboxOwner, config: &LockConfig) -> PathBuf {
    mail_lock_path_from(std::env::var_os("MAIL"), owner, config)
}

fn mail_lock_path_from(
    mail: Option<OsString>,
    owner: &MailboxOwner,
    config: &LockConfig,
) -> PathBuf {
    match mail {
        Some(mut mail) if !mail.is_empty() && mail.len() + 6 < PATH_MAX => {
            mail.push(LOCK_SUFFIX);
            PathBuf::from(mail)
        }
        _ => spool_lock_path(&config.spool_dir, &owner.name),
    }
}

/// Whether `path` is `owner`'s mailbox lock.
///
/// The leaf must be `<user>.lock` and the mailbox next to it (the path
/// without `.lock`) must exist and belong to the owner.
pub fn is_mail_lock(path: &Path, owner: &MailboxOwner) -> bool {
    let Some(leaf) = path.file_name().and_then(|l| l.to_str()) else {
        return false;
    };
    if leaf != lock_name(&owner.name) {
        return false;
    }

    let Some(mailbox) = path
        .to_str()
        .and_then(|p| p.strip_suffix(LOCK_SUFFIX))
        .filter(|m| !m.is_empty())
    else {
        return false;
    };

    match fs::metadata(mailbox) {
        Ok(meta) => meta.uid() == owner.uid.as_raw(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn me() -> MailboxOwner {
        MailboxOwner::new("alice", getuid())
    }

    #[test]
    fn lock_name_truncates_long_user_names() {
        assert_eq!(lock_name("bob"), "bob.lock");
        let long = "u".repeat(200);
        assert_eq!(lock_name(&long), format!("{}.lock", "u".repeat(120)));
    }

    #[test]
    fn spool_path_joins_directory_and_lock_name() {
        assert_eq!(
            spool_lock_path(Path::new("/var/mail"), "bob"),
            PathBuf::from("/var/mail/bob.lock")
        );
    }

    #[test]
    fn mail_variable_takes_precedence() {
        let config = LockConfig::default();
        let path = mail_lock_path_from(Some(OsString::from("/home/alice/inbox")), &me(), &config);
        assert_eq!(path, PathBuf::from("/home/alice/inbox.lock"));
    }

    #[test]
    fn empty_or_missing_mail_variable_falls_back_to_spool() {
        let config = LockConfig::default();
        let expected = PathBuf::from("/var/mail/alice.lock");
        assert_eq!(mail_lock_path_from(None, &me(), &config), expected);
        assert_eq!(
            mail_lock_path_from(Some(OsString::new()), &me(), &config),
            expected
        );
    }

    #[test]
    fn overlong_mail_variable_falls_back_to_spool() {
        let config = LockConfig::default();
        let huge = OsString::from("/".to_string() + &"m".repeat(PATH_MAX));
        assert_eq!(
            mail_lock_path_from(Some(huge), &me(), &config),
            PathBuf::from("/var/mail/alice.lock")
        );
    }

    #[test]
    fn own_mailbox_lock_is_recognised() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("alice"), "").unwrap();
        assert!(is_mail_lock(&dir.path().join("alice.lock"), &me()));
    }

    #[test]
    fn other_users_lock_is_not_a_mail_lock() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bob"), "").unwrap();
        assert!(!is_mail_lock(&dir.path().join("bob.lock"), &me()));
    }

    #[test]
    fn lock_without_mailbox_is_not_a_mail_lock() {
        let dir = TempDir::new().unwrap();
        assert!(!is_mail_lock(&dir.path().join("alice.lock"), &me()));
    }

    #[test]
    fn mailbox_owned_by_someone_else_is_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("alice"), "").unwrap();
        let stranger = MailboxOwner::new(
            "alice",
            Uid::from_raw(getuid().as_raw().wrapping_add(4242)),
        );
        assert!(!is_mail_lock(&dir.path().join("alice.lock"), &stranger));
    }
}

//! Directory write-access decisions.

use crate::lockfile::FileIdentity;
use crate::mailbox::{MailboxOwner, is_mail_lock};
use nix::unistd::{Gid, Uid, geteuid, getgroups};
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// How a lock in some directory may be manipulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// The real group (or the user) can write the directory.
    Writable(FileIdentity),
    /// Only the trusted group can, and the path is the owner's mailbox lock.
    NeedsTrustedGroup(FileIdentity),
    /// No identity available to us may create the lock.
    Denied,
    /// The directory does not exist.
    NoSuchDirectory,
}

/// Whether `uid`, as a member of `groups`, may write and search a directory
/// with `mode` owned by `file_uid:file_gid`. Follows the POSIX class order:
/// owner bits, then group bits, then other bits.
pub fn mode_permits(mode: u32, file_uid: u32, file_gid: u32, uid: Uid, groups: &[Gid]) -> bool {
    const WRITE_SEARCH: u32 = 0o3;

    if uid.is_root() {
        return true;
    }
    let class_bits = if file_uid == uid.as_raw() {
        mode >> 6
    } else if groups.iter().any(|g| g.as_raw() == file_gid) {
        mode >> 3
    } else {
        mode
    };
    class_bits & WRITE_SEARCH == WRITE_SEARCH
}

/// Decide how the lock `path` inside `dir` may be created.
///
/// Write access is tested first with the real group and the supplementary
/// groups, then with the trusted group alone. The trusted group is only
/// granted for the caller's own mailbox lock; `owner` is asked for the
/// caller only then, and a caller without a mailbox owner is denied.
pub fn check_access(
    dir: &Path,
    real_gid: Gid,
    trusted_gid: Gid,
    path: &Path,
    owner: impl FnOnce() -> Option<MailboxOwner>,
) -> AccessDecision {
    let meta = match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => meta,
        Ok(_) => return AccessDecision::NoSuchDirectory,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return AccessDecision::NoSuchDirectory,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "cannot stat lock directory");
            return AccessDecision::Denied;
        }
    };
    let identity = FileIdentity::from_metadata(&meta);
    let uid = geteuid();

    let mut groups = getgroups().unwrap_or_default();
    groups.push(real_gid);
    if mode_permits(meta.mode(), meta.uid(), meta.gid(), uid, &groups) {
        return AccessDecision::Writable(identity);
    }

    if trusted_gid != real_gid
        && mode_permits(meta.mode(), meta.uid(), meta.gid(), uid, &[trusted_gid])
        && owner().is_some_and(|owner| is_mail_lock(path, &owner))
    {
        tracing::debug!(lock = %path.display(), "lock needs the trusted group");
        return AccessDecision::NeedsTrustedGroup(identity);
    }

    AccessDecision::Denied
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{getgid, getuid};
    use tempfile::TempDir;

    const ALICE: u32 = 1000;
    const MAIL: u32 = 8;

    fn user(uid: u32) -> Uid {
        Uid::from_raw(uid)
    }

    fn gids(list: &[u32]) -> Vec<Gid> {
        list.iter().map(|g| Gid::from_raw(*g)).collect()
    }

    #[test]
    fn spool_is_writable_only_through_the_mail_group() {
        // drwxrwxr-x root:mail
        let mode = 0o40775;
        assert!(!mode_permits(mode, 0, MAIL, user(ALICE), &gids(&[100])));
        assert!(mode_permits(mode, 0, MAIL, user(ALICE), &gids(&[MAIL])));
    }

    #[test]
    fn owner_bits_win_over_group_bits() {
        // d-w-rwxrwx owned by alice: alice lacks search permission
        let mode = 0o40277;
        assert!(!mode_permits(mode, ALICE, MAIL, user(ALICE), &gids(&[MAIL])));
    }

    #[test]
    fn sticky_world_writable_directory_is_writable() {
        let mode = 0o41777;
        assert!(mode_permits(mode, 0, 0, user(ALICE), &gids(&[100])));
    }

    #[test]
    fn root_may_write_anywhere() {
        assert!(mode_permits(0o40000, 1, 1, user(0), &[]));
    }

    #[test]
    fn own_temp_directory_is_writable() {
        let dir = TempDir::new().unwrap();
        let owner = MailboxOwner::new("tester", getuid());
        let decision = check_access(
            dir.path(),
            getgid(),
            getgid(),
            &dir.path().join("x.lock"),
            || Some(owner),
        );
        assert_eq!(
            decision,
            AccessDecision::Writable(FileIdentity::resolve(dir.path()).unwrap())
        );
    }

    #[test]
    fn missing_directory_is_reported() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone");
        let decision = check_access(&missing, getgid(), getgid(), &missing.join("x.lock"), || None);
        assert_eq!(decision, AccessDecision::NoSuchDirectory);
    }

    #[test]
    fn regular_file_is_not_a_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, "").unwrap();
        let decision = check_access(&file, getgid(), getgid(), &file.join("x.lock"), || None);
        assert_eq!(decision, AccessDecision::NoSuchDirectory);
    }

    #[test]
    fn writable_directory_needs_no_mailbox_owner() {
        let dir = TempDir::new().unwrap();
        let decision = check_access(
            dir.path(),
            getgid(),
            getgid(),
            &dir.path().join("x.lock"),
            || panic!("owner looked up for a writable directory"),
        );
        assert!(matches!(decision, AccessDecision::Writable(_)));
    }
}

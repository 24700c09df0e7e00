//! Lock validity checks.
//!
//! A lock naming a live process is always valid. Otherwise its age decides,
//! measured with the filesystem's clock where the filesystem lets us observe
//! it, so NFS clients with skewed clocks agree on when a lock expires.

use chrono::{DateTime, Utc};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs::{self, File, Metadata};
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// Bytes of a lock record worth reading.
const RECORD_PEEK: usize = 16;

/// Age limit for locks that do not name a live owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalePolicy {
    pub max_age: Duration,
}

impl Default for StalePolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(300),
        }
    }
}

/// What a process probe told us about a recorded owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OwnerStatus {
    Alive,
    Gone,
    Unknown,
}

fn probe_owner(pid: i32) -> OwnerStatus {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) | Err(Errno::EPERM) => OwnerStatus::Alive,
        Err(Errno::ESRCH) => OwnerStatus::Gone,
        Err(_) => OwnerStatus::Unknown,
    }
}

/// Owner pid recorded in a lock, if the content is a positive integer.
pub fn recorded_pid(content: &[u8]) -> Option<i32> {
    let text = std::str::from_utf8(content).ok()?;
    let text = text.trim_end_matches('\0').trim();
    text.parse::<i32>().ok().filter(|pid| *pid > 0)
}

/// Whether the lock at `path` is still valid.
///
/// With `owner_expected`, a recorded pid is probed first: a live (or
/// unsignalable) process keeps the lock valid and a vanished one makes it
/// stale immediately. Everything else falls back to the age window.
/// A lock that cannot be examined at all is not valid.
pub fn is_valid(path: &Path, owner_expected: bool, policy: &StalePolicy) -> bool {
    let before = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(_) => return false,
    };

    let mut now = Utc::now();
    let mut modified = before.modified().ok().map(DateTime::<Utc>::from);

    if let Ok(mut file) = File::open(path) {
        let mut buf = [0u8; RECORD_PEEK];
        let read = file.read(&mut buf);

        if let Ok(after) = file.metadata() {
            if let Some(fs_now) = filesystem_now(&before, &after) {
                now = fs_now;
            }
            modified = after.modified().ok().map(DateTime::<Utc>::from);
        }

        if owner_expected
            && let Ok(n) = read
            && let Some(pid) = recorded_pid(&buf[..n])
        {
            match probe_owner(pid) {
                OwnerStatus::Alive => return true,
                OwnerStatus::Gone => {
                    tracing::debug!(lock = %path.display(), pid, "lock owner is gone");
                    return false;
                }
                OwnerStatus::Unknown => {}
            }
        }
    }

    let Some(modified) = modified else {
        return false;
    };
    let Ok(max_age) = chrono::Duration::from_std(policy.max_age) else {
        return true;
    };

    let age = now.signed_duration_since(modified);
    tracing::trace!(lock = %path.display(), age_secs = age.num_seconds(), "lock age");
    age < max_age
}

/// The filesystem's idea of "now", if our read moved the access time forward.
fn filesystem_now(before: &Metadata, after: &Metadata) -> Option<DateTime<Utc>> {
    let before = before.accessed().ok()?;
    let after = after.accessed().ok()?;
    (after > before).then(|| DateTime::<Utc>::from(after))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::stat::{UtimensatFlags, utimensat};
    use nix::sys::time::TimeSpec;
    use tempfile::TempDir;

    /// Rewind both timestamps of `path` by `secs`.
    fn backdate(path: &Path, secs: i64) {
        let then = TimeSpec::new(Utc::now().timestamp() - secs, 0);
        utimensat(None, path, &then, &then, UtimensatFlags::NoFollowSymlink).unwrap();
    }

    #[test]
    fn recorded_pid_accepts_decimal_lines() {
        assert_eq!(recorded_pid(b"1234\n"), Some(1234));
        assert_eq!(recorded_pid(b"0\n"), None);
        assert_eq!(recorded_pid(b"0\0"), None);
        assert_eq!(recorded_pid(b"-5\n"), None);
        assert_eq!(recorded_pid(b"garbage"), None);
        assert_eq!(recorded_pid(b""), None);
    }

    #[test]
    fn missing_lock_is_not_valid() {
        let dir = TempDir::new().unwrap();
        assert!(!is_valid(
            &dir.path().join("none.lock"),
            true,
            &StalePolicy::default()
        ));
    }

    #[test]
    fn fresh_sentinel_lock_is_valid() {
        let dir = TempDir::new().unwrap();
        let lock = dir.path().join("a.lock");
        fs::write(&lock, "0\n").unwrap();

        assert!(is_valid(&lock, false, &StalePolicy::default()));
        assert!(is_valid(&lock, true, &StalePolicy::default()));
    }

    #[test]
    fn old_sentinel_lock_is_stale() {
        let dir = TempDir::new().unwrap();
        let lock = dir.path().join("a.lock");
        fs::write(&lock, "0\n").unwrap();
        backdate(&lock, 301);

        assert!(!is_valid(&lock, false, &StalePolicy::default()));
    }

    #[test]
    fn lock_inside_window_is_valid() {
        let dir = TempDir::new().unwrap();
        let lock = dir.path().join("a.lock");
        fs::write(&lock, "0\n").unwrap();
        backdate(&lock, 200);

        assert!(is_valid(&lock, false, &StalePolicy::default()));
    }

    #[test]
    fn window_is_configurable() {
        let dir = TempDir::new().unwrap();
        let lock = dir.path().join("a.lock");
        fs::write(&lock, "0\n").unwrap();
        backdate(&lock, 120);

        let short = StalePolicy {
            max_age: Duration::from_secs(60),
        };
        assert!(!is_valid(&lock, false, &short));
    }

    #[test]
    fn live_owner_keeps_old_lock_valid() {
        let dir = TempDir::new().unwrap();
        let lock = dir.path().join("a.lock");
        fs::write(&lock, format!("{}\n", std::process::id())).unwrap();
        backdate(&lock, 3600);

        assert!(is_valid(&lock, true, &StalePolicy::default()));
    }

    #[test]
    fn dead_owner_makes_fresh_lock_stale() {
        let dir = TempDir::new().unwrap();
        let lock = dir.path().join("a.lock");
        fs::write(&lock, "999999999\n").unwrap();

        assert!(!is_valid(&lock, true, &StalePolicy::default()));
    }

    #[test]
    fn pid_is_ignored_when_owner_not_expected() {
        let dir = TempDir::new().unwrap();
        let lock = dir.path().join("a.lock");
        fs::write(&lock, "999999999\n").unwrap();

        assert!(is_valid(&lock, false, &StalePolicy::default()));
    }
}

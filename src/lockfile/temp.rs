//! Temporary lock tokens.
//!
//! A token is created exclusively under a name derived from the process id,
//! the sub-second clock, a per-process sequence number and the host name, in
//! the same directory as the lock (hard links cannot cross filesystems).
//! Dropping the token removes its name.

use super::identity::FileIdentity;
use super::path::LockPath;
use crate::error::{LockError, Result};
use crate::privilege::Escalation;
use chrono::Utc;
use std::fs::{self, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

/// Mode of temporary tokens and therefore of lock records.
pub const TOKEN_MODE: u32 = 0o644;

/// Tokens created so far by this process; keeps concurrent threads apart.
static SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// Current sub-second time in sixteenths, `0..=15`.
pub(crate) fn sixteenths() -> u32 {
    Utc::now().timestamp_subsec_millis() * 16 / 1000
}

/// Host name up to its first dot, at most `max` characters.
pub(crate) fn short_hostname(max: usize) -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    host.split('.').next().unwrap_or_default().chars().take(max).collect()
}

/// Name of a lock token: `.lk<pid><fraction><sequence>.<host>`.
pub fn token_name(pid: u32, fraction: u32, sequence: u32, host: &str) -> String {
    format!(".lk{:05}{:x}{:x}.{}", pid, fraction & 0xf, sequence, host)
}

/// An exclusively created temporary name next to a lock.
#[derive(Debug)]
pub(crate) struct TempToken {
    path: PathBuf,
    escalation: Option<Escalation>,
}

impl TempToken {
    /// Create the token and write `record` into it.
    ///
    /// A short write removes the token again.
    pub(crate) fn create(
        lock: &LockPath,
        record: &[u8],
        escalation: Option<Escalation>,
    ) -> Result<Self> {
        let name = token_name(
            std::process::id(),
            sixteenths(),
            SEQUENCE.fetch_add(1, Ordering::Relaxed),
            &short_hostname(usize::MAX),
        );
        let path = lock.sibling(&name);

        let mut file = Escalation::run_opt(escalation.as_ref(), || {
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(TOKEN_MODE)
                .open(&path)
        })
        .map_err(|e| LockError::TempCreate {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        // From here on the name is ours; Drop cleans it up on every error path.
        let token = Self { path, escalation };

        let written = file
            .set_permissions(Permissions::from_mode(TOKEN_MODE))
            .and_then(|()| file.write(record))
            .and_then(|n| file.sync_all().map(|()| n));

        match written {
            Ok(n) if n == record.len() => {}
            Ok(n) => {
                return Err(LockError::TempWrite {
                    path: token.path.clone(),
                    reason: format!("short write ({} of {} bytes)", n, record.len()),
                });
            }
            Err(e) => {
                return Err(LockError::TempWrite {
                    path: token.path.clone(),
                    reason: e.to_string(),
                });
            }
        }

        tracing::trace!(token = %token.path.display(), "created temporary lock");
        Ok(token)
    }

    /// Path of the token.
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Identity of the token; it must exist while we hold it.
    pub(crate) fn identity(&self) -> Result<FileIdentity> {
        FileIdentity::of(&self.path).map_err(|e| {
            LockError::fatal(
                format!("{}: temporary lock vanished", self.path.display()),
                e,
            )
        })
    }
}

impl Drop for TempToken {
    fn drop(&mut self) {
        let removed = Escalation::run_opt(self.escalation.as_ref(), || fs::remove_file(&self.path));
        if let Err(e) = removed
            && e.kind() != io::ErrorKind::NotFound
        {
            tracing::warn!(
                token = %self.path.display(),
                error = %e,
                "failed to remove temporary lock"
            );
        }
    }
}

//! RAII lock guard implementation.

use super::create::{AcquireOptions, create};
use super::ops;
use crate::error::{LockError, Result};
use crate::privilege::Escalation;
use std::path::{Path, PathBuf};

/// RAII guard for a held lock.
///
/// When dropped, the lock file is removed. If removal fails, a warning is
/// logged but no panic occurs.
#[derive(Debug)]
pub struct LockGuard {
    /// Path to the lock file.
    path: PathBuf,

    /// Group switch needed to remove the lock from its directory.
    escalation: Option<Escalation>,

    /// Whether the lock has been released already.
    released: bool,
}

impl LockGuard {
    /// Acquire the lock at `path` and guard it.
    pub fn acquire(path: impl AsRef<Path>, opts: &AcquireOptions<'_>) -> Result<Self> {
        let path = path.as_ref();
        create(path, opts)?;
        Ok(Self::adopt(path.to_path_buf(), opts.escalation))
    }

    /// Guard a lock this process already holds.
    pub fn adopt(path: PathBuf, escalation: Option<Escalation>) -> Self {
        Self {
            path,
            escalation,
            released: false,
        }
    }

    /// Get the path to the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Refresh the lock's timestamps.
    pub fn touch(&self) -> Result<()> {
        ops::touch(&self.path).map_err(|source| LockError::ActionFailed {
            action: "touch",
            path: self.path.clone(),
            source,
        })
    }

    /// Manually release the lock, reporting failure.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        ops::remove(&self.path, self.escalation.as_ref()).map_err(|source| {
            LockError::ActionFailed {
                action: "remove",
                path: self.path.clone(),
                source,
            }
        })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = ops::remove(&self.path, self.escalation.as_ref())
        {
            tracing::warn!(
                lock = %self.path.display(),
                error = %e,
                "failed to release lock"
            );
        }
    }
}

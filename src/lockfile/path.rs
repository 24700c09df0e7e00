//! Lock path decomposition and length limits.

use crate::error::{LockError, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Room the temporary name needs on top of the lock path.
pub const TEMP_MARGIN: usize = 32;

/// Longest path the platform accepts.
pub const PATH_MAX: usize = libc::PATH_MAX as usize;

/// A lock target split into the directory that holds it and its leaf name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockPath {
    full: PathBuf,
    dir: PathBuf,
}

impl LockPath {
    /// Split `path` into directory and leaf. A bare leaf lives in `.`.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let full = path.into();
        if full.file_name().is_none() {
            return Err(LockError::Usage(format!(
                "{}: not a lock file name",
                full.display()
            )));
        }

        let dir = match full.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        Ok(Self { full, dir })
    }

    /// The full lock path as given.
    pub fn path(&self) -> &Path {
        &self.full
    }

    /// Directory the lock (and every temporary name) lives in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Leaf name of the lock.
    pub fn leaf(&self) -> &OsStr {
        // new() guarantees a file name
        self.full.file_name().unwrap_or_default()
    }

    /// A name next to the lock, on the same filesystem.
    pub fn sibling(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Refuse paths that leave no room for the temporary suffix.
    pub fn check_length(&self) -> Result<()> {
        if self.full.as_os_str().len() + TEMP_MARGIN > PATH_MAX {
            return Err(LockError::NameTooLong(self.full.clone()));
        }
        Ok(())
    }
}

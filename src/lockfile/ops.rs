//! Release and heartbeat of existing locks.

use crate::privilege::Escalation;
use nix::sys::stat::{UtimensatFlags, utimensat};
use nix::sys::time::TimeSpec;
use std::fs;
use std::io;
use std::path::Path;

/// Remove the lock at `path`. An absent lock counts as released.
pub fn remove(path: &Path, escalation: Option<&Escalation>) -> io::Result<()> {
    match Escalation::run_opt(escalation, || fs::remove_file(path)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Set both timestamps of the lock to the filesystem's current time.
pub fn touch(path: &Path) -> io::Result<()> {
    utimensat(
        None,
        path,
        &TimeSpec::UTIME_NOW,
        &TimeSpec::UTIME_NOW,
        UtimensatFlags::NoFollowSymlink,
    )
    .map_err(io::Error::from)
}

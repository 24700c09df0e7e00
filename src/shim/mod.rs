//! Exclusive create that also works on network filesystems.
//!
//! `O_CREAT | O_EXCL` is not atomic on every NFS implementation. The
//! emulation creates a uniquely named file next to the target, hard-links it
//! to the target name and compares inodes, exactly like lock creation. The
//! temporary name is always removed again.
//!
//! [`create_exclusive`] is the entry point for programs that link this
//! crate; the `lockutil-preload` library applies the same protocol to every
//! `open(2)` of a process.

mod names;

pub use names::is_peer_temp_name;

use crate::lockfile::{FileIdentity, PATH_MAX, short_hostname, sixteenths};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use nix::unistd::{close, unlink};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{FromRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// Environment variable that forces emulation on local filesystems.
pub const FORCE_EMULATION_ENV: &str = "LOCKUTIL_FORCE_EMULATION";

/// Room the temporary name needs beyond the target path.
const TEMP_OVERHEAD: usize = 16;

/// `statfs` magic numbers of filesystems without a reliable O_EXCL.
const NETWORK_FS_MAGIC: [u64; 6] = [
    0x6969,      // NFS
    0x517B,      // SMB
    0xFF53_4D42, // CIFS
    0xFE53_4D42, // SMB2
    0x7375_7245, // Coda
    0x5346_414F, // AFS
];

/// When to emulate exclusive creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShimPolicy {
    /// Only in directories on network filesystems.
    #[default]
    Auto,
    /// Everywhere.
    Always,
}

impl ShimPolicy {
    /// `Always` when `LOCKUTIL_FORCE_EMULATION=1`, `Auto` otherwise.
    pub fn from_env() -> Self {
        match std::env::var_os(FORCE_EMULATION_ENV) {
            Some(v) if v == "1" => ShimPolicy::Always,
            _ => ShimPolicy::Auto,
        }
    }

    /// Whether an exclusive create of `path` should be emulated.
    pub fn applies(self, path: &Path) -> bool {
        if let Some(leaf) = path.file_name().and_then(|l| l.to_str())
            && is_peer_temp_name(leaf, std::process::id())
        {
            return false;
        }
        match self {
            ShimPolicy::Always => true,
            ShimPolicy::Auto => is_network_fs(&parent_dir(path)),
        }
    }
}

/// Whether `dir` lives on a network filesystem.
pub fn is_network_fs(dir: &Path) -> bool {
    match nix::sys::statfs::statfs(dir) {
        Ok(fs) => {
            let magic = fs.filesystem_type().0 as u64 & 0xffff_ffff;
            NETWORK_FS_MAGIC.contains(&magic)
        }
        Err(_) => false,
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Temporary name: `.nfs<host:5><pid:05><fraction>` next to `path`.
pub fn temp_path(path: &Path, host: &str, pid: u32, fraction: u32) -> PathBuf {
    let host: String = host.chars().take(5).collect();
    let name = format!(".nfs{}{:05}{:x}", host, pid, fraction & 0xf);
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(name),
        _ => PathBuf::from(name),
    }
}

/// Create `path` exclusively through a temporary name and a hard link.
///
/// `raw_open` performs the real `open(2)` of the temporary name with the
/// caller's `flags` and `mode`. On success its descriptor is returned; it
/// now refers to `path`. A target that turns out to be someone else's file
/// yields `EEXIST`. There is a single attempt.
pub fn open_exclusive<F>(
    path: &Path,
    flags: OFlag,
    mode: Mode,
    mut raw_open: F,
) -> nix::Result<RawFd>
where
    F: FnMut(&Path, OFlag, Mode) -> nix::Result<RawFd>,
{
    if path.as_os_str().len() + TEMP_OVERHEAD > PATH_MAX {
        return Err(Errno::ENAMETOOLONG);
    }

    let temp = temp_path(path, &short_hostname(5), std::process::id(), sixteenths());
    let fd = raw_open(&temp, flags, mode)?;

    let linked = std::fs::hard_link(&temp, path);
    let ours = FileIdentity::of(&temp);
    let theirs = FileIdentity::of(path);
    if let Err(e) = unlink(&temp) {
        tracing::debug!(temp = %temp.display(), error = %e, "cannot remove temporary name");
    }

    let result = match (ours, theirs) {
        (Ok(ours), Ok(theirs)) if ours == theirs => return Ok(fd),
        (Err(e), _) => Err(errno_of(&e)),
        (Ok(_), _) => match linked {
            Err(e) if e.kind() != io::ErrorKind::AlreadyExists => Err(errno_of(&e)),
            _ => Err(Errno::EEXIST),
        },
    };
    let _ = close(fd);
    result
}

fn errno_of(e: &io::Error) -> Errno {
    e.raw_os_error().map(Errno::from_raw).unwrap_or(Errno::EIO)
}

/// Create `path` exclusively for writing with permission bits `mode`.
///
/// Emulated per `policy`; a plain `O_CREAT | O_EXCL` open otherwise.
pub fn create_exclusive(path: &Path, mode: u32, policy: ShimPolicy) -> io::Result<File> {
    if !policy.applies(path) {
        return OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(path);
    }

    let flags = OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_WRONLY | OFlag::O_CLOEXEC;
    let fd = open_exclusive(path, flags, Mode::from_bits_truncate(mode), |p, f, m| {
        nix::fcntl::open(p, f, m)
    })?;
    // SAFETY: the descriptor was just opened and is owned by nobody else.
    Ok(unsafe { File::from_raw_fd(fd) })
}

#[cfg(test)]
mod tests;

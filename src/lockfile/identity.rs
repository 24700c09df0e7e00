//! Device and inode identity of filesystem objects.
//!
//! Hard-link based locking decides ownership by comparing identities, never
//! by trusting the return code of `link(2)`.

use std::fs::Metadata;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// The (device, inode) pair naming one filesystem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    dev: u64,
    ino: u64,
}

impl FileIdentity {
    /// Identity of `path` itself, without following a final symlink.
    pub fn of(path: &Path) -> io::Result<Self> {
        std::fs::symlink_metadata(path).map(|meta| Self::from_metadata(&meta))
    }

    /// Identity of whatever `path` resolves to.
    pub fn resolve(path: &Path) -> io::Result<Self> {
        std::fs::metadata(path).map(|meta| Self::from_metadata(&meta))
    }

    /// Identity recorded in already fetched metadata.
    pub fn from_metadata(meta: &Metadata) -> Self {
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }
}

//! Dot-file locking that stays correct over NFS.
//!
//! # Protocol
//!
//! A lock is an ordinary file `<dir>/<name>` containing either the sentinel
//! `0\n` or a decimal owner pid. It is created by writing a temporary token
//! `<dir>/.lk<pid><fraction><sequence>.<host>` exclusively, hard-linking it
//! to the lock name and checking that both names now refer to the same inode.
//! The return code of `link(2)` is never trusted.
//!
//! # Staleness
//!
//! A lock naming a live process is valid. A lock naming a vanished process is
//! stale at once. Other locks expire after an age window (300s by default),
//! measured against the filesystem's clock when possible.
//!
//! # RAII Guards
//!
//! Temporary tokens are always removed when their guard drops. Held locks can
//! be wrapped in a [`LockGuard`], which removes the lock when dropped.

mod create;
mod guard;
mod identity;
mod ops;
mod path;
mod retry;
mod staleness;
mod temp;


// Re-export public API
pub use create::{AcquireOptions, Interrupt, LockFlags, OwnerRecord, ParentWatch, create};
pub use guard::LockGuard;
pub use identity::FileIdentity;
pub use ops::{remove, touch};
pub use path::{LockPath, PATH_MAX, TEMP_MARGIN};
pub use retry::{Backoff, Retries};
pub use staleness::{StalePolicy, is_valid, recorded_pid};
pub use temp::{TOKEN_MODE, token_name};

pub(crate) use temp::{short_hostname, sixteenths};

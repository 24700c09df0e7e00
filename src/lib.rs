//! NFS-safe dot-file locking for mail spools.
//!
//! - [`lockfile`]: the lock protocol itself (hard link plus identity check,
//!   staleness, retries, guards)
//! - [`privilege`] and [`mailbox`]: who may lock what, and the trusted-group
//!   escalation for mailbox locks
//! - [`delegate`]: running lock operations through the setgid helper
//! - [`supervisor`]: holding a lock while a command runs
//! - [`shim`]: exclusive create that survives NFS, for other programs
//! - [`api`]: the entry points most callers want

pub mod api;
pub mod config;
pub mod delegate;
pub mod error;
pub mod exit_codes;
pub mod lockfile;
pub mod logging;
pub mod mailbox;
pub mod privilege;
pub mod shim;
pub mod supervisor;

pub use api::{MailLock, acquire, heartbeat, is_valid, release};
pub use error::{LockError, Result};
pub use lockfile::{LockFlags, OwnerRecord, Retries};

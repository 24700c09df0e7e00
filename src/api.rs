//! Library entry points for programs that lock mailboxes themselves.
//!
//! Each call decides how the lock directory can be written: directly, with
//! the trusted group switched on around each mutation, or by running the
//! setgid helper. Validity checks never need privileges.

use crate::config::LockConfig;
use crate::delegate::{Delegate, DelegateOp};
use crate::error::{LockError, Result};
use crate::lockfile::{self, AcquireOptions, LockFlags, LockPath, Retries, StalePolicy};
use crate::mailbox::{MailboxOwner, mail_lock_path, spool_lock_path};
use crate::privilege::{AccessDecision, Escalation, PrivilegeContext, check_access};
use nix::unistd::{getegid, getgid};
use std::path::{Path, PathBuf};

/// How mutations of one lock are carried out.
#[derive(Debug, Clone)]
enum Route {
    Direct(Option<Escalation>),
    Delegated(Delegate),
}

fn load_config() -> Result<LockConfig> {
    LockConfig::discover(getegid() == getgid())
}

fn route(path: &Path, config: &LockConfig) -> Result<Route> {
    let ctx = PrivilegeContext::capture(&config.trusted_group)?;
    let lock = LockPath::new(path)?;

    match check_access(
        lock.dir(),
        ctx.real_gid(),
        ctx.trusted_gid(),
        lock.path(),
        || MailboxOwner::current().ok(),
    ) {
        AccessDecision::Writable(_) => Ok(Route::Direct(None)),
        AccessDecision::NeedsTrustedGroup(_) => match ctx.escalation() {
            Some(escalation) => Ok(Route::Direct(Some(escalation))),
            None => Ok(Route::Delegated(Delegate::from_config(config))),
        },
        AccessDecision::Denied => Err(LockError::PermissionDenied(lock.path().to_path_buf())),
        AccessDecision::NoSuchDirectory => {
            Err(LockError::NoSuchDirectory(lock.dir().to_path_buf()))
        }
    }
}

fn acquire_with(
    path: &Path,
    retries: Retries,
    flags: LockFlags,
    config: &LockConfig,
) -> Result<Route> {
    let route = route(path, config)?;
    match &route {
        Route::Direct(escalation) => {
            let opts = AcquireOptions::from_config(config, retries, flags).escalated(*escalation);
            lockfile::create(path, &opts)?;
        }
        Route::Delegated(delegate) => {
            if flags.mandatory {
                return Err(LockError::MandatoryLockUnsupported(path.to_path_buf()));
            }
            delegate.run(&DelegateOp::Lock {
                path: path.to_path_buf(),
                retries,
                owner: flags.owner,
            })?;
        }
    }
    Ok(route)
}

fn release_with(path: &Path, route: &Route) -> Result<()> {
    match route {
        Route::Direct(escalation) => {
            lockfile::remove(path, escalation.as_ref()).map_err(|source| LockError::ActionFailed {
                action: "remove",
                path: path.to_path_buf(),
                source,
            })
        }
        Route::Delegated(delegate) => delegate.run(&DelegateOp::Unlock {
            path: path.to_path_buf(),
        }),
    }
}

fn heartbeat_with(path: &Path, route: &Route) -> Result<()> {
    match route {
        Route::Direct(_) => lockfile::touch(path).map_err(|source| LockError::ActionFailed {
            action: "touch",
            path: path.to_path_buf(),
            source,
        }),
        Route::Delegated(delegate) => delegate.run(&DelegateOp::Touch {
            path: path.to_path_buf(),
        }),
    }
}

/// Create the lock at `path`.
pub fn acquire(path: impl AsRef<Path>, retries: Retries, flags: LockFlags) -> Result<()> {
    let config = load_config()?;
    acquire_with(path.as_ref(), retries, flags, &config).map(|_| ())
}

/// Remove the lock at `path`. An absent lock is not an error, and neither
/// is an absent directory.
pub fn release(path: impl AsRef<Path>) -> Result<()> {
    let config = load_config()?;
    let path = path.as_ref();
    let route = match route(path, &config) {
        Ok(route) => route,
        Err(LockError::NoSuchDirectory(dir)) => {
            tracing::debug!(dir = %dir.display(), "lock directory is gone, nothing to release");
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    release_with(path, &route)
}

/// Refresh the timestamps of the lock at `path`.
pub fn heartbeat(path: impl AsRef<Path>) -> Result<()> {
    let config = load_config()?;
    let path = path.as_ref();
    let route = route(path, &config)?;
    heartbeat_with(path, &route)
}

/// Whether a valid lock exists at `path`.
///
/// `flags.owner` says whether the lock is expected to name a live process.
pub fn is_valid(path: impl AsRef<Path>, flags: LockFlags) -> bool {
    let stale = load_config()
        .map(|config| StalePolicy {
            max_age: config.stale_after(),
        })
        .unwrap_or_default();
    lockfile::is_valid(path.as_ref(), flags.owner.names_owner(), &stale)
}

/// A held mailbox lock, released when dropped.
#[derive(Debug)]
pub struct MailLock {
    path: PathBuf,
    route: Route,
    released: bool,
}

impl MailLock {
    /// Lock the spool mailbox of `user`.
    ///
    /// Locking another user's mailbox only works where the caller can write
    /// the spool directory itself.
    pub fn lock(user: &str, retries: Retries) -> Result<Self> {
        let config = load_config()?;
        let path = spool_lock_path(&config.spool_dir, user);
        Self::acquire_at(path, retries, &config)
    }

    /// Lock the calling user's mailbox, honouring `$MAIL`.
    pub fn lock_current_user(retries: Retries) -> Result<Self> {
        let config = load_config()?;
        let owner = MailboxOwner::current()?;
        let path = mail_lock_path(&owner, &config);
        Self::acquire_at(path, retries, &config)
    }

    fn acquire_at(path: PathBuf, retries: Retries, config: &LockConfig) -> Result<Self> {
        let route = acquire_with(&path, retries, LockFlags::default(), config)?;
        Ok(Self {
            path,
            route,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the lock from going stale.
    pub fn touch(&self) -> Result<()> {
        heartbeat_with(&self.path, &self.route)
    }

    /// Release the lock, reporting failure.
    pub fn unlock(mut self) -> Result<()> {
        self.released = true;
        release_with(&self.path, &self.route)
    }
}

impl Drop for MailLock {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = release_with(&self.path, &self.route)
        {
            tracing::warn!(lock = %self.path.display(), error = %e, "failed to release mailbox lock");
        }
    }
}

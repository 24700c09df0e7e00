//! Lock creation over filesystems without a trustworthy O_EXCL.
//!
//! The protocol, per attempt:
//! 1. hard-link our exclusively created temporary token to the lock name,
//!    ignoring what `link(2)` reports (NFS may lie about it);
//! 2. compare the identities of the token and the lock name;
//! 3. equal means we won, otherwise the existing lock is checked for
//!    staleness and reclaimed or waited out.

use super::identity::FileIdentity;
use super::path::LockPath;
use super::retry::{Backoff, Retries, RetryBudget};
use super::staleness::{StalePolicy, is_valid};
use super::temp::TempToken;
use crate::config::LockConfig;
use crate::error::{LockError, Result};
use crate::privilege::Escalation;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::{Pid, getppid};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

/// What a new lock records about its owner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OwnerRecord {
    /// A sentinel only; staleness is decided by age.
    #[default]
    Sentinel,
    /// The pid of the acquiring process.
    Pid,
    /// The pid of the acquiring process's parent.
    ParentPid,
}

impl OwnerRecord {
    /// Bytes written into the lock.
    pub fn content(self) -> Vec<u8> {
        match self {
            OwnerRecord::Sentinel => b"0\n".to_vec(),
            OwnerRecord::Pid => format!("{}\n", std::process::id()).into_bytes(),
            OwnerRecord::ParentPid => format!("{}\n", getppid()).into_bytes(),
        }
    }

    /// Whether locks of this kind carry an owner pid worth probing.
    pub fn names_owner(self) -> bool {
        self != OwnerRecord::Sentinel
    }
}

/// Per-call lock flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockFlags {
    pub owner: OwnerRecord,
    /// Also request a mandatory lock on the record.
    pub mandatory: bool,
}

/// Source of cancellation requests, typically a caught termination signal.
pub trait Interrupt {
    /// The signal that asked us to stop, if any.
    fn pending(&self) -> Option<i32>;
}

/// Process whose disappearance aborts a waiting acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentWatch {
    pub pid: Pid,
    pub poll: Duration,
}

impl ParentWatch {
    fn check(&self) -> Result<()> {
        match kill(self.pid, None) {
            Err(Errno::ESRCH) => Err(LockError::ParentGone(self.pid.as_raw())),
            _ => Ok(()),
        }
    }
}

/// Everything one acquisition call needs to know.
#[derive(Clone, Copy)]
pub struct AcquireOptions<'a> {
    pub retries: Retries,
    pub flags: LockFlags,
    pub backoff: Backoff,
    pub stale: StalePolicy,
    pub max_stat_failures: u32,
    pub watch_parent: Option<ParentWatch>,
    pub escalation: Option<Escalation>,
    pub interrupt: Option<&'a dyn Interrupt>,
}

impl Default for AcquireOptions<'_> {
    fn default() -> Self {
        Self {
            retries: Retries::default(),
            flags: LockFlags::default(),
            backoff: Backoff::default(),
            stale: StalePolicy::default(),
            max_stat_failures: 5,
            watch_parent: None,
            escalation: None,
            interrupt: None,
        }
    }
}

impl<'a> AcquireOptions<'a> {
    /// Options with the policy values of `config`.
    pub fn from_config(config: &LockConfig, retries: Retries, flags: LockFlags) -> Self {
        Self {
            retries,
            flags,
            backoff: Backoff {
                step: Duration::from_secs(config.backoff_step_secs),
                cap: Duration::from_secs(config.backoff_cap_secs),
            },
            stale: StalePolicy {
                max_age: config.stale_after(),
            },
            max_stat_failures: config.max_stat_failures,
            ..Self::default()
        }
    }

    /// Abort when `interrupt` reports a signal.
    pub fn with_interrupt(self, interrupt: &'a dyn Interrupt) -> Self {
        Self {
            interrupt: Some(interrupt),
            ..self
        }
    }

    /// Abort when `pid` exits while we are waiting.
    pub fn watching_parent(self, pid: Pid, poll: Duration) -> Self {
        Self {
            watch_parent: Some(ParentWatch { pid, poll }),
            ..self
        }
    }

    /// Run the directory-mutating steps under `escalation`.
    pub fn escalated(self, escalation: Option<Escalation>) -> Self {
        Self { escalation, ..self }
    }

    fn check_interrupt(&self) -> Result<()> {
        match self.interrupt.and_then(|i| i.pending()) {
            Some(signal) => Err(LockError::Interrupted(signal)),
            None => Ok(()),
        }
    }

    /// Sleep for `delay`, watching for interruption and for our parent.
    fn pause(&self, delay: Duration) -> Result<()> {
        let mut slice = delay;
        if let Some(watch) = &self.watch_parent {
            slice = slice.min(watch.poll);
        }
        if self.interrupt.is_some() {
            slice = slice.min(Duration::from_secs(1));
        }

        let mut waited = Duration::ZERO;
        let mut since_parent_check = Duration::ZERO;
        while waited < delay {
            let step = slice.min(delay - waited);
            std::thread::sleep(step);
            waited += step;
            since_parent_check += step;

            self.check_interrupt()?;
            if let Some(watch) = &self.watch_parent
                && since_parent_check >= watch.poll
            {
                since_parent_check = Duration::ZERO;
                watch.check()?;
            }
        }
        Ok(())
    }
}

/// Create the lock at `path`.
///
/// # Returns
///
/// * `Ok(())` - The lock is ours
/// * `Err(LockError::NameTooLong)` - Nothing was touched
/// * `Err(LockError::TempCreate | TempWrite)` - The temporary token failed
/// * `Err(LockError::ContentionExhausted)` - A valid lock outlived the retries
/// * `Err(LockError::Fatal)` - Our own token disappeared
/// * `Err(LockError::Interrupted | ParentGone)` - Cancelled; nothing left behind
pub fn create(path: &Path, opts: &AcquireOptions<'_>) -> Result<()> {
    let lock = LockPath::new(path)?;
    lock.check_length()?;
    if opts.flags.mandatory {
        return Err(LockError::MandatoryLockUnsupported(lock.path().to_path_buf()));
    }
    opts.check_interrupt()?;

    let token = TempToken::create(&lock, &opts.flags.owner.content(), opts.escalation)?;
    let owner_expected = opts.flags.owner.names_owner();
    let escalation = opts.escalation.as_ref();

    let mut budget = RetryBudget::new(opts.retries);
    let mut stat_failures = 0u32;
    let mut skip_pause = false;

    while let Some(attempt) = budget.next_attempt() {
        if attempt > 0 && !skip_pause {
            opts.pause(opts.backoff.delay(attempt))?;
        }
        skip_pause = false;
        opts.check_interrupt()?;

        if let Err(e) = Escalation::run_opt(escalation, || fs::hard_link(token.path(), lock.path())) {
            tracing::trace!(lock = %lock.path().display(), error = %e, "link reported failure");
        }

        let ours = token.identity()?;
        let theirs = match FileIdentity::of(lock.path()) {
            Ok(id) => id,
            Err(e) => {
                stat_failures += 1;
                tracing::debug!(
                    lock = %lock.path().display(),
                    error = %e,
                    stat_failures,
                    "cannot stat lock"
                );
                if stat_failures >= opts.max_stat_failures {
                    return Err(LockError::ContentionExhausted(lock.path().to_path_buf()));
                }
                continue;
            }
        };
        stat_failures = 0;

        if ours == theirs {
            if let Err(e) = opts.check_interrupt() {
                remove_lock(lock.path(), escalation);
                return Err(e);
            }
            tracing::debug!(lock = %lock.path().display(), attempt, "lock acquired");
            return Ok(());
        }

        if is_valid(lock.path(), owner_expected, &opts.stale) {
            tracing::debug!(lock = %lock.path().display(), attempt, "lock is held");
            continue;
        }

        match Escalation::run_opt(escalation, || fs::remove_file(lock.path())) {
            Ok(()) => {
                tracing::debug!(lock = %lock.path().display(), "reclaimed stale lock");
                budget.refund();
                skip_pause = true;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                budget.refund();
                skip_pause = true;
            }
            Err(e) => {
                tracing::warn!(lock = %lock.path().display(), error = %e, "cannot remove stale lock");
            }
        }
    }

    Err(LockError::ContentionExhausted(lock.path().to_path_buf()))
}

fn remove_lock(path: &Path, escalation: Option<&Escalation>) {
    if let Err(e) = Escalation::run_opt(escalation, || fs::remove_file(path))
        && e.kind() != io::ErrorKind::NotFound
    {
        tracing::warn!(lock = %path.display(), error = %e, "cannot remove interrupted lock");
    }
}

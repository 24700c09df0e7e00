//! Running lock operations through the privileged helper binary.
//!
//! A caller that cannot switch to the trusted group itself asks the setgid
//! helper to do the work. The helper's exit status maps straight back onto
//! [`LockError`].

use crate::config::LockConfig;
use crate::error::{LockError, Result};
use crate::exit_codes;
use crate::lockfile::{OwnerRecord, Retries};
use nix::sys::signal::{SigSet, SigmaskHow, Signal, sigprocmask};
use std::ffi::OsString;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

/// An operation to hand to the helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegateOp {
    Lock {
        path: PathBuf,
        retries: Retries,
        owner: OwnerRecord,
    },
    Unlock {
        path: PathBuf,
    },
    Touch {
        path: PathBuf,
    },
}

impl DelegateOp {
    pub fn path(&self) -> &Path {
        match self {
            DelegateOp::Lock { path, .. }
            | DelegateOp::Unlock { path }
            | DelegateOp::Touch { path } => path,
        }
    }

    /// Helper command line for this operation.
    ///
    /// The helper records its parent's pid for `-p`, and its parent is us,
    /// so any pid-carrying record becomes `-p`.
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        match self {
            DelegateOp::Lock {
                retries, owner, ..
            } => {
                args.push("-l".into());
                args.push("-r".into());
                args.push(retries.as_count().to_string().into());
                if owner.names_owner() {
                    args.push("-p".into());
                }
            }
            DelegateOp::Unlock { .. } => args.push("-u".into()),
            DelegateOp::Touch { .. } => args.push("-t".into()),
        }
        args.push("-q".into());
        args.push(self.path().as_os_str().to_owned());
        args
    }
}

/// Blocks a set of signals until dropped.
struct SignalMask {
    previous: SigSet,
}

impl SignalMask {
    fn block(signals: &[Signal]) -> io::Result<Self> {
        let mut set = SigSet::empty();
        for &signal in signals {
            set.add(signal);
        }
        let mut previous = SigSet::empty();
        sigprocmask(SigmaskHow::SIG_BLOCK, Some(&set), Some(&mut previous))?;
        Ok(Self { previous })
    }
}

impl Drop for SignalMask {
    fn drop(&mut self) {
        if let Err(e) = sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None) {
            tracing::warn!(error = %e, "failed to restore signal mask");
        }
    }
}

/// The privileged helper program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delegate {
    helper: PathBuf,
}

impl Delegate {
    pub fn new(helper: impl Into<PathBuf>) -> Self {
        Self {
            helper: helper.into(),
        }
    }

    pub fn from_config(config: &LockConfig) -> Self {
        Self::new(&config.helper_path)
    }

    /// Run `op` in the helper and translate its exit status.
    pub fn run(&self, op: &DelegateOp) -> Result<()> {
        let status = self.spawn_and_wait(op)?;
        map_status(op, status)
    }

    fn spawn_and_wait(&self, op: &DelegateOp) -> Result<ExitStatus> {
        tracing::debug!(
            helper = %self.helper.display(),
            lock = %op.path().display(),
            "delegating lock operation"
        );

        // A SIGCHLD handler in the host program must not reap our helper.
        let _mask = SignalMask::block(&[Signal::SIGCHLD])
            .map_err(|e| LockError::fatal("sigprocmask", e))?;

        Command::new(&self.helper)
            .args(op.args())
            .status()
            .map_err(|e| LockError::fatal(format!("{}", self.helper.display()), e))
    }
}

fn map_status(op: &DelegateOp, status: ExitStatus) -> Result<()> {
    let path = op.path();
    let Some(code) = status.code() else {
        let signal = status.signal().unwrap_or_default();
        return Err(LockError::fatal(
            format!("{}: lock helper", path.display()),
            io::Error::other(format!("killed by signal {}", signal)),
        ));
    };

    if code == exit_codes::EXEC_FAILED {
        return Err(LockError::from_exit_code(code, path).unwrap_or_else(|| {
            LockError::fatal("lock helper", io::Error::other("exit status 127"))
        }));
    }

    match op {
        DelegateOp::Lock { .. } => match LockError::from_exit_code(code, path) {
            None => Ok(()),
            Some(err) => Err(err),
        },
        DelegateOp::Unlock { .. } | DelegateOp::Touch { .. } => {
            if code == exit_codes::SUCCESS {
                return Ok(());
            }
            let action = if matches!(op, DelegateOp::Unlock { .. }) {
                "remove"
            } else {
                "touch"
            };
            Err(LockError::ActionFailed {
                action,
                path: path.to_path_buf(),
                source: io::Error::other(format!("lock helper exit status {}", code)),
            })
        }
    }
}

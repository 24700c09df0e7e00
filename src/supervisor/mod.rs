//! Running a command while holding a lock.
//!
//! The supervisor ignores termination signals, starts the command with
//! default dispositions and the real group, refreshes the lock periodically
//! until the command exits, and then removes the lock whatever happened.

mod signals;

pub use signals::{CancelGuard, HeartbeatTimer, IgnoredSignals, TERMINATION, reraise};

use crate::error::{LockError, Result};
use crate::lockfile::LockGuard;
use nix::errno::Errno;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{Gid, Pid};
use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

/// How to run a supervised command.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Heartbeat period, or `None` when the lock records a pid that lives
    /// as long as the command.
    pub heartbeat: Option<Duration>,
    /// Directory the command runs in.
    pub workdir: PathBuf,
    /// Group the command runs with, for good.
    pub real_gid: Gid,
}

/// Run `command` while `guard` is held and return its exit status.
///
/// A command killed by a signal reports `128 + signal`. The lock is removed
/// before returning, also when the command could not be started.
pub fn run(guard: LockGuard, command: &[OsString], opts: &SupervisorOptions) -> Result<i32> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| LockError::Usage("no command to run".to_string()))?;

    let _ignored = IgnoredSignals::install()?;

    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(&opts.workdir);
    let gid = opts.real_gid.as_raw();
    // SAFETY: only async-signal-safe calls between fork and exec.
    unsafe {
        cmd.pre_exec(move || {
            for signal in TERMINATION {
                libc::signal(signal as libc::c_int, libc::SIG_DFL);
            }
            libc::signal(libc::SIGALRM, libc::SIG_DFL);
            if libc::setresgid(gid, gid, gid) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = cmd.spawn().map_err(|source| LockError::Exec {
        program: program.to_string_lossy().into_owned(),
        source,
    })?;
    let pid = Pid::from_raw(child.id() as i32);
    tracing::debug!(pid = pid.as_raw(), lock = %guard.path().display(), "command started");

    let timer = opts.heartbeat.map(HeartbeatTimer::start).transpose()?;
    let status = wait_for(pid, &guard, timer.as_ref());
    drop(timer);
    if let Err(e) = guard.release() {
        tracing::warn!(error = %e, "failed to release lock after command");
    }
    status
}

fn wait_for(pid: Pid, guard: &LockGuard, timer: Option<&HeartbeatTimer>) -> Result<i32> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(128 + signal as i32),
            Ok(_) => continue,
            Err(Errno::EINTR) => {
                if let Some(timer) = timer
                    && timer.take_fired()
                {
                    match guard.touch() {
                        Ok(()) => tracing::trace!(lock = %guard.path().display(), "heartbeat"),
                        Err(e) => tracing::warn!(error = %e, "heartbeat failed"),
                    }
                }
            }
            Err(e) => return Err(LockError::fatal("waitpid", e.into())),
        }
    }
}

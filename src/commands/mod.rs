//! Command implementation for lockutil.
//!
//! The helper may run setgid. It records and drops the borrowed group before
//! doing anything else, checks which group may write the lock directory,
//! enters that directory and works on the leaf name from there on.

use crate::cli::{Action, Cli, Invocation, Target};
use lockutil::config::LockConfig;
use lockutil::error::{LockError, Result};
use lockutil::exit_codes;
use lockutil::lockfile::{
    self, AcquireOptions, FileIdentity, LockFlags, LockGuard, LockPath, OwnerRecord, PATH_MAX,
    Retries, StalePolicy,
};
use lockutil::logging::init_logging;
use lockutil::mailbox::{MailboxOwner, mail_lock_path};
use lockutil::privilege::{AccessDecision, Escalation, PrivilegeContext, check_access};
use lockutil::supervisor::{self, CancelGuard, SupervisorOptions, reraise};
use nix::unistd::{getegid, getgid, getppid};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Run one invocation and return the process exit status.
pub fn run(cli: Cli) -> Result<i32> {
    // Record the borrowed group and stop using it straight away.
    let privileged = getegid() != getgid();
    let mut ctx = PrivilegeContext::capture_and_drop("")?;

    let inv = cli.invocation()?;
    init_logging(inv.quiet);

    let config = LockConfig::discover(!privileged)?;
    if !privileged {
        ctx = PrivilegeContext::capture(&config.trusted_group)?;
    }

    let path = match &inv.target {
        Target::Mailbox => mail_lock_path(&MailboxOwner::current()?, &config),
        Target::Path(path) => path.clone(),
    };
    if path.as_os_str().len() >= PATH_MAX {
        return Err(LockError::NameTooLong(path));
    }

    let lock = LockPath::new(&path)?;
    let (escalation, dir_identity) = decide_access(&ctx, &lock)?;
    tracing::debug!(
        lock = %path.display(),
        escalated = escalation.is_some(),
        "access decided"
    );

    let workdir = std::env::current_dir()
        .map_err(|e| LockError::fatal("cannot determine working directory", e))?;
    enter_directory(lock.dir(), dir_identity)?;
    let leaf = PathBuf::from(lock.leaf());

    match inv.action {
        Action::Check => check(&leaf, &path, &inv, &config),
        Action::Unlock => {
            lockfile::remove(&leaf, escalation.as_ref()).map_err(|source| {
                LockError::ActionFailed {
                    action: "remove",
                    path: path.clone(),
                    source,
                }
            })?;
            Ok(exit_codes::SUCCESS)
        }
        Action::Touch => {
            lockfile::touch(&leaf).map_err(|source| LockError::ActionFailed {
                action: "touch",
                path: path.clone(),
                source,
            })?;
            Ok(exit_codes::SUCCESS)
        }
        Action::Lock => lock_and_run(&leaf, &inv, &config, &ctx, escalation, workdir),
    }
}

/// Pick the group that may write the lock directory.
///
/// Returns the escalation to use around each mutation, if any, and the
/// identity of the directory as seen during the check.
fn decide_access(
    ctx: &PrivilegeContext,
    lock: &LockPath,
) -> Result<(Option<Escalation>, FileIdentity)> {
    match check_access(
        lock.dir(),
        ctx.real_gid(),
        ctx.trusted_gid(),
        lock.path(),
        || MailboxOwner::current().ok(),
    ) {
        AccessDecision::Writable(identity) => {
            // The trusted group is not needed at all; give it up for good.
            ctx.relinquish()?;
            Ok((None, identity))
        }
        AccessDecision::NeedsTrustedGroup(identity) => match ctx.escalation() {
            Some(escalation) => Ok((Some(escalation), identity)),
            None => Err(LockError::PermissionDenied(lock.path().to_path_buf())),
        },
        AccessDecision::Denied => Err(LockError::PermissionDenied(lock.path().to_path_buf())),
        AccessDecision::NoSuchDirectory => {
            Err(LockError::NoSuchDirectory(lock.dir().to_path_buf()))
        }
    }
}

/// Change into `dir` and make sure it is still the directory we checked.
fn enter_directory(dir: &Path, expected: FileIdentity) -> Result<()> {
    std::env::set_current_dir(dir).map_err(|e| {
        tracing::debug!(dir = %dir.display(), error = %e, "cannot enter lock directory");
        LockError::NoSuchDirectory(dir.to_path_buf())
    })?;

    let here = FileIdentity::resolve(Path::new("."))
        .map_err(|_| LockError::NoSuchDirectory(dir.to_path_buf()))?;
    if here != expected {
        return Err(LockError::DirectoryChanged(dir.to_path_buf()));
    }
    Ok(())
}

fn check(leaf: &Path, path: &Path, inv: &Invocation, config: &LockConfig) -> Result<i32> {
    let stale = StalePolicy {
        max_age: config.stale_after(),
    };
    if lockfile::is_valid(leaf, inv.record_pid, &stale) {
        Ok(exit_codes::SUCCESS)
    } else {
        Err(LockError::NotLocked(path.to_path_buf()))
    }
}

fn lock_and_run(
    leaf: &Path,
    inv: &Invocation,
    config: &LockConfig,
    ctx: &PrivilegeContext,
    escalation: Option<Escalation>,
    workdir: PathBuf,
) -> Result<i32> {
    // With a command we stay alive as long as it runs, so our own pid is
    // the better record; without one the caller is the owner.
    let owner = match (inv.record_pid, inv.command.is_empty()) {
        (false, _) => OwnerRecord::Sentinel,
        (true, true) => OwnerRecord::ParentPid,
        (true, false) => OwnerRecord::Pid,
    };
    let flags = LockFlags {
        owner,
        mandatory: false,
    };
    let retries = inv
        .retries
        .unwrap_or(Retries::Limited(config.default_retries));

    let cancel = CancelGuard::install()?;
    let opts = AcquireOptions::from_config(config, retries, flags)
        .escalated(escalation)
        .with_interrupt(&cancel)
        .watching_parent(getppid(), Duration::from_secs(config.parent_poll_secs));

    match lockfile::create(leaf, &opts) {
        Ok(()) => {}
        Err(LockError::Interrupted(signal)) => {
            drop(cancel);
            reraise(signal)?;
            return Err(LockError::Interrupted(signal));
        }
        Err(e) => return Err(e),
    }

    if inv.command.is_empty() {
        return Ok(exit_codes::SUCCESS);
    }

    let guard = LockGuard::adopt(leaf.to_path_buf(), escalation);
    let heartbeat = (owner != OwnerRecord::Pid).then(|| config.heartbeat_interval());
    let status = supervisor::run(
        guard,
        &inv.command,
        &SupervisorOptions {
            heartbeat,
            workdir,
            real_gid: ctx.real_gid(),
        },
    );
    drop(cancel);
    status
}

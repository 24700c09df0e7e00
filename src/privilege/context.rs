//! Group identities of the running process and scoped elevation.

use crate::error::{LockError, Result};
use nix::unistd::{Gid, Group, getegid, geteuid, getgid, getresgid, setegid, setresgid};
use std::io;

/// Permission to switch the effective group to the trusted group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Escalation {
    trusted: Gid,
}

impl Escalation {
    pub fn new(trusted: Gid) -> Self {
        Self { trusted }
    }

    /// Group this escalation switches to.
    pub fn trusted_gid(&self) -> Gid {
        self.trusted
    }

    /// Switch to the trusted group until the returned guard drops.
    pub fn enter(&self) -> io::Result<Elevation> {
        let previous = getegid();
        if previous == self.trusted {
            return Ok(Elevation { previous: None });
        }
        setegid(self.trusted)?;
        tracing::trace!(gid = self.trusted.as_raw(), "elevated effective group");
        Ok(Elevation {
            previous: Some(previous),
        })
    }

    /// Run one operation with the trusted group.
    pub fn run<T>(&self, op: impl FnOnce() -> io::Result<T>) -> io::Result<T> {
        let _elevated = self.enter()?;
        op()
    }

    /// Run `op` elevated if an escalation is given, as-is otherwise.
    pub fn run_opt<T>(
        escalation: Option<&Escalation>,
        op: impl FnOnce() -> io::Result<T>,
    ) -> io::Result<T> {
        match escalation {
            Some(escalation) => escalation.run(op),
            None => op(),
        }
    }
}

/// An active group elevation. Dropping it restores the previous group.
#[must_use = "the elevation ends when this guard is dropped"]
#[derive(Debug)]
pub struct Elevation {
    previous: Option<Gid>,
}

impl Drop for Elevation {
    fn drop(&mut self) {
        if let Some(previous) = self.previous {
            if let Err(e) = setegid(previous) {
                // Continuing with a borrowed group is worse than dying.
                tracing::error!(error = %e, "cannot drop trusted group, aborting");
                std::process::abort();
            }
            tracing::trace!(gid = previous.as_raw(), "restored effective group");
        }
    }
}

/// Group identities of this process.
#[derive(Debug, Clone)]
pub struct PrivilegeContext {
    real_gid: Gid,
    trusted_gid: Gid,
    can_switch: bool,
}

impl PrivilegeContext {
    /// Record the process identities without changing them.
    ///
    /// A process started with a borrowed effective group (a setgid binary)
    /// treats that group as trusted. Otherwise `trusted_group` is looked up;
    /// an unknown group name leaves only the real group.
    pub fn capture(trusted_group: &str) -> Result<Self> {
        let real_gid = getgid();
        let ids = getresgid().map_err(|e| LockError::fatal("getresgid", e.into()))?;

        let trusted_gid = if ids.effective != real_gid {
            ids.effective
        } else {
            match Group::from_name(trusted_group) {
                Ok(Some(group)) => group.gid,
                _ => real_gid,
            }
        };

        let can_switch =
            geteuid().is_root() || trusted_gid == ids.effective || trusted_gid == ids.saved;

        Ok(Self {
            real_gid,
            trusted_gid,
            can_switch,
        })
    }

    /// Record the process identities, then make the real group effective.
    ///
    /// A setgid helper calls this before doing anything else.
    pub fn capture_and_drop(trusted_group: &str) -> Result<Self> {
        let ctx = Self::capture(trusted_group)?;
        ctx.drop_to_real()?;
        Ok(ctx)
    }

    /// Build a context from known values.
    pub fn new(real_gid: Gid, trusted_gid: Gid, can_switch: bool) -> Self {
        Self {
            real_gid,
            trusted_gid,
            can_switch,
        }
    }

    /// Make the real group effective; the trusted group stays borrowable.
    pub fn drop_to_real(&self) -> Result<()> {
        setegid(self.real_gid).map_err(|e| LockError::fatal("setegid", e.into()))
    }

    /// Give up the trusted group for good.
    pub fn relinquish(&self) -> Result<()> {
        setresgid(self.real_gid, self.real_gid, self.real_gid)
            .map_err(|e| LockError::fatal("setresgid", e.into()))
    }

    pub fn real_gid(&self) -> Gid {
        self.real_gid
    }

    pub fn trusted_gid(&self) -> Gid {
        self.trusted_gid
    }

    /// Whether this process can switch to the trusted group itself.
    pub fn can_switch(&self) -> bool {
        self.can_switch
    }

    /// The escalation this process may use, if it has a distinct trusted group.
    pub fn escalation(&self) -> Option<Escalation> {
        (self.can_switch && self.trusted_gid != self.real_gid)
            .then(|| Escalation::new(self.trusted_gid))
    }
}

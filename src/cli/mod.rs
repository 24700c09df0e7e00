//! CLI argument parsing for lockutil.
//!
//! Uses clap derive macros for declarative argument definitions. The flags
//! are the traditional single-letter ones so existing mail scripts keep
//! working; [`Cli::invocation`] turns them into one validated request.

use clap::{ArgGroup, Parser};
use lockutil::error::{LockError, Result};
use lockutil::lockfile::Retries;
use std::ffi::OsString;
use std::path::PathBuf;

/// Lockutil: create, check and remove NFS-safe dot-file locks.
///
/// With a command after the lock file, the lock is held while the command
/// runs and removed when it exits.
#[derive(Parser, Debug)]
#[command(name = "lockutil")]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("action").args(["lock", "unlock", "touch", "check"])))]
pub struct Cli {
    /// Create the lock (the default action).
    #[arg(short = 'l')]
    pub lock: bool,

    /// Remove the lock.
    #[arg(short = 'u')]
    pub unlock: bool,

    /// Refresh the lock's timestamps.
    #[arg(short = 't')]
    pub touch: bool,

    /// Exit 0 if a valid lock exists, 1 otherwise.
    #[arg(short = 'c')]
    pub check: bool,

    /// Retries before giving up; -1 retries forever.
    #[arg(short = 'r', value_name = "RETRIES", allow_negative_numbers = true)]
    pub retries: Option<i64>,

    /// Record the parent's pid (the command's pid when running one).
    #[arg(short = 'p')]
    pub pid: bool,

    /// Lock the caller's mailbox instead of a named file.
    #[arg(short = 'm')]
    pub mailbox: bool,

    /// Print no diagnostics.
    #[arg(short = 'q')]
    pub quiet: bool,

    /// Accepted for compatibility; does nothing.
    #[arg(short = 'N', hide = true)]
    pub nop: bool,

    /// Lock file, then an optional command with arguments.
    #[arg(
        value_name = "LOCKFILE|COMMAND",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub args: Vec<OsString>,
}

/// What to do with the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Lock,
    Unlock,
    Touch,
    Check,
}

/// Which lock file to operate on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The caller's mailbox lock.
    Mailbox,
    Path(PathBuf),
}

/// A validated command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub action: Action,
    pub target: Target,
    pub retries: Option<Retries>,
    pub record_pid: bool,
    pub quiet: bool,
    pub command: Vec<OsString>,
}

impl Cli {
    /// Check the flag combination and split the positional arguments.
    pub fn invocation(self) -> Result<Invocation> {
        let action = if self.unlock {
            Action::Unlock
        } else if self.touch {
            Action::Touch
        } else if self.check {
            Action::Check
        } else {
            Action::Lock
        };

        let mut args = self.args.into_iter();
        let target = if self.mailbox {
            Target::Mailbox
        } else {
            match args.next() {
                Some(path) => Target::Path(PathBuf::from(path)),
                None => return Err(LockError::Usage("no lock file given".to_string())),
            }
        };

        let command: Vec<OsString> = args.collect();
        if !command.is_empty() && action != Action::Lock {
            return Err(LockError::Usage(
                "a command can only be run while locking".to_string(),
            ));
        }

        Ok(Invocation {
            action,
            target,
            retries: self.retries.map(Retries::from_count),
            record_pid: self.pid,
            quiet: self.quiet,
            command,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Invocation {
        Cli::try_parse_from(args).unwrap().invocation().unwrap()
    }

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn cli_debug_assert() {
        // Verifies the CLI arguments configuration is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_plain_lock() {
        let inv = parse(&["lockutil", "/var/mail/bob.lock"]);
        assert_eq!(inv.action, Action::Lock);
        assert_eq!(inv.target, Target::Path(PathBuf::from("/var/mail/bob.lock")));
        assert_eq!(inv.retries, None);
        assert!(!inv.record_pid);
        assert!(inv.command.is_empty());
    }

    #[test]
    fn parse_lock_with_options() {
        let inv = parse(&["lockutil", "-l", "-r", "3", "-p", "-q", "x.lock"]);
        assert_eq!(inv.retries, Some(Retries::Limited(3)));
        assert!(inv.record_pid);
        assert!(inv.quiet);
    }

    #[test]
    fn negative_retries_mean_forever() {
        let inv = parse(&["lockutil", "-r", "-1", "x.lock"]);
        assert_eq!(inv.retries, Some(Retries::Unlimited));
    }

    #[test]
    fn parse_mailbox_with_command() {
        let inv = parse(&["lockutil", "-m", "mutt", "-f", "inbox"]);
        assert_eq!(inv.target, Target::Mailbox);
        assert_eq!(inv.command, os(&["mutt", "-f", "inbox"]));
    }

    #[test]
    fn command_flags_are_not_ours() {
        let inv = parse(&["lockutil", "x.lock", "ls", "-l", "-u"]);
        assert_eq!(inv.action, Action::Lock);
        assert_eq!(inv.command, os(&["ls", "-l", "-u"]));
    }

    #[test]
    fn parse_actions() {
        assert_eq!(parse(&["lockutil", "-u", "x.lock"]).action, Action::Unlock);
        assert_eq!(parse(&["lockutil", "-t", "x.lock"]).action, Action::Touch);
        assert_eq!(parse(&["lockutil", "-c", "-p", "x.lock"]).action, Action::Check);
        assert_eq!(parse(&["lockutil", "-N", "x.lock"]).action, Action::Lock);
    }

    #[test]
    fn actions_are_exclusive() {
        assert!(Cli::try_parse_from(["lockutil", "-u", "-c", "x.lock"]).is_err());
    }

    #[test]
    fn missing_lock_file_is_a_usage_error() {
        let err = Cli::try_parse_from(["lockutil", "-l"])
            .unwrap()
            .invocation()
            .unwrap_err();
        assert!(matches!(err, LockError::Usage(_)));
    }

    #[test]
    fn command_with_unlock_is_a_usage_error() {
        let err = Cli::try_parse_from(["lockutil", "-u", "x.lock", "true"])
            .unwrap()
            .invocation()
            .unwrap_err();
        assert!(matches!(err, LockError::Usage(_)));
    }
}

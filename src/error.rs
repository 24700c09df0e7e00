//! Error types for lockutil.
//!
//! Uses thiserror for derive macros. Every variant maps to one of the classic
//! dot-locking exit codes so scripted callers can branch without parsing text.

use crate::exit_codes;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main error type for lock operations.
#[derive(Error, Debug)]
pub enum LockError {
    /// Bad command line.
    #[error("{0}")]
    Usage(String),

    /// The lock path leaves no room for the temporary name.
    #[error("{}: name too long", .0.display())]
    NameTooLong(PathBuf),

    /// Neither the real nor the trusted group may write the lock directory.
    #[error("{}: permission denied", .0.display())]
    PermissionDenied(PathBuf),

    /// The lock directory does not exist or cannot be entered.
    #[error("{}: no such directory", .0.display())]
    NoSuchDirectory(PathBuf),

    /// The lock directory was replaced between the access check and use.
    #[error("{}: directory changed underneath us!", .0.display())]
    DirectoryChanged(PathBuf),

    /// The temporary lock file could not be created.
    #[error("{}: cannot create temporary lock: {reason}", path.display())]
    TempCreate { path: PathBuf, reason: String },

    /// The owner record could not be written into the temporary lock file.
    #[error("{}: cannot write temporary lock: {reason}", path.display())]
    TempWrite { path: PathBuf, reason: String },

    /// A valid competing lock outlived the retry budget.
    #[error("{}: lock is held by another process", .0.display())]
    ContentionExhausted(PathBuf),

    /// An operation on an object this process just created failed.
    #[error("{context}: {source}")]
    Fatal {
        context: String,
        #[source]
        source: io::Error,
    },

    /// A termination signal arrived while the lock was being acquired.
    #[error("interrupted by signal {0}")]
    Interrupted(i32),

    /// The process we were acquiring on behalf of went away.
    #[error("parent process {0} exited while waiting for the lock")]
    ParentGone(i32),

    /// Mandatory locking was requested but the platform does not offer it.
    #[error("{}: mandatory locking is not supported", .0.display())]
    MandatoryLockUnsupported(PathBuf),

    /// `-c` found no valid lock.
    #[error("{}: no valid lock", .0.display())]
    NotLocked(PathBuf),

    /// Unlock or touch failed.
    #[error("{}: cannot {action} lock: {source}", path.display())]
    ActionFailed {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The supervised command could not be started.
    #[error("{program}: {source}")]
    Exec {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Configuration could not be loaded or is invalid.
    #[error("{0}")]
    Config(String),

    /// The calling uid has no passwd entry.
    #[error("You don't exist. Go away.")]
    UnknownUser,
}

impl LockError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LockError::Usage(_) => exit_codes::ACTION_FAILED,
            LockError::NameTooLong(_) => exit_codes::NAME_TOO_LONG,
            LockError::PermissionDenied(_)
            | LockError::NoSuchDirectory(_)
            | LockError::DirectoryChanged(_)
            | LockError::TempCreate { .. } => exit_codes::TEMP_CREATE_FAILED,
            LockError::TempWrite { .. } => exit_codes::TEMP_WRITE_FAILED,
            LockError::ContentionExhausted(_) => exit_codes::CONTENTION_EXHAUSTED,
            LockError::MandatoryLockUnsupported(_) => exit_codes::MANDATORY_LOCK_UNSUPPORTED,
            LockError::NotLocked(_) | LockError::ActionFailed { .. } => exit_codes::ACTION_FAILED,
            LockError::Exec { .. } => exit_codes::EXEC_FAILED,
            LockError::Fatal { .. }
            | LockError::Interrupted(_)
            | LockError::ParentGone(_)
            | LockError::Config(_)
            | LockError::UnknownUser => exit_codes::GENERIC_ERROR,
        }
    }

    /// Rebuild an acquisition error from a lock helper's exit status.
    ///
    /// Returns `None` for a successful status. The reserved exec-failure
    /// status and unknown codes become `Fatal`.
    pub fn from_exit_code(code: i32, path: &Path) -> Option<Self> {
        let path = path.to_path_buf();
        let err = match code {
            exit_codes::SUCCESS => return None,
            exit_codes::NAME_TOO_LONG => LockError::NameTooLong(path),
            exit_codes::TEMP_CREATE_FAILED => LockError::TempCreate {
                path,
                reason: "lock helper could not create it".to_string(),
            },
            exit_codes::TEMP_WRITE_FAILED => LockError::TempWrite {
                path,
                reason: "lock helper could not write it".to_string(),
            },
            exit_codes::CONTENTION_EXHAUSTED => LockError::ContentionExhausted(path),
            exit_codes::MANDATORY_LOCK_UNSUPPORTED => LockError::MandatoryLockUnsupported(path),
            exit_codes::EXEC_FAILED => LockError::Fatal {
                context: format!("{}: lock helper failed to execute", path.display()),
                source: io::Error::other("exit status 127"),
            },
            other => LockError::Fatal {
                context: format!("{}: lock helper failed", path.display()),
                source: io::Error::other(format!("exit status {}", other)),
            },
        };
        Some(err)
    }

    /// Shorthand for a `Fatal` error.
    pub fn fatal(context: impl Into<String>, source: io::Error) -> Self {
        LockError::Fatal {
            context: context.into(),
            source,
        }
    }
}

/// Result type alias for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;

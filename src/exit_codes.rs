//! Exit code constants for the lockutil CLI and helper protocol.
//!
//! Lock acquisition results are the classic dot-locking codes, so mail
//! agents that already branch on them keep working:
//! - 0: Success
//! - 1: Lock name too long
//! - 2: Could not create the temporary lock (also: permission / directory trouble)
//! - 3: Could not write the temporary lock
//! - 4: Gave up after the maximum number of attempts
//! - 5: Any other error
//! - 6: Mandatory locking requested but unsupported
//!
//! The check, unlock and touch actions only report `SUCCESS` or
//! `ACTION_FAILED`.

/// Lock created (or action succeeded).
pub const SUCCESS: i32 = 0;

/// The lock path leaves no room for the temporary name.
pub const NAME_TOO_LONG: i32 = 1;

/// The temporary lock file could not be created.
pub const TEMP_CREATE_FAILED: i32 = 2;

/// The owner record could not be written into the temporary lock file.
pub const TEMP_WRITE_FAILED: i32 = 3;

/// A valid competing lock outlived the retry budget.
pub const CONTENTION_EXHAUSTED: i32 = 4;

/// Unexpected failure; the diagnostic says what happened.
pub const GENERIC_ERROR: i32 = 5;

/// Mandatory locking was requested on a system that does not provide it.
pub const MANDATORY_LOCK_UNSUPPORTED: i32 = 6;

/// Failure of `-c`, `-u` or `-t`, and bad command lines.
pub const ACTION_FAILED: i32 = 1;

/// Reserved status of a helper process that could not be executed.
pub const EXEC_FAILED: i32 = 127;

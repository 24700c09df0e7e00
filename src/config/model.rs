//! LockConfig struct definition and default implementation.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for lock acquisition, supervision and delegation.
///
/// This struct represents the contents of `/etc/lockutil.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    // =========================================================================
    // Staleness
    // =========================================================================
    /// Seconds after which a lock without a live owner is considered stale.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    // =========================================================================
    // Retry policy
    // =========================================================================
    /// Retries used when the caller does not specify any.
    #[serde(default = "default_retries")]
    pub default_retries: u32,

    /// Linear backoff step between attempts, in seconds.
    #[serde(default = "default_backoff_step_secs")]
    pub backoff_step_secs: u64,

    /// Upper bound on a single backoff sleep, in seconds.
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,

    /// Consecutive failures to stat the lock before giving up.
    #[serde(default = "default_max_stat_failures")]
    pub max_stat_failures: u32,

    /// How often a waiting helper checks that its parent is still alive.
    #[serde(default = "default_parent_poll_secs")]
    pub parent_poll_secs: u64,

    // =========================================================================
    // Command supervision
    // =========================================================================
    /// Interval between lock refreshes while a guarded command runs.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    // =========================================================================
    // Mail spool and privileges
    // =========================================================================
    /// Directory holding `<user>` mailboxes and their `<user>.lock` files.
    #[serde(default = "default_spool_dir")]
    pub spool_dir: PathBuf,

    /// Group allowed to write the spool directory.
    #[serde(default = "default_trusted_group")]
    pub trusted_group: String,

    /// Setgid helper used by unprivileged library callers.
    #[serde(default = "default_helper_path")]
    pub helper_path: PathBuf,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
            default_retries: default_retries(),
            backoff_step_secs: default_backoff_step_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
            max_stat_failures: default_max_stat_failures(),
            parent_poll_secs: default_parent_poll_secs(),
            heartbeat_secs: default_heartbeat_secs(),
            spool_dir: default_spool_dir(),
            trusted_group: default_trusted_group(),
            helper_path: default_helper_path(),
        }
    }
}

fn default_stale_after_secs() -> u64 {
    300
}
fn default_retries() -> u32 {
    5
}
fn default_backoff_step_secs() -> u64 {
    5
}
fn default_backoff_cap_secs() -> u64 {
    60
}
fn default_max_stat_failures() -> u32 {
    5
}
fn default_parent_poll_secs() -> u64 {
    5
}
fn default_heartbeat_secs() -> u64 {
    30
}
fn default_spool_dir() -> PathBuf {
    PathBuf::from("/var/mail")
}
fn default_trusted_group() -> String {
    "mail".to_string()
}
fn default_helper_path() -> PathBuf {
    PathBuf::from("/usr/bin/lockutil")
}

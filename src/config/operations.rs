//! Config loading, validation, and discovery.

use super::model::LockConfig;
use crate::error::{LockError, Result};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV: &str = "LOCKUTIL_CONFIG";

/// System-wide config file, read when present.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/lockutil.yaml";

impl LockConfig {
    /// Load config from a YAML file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML file
    ///
    /// # Returns
    ///
    /// * `Ok(LockConfig)` - Successfully loaded and validated config
    /// * `Err(LockError::Config)` - Read error, parse error or validation failure
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            LockError::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: LockConfig = serde_yaml::from_str(yaml)
            .map_err(|e| LockError::Config(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| LockError::Config(format!("failed to serialize config to YAML: {}", e)))
    }

    /// Find and load the effective configuration.
    ///
    /// `$LOCKUTIL_CONFIG` is honoured only when `allow_env` is set; a setgid
    /// helper passes false so its caller cannot steer it. Otherwise
    /// `/etc/lockutil.yaml` is used if it exists, and the built-in defaults
    /// if not.
    pub fn discover(allow_env: bool) -> Result<Self> {
        if allow_env
            && let Some(path) = std::env::var_os(CONFIG_ENV)
        {
            return Self::load(path);
        }

        let system = Path::new(SYSTEM_CONFIG_PATH);
        if system.exists() {
            return Self::load(system);
        }

        Ok(Self::default())
    }

    /// Validate config values and return error on invalid values.
    ///
    /// Validation rules:
    /// - `stale_after_secs`, `heartbeat_secs` and `parent_poll_secs` must be positive
    /// - `backoff_cap_secs` must not be smaller than `backoff_step_secs`
    /// - `trusted_group` must be non-empty
    pub fn validate(&self) -> Result<()> {
        if self.stale_after_secs == 0 {
            return Err(LockError::Config(
                "config validation failed: stale_after_secs must be greater than 0".to_string(),
            ));
        }

        if self.heartbeat_secs == 0 {
            return Err(LockError::Config(
                "config validation failed: heartbeat_secs must be greater than 0".to_string(),
            ));
        }

        if self.parent_poll_secs == 0 {
            return Err(LockError::Config(
                "config validation failed: parent_poll_secs must be greater than 0".to_string(),
            ));
        }

        if self.backoff_cap_secs < self.backoff_step_secs {
            return Err(LockError::Config(format!(
                "config validation failed: backoff_cap_secs ({}) is smaller than backoff_step_secs ({})",
                self.backoff_cap_secs, self.backoff_step_secs
            )));
        }

        if self.trusted_group.trim().is_empty() {
            return Err(LockError::Config(
                "config validation failed: trusted_group must be non-empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Age after which an ownerless lock is stale.
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// Interval between heartbeats of a supervised lock.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

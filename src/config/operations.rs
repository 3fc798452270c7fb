//! Config loading, validation, and conversion operations.

use super::model::Config;
use crate::error::{LockError, Result};
use crate::lock::LockDefaults;
use std::path::Path;
use std::time::Duration;

impl Config {
    /// Load config from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            LockError::UserError(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Load config from `path` if it exists, otherwise use defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse config from a YAML string.
    ///
    /// An empty document yields the defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = if yaml.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(yaml)
                .map_err(|e| LockError::UserError(format!("failed to parse config YAML: {}", e)))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| LockError::UserError(format!("failed to serialize config to YAML: {}", e)))
    }

    /// Validate config values.
    ///
    /// Validation rules:
    /// - every duration must be a finite number
    /// - `lock_timeout` and the named lock timeouts must not be negative
    /// - `lock_retry_interval` and `lock_expiration` must be positive
    pub fn validate(&self) -> Result<()> {
        let non_negative = [
            ("lock_timeout", self.lock_timeout),
            ("deployment_lock_timeout", self.deployment_lock_timeout),
            ("compile_lock_timeout", self.compile_lock_timeout),
        ];
        for (field, value) in non_negative {
            seconds(field, value)?;
        }

        let positive = [
            ("lock_retry_interval", self.lock_retry_interval),
            ("lock_expiration", self.lock_expiration),
        ];
        for (field, value) in positive {
            if seconds(field, value)?.is_zero() {
                return Err(LockError::UserError(format!(
                    "config validation failed: {} must be greater than 0",
                    field
                )));
            }
        }

        Ok(())
    }

    /// Default lock options derived from this config.
    pub fn lock_defaults(&self) -> Result<LockDefaults> {
        Ok(LockDefaults {
            timeout: seconds("lock_timeout", self.lock_timeout)?,
            retry_interval: seconds("lock_retry_interval", self.lock_retry_interval)?,
            expiration: seconds("lock_expiration", self.lock_expiration)?,
            deployment_timeout: self.deployment_lock_timeout()?,
            compile_timeout: self.compile_lock_timeout()?,
        })
    }

    pub fn deployment_lock_timeout(&self) -> Result<Duration> {
        seconds("deployment_lock_timeout", self.deployment_lock_timeout)
    }

    pub fn compile_lock_timeout(&self) -> Result<Duration> {
        seconds("compile_lock_timeout", self.compile_lock_timeout)
    }
}

/// Convert a config value in seconds to a `Duration`.
pub(crate) fn seconds(field: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        LockError::UserError(format!(
            "config validation failed: {} must be a non-negative number of seconds (found {})",
            field, value
        ))
    })
}

//! Config struct definition and default implementation.

use serde::{Deserialize, Serialize};

/// Configuration for locks created by this director.
///
/// Durations are in seconds and may be fractional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Lock defaults
    // =========================================================================
    /// Maximum time spent trying to acquire a lock (0 = single attempt).
    pub lock_timeout: f64,

    /// Delay between acquisition attempts.
    pub lock_retry_interval: f64,

    /// Lease lifetime granted per acquisition or renewal.
    pub lock_expiration: f64,

    /// Whether to record acquire/release/lost events in the audit log.
    pub record_events: bool,

    // =========================================================================
    // Named lock timeouts
    // =========================================================================
    /// Acquisition timeout for deployment, release, and stemcell locks.
    pub deployment_lock_timeout: f64,

    /// Acquisition timeout for package compilation locks.
    pub compile_lock_timeout: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_timeout: 1.0,
            lock_retry_interval: 0.1,
            lock_expiration: 10.0,
            record_events: true,
            deployment_lock_timeout: 10.0,
            compile_lock_timeout: 15.0 * 60.0,
        }
    }
}

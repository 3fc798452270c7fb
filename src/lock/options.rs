//! Lock construction parameters.

use std::time::Duration;

/// Defaults applied to every lock option left unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockDefaults {
    /// Maximum time spent trying to acquire (0 = single attempt).
    pub timeout: Duration,

    /// Delay between acquisition attempts.
    pub retry_interval: Duration,

    /// Lease lifetime per acquisition or renewal.
    pub expiration: Duration,

    /// Acquisition timeout for deployment, release, and stemcell locks.
    pub deployment_timeout: Duration,

    /// Acquisition timeout for package compilation locks.
    pub compile_timeout: Duration,
}

impl Default for LockDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            retry_interval: Duration::from_millis(100),
            expiration: Duration::from_secs(10),
            deployment_timeout: Duration::from_secs(10),
            compile_timeout: Duration::from_secs(15 * 60),
        }
    }
}

/// Optional settings for a [`Lock`](super::Lock).
///
/// Unset values fall back to the context's [`LockDefaults`] and, for the task
/// id, to the ambient task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockOptions {
    pub deployment_name: Option<String>,
    pub blocked_by: Option<String>,
    pub timeout: Option<Duration>,
    pub retry_interval: Option<Duration>,
    pub expiration: Option<Duration>,
    pub task_id: Option<String>,
}

impl LockOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deployment label attached to audit events (not part of the lock's identity).
    pub fn deployment_name(mut self, deployment: impl Into<String>) -> Self {
        self.deployment_name = Some(deployment.into());
        self
    }

    /// Lock that must be free (transiently acquirable) before this one is taken.
    pub fn blocked_by(mut self, lock_name: impl Into<String>) -> Self {
        self.blocked_by = Some(lock_name.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = Some(retry_interval);
        self
    }

    pub fn expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Task recorded as the holder, instead of the ambient current task.
    pub fn task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

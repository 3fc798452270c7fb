//! Lease-based distributed locks.
//!
//! A [`Lock`] serializes a critical section across every director process
//! that shares the same [`LockRecordStore`](crate::store::LockRecordStore).
//!
//! # Protocol
//!
//! 1. If `blocked_by` is set, the dependency lock is acquired and released
//!    first, using the same timeout budget. Two leases are never held at once.
//! 2. The lease is created atomically; a live lease is waited on, a stale one
//!    is taken over with a single compare-and-replace, and a lease whose
//!    holder task no longer exists fails fast with `Lock is gone`.
//! 3. While the critical section runs, a renewal thread extends the lease
//!    every `expiration / 2`. If an extension finds the lease gone, the lease
//!    is lost: a `lost` event is recorded and the task is set to cancelling.
//! 4. When the section returns (or panics) the renewal thread is stopped and
//!    the lease is released, unless it was lost.
//!
//! Lease loss never interrupts the section. It must poll
//! [`LeaseWatch::checkpoint`] (or the task's cancellation flag) and unwind on
//! its own.
//!
//! # Example
//!
//! ```no_run
//! use fleetlock::context::LockContext;
//! use fleetlock::events::MemoryEventLog;
//! use fleetlock::lock::{Lock, LockOptions};
//! use fleetlock::store::MemoryLockStore;
//! use fleetlock::task::TaskRegistry;
//! use std::sync::Arc;
//!
//! let ctx = LockContext::new(
//!     Arc::new(MemoryLockStore::new()),
//!     Arc::new(MemoryEventLog::new()),
//!     Arc::new(TaskRegistry::new("admin")),
//! );
//! let lock = Lock::new("lock:deployment:web", &ctx, LockOptions::new().deployment_name("web"))?;
//! let updated = lock.protect(|watch| {
//!     watch.checkpoint()?;
//!     Ok::<_, fleetlock::error::LockError>("updated")
//! })?;
//! # Ok::<(), fleetlock::error::LockError>(())
//! ```

mod acquire;
mod guard;
mod options;
mod renewal;

#[cfg(test)]
mod tests;

pub use options::{LockDefaults, LockOptions};
pub use renewal::LeaseWatch;

use crate::context::LockContext;
use crate::error::{AcquisitionReason, LockError, Result};
use crate::events::{Event, EventAction};
use chrono::{DateTime, TimeDelta, Utc};
use guard::HeldLease;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of a critical section run under a lock.
#[derive(Debug)]
pub struct Protected<R> {
    /// What the critical section returned.
    pub value: R,

    /// Whether the lease was lost while the section ran.
    pub lease_lost: bool,

    /// A failure while releasing the lease. Never replaces `value`.
    pub release_error: Option<LockError>,
}

impl<R> Protected<R> {
    pub fn into_inner(self) -> R {
        self.value
    }
}

/// A single-use lease on a named resource.
///
/// Construct one per protected region; [`Lock::run`] and [`Lock::protect`]
/// consume it.
#[derive(Debug)]
pub struct Lock {
    name: String,
    uid: String,
    deployment_name: Option<String>,
    blocked_by: Option<String>,
    timeout: Duration,
    retry_interval: Duration,
    expiration: Duration,
    lease: TimeDelta,
    task_id: Option<String>,
    ctx: LockContext,
    /// Transient dependency locks stay out of the audit log.
    audited: bool,
}

impl Lock {
    /// Build a lock on `name`.
    ///
    /// Fails with `InvalidLock` for an empty name, a lock blocked by itself,
    /// or a zero expiration or retry interval.
    pub fn new(name: impl Into<String>, ctx: &LockContext, options: LockOptions) -> Result<Self> {
        let name = name.into();
        let defaults = ctx.defaults();

        if name.trim().is_empty() {
            return Err(LockError::InvalidLock("lock name must not be empty".to_string()));
        }
        if options.blocked_by.as_deref() == Some(name.as_str()) {
            return Err(LockError::InvalidLock(format!(
                "lock '{}' cannot be blocked by itself",
                name
            )));
        }
        if options.blocked_by.as_deref().is_some_and(|b| b.trim().is_empty()) {
            return Err(LockError::InvalidLock(format!(
                "lock '{}' has an empty blocked_by name",
                name
            )));
        }

        let expiration = options.expiration.unwrap_or(defaults.expiration);
        let retry_interval = options.retry_interval.unwrap_or(defaults.retry_interval);
        if expiration.is_zero() {
            return Err(LockError::InvalidLock(format!(
                "lock '{}' expiration must be greater than 0",
                name
            )));
        }
        if retry_interval.is_zero() {
            return Err(LockError::InvalidLock(format!(
                "lock '{}' retry interval must be greater than 0",
                name
            )));
        }
        let lease = TimeDelta::from_std(expiration).map_err(|_| {
            LockError::InvalidLock(format!("lock '{}' expiration is too large", name))
        })?;

        let task_id = options
            .task_id
            .or_else(|| ctx.tasks().current_task_id());

        Ok(Self {
            name,
            uid: Uuid::new_v4().to_string(),
            deployment_name: options.deployment_name,
            blocked_by: options.blocked_by,
            timeout: options.timeout.unwrap_or(defaults.timeout),
            retry_interval,
            expiration,
            lease,
            task_id,
            ctx: ctx.clone(),
            audited: true,
        })
    }

    /// A quiet lock on `dependency` sharing this lock's settings, used to
    /// resolve `blocked_by`.
    fn transient(&self, dependency: &str) -> Self {
        Self {
            name: dependency.to_string(),
            uid: Uuid::new_v4().to_string(),
            deployment_name: self.deployment_name.clone(),
            blocked_by: None,
            timeout: self.timeout,
            retry_interval: self.retry_interval,
            expiration: self.expiration,
            lease: self.lease,
            task_id: self.task_id.clone(),
            ctx: self.ctx.clone(),
            audited: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The holder id written into the lock record by this instance.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    pub fn deployment_name(&self) -> Option<&str> {
        self.deployment_name.as_deref()
    }

    pub fn blocked_by(&self) -> Option<&str> {
        self.blocked_by.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    /// Run `section` while holding the lease.
    ///
    /// Acquisition failures and store errors during acquisition are returned
    /// as `Err`. Once the section has run, its value is always returned; lease
    /// loss and release failures are reported alongside it.
    pub fn run<R, F>(self, section: F) -> Result<Protected<R>>
    where
        F: FnOnce(&LeaseWatch) -> R,
    {
        let deadline = deadline_after(self.timeout);
        self.acquire(deadline)?;

        let held = HeldLease::new(&self);
        info!(lock = %self.name, uid = %self.uid, task = ?self.task_id, "acquired lock");
        self.record(EventAction::Acquire);

        let watch = LeaseWatch::new(&self.name, self.task_id.clone(), self.ctx.tasks().clone());
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let value = thread::scope(|scope| {
            // Dropping the sender (also on unwind) wakes and stops the renewer.
            let _stop_renewal = stop_tx;
            scope.spawn(|| self.renew_until_stopped(stop_rx, &watch));
            section(&watch)
        });

        let mut lease_lost = watch.is_lost();
        let mut release_error = None;
        if lease_lost {
            held.disarm();
        } else {
            match held.release() {
                Ok(1..) => {
                    info!(lock = %self.name, uid = %self.uid, "released lock");
                    self.record(EventAction::Release);
                }
                Ok(0) => {
                    warn!(lock = %self.name, uid = %self.uid, "lease vanished before release");
                    self.lease_lost(&watch);
                    lease_lost = true;
                }
                Err(e) => {
                    warn!(lock = %self.name, uid = %self.uid, error = %e, "failed to release lock");
                    release_error = Some(e);
                }
            }
        }

        Ok(Protected {
            value,
            lease_lost,
            release_error,
        })
    }

    /// Run a fallible `section` while holding the lease and return its result.
    ///
    /// Acquisition failures are converted into `E`. A release failure after
    /// the section completed is logged and does not override its result.
    pub fn protect<T, E, F>(self, section: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&LeaseWatch) -> std::result::Result<T, E>,
        E: From<LockError>,
    {
        self.run(section)?.into_inner()
    }

    fn failure(&self, reason: AcquisitionReason) -> LockError {
        LockError::AcquisitionTimeout {
            name: self.name.clone(),
            uid: self.uid.clone(),
            reason,
        }
    }

    fn expires_from_now(&self) -> DateTime<Utc> {
        Utc::now()
            .checked_add_signed(self.lease)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn record(&self, action: EventAction) {
        if !self.audited {
            return;
        }
        let event = Event::lock(action, &self.name, self.ctx.tasks().current_actor())
            .with_task(self.task_id.clone())
            .with_deployment(self.deployment_name.clone());
        self.ctx.record(&event);
    }
}

/// `now + timeout`, saturating far in the future for huge timeouts.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365 * 100))
}

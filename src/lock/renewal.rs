//! Lease renewal and loss detection.

use super::Lock;
use crate::context::LockContext;
use crate::error::{LockError, Result};
use crate::events::EventAction;
use crate::task::TaskContext;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;
use tracing::{debug, error, warn};

const MIN_RENEWAL_INTERVAL: Duration = Duration::from_millis(1);

/// Handle given to a critical section to observe lease loss and cancellation.
pub struct LeaseWatch {
    lock_name: String,
    task_id: Option<String>,
    tasks: Arc<dyn TaskContext>,
    lost: Arc<AtomicBool>,
    /// Loss flags of leases this one is nested inside.
    enclosing: Vec<Arc<AtomicBool>>,
}

impl LeaseWatch {
    pub(super) fn new(lock_name: &str, task_id: Option<String>, tasks: Arc<dyn TaskContext>) -> Self {
        Self {
            lock_name: lock_name.to_string(),
            task_id,
            tasks,
            lost: Arc::new(AtomicBool::new(false)),
            enclosing: Vec::new(),
        }
    }

    /// A watch with no lease behind it. It only observes task cancellation.
    pub(crate) fn unleased(ctx: &LockContext) -> Self {
        Self::new("", ctx.tasks().current_task_id(), ctx.tasks().clone())
    }

    /// A watch over this lease that also reports the loss of `outer`'s
    /// lease (and of anything `outer` is nested in).
    pub fn nested_in(&self, outer: &LeaseWatch) -> LeaseWatch {
        let mut enclosing = outer.enclosing.clone();
        enclosing.push(outer.lost.clone());
        enclosing.extend(self.enclosing.iter().cloned());
        Self {
            lock_name: self.lock_name.clone(),
            task_id: self.task_id.clone().or_else(|| outer.task_id.clone()),
            tasks: self.tasks.clone(),
            lost: self.lost.clone(),
            enclosing,
        }
    }

    /// Whether the renewal loop found this lease, or an enclosing one, gone.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
            || self.enclosing.iter().any(|lost| lost.load(Ordering::SeqCst))
    }

    pub(super) fn mark_lost(&self) {
        self.lost.store(true, Ordering::SeqCst);
    }

    /// The task protected by this lease, if any.
    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    /// Whether the section should stop: the lease is lost or the task was
    /// asked to cancel.
    pub fn should_stop(&self) -> Result<bool> {
        if self.is_lost() {
            return Ok(true);
        }
        match &self.task_id {
            Some(task_id) => self.tasks.is_cancelling(task_id),
            None => Ok(false),
        }
    }

    /// Cooperative cancellation checkpoint.
    ///
    /// Returns `Cancelled` once the section should stop.
    pub fn checkpoint(&self) -> Result<()> {
        if self.should_stop()? {
            let who = self.task_id.as_deref().unwrap_or(&self.lock_name);
            return Err(LockError::Cancelled(who.to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for LeaseWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseWatch")
            .field("lock_name", &self.lock_name)
            .field("task_id", &self.task_id)
            .field("lost", &self.is_lost())
            .finish()
    }
}

impl Lock {
    /// Half the lease, so a renewal lands before expiry under normal latency.
    pub(super) fn renewal_interval(&self) -> Duration {
        (self.expiration / 2).max(MIN_RENEWAL_INTERVAL)
    }

    /// Extend the lease every renewal interval until `stop` fires or
    /// disconnects. Gives up at the first failed extension.
    pub(super) fn renew_until_stopped(&self, stop: Receiver<()>, watch: &LeaseWatch) {
        let interval = self.renewal_interval();
        loop {
            match stop.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            }

            let expires_at = self.expires_from_now();
            match self
                .ctx
                .store()
                .compare_and_extend(&self.name, &self.uid, expires_at)
            {
                Ok(0) => {
                    warn!(lock = %self.name, uid = %self.uid, "lease no longer held");
                    self.lease_lost(watch);
                    return;
                }
                Ok(_) => {
                    debug!(lock = %self.name, uid = %self.uid, %expires_at, "renewed lock");
                }
                Err(e) => {
                    error!(lock = %self.name, uid = %self.uid, error = %e, "failed to renew lock");
                    self.lease_lost(watch);
                    return;
                }
            }
        }
    }

    /// Flag the loss, audit it, and ask the owning task to cancel.
    pub(super) fn lease_lost(&self, watch: &LeaseWatch) {
        watch.mark_lost();
        self.record(EventAction::Lost);

        let Some(task_id) = &self.task_id else {
            return;
        };
        match self.ctx.tasks().set_cancelling(task_id) {
            Ok(()) => warn!(lock = %self.name, task = %task_id, "lost lock, cancelling task"),
            Err(e) => error!(
                lock = %self.name,
                task = %task_id,
                error = %e,
                "lost lock but failed to cancel task"
            ),
        }
    }
}

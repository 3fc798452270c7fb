//! Acquisition: blocked-by resolution and the bounded create/steal/wait loop.

use super::Lock;
use super::guard::HeldLease;
use crate::error::{AcquisitionReason, LockError, Result};
use crate::store::LockRecord;
use std::thread;
use std::time::Instant;
use tracing::{debug, info};

impl Lock {
    /// Acquire the lease before `deadline`, resolving `blocked_by` first.
    pub(super) fn acquire(&self, deadline: Instant) -> Result<()> {
        if let Some(dependency) = &self.blocked_by {
            self.wait_for_dependency(dependency, deadline)?;
        }

        self.acquire_lease(deadline)?;

        if let Some(dependency) = &self.blocked_by {
            self.recheck_dependency(dependency)?;
        }
        Ok(())
    }

    /// Take and immediately release the dependency lock within our budget.
    fn wait_for_dependency(&self, dependency: &str, deadline: Instant) -> Result<()> {
        let transient = self.transient(dependency);
        match transient.acquire(deadline) {
            Ok(()) => {}
            Err(LockError::AcquisitionTimeout { reason, .. }) => {
                debug!(
                    lock = %self.name,
                    blocked_by = %dependency,
                    %reason,
                    "blocking lock is held"
                );
                return Err(self.failure(AcquisitionReason::BlockedByOtherLocks));
            }
            Err(e) => return Err(e),
        }

        HeldLease::new(&transient).release()?;
        Ok(())
    }

    /// Back out if the dependency was taken between its release and our create.
    fn recheck_dependency(&self, dependency: &str) -> Result<()> {
        match self.ctx.store().get(dependency)? {
            Some(record) if !record.is_expired() => {
                debug!(
                    lock = %self.name,
                    blocked_by = %dependency,
                    holder_task = ?record.task_id,
                    "blocking lock appeared during acquisition"
                );
                self.ctx.store().compare_and_delete(&self.name, &self.uid)?;
                Err(self.failure(AcquisitionReason::BlockedByOtherLocks))
            }
            _ => Ok(()),
        }
    }

    fn new_record(&self) -> LockRecord {
        LockRecord::new(
            &self.name,
            &self.uid,
            self.expires_from_now(),
            self.task_id.clone(),
        )
    }

    /// Create the lease, steal it if stale, or wait for it until `deadline`.
    fn acquire_lease(&self, deadline: Instant) -> Result<()> {
        let store = self.ctx.store();
        let mut spare_retry = true;

        loop {
            let record = self.new_record();
            if store.create_if_absent(&record)? {
                return Ok(());
            }

            let Some(current) = store.get(&self.name)? else {
                // Released between our create and read; try again right away.
                // Past the deadline only one such retry is allowed.
                if Instant::now() >= deadline && !std::mem::take(&mut spare_retry) {
                    return Err(self.failure(AcquisitionReason::HeldBy(None)));
                }
                debug!(lock = %self.name, "lock released while reading, retrying");
                continue;
            };

            if current.is_expired() {
                if store.replace_expired(&current.holder_id, &record)? {
                    info!(
                        lock = %self.name,
                        uid = %self.uid,
                        stale_uid = %current.holder_id,
                        stale_task = ?current.task_id,
                        "took over stale lock"
                    );
                    return Ok(());
                }
                debug!(lock = %self.name, "lost race for stale lock");
            } else if let Some(task_id) = &current.task_id
                && !self.ctx.tasks().task_exists(task_id)?
            {
                return Err(self.failure(AcquisitionReason::LockIsGone));
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(self.failure(AcquisitionReason::HeldBy(current.task_id)));
            }
            thread::sleep(self.retry_interval.min(deadline - now));
        }
    }
}

//! RAII guard for a held lease.

use super::Lock;
use crate::error::Result;
use tracing::warn;

/// Releases the lease when dropped, so a panicking critical section does not
/// leave it behind until expiry.
///
/// If release fails during drop, a warning is logged but no panic occurs.
pub(super) struct HeldLease<'a> {
    lock: &'a Lock,
    released: bool,
}

impl<'a> HeldLease<'a> {
    pub(super) fn new(lock: &'a Lock) -> Self {
        Self {
            lock,
            released: false,
        }
    }

    /// Delete the lease if it is still ours. Returns the number of records deleted.
    ///
    /// On error the guard stays armed, so dropping it tries once more.
    pub(super) fn release(mut self) -> Result<usize> {
        let deleted = self
            .lock
            .ctx
            .store()
            .compare_and_delete(&self.lock.name, &self.lock.uid)?;
        self.released = true;
        Ok(deleted)
    }

    /// Give up ownership without touching the store (the lease was lost).
    pub(super) fn disarm(mut self) {
        self.released = true;
    }
}

impl Drop for HeldLease<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self
            .lock
            .ctx
            .store()
            .compare_and_delete(&self.lock.name, &self.lock.uid)
        {
            warn!(
                lock = %self.lock.name,
                uid = %self.lock.uid,
                error = %e,
                "failed to release lock on drop"
            );
        }
    }
}

//! Lock record storage.
//!
//! The store is the single arbiter of who holds a lease. A record's existence
//! IS the lock being held; a record whose `expires_at` has passed is a stale
//! lease that any competitor may replace.
//!
//! Every trait operation must be atomic with respect to every other operation
//! on the same store, including from other processes. Implementations wrap
//! each compound read-check-write in a single critical section:
//! - [`MemoryLockStore`]: one mutex around the table
//! - [`FileLockStore`]: one exclusive OS file lock around the locks directory

mod file;
mod memory;


pub use file::FileLockStore;
pub use memory::MemoryLockStore;

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted lease on a named resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// The lock name (unique key).
    pub name: String,

    /// Opaque token identifying the acquisition attempt that owns the lease.
    pub holder_id: String,

    /// When the lease lapses unless renewed.
    pub expires_at: DateTime<Utc>,

    /// The background task holding the lease, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl LockRecord {
    pub fn new(
        name: impl Into<String>,
        holder_id: impl Into<String>,
        expires_at: DateTime<Utc>,
        task_id: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            holder_id: holder_id.into(),
            expires_at,
            task_id,
        }
    }

    /// Whether the lease had lapsed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Transactional table of lock records keyed by name.
pub trait LockRecordStore: Send + Sync {
    /// Insert `record` unless a record with the same name exists.
    ///
    /// Returns `true` if the record was created.
    fn create_if_absent(&self, record: &LockRecord) -> Result<bool>;

    /// Read the record for `name`.
    fn get(&self, name: &str) -> Result<Option<LockRecord>>;

    /// Delete the record for `name` only if it is owned by `holder_id`.
    ///
    /// Returns the number of records deleted (0 or 1).
    fn compare_and_delete(&self, name: &str, holder_id: &str) -> Result<usize>;

    /// Push `expires_at` forward only if the record is owned by `holder_id`.
    ///
    /// Never moves the expiry backward. Returns the number of records
    /// updated (0 or 1); 0 means the lease is no longer ours.
    fn compare_and_extend(
        &self,
        name: &str,
        holder_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<usize>;

    /// Replace a stale lease in one step.
    ///
    /// Succeeds only if the current record for `record.name` is still owned by
    /// `stale_holder_id` and has expired. Returns `true` if `record` now owns
    /// the lease.
    fn replace_expired(&self, stale_holder_id: &str, record: &LockRecord) -> Result<bool>;

    /// Unconditionally delete the record for `name` (operator clear).
    fn delete(&self, name: &str) -> Result<usize>;

    /// All records, sorted by name.
    fn list(&self) -> Result<Vec<LockRecord>>;
}

//! In-process lock store.

use super::{LockRecord, LockRecordStore};
use crate::error::Result;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Lock store backed by a mutex-protected map.
///
/// Coordinates threads within one process only.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    records: Mutex<BTreeMap<String, LockRecord>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, BTreeMap<String, LockRecord>> {
        // A panicking caller cannot leave a half-applied operation behind:
        // every mutation is a single map call.
        self.records
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl LockRecordStore for MemoryLockStore {
    fn create_if_absent(&self, record: &LockRecord) -> Result<bool> {
        let mut table = self.table();
        if table.contains_key(&record.name) {
            return Ok(false);
        }
        table.insert(record.name.clone(), record.clone());
        Ok(true)
    }

    fn get(&self, name: &str) -> Result<Option<LockRecord>> {
        Ok(self.table().get(name).cloned())
    }

    fn compare_and_delete(&self, name: &str, holder_id: &str) -> Result<usize> {
        let mut table = self.table();
        match table.get(name) {
            Some(current) if current.holder_id == holder_id => {
                table.remove(name);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    fn compare_and_extend(
        &self,
        name: &str,
        holder_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<usize> {
        let mut table = self.table();
        match table.get_mut(name) {
            Some(current) if current.holder_id == holder_id => {
                current.expires_at = current.expires_at.max(expires_at);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    fn replace_expired(&self, stale_holder_id: &str, record: &LockRecord) -> Result<bool> {
        let mut table = self.table();
        match table.get(&record.name) {
            Some(current) if current.holder_id == stale_holder_id && current.is_expired() => {
                table.insert(record.name.clone(), record.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn delete(&self, name: &str) -> Result<usize> {
        Ok(usize::from(self.table().remove(name).is_some()))
    }

    fn list(&self) -> Result<Vec<LockRecord>> {
        Ok(self.table().values().cloned().collect())
    }
}

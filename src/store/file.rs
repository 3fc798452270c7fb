//! On-disk lock store shared by every process that can see the directory.
//!
//! # Layout
//!
//! ```text
//! <locks_dir>/
//!   .store.lock                     exclusive OS lock held for every operation
//!   lock%3Adeployment%3Afoo.json    one JSON LockRecord per held lock
//! ```
//!
//! The OS lock turns each read-check-write sequence into a transaction, so
//! compare-and-delete, compare-and-extend and stale replacement have no
//! lost-update window even between processes.

use super::{LockRecord, LockRecordStore};
use crate::error::{LockError, Result};
use crate::fs::{atomic_write, create_exclusive, read_json, with_dir_lock};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const GUARD_FILE: &str = ".store.lock";
const RECORD_EXTENSION: &str = "json";

/// Lock store backed by one file per lock record.
#[derive(Debug, Clone)]
pub struct FileLockStore {
    dir: PathBuf,
}

impl FileLockStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            LockError::Store(format!(
                "failed to create locks directory '{}': {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record file for `name`.
    pub fn record_path(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", encode_name(name), RECORD_EXTENSION))
    }

    /// Run `op` while holding the store-wide exclusive lock.
    fn transaction<T>(&self, op: impl FnOnce() -> Result<T>) -> Result<T> {
        with_dir_lock(&self.dir, GUARD_FILE, op)
    }

    fn read(&self, name: &str) -> Result<Option<LockRecord>> {
        read_json(self.record_path(name))
    }

    fn write(&self, record: &LockRecord) -> Result<()> {
        atomic_write(self.record_path(&record.name), &to_json(record)?)
    }

    fn remove(&self, name: &str) -> Result<usize> {
        let path = self.record_path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(1),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(LockError::Store(format!(
                "failed to remove lock record '{}': {}",
                path.display(),
                e
            ))),
        }
    }
}

impl LockRecordStore for FileLockStore {
    fn create_if_absent(&self, record: &LockRecord) -> Result<bool> {
        let json = to_json(record)?;
        self.transaction(|| create_exclusive(self.record_path(&record.name), &json))
    }

    fn get(&self, name: &str) -> Result<Option<LockRecord>> {
        self.transaction(|| self.read(name))
    }

    fn compare_and_delete(&self, name: &str, holder_id: &str) -> Result<usize> {
        self.transaction(|| match self.read(name)? {
            Some(current) if current.holder_id == holder_id => self.remove(name),
            _ => Ok(0),
        })
    }

    fn compare_and_extend(
        &self,
        name: &str,
        holder_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<usize> {
        self.transaction(|| match self.read(name)? {
            Some(mut current) if current.holder_id == holder_id => {
                current.expires_at = current.expires_at.max(expires_at);
                self.write(&current)?;
                Ok(1)
            }
            _ => Ok(0),
        })
    }

    fn replace_expired(&self, stale_holder_id: &str, record: &LockRecord) -> Result<bool> {
        self.transaction(|| match self.read(&record.name)? {
            Some(current) if current.holder_id == stale_holder_id && current.is_expired() => {
                self.write(record)?;
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    fn delete(&self, name: &str) -> Result<usize> {
        self.transaction(|| self.remove(name))
    }

    fn list(&self) -> Result<Vec<LockRecord>> {
        self.transaction(|| {
            let entries = fs::read_dir(&self.dir).map_err(|e| {
                LockError::Store(format!(
                    "failed to read locks directory '{}': {}",
                    self.dir.display(),
                    e
                ))
            })?;

            let mut records = Vec::new();
            for entry in entries {
                let path = entry
                    .map_err(|e| {
                        LockError::Store(format!("failed to read locks directory entry: {}", e))
                    })?
                    .path();

                if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                    continue;
                }
                if let Some(record) = read_json::<LockRecord, _>(&path)? {
                    records.push(record);
                }
            }

            records.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(records)
        })
    }
}

fn to_json(record: &LockRecord) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(record)
        .map_err(|e| LockError::Store(format!("failed to serialize lock record: {}", e)))
}

/// Percent-encode everything outside `[A-Za-z0-9_-]` so any lock name is a
/// portable, hidden-file-free file name.
fn encode_name(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

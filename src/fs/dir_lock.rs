//! Cross-process exclusive section over a directory.
//!
//! A directory holding JSON records is guarded by a sibling guard file. Every
//! read-modify-write over the directory runs while holding an exclusive
//! `flock`/`LockFileEx` on that guard (via `fd-lock`), which serializes it
//! against other threads and processes doing the same.

use crate::error::{LockError, Result};
use fd_lock::RwLock;
use std::fs::OpenOptions;
use std::path::Path;

/// Run `op` while holding the exclusive lock on `dir/guard_name`.
pub fn with_dir_lock<T>(dir: &Path, guard_name: &str, op: impl FnOnce() -> Result<T>) -> Result<T> {
    let guard_path = dir.join(guard_name);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&guard_path)
        .map_err(|e| {
            LockError::Store(format!(
                "failed to open guard file '{}': {}",
                guard_path.display(),
                e
            ))
        })?;

    let mut lock = RwLock::new(file);
    let _guard = lock.write().map_err(|e| {
        LockError::Store(format!(
            "failed to lock guard file '{}': {}",
            guard_path.display(),
            e
        ))
    })?;

    op()
}

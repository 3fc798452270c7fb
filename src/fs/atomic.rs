//! Atomic filesystem operations.
//!
//! Records are never edited in place:
//! 1. New records are created with `create_new` (exclusive create)
//! 2. Rewrites go to a uniquely named temp file in the same directory,
//!    are synced, then renamed over the target
//!
//! Source and destination must be on the same filesystem for the rename to be
//! atomic. On crash, a `.{filename}.{uuid}.tmp` file may remain.

use crate::error::{LockError, Result};
use serde::de::DeserializeOwned;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Atomically replace `path` with `content`, creating parent directories as needed.
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;

    let temp_path = generate_temp_path(path)?;
    let mut file = File::create(&temp_path).map_err(|e| {
        LockError::Store(format!(
            "failed to create temporary file '{}': {}",
            temp_path.display(),
            e
        ))
    })?;

    if let Err(e) = file.write_all(content).and_then(|_| file.sync_all()) {
        let _ = fs::remove_file(&temp_path);
        return Err(LockError::Store(format!(
            "failed to write temporary file '{}': {}",
            temp_path.display(),
            e
        )));
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        LockError::Store(format!(
            "failed to atomically replace '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Create `path` with `content` only if it does not exist yet.
///
/// Returns `Ok(false)` when the file already exists.
pub fn create_exclusive<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<bool> {
    let path = path.as_ref();
    ensure_parent(path)?;

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => {
            return Err(LockError::Store(format!(
                "failed to create '{}': {}",
                path.display(),
                e
            )));
        }
    };

    if let Err(e) = file.write_all(content).and_then(|_| file.sync_all()) {
        // Leave no half-written record behind.
        let _ = fs::remove_file(path);
        return Err(LockError::Store(format!(
            "failed to write '{}': {}",
            path.display(),
            e
        )));
    }

    Ok(true)
}

/// Read and parse a JSON file, returning `Ok(None)` if it does not exist.
pub fn read_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<Option<T>> {
    let path = path.as_ref();
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(LockError::Store(format!(
                "failed to read '{}': {}",
                path.display(),
                e
            )));
        }
    };

    serde_json::from_str(&content).map(Some).map_err(|e| {
        LockError::Store(format!("failed to parse '{}': {}", path.display(), e))
    })
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| {
            LockError::Store(format!(
                "failed to create directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }
    Ok(())
}

/// Temp file in the same directory as the target, unique per writer.
fn generate_temp_path(target: &Path) -> Result<PathBuf> {
    let parent = target.parent().unwrap_or(Path::new("."));
    let filename = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| LockError::Store(format!("invalid file path '{}'", target.display())))?;

    Ok(parent.join(format!(".{}.{}.tmp", filename, Uuid::new_v4().simple())))
}

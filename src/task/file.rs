//! Task registry shared between processes through a directory.
//!
//! Each task is one JSON file, `<tasks_dir>/<id>.json`. Id allocation and
//! state changes run under the directory's guard lock so concurrent writers
//! never lose an update.

use super::{TaskContext, TaskRecord, TaskState};
use crate::error::{LockError, Result};
use crate::fs::{atomic_write, create_exclusive, read_json, with_dir_lock};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};

const GUARD_FILE: &str = ".tasks.lock";

/// On-disk task registry.
#[derive(Debug, Clone)]
pub struct FileTaskRegistry {
    dir: PathBuf,
    actor: String,
    current: Option<String>,
}

impl FileTaskRegistry {
    /// Open (creating if needed) the registry in `dir`, acting as `actor`.
    pub fn open<P: AsRef<Path>>(dir: P, actor: impl Into<String>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            LockError::Store(format!(
                "failed to create tasks directory '{}': {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self {
            dir,
            actor: actor.into(),
            current: None,
        })
    }

    /// The same registry with `task_id` as its ambient task.
    pub fn with_current_task(mut self, task_id: Option<String>) -> Self {
        self.current = task_id;
        self
    }

    fn task_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", task_id))
    }

    fn read(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        // Ids are plain numbers; anything else cannot name a task file.
        if task_id.is_empty() || !task_id.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(None);
        }
        read_json(self.task_path(task_id))
    }

    fn write(&self, task: &TaskRecord) -> Result<()> {
        let json = serde_json::to_vec_pretty(task)
            .map_err(|e| LockError::Store(format!("failed to serialize task: {}", e)))?;
        atomic_write(self.task_path(&task.id), &json)
    }

    fn max_id(&self) -> Result<u64> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            LockError::Store(format!(
                "failed to read tasks directory '{}': {}",
                self.dir.display(),
                e
            ))
        })?;

        Ok(entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    return None;
                }
                path.file_stem()?.to_str()?.parse::<u64>().ok()
            })
            .max()
            .unwrap_or(0))
    }

    /// Register a new task and return its id.
    pub fn create_task(&self, state: TaskState, description: &str) -> Result<String> {
        with_dir_lock(&self.dir, GUARD_FILE, || {
            let id = (self.max_id()? + 1).to_string();
            let task = TaskRecord {
                id: id.clone(),
                state,
                user: self.actor.clone(),
                description: description.to_string(),
                created_at: Utc::now(),
            };
            let json = serde_json::to_vec_pretty(&task)
                .map_err(|e| LockError::Store(format!("failed to serialize task: {}", e)))?;
            if !create_exclusive(self.task_path(&id), &json)? {
                return Err(LockError::Store(format!("task {} already exists", id)));
            }
            Ok(id)
        })
    }

    pub fn get(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        self.read(task_id)
    }

    /// Move `task_id` to `state`; finished tasks keep their final state.
    ///
    /// Returns the state the task ends up in.
    pub fn finish(&self, task_id: &str, state: TaskState) -> Result<TaskState> {
        with_dir_lock(&self.dir, GUARD_FILE, || {
            let mut task = self
                .read(task_id)?
                .ok_or_else(|| LockError::UserError(format!("task {} does not exist", task_id)))?;
            if !task.state.is_finished() {
                task.state = state;
                self.write(&task)?;
            }
            Ok(task.state)
        })
    }
}

impl TaskContext for FileTaskRegistry {
    fn current_actor(&self) -> String {
        self.actor.clone()
    }

    fn current_task_id(&self) -> Option<String> {
        self.current.clone()
    }

    fn task_exists(&self, task_id: &str) -> Result<bool> {
        Ok(self.read(task_id)?.is_some())
    }

    fn set_cancelling(&self, task_id: &str) -> Result<()> {
        with_dir_lock(&self.dir, GUARD_FILE, || match self.read(task_id)? {
            Some(mut task) if !task.state.is_finished() => {
                task.state = TaskState::Cancelling;
                self.write(&task)
            }
            _ => Ok(()),
        })
    }

    fn is_cancelling(&self, task_id: &str) -> Result<bool> {
        Ok(self
            .read(task_id)?
            .is_some_and(|task| task.state == TaskState::Cancelling))
    }
}

//! In-memory task registry.

use super::{TaskContext, TaskRecord, TaskState};
use crate::error::{LockError, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct Tasks {
    next_id: u64,
    records: BTreeMap<String, TaskRecord>,
    current: Option<String>,
}

/// Task registry living in one process, with sequential numeric task ids.
#[derive(Debug)]
pub struct TaskRegistry {
    actor: String,
    tasks: Mutex<Tasks>,
}

impl TaskRegistry {
    /// Create an empty registry acting as `actor`.
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            tasks: Mutex::new(Tasks {
                next_id: 1,
                ..Tasks::default()
            }),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Register a new task and return its id.
    pub fn create_task(&self, state: TaskState, description: &str) -> String {
        let mut tasks = self.tasks();
        let id = tasks.next_id.to_string();
        tasks.next_id += 1;
        tasks.records.insert(
            id.clone(),
            TaskRecord {
                id: id.clone(),
                state,
                user: self.actor.clone(),
                description: description.to_string(),
                created_at: Utc::now(),
            },
        );
        id
    }

    /// Make `task_id` the ambient task reported by [`TaskContext::current_task_id`].
    pub fn set_current_task(&self, task_id: Option<String>) {
        self.tasks().current = task_id;
    }

    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks().records.get(task_id).cloned()
    }

    pub fn state(&self, task_id: &str) -> Option<TaskState> {
        self.get(task_id).map(|task| task.state)
    }

    pub fn set_state(&self, task_id: &str, state: TaskState) -> Result<()> {
        let mut tasks = self.tasks();
        let task = tasks
            .records
            .get_mut(task_id)
            .ok_or_else(|| LockError::UserError(format!("task {} does not exist", task_id)))?;
        task.state = state;
        Ok(())
    }

    /// Forget `task_id` entirely.
    pub fn remove(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks().records.remove(task_id)
    }

    /// Number of tasks currently in `state`.
    pub fn count_in_state(&self, state: TaskState) -> usize {
        self.tasks()
            .records
            .values()
            .filter(|task| task.state == state)
            .count()
    }
}

impl TaskContext for TaskRegistry {
    fn current_actor(&self) -> String {
        self.actor.clone()
    }

    fn current_task_id(&self) -> Option<String> {
        self.tasks().current.clone()
    }

    fn task_exists(&self, task_id: &str) -> Result<bool> {
        Ok(self.tasks().records.contains_key(task_id))
    }

    fn set_cancelling(&self, task_id: &str) -> Result<()> {
        let mut tasks = self.tasks();
        match tasks.records.get_mut(task_id) {
            Some(task) if !task.state.is_finished() => {
                task.state = TaskState::Cancelling;
                Ok(())
            }
            Some(task) => {
                debug!(task = task_id, state = %task.state, "task already finished, not cancelling");
                Ok(())
            }
            None => {
                debug!(task = task_id, "cannot cancel unknown task");
                Ok(())
            }
        }
    }

    fn is_cancelling(&self, task_id: &str) -> Result<bool> {
        Ok(self.state(task_id) == Some(TaskState::Cancelling))
    }
}

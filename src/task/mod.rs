//! Background task context consumed by locks.
//!
//! A lock needs to know who is acting, which task it protects, whether a
//! holder task still exists, and how to ask a task to stop. Those needs are
//! expressed as the [`TaskContext`] capability so the lock never reaches into
//! a global task registry.
//!
//! Cancellation is cooperative: [`TaskContext::set_cancelling`] only flips the
//! task's state; long-running work polls [`TaskContext::is_cancelling`] at
//! safe checkpoints and unwinds on its own.

mod file;
mod registry;


pub use file::FileTaskRegistry;
pub use registry::TaskRegistry;

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Processing,
    Cancelling,
    Cancelled,
    Done,
    Error,
}

impl TaskState {
    /// Whether the task has finished and can no longer change state.
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskState::Cancelled | TaskState::Done | TaskState::Error)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Queued => "queued",
            TaskState::Processing => "processing",
            TaskState::Cancelling => "cancelling",
            TaskState::Cancelled => "cancelled",
            TaskState::Done => "done",
            TaskState::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// A persisted background task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub state: TaskState,
    /// The user the task runs for.
    pub user: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// What a lock needs from the surrounding task system.
pub trait TaskContext: Send + Sync {
    /// The user on whose behalf the current task runs.
    fn current_actor(&self) -> String;

    /// The id of the task currently executing, if any.
    fn current_task_id(&self) -> Option<String>;

    /// Whether `task_id` names a known task.
    fn task_exists(&self, task_id: &str) -> Result<bool>;

    /// Ask `task_id` to stop at its next cancellation checkpoint.
    fn set_cancelling(&self, task_id: &str) -> Result<()>;

    /// Whether `task_id` has been asked to stop.
    fn is_cancelling(&self, task_id: &str) -> Result<bool>;
}

/// The actor string for the local user (`USER@HOST`).
pub fn local_actor() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    format!("{}@{}", user, host)
}

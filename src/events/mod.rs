//! Audit events for lock activity.
//!
//! Every lease transition can be recorded as an event: `acquire`, `release`,
//! `lost`, and the operator-driven `clear`. Events are tagged with the actor,
//! the task that held the lock, and the deployment the lock is scoped to.
//!
//! # Event Format
//!
//! Each event serializes to one JSON object:
//! - `ts`: RFC3339 timestamp
//! - `action`: acquire / release / lost / clear
//! - `object_type`: always `lock` for events produced here
//! - `object_name`: the lock name
//! - `user`: the actor (e.g., `user@HOST`)
//! - `task`: optional task id
//! - `deployment`: optional deployment name
//!
//! Recording is best effort from the lock's point of view: a failed append is
//! logged but never turns a successful lock operation into a failure.

mod log;
mod memory;

pub use log::EventLog;
pub use memory::MemoryEventLog;

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Object type recorded for every lock event.
pub const LOCK_OBJECT_TYPE: &str = "lock";

/// Lock lifecycle actions that can be recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// Lease acquired
    Acquire,
    /// Lease released by its owner
    Release,
    /// Lease lost while held (stolen or removed)
    Lost,
    /// Lease removed by an operator
    Clear,
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventAction::Acquire => write!(f, "acquire"),
            EventAction::Release => write!(f, "release"),
            EventAction::Lost => write!(f, "lost"),
            EventAction::Clear => write!(f, "clear"),
        }
    }
}

/// An audit log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// When the event occurred.
    pub ts: DateTime<Utc>,

    pub action: EventAction,

    pub object_type: String,

    pub object_name: String,

    /// The actor on whose behalf the lock operated.
    #[serde(rename = "user")]
    pub actor: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,
}

impl Event {
    /// Create a lock event stamped with the current time.
    pub fn lock(action: EventAction, lock_name: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            action,
            object_type: LOCK_OBJECT_TYPE.to_string(),
            object_name: lock_name.into(),
            actor: actor.into(),
            task: None,
            deployment: None,
        }
    }

    pub fn with_task(mut self, task_id: Option<String>) -> Self {
        self.task = task_id;
        self
    }

    pub fn with_deployment(mut self, deployment: Option<String>) -> Self {
        self.deployment = deployment;
        self
    }

    /// Serialize the event to a single-line JSON string.
    pub fn to_ndjson_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::error::LockError::UserError(format!("failed to serialize event to JSON: {}", e))
        })
    }

    /// Whether this event describes `action` on lock `name`.
    pub fn is(&self, action: EventAction, name: &str) -> bool {
        self.action == action && self.object_type == LOCK_OBJECT_TYPE && self.object_name == name
    }
}

/// Append-only sink for audit events.
pub trait EventRecorder: Send + Sync {
    fn record(&self, event: &Event) -> Result<()>;
}

/// Recorder that drops every event, for callers with recording disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl EventRecorder for NoopRecorder {
    fn record(&self, _event: &Event) -> Result<()> {
        Ok(())
    }
}

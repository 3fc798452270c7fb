use crate::context::LockContext;
use crate::events::MemoryEventLog;
use crate::store::{LockRecordStore, MemoryLockStore};
use crate::task::{TaskRegistry, TaskState};
use std::sync::Arc;

pub(crate) const ACTOR: &str = "current-user";

/// In-memory collaborators with one processing task set as the current task.
pub(crate) struct Harness {
    pub events: Arc<MemoryEventLog>,
    pub tasks: Arc<TaskRegistry>,
    pub ctx: LockContext,
    pub task_id: String,
}

pub(crate) fn harness() -> Harness {
    harness_with_store(Arc::new(MemoryLockStore::new()))
}

pub(crate) fn harness_with_store(store: Arc<dyn LockRecordStore>) -> Harness {
    let events = Arc::new(MemoryEventLog::new());
    let tasks = Arc::new(TaskRegistry::new(ACTOR));
    let task_id = tasks.create_task(TaskState::Processing, "update deployment");
    tasks.set_current_task(Some(task_id.clone()));

    let ctx = LockContext::new(store, events.clone(), tasks.clone());
    Harness {
        events,
        tasks,
        ctx,
        task_id,
    }
}

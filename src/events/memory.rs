//! In-memory event recorder.

use super::{Event, EventAction, EventRecorder};
use crate::error::Result;
use std::sync::Mutex;

/// Keeps recorded events in memory, in recording order.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<Event>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event recorded so far.
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    /// Number of recorded events for `action` on lock `name`.
    pub fn count(&self, action: EventAction, name: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| event.is(action, name))
            .count()
    }
}

impl EventRecorder for MemoryEventLog {
    fn record(&self, event: &Event) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push(event.clone());
        Ok(())
    }
}

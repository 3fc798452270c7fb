//! Lock context and on-disk state resolution.
//!
//! [`LockContext`] bundles the collaborators every lock consumes: the record
//! store, the audit recorder, and the task context. It is cheap to clone and
//! is shared by every lock a director creates.
//!
//! [`StateDir`] resolves the `.fleetlock/` state directory used by the CLI:
//!
//! ```text
//! <root>/.fleetlock/
//!   config.yaml
//!   locks/               FileLockStore
//!   tasks/               FileTaskRegistry
//!   events/events.ndjson EventLog
//! ```

use crate::config::Config;
use crate::error::{LockError, Result};
use crate::events::{Event, EventLog, EventRecorder};
use crate::lock::LockDefaults;
use crate::store::{FileLockStore, LockRecordStore};
use crate::task::{FileTaskRegistry, TaskContext};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Name of the state directory.
pub const STATE_DIR_NAME: &str = ".fleetlock";

/// Collaborators shared by every lock.
#[derive(Clone)]
pub struct LockContext {
    store: Arc<dyn LockRecordStore>,
    events: Arc<dyn EventRecorder>,
    tasks: Arc<dyn TaskContext>,
    record_events: bool,
    defaults: LockDefaults,
}

impl LockContext {
    /// Create a context with built-in lock defaults and event recording enabled.
    pub fn new(
        store: Arc<dyn LockRecordStore>,
        events: Arc<dyn EventRecorder>,
        tasks: Arc<dyn TaskContext>,
    ) -> Self {
        Self {
            store,
            events,
            tasks,
            record_events: true,
            defaults: LockDefaults::default(),
        }
    }

    /// Apply the lock defaults and event switch from `config`.
    pub fn configured(mut self, config: &Config) -> Result<Self> {
        self.defaults = config.lock_defaults()?;
        self.record_events = config.record_events;
        Ok(self)
    }

    pub fn with_defaults(mut self, defaults: LockDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_record_events(mut self, record_events: bool) -> Self {
        self.record_events = record_events;
        self
    }

    pub fn store(&self) -> &dyn LockRecordStore {
        self.store.as_ref()
    }

    pub fn tasks(&self) -> &Arc<dyn TaskContext> {
        &self.tasks
    }

    pub fn defaults(&self) -> &LockDefaults {
        &self.defaults
    }

    pub fn records_events(&self) -> bool {
        self.record_events
    }

    /// Record an audit event if recording is enabled.
    ///
    /// Failures are logged and swallowed.
    pub fn record(&self, event: &Event) {
        if !self.record_events {
            return;
        }
        if let Err(e) = self.events.record(event) {
            warn!(
                action = %event.action,
                lock = %event.object_name,
                error = %e,
                "failed to record lock event"
            );
        }
    }
}

impl std::fmt::Debug for LockContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockContext")
            .field("record_events", &self.record_events)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

/// Resolved paths of the `.fleetlock/` state directory. All paths are absolute.
#[derive(Debug, Clone)]
pub struct StateDir {
    /// Directory containing `.fleetlock/`.
    pub root: PathBuf,

    pub state_dir: PathBuf,

    pub locks_dir: PathBuf,

    pub tasks_dir: PathBuf,

    pub events_dir: PathBuf,
}

impl StateDir {
    /// Lay out the state directory under `root` (nothing is created).
    pub fn at<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref().to_path_buf();
        let state_dir = root.join(STATE_DIR_NAME);
        Self {
            locks_dir: state_dir.join("locks"),
            tasks_dir: state_dir.join("tasks"),
            events_dir: state_dir.join("events"),
            state_dir,
            root,
        }
    }

    /// Resolve from the current working directory.
    pub fn resolve() -> Result<Self> {
        let cwd = env::current_dir().map_err(|e| {
            LockError::UserError(format!("failed to get current working directory: {}", e))
        })?;

        Self::resolve_from(&cwd)
    }

    /// Walk up from `cwd` to the nearest directory containing `.fleetlock/`.
    ///
    /// Falls back to `cwd` itself when no ancestor has one, so `init` can
    /// create it there.
    pub fn resolve_from<P: AsRef<Path>>(cwd: P) -> Result<Self> {
        let cwd = cwd.as_ref();
        let found = cwd
            .ancestors()
            .find(|dir| dir.join(STATE_DIR_NAME).is_dir())
            .unwrap_or(cwd);
        Ok(Self::at(found))
    }

    pub fn config_path(&self) -> PathBuf {
        self.state_dir.join("config.yaml")
    }

    pub fn events_file(&self) -> PathBuf {
        self.events_dir.join("events.ndjson")
    }

    pub fn exists(&self) -> bool {
        self.state_dir.is_dir()
    }

    /// Ensure the state directory exists, with a helpful error if not.
    pub fn ensure_initialized(&self) -> Result<()> {
        if !self.exists() {
            return Err(LockError::UserError(format!(
                "fleetlock state not initialized.\n\
                 Expected state directory at: {}\n\n\
                 Run `fleetlock init` to create it.",
                self.state_dir.display()
            )));
        }
        Ok(())
    }

    pub fn load_config(&self) -> Result<Config> {
        Config::load_or_default(self.config_path())
    }

    pub fn open_store(&self) -> Result<FileLockStore> {
        FileLockStore::open(&self.locks_dir)
    }

    pub fn open_tasks(&self, actor: impl Into<String>) -> Result<FileTaskRegistry> {
        FileTaskRegistry::open(&self.tasks_dir, actor)
    }

    pub fn event_log(&self) -> EventLog {
        EventLog::new(self.events_file())
    }

    /// Build a lock context over this state directory.
    pub fn lock_context(&self, config: &Config, tasks: Arc<dyn TaskContext>) -> Result<LockContext> {
        LockContext::new(
            Arc::new(self.open_store()?),
            Arc::new(self.event_log()),
            tasks,
        )
        .configured(config)
    }
}

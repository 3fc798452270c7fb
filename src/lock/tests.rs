//! Tests for lease acquisition, renewal, loss, and blocked-by resolution.

use super::*;
use crate::error::{AcquisitionReason, LockError};
use crate::events::EventAction;
use crate::store::{FileLockStore, LockRecord, LockRecordStore, MemoryLockStore};
use crate::task::TaskState;
use crate::test_support::{ACTOR, harness, harness_with_store};
use chrono::Utc;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

type CreateHook = Box<dyn Fn(&MemoryLockStore, &LockRecord) + Send + Sync>;

/// Memory store that counts creates per name and can inject failures or races.
#[derive(Default)]
struct SpyStore {
    inner: MemoryLockStore,
    creates: Mutex<Vec<String>>,
    fail_create: AtomicBool,
    fail_delete: AtomicBool,
    /// Fail this many upcoming compare-and-deletes, then recover.
    failing_deletes: AtomicUsize,
    on_create: Option<CreateHook>,
}

impl SpyStore {
    fn creates_of(&self, name: &str) -> usize {
        self.creates
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.as_str() == name)
            .count()
    }
}

impl LockRecordStore for SpyStore {
    fn create_if_absent(&self, record: &LockRecord) -> crate::error::Result<bool> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(LockError::Store("database is unreachable".to_string()));
        }
        self.creates.lock().unwrap().push(record.name.clone());
        if let Some(hook) = &self.on_create {
            hook(&self.inner, record);
        }
        self.inner.create_if_absent(record)
    }

    fn get(&self, name: &str) -> crate::error::Result<Option<LockRecord>> {
        self.inner.get(name)
    }

    fn compare_and_delete(&self, name: &str, holder_id: &str) -> crate::error::Result<usize> {
        let transient_failure = self
            .failing_deletes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if transient_failure || self.fail_delete.load(Ordering::SeqCst) {
            return Err(LockError::Store("database is unreachable".to_string()));
        }
        self.inner.compare_and_delete(name, holder_id)
    }

    fn compare_and_extend(
        &self,
        name: &str,
        holder_id: &str,
        expires_at: chrono::DateTime<Utc>,
    ) -> crate::error::Result<usize> {
        self.inner.compare_and_extend(name, holder_id, expires_at)
    }

    fn replace_expired(&self, stale_holder_id: &str, record: &LockRecord) -> crate::error::Result<bool> {
        self.inner.replace_expired(stale_holder_id, record)
    }

    fn delete(&self, name: &str) -> crate::error::Result<usize> {
        self.inner.delete(name)
    }

    fn list(&self) -> crate::error::Result<Vec<LockRecord>> {
        self.inner.list()
    }
}

/// A store where a competitor always deletes the row between our create and read.
struct ChurningStore;

impl LockRecordStore for ChurningStore {
    fn create_if_absent(&self, _record: &LockRecord) -> crate::error::Result<bool> {
        Ok(false)
    }

    fn get(&self, _name: &str) -> crate::error::Result<Option<LockRecord>> {
        Ok(None)
    }

    fn compare_and_delete(&self, _name: &str, _holder_id: &str) -> crate::error::Result<usize> {
        Ok(0)
    }

    fn compare_and_extend(
        &self,
        _name: &str,
        _holder_id: &str,
        _expires_at: chrono::DateTime<Utc>,
    ) -> crate::error::Result<usize> {
        Ok(0)
    }

    fn replace_expired(&self, _stale_holder_id: &str, _record: &LockRecord) -> crate::error::Result<bool> {
        Ok(false)
    }

    fn delete(&self, _name: &str) -> crate::error::Result<usize> {
        Ok(0)
    }

    fn list(&self) -> crate::error::Result<Vec<LockRecord>> {
        Ok(Vec::new())
    }
}

fn assert_acquisition_failure(err: &LockError, name: &str, uid: &str, reason: &AcquisitionReason) {
    match err {
        LockError::AcquisitionTimeout {
            name: n,
            uid: u,
            reason: r,
        } => {
            assert_eq!(n, name);
            assert_eq!(u, uid);
            assert_eq!(r, reason);
        }
        other => panic!("expected acquisition timeout, got {:?}", other),
    }
}

// ============================================================================
// Acquisition
// ============================================================================

#[test]
fn test_acquires_and_runs_section_once() {
    let h = harness();
    let runs = AtomicUsize::new(0);

    let lock = Lock::new("foo", &h.ctx, LockOptions::new()).unwrap();
    let outcome = lock
        .run(|_| {
            runs.fetch_add(1, Ordering::SeqCst);
            assert!(h.ctx.store().get("foo").unwrap().is_some());
            "done"
        })
        .unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.value, "done");
    assert!(!outcome.lease_lost);
    assert!(outcome.release_error.is_none());
    assert!(h.ctx.store().get("foo").unwrap().is_none());
}

#[test]
fn test_records_holder_uid_and_task_id() {
    let h = harness();
    let lock = Lock::new("foo", &h.ctx, LockOptions::new().timeout(Duration::ZERO)).unwrap();
    let uid = lock.uid().to_string();

    lock.run(|_| {
        let record = h.ctx.store().get("foo").unwrap().unwrap();
        assert_eq!(record.holder_id, uid);
        assert_eq!(record.task_id.as_deref(), Some(h.task_id.as_str()));
        assert!(record.expires_at > Utc::now());
    })
    .unwrap();
}

#[test]
fn test_second_lock_times_out_naming_locking_task() {
    let h = harness();
    let lock_a = Lock::new("foo", &h.ctx, LockOptions::new().task_id("1")).unwrap();
    let lock_b = Lock::new("foo", &h.ctx, LockOptions::new().timeout(Duration::from_millis(100)))
        .unwrap();
    let uid_b = lock_b.uid().to_string();
    let b_ran = AtomicBool::new(false);

    let a_ran = lock_a
        .run(|_| {
            let started = Instant::now();
            let err = lock_b.run(|_| b_ran.store(true, Ordering::SeqCst)).unwrap_err();

            assert!(started.elapsed() >= Duration::from_millis(100));
            assert!(started.elapsed() < Duration::from_secs(2));
            assert_acquisition_failure(
                &err,
                "foo",
                &uid_b,
                &AcquisitionReason::HeldBy(Some("1".to_string())),
            );
            assert!(err.to_string().starts_with("Failed to acquire lock for foo uid: "));
            assert!(err.to_string().ends_with("Locking task id is 1"));
            true
        })
        .unwrap()
        .into_inner();

    assert!(a_ran);
    assert!(!b_ran.load(Ordering::SeqCst));
}

#[test]
fn test_zero_timeout_fails_without_sleeping() {
    let h = harness();
    let lock_a = Lock::new("foo", &h.ctx, LockOptions::new().timeout(Duration::ZERO).task_id("1"))
        .unwrap();
    let lock_b = Lock::new(
        "foo",
        &h.ctx,
        LockOptions::new()
            .timeout(Duration::ZERO)
            .retry_interval(Duration::from_secs(5)),
    )
    .unwrap();

    lock_a
        .run(|_| {
            let started = Instant::now();
            let err = lock_b.run(|_| ()).unwrap_err();

            assert!(started.elapsed() < Duration::from_secs(1));
            assert!(err.to_string().contains("Locking task id is 1"));
        })
        .unwrap();
}

#[test]
fn test_lock_is_gone_when_holder_task_vanished() {
    let h = harness();
    let lock_a = Lock::new("foo", &h.ctx, LockOptions::new()).unwrap();
    let lock_b = Lock::new("foo", &h.ctx, LockOptions::new().timeout(Duration::from_secs(5)))
        .unwrap();
    let uid_b = lock_b.uid().to_string();

    lock_a
        .run(|_| {
            h.tasks.remove(&h.task_id);

            let started = Instant::now();
            let err = lock_b.run(|_| ()).unwrap_err();

            assert!(started.elapsed() < Duration::from_secs(1));
            assert_acquisition_failure(&err, "foo", &uid_b, &AcquisitionReason::LockIsGone);
            assert!(err.to_string().contains("Lock is gone"));
        })
        .unwrap();
}

#[test]
fn test_takes_over_stale_lease() {
    let h = harness();
    let stale = LockRecord::new(
        "foo",
        "crashed-director",
        Utc::now() - chrono::Duration::seconds(5),
        Some("99".to_string()),
    );
    h.ctx.store().create_if_absent(&stale).unwrap();

    let lock = Lock::new("foo", &h.ctx, LockOptions::new().timeout(Duration::ZERO)).unwrap();
    let uid = lock.uid().to_string();
    lock.run(|_| {
        assert_eq!(h.ctx.store().get("foo").unwrap().unwrap().holder_id, uid);
    })
    .unwrap();

    assert!(h.ctx.store().get("foo").unwrap().is_none());
}

#[test]
fn test_store_error_during_acquisition_surfaces_unmodified() {
    let store = Arc::new(SpyStore::default());
    store.fail_create.store(true, Ordering::SeqCst);
    let h = harness_with_store(store);

    let err = Lock::new("foo", &h.ctx, LockOptions::new())
        .unwrap()
        .run(|_| ())
        .unwrap_err();

    assert!(matches!(err, LockError::Store(ref msg) if msg == "database is unreachable"));
}

#[test]
fn test_vanishing_record_does_not_outlive_timeout() {
    let h = harness_with_store(Arc::new(ChurningStore));
    let lock = Lock::new("foo", &h.ctx, LockOptions::new().timeout(Duration::from_millis(100)))
        .unwrap();
    let uid = lock.uid().to_string();

    let started = Instant::now();
    let err = lock.run(|_| ()).unwrap_err();

    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_acquisition_failure(&err, "foo", &uid, &AcquisitionReason::HeldBy(None));
}

#[test]
fn test_mutual_exclusion_between_threads() {
    let h = harness();
    let inside = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ctx = h.ctx.clone();
            let (inside, overlaps, completed) = (inside.clone(), overlaps.clone(), completed.clone());
            thread::spawn(move || {
                for _ in 0..5 {
                    let lock = Lock::new(
                        "shared",
                        &ctx,
                        LockOptions::new()
                            .timeout(Duration::from_secs(10))
                            .retry_interval(Duration::from_millis(2)),
                    )
                    .unwrap();
                    lock.run(|_| {
                        if inside.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::sleep(Duration::from_millis(3));
                        inside.fetch_sub(1, Ordering::SeqCst);
                        completed.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(completed.load(Ordering::SeqCst), 20);
}

#[test]
fn test_mutual_exclusion_through_file_store() {
    let temp_dir = TempDir::new().unwrap();
    let inside = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));

    // Separate store handles stand in for separate director processes.
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let store = Arc::new(FileLockStore::open(temp_dir.path()).unwrap());
            let h = harness_with_store(store);
            let (inside, overlaps) = (inside.clone(), overlaps.clone());
            thread::spawn(move || {
                for _ in 0..3 {
                    let lock = Lock::new(
                        "lock:deployment:web",
                        &h.ctx,
                        LockOptions::new()
                            .timeout(Duration::from_secs(10))
                            .retry_interval(Duration::from_millis(5)),
                    )
                    .unwrap();
                    lock.run(|_| {
                        if inside.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::sleep(Duration::from_millis(5));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                    .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    let store = FileLockStore::open(temp_dir.path()).unwrap();
    assert!(store.list().unwrap().is_empty());
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_rejects_lock_blocked_by_itself() {
    let h = harness();
    let err = Lock::new("foo", &h.ctx, LockOptions::new().blocked_by("foo")).unwrap_err();
    assert!(matches!(err, LockError::InvalidLock(_)));
}

#[test]
fn test_rejects_empty_name_and_zero_durations() {
    let h = harness();
    assert!(matches!(
        Lock::new("  ", &h.ctx, LockOptions::new()),
        Err(LockError::InvalidLock(_))
    ));
    assert!(matches!(
        Lock::new("foo", &h.ctx, LockOptions::new().expiration(Duration::ZERO)),
        Err(LockError::InvalidLock(_))
    ));
    assert!(matches!(
        Lock::new("foo", &h.ctx, LockOptions::new().retry_interval(Duration::ZERO)),
        Err(LockError::InvalidLock(_))
    ));
}

#[test]
fn test_options_default_from_context() {
    let h = harness();
    let ctx = h.ctx.clone().with_defaults(LockDefaults {
        timeout: Duration::from_secs(7),
        ..LockDefaults::default()
    });

    let lock = Lock::new("foo", &ctx, LockOptions::new()).unwrap();
    assert_eq!(lock.timeout(), Duration::from_secs(7));
    assert_eq!(lock.expiration(), Duration::from_secs(10));
    assert_eq!(lock.task_id(), Some(h.task_id.as_str()));

    let lock = Lock::new("foo", &ctx, LockOptions::new().task_id("42")).unwrap();
    assert_eq!(lock.task_id(), Some("42"));
}

#[test]
fn test_each_lock_gets_fresh_uid() {
    let h = harness();
    let a = Lock::new("foo", &h.ctx, LockOptions::new()).unwrap();
    let b = Lock::new("foo", &h.ctx, LockOptions::new()).unwrap();
    assert_ne!(a.uid(), b.uid());
}

// ============================================================================
// Blocked-by
// ============================================================================

#[test]
fn test_blocked_by_free_dependency_acquires() {
    let h = harness();
    let lock_foo = Lock::new(
        "foo",
        &h.ctx,
        LockOptions::new().deployment_name("my-deployment").blocked_by("bar"),
    )
    .unwrap();

    let acquired = lock_foo.run(|_| true).unwrap().into_inner();

    assert!(acquired);
    assert!(h.ctx.store().list().unwrap().is_empty());
}

#[test]
fn test_blocked_by_held_dependency_fails_without_creating_lock() {
    let store = Arc::new(SpyStore::default());
    let h = harness_with_store(store.clone());
    let lock_bar = Lock::new(
        "bar",
        &h.ctx,
        LockOptions::new().deployment_name("my-deployment").task_id("1"),
    )
    .unwrap();
    let lock_foo = Lock::new(
        "foo",
        &h.ctx,
        LockOptions::new()
            .deployment_name("my-deployment")
            .blocked_by("bar")
            .timeout(Duration::from_millis(200)),
    )
    .unwrap();
    let uid_foo = lock_foo.uid().to_string();
    let foo_acquired = AtomicBool::new(false);

    lock_bar
        .run(|_| {
            let err = lock_foo
                .run(|_| foo_acquired.store(true, Ordering::SeqCst))
                .unwrap_err();
            assert_acquisition_failure(
                &err,
                "foo",
                &uid_foo,
                &AcquisitionReason::BlockedByOtherLocks,
            );
            assert!(err.to_string().contains("Blocked by other locks"));
        })
        .unwrap();

    assert!(!foo_acquired.load(Ordering::SeqCst));
    assert_eq!(store.creates_of("foo"), 0);
}

#[test]
fn test_blocked_by_dependency_released_then_acquires() {
    let h = harness();
    let lock_bar = Lock::new("bar", &h.ctx, LockOptions::new().task_id("1")).unwrap();
    lock_bar.run(|_| ()).unwrap();

    let lock_foo = Lock::new("foo", &h.ctx, LockOptions::new().blocked_by("bar")).unwrap();
    assert!(lock_foo.run(|_| true).unwrap().into_inner());
}

#[test]
fn test_blocked_by_wait_respects_timeout() {
    let h = harness();
    let lock_bar = Lock::new("bar", &h.ctx, LockOptions::new().task_id("1")).unwrap();
    let lock_foo = Lock::new(
        "foo",
        &h.ctx,
        LockOptions::new()
            .blocked_by("bar")
            .timeout(Duration::from_millis(300)),
    )
    .unwrap();

    lock_bar
        .run(|_| {
            let started = Instant::now();
            let err = lock_foo.run(|_| ()).unwrap_err();

            assert!(started.elapsed() >= Duration::from_millis(300));
            assert!(started.elapsed() < Duration::from_millis(550));
            assert!(err.to_string().contains("Blocked by other locks"));
        })
        .unwrap();
}

#[test]
fn test_blocked_by_wait_and_acquisition_share_one_deadline() {
    let store = Arc::new(MemoryLockStore::new());
    let h = harness_with_store(store.clone());
    let far = Utc::now() + chrono::Duration::seconds(60);
    store
        .create_if_absent(&LockRecord::new("foo", "other-director", far, None))
        .unwrap();
    store
        .create_if_absent(&LockRecord::new("bar", "other-director", far, None))
        .unwrap();

    // "bar" frees up partway through the budget; "foo" never does.
    let releaser = {
        let store = store.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(250));
            store.delete("bar").unwrap();
        })
    };
    let lock_foo = Lock::new(
        "foo",
        &h.ctx,
        LockOptions::new()
            .blocked_by("bar")
            .timeout(Duration::from_millis(400)),
    )
    .unwrap();
    let uid_foo = lock_foo.uid().to_string();

    let started = Instant::now();
    let err = lock_foo.run(|_| ()).unwrap_err();
    let elapsed = started.elapsed();
    releaser.join().unwrap();

    assert_acquisition_failure(&err, "foo", &uid_foo, &AcquisitionReason::HeldBy(None));
    assert!(elapsed >= Duration::from_millis(400));
    assert!(elapsed < Duration::from_millis(600), "took {:?}", elapsed);
}

#[test]
fn test_blocked_by_dependency_released_after_store_error() {
    let store = Arc::new(SpyStore::default());
    let h = harness_with_store(store.clone());
    store.failing_deletes.store(1, Ordering::SeqCst);

    let err = Lock::new("foo", &h.ctx, LockOptions::new().blocked_by("bar"))
        .unwrap()
        .run(|_| ())
        .unwrap_err();

    assert!(matches!(err, LockError::Store(_)));
    assert!(store.get("bar").unwrap().is_none());
    assert!(store.get("foo").unwrap().is_none());
}

#[test]
fn test_blocked_by_dependency_created_simultaneously() {
    let store = Arc::new(SpyStore {
        on_create: Some(Box::new(|inner, record| {
            // Someone takes "bar" just as "foo" is being created.
            if record.name == "foo" {
                let bar = LockRecord::new(
                    "bar",
                    "other-director",
                    Utc::now() + chrono::Duration::seconds(60),
                    Some("2".to_string()),
                );
                inner.create_if_absent(&bar).unwrap();
            }
        })),
        ..SpyStore::default()
    });
    let h = harness_with_store(store.clone());
    let lock_foo = Lock::new(
        "foo",
        &h.ctx,
        LockOptions::new().deployment_name("my-deployment").blocked_by("bar"),
    )
    .unwrap();
    let foo_acquired = AtomicBool::new(false);

    let err = lock_foo
        .run(|_| foo_acquired.store(true, Ordering::SeqCst))
        .unwrap_err();

    assert!(err.to_string().starts_with("Failed to acquire lock for foo uid: "));
    assert!(!foo_acquired.load(Ordering::SeqCst));
    assert!(store.creates_of("bar") >= 1);
    assert_eq!(store.delete("foo").unwrap(), 0);
    assert_eq!(store.delete("bar").unwrap(), 1);
}

// ============================================================================
// Renewal and loss
// ============================================================================

#[test]
fn test_renews_lease_forward_while_held() {
    let h = harness();
    let lock = Lock::new("foo", &h.ctx, LockOptions::new().expiration(Duration::from_millis(300)))
        .unwrap();

    lock.run(|_| {
        let initial = h.ctx.store().get("foo").unwrap().unwrap().expires_at;
        let mut previous = initial;
        for _ in 0..10 {
            thread::sleep(Duration::from_millis(60));
            let current = h.ctx.store().get("foo").unwrap().unwrap().expires_at;
            assert!(current >= previous, "expiry moved backward");
            previous = current;
        }
        assert!(previous > initial);
    })
    .unwrap();
}

fn destroy_lock_record(store: Arc<MemoryLockStore>, name: &'static str) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let give_up = Instant::now() + Duration::from_secs(5);
        while Instant::now() < give_up {
            if store.delete(name).unwrap() > 0 {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
    })
}

#[test]
fn test_lost_lease_records_event_and_cancels_task() {
    let store = Arc::new(MemoryLockStore::new());
    let h = harness_with_store(store.clone());
    let lock = Lock::new(
        "foo",
        &h.ctx,
        LockOptions::new()
            .deployment_name("my-deployment")
            .expiration(Duration::from_millis(200)),
    )
    .unwrap();

    assert_eq!(h.events.count(EventAction::Lost, "foo"), 0);
    assert_eq!(h.tasks.count_in_state(TaskState::Cancelling), 0);

    let deleter = destroy_lock_record(store.clone(), "foo");
    let outcome = lock
        .run(|_| {
            thread::sleep(Duration::from_millis(600));
            "section result"
        })
        .unwrap();
    deleter.join().unwrap();

    assert!(outcome.lease_lost);
    assert_eq!(outcome.value, "section result");
    assert!(outcome.release_error.is_none());

    let lost: Vec<_> = h
        .events
        .events()
        .into_iter()
        .filter(|e| e.is(EventAction::Lost, "foo"))
        .collect();
    assert_eq!(lost.len(), 1);
    assert_eq!(lost[0].actor, ACTOR);
    assert_eq!(lost[0].task.as_deref(), Some(h.task_id.as_str()));
    assert_eq!(lost[0].deployment.as_deref(), Some("my-deployment"));
    assert_eq!(h.events.count(EventAction::Release, "foo"), 0);

    assert_eq!(h.tasks.state(&h.task_id), Some(TaskState::Cancelling));
    assert_eq!(h.tasks.count_in_state(TaskState::Cancelling), 1);
}

#[test]
fn test_lease_gone_at_release_cancels_task() {
    let store = Arc::new(MemoryLockStore::new());
    let h = harness_with_store(store.clone());
    let lock = Lock::new("foo", &h.ctx, LockOptions::new().deployment_name("my-deployment"))
        .unwrap();

    // Default expiration: no renewal tick runs before release.
    let outcome = lock
        .run(|_| {
            store.delete("foo").unwrap();
            "done"
        })
        .unwrap();

    assert!(outcome.lease_lost);
    assert_eq!(outcome.value, "done");
    assert_eq!(h.events.count(EventAction::Lost, "foo"), 1);
    assert_eq!(h.events.count(EventAction::Release, "foo"), 0);
    assert_eq!(h.tasks.state(&h.task_id), Some(TaskState::Cancelling));
}

#[test]
fn test_lost_lease_does_not_touch_new_owner() {
    let store = Arc::new(MemoryLockStore::new());
    let h = harness_with_store(store.clone());
    let lock = Lock::new("foo", &h.ctx, LockOptions::new().expiration(Duration::from_millis(200)))
        .unwrap();

    lock.run(|_| {
        store.delete("foo").unwrap();
        let thief = LockRecord::new(
            "foo",
            "thief",
            Utc::now() + chrono::Duration::seconds(60),
            None,
        );
        store.create_if_absent(&thief).unwrap();
        thread::sleep(Duration::from_millis(400));
    })
    .unwrap();

    assert_eq!(store.get("foo").unwrap().unwrap().holder_id, "thief");
}

#[test]
fn test_checkpoint_observes_lease_loss() {
    let store = Arc::new(MemoryLockStore::new());
    let h = harness_with_store(store.clone());
    let lock = Lock::new("foo", &h.ctx, LockOptions::new().expiration(Duration::from_millis(100)))
        .unwrap();

    let deleter = destroy_lock_record(store, "foo");
    let result: Result<u32> = lock.protect(|watch| {
        let give_up = Instant::now() + Duration::from_secs(5);
        let mut steps = 0;
        while Instant::now() < give_up {
            watch.checkpoint()?;
            steps += 1;
            thread::sleep(Duration::from_millis(10));
        }
        Ok(steps)
    });
    deleter.join().unwrap();

    assert!(matches!(result, Err(LockError::Cancelled(ref task)) if *task == h.task_id));
}

#[test]
fn test_checkpoint_observes_external_cancellation() {
    let h = harness();
    let lock = Lock::new("foo", &h.ctx, LockOptions::new()).unwrap();

    let result: Result<()> = lock.protect(|watch| {
        watch.checkpoint()?;
        h.tasks.set_state(&h.task_id, TaskState::Cancelling)?;
        watch.checkpoint()
    });

    assert!(matches!(result, Err(LockError::Cancelled(_))));
    assert!(h.ctx.store().get("foo").unwrap().is_none());
}

// ============================================================================
// Release and events
// ============================================================================

#[test]
fn test_records_acquire_and_release_events() {
    let h = harness();
    let lock = Lock::new("foo", &h.ctx, LockOptions::new().deployment_name("my-deployment"))
        .unwrap();

    lock.run(|_| ()).unwrap();

    let events = h.events.events();
    assert_eq!(events.len(), 2);
    assert!(events[0].is(EventAction::Acquire, "foo"));
    assert!(events[1].is(EventAction::Release, "foo"));
    for event in &events {
        assert_eq!(event.actor, ACTOR);
        assert_eq!(event.task.as_deref(), Some(h.task_id.as_str()));
        assert_eq!(event.deployment.as_deref(), Some("my-deployment"));
    }
}

#[test]
fn test_release_does_not_change_task_state() {
    let h = harness();
    Lock::new("foo", &h.ctx, LockOptions::new())
        .unwrap()
        .run(|_| ())
        .unwrap();

    assert_eq!(h.tasks.count_in_state(TaskState::Processing), 1);
    assert_eq!(h.tasks.count_in_state(TaskState::Cancelling), 0);
}

#[test]
fn test_no_events_when_recording_disabled() {
    let h = harness();
    let ctx = h.ctx.clone().with_record_events(false);

    Lock::new("foo", &ctx, LockOptions::new())
        .unwrap()
        .run(|_| ())
        .unwrap();

    assert!(h.events.events().is_empty());
}

#[test]
fn test_dependency_lock_is_not_audited() {
    let h = harness();
    Lock::new("foo", &h.ctx, LockOptions::new().blocked_by("bar"))
        .unwrap()
        .run(|_| ())
        .unwrap();

    assert_eq!(h.events.count(EventAction::Acquire, "foo"), 1);
    assert_eq!(h.events.count(EventAction::Acquire, "bar"), 0);
}

#[test]
fn test_round_trip_leaves_store_unchanged() {
    let h = harness();
    let other = LockRecord::new(
        "other",
        "someone",
        Utc::now() + chrono::Duration::seconds(60),
        None,
    );
    h.ctx.store().create_if_absent(&other).unwrap();
    let before = h.ctx.store().list().unwrap();

    Lock::new("foo", &h.ctx, LockOptions::new())
        .unwrap()
        .run(|_| ())
        .unwrap();

    assert_eq!(h.ctx.store().list().unwrap(), before);
    assert_eq!(h.events.count(EventAction::Acquire, "foo"), 1);
    assert_eq!(h.events.count(EventAction::Release, "foo"), 1);
}

#[test]
fn test_release_failure_does_not_override_result() {
    let store = Arc::new(SpyStore::default());
    let h = harness_with_store(store.clone());

    let outcome = Lock::new("foo", &h.ctx, LockOptions::new())
        .unwrap()
        .run(|_| {
            store.fail_delete.store(true, Ordering::SeqCst);
            42
        })
        .unwrap();
    assert_eq!(outcome.value, 42);
    assert!(matches!(outcome.release_error, Some(LockError::Store(_))));
    assert_eq!(h.events.count(EventAction::Release, "foo"), 0);

    store.fail_delete.store(true, Ordering::SeqCst);
    let value: Result<i32> = Lock::new("bar", &h.ctx, LockOptions::new())
        .unwrap()
        .protect(|_| Ok(7));
    assert_eq!(value.unwrap(), 7);
}

#[test]
fn test_section_error_propagates_after_release() {
    let h = harness();

    let result: Result<()> = Lock::new("foo", &h.ctx, LockOptions::new())
        .unwrap()
        .protect(|_| Err(LockError::UserError("compilation failed".to_string())));

    assert!(matches!(result, Err(LockError::UserError(ref m)) if m == "compilation failed"));
    assert!(h.ctx.store().get("foo").unwrap().is_none());
    assert_eq!(h.events.count(EventAction::Release, "foo"), 1);
}

#[test]
fn test_panicking_section_still_releases() {
    let h = harness();
    let lock = Lock::new("foo", &h.ctx, LockOptions::new()).unwrap();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        lock.run(|_| panic!("section blew up")).unwrap();
    }));

    assert!(result.is_err());
    assert!(h.ctx.store().get("foo").unwrap().is_none());
}

#[derive(Debug)]
enum DeployError {
    Lock(LockError),
}

impl From<LockError> for DeployError {
    fn from(e: LockError) -> Self {
        DeployError::Lock(e)
    }
}

#[test]
fn test_protect_converts_acquisition_failure() {
    let h = harness();
    let holder = Lock::new("foo", &h.ctx, LockOptions::new()).unwrap();

    holder
        .run(|_| {
            let result: std::result::Result<(), DeployError> =
                Lock::new("foo", &h.ctx, LockOptions::new().timeout(Duration::ZERO))
                    .unwrap()
                    .protect(|_| Ok(()));
            assert!(matches!(
                result,
                Err(DeployError::Lock(LockError::AcquisitionTimeout { .. }))
            ));
        })
        .unwrap();
}

#[test]
fn test_renewal_interval_is_half_expiration() {
    let h = harness();
    let lock = Lock::new("foo", &h.ctx, LockOptions::new().expiration(Duration::from_secs(10)))
        .unwrap();
    assert_eq!(lock.renewal_interval(), Duration::from_secs(5));

    let lock = Lock::new("foo", &h.ctx, LockOptions::new().expiration(Duration::from_nanos(1)))
        .unwrap();
    assert_eq!(lock.renewal_interval(), Duration::from_millis(1));
}

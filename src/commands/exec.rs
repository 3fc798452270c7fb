//! Implementation of the `fleetlock exec` command.
//!
//! Runs an external command as a critical section:
//!
//! 1. Registers a `processing` task in `.fleetlock/tasks/`
//! 2. Acquires the lock on behalf of that task
//! 3. Spawns the command and polls it, killing it once the lease is lost or
//!    the task is cancelled
//! 4. Releases the lock and moves the task to `done`, `error`, or `cancelled`

use crate::cli::ExecArgs;
use crate::config::seconds;
use crate::context::StateDir;
use crate::error::{LockError, Result};
use crate::lock::{LeaseWatch, Lock, LockOptions};
use crate::task::{TaskState, local_actor};
use std::process::{Child, Command};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Environment variable carrying the owning task id into the child.
pub const TASK_ID_ENV: &str = "FLEETLOCK_TASK_ID";

/// How the child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildOutcome {
    Exited(i32),
    Killed,
}

/// Execute the `fleetlock exec` command. Returns the child's exit code.
pub fn cmd_exec(state: &StateDir, args: ExecArgs) -> Result<i32> {
    state.ensure_initialized()?;

    let argv = args
        .argv()
        .map_err(|e| LockError::UserError(format!("invalid command: {}", e)))?;
    if argv.is_empty() {
        return Err(LockError::UserError("no command given".to_string()));
    }

    let mut options = LockOptions::new();
    if let Some(deployment) = args.deployment {
        options = options.deployment_name(deployment);
    }
    if let Some(blocked_by) = args.blocked_by {
        options = options.blocked_by(blocked_by);
    }
    if let Some(timeout) = args.timeout {
        options = options.timeout(seconds("--timeout", timeout)?);
    }
    if let Some(expiration) = args.expiration {
        options = options.expiration(seconds("--expiration", expiration)?);
    }

    let config = state.load_config()?;
    let registry = state.open_tasks(local_actor())?;
    let task_id = registry.create_task(
        TaskState::Processing,
        &format!("exec {}", shell_words::join(&argv)),
    )?;
    let registry = Arc::new(registry.with_current_task(Some(task_id.clone())));
    info!(task = %task_id, lock = %args.lock_name, "registered task");

    let outcome = state
        .lock_context(&config, registry.clone())
        .and_then(|ctx| Lock::new(&args.lock_name, &ctx, options))
        .and_then(|lock| lock.run(|watch| run_child(&argv, &task_id, watch)));

    let (final_state, result) = match outcome {
        Err(e) => (TaskState::Error, Err(e)),
        Ok(protected) => {
            if let Some(e) = &protected.release_error {
                warn!(task = %task_id, error = %e, "lock was not released cleanly");
            }
            match protected.value {
                Err(e) => (TaskState::Error, Err(e)),
                Ok(_) if protected.lease_lost => {
                    (TaskState::Cancelled, Err(LockError::Cancelled(task_id.clone())))
                }
                Ok(ChildOutcome::Killed) => {
                    (TaskState::Cancelled, Err(LockError::Cancelled(task_id.clone())))
                }
                Ok(ChildOutcome::Exited(0)) => (TaskState::Done, Ok(0)),
                Ok(ChildOutcome::Exited(code)) => (TaskState::Error, Ok(code)),
            }
        }
    };

    match registry.finish(&task_id, final_state) {
        Ok(recorded) => info!(task = %task_id, state = %recorded, "task finished"),
        Err(e) => warn!(task = %task_id, error = %e, "failed to record task state"),
    }
    result
}

/// Spawn `argv` and wait for it, killing it when `watch` says to stop.
fn run_child(argv: &[String], task_id: &str, watch: &LeaseWatch) -> Result<ChildOutcome> {
    let program = &argv[0];
    let mut child = Command::new(program)
        .args(&argv[1..])
        .env(TASK_ID_ENV, task_id)
        .spawn()
        .map_err(|e| {
            LockError::UserError(format!(
                "failed to execute command '{}': {}\n\
                 Fix: ensure the command is installed and in PATH.",
                program, e
            ))
        })?;

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                // A child terminated by a signal has no code.
                return Ok(ChildOutcome::Exited(status.code().unwrap_or(1)));
            }
            Ok(None) => {
                let stop = watch.should_stop().inspect_err(|_| kill_process(&mut child))?;
                if stop {
                    warn!(task = %task_id, "stopping command: lease lost or task cancelled");
                    kill_process(&mut child);
                    return Ok(ChildOutcome::Killed);
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                kill_process(&mut child);
                return Err(LockError::UserError(format!(
                    "failed to check process status: {}",
                    e
                )));
            }
        }
    }
}

/// Kill a process and wait for it to terminate.
fn kill_process(child: &mut Child) {
    // On Unix this is SIGKILL; on Windows it is TerminateProcess.
    let _ = child.kill();
    let _ = child.wait();
}

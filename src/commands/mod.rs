//! Command implementations for fleetlock.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations. Every command operates on the `.fleetlock/` state
//! directory resolved from the current working directory.

mod events;
mod exec;
mod init;
mod lock;

use crate::cli::{Command, LockAction, LockCommand};
use crate::context::StateDir;
use crate::error::Result;
use crate::exit_codes;

/// Dispatch a command to its implementation.
///
/// Returns the process exit code on success. `exec` passes its child's
/// status through; every other command exits with `SUCCESS`.
pub fn dispatch(command: Command) -> Result<i32> {
    let state = StateDir::resolve()?;
    match command {
        Command::Init => init::cmd_init(&state).map(|()| exit_codes::SUCCESS),
        Command::Lock(lock_cmd) => dispatch_lock(&state, lock_cmd).map(|()| exit_codes::SUCCESS),
        Command::Exec(args) => exec::cmd_exec(&state, args),
        Command::Events(args) => events::cmd_events(&state, args).map(|()| exit_codes::SUCCESS),
    }
}

/// Dispatch lock subcommands.
fn dispatch_lock(state: &StateDir, lock_cmd: LockCommand) -> Result<()> {
    match lock_cmd.action {
        LockAction::List => lock::cmd_lock_list(state),
        LockAction::Clear(args) => lock::cmd_lock_clear(state, args),
    }
}

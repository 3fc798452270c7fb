//! Implementation of the `fleetlock lock` subcommands.

use crate::cli::LockClearArgs;
use crate::context::StateDir;
use crate::error::{LockError, Result};
use crate::events::{Event, EventAction, EventRecorder};
use crate::store::{LockRecord, LockRecordStore};
use crate::task::local_actor;
use chrono::{DateTime, Utc};
use tracing::warn;

pub fn cmd_lock_list(state: &StateDir) -> Result<()> {
    state.ensure_initialized()?;
    let records = state.open_store()?.list()?;
    print!("{}", render_lock_list(&records, Utc::now()));
    Ok(())
}

fn render_lock_list(records: &[LockRecord], now: DateTime<Utc>) -> String {
    if records.is_empty() {
        return "No active locks.\n".to_string();
    }

    let mut out = format!("Active locks ({}):\n\n", records.len());
    for record in records {
        out.push_str(&format!("  {}:\n", record.name));
        out.push_str(&format!("    Holder:     {}\n", record.holder_id));
        out.push_str(&format!(
            "    Task:       {}\n",
            record.task_id.as_deref().unwrap_or("-")
        ));
        out.push_str(&format!(
            "    Expires:    {}\n",
            record.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        if record.is_expired_at(now) {
            out.push_str("    Status:     STALE (lease expired)\n");
        }
        out.push('\n');
    }

    let stale_count = records.iter().filter(|r| r.is_expired_at(now)).count();
    if stale_count > 0 {
        out.push_str(&format!(
            "Note: {} lock(s) are stale and will be taken over by the next acquirer.\n",
            stale_count
        ));
    }
    out
}

pub fn cmd_lock_clear(state: &StateDir, args: LockClearArgs) -> Result<()> {
    state.ensure_initialized()?;
    let cleared = clear_lock(state, &args.name, args.force)?;

    println!("Cleared lock: {}", cleared.name);
    println!();
    println!("Lock details:");
    println!("  Holder:     {}", cleared.holder_id);
    println!("  Task:       {}", cleared.task_id.as_deref().unwrap_or("-"));
    println!(
        "  Expires:    {}",
        cleared.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if cleared.is_expired() {
        println!("  Status:     was STALE");
    }
    Ok(())
}

/// Remove the record for `name` and audit the removal.
///
/// Only the observed holder's record is deleted, so a lease re-acquired in
/// the meantime is left alone.
fn clear_lock(state: &StateDir, name: &str, force: bool) -> Result<LockRecord> {
    let store = state.open_store()?;
    let record = store
        .get(name)?
        .ok_or_else(|| LockError::UserError(format!("no lock named '{}'", name)))?;

    if !record.is_expired() && !force {
        return Err(LockError::UserError(format!(
            "refusing to clear live lock '{}' without --force flag.\n\n\
             The holder (task {}) may still be running and would lose mutual exclusion.\n\
             Only clear a live lock if you are certain its director has crashed.\n\n\
             To clear the lock, run:\n  fleetlock lock clear {} --force",
            name,
            record.task_id.as_deref().unwrap_or("unknown"),
            name
        )));
    }

    if store.compare_and_delete(name, &record.holder_id)? == 0 {
        return Err(LockError::UserError(format!(
            "lock '{}' changed hands while clearing; run the command again",
            name
        )));
    }

    if state.load_config()?.record_events {
        let event = Event::lock(EventAction::Clear, name, local_actor())
            .with_task(record.task_id.clone());
        // Best-effort: the lock is already gone.
        if let Err(e) = state.event_log().record(&event) {
            warn!(lock = %name, error = %e, "failed to record clear event");
        }
    }

    Ok(record)
}

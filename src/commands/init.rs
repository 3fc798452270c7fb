//! Implementation of the `fleetlock init` command.
//!
//! Creates `.fleetlock/` with its `locks/`, `tasks/`, and `events/`
//! directories and a default `config.yaml`. Running it again only fills in
//! what is missing; an existing config is never overwritten.

use crate::config::Config;
use crate::context::StateDir;
use crate::error::{LockError, Result};
use crate::fs::atomic_write;
use std::fs;
use std::path::Path;

/// Execute the `fleetlock init` command.
pub fn cmd_init(state: &StateDir) -> Result<()> {
    for dir in [&state.locks_dir, &state.tasks_dir, &state.events_dir] {
        create_dir(dir)?;
    }

    let config_path = state.config_path();
    let config_created = !config_path.exists();
    if config_created {
        let yaml = Config::default().to_yaml()?;
        atomic_write(&config_path, yaml.as_bytes())?;
    }

    println!("Initialized fleetlock state.");
    println!();
    println!("State directory: {}", state.state_dir.display());
    println!("  locks/");
    println!("  tasks/");
    println!("  events/");
    if config_created {
        println!("  config.yaml (defaults)");
    }

    Ok(())
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| {
        LockError::UserError(format!(
            "failed to create directory '{}': {}",
            path.display(),
            e
        ))
    })
}

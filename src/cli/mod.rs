//! CLI argument parsing for fleetlock.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{Parser, Subcommand};

/// fleetlock: lease-based locks shared by every director on a host.
///
/// Lock records, tasks, and the audit log live under `.fleetlock/`:
/// - `locks/` holds one record per held lease
/// - `tasks/` holds the tasks that own those leases
/// - `events/` holds the append-only audit log
#[derive(Parser, Debug)]
#[command(name = "fleetlock")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for fleetlock.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize lock state in the current directory.
    ///
    /// Creates `.fleetlock/` with its locks, tasks, and events directories
    /// and a default `config.yaml`.
    Init,

    /// Lock management commands.
    ///
    /// List or clear lock records.
    Lock(LockCommand),

    /// Run a command while holding a lock.
    ///
    /// Registers a task, acquires the lock, and runs the command as the
    /// critical section. The command is killed if the lease is lost.
    Exec(ExecArgs),

    /// Show recent lock audit events.
    Events(EventsArgs),
}

/// Lock subcommands.
#[derive(Parser, Debug)]
pub struct LockCommand {
    #[command(subcommand)]
    pub action: LockAction,
}

/// Available lock actions.
#[derive(Subcommand, Debug)]
pub enum LockAction {
    /// List all lock records.
    List,

    /// Remove a lock record.
    ///
    /// A live lease is only removed with --force.
    Clear(LockClearArgs),
}

/// Arguments for the `lock clear` command.
#[derive(Parser, Debug)]
pub struct LockClearArgs {
    /// Name of the lock to clear (e.g. `lock:deployment:web`).
    pub name: String,

    /// Clear the lock even if its lease has not expired.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `exec` command.
#[derive(Parser, Debug)]
pub struct ExecArgs {
    /// Name of the lock to hold.
    #[arg(long = "lock", value_name = "NAME")]
    pub lock_name: String,

    /// Deployment label recorded on audit events.
    #[arg(long)]
    pub deployment: Option<String>,

    /// Lock that must be free before this one is taken.
    #[arg(long, value_name = "NAME")]
    pub blocked_by: Option<String>,

    /// Seconds to keep trying to acquire (overrides config).
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<f64>,

    /// Lease lifetime in seconds (overrides config).
    #[arg(long, value_name = "SECONDS")]
    pub expiration: Option<f64>,

    /// Command to run. A single argument is split like a shell would.
    #[arg(last = true, required = true, num_args = 1..)]
    pub command: Vec<String>,
}

impl ExecArgs {
    /// The program and its arguments.
    pub fn argv(&self) -> Result<Vec<String>, shell_words::ParseError> {
        match self.command.as_slice() {
            [single] => shell_words::split(single),
            _ => Ok(self.command.clone()),
        }
    }
}

/// Arguments for the `events` command.
#[derive(Parser, Debug)]
pub struct EventsArgs {
    /// Number of most recent events to show.
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_debug_assert() {
        // Verifies the CLI arguments configuration is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_init() {
        let cli = Cli::try_parse_from(["fleetlock", "init"]).unwrap();
        assert!(matches!(cli.command, Command::Init));
    }

    #[test]
    fn parse_lock_list() {
        let cli = Cli::try_parse_from(["fleetlock", "lock", "list"]).unwrap();
        if let Command::Lock(lock_cmd) = cli.command {
            assert!(matches!(lock_cmd.action, LockAction::List));
        } else {
            panic!("Expected Lock command");
        }
    }

    #[test]
    fn parse_lock_clear() {
        let cli =
            Cli::try_parse_from(["fleetlock", "lock", "clear", "lock:deployment:web", "--force"])
                .unwrap();
        if let Command::Lock(lock_cmd) = cli.command {
            if let LockAction::Clear(args) = lock_cmd.action {
                assert_eq!(args.name, "lock:deployment:web");
                assert!(args.force);
            } else {
                panic!("Expected Clear action");
            }
        } else {
            panic!("Expected Lock command");
        }
    }

    #[test]
    fn parse_exec_full() {
        let cli = Cli::try_parse_from([
            "fleetlock",
            "exec",
            "--lock",
            "lock:deployment:web",
            "--deployment",
            "web",
            "--blocked-by",
            "lock:release:nginx",
            "--timeout",
            "2.5",
            "--expiration",
            "30",
            "--",
            "deploy.sh",
            "--dry-run",
        ])
        .unwrap();
        if let Command::Exec(args) = cli.command {
            assert_eq!(args.lock_name, "lock:deployment:web");
            assert_eq!(args.deployment.as_deref(), Some("web"));
            assert_eq!(args.blocked_by.as_deref(), Some("lock:release:nginx"));
            assert_eq!(args.timeout, Some(2.5));
            assert_eq!(args.expiration, Some(30.0));
            assert_eq!(args.argv().unwrap(), vec!["deploy.sh", "--dry-run"]);
        } else {
            panic!("Expected Exec command");
        }
    }

    #[test]
    fn parse_exec_splits_single_command_string() {
        let cli = Cli::try_parse_from([
            "fleetlock",
            "exec",
            "--lock",
            "foo",
            "--",
            "sh -c 'sleep 1'",
        ])
        .unwrap();
        if let Command::Exec(args) = cli.command {
            assert_eq!(args.timeout, None);
            assert_eq!(args.argv().unwrap(), vec!["sh", "-c", "sleep 1"]);
        } else {
            panic!("Expected Exec command");
        }
    }

    #[test]
    fn parse_exec_requires_command() {
        assert!(Cli::try_parse_from(["fleetlock", "exec", "--lock", "foo"]).is_err());
    }

    #[test]
    fn parse_events_default_limit() {
        let cli = Cli::try_parse_from(["fleetlock", "events"]).unwrap();
        if let Command::Events(args) = cli.command {
            assert_eq!(args.limit, 20);
        } else {
            panic!("Expected Events command");
        }
    }

    #[test]
    fn parse_events_limit() {
        let cli = Cli::try_parse_from(["fleetlock", "events", "--limit", "5"]).unwrap();
        if let Command::Events(args) = cli.command {
            assert_eq!(args.limit, 5);
        } else {
            panic!("Expected Events command");
        }
    }
}

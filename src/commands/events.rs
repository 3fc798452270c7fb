//! Implementation of the `fleetlock events` command.

use crate::cli::EventsArgs;
use crate::context::StateDir;
use crate::error::Result;
use crate::events::Event;

pub fn cmd_events(state: &StateDir, args: EventsArgs) -> Result<()> {
    state.ensure_initialized()?;
    let events = state.event_log().recent(args.limit)?;

    if events.is_empty() {
        println!("No events recorded.");
        return Ok(());
    }
    for event in &events {
        println!("{}", format_event(event));
    }
    Ok(())
}

fn format_event(event: &Event) -> String {
    let mut line = format!(
        "{}  {:<7}  {}  user={}",
        event.ts.format("%Y-%m-%d %H:%M:%S"),
        event.action.to_string(),
        event.object_name,
        event.actor
    );
    if let Some(task) = &event.task {
        line.push_str(&format!(" task={}", task));
    }
    if let Some(deployment) = &event.deployment {
        line.push_str(&format!(" deployment={}", deployment));
    }
    line
}

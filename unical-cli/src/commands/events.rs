use anyhow::Result;
use owo_colors::OwoColorize;
use unical_core::DateRange;

use crate::config::Config;
use crate::render::{render_pass, Render};
use crate::utils::tui::sync_spinner;

/// Sync, then list the merged events in the requested window.
pub async fn run(config: &Config, from: Option<&str>, to: Option<&str>) -> Result<()> {
    let range = DateRange::from_args(from, to).map_err(|e| anyhow::anyhow!(e))?;

    let coordinator = config.build_coordinator()?;
    let sources = coordinator.sources();

    let spinner = sync_spinner("Syncing");
    let state = coordinator.sync_once().await;
    spinner.finish_and_clear();

    if !state.errors.is_empty() {
        println!("{}\n", render_pass(&state, sources.len()));
    }

    let events = coordinator.events(&range)?;
    if events.is_empty() {
        println!(
            "{}",
            format!(
                "No events between {} and {}",
                range.from.format("%Y-%m-%d"),
                range.to.format("%Y-%m-%d")
            )
            .dimmed()
        );
        return Ok(());
    }

    for event in &events {
        println!("{}", event.render());
    }
    println!("\n{}", format!("{} events", events.len()).dimmed());

    Ok(())
}

use anyhow::Result;
use owo_colors::OwoColorize;

use crate::config::Config;
use crate::render::render_pass;
use crate::utils::tui::sync_spinner;

pub async fn run(config: &Config) -> Result<()> {
    let coordinator = config.build_coordinator()?;
    let sources = coordinator.sources();

    let spinner = sync_spinner(&format!("Syncing {} sources", sources.len()));
    let state = coordinator.sync_once().await;
    spinner.finish_and_clear();

    println!("{}", render_pass(&state, sources.len()));

    let total = coordinator.store().len()?;
    println!("{}", format!("{} events in the unified view", total).dimmed());

    Ok(())
}

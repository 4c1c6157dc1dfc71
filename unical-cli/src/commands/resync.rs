use anyhow::Result;
use unical_core::CalendarSource;

use crate::config::Config;
use crate::render::render_pass;
use crate::utils::tui::sync_spinner;

/// Drop the stored cursor(s) and refetch the full window.
pub async fn run(config: &Config, source: Option<&str>) -> Result<()> {
    let source = match source {
        Some(name) => Some(
            name.parse::<CalendarSource>()
                .map_err(|e| anyhow::anyhow!(e))?,
        ),
        None => None,
    };

    let coordinator = config.build_coordinator()?;
    if let Some(source) = source {
        if !coordinator.sources().contains(&source) {
            anyhow::bail!("Source '{}' is not configured", source);
        }
    }
    let sources = coordinator.sources();

    let label = match source {
        Some(s) => format!("Resyncing {} from scratch", s),
        None => "Resyncing all sources from scratch".to_string(),
    };
    let spinner = sync_spinner(&label);
    let state = coordinator.force_full_resync(source).await?;
    spinner.finish_and_clear();

    println!("{}", render_pass(&state, sources.len()));

    Ok(())
}

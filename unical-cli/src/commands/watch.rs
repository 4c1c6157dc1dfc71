use anyhow::{Context, Result};
use chrono::Local;
use owo_colors::OwoColorize;

use crate::config::Config;
use crate::render::render_pass;

/// Sync periodically until interrupted, printing a line per finished pass.
pub async fn run(config: &Config, interval: Option<&str>) -> Result<()> {
    let every = match interval {
        Some(s) => humantime::parse_duration(s)
            .with_context(|| format!("Invalid interval '{}'", s))?,
        None => config.watch_interval()?,
    };

    let coordinator = config.build_coordinator()?;
    let sources = coordinator.sources();
    let mut state_rx = coordinator.subscribe();

    println!(
        "{}",
        format!(
            "Syncing every {} (ctrl-c to stop)",
            humantime::format_duration(every)
        )
        .dimmed()
    );
    coordinator.start_realtime(every);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = state_rx.borrow_and_update().clone();
                if !state.is_syncing {
                    println!(
                        "{} {}",
                        Local::now().format("%H:%M:%S").to_string().dimmed(),
                        render_pass(&state, sources.len())
                    );
                }
            }
        }
    }

    // A pass already in flight finishes before the process exits the loop's
    // runtime; we only stop future ticks here.
    coordinator.stop_realtime();
    println!("{}", "Stopped.".dimmed());

    Ok(())
}

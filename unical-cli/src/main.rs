mod commands;
mod config;
mod render;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::Config;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "unical")]
#[command(about = "Aggregate your local, Google and Outlook calendars into one synced view")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync pass across all configured sources
    Sync,
    /// Show per-source sync state and the last errors
    Status,
    /// Sync, then list events in the window
    Events {
        /// Show events from this date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// Show events until this date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,
    },
    /// Drop cursors and refetch everything from scratch
    Resync {
        /// Only resync this source ("local", "google" or "outlook")
        #[arg(short, long)]
        source: Option<String>,
    },
    /// Keep syncing on an interval until interrupted
    Watch {
        /// Time between passes, e.g. "30s" or "5m" (default from config)
        #[arg(short, long)]
        interval: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Sync => commands::sync::run(&config).await,
        Commands::Status => commands::status::run(&config).await,
        Commands::Events { from, to } => {
            commands::events::run(&config, from.as_deref(), to.as_deref()).await
        }
        Commands::Resync { source } => commands::resync::run(&config, source.as_deref()).await,
        Commands::Watch { interval } => commands::watch::run(&config, interval.as_deref()).await,
    }
}

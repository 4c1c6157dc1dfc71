use anyhow::Result;
use owo_colors::OwoColorize;

use crate::config::Config;
use crate::render::Render;

/// Show each source's stored cursor: when it last synced and whether the
/// next pass can be incremental. Reads only the durable cursor store, no
/// network calls.
pub async fn run(config: &Config) -> Result<()> {
    let coordinator = config.build_coordinator()?;

    for (i, source) in coordinator.sources().into_iter().enumerate() {
        println!("{}", source.render());

        match coordinator.cursors().get(source)? {
            Some(cursor) => {
                println!(
                    "   last synced {}",
                    cursor.last_sync.format("%Y-%m-%d %H:%M UTC")
                );
                if cursor.token.is_some() {
                    println!("   {}", "next pass: incremental".dimmed());
                } else {
                    println!("   {}", "next pass: full window".dimmed());
                }
            }
            None => println!("   {}", "never synced".yellow()),
        }

        if i < coordinator.sources().len() - 1 {
            println!();
        }
    }

    Ok(())
}

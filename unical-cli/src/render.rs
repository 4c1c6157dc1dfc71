//! Colored terminal rendering for core types.

use owo_colors::OwoColorize;
use unical_core::{CalendarSource, MergeStats, SyncError, SyncRunState, UnifiedEvent};

/// Extension trait for TUI rendering with colors.
pub trait Render {
    fn render(&self) -> String;
}

impl Render for CalendarSource {
    fn render(&self) -> String {
        match self {
            CalendarSource::Local => self.as_str().cyan().to_string(),
            CalendarSource::Google => self.as_str().green().to_string(),
            CalendarSource::Outlook => self.as_str().blue().to_string(),
        }
    }
}

impl Render for UnifiedEvent {
    fn render(&self) -> String {
        let time = if self.all_day {
            self.start.format("%Y-%m-%d").to_string() + " (all day)"
        } else {
            format!(
                "{} - {}",
                self.start.format("%Y-%m-%d %H:%M"),
                self.end.format("%H:%M")
            )
        };

        let mut line = format!("{}  {}  [{}]", time.dimmed(), self.title, self.source.render());
        if let Some(location) = &self.location {
            line.push_str(&format!("  @ {}", location.dimmed()));
        }
        line
    }
}

impl Render for SyncError {
    fn render(&self) -> String {
        let retry = if self.is_retryable() {
            "(will retry next pass)".dimmed().to_string()
        } else {
            "(needs attention)".yellow().to_string()
        };
        format!("{} {} {}", self.source.render(), self.cause.to_string().red(), retry)
    }
}

impl Render for MergeStats {
    fn render(&self) -> String {
        if !self.has_changes() {
            return "no changes".dimmed().to_string();
        }
        format!(
            "{} created, {} updated, {} deleted",
            self.inserted, self.updated, self.deleted
        )
    }
}

/// One-line summary of a finished pass.
pub fn render_pass(state: &SyncRunState, total_sources: usize) -> String {
    let failed = state.errors.len();
    let succeeded = total_sources.saturating_sub(failed);

    let mut lines = Vec::new();
    if failed == 0 {
        lines.push(format!("{} all {} sources synced", "ok".green(), total_sources));
    } else {
        lines.push(format!(
            "{} {} of {} sources synced",
            "!".yellow(),
            succeeded,
            total_sources
        ));
    }
    for error in &state.errors {
        lines.push(format!("   {}", error.render()));
    }
    lines.join("\n")
}

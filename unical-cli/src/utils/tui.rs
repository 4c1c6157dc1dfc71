use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Spinner shown while a sync pass is in flight.
pub fn sync_spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap()
            .tick_strings(&["●∙∙", "∙●∙", "∙∙●", "∙●∙", " "]),
    );
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

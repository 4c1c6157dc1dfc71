//! CLI configuration: which sources exist and how to reach them.
//!
//! Lives at `<config_dir>/unical/config.toml`. Every source section is
//! optional; a section that is present but missing its token still gets an
//! adapter, so the sync status can show the not-authorized state instead of
//! silently skipping the source.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use unical_core::adapters::{GoogleCalendarSource, IcsDirSource, OutlookCalendarSource};
use unical_core::{
    CalendarSource, CursorStore, FileCursorStore, MemoryEventStore, SourceAdapter, StaticToken,
    SyncConfig, SyncCoordinator, SyncCursor, TokenSource,
};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncSection,
    pub local: Option<LocalSection>,
    pub google: Option<RemoteSection>,
    pub outlook: Option<RemoteSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncSection {
    #[serde(default = "default_days_back")]
    pub days_back: i64,
    #[serde(default = "default_days_forward")]
    pub days_forward: i64,
    /// Default interval for `unical watch`, e.g. "5m" or "300s".
    pub interval: Option<String>,
}

impl Default for SyncSection {
    fn default() -> Self {
        SyncSection {
            days_back: default_days_back(),
            days_forward: default_days_forward(),
            interval: None,
        }
    }
}

fn default_days_back() -> i64 {
    unical_core::date_range::DEFAULT_DAYS_BACK
}

fn default_days_forward() -> i64 {
    unical_core::date_range::DEFAULT_DAYS_FORWARD
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalSection {
    /// Directory of .ics files; `~` is expanded.
    pub dir: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteSection {
    /// Access token pasted straight into the config.
    pub access_token: Option<String>,
    /// Or a file holding the token (e.g. written by an external auth tool).
    pub token_file: Option<String>,
    /// Google only: which calendar to read. Defaults to "primary".
    pub calendar_id: Option<String>,
}

impl RemoteSection {
    fn token_source(&self) -> Arc<dyn TokenSource> {
        if let Some(token) = &self.access_token {
            return Arc::new(StaticToken::new(token.trim()));
        }
        if let Some(path) = &self.token_file {
            let path = shellexpand::tilde(path).to_string();
            match std::fs::read_to_string(&path) {
                Ok(token) => return Arc::new(StaticToken::new(token.trim())),
                Err(e) => {
                    tracing::warn!(file = %path, error = %e, "cannot read token file");
                }
            }
        }
        Arc::new(StaticToken::missing())
    }
}

impl Config {
    pub fn path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("cannot determine the config directory")?;
        Ok(dir.join("unical").join("config.toml"))
    }

    pub fn load() -> Result<Config> {
        let path = Self::path()?;
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("Invalid config at {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Config> {
        Ok(toml::from_str(contents)?)
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            days_back: self.sync.days_back,
            days_forward: self.sync.days_forward,
        }
    }

    /// Interval for `unical watch` when the flag is not given.
    pub fn watch_interval(&self) -> Result<Duration> {
        match &self.sync.interval {
            Some(s) => humantime::parse_duration(s)
                .with_context(|| format!("Invalid sync.interval '{}'", s)),
            None => Ok(Duration::from_secs(300)),
        }
    }

    /// Build one adapter per configured source.
    pub fn adapters(&self) -> Result<Vec<Arc<dyn SourceAdapter>>> {
        let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();

        if let Some(local) = &self.local {
            let dir = shellexpand::tilde(&local.dir).to_string();
            adapters.push(Arc::new(IcsDirSource::new(dir)));
        }
        if let Some(google) = &self.google {
            let calendar_id = google.calendar_id.as_deref().unwrap_or("primary");
            adapters.push(Arc::new(GoogleCalendarSource::new(
                calendar_id,
                google.token_source(),
            )));
        }
        if let Some(outlook) = &self.outlook {
            adapters.push(Arc::new(OutlookCalendarSource::new(outlook.token_source())));
        }

        if adapters.is_empty() {
            bail!(
                "No sources configured.\n\n\
                Add at least one source to {}:\n\n  \
                [local]\n  dir = \"~/calendars\"\n\n  \
                [google]\n  token_file = \"~/.config/unical/google.token\"\n\n  \
                [outlook]\n  token_file = \"~/.config/unical/outlook.token\"",
                Self::path()?.display()
            );
        }
        Ok(adapters)
    }

    /// Wire the full coordinator: adapters, in-memory event store, durable
    /// cursor store in the platform data dir.
    pub fn build_coordinator(&self) -> Result<Arc<SyncCoordinator>> {
        let adapters = self.adapters()?;

        let data_dir = dirs::data_dir()
            .context("cannot determine the data directory")?
            .join("unical");
        let cursors = open_cursor_store(data_dir.join("cursors.json"))?;

        Ok(SyncCoordinator::new(
            adapters,
            Arc::new(MemoryEventStore::new()),
            Arc::new(cursors),
            self.sync_config(),
        ))
    }
}

/// Open the durable cursor file and drop any stored delta tokens.
///
/// The unified event set lives in memory per process. A token kept across
/// a restart would make the first pass fetch only the delta into an empty
/// store, losing every unchanged remote event; tokenless cursors make that
/// pass a full-window fetch instead. `last_sync` is kept for `status`.
fn open_cursor_store(path: PathBuf) -> Result<FileCursorStore> {
    let cursors = FileCursorStore::open(path).context("Failed to open the cursor store")?;
    for source in CalendarSource::ALL {
        if let Some(cursor) = cursors.get(source)? {
            if cursor.token.is_some() {
                cursors.set(source, &SyncCursor::at(cursor.last_sync))?;
            }
        }
    }
    Ok(cursors)
}

//! Per-source sync cursors and their durable store.
//!
//! A cursor is only advanced after a fetch *and* its merge have both
//! succeeded. A crash between merge-commit and cursor-write merely causes
//! one redundant re-fetch on the next run, which the idempotent merge
//! tolerates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::warn;

use crate::error::StoreError;
use crate::source::CalendarSource;

/// How far a source has been consumed: an opaque continuation token (for
/// backends with a real delta API) plus the timestamp of the last
/// successful fetch+merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub token: Option<String>,
    pub last_sync: DateTime<Utc>,
}

impl SyncCursor {
    /// Cursor with no continuation token, for sources that only track time.
    pub fn at(last_sync: DateTime<Utc>) -> Self {
        SyncCursor {
            token: None,
            last_sync,
        }
    }

    pub fn with_token(token: impl Into<String>, last_sync: DateTime<Utc>) -> Self {
        SyncCursor {
            token: Some(token.into()),
            last_sync,
        }
    }
}

/// Durable, per-source cursor persistence.
pub trait CursorStore: Send + Sync {
    fn get(&self, source: CalendarSource) -> Result<Option<SyncCursor>, StoreError>;

    /// Called only after a successful merge.
    fn set(&self, source: CalendarSource, cursor: &SyncCursor) -> Result<(), StoreError>;

    /// Supports forced full resync.
    fn clear(&self, source: CalendarSource) -> Result<(), StoreError>;
}

/// Cursor store backed by one JSON file, written atomically
/// (temp file + rename).
pub struct FileCursorStore {
    path: PathBuf,
    cursors: RwLock<BTreeMap<CalendarSource, SyncCursor>>,
}

impl FileCursorStore {
    /// Open (or lazily create) the cursor file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let cursors = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            BTreeMap::new()
        };
        Ok(FileCursorStore {
            path,
            cursors: RwLock::new(cursors),
        })
    }

    fn persist(&self, cursors: &BTreeMap<CalendarSource, SyncCursor>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(cursors)?;
        let temp = temp_path(&self.path);

        // Write to temp file first, then atomic rename
        std::fs::write(&temp, contents)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    PathBuf::from(temp)
}

impl CursorStore for FileCursorStore {
    fn get(&self, source: CalendarSource) -> Result<Option<SyncCursor>, StoreError> {
        let cursors = self.cursors.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(cursors.get(&source).cloned())
    }

    fn set(&self, source: CalendarSource, cursor: &SyncCursor) -> Result<(), StoreError> {
        let mut cursors = self.cursors.write().map_err(|_| StoreError::LockPoisoned)?;

        // Cursors never move backwards except through clear().
        if let Some(existing) = cursors.get(&source) {
            if cursor.last_sync < existing.last_sync {
                warn!(
                    source = %source,
                    "refusing to move cursor backwards ({} -> {})",
                    existing.last_sync,
                    cursor.last_sync
                );
                return Ok(());
            }
        }

        cursors.insert(source, cursor.clone());
        self.persist(&cursors)
    }

    fn clear(&self, source: CalendarSource) -> Result<(), StoreError> {
        let mut cursors = self.cursors.write().map_err(|_| StoreError::LockPoisoned)?;
        if cursors.remove(&source).is_some() {
            self.persist(&cursors)?;
        }
        Ok(())
    }
}

/// In-memory cursor store, for tests and embedding without durability.
#[derive(Default)]
pub struct MemoryCursorStore {
    cursors: RwLock<BTreeMap<CalendarSource, SyncCursor>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CursorStore for MemoryCursorStore {
    fn get(&self, source: CalendarSource) -> Result<Option<SyncCursor>, StoreError> {
        let cursors = self.cursors.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(cursors.get(&source).cloned())
    }

    fn set(&self, source: CalendarSource, cursor: &SyncCursor) -> Result<(), StoreError> {
        let mut cursors = self.cursors.write().map_err(|_| StoreError::LockPoisoned)?;
        if let Some(existing) = cursors.get(&source) {
            if cursor.last_sync < existing.last_sync {
                return Ok(());
            }
        }
        cursors.insert(source, cursor.clone());
        Ok(())
    }

    fn clear(&self, source: CalendarSource) -> Result<(), StoreError> {
        let mut cursors = self.cursors.write().map_err(|_| StoreError::LockPoisoned)?;
        cursors.remove(&source);
        Ok(())
    }
}

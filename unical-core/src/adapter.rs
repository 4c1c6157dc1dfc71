//! The contract every calendar backend is wrapped behind.

use async_trait::async_trait;

use crate::cursor::SyncCursor;
use crate::date_range::DateRange;
use crate::error::SourceError;
use crate::event::UnifiedEvent;
use crate::source::CalendarSource;

/// Everything one fetch learned from a backend.
///
/// Applying the same ChangeSet to the unified store twice must yield the
/// same state as applying it once; adapters are expected to produce
/// replayable output and never to touch the store themselves.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub source: CalendarSource,
    pub upserts: Vec<UnifiedEvent>,
    /// Native ids the backend reports as deleted.
    pub deletions: Vec<String>,
    /// Cursor to persist once this ChangeSet has been merged.
    pub next_cursor: SyncCursor,
    /// Set when the fetch was a full snapshot of this window rather than a
    /// delta. The merge then also removes this source's stored events inside
    /// the window that the snapshot no longer contains.
    pub snapshot_window: Option<DateRange>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletions.is_empty()
    }
}

/// One backend's fetch semantics behind one capability.
///
/// `cursor == None` means a full sync for this source. The window bounds
/// sources that cannot do pure delta queries; sources with a real delta API
/// ignore it once a cursor token exists and rely on the token alone.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> CalendarSource;

    async fn fetch_changes(
        &self,
        cursor: Option<&SyncCursor>,
        window: &DateRange,
    ) -> Result<ChangeSet, SourceError>;
}

/// Minimal credential seam for the remote adapters.
///
/// Token acquisition and refresh live outside this crate; an adapter only
/// ever needs "a currently valid access token, or a NotAuthorized error".
pub trait TokenSource: Send + Sync {
    fn access_token(&self) -> Result<String, SourceError>;
}

/// A token handed in at construction time (e.g. read from config).
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        StaticToken(Some(token.into()))
    }

    /// No credential available; every fetch will report `NotAuthorized`.
    pub fn missing() -> Self {
        StaticToken(None)
    }
}

impl TokenSource for StaticToken {
    fn access_token(&self) -> Result<String, SourceError> {
        self.0
            .clone()
            .ok_or_else(|| SourceError::NotAuthorized("no access token configured".into()))
    }
}

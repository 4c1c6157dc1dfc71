//! The canonical, source-tagged event every backend normalizes into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::source::CalendarSource;

/// A calendar event in unified form.
///
/// `id` is derived deterministically from `(source, native_id)`, so
/// re-fetching the same backend event always maps to the same unified
/// identity and the store can never hold duplicates for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedEvent {
    /// Globally unique id: `"{source}:{native_id}"`.
    pub id: String,
    pub source: CalendarSource,
    /// The backend's own id for this event.
    pub native_id: String,
    /// Sub-calendar within the source, when the backend has that notion.
    pub calendar_id: Option<String>,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
    pub location: Option<String>,
    pub notes: Option<String>,
    /// Backend-reported modification timestamp. Drives last-writer-wins
    /// during merge; never a wall-clock fetch time.
    pub last_modified: DateTime<Utc>,
}

impl UnifiedEvent {
    /// Derive the unified id for a backend event.
    pub fn unified_id(source: CalendarSource, native_id: &str) -> String {
        format!("{}:{}", source, native_id)
    }

    pub fn new(
        source: CalendarSource,
        native_id: impl Into<String>,
        title: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        last_modified: DateTime<Utc>,
    ) -> Self {
        let native_id = native_id.into();
        UnifiedEvent {
            id: Self::unified_id(source, &native_id),
            source,
            native_id,
            calendar_id: None,
            title: title.into(),
            start,
            end,
            all_day: false,
            location: None,
            notes: None,
            last_modified,
        }
    }
}

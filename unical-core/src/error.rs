//! Error taxonomy for the sync engine.
//!
//! Nothing here escapes a sync pass as a hard failure: the coordinator
//! captures every per-source error as a [`SyncError`] and always completes
//! the pass for the remaining sources.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::source::CalendarSource;

/// What a source adapter can report from a fetch.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Credential missing, expired or rejected. Not retryable until the
    /// user re-authenticates out of band.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Transient network or I/O failure. Retried by the next pass.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Backend asked us to back off. Retried by the next pass; the hint is
    /// surfaced for logging, there is no in-pass retry loop.
    #[error("rate limited by backend")]
    RateLimited { retry_after: Option<Duration> },

    /// The backend answered with something we cannot decode. Usually means
    /// the API contract changed; not retryable.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl SourceError {
    /// Whether the next scheduled pass can reasonably retry this.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::Transient(_) | SourceError::RateLimited { .. }
        )
    }
}

/// Local storage failure (unified store or cursor store).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("storage I/O: {0}")]
    Io(String),

    #[error("storage serialization: {0}")]
    Serialization(String),

    /// A writer panicked while holding a store lock.
    #[error("storage lock poisoned")]
    LockPoisoned,
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Where in the per-source pipeline a pass failed.
#[derive(Debug, Clone, Error)]
pub enum SyncFailure {
    #[error(transparent)]
    Fetch(#[from] SourceError),

    /// The merge (or the cursor write after it) hit local storage trouble.
    /// The cursor is left untouched so the next pass retries the same data.
    #[error("merge failed: {0}")]
    Merge(#[from] StoreError),
}

/// One source's failure within one sync pass.
///
/// Collected append-only during a pass and replaced wholesale at the start
/// of the next one. Never persisted.
///
/// `source` here names the calendar backend, not `Error::source`; the
/// trait impls are written out by hand so the two never collide.
#[derive(Debug, Clone)]
pub struct SyncError {
    pub source: CalendarSource,
    pub cause: SyncFailure,
    pub at: DateTime<Utc>,
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.cause)
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

impl SyncError {
    pub fn new(source: CalendarSource, cause: impl Into<SyncFailure>) -> Self {
        SyncError {
            source,
            cause: cause.into(),
            at: Utc::now(),
        }
    }

    /// Whether re-running a pass could clear this error without user action.
    pub fn is_retryable(&self) -> bool {
        match &self.cause {
            SyncFailure::Fetch(e) => e.is_retryable(),
            SyncFailure::Merge(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability_follows_taxonomy() {
        assert!(SourceError::Transient("timeout".into()).is_retryable());
        assert!(SourceError::RateLimited { retry_after: None }.is_retryable());
        assert!(!SourceError::NotAuthorized("expired".into()).is_retryable());
        assert!(!SourceError::Malformed("bad json".into()).is_retryable());
    }

    #[test]
    fn test_sync_error_reports_backend_and_chains_the_cause() {
        let err = SyncError::new(
            CalendarSource::Google,
            SourceError::Transient("timeout".into()),
        );

        assert_eq!(err.to_string(), "google: transient failure: timeout");
        let chained: &dyn std::error::Error = &err;
        assert_eq!(
            chained.source().unwrap().to_string(),
            "transient failure: timeout"
        );
    }

    #[test]
    fn test_merge_failures_are_retryable() {
        let err = SyncError::new(
            CalendarSource::Local,
            StoreError::Io("disk full".into()),
        );
        assert!(err.is_retryable());
    }
}

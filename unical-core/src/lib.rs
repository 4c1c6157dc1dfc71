//! Multi-source calendar aggregation engine.
//!
//! Pulls events from three independent backends — a local `.ics` directory,
//! Google Calendar and Outlook — normalizes them into one unified event
//! set, and keeps that set current with bounded-cost incremental fetches.
//!
//! The entry point is [`coordinator::SyncCoordinator`]: construct it with
//! one [`adapter::SourceAdapter`] per backend, an [`store::EventStore`] and
//! a [`cursor::CursorStore`], then drive it with `sync_once` or
//! `start_realtime`. Per-source failures never abort a pass; they surface
//! on the published [`coordinator::SyncRunState`].

pub mod adapter;
pub mod adapters;
pub mod coordinator;
pub mod cursor;
pub mod date_range;
pub mod error;
pub mod event;
pub mod merge;
pub mod source;
pub mod store;

pub use adapter::{ChangeSet, SourceAdapter, StaticToken, TokenSource};
pub use coordinator::{SyncConfig, SyncCoordinator, SyncRunState};
pub use cursor::{CursorStore, FileCursorStore, MemoryCursorStore, SyncCursor};
pub use date_range::DateRange;
pub use error::{SourceError, StoreError, SyncError, SyncFailure};
pub use event::UnifiedEvent;
pub use merge::MergeStats;
pub use source::CalendarSource;
pub use store::{EventStore, EventTxn, MemoryEventStore};

//! The unified event store.
//!
//! Holds the merged event set all sources feed into. Writes arrive as one
//! transaction per source per pass ([`EventTxn`]); either every upsert and
//! deletion in the transaction applies, or none do, so a cursor is never
//! advanced over a partially-applied ChangeSet.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::date_range::DateRange;
use crate::error::StoreError;
use crate::event::UnifiedEvent;
use crate::source::CalendarSource;

/// Store key: each source is the sole writer of its own native ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EventKey {
    source: CalendarSource,
    native_id: String,
}

/// One source's writes for one merge, applied atomically.
#[derive(Debug, Default)]
pub struct EventTxn {
    pub upserts: Vec<UnifiedEvent>,
    /// Native ids to remove (scoped to the transaction's source).
    pub deletions: Vec<String>,
}

impl EventTxn {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletions.is_empty()
    }
}

/// Storage contract the merge engine (and downstream queries) run against.
///
/// Implementations must serialize writes and keep `apply` all-or-nothing.
/// The in-memory implementation below is the reference; hosts that need the
/// event set to survive restarts plug a durable store in through this trait
/// (only cursors are required to be durable for correct re-syncs).
pub trait EventStore: Send + Sync {
    fn get(
        &self,
        source: CalendarSource,
        native_id: &str,
    ) -> Result<Option<UnifiedEvent>, StoreError>;

    /// Apply one source's transaction atomically.
    fn apply(&self, source: CalendarSource, txn: EventTxn) -> Result<(), StoreError>;

    /// All events overlapping the range, across sources, ordered by start.
    fn query(&self, range: &DateRange) -> Result<Vec<UnifiedEvent>, StoreError>;

    /// This source's events overlapping the range. Drives snapshot pruning.
    fn source_events_in(
        &self,
        source: CalendarSource,
        range: &DateRange,
    ) -> Result<Vec<UnifiedEvent>, StoreError>;

    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

/// In-memory unified store.
#[derive(Default)]
pub struct MemoryEventStore {
    events: RwLock<HashMap<EventKey, UnifiedEvent>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for MemoryEventStore {
    fn get(
        &self,
        source: CalendarSource,
        native_id: &str,
    ) -> Result<Option<UnifiedEvent>, StoreError> {
        let events = self.events.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(events
            .get(&EventKey {
                source,
                native_id: native_id.to_string(),
            })
            .cloned())
    }

    fn apply(&self, source: CalendarSource, txn: EventTxn) -> Result<(), StoreError> {
        // Single write lock for the whole transaction; nothing in here can
        // fail halfway, so all-or-nothing holds.
        let mut events = self.events.write().map_err(|_| StoreError::LockPoisoned)?;

        for event in txn.upserts {
            events.insert(
                EventKey {
                    source,
                    native_id: event.native_id.clone(),
                },
                event,
            );
        }

        for native_id in txn.deletions {
            events.remove(&EventKey { source, native_id });
        }

        Ok(())
    }

    fn query(&self, range: &DateRange) -> Result<Vec<UnifiedEvent>, StoreError> {
        let events = self.events.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut found: Vec<UnifiedEvent> = events
            .values()
            .filter(|e| range.overlaps(e.start, e.end))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    fn source_events_in(
        &self,
        source: CalendarSource,
        range: &DateRange,
    ) -> Result<Vec<UnifiedEvent>, StoreError> {
        let events = self.events.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(events
            .values()
            .filter(|e| e.source == source && range.overlaps(e.start, e.end))
            .cloned()
            .collect())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.events.read().map_err(|_| StoreError::LockPoisoned)?.len())
    }
}

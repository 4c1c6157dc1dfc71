//! Merge & dedup engine: reconcile one source's ChangeSet with the store.
//!
//! Conflict policy is last-writer-wins by backend `last_modified`. Each
//! source is the sole writer of its own native ids, so true write-write
//! conflicts cannot occur within a source; the timestamp guard only has to
//! stop stale overwrites from overlapping fetches.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::adapter::ChangeSet;
use crate::error::StoreError;
use crate::store::{EventStore, EventTxn};

/// What one merge did, for logging and CLI output.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Upserts dropped because the store already held a newer revision.
    pub stale_skipped: usize,
}

impl MergeStats {
    pub fn has_changes(&self) -> bool {
        self.inserted > 0 || self.updated > 0 || self.deleted > 0
    }
}

/// Apply one ChangeSet transactionally.
///
/// Either every upsert and deletion lands, or (on a store failure) none do
/// and the caller must not advance the source's cursor. Replaying the same
/// ChangeSet yields the same store contents.
pub fn apply_change_set(
    store: &dyn EventStore,
    changes: &ChangeSet,
) -> Result<MergeStats, StoreError> {
    let mut txn = EventTxn::default();
    let mut stats = MergeStats::default();

    for event in &changes.upserts {
        // An adapter handing us another source's events would let deletions
        // and snapshot pruning bleed across backends. Drop, loudly.
        if event.source != changes.source {
            warn!(
                expected = %changes.source,
                got = %event.source,
                event = %event.id,
                "dropping upsert tagged with the wrong source"
            );
            continue;
        }

        match store.get(changes.source, &event.native_id)? {
            None => {
                txn.upserts.push(event.clone());
                stats.inserted += 1;
            }
            Some(existing) if event.last_modified >= existing.last_modified => {
                txn.upserts.push(event.clone());
                stats.updated += 1;
            }
            Some(_) => {
                stats.stale_skipped += 1;
            }
        }
    }

    // Deletions are scoped to this source's keyspace by construction.
    for native_id in &changes.deletions {
        if store.get(changes.source, native_id)?.is_some() {
            txn.deletions.push(native_id.clone());
            stats.deleted += 1;
        }
    }

    // A snapshot fetch is authoritative for its window: anything of ours in
    // the window that the snapshot no longer contains is gone at the source.
    if let Some(window) = &changes.snapshot_window {
        let kept: HashSet<&str> = changes
            .upserts
            .iter()
            .filter(|e| e.source == changes.source)
            .map(|e| e.native_id.as_str())
            .collect();

        for existing in store.source_events_in(changes.source, window)? {
            if !kept.contains(existing.native_id.as_str())
                && !txn.deletions.contains(&existing.native_id)
            {
                txn.deletions.push(existing.native_id.clone());
                stats.deleted += 1;
            }
        }
    }

    if txn.is_empty() {
        debug!(source = %changes.source, "merge: nothing to apply");
        return Ok(stats);
    }

    store.apply(changes.source, txn)?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::SyncCursor;
    use crate::date_range::DateRange;
    use crate::event::UnifiedEvent;
    use crate::source::CalendarSource;
    use crate::store::MemoryEventStore;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, day, hour, 0, 0).unwrap()
    }

    fn event(
        source: CalendarSource,
        id: &str,
        day: u32,
        modified: DateTime<Utc>,
    ) -> UnifiedEvent {
        UnifiedEvent::new(source, id, format!("Event {}", id), at(day, 9), at(day, 10), modified)
    }

    fn change_set(source: CalendarSource, upserts: Vec<UnifiedEvent>) -> ChangeSet {
        ChangeSet {
            source,
            upserts,
            deletions: vec![],
            next_cursor: SyncCursor::at(at(1, 0)),
            snapshot_window: None,
        }
    }

    fn window() -> DateRange {
        DateRange {
            from: at(1, 0),
            to: at(28, 0),
        }
    }

    #[test]
    fn test_merge_is_idempotent() {
        let store = MemoryEventStore::new();
        let changes = ChangeSet {
            source: CalendarSource::Google,
            upserts: vec![
                event(CalendarSource::Google, "a", 5, at(1, 0)),
                event(CalendarSource::Google, "b", 6, at(1, 0)),
            ],
            deletions: vec!["c".to_string()],
            next_cursor: SyncCursor::at(at(1, 0)),
            snapshot_window: None,
        };

        apply_change_set(&store, &changes).unwrap();
        let after_once = store.query(&window()).unwrap();

        apply_change_set(&store, &changes).unwrap();
        let after_twice = store.query(&window()).unwrap();

        assert_eq!(after_once, after_twice);
        assert_eq!(after_twice.len(), 2);
    }

    #[test]
    fn test_stale_upsert_leaves_store_unchanged() {
        let store = MemoryEventStore::new();

        let newer = event(CalendarSource::Google, "a", 5, at(10, 0));
        apply_change_set(&store, &change_set(CalendarSource::Google, vec![newer.clone()]))
            .unwrap();

        let mut stale = event(CalendarSource::Google, "a", 5, at(2, 0));
        stale.title = "Stale title".to_string();
        let stats =
            apply_change_set(&store, &change_set(CalendarSource::Google, vec![stale])).unwrap();

        assert_eq!(stats.stale_skipped, 1);
        assert!(!stats.has_changes());
        let stored = store.get(CalendarSource::Google, "a").unwrap().unwrap();
        assert_eq!(stored.title, newer.title);
    }

    #[test]
    fn test_equal_timestamp_upsert_wins() {
        // `>=` acceptance: a re-fetch of the same revision may carry
        // corrected fields and must not be dropped as stale.
        let store = MemoryEventStore::new();
        apply_change_set(
            &store,
            &change_set(
                CalendarSource::Google,
                vec![event(CalendarSource::Google, "a", 5, at(3, 0))],
            ),
        )
        .unwrap();

        let mut same_rev = event(CalendarSource::Google, "a", 5, at(3, 0));
        same_rev.title = "Corrected".to_string();
        apply_change_set(&store, &change_set(CalendarSource::Google, vec![same_rev])).unwrap();

        let stored = store.get(CalendarSource::Google, "a").unwrap().unwrap();
        assert_eq!(stored.title, "Corrected");
    }

    #[test]
    fn test_deletions_never_cross_sources() {
        let store = MemoryEventStore::new();

        // Identical native id and title in two sources.
        apply_change_set(
            &store,
            &change_set(
                CalendarSource::Google,
                vec![event(CalendarSource::Google, "shared", 5, at(1, 0))],
            ),
        )
        .unwrap();
        apply_change_set(
            &store,
            &change_set(
                CalendarSource::Outlook,
                vec![event(CalendarSource::Outlook, "shared", 5, at(1, 0))],
            ),
        )
        .unwrap();

        let deletion = ChangeSet {
            source: CalendarSource::Outlook,
            upserts: vec![],
            deletions: vec!["shared".to_string()],
            next_cursor: SyncCursor::at(at(2, 0)),
            snapshot_window: None,
        };
        apply_change_set(&store, &deletion).unwrap();

        assert!(store.get(CalendarSource::Google, "shared").unwrap().is_some());
        assert!(store.get(CalendarSource::Outlook, "shared").unwrap().is_none());
    }

    #[test]
    fn test_snapshot_prunes_only_this_sources_window() {
        let store = MemoryEventStore::new();

        apply_change_set(
            &store,
            &change_set(
                CalendarSource::Local,
                vec![
                    event(CalendarSource::Local, "keep", 5, at(1, 0)),
                    event(CalendarSource::Local, "gone", 6, at(1, 0)),
                ],
            ),
        )
        .unwrap();
        apply_change_set(
            &store,
            &change_set(
                CalendarSource::Google,
                vec![event(CalendarSource::Google, "gone", 6, at(1, 0))],
            ),
        )
        .unwrap();

        // Next local snapshot no longer contains "gone".
        let snapshot = ChangeSet {
            source: CalendarSource::Local,
            upserts: vec![event(CalendarSource::Local, "keep", 5, at(1, 0))],
            deletions: vec![],
            next_cursor: SyncCursor::at(at(2, 0)),
            snapshot_window: Some(window()),
        };
        let stats = apply_change_set(&store, &snapshot).unwrap();

        assert_eq!(stats.deleted, 1);
        assert!(store.get(CalendarSource::Local, "keep").unwrap().is_some());
        assert!(store.get(CalendarSource::Local, "gone").unwrap().is_none());
        // The other source's event with the same native id survives.
        assert!(store.get(CalendarSource::Google, "gone").unwrap().is_some());
    }

    #[test]
    fn test_wrong_source_upserts_are_dropped() {
        let store = MemoryEventStore::new();
        let changes = change_set(
            CalendarSource::Google,
            vec![event(CalendarSource::Outlook, "x", 5, at(1, 0))],
        );
        let stats = apply_change_set(&store, &changes).unwrap();

        assert_eq!(stats, MergeStats::default());
        assert!(store.is_empty().unwrap());
    }
}

//! The sync coordinator: orchestrates one pass across all sources, enforces
//! single-flight execution, aggregates per-source errors, and drives
//! periodic re-sync.
//!
//! One coordinator instance is owned by application startup code, with the
//! adapters and stores injected. Status is published over a `watch` channel
//! so any observer (CLI, UI layer) can follow it without this crate knowing
//! about them.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::SourceAdapter;
use crate::cursor::CursorStore;
use crate::date_range::{DateRange, DEFAULT_DAYS_BACK, DEFAULT_DAYS_FORWARD};
use crate::error::{StoreError, SyncError};
use crate::event::UnifiedEvent;
use crate::merge::{self, MergeStats};
use crate::source::CalendarSource;
use crate::store::EventStore;

/// Published sync status: the only thing the presentation layer sees.
#[derive(Debug, Clone, Default)]
pub struct SyncRunState {
    pub is_syncing: bool,
    /// Completion time of the last pass in which at least one source
    /// succeeded. `None` until the first such pass.
    pub last_sync: Option<DateTime<Utc>>,
    /// This pass's per-source errors, in completion order. Replaced
    /// wholesale at the start of the next pass.
    pub errors: Vec<SyncError>,
}

/// Tunables for the coordinator.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Sync window: days into the past...
    pub days_back: i64,
    /// ...and days into the future.
    pub days_forward: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            days_back: DEFAULT_DAYS_BACK,
            days_forward: DEFAULT_DAYS_FORWARD,
        }
    }
}

struct RealtimeTimer {
    token: CancellationToken,
    // The loop task exits on its own once the token is cancelled.
    _task: JoinHandle<()>,
}

pub struct SyncCoordinator {
    adapters: BTreeMap<CalendarSource, Arc<dyn SourceAdapter>>,
    store: Arc<dyn EventStore>,
    cursors: Arc<dyn CursorStore>,
    config: SyncConfig,

    state_tx: watch::Sender<SyncRunState>,
    /// Single-flight guard: held for the duration of one pass.
    flight: Mutex<()>,
    timer: StdMutex<Option<RealtimeTimer>>,
}

impl SyncCoordinator {
    pub fn new(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        store: Arc<dyn EventStore>,
        cursors: Arc<dyn CursorStore>,
        config: SyncConfig,
    ) -> Arc<Self> {
        let mut by_source: BTreeMap<CalendarSource, Arc<dyn SourceAdapter>> = BTreeMap::new();
        for adapter in adapters {
            let source = adapter.source();
            if by_source.insert(source, adapter).is_some() {
                warn!(source = %source, "duplicate adapter registered; keeping the last one");
            }
        }

        let (state_tx, _) = watch::channel(SyncRunState::default());

        Arc::new(SyncCoordinator {
            adapters: by_source,
            store,
            cursors,
            config,
            state_tx,
            flight: Mutex::new(()),
            timer: StdMutex::new(None),
        })
    }

    /// The sources this coordinator was built with.
    pub fn sources(&self) -> Vec<CalendarSource> {
        self.adapters.keys().copied().collect()
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn cursors(&self) -> &Arc<dyn CursorStore> {
        &self.cursors
    }

    /// Snapshot of the current run state.
    pub fn state(&self) -> SyncRunState {
        self.state_tx.borrow().clone()
    }

    /// Watch the run state. Works for any number of observers.
    pub fn subscribe(&self) -> watch::Receiver<SyncRunState> {
        self.state_tx.subscribe()
    }

    /// The date window for the current pass.
    pub fn window(&self) -> DateRange {
        DateRange::around_now(self.config.days_back, self.config.days_forward)
    }

    /// Events overlapping `range` in the unified store.
    pub fn events(&self, range: &DateRange) -> Result<Vec<UnifiedEvent>, StoreError> {
        self.store.query(range)
    }

    /// Run one incremental sync pass across all sources.
    ///
    /// Single-flight: if a pass is already running, this returns the current
    /// state immediately without fetching anything — a no-op duplicate is
    /// expected when the timer and a manual trigger overlap.
    ///
    /// Never returns an error: per-source failures land in
    /// [`SyncRunState::errors`] and one source's failure never stops the
    /// other two.
    pub async fn sync_once(&self) -> SyncRunState {
        let Ok(_flight) = self.flight.try_lock() else {
            debug!("sync pass already in flight, skipping");
            return self.state();
        };

        self.state_tx.send_modify(|s| {
            s.is_syncing = true;
            s.errors.clear();
        });

        let window = self.window();
        debug!(from = %window.from, to = %window.to, "starting sync pass");

        let runs = self
            .adapters
            .iter()
            .map(|(source, adapter)| self.sync_source(*source, adapter.as_ref(), &window));
        let results = join_all(runs).await;

        let mut errors = Vec::new();
        let mut any_succeeded = false;
        for result in results {
            match result {
                Ok(_) => any_succeeded = true,
                Err(e) => errors.push(e),
            }
        }

        let finished_at = Utc::now();
        self.state_tx.send_modify(|s| {
            s.is_syncing = false;
            if any_succeeded {
                s.last_sync = Some(finished_at);
            }
            s.errors = errors;
        });

        let state = self.state();
        info!(
            succeeded = self.adapters.len() - state.errors.len(),
            failed = state.errors.len(),
            "sync pass finished"
        );
        state
    }

    /// One source's slice of a pass: load cursor, fetch, merge, persist the
    /// new cursor. Any failure leaves the cursor untouched so the next pass
    /// retries the same window/cursor.
    async fn sync_source(
        &self,
        source: CalendarSource,
        adapter: &dyn SourceAdapter,
        window: &DateRange,
    ) -> Result<MergeStats, SyncError> {
        let cursor = self
            .cursors
            .get(source)
            .map_err(|e| SyncError::new(source, e))?;

        let changes = adapter
            .fetch_changes(cursor.as_ref(), window)
            .await
            .map_err(|e| {
                warn!(source = %source, error = %e, "fetch failed");
                SyncError::new(source, e)
            })?;

        let stats = merge::apply_change_set(self.store.as_ref(), &changes)
            .map_err(|e| SyncError::new(source, e))?;

        self.cursors
            .set(source, &changes.next_cursor)
            .map_err(|e| SyncError::new(source, e))?;

        info!(
            source = %source,
            inserted = stats.inserted,
            updated = stats.updated,
            deleted = stats.deleted,
            stale = stats.stale_skipped,
            "source synced"
        );
        Ok(stats)
    }

    /// Clear the cursor for one source (or all of them), then run a pass.
    /// The affected sources will fetch their full window again.
    pub async fn force_full_resync(
        &self,
        source: Option<CalendarSource>,
    ) -> Result<SyncRunState, StoreError> {
        match source {
            Some(source) => self.cursors.clear(source)?,
            None => {
                for source in self.sources() {
                    self.cursors.clear(source)?;
                }
            }
        }
        Ok(self.sync_once().await)
    }

    /// Start periodic re-sync: one pass immediately, then one every
    /// `every`. Calling again replaces any existing timer, so there is
    /// never more than one periodic trigger alive.
    pub fn start_realtime(self: &Arc<Self>, every: Duration) {
        let mut slot = self.timer_slot();
        if let Some(old) = slot.take() {
            // Same discipline as stop_realtime: the old loop winds down at
            // its next scheduling point, never mid-pass.
            old.token.cancel();
        }

        let token = CancellationToken::new();
        let child = token.clone();
        let coordinator = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                // Cancellation is only observed here, between passes: an
                // in-flight pass always finishes, keeping cursor advances
                // intact.
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                coordinator.sync_once().await;
            }
            debug!("realtime sync loop stopped");
        });

        *slot = Some(RealtimeTimer { token, _task: task });
    }

    /// Cancel future scheduled passes. A pass already in flight is allowed
    /// to finish.
    pub fn stop_realtime(&self) {
        let mut slot = self.timer_slot();
        if let Some(timer) = slot.take() {
            timer.token.cancel();
        }
    }

    pub fn is_realtime_running(&self) -> bool {
        self.timer_slot().is_some()
    }

    /// The slot only ever holds an `Option`, so a guard recovered from a
    /// poisoned lock is still valid to use.
    fn timer_slot(&self) -> std::sync::MutexGuard<'_, Option<RealtimeTimer>> {
        self.timer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ChangeSet;
    use crate::cursor::{MemoryCursorStore, SyncCursor};
    use crate::error::{SourceError, SyncFailure};
    use crate::store::{EventTxn, MemoryEventStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Scripted adapter: serves a fixed event set or a fixed error, records
    /// every call and whether it was given a cursor.
    struct FakeAdapter {
        source: CalendarSource,
        events: Vec<UnifiedEvent>,
        fail_with: Option<SourceError>,
        calls: AtomicUsize,
        seen_cursor: StdMutex<Vec<bool>>,
        gate: Option<Arc<Notify>>,
    }

    impl FakeAdapter {
        fn serving(source: CalendarSource, count: usize) -> Self {
            let events = (0..count)
                .map(|i| {
                    let start = Utc::now();
                    UnifiedEvent::new(
                        source,
                        format!("{}-{}", source, i),
                        format!("Event {}", i),
                        start,
                        start + chrono::Duration::hours(1),
                        start,
                    )
                })
                .collect();
            FakeAdapter {
                source,
                events,
                fail_with: None,
                calls: AtomicUsize::new(0),
                seen_cursor: StdMutex::new(Vec::new()),
                gate: None,
            }
        }

        fn failing(source: CalendarSource, error: SourceError) -> Self {
            let mut adapter = FakeAdapter::serving(source, 0);
            adapter.fail_with = Some(error);
            adapter
        }

        fn gated(source: CalendarSource, count: usize, gate: Arc<Notify>) -> Self {
            let mut adapter = FakeAdapter::serving(source, count);
            adapter.gate = Some(gate);
            adapter
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SourceAdapter for FakeAdapter {
        fn source(&self) -> CalendarSource {
            self.source
        }

        async fn fetch_changes(
            &self,
            cursor: Option<&SyncCursor>,
            _window: &DateRange,
        ) -> Result<ChangeSet, SourceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_cursor
                .lock()
                .unwrap()
                .push(cursor.is_some());

            if let Some(gate) = &self.gate {
                gate.notified().await;
            }

            if let Some(error) = &self.fail_with {
                return Err(error.clone());
            }

            Ok(ChangeSet {
                source: self.source,
                upserts: self.events.clone(),
                deletions: vec![],
                next_cursor: SyncCursor::with_token(format!("tok-{}", call), Utc::now()),
                snapshot_window: None,
            })
        }
    }

    fn coordinator(
        adapters: Vec<Arc<dyn SourceAdapter>>,
    ) -> (Arc<SyncCoordinator>, Arc<MemoryEventStore>, Arc<MemoryCursorStore>) {
        let store = Arc::new(MemoryEventStore::new());
        let cursors = Arc::new(MemoryCursorStore::new());
        let coordinator = SyncCoordinator::new(
            adapters,
            store.clone(),
            cursors.clone(),
            SyncConfig::default(),
        );
        (coordinator, store, cursors)
    }

    #[tokio::test]
    async fn test_clean_run_merges_all_three_sources() {
        let (coordinator, store, cursors) = coordinator(vec![
            Arc::new(FakeAdapter::serving(CalendarSource::Local, 2)),
            Arc::new(FakeAdapter::serving(CalendarSource::Google, 2)),
            Arc::new(FakeAdapter::serving(CalendarSource::Outlook, 2)),
        ]);

        let state = coordinator.sync_once().await;

        assert!(state.errors.is_empty());
        assert!(state.last_sync.is_some());
        assert!(!state.is_syncing);
        assert_eq!(store.len().unwrap(), 6);
        for source in CalendarSource::ALL {
            assert!(
                cursors.get(source).unwrap().is_some(),
                "{} cursor should be set",
                source
            );
        }
    }

    #[tokio::test]
    async fn test_one_failing_source_never_stops_the_others() {
        let (coordinator, store, cursors) = coordinator(vec![
            Arc::new(FakeAdapter::serving(CalendarSource::Local, 2)),
            Arc::new(FakeAdapter::failing(
                CalendarSource::Google,
                SourceError::Transient("connection reset".into()),
            )),
            Arc::new(FakeAdapter::serving(CalendarSource::Outlook, 2)),
        ]);

        let state = coordinator.sync_once().await;

        assert_eq!(state.errors.len(), 1);
        assert_eq!(state.errors[0].source, CalendarSource::Google);
        assert!(matches!(
            state.errors[0].cause,
            SyncFailure::Fetch(SourceError::Transient(_))
        ));
        // The failing source still counts the pass as partially successful.
        assert!(state.last_sync.is_some());
        assert_eq!(store.len().unwrap(), 4);
        assert!(cursors.get(CalendarSource::Local).unwrap().is_some());
        assert!(cursors.get(CalendarSource::Google).unwrap().is_none());
        assert!(cursors.get(CalendarSource::Outlook).unwrap().is_some());
    }

    /// Store that accepts reads but refuses every write.
    struct ReadOnlyStore;

    impl EventStore for ReadOnlyStore {
        fn get(
            &self,
            _: CalendarSource,
            _: &str,
        ) -> Result<Option<UnifiedEvent>, StoreError> {
            Ok(None)
        }

        fn apply(&self, _: CalendarSource, _: EventTxn) -> Result<(), StoreError> {
            Err(StoreError::Io("read-only filesystem".into()))
        }

        fn query(&self, _: &DateRange) -> Result<Vec<UnifiedEvent>, StoreError> {
            Ok(vec![])
        }

        fn source_events_in(
            &self,
            _: CalendarSource,
            _: &DateRange,
        ) -> Result<Vec<UnifiedEvent>, StoreError> {
            Ok(vec![])
        }

        fn len(&self) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_a_merge_error_and_withholds_the_cursor() {
        let cursors = Arc::new(MemoryCursorStore::new());
        let coordinator = SyncCoordinator::new(
            vec![Arc::new(FakeAdapter::serving(CalendarSource::Google, 1))],
            Arc::new(ReadOnlyStore),
            cursors.clone(),
            SyncConfig::default(),
        );

        let state = coordinator.sync_once().await;

        assert_eq!(state.errors.len(), 1);
        assert!(matches!(
            state.errors[0].cause,
            SyncFailure::Merge(StoreError::Io(_))
        ));
        assert!(state.errors[0].is_retryable());
        assert!(
            cursors.get(CalendarSource::Google).unwrap().is_none(),
            "cursor must not advance past a failed merge"
        );
    }

    #[tokio::test]
    async fn test_all_sources_failing_leaves_last_sync_unset() {
        let (coordinator, _, _) = coordinator(vec![
            Arc::new(FakeAdapter::failing(
                CalendarSource::Local,
                SourceError::Transient("io".into()),
            )),
            Arc::new(FakeAdapter::failing(
                CalendarSource::Google,
                SourceError::NotAuthorized("expired".into()),
            )),
        ]);

        let state = coordinator.sync_once().await;

        assert_eq!(state.errors.len(), 2);
        assert_eq!(state.last_sync, None);
    }

    #[tokio::test]
    async fn test_concurrent_sync_is_single_flight() {
        let gate = Arc::new(Notify::new());
        let slow = Arc::new(FakeAdapter::gated(CalendarSource::Local, 1, gate.clone()));
        let fast = Arc::new(FakeAdapter::serving(CalendarSource::Google, 1));
        let (coordinator, _, _) =
            coordinator(vec![slow.clone() as Arc<dyn SourceAdapter>, fast.clone()]);

        let mut rx = coordinator.subscribe();
        let running = coordinator.clone();
        let first = tokio::spawn(async move { running.sync_once().await });

        // Wait until the first pass holds the flight lock.
        rx.wait_for(|s| s.is_syncing).await.unwrap();

        // Second caller: no second pass, just the in-flight snapshot.
        let second = coordinator.sync_once().await;
        assert!(second.is_syncing);

        gate.notify_one();
        let first = first.await.unwrap();
        assert!(!first.is_syncing);
        assert_eq!(slow.calls(), 1, "local adapter fetched once, not twice");
        assert_eq!(fast.calls(), 1, "google adapter fetched once, not twice");
    }

    #[tokio::test]
    async fn test_errors_are_replaced_wholesale_each_pass() {
        let failing = Arc::new(FakeAdapter::failing(
            CalendarSource::Google,
            SourceError::Transient("flaky".into()),
        ));
        let (coordinator, _, _) = coordinator(vec![
            failing.clone() as Arc<dyn SourceAdapter>,
            Arc::new(FakeAdapter::serving(CalendarSource::Local, 1)),
        ]);

        let first = coordinator.sync_once().await;
        let second = coordinator.sync_once().await;

        assert_eq!(first.errors.len(), 1);
        assert_eq!(second.errors.len(), 1, "not accumulated across passes");
    }

    #[tokio::test]
    async fn test_cursor_advances_monotonically_across_passes() {
        let (coordinator, _, cursors) = coordinator(vec![Arc::new(FakeAdapter::serving(
            CalendarSource::Google,
            1,
        ))]);

        coordinator.sync_once().await;
        let after_first = cursors.get(CalendarSource::Google).unwrap().unwrap();

        coordinator.sync_once().await;
        let after_second = cursors.get(CalendarSource::Google).unwrap().unwrap();

        assert!(after_second.last_sync >= after_first.last_sync);
        assert_eq!(after_first.token.as_deref(), Some("tok-0"));
        assert_eq!(after_second.token.as_deref(), Some("tok-1"));
    }

    #[tokio::test]
    async fn test_forced_resync_drops_the_cursor_for_one_source() {
        let google = Arc::new(FakeAdapter::serving(CalendarSource::Google, 1));
        let outlook = Arc::new(FakeAdapter::serving(CalendarSource::Outlook, 1));
        let (coordinator, _, _) = coordinator(vec![
            google.clone() as Arc<dyn SourceAdapter>,
            outlook.clone(),
        ]);

        coordinator.sync_once().await;
        coordinator.sync_once().await;
        coordinator
            .force_full_resync(Some(CalendarSource::Google))
            .await
            .unwrap();

        let google_cursors = google.seen_cursor.lock().unwrap().clone();
        let outlook_cursors = outlook.seen_cursor.lock().unwrap().clone();
        assert_eq!(
            google_cursors,
            vec![false, true, false],
            "resync pass must fetch google without a cursor"
        );
        assert_eq!(outlook_cursors, vec![false, true, true]);
    }

    #[tokio::test]
    async fn test_realtime_timer_runs_and_stops() {
        let adapter = Arc::new(FakeAdapter::serving(CalendarSource::Local, 1));
        let (coordinator, _, _) = coordinator(vec![adapter.clone() as Arc<dyn SourceAdapter>]);

        coordinator.start_realtime(Duration::from_millis(20));
        assert!(coordinator.is_realtime_running());
        tokio::time::sleep(Duration::from_millis(110)).await;

        coordinator.stop_realtime();
        assert!(!coordinator.is_realtime_running());
        let calls_at_stop = adapter.calls();
        assert!(calls_at_stop >= 2, "expected several passes, got {}", calls_at_stop);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(adapter.calls(), calls_at_stop, "no passes after stop");
    }

    #[tokio::test]
    async fn test_restarting_realtime_replaces_the_old_timer() {
        let adapter = Arc::new(FakeAdapter::serving(CalendarSource::Local, 1));
        let (coordinator, _, _) = coordinator(vec![adapter.clone() as Arc<dyn SourceAdapter>]);

        coordinator.start_realtime(Duration::from_secs(3600));
        // Replace with a long interval again: only the immediate pass of
        // each timer should ever run.
        coordinator.start_realtime(Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_millis(60)).await;
        coordinator.stop_realtime();

        assert!(
            adapter.calls() <= 2,
            "old timer leaked: {} passes",
            adapter.calls()
        );
    }
}

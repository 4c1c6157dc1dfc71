//! Local calendar adapter: a directory of `.ics` files.
//!
//! The local backend has no delta API, so every fetch reads the whole
//! directory and reports the window as a snapshot; files that disappeared
//! since the last pass show up as deletions during snapshot pruning.
//! Never fails for network reasons.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use icalendar::parser::{read_calendar, unfold, Component};
use icalendar::{CalendarDateTime, DatePerhapsTime};
use tracing::warn;

use crate::adapter::{ChangeSet, SourceAdapter};
use crate::cursor::SyncCursor;
use crate::date_range::DateRange;
use crate::error::SourceError;
use crate::event::UnifiedEvent;
use crate::source::CalendarSource;

pub struct IcsDirSource {
    dir: PathBuf,
}

impl IcsDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        IcsDirSource { dir: dir.into() }
    }

    fn read_events(&self, window: &DateRange) -> Result<Vec<UnifiedEvent>, SourceError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            SourceError::Transient(format!("cannot read {}: {}", self.dir.display(), e))
        })?;

        let mut events = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SourceError::Transient(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("ics") {
                continue;
            }

            let contents = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping unreadable ics file");
                    continue;
                }
            };

            let mtime = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from);

            match parse_ics_event(&contents, mtime) {
                Some(event) if window.overlaps(event.start, event.end) => events.push(event),
                Some(_) => {} // outside the window
                None => {
                    warn!(file = %path.display(), "skipping unparseable ics file");
                }
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl SourceAdapter for IcsDirSource {
    fn source(&self) -> CalendarSource {
        CalendarSource::Local
    }

    async fn fetch_changes(
        &self,
        _cursor: Option<&SyncCursor>,
        window: &DateRange,
    ) -> Result<ChangeSet, SourceError> {
        let upserts = self.read_events(window)?;

        Ok(ChangeSet {
            source: CalendarSource::Local,
            upserts,
            deletions: vec![],
            next_cursor: SyncCursor::at(Utc::now()),
            snapshot_window: Some(window.clone()),
        })
    }
}

/// Parse the first VEVENT of an ICS document into a unified event.
fn parse_ics_event(contents: &str, mtime: Option<DateTime<Utc>>) -> Option<UnifiedEvent> {
    let unfolded = unfold(contents);
    let calendar = read_calendar(&unfolded).ok()?;
    let vevent = calendar.components.iter().find(|c| c.name == "VEVENT")?;

    let uid = vevent.find_prop("UID")?.val.to_string();
    let title = vevent
        .find_prop("SUMMARY")
        .map(|p| p.val.to_string())
        .unwrap_or_else(|| "(No title)".to_string());

    let start_raw = DatePerhapsTime::try_from(vevent.find_prop("DTSTART")?).ok()?;
    let all_day = matches!(start_raw, DatePerhapsTime::Date(_));
    let start = to_utc(&start_raw)?;
    let end = vevent
        .find_prop("DTEND")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .as_ref()
        .and_then(to_utc)
        .unwrap_or(start);

    let location = vevent.find_prop("LOCATION").map(|p| p.val.to_string());
    let notes = vevent.find_prop("DESCRIPTION").map(|p| p.val.to_string());

    // LAST-MODIFIED, then DTSTAMP, then file mtime. Something must order
    // revisions or the merge cannot arbitrate overlapping fetches.
    let last_modified = prop_datetime(vevent, "LAST-MODIFIED")
        .or_else(|| prop_datetime(vevent, "DTSTAMP"))
        .or(mtime)?;

    let mut event = UnifiedEvent::new(CalendarSource::Local, uid, title, start, end, last_modified);
    event.all_day = all_day;
    event.location = location;
    event.notes = notes;
    Some(event)
}

fn prop_datetime(vevent: &Component<'_>, name: &str) -> Option<DateTime<Utc>> {
    let prop = vevent.find_prop(name)?;
    let dpt = DatePerhapsTime::try_from(prop).ok()?;
    to_utc(&dpt)
}

/// Collapse the ICS date flavors into UTC. Floating and zoned times are
/// treated as UTC; good enough for windowing and ordering.
fn to_utc(dpt: &DatePerhapsTime) -> Option<DateTime<Utc>> {
    match dpt {
        DatePerhapsTime::Date(d) => Some(d.and_hms_opt(0, 0, 0)?.and_utc()),
        DatePerhapsTime::DateTime(dt) => match dt {
            CalendarDateTime::Utc(dt) => Some(*dt),
            CalendarDateTime::Floating(naive) => Some(naive.and_utc()),
            CalendarDateTime::WithTimezone { date_time, .. } => Some(date_time.and_utc()),
        },
    }
}

//! Google Calendar adapter (v3 REST API).
//!
//! True delta source: the first fetch walks the window and yields a
//! `nextSyncToken`; later fetches send only that token and get back the
//! changes since, including cancelled events. A 410 from the API means the
//! token aged out, in which case we fall back to one full-window fetch
//! inside the same call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::adapter::{ChangeSet, SourceAdapter, TokenSource};
use crate::cursor::SyncCursor;
use crate::date_range::DateRange;
use crate::error::SourceError;
use crate::event::UnifiedEvent;
use crate::source::CalendarSource;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/calendar/v3";
const PAGE_SIZE: &str = "250";
/// Hard cap on pages per fetch; keeps one pass bounded even if the backend
/// keeps handing out page tokens.
const MAX_PAGES: usize = 50;

pub struct GoogleCalendarSource {
    client: reqwest::Client,
    base_url: String,
    calendar_id: String,
    token: Arc<dyn TokenSource>,
}

impl GoogleCalendarSource {
    pub fn new(calendar_id: impl Into<String>, token: Arc<dyn TokenSource>) -> Self {
        GoogleCalendarSource {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            calendar_id: calendar_id.into(),
            token,
        }
    }

    /// Point the adapter at a different API host (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Walk all pages of an events listing. `sync_token == None` is a full
    /// window fetch; `Some` is an incremental fetch.
    async fn list(
        &self,
        access_token: &str,
        sync_token: Option<&str>,
        window: &DateRange,
    ) -> Result<ListOutcome, SourceError> {
        let url = format!("{}/calendars/{}/events", self.base_url, self.calendar_id);
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut query: Vec<(&str, String)> = vec![("maxResults", PAGE_SIZE.to_string())];
            match sync_token {
                Some(token) => query.push(("syncToken", token.to_string())),
                None => {
                    query.push(("timeMin", window.from_rfc3339()));
                    query.push(("timeMax", window.to_rfc3339()));
                    query.push(("singleEvents", "true".to_string()));
                    query.push(("showDeleted", "true".to_string()));
                }
            }
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let response = self
                .client
                .get(&url)
                .bearer_auth(access_token)
                .query(&query)
                .send()
                .await
                .map_err(|e| SourceError::Transient(e.to_string()))?;

            match response.status() {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    return Err(SourceError::NotAuthorized(
                        "google rejected the access token".into(),
                    ));
                }
                StatusCode::GONE => return Ok(ListOutcome::StaleToken),
                StatusCode::TOO_MANY_REQUESTS => {
                    return Err(SourceError::RateLimited {
                        retry_after: retry_after(&response),
                    });
                }
                status if !status.is_success() => {
                    return Err(SourceError::Transient(format!(
                        "google returned HTTP {}",
                        status
                    )));
                }
                _ => {}
            }

            let page: EventsPage = response
                .json()
                .await
                .map_err(|e| SourceError::Malformed(e.to_string()))?;

            items.extend(page.items);

            match (page.next_page_token, page.next_sync_token) {
                (Some(next), _) => page_token = Some(next),
                (None, Some(sync)) => return Ok(ListOutcome::Done { items, sync }),
                (None, None) => {
                    return Err(SourceError::Malformed(
                        "google listing ended without a nextSyncToken".into(),
                    ));
                }
            }
        }

        Err(SourceError::Malformed(format!(
            "google listing did not terminate within {} pages",
            MAX_PAGES
        )))
    }

    fn to_change_set(
        &self,
        items: Vec<GoogleEvent>,
        sync_token: String,
        snapshot_window: Option<DateRange>,
    ) -> ChangeSet {
        let mut upserts = Vec::new();
        let mut deletions = Vec::new();

        for item in items {
            if item.status.as_deref() == Some("cancelled") {
                deletions.push(item.id);
                continue;
            }
            match to_unified(&item, &self.calendar_id) {
                Some(event) => upserts.push(event),
                None => {
                    warn!(event = %item.id, "skipping google event without usable times");
                }
            }
        }

        ChangeSet {
            source: CalendarSource::Google,
            upserts,
            deletions,
            next_cursor: SyncCursor::with_token(sync_token, Utc::now()),
            snapshot_window,
        }
    }
}

#[async_trait]
impl SourceAdapter for GoogleCalendarSource {
    fn source(&self) -> CalendarSource {
        CalendarSource::Google
    }

    async fn fetch_changes(
        &self,
        cursor: Option<&SyncCursor>,
        window: &DateRange,
    ) -> Result<ChangeSet, SourceError> {
        let access_token = self.token.access_token()?;
        let sync_token = cursor.and_then(|c| c.token.as_deref());

        match self.list(&access_token, sync_token, window).await? {
            ListOutcome::Done { items, sync } => {
                // A fetch that ran without a sync token saw the whole window.
                let snapshot = sync_token.is_none().then(|| window.clone());
                Ok(self.to_change_set(items, sync, snapshot))
            }
            ListOutcome::StaleToken => {
                debug!("google sync token expired; refetching the full window");
                match self.list(&access_token, None, window).await? {
                    ListOutcome::Done { items, sync } => {
                        Ok(self.to_change_set(items, sync, Some(window.clone())))
                    }
                    ListOutcome::StaleToken => Err(SourceError::Malformed(
                        "google returned 410 for a tokenless listing".into(),
                    )),
                }
            }
        }
    }
}

enum ListOutcome {
    Done { items: Vec<GoogleEvent>, sync: String },
    StaleToken,
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[derive(Debug, Deserialize)]
struct EventsPage {
    #[serde(default)]
    items: Vec<GoogleEvent>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
    #[serde(rename = "nextSyncToken")]
    next_sync_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleEvent {
    id: String,
    status: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    start: Option<GoogleTime>,
    end: Option<GoogleTime>,
    updated: Option<DateTime<Utc>>,
}

/// Google's two-flavor event time: `dateTime` for timed events, `date` for
/// all-day ones.
#[derive(Debug, Deserialize)]
struct GoogleTime {
    #[serde(rename = "dateTime")]
    date_time: Option<DateTime<FixedOffset>>,
    date: Option<NaiveDate>,
}

impl GoogleTime {
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        match (&self.date_time, &self.date) {
            (Some(dt), _) => Some(dt.with_timezone(&Utc)),
            (None, Some(d)) => Some(d.and_hms_opt(0, 0, 0)?.and_utc()),
            (None, None) => None,
        }
    }

    fn is_all_day(&self) -> bool {
        self.date.is_some() && self.date_time.is_none()
    }
}

fn to_unified(item: &GoogleEvent, calendar_id: &str) -> Option<UnifiedEvent> {
    let start_time = item.start.as_ref()?;
    let start = start_time.to_utc()?;
    let end = item.end.as_ref().and_then(|t| t.to_utc()).unwrap_or(start);

    let mut event = UnifiedEvent::new(
        CalendarSource::Google,
        item.id.clone(),
        item.summary.clone().unwrap_or_else(|| "(No title)".into()),
        start,
        end,
        item.updated.unwrap_or(start),
    );
    event.all_day = start_time.is_all_day();
    event.calendar_id = Some(calendar_id.to_string());
    event.location = item.location.clone();
    event.notes = item.description.clone();
    Some(event)
}

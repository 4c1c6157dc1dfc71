//! Outlook adapter (Microsoft Graph `calendarView/delta`).
//!
//! True delta source: the first fetch walks the window page by page and
//! ends with an `@odata.deltaLink`; that link is the cursor token and is
//! requested directly on later passes. Entries carrying `@removed` are
//! deletions. A 410 means the delta link aged out and the full window is
//! refetched within the same call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::adapter::{ChangeSet, SourceAdapter, TokenSource};
use crate::cursor::SyncCursor;
use crate::date_range::DateRange;
use crate::error::SourceError;
use crate::event::UnifiedEvent;
use crate::source::CalendarSource;

const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
const MAX_PAGES: usize = 50;

pub struct OutlookCalendarSource {
    client: reqwest::Client,
    base_url: String,
    token: Arc<dyn TokenSource>,
}

impl OutlookCalendarSource {
    pub fn new(token: Arc<dyn TokenSource>) -> Self {
        OutlookCalendarSource {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            token,
        }
    }

    /// Point the adapter at a different API host (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn window_url(&self, window: &DateRange) -> Result<Url, SourceError> {
        Url::parse_with_params(
            &format!("{}/me/calendarView/delta", self.base_url),
            &[
                ("startDateTime", window.from_rfc3339()),
                ("endDateTime", window.to_rfc3339()),
            ],
        )
        .map_err(|e| SourceError::Malformed(format!("cannot build delta url: {}", e)))
    }

    /// Follow `@odata.nextLink` pages until the delta link shows up.
    async fn walk(&self, access_token: &str, start: Url) -> Result<DeltaOutcome, SourceError> {
        let mut url = start;
        let mut items = Vec::new();

        for _ in 0..MAX_PAGES {
            let response = self
                .client
                .get(url.clone())
                .bearer_auth(access_token)
                .header("Prefer", "outlook.timezone=\"UTC\"")
                .send()
                .await
                .map_err(|e| SourceError::Transient(e.to_string()))?;

            match response.status() {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    return Err(SourceError::NotAuthorized(
                        "graph rejected the access token".into(),
                    ));
                }
                StatusCode::GONE => return Ok(DeltaOutcome::StaleLink),
                StatusCode::TOO_MANY_REQUESTS => {
                    return Err(SourceError::RateLimited {
                        retry_after: retry_after(&response),
                    });
                }
                status if !status.is_success() => {
                    return Err(SourceError::Transient(format!(
                        "graph returned HTTP {}",
                        status
                    )));
                }
                _ => {}
            }

            let page: DeltaPage = response
                .json()
                .await
                .map_err(|e| SourceError::Malformed(e.to_string()))?;

            items.extend(page.value);

            match (page.next_link, page.delta_link) {
                (Some(next), _) => {
                    url = Url::parse(&next)
                        .map_err(|e| SourceError::Malformed(format!("bad nextLink: {}", e)))?;
                }
                (None, Some(delta)) => {
                    return Ok(DeltaOutcome::Done { items, delta });
                }
                (None, None) => {
                    return Err(SourceError::Malformed(
                        "graph listing ended without a deltaLink".into(),
                    ));
                }
            }
        }

        Err(SourceError::Malformed(format!(
            "graph listing did not terminate within {} pages",
            MAX_PAGES
        )))
    }

    fn to_change_set(
        &self,
        items: Vec<OutlookEvent>,
        delta_link: String,
        snapshot_window: Option<DateRange>,
    ) -> ChangeSet {
        let mut upserts = Vec::new();
        let mut deletions = Vec::new();

        for item in items {
            if item.removed.is_some() {
                deletions.push(item.id);
                continue;
            }
            match to_unified(&item) {
                Some(event) => upserts.push(event),
                None => {
                    warn!(event = %item.id, "skipping outlook event without usable times");
                }
            }
        }

        ChangeSet {
            source: CalendarSource::Outlook,
            upserts,
            deletions,
            next_cursor: SyncCursor::with_token(delta_link, Utc::now()),
            snapshot_window,
        }
    }
}

#[async_trait]
impl SourceAdapter for OutlookCalendarSource {
    fn source(&self) -> CalendarSource {
        CalendarSource::Outlook
    }

    async fn fetch_changes(
        &self,
        cursor: Option<&SyncCursor>,
        window: &DateRange,
    ) -> Result<ChangeSet, SourceError> {
        let access_token = self.token.access_token()?;

        let delta_link = cursor.and_then(|c| c.token.as_deref());
        let start = match delta_link {
            Some(link) => Url::parse(link)
                .map_err(|e| SourceError::Malformed(format!("bad stored deltaLink: {}", e)))?,
            None => self.window_url(window)?,
        };

        match self.walk(&access_token, start).await? {
            DeltaOutcome::Done { items, delta } => {
                let snapshot = delta_link.is_none().then(|| window.clone());
                Ok(self.to_change_set(items, delta, snapshot))
            }
            DeltaOutcome::StaleLink => {
                debug!("outlook delta link expired; refetching the full window");
                match self.walk(&access_token, self.window_url(window)?).await? {
                    DeltaOutcome::Done { items, delta } => {
                        Ok(self.to_change_set(items, delta, Some(window.clone())))
                    }
                    DeltaOutcome::StaleLink => Err(SourceError::Malformed(
                        "graph returned 410 for a full window listing".into(),
                    )),
                }
            }
        }
    }
}

enum DeltaOutcome {
    Done {
        items: Vec<OutlookEvent>,
        delta: String,
    },
    StaleLink,
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
struct DeltaPage {
    #[serde(default)]
    value: Vec<OutlookEvent>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink")]
    delta_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutlookEvent {
    id: String,
    subject: Option<String>,
    body_preview: Option<String>,
    is_all_day: Option<bool>,
    location: Option<OutlookLocation>,
    start: Option<GraphTime>,
    end: Option<GraphTime>,
    last_modified_date_time: Option<DateTime<Utc>>,
    #[serde(rename = "@removed")]
    removed: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutlookLocation {
    display_name: Option<String>,
}

/// Graph event times come as a zoneless string plus a zone name. We request
/// UTC via the `Prefer` header, so the zone is accepted at face value.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphTime {
    date_time: String,
}

impl GraphTime {
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(&self.date_time, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

fn to_unified(item: &OutlookEvent) -> Option<UnifiedEvent> {
    let start = item.start.as_ref()?.to_utc()?;
    let end = item.end.as_ref().and_then(|t| t.to_utc()).unwrap_or(start);

    let mut event = UnifiedEvent::new(
        CalendarSource::Outlook,
        item.id.clone(),
        item.subject.clone().unwrap_or_else(|| "(No title)".into()),
        start,
        end,
        item.last_modified_date_time.unwrap_or(start),
    );
    event.all_day = item.is_all_day.unwrap_or(false);
    event.location = item
        .location
        .as_ref()
        .and_then(|l| l.display_name.clone());
    event.notes = item.body_preview.clone();
    Some(event)
}

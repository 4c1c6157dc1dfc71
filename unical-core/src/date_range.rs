//! Date window for bounding fetches and queries.

use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Default sync window: this many days into the past...
pub const DEFAULT_DAYS_BACK: i64 = 30;
/// ...and this many days into the future.
pub const DEFAULT_DAYS_FORWARD: i64 = 90;

/// A bounded date range.
///
/// Used as the sync window handed to adapters (sources without a true delta
/// API fetch exactly this window) and for querying the unified store.
#[derive(Debug, Clone, PartialEq)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Default for DateRange {
    fn default() -> Self {
        DateRange::around_now(DEFAULT_DAYS_BACK, DEFAULT_DAYS_FORWARD)
    }
}

impl DateRange {
    /// Window centered on now: `days_back` into the past, `days_forward` ahead.
    pub fn around_now(days_back: i64, days_forward: i64) -> Self {
        let now = Utc::now();
        DateRange {
            from: now - Duration::days(days_back),
            to: now + Duration::days(days_forward),
        }
    }

    /// Parse CLI-style date arguments, each YYYY-MM-DD, falling back to the
    /// default window for whichever bound is missing.
    pub fn from_args(from: Option<&str>, to: Option<&str>) -> Result<Self, String> {
        let now = Utc::now();

        let from_dt = match from {
            Some(s) => parse_date_start(s)?,
            None => now - Duration::days(DEFAULT_DAYS_BACK),
        };

        let to_dt = match to {
            Some(s) => parse_date_end(s)?,
            None => now + Duration::days(DEFAULT_DAYS_FORWARD),
        };

        Ok(DateRange {
            from: from_dt,
            to: to_dt,
        })
    }

    /// Whether an event spanning `[start, end]` overlaps this range.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start <= self.to && end >= self.from
    }

    pub fn from_rfc3339(&self) -> String {
        self.from.to_rfc3339()
    }

    pub fn to_rfc3339(&self) -> String {
        self.to.to_rfc3339()
    }
}

/// Parse YYYY-MM-DD as start of day in UTC
fn parse_date_start(s: &str) -> Result<DateTime<Utc>, String> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| format!("Invalid date format '{}'. Expected YYYY-MM-DD", s))?;
    Ok(date.and_hms_opt(0, 0, 0).unwrap().and_utc())
}

/// Parse YYYY-MM-DD as end of day in UTC
fn parse_date_end(s: &str) -> Result<DateTime<Utc>, String> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| format!("Invalid date format '{}'. Expected YYYY-MM-DD", s))?;
    Ok(date.and_hms_opt(23, 59, 59).unwrap().and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_overlaps_counts_partial_overlap() {
        let range = DateRange {
            from: Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap(),
            to: Utc.with_ymd_and_hms(2026, 1, 20, 0, 0, 0).unwrap(),
        };

        let before = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
        let inside = Utc.with_ymd_and_hms(2026, 1, 12, 0, 0, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 1, 25, 0, 0, 0).unwrap();

        assert!(range.overlaps(inside, inside));
        assert!(range.overlaps(before, inside), "spills into the window");
        assert!(range.overlaps(inside, after), "spills out of the window");
        assert!(!range.overlaps(before, before));
        assert!(!range.overlaps(after, after));
    }

    #[test]
    fn test_from_args_parses_bounds() {
        let range = DateRange::from_args(Some("2026-02-01"), Some("2026-02-28")).unwrap();
        assert_eq!(
            range.from,
            Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            range.to,
            Utc.with_ymd_and_hms(2026, 2, 28, 23, 59, 59).unwrap()
        );
    }

    #[test]
    fn test_from_args_rejects_garbage() {
        assert!(DateRange::from_args(Some("yesterday"), None).is_err());
    }
}

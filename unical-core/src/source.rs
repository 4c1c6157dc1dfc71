//! Backend identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the three calendar backends events can come from.
///
/// Totally ordered so it can key `BTreeMap`s and produce stable iteration
/// order in logs and persisted files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarSource {
    /// The on-device calendar (a directory of `.ics` files).
    Local,
    /// Google Calendar, reached over the v3 REST API.
    Google,
    /// Microsoft Outlook, reached over the Graph API.
    Outlook,
}

impl CalendarSource {
    /// Every known source, in canonical order.
    pub const ALL: [CalendarSource; 3] = [
        CalendarSource::Local,
        CalendarSource::Google,
        CalendarSource::Outlook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarSource::Local => "local",
            CalendarSource::Google => "google",
            CalendarSource::Outlook => "outlook",
        }
    }
}

impl fmt::Display for CalendarSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalendarSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(CalendarSource::Local),
            "google" => Ok(CalendarSource::Google),
            "outlook" => Ok(CalendarSource::Outlook),
            other => Err(format!(
                "Unknown source '{}'. Expected one of: local, google, outlook",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        for source in CalendarSource::ALL {
            assert_eq!(source.as_str().parse::<CalendarSource>(), Ok(source));
        }
    }

    #[test]
    fn test_serializes_as_lowercase_string() {
        let json = serde_json::to_string(&CalendarSource::Google).unwrap();
        assert_eq!(json, "\"google\"");
    }
}

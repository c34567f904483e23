use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Body of `POST /api/recordings`.
///
/// `channel` accepts either a channel id or its number. Omitted `start`/`stop`
/// are resolved from the program guide.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleRecording {
    pub channel: String,
    #[serde(default)]
    pub start: Option<RequestTime>,
    #[serde(default)]
    pub stop: Option<RequestTime>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// An instant as a client writes it: RFC 3339 with an offset, or a bare
/// `YYYY-MM-DDTHH:MM:SS` read in the server's configured zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestTime {
    Zoned(DateTime<FixedOffset>),
    Local(NaiveDateTime),
}

impl RequestTime {
    /// The UTC instant, or `None` for a local time the zone skips.
    /// A local time the zone repeats takes its earlier reading.
    pub fn to_utc<Tz: TimeZone>(&self, tz: &Tz) -> Option<DateTime<Utc>> {
        match self {
            RequestTime::Zoned(t) => Some(t.with_timezone(&Utc)),
            RequestTime::Local(t) => tz
                .from_local_datetime(t)
                .earliest()
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}

impl From<DateTime<Utc>> for RequestTime {
    fn from(t: DateTime<Utc>) -> Self {
        RequestTime::Zoned(t.fixed_offset())
    }
}

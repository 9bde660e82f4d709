//! Counting epochs.
//!
//! An epoch is one calendar day in the user's time zone. The persisted
//! baseline and the daily history are both keyed by it.

use chrono::{DateTime, FixedOffset, Local, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "kind", content = "offsetMinutes")]
pub enum DayBoundary {
    Local,
    Fixed(i32),
}

impl Default for DayBoundary {
    fn default() -> Self {
        DayBoundary::Local
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpochKey(String);

impl EpochKey {
    pub fn for_timestamp(timestamp: DateTime<Utc>, boundary: DayBoundary) -> Self {
        let day = match boundary {
            DayBoundary::Local => timestamp.with_timezone(&Local).date_naive(),
            DayBoundary::Fixed(minutes) => {
                // Out-of-range offsets fall back to UTC.
                let offset =
                    FixedOffset::east_opt(minutes.saturating_mul(60)).unwrap_or(Utc.fix());
                timestamp.with_timezone(&offset).date_naive()
            }
        };
        Self(day.format("%Y-%m-%d").to_string())
    }

    pub fn now(boundary: DayBoundary) -> Self {
        Self::for_timestamp(Utc::now(), boundary)
    }

    /// Wraps a key read back from storage.
    pub fn from_stored(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `YYYY-MM` prefix of the day.
    pub fn month(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl fmt::Display for EpochKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

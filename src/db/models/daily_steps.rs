use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::EpochKey;

/// Highest step total seen for one day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailySteps {
    pub day: EpochKey,
    pub steps: u64,
    pub updated_at: DateTime<Utc>,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Baseline, EpochKey};

/// Stored calibration point for one epoch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BaselineRecord {
    pub epoch_key: EpochKey,
    pub baseline: Baseline,
    pub recorded_at: DateTime<Utc>,
}

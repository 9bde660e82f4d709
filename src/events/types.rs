use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::EpochKey;

/// Payload sent to subscribers whenever the corrected count changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StepUpdateEvent {
    pub steps: u64,
    pub timestamp: DateTime<Utc>,
    pub epoch: EpochKey,
}

/// Out-of-band conditions subscribers may want to surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Diagnostic {
    CapabilityUnavailable { reason: String },
    ReadingDropped { reason: String },
    PersistenceFailed { epoch: EpochKey, attempts: u32, error: String },
    EpochRolled { from: EpochKey, to: EpochKey },
}

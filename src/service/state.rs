use serde::{Deserialize, Serialize};

use crate::{
    models::{Baseline, EpochKey},
    sensor::SubscriptionId,
    settings::TrackerSettings,
    tracker::StepTracker,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ServiceState {
    Stopped,
    Starting,
    Tracking,
    Faulted,
}

impl Default for ServiceState {
    fn default() -> Self {
        ServiceState::Stopped
    }
}

/// How the publisher disposed of one reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingAck {
    /// The service was not tracking; nothing happened.
    Ignored,
    Calibrated,
    Rebased,
    Published(u64),
    /// Same count as last time; no event, no notification churn.
    Unchanged(u64),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSnapshot {
    pub state: ServiceState,
    pub steps: u64,
    pub epoch: EpochKey,
    pub baseline: Option<Baseline>,
    pub daily_goal: u64,
}

/// Everything the publisher mutates, guarded by one lock.
pub(crate) struct PublisherState {
    pub status: ServiceState,
    pub tracker: StepTracker,
    pub epoch: EpochKey,
    /// Last count handed to subscribers (or shown after a re-anchor).
    pub last_published: u64,
    pub subscription: Option<SubscriptionId>,
    pub notification_shown: bool,
    pub settings: TrackerSettings,
}

impl PublisherState {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            status: ServiceState::Stopped,
            tracker: StepTracker::new(),
            epoch: EpochKey::now(settings.day_boundary),
            last_published: 0,
            subscription: None,
            notification_shown: false,
            settings,
        }
    }

    pub fn snapshot(&self) -> ServiceSnapshot {
        ServiceSnapshot {
            state: self.status,
            steps: self.tracker.corrected_count(),
            epoch: self.epoch.clone(),
            baseline: self.tracker.baseline(),
            daily_goal: self.settings.daily_goal,
        }
    }
}

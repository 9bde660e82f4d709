use serde::{Deserialize, Serialize};

use crate::models::{Baseline, RawReading};

/// What a single reading did to the calibration state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum UpdateOutcome {
    /// First reading of an epoch became the baseline.
    Calibrated { baseline: Baseline },
    /// The counter went backwards (device reboot); the reading became the new baseline.
    Rebased { previous: Baseline, baseline: Baseline },
    Counted { steps: u64 },
}

impl UpdateOutcome {
    pub fn steps(&self) -> u64 {
        match self {
            UpdateOutcome::Calibrated { .. } | UpdateOutcome::Rebased { .. } => 0,
            UpdateOutcome::Counted { steps } => *steps,
        }
    }

    /// Baseline the caller has to persist, if this reading created one.
    pub fn new_baseline(&self) -> Option<Baseline> {
        match self {
            UpdateOutcome::Calibrated { baseline } | UpdateOutcome::Rebased { baseline, .. } => {
                Some(*baseline)
            }
            UpdateOutcome::Counted { .. } => None,
        }
    }
}

/// Converts raw cumulative counter values into steps for the current epoch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTracker {
    baseline: Option<Baseline>,
    corrected: u64,
}

impl StepTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(&mut self, persisted: Option<Baseline>) {
        self.baseline = persisted;
        self.corrected = 0;
    }

    pub fn update(&mut self, reading: &RawReading) -> UpdateOutcome {
        let current = Baseline::new(reading.cumulative_count);

        let Some(previous) = self.baseline else {
            self.baseline = Some(current);
            self.corrected = 0;
            return UpdateOutcome::Calibrated { baseline: current };
        };

        match reading.cumulative_count.checked_sub(previous.value) {
            Some(steps) => {
                self.corrected = steps;
                UpdateOutcome::Counted { steps }
            }
            None => {
                self.baseline = Some(current);
                self.corrected = 0;
                UpdateOutcome::Rebased {
                    previous,
                    baseline: current,
                }
            }
        }
    }

    /// Drops the baseline; the next reading calibrates again.
    pub fn reset(&mut self) {
        self.baseline = None;
        self.corrected = 0;
    }

    pub fn is_calibrated(&self) -> bool {
        self.baseline.is_some()
    }

    pub fn baseline(&self) -> Option<Baseline> {
        self.baseline
    }

    pub fn corrected_count(&self) -> u64 {
        self.corrected
    }
}

use std::future::Future;

use anyhow::Result;

use crate::models::{Baseline, EpochKey};

/// Durable key-value storage for calibration baselines, keyed by epoch.
pub trait BaselineStore: Send + Sync + 'static {
    fn get_baseline(&self, epoch: &EpochKey)
        -> impl Future<Output = Result<Option<Baseline>>> + Send;

    fn put_baseline(
        &self,
        epoch: &EpochKey,
        baseline: Baseline,
    ) -> impl Future<Output = Result<()>> + Send;

    fn clear_baseline(&self, epoch: &EpochKey) -> impl Future<Output = Result<()>> + Send;
}

use std::sync::Arc;

use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    events::{Diagnostic, StepUpdateEvent, SubscriberSet},
    models::{Baseline, EpochKey, RawReading, ReadingFault},
    notification::{NotificationContent, NotificationSink},
    sensor::SensorProvider,
    settings::TrackerSettings,
    tracker::UpdateOutcome,
};

use super::{
    error::{ServiceError, ServiceResult},
    loop_worker::reading_loop,
    state::{PublisherState, ReadingAck, ServiceSnapshot, ServiceState},
    store::BaselineStore,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

struct Collaborators<S> {
    store: S,
    sensor: Arc<dyn SensorProvider>,
    notifier: Arc<dyn NotificationSink>,
    subscribers: SubscriberSet,
}

struct Worker {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// Drives the step service: lifecycle, baseline persistence, the foreground
/// notification and step-update fan-out.
///
/// All state sits behind one async mutex. Reading processing holds it for
/// the whole update (tracker, persistence, notification, emission), and
/// `stop` flips the state under the same lock, so nothing is published once
/// `stop` has returned.
pub struct StepPublisher<S: BaselineStore> {
    state: Arc<Mutex<PublisherState>>,
    collaborators: Arc<Collaborators<S>>,
    worker: Arc<Mutex<Option<Worker>>>,
}

impl<S: BaselineStore> Clone for StepPublisher<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            collaborators: self.collaborators.clone(),
            worker: self.worker.clone(),
        }
    }
}

impl<S: BaselineStore> StepPublisher<S> {
    pub fn new(
        store: S,
        sensor: Arc<dyn SensorProvider>,
        notifier: Arc<dyn NotificationSink>,
        subscribers: SubscriberSet,
        settings: TrackerSettings,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(PublisherState::new(settings))),
            collaborators: Arc::new(Collaborators {
                store,
                sensor,
                notifier,
                subscribers,
            }),
            worker: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn state(&self) -> ServiceState {
        self.state.lock().await.status
    }

    pub async fn snapshot(&self) -> ServiceSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn current_steps(&self) -> u64 {
        self.state.lock().await.tracker.corrected_count()
    }

    pub async fn start(&self) -> ServiceResult<ServiceSnapshot> {
        let mut state = self.state.lock().await;
        if matches!(state.status, ServiceState::Starting | ServiceState::Tracking) {
            return Err(ServiceError::AlreadyRunning);
        }

        state.status = ServiceState::Starting;
        log_info!("Starting step service");

        let (reading_tx, reading_rx) = mpsc::unbounded_channel();
        let subscription = match self.collaborators.sensor.subscribe(reading_tx) {
            Ok(id) => id,
            Err(err) => {
                let reason = err.to_string();
                state.status = ServiceState::Faulted;
                log_error!("Step service faulted: {reason}");
                self.collaborators
                    .subscribers
                    .diagnostic(&Diagnostic::CapabilityUnavailable {
                        reason: reason.clone(),
                    });
                return Err(ServiceError::CapabilityUnavailable { reason });
            }
        };

        let epoch = EpochKey::now(state.settings.day_boundary);
        let restored = match self.collaborators.store.get_baseline(&epoch).await {
            Ok(baseline) => baseline,
            Err(err) => {
                log_warn!("Could not restore baseline for {epoch}, recalibrating: {err:#}");
                None
            }
        };
        match restored {
            Some(baseline) => log_info!("Restored baseline {} for {epoch}", baseline.value),
            None => log_info!("No baseline for {epoch}; next reading calibrates"),
        }

        state.tracker.initialize(restored);
        state.epoch = epoch;
        state.last_published = 0;
        state.subscription = Some(subscription);

        let content = render(&state, 0);
        match self.collaborators.notifier.show(&content) {
            Ok(()) => state.notification_shown = true,
            Err(err) => log_warn!("Failed to show step notification: {err:#}"),
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(reading_loop(
            self.clone(),
            reading_rx,
            cancel_token.clone(),
        ));
        if let Some(stale) = self.worker.lock().await.replace(Worker {
            handle,
            cancel_token,
        }) {
            stale.cancel_token.cancel();
            stale.handle.abort();
        }

        state.status = ServiceState::Tracking;
        log_info!("Step service tracking (subscription {subscription})");
        Ok(state.snapshot())
    }

    pub async fn stop(&self) -> ServiceResult<()> {
        let worker = {
            let mut state = self.state.lock().await;
            match state.status {
                ServiceState::Stopped => return Ok(()),
                ServiceState::Faulted => {
                    state.status = ServiceState::Stopped;
                    log_info!("Step service cleared from faulted state");
                    return Ok(());
                }
                ServiceState::Starting | ServiceState::Tracking => {}
            }

            state.status = ServiceState::Stopped;

            self.release_capability(&mut state);

            self.worker.lock().await.take()
        };

        // The loop may be waiting on the state lock; join only after releasing it.
        if let Some(worker) = worker {
            worker.cancel_token.cancel();
            if let Err(err) = worker.handle.await {
                log_error!("Reading loop ended abnormally: {err}");
            }
        }

        log_info!("Step service stopped");
        Ok(())
    }

    /// Drops the persisted baseline for the active day; the next reading
    /// calibrates from scratch.
    pub async fn reset_epoch(&self) -> ServiceResult<()> {
        let mut state = self.state.lock().await;

        let today = EpochKey::now(state.settings.day_boundary);
        let mut stale = vec![state.epoch.clone()];
        if today > state.epoch {
            stale.push(today.clone());
            state.epoch = today;
        }

        let mut failure = None;
        for epoch in &stale {
            if let Err(err) = self.clear_baseline(epoch).await {
                failure = Some(err);
            }
        }

        // In-memory state resets even when the stored row survives.
        state.tracker.reset();
        self.zero_display(&mut state);
        log_info!("Epoch reset; awaiting calibration for {}", state.epoch);

        match failure {
            Some(source) => Err(ServiceError::Persistence {
                operation: "clear",
                source,
            }),
            None => Ok(()),
        }
    }

    pub async fn update_settings(&self, settings: TrackerSettings) {
        let mut state = self.state.lock().await;
        state.settings = settings;
        if state.status == ServiceState::Tracking {
            let steps = state.last_published;
            self.refresh_notification(&state, steps);
        }
    }

    pub async fn on_reading(&self, reading: RawReading) -> ReadingAck {
        let mut state = self.state.lock().await;
        if state.status != ServiceState::Tracking {
            return ReadingAck::Ignored;
        }

        let reading_epoch = EpochKey::for_timestamp(reading.timestamp, state.settings.day_boundary);
        if reading_epoch > state.epoch {
            self.roll_epoch(&mut state, reading_epoch).await;
        }

        let outcome = state.tracker.update(&reading);
        log_debug!(
            "raw={} outcome={:?} epoch={}",
            reading.cumulative_count,
            outcome,
            state.epoch
        );

        match outcome {
            UpdateOutcome::Calibrated { baseline } => {
                let epoch = state.epoch.clone();
                self.persist_baseline(&epoch, baseline, state.settings.persist_attempts)
                    .await;
                self.zero_display(&mut state);
                ReadingAck::Calibrated
            }
            UpdateOutcome::Rebased { previous, baseline } => {
                log_warn!(
                    "Step counter went backwards ({} -> {}); rebasing",
                    previous.value,
                    baseline.value
                );
                let epoch = state.epoch.clone();
                self.persist_baseline(&epoch, baseline, state.settings.persist_attempts)
                    .await;
                self.zero_display(&mut state);
                ReadingAck::Rebased
            }
            UpdateOutcome::Counted { steps } if steps == state.last_published => {
                ReadingAck::Unchanged(steps)
            }
            UpdateOutcome::Counted { steps } => {
                state.last_published = steps;
                self.refresh_notification(&state, steps);
                self.collaborators
                    .subscribers
                    .step_update(&StepUpdateEvent {
                        steps,
                        timestamp: reading.timestamp,
                        epoch: state.epoch.clone(),
                    });
                ReadingAck::Published(steps)
            }
        }
    }

    /// Logs and reports a sensor event that could not be read. Calibration is
    /// left untouched.
    pub async fn on_reading_fault(&self, fault: ReadingFault) {
        let state = self.state.lock().await;
        if state.status != ServiceState::Tracking {
            return;
        }
        log_warn!("Dropping sensor event: {fault}");
        self.collaborators
            .subscribers
            .diagnostic(&Diagnostic::ReadingDropped {
                reason: fault.to_string(),
            });
    }

    /// The sensor stream ended while tracking. Tears down like `stop` but
    /// lands in `Faulted`, so a later `start` can recover.
    pub(crate) async fn on_capability_lost(&self, reason: &str) {
        let mut state = self.state.lock().await;
        if state.status != ServiceState::Tracking {
            return;
        }

        state.status = ServiceState::Faulted;
        log_error!("Step sensor lost while tracking: {reason}");
        self.release_capability(&mut state);
        self.collaborators
            .subscribers
            .diagnostic(&Diagnostic::CapabilityUnavailable {
                reason: reason.to_string(),
            });
    }

    fn release_capability(&self, state: &mut PublisherState) {
        if let Some(id) = state.subscription.take() {
            self.collaborators.sensor.unsubscribe(id);
        }
        if state.notification_shown {
            if let Err(err) = self.collaborators.notifier.cancel() {
                log_warn!("Failed to cancel step notification: {err:#}");
            }
            state.notification_shown = false;
        }
    }

    async fn roll_epoch(&self, state: &mut PublisherState, next: EpochKey) {
        let previous = std::mem::replace(&mut state.epoch, next.clone());
        log_info!("Day rolled over {previous} -> {next}");

        // Failure is already reported as a diagnostic; stale days are pruned at startup.
        let _ = self.clear_baseline(&previous).await;
        state.tracker.reset();
        self.zero_display(state);

        self.collaborators
            .subscribers
            .diagnostic(&Diagnostic::EpochRolled {
                from: previous,
                to: next,
            });
    }

    /// Writes the baseline before the reading is acknowledged. Failure after
    /// every attempt keeps the in-memory baseline and raises a diagnostic.
    async fn persist_baseline(&self, epoch: &EpochKey, baseline: Baseline, attempts: u32) {
        let attempts = attempts.max(2);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.collaborators.store.put_baseline(epoch, baseline).await {
                Ok(()) => {
                    if attempt > 1 {
                        log_info!("Baseline for {epoch} persisted on attempt {attempt}");
                    }
                    return;
                }
                Err(err) => {
                    log_warn!("Baseline write for {epoch} failed (attempt {attempt}/{attempts}): {err:#}");
                    last_error = Some(err);
                }
            }
        }

        let error = last_error
            .map(|err| format!("{err:#}"))
            .unwrap_or_default();
        log_error!(
            "Baseline {} for {epoch} not persisted; a restart will recalibrate: {error}",
            baseline.value
        );
        self.collaborators
            .subscribers
            .diagnostic(&Diagnostic::PersistenceFailed {
                epoch: epoch.clone(),
                attempts,
                error,
            });
    }

    async fn clear_baseline(&self, epoch: &EpochKey) -> anyhow::Result<()> {
        const ATTEMPTS: u32 = 2;
        let mut attempt = 1;
        loop {
            match self.collaborators.store.clear_baseline(epoch).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < ATTEMPTS => {
                    log_warn!("Clearing baseline for {epoch} failed, retrying: {err:#}");
                    attempt += 1;
                }
                Err(err) => {
                    log_error!("Could not clear baseline for {epoch}: {err:#}");
                    self.collaborators
                        .subscribers
                        .diagnostic(&Diagnostic::PersistenceFailed {
                            epoch: epoch.clone(),
                            attempts: ATTEMPTS,
                            error: format!("{err:#}"),
                        });
                    return Err(err);
                }
            }
        }
    }

    /// After a re-anchor the visible count is zero again.
    fn zero_display(&self, state: &mut PublisherState) {
        if state.last_published == 0 {
            return;
        }
        state.last_published = 0;
        if state.status == ServiceState::Tracking {
            self.refresh_notification(state, 0);
        }
    }

    fn refresh_notification(&self, state: &PublisherState, steps: u64) {
        if !state.notification_shown {
            return;
        }
        let content = render(state, steps);
        if let Err(err) = self.collaborators.notifier.update(&content) {
            log_warn!("Failed to update step notification: {err:#}");
        }
    }
}

fn render(state: &PublisherState, steps: u64) -> NotificationContent {
    NotificationContent::render(
        steps,
        state.settings.daily_goal,
        &state.settings.notification,
    )
}

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};

use super::*;
use crate::{
    events::{Diagnostic, StepSubscriber, StepUpdateEvent, SubscriberSet},
    models::{Baseline, DayBoundary, EpochKey, RawReading, ReadingFault},
    notification::{NotificationContent, NotificationSink},
    sensor::{ChannelSensor, ReadingSender, SensorError, SensorProvider, SubscriptionId},
    settings::TrackerSettings,
};

const BOUNDARY: DayBoundary = DayBoundary::Fixed(0);

#[derive(Default)]
struct MemoryInner {
    baselines: HashMap<EpochKey, Baseline>,
    failing_puts: u32,
    always_fail: bool,
    failing_clears: bool,
    put_calls: u32,
}

#[derive(Clone, Default)]
struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap()
    }

    fn baseline(&self, epoch: &EpochKey) -> Option<Baseline> {
        self.lock().baselines.get(epoch).copied()
    }

    fn fail_next_puts(&self, count: u32) {
        self.lock().failing_puts = count;
    }

    fn fail_forever(&self) {
        self.lock().always_fail = true;
    }

    fn fail_clears(&self) {
        self.lock().failing_clears = true;
    }

    fn put_calls(&self) -> u32 {
        self.lock().put_calls
    }
}

impl BaselineStore for MemoryStore {
    async fn get_baseline(&self, epoch: &EpochKey) -> Result<Option<Baseline>> {
        Ok(self.baseline(epoch))
    }

    async fn put_baseline(&self, epoch: &EpochKey, baseline: Baseline) -> Result<()> {
        let mut inner = self.lock();
        inner.put_calls += 1;
        if inner.always_fail {
            return Err(anyhow!("disk full"));
        }
        if inner.failing_puts > 0 {
            inner.failing_puts -= 1;
            return Err(anyhow!("database is locked"));
        }
        inner.baselines.insert(epoch.clone(), baseline);
        Ok(())
    }

    async fn clear_baseline(&self, epoch: &EpochKey) -> Result<()> {
        let mut inner = self.lock();
        if inner.failing_clears {
            return Err(anyhow!("database is locked"));
        }
        inner.baselines.remove(epoch);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    calls: Mutex<Vec<String>>,
    last: Mutex<Option<NotificationContent>>,
}

impl RecordingSink {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, kind: &str) -> usize {
        self.calls().iter().filter(|call| call.starts_with(kind)).count()
    }

    fn last_steps(&self) -> Option<u64> {
        self.last.lock().unwrap().as_ref().map(|content| content.steps)
    }
}

impl NotificationSink for RecordingSink {
    fn show(&self, content: &NotificationContent) -> Result<()> {
        self.calls.lock().unwrap().push(format!("show:{}", content.steps));
        *self.last.lock().unwrap() = Some(content.clone());
        Ok(())
    }

    fn update(&self, content: &NotificationContent) -> Result<()> {
        self.calls.lock().unwrap().push(format!("update:{}", content.steps));
        *self.last.lock().unwrap() = Some(content.clone());
        Ok(())
    }

    fn cancel(&self) -> Result<()> {
        self.calls.lock().unwrap().push("cancel".into());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSubscriber {
    updates: Mutex<Vec<StepUpdateEvent>>,
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl RecordingSubscriber {
    fn steps(&self) -> Vec<u64> {
        self.updates.lock().unwrap().iter().map(|e| e.steps).collect()
    }

    fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().unwrap().clone()
    }
}

impl StepSubscriber for RecordingSubscriber {
    fn on_step_update(&self, event: &StepUpdateEvent) {
        self.updates.lock().unwrap().push(event.clone());
    }

    fn on_diagnostic(&self, diagnostic: &Diagnostic) {
        self.diagnostics.lock().unwrap().push(diagnostic.clone());
    }
}

struct Harness {
    publisher: StepPublisher<MemoryStore>,
    store: MemoryStore,
    sensor: Arc<ChannelSensor>,
    sink: Arc<RecordingSink>,
    recorder: Arc<RecordingSubscriber>,
}

/// Accepts the subscription and hangs up straight away, like a driver that dies.
struct HangUpSensor;

impl SensorProvider for HangUpSensor {
    fn subscribe(&self, sink: ReadingSender) -> Result<SubscriptionId, SensorError> {
        drop(sink);
        Ok(SubscriptionId::new())
    }

    fn unsubscribe(&self, _id: SubscriptionId) {}
}

fn build(
    store: MemoryStore,
    sensor: Arc<dyn SensorProvider>,
) -> (
    StepPublisher<MemoryStore>,
    Arc<RecordingSink>,
    Arc<RecordingSubscriber>,
) {
    let sink = Arc::new(RecordingSink::default());
    let recorder = Arc::new(RecordingSubscriber::default());
    let subscribers = SubscriberSet::new();
    subscribers.add(recorder.clone());

    let settings = TrackerSettings {
        day_boundary: BOUNDARY,
        ..TrackerSettings::default()
    };
    let publisher = StepPublisher::new(store, sensor, sink.clone(), subscribers, settings);
    (publisher, sink, recorder)
}

fn harness_with(store: MemoryStore, sensor: ChannelSensor) -> Harness {
    let sensor = Arc::new(sensor);
    let (publisher, sink, recorder) = build(store.clone(), sensor.clone());

    Harness {
        publisher,
        store,
        sensor,
        sink,
        recorder,
    }
}

fn harness() -> Harness {
    harness_with(MemoryStore::default(), ChannelSensor::new())
}

/// A day already in the past, so readings never roll the epoch on their own;
/// the active epoch is whatever `start` computed.
fn sample_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 9, 30, 0).unwrap()
}

fn reading(count: u64) -> RawReading {
    RawReading::new(count, sample_time())
}

async fn active_epoch(publisher: &StepPublisher<MemoryStore>) -> EpochKey {
    publisher.snapshot().await.epoch
}

async fn wait_for_state(publisher: &StepPublisher<MemoryStore>, expected: ServiceState) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while publisher.state().await != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("state not reached in time");
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn calibrates_then_publishes_deltas() {
    let h = harness();
    h.publisher.start().await.unwrap();

    let acks = vec![
        h.publisher.on_reading(reading(1000)).await,
        h.publisher.on_reading(reading(1005)).await,
        h.publisher.on_reading(reading(1012)).await,
    ];

    assert_eq!(
        acks,
        vec![
            ReadingAck::Calibrated,
            ReadingAck::Published(5),
            ReadingAck::Published(12)
        ]
    );
    assert_eq!(h.recorder.steps(), vec![5, 12]);
    assert_eq!(h.publisher.current_steps().await, 12);
    let epoch = active_epoch(&h.publisher).await;
    assert_eq!(h.store.baseline(&epoch), Some(Baseline::new(1000)));
    assert_eq!(h.sink.calls(), vec!["show:0", "update:5", "update:12"]);
}

#[tokio::test]
async fn reboot_regression_rebases_to_zero() {
    let h = harness();
    h.publisher.start().await.unwrap();

    assert_eq!(h.publisher.on_reading(reading(1000)).await, ReadingAck::Calibrated);
    assert_eq!(h.publisher.on_reading(reading(1040)).await, ReadingAck::Published(40));
    assert_eq!(h.publisher.on_reading(reading(200)).await, ReadingAck::Rebased);

    assert_eq!(h.publisher.current_steps().await, 0);
    let epoch = active_epoch(&h.publisher).await;
    assert_eq!(h.store.baseline(&epoch), Some(Baseline::new(200)));
    assert_eq!(h.recorder.steps(), vec![40]);
    assert_eq!(h.sink.last_steps(), Some(0));

    assert_eq!(h.publisher.on_reading(reading(203)).await, ReadingAck::Published(3));
}

#[tokio::test]
async fn identical_readings_do_not_repeat_events() {
    let h = harness();
    h.publisher.start().await.unwrap();

    h.publisher.on_reading(reading(1000)).await;
    assert_eq!(h.publisher.on_reading(reading(1000)).await, ReadingAck::Unchanged(0));
    h.publisher.on_reading(reading(1005)).await;
    assert_eq!(h.publisher.on_reading(reading(1005)).await, ReadingAck::Unchanged(5));

    assert_eq!(h.recorder.steps(), vec![5]);
    assert_eq!(h.sink.count("update"), 1);
}

#[tokio::test]
async fn stop_is_idempotent() {
    let h = harness();
    h.publisher.start().await.unwrap();
    assert!(h.sensor.is_subscribed());

    h.publisher.stop().await.unwrap();
    h.publisher.stop().await.unwrap();

    assert_eq!(h.publisher.state().await, ServiceState::Stopped);
    assert_eq!(h.sink.count("cancel"), 1);
    assert!(!h.sensor.is_subscribed());
    assert!(h.recorder.diagnostics().is_empty());
}

#[tokio::test]
async fn stop_before_start_is_a_no_op() {
    let h = harness();
    h.publisher.stop().await.unwrap();

    assert_eq!(h.publisher.state().await, ServiceState::Stopped);
    assert!(h.sink.calls().is_empty());
}

#[tokio::test]
async fn readings_after_stop_have_no_side_effects() {
    let h = harness();
    h.publisher.start().await.unwrap();
    h.publisher.on_reading(reading(10)).await;
    h.publisher.stop().await.unwrap();
    let calls_before = h.sink.calls();

    assert_eq!(h.publisher.on_reading(reading(50)).await, ReadingAck::Ignored);
    assert!(!h.sensor.push_value(60.0, sample_time()));

    assert!(h.recorder.steps().is_empty());
    assert_eq!(h.sink.calls(), calls_before);
}

#[tokio::test]
async fn missing_sensor_faults_once_without_retry() {
    let h = harness_with(MemoryStore::default(), ChannelSensor::unavailable());

    let err = h.publisher.start().await.unwrap_err();

    assert!(matches!(err, ServiceError::CapabilityUnavailable { .. }));
    assert!(err.is_terminal());
    assert_eq!(h.publisher.state().await, ServiceState::Faulted);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.recorder.diagnostics().len(), 1);
    assert!(matches!(
        h.recorder.diagnostics()[0],
        Diagnostic::CapabilityUnavailable { .. }
    ));
    assert!(h.sink.calls().is_empty());

    h.publisher.stop().await.unwrap();
    assert_eq!(h.publisher.state().await, ServiceState::Stopped);
    assert!(h.sink.calls().is_empty());
}

#[tokio::test]
async fn fresh_start_recovers_after_capability_returns() {
    let h = harness_with(MemoryStore::default(), ChannelSensor::unavailable());
    assert!(h.publisher.start().await.is_err());

    h.sensor.set_available(true);
    let snapshot = h.publisher.start().await.unwrap();

    assert_eq!(snapshot.state, ServiceState::Tracking);
}

#[tokio::test]
async fn closed_sensor_stream_faults_the_service() {
    let (publisher, sink, recorder) = build(MemoryStore::default(), Arc::new(HangUpSensor));

    publisher.start().await.unwrap();
    wait_for_state(&publisher, ServiceState::Faulted).await;

    assert!(matches!(
        recorder.diagnostics().as_slice(),
        [Diagnostic::CapabilityUnavailable { .. }]
    ));
    assert_eq!(sink.calls(), vec!["show:0", "cancel"]);
    assert_eq!(publisher.on_reading(reading(10)).await, ReadingAck::Ignored);

    publisher.stop().await.unwrap();
    assert_eq!(publisher.state().await, ServiceState::Stopped);
    assert_eq!(sink.count("cancel"), 1);
    assert_eq!(recorder.diagnostics().len(), 1);
}

#[tokio::test]
async fn start_recovers_after_stream_loss() {
    let (publisher, _sink, _recorder) = build(MemoryStore::default(), Arc::new(HangUpSensor));
    publisher.start().await.unwrap();
    wait_for_state(&publisher, ServiceState::Faulted).await;

    let snapshot = publisher.start().await.unwrap();

    assert_eq!(snapshot.state, ServiceState::Tracking);
}

#[tokio::test]
async fn failed_notification_is_not_cancelled_on_stop() {
    struct RefusingSink(Mutex<Vec<&'static str>>);

    impl NotificationSink for RefusingSink {
        fn show(&self, _content: &NotificationContent) -> Result<()> {
            self.0.lock().unwrap().push("show");
            Err(anyhow!("notification permission denied"))
        }

        fn update(&self, _content: &NotificationContent) -> Result<()> {
            self.0.lock().unwrap().push("update");
            Ok(())
        }

        fn cancel(&self) -> Result<()> {
            self.0.lock().unwrap().push("cancel");
            Ok(())
        }
    }

    let sink = Arc::new(RefusingSink(Mutex::new(Vec::new())));
    let publisher = StepPublisher::new(
        MemoryStore::default(),
        Arc::new(ChannelSensor::new()),
        sink.clone(),
        SubscriberSet::new(),
        TrackerSettings::default(),
    );

    publisher.start().await.unwrap();
    publisher.on_reading(reading(10)).await;
    assert_eq!(publisher.on_reading(reading(15)).await, ReadingAck::Published(5));
    publisher.stop().await.unwrap();

    assert_eq!(*sink.0.lock().unwrap(), vec!["show"]);
}

#[tokio::test]
async fn second_start_is_rejected() {
    let h = harness();
    h.publisher.start().await.unwrap();

    assert!(matches!(
        h.publisher.start().await,
        Err(ServiceError::AlreadyRunning)
    ));
    assert_eq!(h.sink.count("show"), 1);
}

#[tokio::test]
async fn baseline_survives_restart() {
    let store = MemoryStore::default();

    let first = harness_with(store.clone(), ChannelSensor::new());
    first.publisher.start().await.unwrap();
    first.publisher.on_reading(reading(500)).await;
    first.publisher.on_reading(reading(520)).await;
    first.publisher.on_reading(reading(100)).await;
    let epoch = active_epoch(&first.publisher).await;
    first.publisher.stop().await.unwrap();
    assert_eq!(store.baseline(&epoch), Some(Baseline::new(100)));

    let second = harness_with(store.clone(), ChannelSensor::new());
    let snapshot = second.publisher.start().await.unwrap();
    assert_eq!(snapshot.baseline, Some(Baseline::new(100)));

    assert_eq!(
        second.publisher.on_reading(reading(130)).await,
        ReadingAck::Published(30)
    );
    assert_eq!(second.recorder.steps(), vec![30]);
}

#[tokio::test]
async fn baseline_write_is_retried() {
    let h = harness();
    h.store.fail_next_puts(1);
    h.publisher.start().await.unwrap();

    assert_eq!(h.publisher.on_reading(reading(900)).await, ReadingAck::Calibrated);

    assert_eq!(h.store.put_calls(), 2);
    let epoch = active_epoch(&h.publisher).await;
    assert_eq!(h.store.baseline(&epoch), Some(Baseline::new(900)));
    assert!(h.recorder.diagnostics().is_empty());
}

#[tokio::test]
async fn persistence_failure_keeps_counting_in_memory() {
    let h = harness();
    h.store.fail_forever();
    h.publisher.start().await.unwrap();

    assert_eq!(h.publisher.on_reading(reading(900)).await, ReadingAck::Calibrated);
    assert_eq!(h.publisher.on_reading(reading(950)).await, ReadingAck::Published(50));

    assert_eq!(h.store.put_calls(), 2);
    assert!(h.store.lock().baselines.is_empty());
    let diagnostics = h.recorder.diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert!(matches!(
        &diagnostics[0],
        Diagnostic::PersistenceFailed { attempts: 2, .. }
    ));
}

#[tokio::test]
async fn reset_epoch_forces_recalibration() {
    let h = harness();
    h.publisher.start().await.unwrap();
    h.publisher.on_reading(reading(300)).await;
    h.publisher.on_reading(reading(340)).await;

    h.publisher.reset_epoch().await.unwrap();

    assert!(h.store.lock().baselines.is_empty());
    assert_eq!(h.publisher.current_steps().await, 0);
    assert_eq!(h.sink.last_steps(), Some(0));
    assert_eq!(h.publisher.on_reading(reading(345)).await, ReadingAck::Calibrated);
    assert_eq!(h.publisher.on_reading(reading(350)).await, ReadingAck::Published(5));
    assert_eq!(h.recorder.steps(), vec![40, 5]);
}

#[tokio::test]
async fn reset_epoch_while_stopped_clears_store() {
    let h = harness();
    let epoch = active_epoch(&h.publisher).await;
    h.store.lock().baselines.insert(epoch.clone(), Baseline::new(4000));

    h.publisher.reset_epoch().await.unwrap();

    assert_eq!(h.store.baseline(&epoch), None);
    assert!(h.sink.calls().is_empty());
}

#[tokio::test]
async fn reset_epoch_reports_clear_failure_but_still_recalibrates() {
    let h = harness();
    h.publisher.start().await.unwrap();
    h.publisher.on_reading(reading(300)).await;
    h.publisher.on_reading(reading(320)).await;
    h.store.fail_clears();

    let err = h.publisher.reset_epoch().await.unwrap_err();

    assert!(matches!(err, ServiceError::Persistence { operation: "clear", .. }));
    assert!(matches!(
        h.recorder.diagnostics().as_slice(),
        [Diagnostic::PersistenceFailed { attempts: 2, .. }]
    ));
    assert_eq!(h.publisher.current_steps().await, 0);
    assert_eq!(h.publisher.on_reading(reading(330)).await, ReadingAck::Calibrated);
}

#[tokio::test]
async fn new_day_rolls_the_epoch() {
    let h = harness();
    h.publisher.start().await.unwrap();
    h.publisher.on_reading(reading(100)).await;
    h.publisher.on_reading(reading(180)).await;
    let previous = active_epoch(&h.publisher).await;

    let later = Utc.with_ymd_and_hms(2100, 1, 1, 0, 10, 0).unwrap();
    let ack = h.publisher.on_reading(RawReading::new(190, later)).await;

    assert_eq!(ack, ReadingAck::Calibrated);
    let next = EpochKey::for_timestamp(later, BOUNDARY);
    assert_eq!(next.as_str(), "2100-01-01");
    assert_eq!(active_epoch(&h.publisher).await, next);
    assert_eq!(h.store.baseline(&previous), None);
    assert_eq!(h.store.baseline(&next), Some(Baseline::new(190)));
    assert!(h
        .recorder
        .diagnostics()
        .iter()
        .any(|d| matches!(d, Diagnostic::EpochRolled { .. })));
}

#[tokio::test]
async fn sensor_channel_drives_updates_in_order() {
    let h = harness();
    h.publisher.start().await.unwrap();

    for value in [1000.0, 1005.0, f32::NAN, 1012.0] {
        assert!(h.sensor.push_value(value, sample_time()));
    }

    let recorder = h.recorder.clone();
    wait_until(move || recorder.steps().len() == 2).await;

    assert_eq!(h.recorder.steps(), vec![5, 12]);
    assert_eq!(
        h.recorder.diagnostics(),
        vec![Diagnostic::ReadingDropped {
            reason: ReadingFault::NotFinite.to_string()
        }]
    );
    let epoch = active_epoch(&h.publisher).await;
    assert_eq!(h.store.baseline(&epoch), Some(Baseline::new(1000)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_quiesces_in_flight_readings() {
    let h = harness();
    h.publisher.start().await.unwrap();

    h.sensor.push_value(0.0, sample_time());
    for value in 1..=500 {
        h.sensor.push_value(value as f32, sample_time());
    }

    h.publisher.stop().await.unwrap();
    let seen = h.recorder.steps();
    let calls = h.sink.calls();

    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.recorder.steps(), seen);
    assert_eq!(h.sink.calls(), calls);
    assert_eq!(calls.last().map(String::as_str), Some("cancel"));
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
}

use std::sync::{Arc, RwLock};

use log::{info, warn};
use tokio::sync::broadcast;

use super::types::{Diagnostic, StepUpdateEvent};
use crate::db::Database;

/// Receives step updates from the publisher, in order, on the processing task.
/// Implementations must return quickly; hand heavy work to another thread.
pub trait StepSubscriber: Send + Sync {
    fn on_step_update(&self, event: &StepUpdateEvent);

    fn on_diagnostic(&self, _diagnostic: &Diagnostic) {}
}

/// The publisher's fan-out list. Delivery order matches registration order.
#[derive(Clone, Default)]
pub struct SubscriberSet {
    subscribers: Arc<RwLock<Vec<Arc<dyn StepSubscriber>>>>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, subscriber: Arc<dyn StepSubscriber>) {
        self.subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(subscriber);
    }

    pub fn step_update(&self, event: &StepUpdateEvent) {
        for subscriber in self.snapshot() {
            subscriber.on_step_update(event);
        }
    }

    pub fn diagnostic(&self, diagnostic: &Diagnostic) {
        for subscriber in self.snapshot() {
            subscriber.on_diagnostic(diagnostic);
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn StepSubscriber>> {
        self.subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Message carried on the UI-facing broadcast channel.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServiceEvent {
    StepUpdate(StepUpdateEvent),
    Diagnostic(Diagnostic),
}

/// Bridges subscriber callbacks onto a tokio broadcast channel for UI
/// consumers. Each receiver sees events in publish order; a receiver that
/// falls more than `capacity` events behind gets `Lagged`.
pub struct BroadcastSubscriber {
    tx: broadcast::Sender<ServiceEvent>,
}

impl BroadcastSubscriber {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.tx.subscribe()
    }
}

impl StepSubscriber for BroadcastSubscriber {
    fn on_step_update(&self, event: &StepUpdateEvent) {
        // No receivers is fine; the UI may not be attached.
        let _ = self.tx.send(ServiceEvent::StepUpdate(event.clone()));
    }

    fn on_diagnostic(&self, diagnostic: &Diagnostic) {
        let _ = self.tx.send(ServiceEvent::Diagnostic(diagnostic.clone()));
    }
}

/// Telemetry sink that writes every event to the log.
pub struct LogSubscriber;

impl StepSubscriber for LogSubscriber {
    fn on_step_update(&self, event: &StepUpdateEvent) {
        info!(
            "step-update steps={} epoch={} at={}",
            event.steps,
            event.epoch,
            event.timestamp.to_rfc3339()
        );
    }

    fn on_diagnostic(&self, diagnostic: &Diagnostic) {
        match serde_json::to_string(diagnostic) {
            Ok(json) => warn!("diagnostic {json}"),
            Err(_) => warn!("diagnostic {diagnostic:?}"),
        }
    }
}

/// Records each day's running total into `daily_steps`.
pub struct HistoryRecorder {
    db: Database,
}

impl HistoryRecorder {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl StepSubscriber for HistoryRecorder {
    fn on_step_update(&self, event: &StepUpdateEvent) {
        if let Err(err) = self.db.queue_daily_steps(&event.epoch, event.steps) {
            warn!("Failed to queue daily total for {}: {err}", event.epoch);
        }
    }
}

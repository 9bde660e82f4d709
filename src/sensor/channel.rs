use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, MutexGuard,
};

use chrono::{DateTime, Utc};
use log::debug;

use super::{ReadingSender, SensorError, SensorMessage, SensorProvider, SubscriptionId};
use crate::models::{RawReading, ReadingFault};

/// In-process sensor fed by the host. Platform glue (or a replay host) calls
/// [`ChannelSensor::push_value`] from its driver callback.
pub struct ChannelSensor {
    available: AtomicBool,
    subscriber: Mutex<Option<(SubscriptionId, ReadingSender)>>,
}

impl ChannelSensor {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            subscriber: Mutex::new(None),
        }
    }

    /// A sensor that refuses every subscription.
    pub fn unavailable() -> Self {
        let sensor = Self::new();
        sensor.set_available(false);
        sensor
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_subscribed(&self) -> bool {
        self.slot().is_some()
    }

    /// Forwards a raw driver value. Returns false when nobody is listening.
    pub fn push_value(&self, value: f32, timestamp: DateTime<Utc>) -> bool {
        self.push(RawReading::from_sensor_value(value, timestamp))
    }

    pub fn push_reading(&self, reading: RawReading) -> bool {
        self.push(Ok(reading))
    }

    pub fn push_fault(&self, fault: ReadingFault) -> bool {
        self.push(Err(fault))
    }

    fn push(&self, message: SensorMessage) -> bool {
        match self.slot().as_ref() {
            Some((_, tx)) => tx.send(message).is_ok(),
            None => {
                debug!("Sensor event with no subscriber dropped");
                false
            }
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<(SubscriptionId, ReadingSender)>> {
        self.subscriber
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ChannelSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorProvider for ChannelSensor {
    fn subscribe(&self, sink: ReadingSender) -> Result<SubscriptionId, SensorError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(SensorError::Unavailable(
                "no step counter sensor on this device".into(),
            ));
        }

        let id = SubscriptionId::new();
        *self.slot() = Some((id, sink));
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut slot = self.slot();
        if matches!(slot.as_ref(), Some((current, _)) if *current == id) {
            *slot = None;
        }
    }
}

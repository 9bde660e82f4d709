//! Step counter capability.
//!
//! Providers push sensor events onto the publisher's single processing
//! channel. Each event is either a reading or a per-event fault; faults are
//! dropped by the publisher without disturbing calibration.

pub mod channel;

use std::fmt;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::{RawReading, ReadingFault};

pub use channel::ChannelSensor;

pub type SensorMessage = Result<RawReading, ReadingFault>;
pub type ReadingSender = mpsc::UnboundedSender<SensorMessage>;
pub type ReadingReceiver = mpsc::UnboundedReceiver<SensorMessage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorError {
    /// The device has no step counter, or access was not granted.
    Unavailable(String),
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::Unavailable(reason) => write!(f, "step sensor unavailable: {reason}"),
        }
    }
}

impl std::error::Error for SensorError {}

pub trait SensorProvider: Send + Sync {
    fn subscribe(&self, sink: ReadingSender) -> Result<SubscriptionId, SensorError>;

    /// Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

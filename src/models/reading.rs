use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One sample from the cumulative step counter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RawReading {
    pub cumulative_count: u64,
    pub timestamp: DateTime<Utc>,
}

impl RawReading {
    pub fn new(cumulative_count: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            cumulative_count,
            timestamp,
        }
    }

    /// Step counter drivers report the running total as a float.
    pub fn from_sensor_value(value: f32, timestamp: DateTime<Utc>) -> Result<Self, ReadingFault> {
        if !value.is_finite() {
            return Err(ReadingFault::NotFinite);
        }
        if value < 0.0 {
            return Err(ReadingFault::Negative(value));
        }
        Ok(Self::new(value as u64, timestamp))
    }
}

/// A single sensor event that could not be turned into a reading.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadingFault {
    NotFinite,
    Negative(f32),
    Driver(String),
}

impl fmt::Display for ReadingFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingFault::NotFinite => write!(f, "sensor value is not a finite number"),
            ReadingFault::Negative(value) => write!(f, "sensor value {value} is negative"),
            ReadingFault::Driver(message) => write!(f, "sensor driver error: {message}"),
        }
    }
}

impl std::error::Error for ReadingFault {}

/// Cumulative count treated as zero for the current epoch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Baseline {
    pub value: u64,
}

impl Baseline {
    pub fn new(value: u64) -> Self {
        Self { value }
    }
}

pub mod epoch;
pub mod reading;

pub use epoch::{DayBoundary, EpochKey};
pub use reading::{Baseline, RawReading, ReadingFault};

pub mod baseline;
pub mod daily_steps;

pub use baseline::BaselineRecord;
pub use daily_steps::DailySteps;

pub mod state;

pub use state::{StepTracker, UpdateOutcome};

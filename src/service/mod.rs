pub mod commands;
pub mod controller;
pub mod error;
pub mod loop_worker;
pub mod state;
pub mod store;

#[cfg(test)]
mod tests;

pub use controller::StepPublisher;
pub use error::{ServiceError, ServiceResult};
pub use state::{ReadingAck, ServiceSnapshot, ServiceState};
pub use store::BaselineStore;

pub mod subscriber;
pub mod types;

pub use subscriber::{
    BroadcastSubscriber, HistoryRecorder, LogSubscriber, ServiceEvent, StepSubscriber,
    SubscriberSet,
};
pub use types::{Diagnostic, StepUpdateEvent};

use tokio_util::sync::CancellationToken;

use crate::sensor::ReadingReceiver;

use super::{controller::StepPublisher, state::ReadingAck, store::BaselineStore};

// Per-reading traces are noisy; flip to false to silence this module.
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Single consumer of the sensor channel. Readings are handled strictly one
/// at a time, in arrival order.
pub async fn reading_loop<S: BaselineStore>(
    publisher: StepPublisher<S>,
    mut readings: ReadingReceiver,
    cancel_token: CancellationToken,
) {
    let mut processed: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("reading loop shutting down after {processed} readings");
                break;
            }
            message = readings.recv() => {
                match message {
                    Some(Ok(reading)) => {
                        processed = processed.wrapping_add(1);
                        match publisher.on_reading(reading).await {
                            ReadingAck::Ignored => {
                                log_debug!("reading {} ignored; service not tracking", reading.cumulative_count);
                            }
                            ack => log_debug!("reading {} -> {ack:?}", reading.cumulative_count),
                        }
                    }
                    Some(Err(fault)) => publisher.on_reading_fault(fault).await,
                    None => {
                        // `stop` hangs up the channel too; only an unexpected close is a fault.
                        if cancel_token.is_cancelled() {
                            log_info!("sensor channel closed during shutdown");
                        } else {
                            log_warn!("sensor channel closed while tracking");
                            publisher.on_capability_lost("sensor stream closed").await;
                        }
                        break;
                    }
                }
            }
        }
    }
}

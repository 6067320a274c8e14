use cambus_order::ExpirySweeper;
use cambus_shared::BookingEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub fn start_expiry_worker(
    sweeper: Arc<ExpirySweeper>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move { sweeper.run(interval, shutdown).await })
}

/// Log every booking event until shutdown. Resolves to the number of events logged.
pub fn start_event_logger(
    mut events: broadcast::Receiver<BookingEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        info!("Event logger started, listening to booking events...");
        let mut logged = 0;

        loop {
            tokio::select! {
                biased;

                received = events.recv() => match received {
                    Ok(event) => {
                        log_event(&event);
                        logged += 1;
                    }
                    Err(RecvError::Lagged(missed)) => warn!("Event logger lagging, {} events dropped", missed),
                    Err(RecvError::Closed) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Event logger stopped");
        logged
    })
}

fn log_event(event: &BookingEvent) {
    match serde_json::to_string(event) {
        Ok(payload) => info!("Booking event for {}: {}", event.reservation_id(), payload),
        Err(e) => error!("Failed to serialize event for {}: {}", event.reservation_id(), e),
    }
}

use crate::manager::{ExpiryOutcome, ReservationManager};
use cambus_core::BookingResult;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

pub const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: usize,
    /// Seats that were busy or failed to expire; picked up on the next pass.
    pub skipped: usize,
}

/// Background scan that expires PENDING reservations whose hold has lapsed.
pub struct ExpirySweeper {
    manager: Arc<ReservationManager>,
    batch_size: usize,
}

impl ExpirySweeper {
    pub fn new(manager: Arc<ReservationManager>) -> Self {
        Self {
            manager,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub async fn sweep_once(&self) -> BookingResult<SweepReport> {
        let ctx = self.manager.context();
        let due = ctx
            .reservations
            .find_expired(ctx.clock.now(), self.batch_size)
            .await?;

        let mut report = SweepReport::default();
        for reservation_id in due {
            report.examined += 1;
            match self.manager.expire_hold(reservation_id).await {
                Ok(ExpiryOutcome::Expired(_)) => report.expired += 1,
                Ok(ExpiryOutcome::Busy) => {
                    debug!("Seat of {} is busy, retrying next pass", reservation_id);
                    report.skipped += 1;
                }
                Ok(ExpiryOutcome::Unchanged(status)) => {
                    debug!("Reservation {} no longer due ({})", reservation_id, status);
                }
                Err(e) => {
                    error!("Failed to expire reservation {}: {}", reservation_id, e);
                    report.skipped += 1;
                }
            }
        }

        let pruned = ctx.locks.prune();
        if report.examined > 0 {
            info!(
                "Expiry sweep: {} examined, {} expired, {} skipped ({} idle locks pruned)",
                report.examined, report.expired, report.skipped, pruned
            );
        }
        Ok(report)
    }

    /// Sweep every `interval` until `shutdown` turns true or its sender is dropped.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Expiry sweeper started, every {:?}", interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!("Expiry sweep failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Expiry sweeper stopped");
    }
}

use crate::manager::ReservationManager;
use crate::orchestrator::PaymentOrchestrator;
use cambus_core::payment::ChargeRequest;
use cambus_core::{BookingError, BookingResult, CasOutcome};
use cambus_shared::{PaymentAttempt, PaymentMethod, Reservation, ReservationStatus};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct SettlementOutcome {
    pub reservation: Reservation,
    pub attempt: PaymentAttempt,
}

impl SettlementOutcome {
    pub fn is_confirmed(&self) -> bool {
        self.reservation.status == ReservationStatus::Confirmed
    }
}

/// Turns a payment outcome into a reservation transition.
pub struct PaymentSettlement {
    manager: Arc<ReservationManager>,
    orchestrator: Arc<PaymentOrchestrator>,
}

impl PaymentSettlement {
    pub fn new(manager: Arc<ReservationManager>, orchestrator: Arc<PaymentOrchestrator>) -> Self {
        Self { manager, orchestrator }
    }

    /// Charge a PENDING reservation. SUCCESS confirms it and keeps the seat,
    /// FAILED is terminal and frees the seat right away. A hold that has
    /// lapsed, before or during the charge, is expired here and reported as
    /// `Expired`; a late charge stays on the reservation as its payment record.
    pub async fn settle(&self, reservation_id: Uuid, method: PaymentMethod) -> BookingResult<SettlementOutcome> {
        let ctx = self.manager.context();
        let key = self.manager.get(reservation_id).await?.seat_key();

        // Held across the gateway call so the sweep leaves this seat alone
        let _guard = ctx.locks.lock(key).await;
        let current = self.manager.get(reservation_id).await?;

        match current.status {
            ReservationStatus::Pending => {}
            ReservationStatus::Expired => return Err(BookingError::Expired(reservation_id)),
            status => return Err(BookingError::AlreadySettled { id: reservation_id, status }),
        }

        if current.hold_lapsed(ctx.clock.now()) {
            info!("Hold on {} lapsed before payment, expiring", reservation_id);
            self.manager.expire_locked(&current).await?;
            return Err(BookingError::Expired(reservation_id));
        }

        let request = ChargeRequest {
            reservation_id,
            reference: current.booking_reference.clone(),
            amount: current.amount,
            currency: current.currency.clone(),
            method,
        };
        let receipt = self.orchestrator.charge(&request).await;

        let now = ctx.clock.now();
        let charged = receipt.is_success();
        let attempt = if charged {
            PaymentAttempt::succeeded(
                reservation_id,
                current.amount,
                method,
                receipt.reference,
                receipt.transaction_id,
                now,
            )
        } else {
            let reason = receipt
                .message
                .unwrap_or_else(|| "payment failed".to_string());
            PaymentAttempt::failed(reservation_id, current.amount, method, reason, now)
        };

        // The hold may have run out while the gateway was working
        if current.hold_lapsed(now) {
            if charged {
                warn!(
                    "Hold on {} lapsed during the charge, payment {:?} needs a refund",
                    reservation_id, attempt.transaction_id
                );
            } else {
                info!("Hold on {} lapsed during the charge, expiring", reservation_id);
            }
            self.manager
                .finish_locked(&current, ReservationStatus::Expired, Some(attempt))
                .await?;
            return Err(BookingError::Expired(reservation_id));
        }

        let next = if charged {
            ReservationStatus::Confirmed
        } else {
            ReservationStatus::Failed
        };

        match self.manager.finish_locked(&current, next, Some(attempt.clone())).await? {
            CasOutcome::Applied(reservation) => Ok(SettlementOutcome { reservation, attempt }),
            CasOutcome::Stale(ReservationStatus::Expired) => Err(BookingError::Expired(reservation_id)),
            CasOutcome::Stale(status) => Err(BookingError::AlreadySettled { id: reservation_id, status }),
        }
    }
}

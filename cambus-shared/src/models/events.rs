use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Published after every committed reservation transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingEvent {
    SeatHeld {
        reservation_id: Uuid,
        schedule_id: Uuid,
        seat_id: Uuid,
        hold_expiry: DateTime<Utc>,
    },
    BookingConfirmed {
        reservation_id: Uuid,
        schedule_id: Uuid,
        seat_id: Uuid,
        amount: i64,
        transaction_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    PaymentFailed {
        reservation_id: Uuid,
        schedule_id: Uuid,
        seat_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    HoldExpired {
        reservation_id: Uuid,
        schedule_id: Uuid,
        seat_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    BookingCancelled {
        reservation_id: Uuid,
        schedule_id: Uuid,
        seat_id: Uuid,
        /// Set when a paid booking was cancelled.
        refund_eligible: bool,
        timestamp: DateTime<Utc>,
    },
}

impl BookingEvent {
    pub fn reservation_id(&self) -> Uuid {
        match self {
            BookingEvent::SeatHeld { reservation_id, .. }
            | BookingEvent::BookingConfirmed { reservation_id, .. }
            | BookingEvent::PaymentFailed { reservation_id, .. }
            | BookingEvent::HoldExpired { reservation_id, .. }
            | BookingEvent::BookingCancelled { reservation_id, .. } => *reservation_id,
        }
    }

    pub fn schedule_id(&self) -> Uuid {
        match self {
            BookingEvent::SeatHeld { schedule_id, .. }
            | BookingEvent::BookingConfirmed { schedule_id, .. }
            | BookingEvent::PaymentFailed { schedule_id, .. }
            | BookingEvent::HoldExpired { schedule_id, .. }
            | BookingEvent::BookingCancelled { schedule_id, .. } => *schedule_id,
        }
    }

    /// Whether the event gives a seat back to the pool.
    pub fn frees_seat(&self) -> bool {
        matches!(
            self,
            BookingEvent::PaymentFailed { .. }
                | BookingEvent::HoldExpired { .. }
                | BookingEvent::BookingCancelled { .. }
        )
    }
}

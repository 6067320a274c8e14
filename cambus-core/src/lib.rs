pub mod clock;
pub mod payment;
pub mod repository;

use cambus_shared::ReservationStatus;
use uuid::Uuid;

pub use clock::{Clock, ManualClock, SystemClock};
pub use repository::{CasOutcome, ReservationStore, ScheduleStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Seat {seat_id} is not available on schedule {schedule_id}")]
    SeatUnavailable { schedule_id: Uuid, seat_id: Uuid },

    #[error("Schedule {schedule_id} is not bookable: {reason}")]
    ScheduleNotBookable { schedule_id: Uuid, reason: String },

    #[error("Schedule not found: {0}")]
    ScheduleNotFound(Uuid),

    #[error("Seat {seat_id} does not belong to schedule {schedule_id}")]
    UnknownSeat { schedule_id: Uuid, seat_id: Uuid },

    #[error("Reservation not found: {0}")]
    NotFound(Uuid),

    #[error("Reservation {id} already settled ({status})")]
    AlreadySettled { id: Uuid, status: ReservationStatus },

    #[error("Reservation hold expired: {0}")]
    Expired(Uuid),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl BookingError {
    /// Conflicts the caller caused (retry with a different seat or a new reservation),
    /// as opposed to infrastructure failures.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            BookingError::SeatUnavailable { .. }
                | BookingError::AlreadySettled { .. }
                | BookingError::Expired(_)
                | BookingError::InvalidTransition { .. }
        )
    }
}

pub type BookingResult<T> = Result<T, BookingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_classification() {
        let seat = BookingError::SeatUnavailable {
            schedule_id: Uuid::new_v4(),
            seat_id: Uuid::new_v4(),
        };
        assert!(seat.is_conflict());

        let settled = BookingError::AlreadySettled {
            id: Uuid::new_v4(),
            status: ReservationStatus::Confirmed,
        };
        assert!(settled.is_conflict());
        assert!(settled.to_string().contains("CONFIRMED"));

        let store = BookingError::from(StoreError::Corrupt("bad row".to_string()));
        assert!(!store.is_conflict());
    }
}

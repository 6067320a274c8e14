pub mod models;
pub mod pii;

pub use models::events::BookingEvent;
pub use models::reservation::{
    PassengerInfo, PaymentAttempt, PaymentMethod, PaymentOutcome, Reservation, ReservationStatus,
};
pub use models::schedule::{Schedule, ScheduleStatus, Seat, SeatClass, SeatKey};
pub use pii::Masked;

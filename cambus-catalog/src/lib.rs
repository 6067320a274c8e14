pub mod availability;
pub mod inventory;
pub mod schedule;

pub use availability::{load_seat_map, AvailabilityQuery, ScheduleAvailability, SeatAvailability};
pub use inventory::{HoldToken, LedgerError, SeatLedger, SeatState};
pub use schedule::InMemoryScheduleStore;

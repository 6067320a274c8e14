pub mod events;
pub mod reservation;
pub mod schedule;

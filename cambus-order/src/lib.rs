pub mod breaker;
pub mod context;
pub mod expiry;
pub mod locks;
pub mod manager;
pub mod orchestrator;
pub mod settlement;

pub use breaker::{CircuitBreaker, CircuitState, Permit};
pub use context::BookingContext;
pub use expiry::{ExpirySweeper, SweepReport};
pub use locks::SeatLocks;
pub use manager::{ExpiryOutcome, ReservationManager};
pub use orchestrator::{MockPaymentGateway, PaymentOrchestrator};
pub use settlement::{PaymentSettlement, SettlementOutcome};

use async_trait::async_trait;
use cambus_shared::{PaymentAttempt, Reservation, ReservationStatus, Schedule, Seat};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness rule was violated (e.g., a second active reservation for a seat).
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Record not found: {0}")]
    NotFound(Uuid),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(err))
    }
}

/// Result of a compare-and-set status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The record was in the expected status and now carries the new one.
    Applied(Reservation),
    /// The record had already moved on; nothing was written.
    Stale(ReservationStatus),
}

/// Read access to schedules and bus seat maps, owned by the operator side.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn get_schedule(&self, id: Uuid) -> Result<Option<Schedule>, StoreError>;

    async fn list_seats(&self, bus_id: Uuid) -> Result<Vec<Seat>, StoreError>;
}

/// Durable reservation records. Implementations must make `insert` and `transition`
/// atomic: a second active reservation for the same (schedule, seat) is a `Conflict`,
/// and a transition writes the status and the optional payment attempt together or
/// not at all.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn insert(&self, reservation: &Reservation) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Reservation>, StoreError>;

    async fn transition(
        &self,
        id: Uuid,
        expected: ReservationStatus,
        next: ReservationStatus,
        attempt: Option<&PaymentAttempt>,
        at: DateTime<Utc>,
    ) -> Result<CasOutcome, StoreError>;

    /// PENDING reservations whose hold ran out at `now`, oldest expiry first.
    async fn find_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>, StoreError>;

    /// All PENDING and CONFIRMED reservations.
    async fn list_active(&self) -> Result<Vec<Reservation>, StoreError>;

    /// Newest first.
    async fn list_for_passenger(&self, passenger_id: &str) -> Result<Vec<Reservation>, StoreError>;
}

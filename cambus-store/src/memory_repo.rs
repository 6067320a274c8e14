use async_trait::async_trait;
use cambus_core::{CasOutcome, ReservationStore, StoreError};
use cambus_shared::{PaymentAttempt, PaymentOutcome, Reservation, ReservationStatus, SeatKey};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    records: HashMap<Uuid, Reservation>,
    /// (schedule, seat) -> reservation currently PENDING or CONFIRMED
    active: HashMap<SeatKey, Uuid>,
}

/// Reservation arena indexed by id, with an active-seat index that plays the role
/// of the database's partial unique constraint.
#[derive(Default)]
pub struct InMemoryReservationStore {
    inner: RwLock<Inner>,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn insert(&self, reservation: &Reservation) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        if inner.records.contains_key(&reservation.id) {
            return Err(StoreError::Conflict(format!("reservation {} already exists", reservation.id)));
        }
        let key = reservation.seat_key();
        if reservation.status.is_active() {
            if let Some(holder) = inner.active.get(&key) {
                return Err(StoreError::Conflict(format!("seat {} already reserved by {}", key, holder)));
            }
            inner.active.insert(key, reservation.id);
        }
        inner.records.insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Reservation>, StoreError> {
        Ok(self.inner.read().await.records.get(&id).cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: ReservationStatus,
        next: ReservationStatus,
        attempt: Option<&PaymentAttempt>,
        at: DateTime<Utc>,
    ) -> Result<CasOutcome, StoreError> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let record = inner.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if record.status != expected {
            return Ok(CasOutcome::Stale(record.status));
        }
        if let Some(attempt) = attempt {
            if attempt.outcome == PaymentOutcome::Success && record.successful_payment().is_some() {
                return Err(StoreError::Conflict(format!("reservation {} already has a successful payment", id)));
            }
        }

        record.apply(next, attempt.cloned(), at);
        if !next.is_active() {
            let key = record.seat_key();
            if inner.active.get(&key) == Some(&id) {
                inner.active.remove(&key);
            }
        }

        Ok(CasOutcome::Applied(record.clone()))
    }

    async fn find_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>, StoreError> {
        let inner = self.inner.read().await;
        let mut lapsed: Vec<&Reservation> = inner
            .records
            .values()
            .filter(|r| r.hold_lapsed(now))
            .collect();
        lapsed.sort_by_key(|r| r.hold_expiry);

        Ok(lapsed.into_iter().take(limit).map(|r| r.id).collect())
    }

    async fn list_active(&self) -> Result<Vec<Reservation>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .active
            .values()
            .filter_map(|id| inner.records.get(id).cloned())
            .collect())
    }

    async fn list_for_passenger(&self, passenger_id: &str) -> Result<Vec<Reservation>, StoreError> {
        let inner = self.inner.read().await;
        let mut found: Vec<Reservation> = inner
            .records
            .values()
            .filter(|r| r.passenger.passenger_id == passenger_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cambus_shared::{PassengerInfo, PaymentMethod};
    use chrono::Duration;

    fn hold(key: SeatKey, passenger: &str, created_at: DateTime<Utc>) -> Reservation {
        Reservation::hold(
            Uuid::new_v4(),
            key,
            PassengerInfo::new(passenger, "Test Passenger"),
            5_000,
            "XAF".to_string(),
            created_at,
            created_at + Duration::minutes(15),
        )
    }

    #[tokio::test]
    async fn test_second_active_reservation_conflicts() {
        let store = InMemoryReservationStore::new();
        let key = SeatKey::new(Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();

        let first = hold(key, "user-1", now);
        store.insert(&first).await.unwrap();
        let err = store.insert(&hold(key, "user-2", now)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // Once the first leaves the active set the seat can be reserved again
        store
            .transition(first.id, ReservationStatus::Pending, ReservationStatus::Expired, None, now)
            .await
            .unwrap();
        store.insert(&hold(key, "user-2", now)).await.unwrap();
        assert_eq!(store.len().await, 2);
        assert_eq!(store.list_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_compare_and_set() {
        let store = InMemoryReservationStore::new();
        let now = Utc::now();
        let reservation = hold(SeatKey::new(Uuid::new_v4(), Uuid::new_v4()), "user-1", now);
        store.insert(&reservation).await.unwrap();

        let attempt = PaymentAttempt::succeeded(
            reservation.id,
            reservation.amount,
            PaymentMethod::OrangeMoney,
            Some("NKAP1".to_string()),
            Some("TXN1".to_string()),
            now,
        );
        let applied = store
            .transition(
                reservation.id,
                ReservationStatus::Pending,
                ReservationStatus::Confirmed,
                Some(&attempt),
                now,
            )
            .await
            .unwrap();
        match applied {
            CasOutcome::Applied(r) => {
                assert_eq!(r.status, ReservationStatus::Confirmed);
                assert_eq!(r.payments, vec![attempt]);
            }
            other => panic!("expected Applied, got {:?}", other),
        }

        // Loser of the race sees the winner's status and writes nothing
        let stale = store
            .transition(reservation.id, ReservationStatus::Pending, ReservationStatus::Expired, None, now)
            .await
            .unwrap();
        assert_eq!(stale, CasOutcome::Stale(ReservationStatus::Confirmed));

        let missing = store
            .transition(Uuid::new_v4(), ReservationStatus::Pending, ReservationStatus::Expired, None, now)
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_find_expired_oldest_first() {
        let store = InMemoryReservationStore::new();
        let now = Utc::now();

        let older = hold(SeatKey::new(Uuid::new_v4(), Uuid::new_v4()), "a", now - Duration::minutes(40));
        let newer = hold(SeatKey::new(Uuid::new_v4(), Uuid::new_v4()), "b", now - Duration::minutes(20));
        let fresh = hold(SeatKey::new(Uuid::new_v4(), Uuid::new_v4()), "c", now);
        for r in [&newer, &fresh, &older] {
            store.insert(r).await.unwrap();
        }

        assert_eq!(store.find_expired(now, 10).await.unwrap(), vec![older.id, newer.id]);
        assert_eq!(store.find_expired(now, 1).await.unwrap(), vec![older.id]);
    }

    #[tokio::test]
    async fn test_list_for_passenger_newest_first() {
        let store = InMemoryReservationStore::new();
        let now = Utc::now();

        let first = hold(SeatKey::new(Uuid::new_v4(), Uuid::new_v4()), "user-1", now - Duration::hours(1));
        let second = hold(SeatKey::new(Uuid::new_v4(), Uuid::new_v4()), "user-1", now);
        let other = hold(SeatKey::new(Uuid::new_v4(), Uuid::new_v4()), "user-2", now);
        for r in [&first, &second, &other] {
            store.insert(r).await.unwrap();
        }

        let ids: Vec<Uuid> = store
            .list_for_passenger("user-1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }
}

use crate::inventory::{SeatLedger, SeatState};
use cambus_core::{BookingError, BookingResult, ScheduleStore, StoreError};
use cambus_shared::{Schedule, Seat, SeatKey};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct SeatAvailability {
    #[serde(flatten)]
    pub seat: Seat,
    pub state: SeatState,
    pub is_booked: bool,
}

/// Seat map of one schedule as passengers see it.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleAvailability {
    pub schedule_id: Uuid,
    pub total_seats: u32,
    pub available_seats: u32,
    pub utilization: f64,
    pub seats: Vec<SeatAvailability>,
}

/// Load a schedule's seat map and make sure the ledger knows about it.
pub async fn load_seat_map(
    schedules: &dyn ScheduleStore,
    ledger: &SeatLedger,
    schedule: &Schedule,
) -> Result<Vec<Seat>, StoreError> {
    let seats = schedules.list_seats(schedule.bus_id).await?;
    if !ledger.is_open(&schedule.id) {
        ledger.open(schedule, seats.iter().map(|s| s.id));
    }
    Ok(seats)
}

/// Read side over the seat ledger. Answers from the same in-process state the
/// reservation manager writes, so a caller always sees its own changes.
pub struct AvailabilityQuery {
    schedules: Arc<dyn ScheduleStore>,
    ledger: Arc<SeatLedger>,
}

impl AvailabilityQuery {
    pub fn new(schedules: Arc<dyn ScheduleStore>, ledger: Arc<SeatLedger>) -> Self {
        Self { schedules, ledger }
    }

    /// Free seats of a schedule, ordered by seat number.
    pub async fn list_available(&self, schedule_id: Uuid) -> BookingResult<Vec<Seat>> {
        let (_, seats) = self.seat_map(schedule_id).await?;
        Ok(seats
            .into_iter()
            .filter(|seat| self.ledger.is_free(SeatKey::new(schedule_id, seat.id)))
            .collect())
    }

    pub fn is_seat_free(&self, schedule_id: Uuid, seat_id: Uuid) -> bool {
        self.ledger.is_free(SeatKey::new(schedule_id, seat_id))
    }

    pub async fn schedule_availability(&self, schedule_id: Uuid) -> BookingResult<ScheduleAvailability> {
        let (schedule, seats) = self.seat_map(schedule_id).await?;
        let occupied = self.ledger.occupied(&schedule_id);

        let seats = seats
            .into_iter()
            .map(|seat| {
                let state = occupied.get(&seat.id).copied().unwrap_or(SeatState::Available);
                SeatAvailability {
                    seat,
                    state,
                    is_booked: state != SeatState::Available,
                }
            })
            .collect();

        Ok(ScheduleAvailability {
            schedule_id,
            total_seats: schedule.total_seats,
            available_seats: self
                .ledger
                .available_seats(&schedule_id)
                .unwrap_or(schedule.total_seats),
            utilization: self.ledger.utilization(&schedule_id).unwrap_or(0.0),
            seats,
        })
    }

    async fn seat_map(&self, schedule_id: Uuid) -> BookingResult<(Schedule, Vec<Seat>)> {
        let schedule = self
            .schedules
            .get_schedule(schedule_id)
            .await?
            .ok_or(BookingError::ScheduleNotFound(schedule_id))?;
        let seats = load_seat_map(self.schedules.as_ref(), &self.ledger, &schedule).await?;
        Ok((schedule, seats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::InMemoryScheduleStore;
    use chrono::{Duration, Utc};

    async fn fixture() -> (AvailabilityQuery, Arc<SeatLedger>, Schedule, Vec<Seat>) {
        let store = Arc::new(InMemoryScheduleStore::new());
        let bus_id = Uuid::new_v4();
        let seats = Seat::layout(bus_id, 3, 0);
        store.add_bus(bus_id, seats.clone()).await;

        let departure = Utc::now() + Duration::hours(12);
        let schedule = Schedule::new(Uuid::new_v4(), bus_id, departure, departure + Duration::hours(3), 3_000, 3);
        store.add_schedule(schedule.clone()).await;

        let ledger = Arc::new(SeatLedger::new());
        let query = AvailabilityQuery::new(store, ledger.clone());
        (query, ledger, schedule, seats)
    }

    #[tokio::test]
    async fn test_untouched_schedule_is_all_free() {
        let (query, ledger, schedule, seats) = fixture().await;

        let free = query.list_available(schedule.id).await.unwrap();
        assert_eq!(free, seats);
        assert!(ledger.is_open(&schedule.id));

        let view = query.schedule_availability(schedule.id).await.unwrap();
        assert_eq!(view.available_seats, 3);
        assert!(view.seats.iter().all(|s| !s.is_booked));
    }

    #[tokio::test]
    async fn test_reflects_holds_and_releases() {
        let (query, ledger, schedule, seats) = fixture().await;
        query.list_available(schedule.id).await.unwrap();

        let key = SeatKey::new(schedule.id, seats[1].id);
        let token = ledger.try_acquire(key, Uuid::new_v4()).unwrap();

        assert!(!query.is_seat_free(schedule.id, seats[1].id));
        let free: Vec<u16> = query
            .list_available(schedule.id)
            .await
            .unwrap()
            .iter()
            .map(|s| s.seat_number)
            .collect();
        assert_eq!(free, vec![1, 3]);

        let view = query.schedule_availability(schedule.id).await.unwrap();
        assert_eq!(view.available_seats, 2);
        assert_eq!(view.seats[1].state, SeatState::Held);
        assert!(view.seats[1].is_booked);

        ledger.release(&token).unwrap();
        assert!(query.is_seat_free(schedule.id, seats[1].id));
        assert_eq!(query.list_available(schedule.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_schedule() {
        let (query, _, _, _) = fixture().await;
        let missing = Uuid::new_v4();
        assert!(matches!(
            query.list_available(missing).await,
            Err(BookingError::ScheduleNotFound(id)) if id == missing
        ));
    }
}

use async_trait::async_trait;
use cambus_core::{ScheduleStore, StoreError};
use cambus_shared::{Schedule, ScheduleStatus, Seat};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Operator-side schedule catalog held in memory. Used for local runs and tests;
/// the PostgreSQL deployment reads schedules from the database instead.
#[derive(Default)]
pub struct InMemoryScheduleStore {
    seats: RwLock<HashMap<Uuid, Vec<Seat>>>,
    schedules: RwLock<HashMap<Uuid, Schedule>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bus and its seat map. Seats are kept ordered by seat number.
    pub async fn add_bus(&self, bus_id: Uuid, mut seats: Vec<Seat>) {
        seats.sort_by_key(|s| s.seat_number);
        self.seats.write().await.insert(bus_id, seats);
    }

    pub async fn add_schedule(&self, schedule: Schedule) {
        info!(
            "Schedule {} added: bus {} departing {}",
            schedule.id, schedule.bus_id, schedule.departure_time
        );
        self.schedules.write().await.insert(schedule.id, schedule);
    }

    pub async fn set_status(&self, schedule_id: Uuid, status: ScheduleStatus) -> Result<(), StoreError> {
        let mut schedules = self.schedules.write().await;
        let schedule = schedules
            .get_mut(&schedule_id)
            .ok_or(StoreError::NotFound(schedule_id))?;
        schedule.status = status;
        info!("Schedule {} marked {}", schedule_id, status);
        Ok(())
    }

    /// Only affects reservations created afterwards.
    pub async fn set_price(&self, schedule_id: Uuid, price: i64) -> Result<(), StoreError> {
        let mut schedules = self.schedules.write().await;
        let schedule = schedules
            .get_mut(&schedule_id)
            .ok_or(StoreError::NotFound(schedule_id))?;
        schedule.price = price;
        Ok(())
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn get_schedule(&self, id: Uuid) -> Result<Option<Schedule>, StoreError> {
        Ok(self.schedules.read().await.get(&id).cloned())
    }

    async fn list_seats(&self, bus_id: Uuid) -> Result<Vec<Seat>, StoreError> {
        Ok(self.seats.read().await.get(&bus_id).cloned().unwrap_or_default())
    }
}

use async_trait::async_trait;
use cambus_core::{ScheduleStore, StoreError};
use cambus_shared::{Schedule, ScheduleStatus, Seat, SeatClass};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Read-only view of the operator tables (`schedules`, `seats`).
pub struct PgScheduleStore {
    pool: PgPool,
}

impl PgScheduleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: Uuid,
    route_id: Uuid,
    bus_id: Uuid,
    departure_time: DateTime<Utc>,
    arrival_time: DateTime<Utc>,
    price: i64,
    currency: String,
    total_seats: i32,
    status: String,
}

#[derive(sqlx::FromRow)]
struct SeatRow {
    id: Uuid,
    bus_id: Uuid,
    seat_number: i32,
    seat_class: String,
}

#[async_trait]
impl ScheduleStore for PgScheduleStore {
    async fn get_schedule(&self, id: Uuid) -> Result<Option<Schedule>, StoreError> {
        let row: Option<ScheduleRow> = sqlx::query_as(
            r#"
            SELECT id, route_id, bus_id, departure_time, arrival_time, price, currency, total_seats, status
            FROM schedules
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(Schedule {
            id: row.id,
            route_id: row.route_id,
            bus_id: row.bus_id,
            departure_time: row.departure_time,
            arrival_time: row.arrival_time,
            price: row.price,
            currency: row.currency,
            total_seats: u32::try_from(row.total_seats)
                .map_err(|_| StoreError::Corrupt(format!("schedule {} has negative seat count", row.id)))?,
            status: row.status.parse::<ScheduleStatus>().map_err(StoreError::Corrupt)?,
        }))
    }

    async fn list_seats(&self, bus_id: Uuid) -> Result<Vec<Seat>, StoreError> {
        let rows: Vec<SeatRow> = sqlx::query_as(
            "SELECT id, bus_id, seat_number, seat_class FROM seats WHERE bus_id = $1 ORDER BY seat_number",
        )
        .bind(bus_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        rows.into_iter()
            .map(|row| {
                Ok(Seat {
                    id: row.id,
                    bus_id: row.bus_id,
                    seat_number: u16::try_from(row.seat_number)
                        .map_err(|_| StoreError::Corrupt(format!("seat {} has invalid number", row.id)))?,
                    seat_class: row.seat_class.parse::<SeatClass>().map_err(StoreError::Corrupt)?,
                })
            })
            .collect()
    }
}

use async_trait::async_trait;
use cambus_core::{CasOutcome, ReservationStore, StoreError};
use cambus_shared::{
    Masked, PassengerInfo, PaymentAttempt, PaymentMethod, PaymentOutcome, Reservation, ReservationStatus,
};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use tracing::error;
use uuid::Uuid;

const RESERVATION_COLUMNS: &str = "id, booking_reference, schedule_id, seat_id, passenger_id, passenger_name, \
     passenger_phone, passenger_email, passenger_id_number, amount, currency, status, hold_expiry, \
     created_at, updated_at";

const ATTEMPT_COLUMNS: &str = "id, reservation_id, amount, method, outcome, external_reference, \
     transaction_id, failure_reason, created_at";

/// Reservations in PostgreSQL. The partial unique index
/// `reservations_active_seat` rejects a second PENDING/CONFIRMED row for the same
/// (schedule, seat), and status transitions are conditional updates inside a
/// transaction that also writes the payment attempt.
pub struct PgReservationStore {
    pool: PgPool,
}

impl PgReservationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn attempts_for(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<PaymentAttempt>>, StoreError> {
        let mut by_reservation: HashMap<Uuid, Vec<PaymentAttempt>> = HashMap::new();
        if ids.is_empty() {
            return Ok(by_reservation);
        }

        let rows: Vec<AttemptRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payment_attempts WHERE reservation_id = ANY($1) ORDER BY created_at",
            ATTEMPT_COLUMNS
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        for row in rows {
            let attempt = row.into_attempt()?;
            by_reservation.entry(attempt.reservation_id).or_default().push(attempt);
        }
        Ok(by_reservation)
    }

    async fn hydrate(&self, rows: Vec<ReservationRow>) -> Result<Vec<Reservation>, StoreError> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut attempts = self.attempts_for(&ids).await?;

        rows.into_iter()
            .map(|row| {
                let payments = attempts.remove(&row.id).unwrap_or_default();
                row.into_reservation(payments)
            })
            .collect()
    }

    async fn fetch_where(&self, clause: &str, bind: Option<&str>) -> Result<Vec<Reservation>, StoreError> {
        let sql = format!("SELECT {} FROM reservations {}", RESERVATION_COLUMNS, clause);
        let mut query = sqlx::query_as::<_, ReservationRow>(&sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(db_error)?;
        self.hydrate(rows).await
    }
}

#[async_trait]
impl ReservationStore for PgReservationStore {
    async fn insert(&self, reservation: &Reservation) -> Result<(), StoreError> {
        let passenger = &reservation.passenger;

        sqlx::query(
            r#"
            INSERT INTO reservations (id, booking_reference, schedule_id, seat_id, passenger_id, passenger_name,
                passenger_phone, passenger_email, passenger_id_number, amount, currency, status, hold_expiry,
                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(reservation.id)
        .bind(&reservation.booking_reference)
        .bind(reservation.schedule_id)
        .bind(reservation.seat_id)
        .bind(&passenger.passenger_id)
        .bind(&passenger.name)
        .bind(passenger.phone.as_ref().map(|p| p.expose().clone()))
        .bind(&passenger.email)
        .bind(passenger.id_number.as_ref().map(|n| n.expose().clone()))
        .bind(reservation.amount)
        .bind(&reservation.currency)
        .bind(reservation.status.as_str())
        .bind(reservation.hold_expiry)
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                return StoreError::Conflict(format!(
                    "seat {} already reserved on schedule {}",
                    reservation.seat_id, reservation.schedule_id
                ));
            }
            db_error(e)
        })?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Reservation>, StoreError> {
        let row: Option<ReservationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM reservations WHERE id = $1",
            RESERVATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: ReservationStatus,
        next: ReservationStatus,
        attempt: Option<&PaymentAttempt>,
        at: DateTime<Utc>,
    ) -> Result<CasOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let updated: Option<ReservationRow> = sqlx::query_as(&format!(
            "UPDATE reservations SET status = $1, updated_at = $2 WHERE id = $3 AND status = $4 RETURNING {}",
            RESERVATION_COLUMNS
        ))
        .bind(next.as_str())
        .bind(at)
        .bind(id)
        .bind(expected.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

        let Some(row) = updated else {
            let current: Option<String> = sqlx::query_scalar("SELECT status FROM reservations WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error)?;
            tx.rollback().await.map_err(db_error)?;

            return match current {
                Some(status) => Ok(CasOutcome::Stale(parse_status(&status)?)),
                None => Err(StoreError::NotFound(id)),
            };
        };

        if let Some(attempt) = attempt {
            insert_attempt(&mut tx, attempt).await?;
        }
        tx.commit().await.map_err(db_error)?;

        let payments = self.attempts_for(&[id]).await?.remove(&id).unwrap_or_default();
        Ok(CasOutcome::Applied(row.into_reservation(payments)?))
    }

    async fn find_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>, StoreError> {
        sqlx::query_scalar(
            "SELECT id FROM reservations WHERE status = 'PENDING' AND hold_expiry <= $1 \
             ORDER BY hold_expiry LIMIT $2",
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn list_active(&self) -> Result<Vec<Reservation>, StoreError> {
        self.fetch_where("WHERE status IN ('PENDING', 'CONFIRMED')", None).await
    }

    async fn list_for_passenger(&self, passenger_id: &str) -> Result<Vec<Reservation>, StoreError> {
        self.fetch_where("WHERE passenger_id = $1 ORDER BY created_at DESC", Some(passenger_id))
            .await
    }
}

async fn insert_attempt(tx: &mut Transaction<'_, Postgres>, attempt: &PaymentAttempt) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO payment_attempts (id, reservation_id, amount, method, outcome, external_reference,
            transaction_id, failure_reason, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(attempt.id)
    .bind(attempt.reservation_id)
    .bind(attempt.amount)
    .bind(attempt.method.as_str())
    .bind(attempt.outcome.as_str())
    .bind(&attempt.external_reference)
    .bind(&attempt.transaction_id)
    .bind(&attempt.failure_reason)
    .bind(attempt.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            return StoreError::Conflict(format!(
                "reservation {} already has a successful payment",
                attempt.reservation_id
            ));
        }
        db_error(e)
    })?;
    Ok(())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn db_error(e: sqlx::Error) -> StoreError {
    error!("Reservation store error: {}", e);
    StoreError::backend(e)
}

fn parse_status(raw: &str) -> Result<ReservationStatus, StoreError> {
    raw.parse().map_err(StoreError::Corrupt)
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    id: Uuid,
    booking_reference: String,
    schedule_id: Uuid,
    seat_id: Uuid,
    passenger_id: String,
    passenger_name: String,
    passenger_phone: Option<String>,
    passenger_email: Option<String>,
    passenger_id_number: Option<String>,
    amount: i64,
    currency: String,
    status: String,
    hold_expiry: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ReservationRow {
    fn into_reservation(self, payments: Vec<PaymentAttempt>) -> Result<Reservation, StoreError> {
        Ok(Reservation {
            id: self.id,
            booking_reference: self.booking_reference,
            schedule_id: self.schedule_id,
            seat_id: self.seat_id,
            passenger: PassengerInfo {
                passenger_id: self.passenger_id,
                name: self.passenger_name,
                phone: self.passenger_phone.map(Masked::new),
                email: self.passenger_email,
                id_number: self.passenger_id_number.map(Masked::new),
            },
            amount: self.amount,
            currency: self.currency,
            status: parse_status(&self.status)?,
            hold_expiry: self.hold_expiry,
            payments,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AttemptRow {
    id: Uuid,
    reservation_id: Uuid,
    amount: i64,
    method: String,
    outcome: String,
    external_reference: Option<String>,
    transaction_id: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl AttemptRow {
    fn into_attempt(self) -> Result<PaymentAttempt, StoreError> {
        Ok(PaymentAttempt {
            id: self.id,
            reservation_id: self.reservation_id,
            amount: self.amount,
            method: self.method.parse::<PaymentMethod>().map_err(StoreError::Corrupt)?,
            outcome: self.outcome.parse::<PaymentOutcome>().map_err(StoreError::Corrupt)?,
            external_reference: self.external_reference,
            transaction_id: self.transaction_id,
            failure_reason: self.failure_reason,
            created_at: self.created_at,
        })
    }
}

use crate::context::BookingContext;
use cambus_catalog::{load_seat_map, HoldToken};
use cambus_core::{BookingError, BookingResult, CasOutcome, StoreError};
use cambus_shared::{
    BookingEvent, PassengerInfo, PaymentAttempt, Reservation, ReservationStatus, ScheduleStatus, SeatKey,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const DEFAULT_HOLD_MINUTES: i64 = 15;

/// Result of trying to expire one hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiryOutcome {
    Expired(Reservation),
    /// Not PENDING any more, or the hold has not lapsed yet.
    Unchanged(ReservationStatus),
    /// The seat is locked by another operation; try again later.
    Busy,
}

/// Owns the reservation lifecycle
/// (PENDING -> CONFIRMED | FAILED | EXPIRED | CANCELLED, CONFIRMED -> CANCELLED).
pub struct ReservationManager {
    ctx: BookingContext,
    hold_duration: Duration,
}

impl ReservationManager {
    pub fn new(ctx: BookingContext) -> Self {
        Self {
            ctx,
            hold_duration: Duration::minutes(DEFAULT_HOLD_MINUTES),
        }
    }

    pub fn with_hold_duration(mut self, hold_duration: Duration) -> Self {
        self.hold_duration = hold_duration;
        self
    }

    pub fn context(&self) -> &BookingContext {
        &self.ctx
    }

    pub fn hold_duration(&self) -> Duration {
        self.hold_duration
    }

    /// Hold a seat for a passenger. The reservation starts PENDING with the
    /// schedule's current price.
    pub async fn create(
        &self,
        schedule_id: Uuid,
        seat_id: Uuid,
        passenger: PassengerInfo,
    ) -> BookingResult<Reservation> {
        validate_passenger(&passenger)?;

        let schedule = self
            .ctx
            .schedules
            .get_schedule(schedule_id)
            .await?
            .ok_or(BookingError::ScheduleNotFound(schedule_id))?;

        if schedule.status != ScheduleStatus::Scheduled {
            return Err(BookingError::ScheduleNotBookable {
                schedule_id,
                reason: format!("schedule is {}", schedule.status),
            });
        }
        if !schedule.is_bookable_at(self.ctx.clock.now()) {
            return Err(BookingError::ScheduleNotBookable {
                schedule_id,
                reason: "schedule has already departed".to_string(),
            });
        }

        let seats = load_seat_map(self.ctx.schedules.as_ref(), &self.ctx.ledger, &schedule).await?;
        if !seats.iter().any(|seat| seat.id == seat_id) {
            return Err(BookingError::UnknownSeat { schedule_id, seat_id });
        }

        let key = SeatKey::new(schedule_id, seat_id);
        let _guard = self.ctx.locks.lock(key).await;

        let reservation_id = Uuid::new_v4();
        let token = match self.ctx.ledger.try_acquire(key, reservation_id) {
            Ok(token) => token,
            Err(e) => {
                warn!("Hold rejected for seat {}: {}", key, e);
                return Err(BookingError::SeatUnavailable { schedule_id, seat_id });
            }
        };

        let now = self.ctx.clock.now();
        let reservation = Reservation::hold(
            reservation_id,
            key,
            passenger,
            schedule.price,
            schedule.currency.clone(),
            now,
            now + self.hold_duration,
        );

        if let Err(e) = self.ctx.reservations.insert(&reservation).await {
            // Never leave a seat held without a stored reservation
            self.release_seat(&token);
            return Err(match e {
                StoreError::Conflict(_) => BookingError::SeatUnavailable { schedule_id, seat_id },
                other => {
                    error!("Failed to store reservation {}: {}", reservation_id, other);
                    other.into()
                }
            });
        }

        info!(
            "Reservation {} ({}) holds seat {} until {}",
            reservation.id, reservation.booking_reference, key, reservation.hold_expiry
        );
        self.ctx.publish(BookingEvent::SeatHeld {
            reservation_id: reservation.id,
            schedule_id,
            seat_id,
            hold_expiry: reservation.hold_expiry,
        });

        Ok(reservation)
    }

    pub async fn get(&self, reservation_id: Uuid) -> BookingResult<Reservation> {
        self.ctx
            .reservations
            .get(reservation_id)
            .await?
            .ok_or(BookingError::NotFound(reservation_id))
    }

    /// Newest first.
    pub async fn list_for_passenger(&self, passenger_id: &str) -> BookingResult<Vec<Reservation>> {
        Ok(self.ctx.reservations.list_for_passenger(passenger_id).await?)
    }

    /// Cancel a PENDING or CONFIRMED reservation and free its seat.
    /// Cancelling twice returns the cancelled reservation both times.
    pub async fn cancel(&self, reservation_id: Uuid) -> BookingResult<Reservation> {
        let key = self.get(reservation_id).await?.seat_key();
        let _guard = self.ctx.locks.lock(key).await;
        let current = self.get(reservation_id).await?;

        match current.status {
            ReservationStatus::Cancelled => Ok(current),
            ReservationStatus::Pending | ReservationStatus::Confirmed => {
                match self.finish_locked(&current, ReservationStatus::Cancelled, None).await? {
                    CasOutcome::Applied(cancelled) => Ok(cancelled),
                    CasOutcome::Stale(ReservationStatus::Cancelled) => self.get(reservation_id).await,
                    CasOutcome::Stale(status) => Err(BookingError::InvalidTransition {
                        from: status,
                        to: ReservationStatus::Cancelled,
                    }),
                }
            }
            status => Err(BookingError::InvalidTransition {
                from: status,
                to: ReservationStatus::Cancelled,
            }),
        }
    }

    /// Expire one lapsed hold. Never waits for the seat: if another operation
    /// is working on it the outcome is `Busy`.
    pub async fn expire_hold(&self, reservation_id: Uuid) -> BookingResult<ExpiryOutcome> {
        let key = self.get(reservation_id).await?.seat_key();
        let Some(_guard) = self.ctx.locks.try_lock(key) else {
            return Ok(ExpiryOutcome::Busy);
        };
        let current = self.get(reservation_id).await?;
        self.expire_locked(&current).await
    }

    /// Caller holds the seat lock.
    pub(crate) async fn expire_locked(&self, current: &Reservation) -> BookingResult<ExpiryOutcome> {
        if !current.hold_lapsed(self.ctx.clock.now()) {
            return Ok(ExpiryOutcome::Unchanged(current.status));
        }
        match self.finish_locked(current, ReservationStatus::Expired, None).await? {
            CasOutcome::Applied(expired) => Ok(ExpiryOutcome::Expired(expired)),
            CasOutcome::Stale(status) => Ok(ExpiryOutcome::Unchanged(status)),
        }
    }

    /// Move `current` to `next` with a compare-and-set on its status, then bring
    /// the ledger in line: CONFIRMED commits the hold, anything else releases it.
    /// Caller holds the seat lock.
    pub(crate) async fn finish_locked(
        &self,
        current: &Reservation,
        next: ReservationStatus,
        attempt: Option<PaymentAttempt>,
    ) -> BookingResult<CasOutcome> {
        if !current.status.can_transition_to(next) {
            return Err(BookingError::InvalidTransition {
                from: current.status,
                to: next,
            });
        }

        let now = self.ctx.clock.now();
        let outcome = self
            .ctx
            .reservations
            .transition(current.id, current.status, next, attempt.as_ref(), now)
            .await?;

        let updated = match outcome {
            CasOutcome::Applied(updated) => updated,
            CasOutcome::Stale(actual) => {
                warn!(
                    "Reservation {} moved to {} before {} could apply",
                    current.id, actual, next
                );
                return Ok(CasOutcome::Stale(actual));
            }
        };

        let token = HoldToken::new(updated.seat_key(), updated.id);
        if next == ReservationStatus::Confirmed {
            if let Err(e) = self.ctx.ledger.commit(&token) {
                error!("Ledger out of step committing {}: {}", updated.id, e);
            }
        } else {
            self.release_seat(&token);
        }

        info!("Reservation {} {} -> {}", updated.id, current.status, next);
        if let Some(event) = transition_event(current.status, &updated, attempt.as_ref(), now) {
            self.ctx.publish(event);
        }

        Ok(CasOutcome::Applied(updated))
    }

    /// Rebuild the ledger from stored PENDING and CONFIRMED reservations.
    /// Returns how many seats were restored.
    pub async fn rehydrate(&self) -> BookingResult<usize> {
        let active = self.ctx.reservations.list_active().await?;
        let mut missing: HashSet<Uuid> = HashSet::new();
        let mut restored = 0;

        for reservation in active {
            if missing.contains(&reservation.schedule_id) {
                continue;
            }
            if !self.ctx.ledger.is_open(&reservation.schedule_id) {
                let Some(schedule) = self.ctx.schedules.get_schedule(reservation.schedule_id).await? else {
                    warn!(
                        "Schedule {} of reservation {} not found, skipping",
                        reservation.schedule_id, reservation.id
                    );
                    missing.insert(reservation.schedule_id);
                    continue;
                };
                load_seat_map(self.ctx.schedules.as_ref(), &self.ctx.ledger, &schedule).await?;
            }

            let token = match self.ctx.ledger.try_acquire(reservation.seat_key(), reservation.id) {
                Ok(token) => token,
                Err(e) => {
                    warn!("Could not restore reservation {}: {}", reservation.id, e);
                    continue;
                }
            };
            if reservation.status == ReservationStatus::Confirmed {
                if let Err(e) = self.ctx.ledger.commit(&token) {
                    warn!("Could not restore booking {}: {}", reservation.id, e);
                }
            }
            restored += 1;
        }

        info!("Restored {} active reservations into the seat ledger", restored);
        Ok(restored)
    }

    fn release_seat(&self, token: &HoldToken) {
        if let Err(e) = self.ctx.ledger.release(token) {
            error!("Ledger out of step releasing {}: {}", token.reservation_id, e);
        }
    }
}

fn validate_passenger(passenger: &PassengerInfo) -> BookingResult<()> {
    if passenger.passenger_id.trim().is_empty() {
        return Err(BookingError::Validation("passenger id is required".to_string()));
    }
    if passenger.name.trim().is_empty() {
        return Err(BookingError::Validation("passenger name is required".to_string()));
    }
    Ok(())
}

fn transition_event(
    from: ReservationStatus,
    reservation: &Reservation,
    attempt: Option<&PaymentAttempt>,
    timestamp: DateTime<Utc>,
) -> Option<BookingEvent> {
    let reservation_id = reservation.id;
    let schedule_id = reservation.schedule_id;
    let seat_id = reservation.seat_id;

    let event = match reservation.status {
        ReservationStatus::Confirmed => BookingEvent::BookingConfirmed {
            reservation_id,
            schedule_id,
            seat_id,
            amount: reservation.amount,
            transaction_id: attempt.and_then(|a| a.transaction_id.clone()),
            timestamp,
        },
        ReservationStatus::Failed => BookingEvent::PaymentFailed {
            reservation_id,
            schedule_id,
            seat_id,
            reason: attempt
                .and_then(|a| a.failure_reason.clone())
                .unwrap_or_else(|| "payment failed".to_string()),
            timestamp,
        },
        ReservationStatus::Expired => BookingEvent::HoldExpired {
            reservation_id,
            schedule_id,
            seat_id,
            timestamp,
        },
        ReservationStatus::Cancelled => BookingEvent::BookingCancelled {
            reservation_id,
            schedule_id,
            seat_id,
            refund_eligible: from == ReservationStatus::Confirmed,
            timestamp,
        },
        ReservationStatus::Pending => return None,
    };
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cambus_catalog::{InMemoryScheduleStore, SeatState};
    use cambus_core::{Clock, ManualClock, ReservationStore, ScheduleStore};
    use cambus_shared::{Schedule, Seat};
    use cambus_store::InMemoryReservationStore;
    use std::sync::Arc;

    struct Fixture {
        manager: ReservationManager,
        clock: Arc<ManualClock>,
        schedules: Arc<InMemoryScheduleStore>,
        store: Arc<InMemoryReservationStore>,
        schedule: Schedule,
        seats: Vec<Seat>,
    }

    async fn fixture(seat_count: u16) -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let schedules = Arc::new(InMemoryScheduleStore::new());
        let store = Arc::new(InMemoryReservationStore::new());

        let bus_id = Uuid::new_v4();
        let seats = Seat::layout(bus_id, seat_count, 0);
        schedules.add_bus(bus_id, seats.clone()).await;
        let departure = clock.now() + Duration::days(2);
        let schedule = Schedule::new(
            Uuid::new_v4(),
            bus_id,
            departure,
            departure + Duration::hours(4),
            7_500,
            seat_count as u32,
        );
        schedules.add_schedule(schedule.clone()).await;

        let ctx = BookingContext::new(schedules.clone(), store.clone(), clock.clone());
        Fixture {
            manager: ReservationManager::new(ctx),
            clock,
            schedules,
            store,
            schedule,
            seats,
        }
    }

    fn passenger() -> PassengerInfo {
        PassengerInfo::new("user-1", "Ada Nkemelu").with_phone("+237650000000")
    }

    #[tokio::test]
    async fn test_create_holds_seat() {
        let f = fixture(3).await;
        let mut events = f.manager.context().subscribe();
        let seat = &f.seats[0];

        let reservation = f.manager.create(f.schedule.id, seat.id, passenger()).await.unwrap();

        assert_eq!(reservation.status, ReservationStatus::Pending);
        assert_eq!(reservation.amount, 7_500);
        assert_eq!(reservation.hold_expiry, f.clock.now() + Duration::minutes(15));
        assert!(reservation.booking_reference.starts_with("CB"));

        let ledger = &f.manager.context().ledger;
        assert_eq!(ledger.available_seats(&f.schedule.id), Some(2));
        assert_eq!(ledger.seat_state(reservation.seat_key()), SeatState::Held);

        match events.recv().await.unwrap() {
            BookingEvent::SeatHeld { reservation_id, .. } => assert_eq!(reservation_id, reservation.id),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_rejects_taken_seat() {
        let f = fixture(2).await;
        let seat = f.seats[1].id;

        f.manager.create(f.schedule.id, seat, passenger()).await.unwrap();
        let err = f.manager.create(f.schedule.id, seat, passenger()).await.unwrap_err();

        assert!(matches!(err, BookingError::SeatUnavailable { .. }));
        assert_eq!(f.manager.context().ledger.available_seats(&f.schedule.id), Some(1));
    }

    #[tokio::test]
    async fn test_create_validation() {
        let f = fixture(2).await;

        let err = f
            .manager
            .create(f.schedule.id, f.seats[0].id, PassengerInfo::new("user-1", "  "))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));

        let err = f
            .manager
            .create(f.schedule.id, Uuid::new_v4(), passenger())
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::UnknownSeat { .. }));

        let err = f
            .manager
            .create(Uuid::new_v4(), f.seats[0].id, passenger())
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::ScheduleNotFound(_)));
    }

    #[tokio::test]
    async fn test_create_on_unbookable_schedule() {
        let f = fixture(2).await;

        f.schedules
            .set_status(f.schedule.id, ScheduleStatus::Cancelled)
            .await
            .unwrap();
        let err = f
            .manager
            .create(f.schedule.id, f.seats[0].id, passenger())
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::ScheduleNotBookable { .. }));

        f.schedules
            .set_status(f.schedule.id, ScheduleStatus::Scheduled)
            .await
            .unwrap();
        f.clock.advance(Duration::days(3));
        let err = f
            .manager
            .create(f.schedule.id, f.seats[0].id, passenger())
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::ScheduleNotBookable { .. }));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let f = fixture(2).await;
        let reservation = f.manager.create(f.schedule.id, f.seats[0].id, passenger()).await.unwrap();

        let first = f.manager.cancel(reservation.id).await.unwrap();
        let second = f.manager.cancel(reservation.id).await.unwrap();

        assert_eq!(first.status, ReservationStatus::Cancelled);
        assert_eq!(second.status, ReservationStatus::Cancelled);
        assert_eq!(f.manager.context().ledger.available_seats(&f.schedule.id), Some(2));
    }

    #[tokio::test]
    async fn test_cancel_expired_is_invalid() {
        let f = fixture(2).await;
        let reservation = f.manager.create(f.schedule.id, f.seats[0].id, passenger()).await.unwrap();

        f.clock.advance(Duration::minutes(15));
        let outcome = f.manager.expire_hold(reservation.id).await.unwrap();
        assert!(matches!(outcome, ExpiryOutcome::Expired(_)));

        let err = f.manager.cancel(reservation.id).await.unwrap_err();
        assert!(matches!(
            err,
            BookingError::InvalidTransition {
                from: ReservationStatus::Expired,
                to: ReservationStatus::Cancelled
            }
        ));
    }

    #[tokio::test]
    async fn test_expire_hold_waits_for_lapse() {
        let f = fixture(1).await;
        let reservation = f.manager.create(f.schedule.id, f.seats[0].id, passenger()).await.unwrap();

        f.clock.advance(Duration::minutes(14));
        assert_eq!(
            f.manager.expire_hold(reservation.id).await.unwrap(),
            ExpiryOutcome::Unchanged(ReservationStatus::Pending)
        );

        let guard = f.manager.context().locks.lock(reservation.seat_key()).await;
        f.clock.advance(Duration::minutes(2));
        assert_eq!(f.manager.expire_hold(reservation.id).await.unwrap(), ExpiryOutcome::Busy);
        drop(guard);

        let expired = match f.manager.expire_hold(reservation.id).await.unwrap() {
            ExpiryOutcome::Expired(r) => r,
            other => panic!("expected expiry, got {:?}", other),
        };
        assert_eq!(expired.status, ReservationStatus::Expired);
        assert!(f.manager.context().ledger.is_free(expired.seat_key()));
    }

    #[tokio::test]
    async fn test_insert_failure_releases_hold() {
        let f = fixture(2).await;
        let seat = f.seats[0].id;

        // A reservation the ledger does not know about already owns the seat in the store
        let intruder = Reservation::hold(
            Uuid::new_v4(),
            SeatKey::new(f.schedule.id, seat),
            passenger(),
            7_500,
            "XAF".to_string(),
            f.clock.now(),
            f.clock.now() + Duration::minutes(15),
        );
        f.store.insert(&intruder).await.unwrap();

        let err = f.manager.create(f.schedule.id, seat, passenger()).await.unwrap_err();
        assert!(matches!(err, BookingError::SeatUnavailable { .. }));
        assert!(f.manager.context().ledger.is_free(SeatKey::new(f.schedule.id, seat)));
        assert_eq!(f.manager.context().ledger.available_seats(&f.schedule.id), Some(2));
    }

    #[tokio::test]
    async fn test_list_for_passenger() {
        let f = fixture(3).await;
        let first = f.manager.create(f.schedule.id, f.seats[0].id, passenger()).await.unwrap();
        f.clock.advance(Duration::minutes(1));
        let second = f.manager.create(f.schedule.id, f.seats[1].id, passenger()).await.unwrap();
        f.manager
            .create(f.schedule.id, f.seats[2].id, PassengerInfo::new("user-2", "Paul Biya"))
            .await
            .unwrap();

        let mine: Vec<Uuid> = f
            .manager
            .list_for_passenger("user-1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(mine, vec![second.id, first.id]);
        assert!(matches!(
            f.manager.get(Uuid::new_v4()).await,
            Err(BookingError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rehydrate_restores_ledger() {
        let f = fixture(3).await;
        let held = f.manager.create(f.schedule.id, f.seats[0].id, passenger()).await.unwrap();
        let booked = f.manager.create(f.schedule.id, f.seats[1].id, passenger()).await.unwrap();

        let attempt = PaymentAttempt::succeeded(
            booked.id,
            booked.amount,
            Default::default(),
            None,
            Some("TXN1".to_string()),
            f.clock.now(),
        );
        f.store
            .transition(
                booked.id,
                ReservationStatus::Pending,
                ReservationStatus::Confirmed,
                Some(&attempt),
                f.clock.now(),
            )
            .await
            .unwrap();

        // Fresh process: same stores, empty ledger
        let ctx = BookingContext::new(f.schedules.clone(), f.store.clone(), f.clock.clone());
        let restarted = ReservationManager::new(ctx);
        assert_eq!(restarted.rehydrate().await.unwrap(), 2);

        let ledger = &restarted.context().ledger;
        assert_eq!(ledger.available_seats(&f.schedule.id), Some(1));
        assert_eq!(ledger.seat_state(held.seat_key()), SeatState::Held);
        assert_eq!(ledger.seat_state(booked.seat_key()), SeatState::Booked);
        assert!(f.schedules.get_schedule(f.schedule.id).await.unwrap().is_some());
    }
}

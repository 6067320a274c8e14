use cambus_shared::{Schedule, SeatKey};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Proof that a reservation holds a seat. Release and commit only act on the slot
/// if it is still owned by `reservation_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HoldToken {
    pub key: SeatKey,
    pub reservation_id: Uuid,
}

impl HoldToken {
    pub fn new(key: SeatKey, reservation_id: Uuid) -> Self {
        Self { key, reservation_id }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatState {
    Available,
    Held,
    Booked,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Held(Uuid),
    Booked(Uuid),
}

impl Slot {
    fn owner(&self) -> Uuid {
        match self {
            Slot::Held(id) | Slot::Booked(id) => *id,
        }
    }
}

/// Seat map and counter for one schedule
#[derive(Debug)]
struct ScheduleInventory {
    total_seats: u32,
    available: u32,
    seats: HashSet<Uuid>,
    slots: HashMap<Uuid, Slot>,
}

/// Per-schedule seat state (available / held / booked) and the available-seat counter.
///
/// Every operation on a schedule runs under that schedule's mutex, so acquire,
/// commit and release on the same seat are serialized and the counter moves in
/// lockstep with the slots.
#[derive(Default)]
pub struct SeatLedger {
    schedules: RwLock<HashMap<Uuid, Arc<Mutex<ScheduleInventory>>>>,
}

impl SeatLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schedule's seats. Returns false if it was already open, in which
    /// case the existing state is kept.
    pub fn open(&self, schedule: &Schedule, seat_ids: impl IntoIterator<Item = Uuid>) -> bool {
        let mut schedules = self.schedules.write().unwrap_or_else(PoisonError::into_inner);
        if schedules.contains_key(&schedule.id) {
            return false;
        }

        let inventory = ScheduleInventory {
            total_seats: schedule.total_seats,
            available: schedule.total_seats,
            seats: seat_ids.into_iter().collect(),
            slots: HashMap::new(),
        };
        debug!(
            "Opened schedule {} with {} seats ({} sellable)",
            schedule.id,
            inventory.seats.len(),
            inventory.total_seats
        );
        schedules.insert(schedule.id, Arc::new(Mutex::new(inventory)));
        true
    }

    pub fn is_open(&self, schedule_id: &Uuid) -> bool {
        self.schedules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(schedule_id)
    }

    /// Claim a seat for `reservation_id`.
    pub fn try_acquire(&self, key: SeatKey, reservation_id: Uuid) -> Result<HoldToken, LedgerError> {
        let inventory = self.inventory(&key.schedule_id)?;
        let mut inv = lock(&inventory);

        if !inv.seats.contains(&key.seat_id) {
            return Err(LedgerError::UnknownSeat(key));
        }
        if inv.slots.contains_key(&key.seat_id) {
            return Err(LedgerError::SeatTaken(key));
        }
        if inv.available == 0 {
            return Err(LedgerError::SoldOut(key.schedule_id));
        }

        inv.slots.insert(key.seat_id, Slot::Held(reservation_id));
        inv.available -= 1;
        debug!("Seat {} held by {} ({} left)", key, reservation_id, inv.available);

        Ok(HoldToken::new(key, reservation_id))
    }

    /// Turn a hold into a booking. The counter was already taken at acquire time.
    pub fn commit(&self, token: &HoldToken) -> Result<(), LedgerError> {
        let inventory = self.inventory(&token.key.schedule_id)?;
        let mut inv = lock(&inventory);

        match inv.slots.get(&token.key.seat_id).copied() {
            Some(slot) if slot.owner() == token.reservation_id => {
                inv.slots.insert(token.key.seat_id, Slot::Booked(token.reservation_id));
                Ok(())
            }
            _ => Err(LedgerError::HoldMismatch {
                key: token.key,
                reservation_id: token.reservation_id,
            }),
        }
    }

    /// Give the seat back, whether held or booked.
    pub fn release(&self, token: &HoldToken) -> Result<(), LedgerError> {
        let inventory = self.inventory(&token.key.schedule_id)?;
        let mut inv = lock(&inventory);

        match inv.slots.get(&token.key.seat_id) {
            Some(slot) if slot.owner() == token.reservation_id => {
                inv.slots.remove(&token.key.seat_id);
                inv.available = (inv.available + 1).min(inv.total_seats);
                debug!("Seat {} released by {} ({} left)", token.key, token.reservation_id, inv.available);
                Ok(())
            }
            _ => Err(LedgerError::HoldMismatch {
                key: token.key,
                reservation_id: token.reservation_id,
            }),
        }
    }

    /// A seat on a schedule the ledger has never opened is free.
    pub fn is_free(&self, key: SeatKey) -> bool {
        self.seat_state(key) == SeatState::Available
    }

    pub fn seat_state(&self, key: SeatKey) -> SeatState {
        let Ok(inventory) = self.inventory(&key.schedule_id) else {
            return SeatState::Available;
        };
        let inv = lock(&inventory);
        match inv.slots.get(&key.seat_id) {
            None => SeatState::Available,
            Some(Slot::Held(_)) => SeatState::Held,
            Some(Slot::Booked(_)) => SeatState::Booked,
        }
    }

    /// States of every occupied seat on a schedule.
    pub fn occupied(&self, schedule_id: &Uuid) -> HashMap<Uuid, SeatState> {
        let Ok(inventory) = self.inventory(schedule_id) else {
            return HashMap::new();
        };
        let inv = lock(&inventory);
        inv.slots
            .iter()
            .map(|(seat_id, slot)| {
                let state = match slot {
                    Slot::Held(_) => SeatState::Held,
                    Slot::Booked(_) => SeatState::Booked,
                };
                (*seat_id, state)
            })
            .collect()
    }

    pub fn available_seats(&self, schedule_id: &Uuid) -> Option<u32> {
        let inventory = self.inventory(schedule_id).ok()?;
        let available = lock(&inventory).available;
        Some(available)
    }

    pub fn total_seats(&self, schedule_id: &Uuid) -> Option<u32> {
        let inventory = self.inventory(schedule_id).ok()?;
        let total = lock(&inventory).total_seats;
        Some(total)
    }

    /// Share of sellable seats currently held or booked.
    pub fn utilization(&self, schedule_id: &Uuid) -> Option<f64> {
        let inventory = self.inventory(schedule_id).ok()?;
        let inv = lock(&inventory);
        if inv.total_seats == 0 {
            Some(0.0)
        } else {
            Some(1.0 - (inv.available as f64 / inv.total_seats as f64))
        }
    }

    fn inventory(&self, schedule_id: &Uuid) -> Result<Arc<Mutex<ScheduleInventory>>, LedgerError> {
        self.schedules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(schedule_id)
            .cloned()
            .ok_or(LedgerError::ScheduleNotOpen(*schedule_id))
    }
}

fn lock(inventory: &Mutex<ScheduleInventory>) -> MutexGuard<'_, ScheduleInventory> {
    inventory.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Schedule not open in ledger: {0}")]
    ScheduleNotOpen(Uuid),

    #[error("Seat not on this schedule: {0}")]
    UnknownSeat(SeatKey),

    #[error("Seat already taken: {0}")]
    SeatTaken(SeatKey),

    #[error("Schedule sold out: {0}")]
    SoldOut(Uuid),

    #[error("Seat {key} is not held by reservation {reservation_id}")]
    HoldMismatch { key: SeatKey, reservation_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;
    use cambus_shared::Seat;
    use chrono::{Duration, Utc};

    fn open_schedule(ledger: &SeatLedger, seats: u16, sellable: u32) -> (Schedule, Vec<Seat>) {
        let bus_id = Uuid::new_v4();
        let seats = Seat::layout(bus_id, seats, 0);
        let departure = Utc::now() + Duration::days(1);
        let schedule = Schedule::new(
            Uuid::new_v4(),
            bus_id,
            departure,
            departure + Duration::hours(5),
            6_000,
            sellable,
        );
        ledger.open(&schedule, seats.iter().map(|s| s.id));
        (schedule, seats)
    }

    #[test]
    fn test_hold_lifecycle() {
        let ledger = SeatLedger::new();
        let (schedule, seats) = open_schedule(&ledger, 3, 3);
        let key = SeatKey::new(schedule.id, seats[0].id);

        // Acquire
        let token = ledger.try_acquire(key, Uuid::new_v4()).unwrap();
        assert_eq!(ledger.available_seats(&schedule.id), Some(2));
        assert_eq!(ledger.seat_state(key), SeatState::Held);

        // Commit keeps the counter
        ledger.commit(&token).unwrap();
        assert_eq!(ledger.available_seats(&schedule.id), Some(2));
        assert_eq!(ledger.seat_state(key), SeatState::Booked);

        // Release from booked gives the seat back
        ledger.release(&token).unwrap();
        assert_eq!(ledger.available_seats(&schedule.id), Some(3));
        assert!(ledger.is_free(key));

        let utilization = ledger.utilization(&schedule.id).unwrap();
        assert!(utilization.abs() < f64::EPSILON);
    }

    #[test]
    fn test_second_acquire_rejected() {
        let ledger = SeatLedger::new();
        let (schedule, seats) = open_schedule(&ledger, 2, 2);
        let key = SeatKey::new(schedule.id, seats[1].id);

        ledger.try_acquire(key, Uuid::new_v4()).unwrap();
        let err = ledger.try_acquire(key, Uuid::new_v4()).unwrap_err();

        assert!(matches!(err, LedgerError::SeatTaken(k) if k == key));
        assert_eq!(ledger.available_seats(&schedule.id), Some(1));
    }

    #[test]
    fn test_counter_zero_rejects_free_seat() {
        let ledger = SeatLedger::new();
        // Three physical seats but only one sellable
        let (schedule, seats) = open_schedule(&ledger, 3, 1);

        ledger
            .try_acquire(SeatKey::new(schedule.id, seats[0].id), Uuid::new_v4())
            .unwrap();
        let err = ledger
            .try_acquire(SeatKey::new(schedule.id, seats[1].id), Uuid::new_v4())
            .unwrap_err();

        assert!(matches!(err, LedgerError::SoldOut(_)));
        assert_eq!(ledger.available_seats(&schedule.id), Some(0));
    }

    #[test]
    fn test_stale_token_cannot_release_new_holder() {
        let ledger = SeatLedger::new();
        let (schedule, seats) = open_schedule(&ledger, 1, 1);
        let key = SeatKey::new(schedule.id, seats[0].id);

        let first = ledger.try_acquire(key, Uuid::new_v4()).unwrap();
        ledger.release(&first).unwrap();
        let _second = ledger.try_acquire(key, Uuid::new_v4()).unwrap();

        assert!(matches!(ledger.release(&first), Err(LedgerError::HoldMismatch { .. })));
        assert!(matches!(ledger.commit(&first), Err(LedgerError::HoldMismatch { .. })));
        assert_eq!(ledger.seat_state(key), SeatState::Held);
        assert_eq!(ledger.available_seats(&schedule.id), Some(0));
    }

    #[test]
    fn test_unknown_seat_and_unopened_schedule() {
        let ledger = SeatLedger::new();
        let (schedule, _) = open_schedule(&ledger, 2, 2);

        let stray = SeatKey::new(schedule.id, Uuid::new_v4());
        assert!(matches!(ledger.try_acquire(stray, Uuid::new_v4()), Err(LedgerError::UnknownSeat(_))));

        let unopened = SeatKey::new(Uuid::new_v4(), Uuid::new_v4());
        assert!(matches!(
            ledger.try_acquire(unopened, Uuid::new_v4()),
            Err(LedgerError::ScheduleNotOpen(_))
        ));
        assert!(ledger.is_free(unopened));
    }

    #[test]
    fn test_open_is_idempotent() {
        let ledger = SeatLedger::new();
        let (schedule, seats) = open_schedule(&ledger, 2, 2);
        ledger
            .try_acquire(SeatKey::new(schedule.id, seats[0].id), Uuid::new_v4())
            .unwrap();

        assert!(!ledger.open(&schedule, seats.iter().map(|s| s.id)));
        assert_eq!(ledger.available_seats(&schedule.id), Some(1));
        assert_eq!(ledger.occupied(&schedule.id).len(), 1);
    }

    #[test]
    fn test_concurrent_acquire_single_winner() {
        let ledger = Arc::new(SeatLedger::new());
        let (schedule, seats) = open_schedule(&ledger, 1, 1);
        let key = SeatKey::new(schedule.id, seats[0].id);

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || ledger.try_acquire(key, Uuid::new_v4()).is_ok())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(ledger.available_seats(&schedule.id), Some(0));
    }
}

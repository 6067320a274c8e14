use crate::locks::SeatLocks;
use cambus_catalog::{AvailabilityQuery, SeatLedger};
use cambus_core::{Clock, ReservationStore, ScheduleStore};
use cambus_shared::BookingEvent;
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Shared handles every booking component works against.
#[derive(Clone)]
pub struct BookingContext {
    pub schedules: Arc<dyn ScheduleStore>,
    pub reservations: Arc<dyn ReservationStore>,
    pub ledger: Arc<SeatLedger>,
    pub locks: Arc<SeatLocks>,
    pub clock: Arc<dyn Clock>,
    events: broadcast::Sender<BookingEvent>,
}

impl BookingContext {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        reservations: Arc<dyn ReservationStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            schedules,
            reservations,
            ledger: Arc::new(SeatLedger::new()),
            locks: Arc::new(SeatLocks::new()),
            clock,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BookingEvent> {
        self.events.subscribe()
    }

    pub fn availability(&self) -> AvailabilityQuery {
        AvailabilityQuery::new(self.schedules.clone(), self.ledger.clone())
    }

    pub(crate) fn publish(&self, event: BookingEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

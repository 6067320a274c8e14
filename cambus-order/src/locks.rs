use cambus_shared::SeatKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per (schedule, seat). Every status change of a reservation
/// happens while its seat's guard is held.
#[derive(Default)]
pub struct SeatLocks {
    table: Mutex<HashMap<SeatKey, Arc<AsyncMutex<()>>>>,
}

impl SeatLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: SeatKey) -> OwnedMutexGuard<()> {
        self.entry(key).lock_owned().await
    }

    /// `None` when someone else is working on the seat.
    pub fn try_lock(&self, key: SeatKey) -> Option<OwnedMutexGuard<()>> {
        self.entry(key).try_lock_owned().ok()
    }

    /// Drop entries nobody holds or waits on.
    pub fn prune(&self) -> usize {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let before = table.len();
        table.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - table.len()
    }

    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, key: SeatKey) -> Arc<AsyncMutex<()>> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.entry(key).or_default().clone()
    }
}

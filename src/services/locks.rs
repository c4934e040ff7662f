use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Key = (i64, i64);
type Slots = DashMap<Key, Arc<Mutex<()>>>;

/// Per-(medicine, location) async locks.
///
/// Every read-then-write over one batch set runs while holding the slot for
/// its key, so two reductions against the same shelf never interleave inside
/// this process. Row locks taken by the transaction cover other processes.
/// A slot lives only while some task holds or waits on it.
#[derive(Clone, Default)]
pub struct StockLocks {
    slots: Arc<Slots>,
}

/// Held for the duration of one mutation. Dropping it releases the key and
/// removes the slot when nobody else is queued on it.
pub struct StockLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    slots: Arc<Slots>,
    key: Key,
}

impl StockLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, medicine_id: i64, location_id: i64) -> StockLockGuard {
        let key = (medicine_id, location_id);
        let slot = self
            .slots
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        StockLockGuard {
            guard: Some(slot.lock_owned().await),
            slots: self.slots.clone(),
            key,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Drop for StockLockGuard {
    fn drop(&mut self) {
        // The owned guard keeps its own Arc to the mutex; release it first so
        // the map entry is the only reference left when the slot is idle.
        self.guard.take();
        self.slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

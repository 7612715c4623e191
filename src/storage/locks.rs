//! Per-entity exclusive locks.
//!
//! One mutex per key (account id, request id, ...), created on first use.
//! Two different keys never contend; callers that need several keys must
//! take them through [`EntityLocks::slots`], which returns them in sorted
//! order so concurrent multi-key lockers cannot deadlock.
//!
//! Idle slots are dropped once the table grows past a high-water mark, so
//! the table tracks live contention rather than every key ever seen.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

pub type Slot = Arc<Mutex<()>>;

const MIN_HIGH_WATER: usize = 1_024;

#[derive(Debug)]
pub struct EntityLocks {
    slots: DashMap<String, Slot>,
    high_water: AtomicUsize,
}

impl Default for EntityLocks {
    fn default() -> Self {
        Self::with_high_water(MIN_HIGH_WATER)
    }
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_high_water(high_water: usize) -> Self {
        Self {
            slots: DashMap::new(),
            high_water: AtomicUsize::new(high_water.max(1)),
        }
    }

    /// The lock slot for `key`. Hold `slot.lock()` for the critical section.
    pub fn slot(&self, key: &str) -> Slot {
        if let Some(slot) = self.slots.get(key) {
            return slot.clone();
        }
        if self.slots.len() >= self.high_water.load(Ordering::Relaxed) {
            self.prune();
        }
        self.slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop every slot nobody holds. A slot handed out by [`slot`] stays
    /// referenced until its caller lets go, so it is never pruned while
    /// locked or about to be locked.
    ///
    /// [`slot`]: EntityLocks::slot
    pub fn prune(&self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        let live = self.slots.len();
        let floor = self.high_water.load(Ordering::Relaxed).min(MIN_HIGH_WATER);
        self.high_water
            .store(live.saturating_mul(2).max(floor), Ordering::Relaxed);
        before - live
    }

    /// Slots for several keys, deduplicated and in ascending key order.
    pub fn slots<'a, I>(&self, keys: I) -> Vec<Slot>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut keys: Vec<&str> = keys.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();
        keys.into_iter().map(|k| self.slot(k)).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

//! Object id allocation.
//!
//! World object ids are shared by NPCs, ground items, inventory items and
//! companions. Warehouse temp ids live in their own high range so they can
//! never collide with a real object.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// First world object id handed out.
pub const OBJECT_ID_BASE: u32 = 200_000_000;
/// First transient warehouse id.
pub const TEMP_ID_BASE: u32 = 1_800_000_000;

#[derive(Debug)]
pub struct IdAllocator {
    next_object: AtomicU32,
    next_temp: AtomicU32,
    temp_live: Mutex<HashSet<u32>>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next_object: AtomicU32::new(OBJECT_ID_BASE),
            next_temp: AtomicU32::new(TEMP_ID_BASE),
            temp_live: Mutex::new(HashSet::new()),
        }
    }

    /// Continue numbering after the highest id already persisted.
    pub fn seed_objects(&self, max_persisted: u32) {
        let floor = max_persisted.saturating_add(1).max(OBJECT_ID_BASE);
        self.next_object.fetch_max(floor, Ordering::AcqRel);
    }

    pub fn next_object(&self) -> u32 {
        self.next_object.fetch_add(1, Ordering::AcqRel)
    }

    /// A warehouse id valid until released.
    pub fn next_temp(&self) -> u32 {
        let mut id = self.next_temp.fetch_add(1, Ordering::AcqRel);
        if id < TEMP_ID_BASE {
            self.next_temp.store(TEMP_ID_BASE + 1, Ordering::Release);
            id = TEMP_ID_BASE;
        }
        self.temp_live.lock().unwrap_or_else(|e| e.into_inner()).insert(id);
        id
    }

    pub fn release_temp(&self, ids: impl IntoIterator<Item = u32>) {
        let mut live = self.temp_live.lock().unwrap_or_else(|e| e.into_inner());
        for id in ids {
            live.remove(&id);
        }
    }

    pub fn live_temp_count(&self) -> usize {
        self.temp_live.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

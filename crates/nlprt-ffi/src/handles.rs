//! Id-indexed tables of live models.
//!
//! C callers hold plain `u64` ids instead of pointers. Ids start at 1 and
//! are never reused, so a freed or forged id is rejected instead of
//! touching released memory. Lookups hand out an `Arc`, which keeps a model
//! alive until in-flight predictions finish even if it is freed meanwhile.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{FfiError, Result};

pub struct HandleTable<T> {
    inner: Mutex<Slots<T>>,
}

struct Slots<T> {
    next_id: u64,
    live: HashMap<u64, Arc<T>>,
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Slots {
                next_id: 1,
                live: HashMap::new(),
            }),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Slots<T>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `model` and return its id.
    pub fn insert(&self, model: T) -> u64 {
        let mut slots = self.slots();
        let id = slots.next_id;
        slots.next_id += 1;
        slots.live.insert(id, Arc::new(model));
        id
    }

    pub fn get(&self, id: u64) -> Result<Arc<T>> {
        self.slots()
            .live
            .get(&id)
            .cloned()
            .ok_or(FfiError::UnknownHandle(id))
    }

    /// Drop the table's reference. Returns whether `id` was live.
    pub fn remove(&self, id: u64) -> bool {
        self.slots().live.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots().live.len()
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

//! Invalidation: mark entries outdated and refresh the ones in use.
//!
//! An observed entry moves to `Pending` and gets a fresh request, scheduled
//! before the call returns. A fetch already in flight may predate the
//! mutation, so it is superseded and its response discarded, unless an
//! earlier invalidation started it; that one is joined. An entry nobody
//! observes is only flagged stale, so the next mount refetches it and no
//! request goes out now. Keys without an entry are ignored.

use std::sync::Arc;

use tracing::{debug, trace};

use super::{CacheKey, Inner, QueryCache, Slot};

impl QueryCache {
    pub fn invalidate<'a>(&self, keys: impl IntoIterator<Item = &'a CacheKey>) {
        let mut slots = self.inner.slots.lock();
        for key in keys {
            match slots.get_mut(key) {
                Some(slot) => self.inner.invalidate_slot(key, slot),
                None => trace!(key = %key, "invalidate: no entry"),
            }
        }
    }

    pub fn invalidate_where(&self, predicate: impl Fn(&CacheKey) -> bool) {
        let mut slots = self.inner.slots.lock();
        for (key, slot) in slots.iter_mut().filter(|(key, _)| predicate(key)) {
            self.inner.invalidate_slot(key, slot);
        }
    }

    /// Every entry for `path`, whatever its notify flag.
    pub fn invalidate_path(&self, path: &str) {
        self.invalidate_where(|key| key.path() == path);
    }

    pub fn invalidate_all(&self) {
        self.invalidate_where(|_| true);
    }
}

impl Inner {
    fn invalidate_slot(self: &Arc<Self>, key: &CacheKey, slot: &mut Slot) {
        if slot.observers == 0 {
            slot.invalidated = true;
            debug!(key = %key, "invalidated without observers, marked stale");
        } else if slot.in_flight.is_some() && slot.invalidation_fetch {
            debug!(key = %key, "invalidated again, joining in-flight request");
        } else {
            self.spawn_fetch(key, slot);
            slot.invalidation_fetch = true;
        }
    }
}

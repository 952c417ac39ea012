use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::watch;

use super::{CacheEntry, CacheKey, Inner};

/// A mounted consumer of one cache key.
///
/// Keeps the entry alive and its refetch timer running. Dropping the last
/// observer of a key cancels the timer and starts the eviction countdown.
pub struct QueryObserver {
    key: CacheKey,
    receiver: watch::Receiver<CacheEntry>,
    cache: Arc<Inner>,
}

impl QueryObserver {
    pub(super) fn new(key: CacheKey, receiver: watch::Receiver<CacheEntry>, cache: Arc<Inner>) -> Self {
        Self { key, receiver, cache }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn current(&self) -> CacheEntry {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change. `None` once the entry has been torn down.
    pub async fn changed(&mut self) -> Option<CacheEntry> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Wait until the entry is `Success` or `Error` and return that snapshot.
    /// Returns immediately when it already is.
    pub async fn settled(&mut self) -> CacheEntry {
        let settled = self
            .receiver
            .wait_for(|entry| entry.status.is_settled())
            .await
            .map(|entry| (*entry).clone());
        settled.unwrap_or_else(|_| self.current())
    }

    pub fn data_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.receiver.borrow().data_as()
    }
}

impl Drop for QueryObserver {
    fn drop(&mut self) {
        self.cache.release(&self.key);
    }
}

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Created, no fetch started yet.
    Idle,
    /// A fetch is in flight. Earlier `data`/`error` stay readable.
    Pending,
    Success,
    Error,
}

impl QueryStatus {
    pub fn is_settled(self) -> bool {
        matches!(self, QueryStatus::Success | QueryStatus::Error)
    }
}

/// Snapshot of one cache entry as observers see it.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub data: Option<Value>,
    pub status: QueryStatus,
    pub error: Option<ApiError>,
    pub last_fetched_at: Option<Instant>,
    pub refetch_interval: Option<Duration>,
    /// Retries left for the current (or last) fetch.
    pub retry_budget: u32,
    /// `data` carries a local patch the server has not confirmed yet.
    pub optimistic: bool,
}

impl CacheEntry {
    pub(crate) fn new(retry_budget: u32) -> Self {
        Self {
            data: None,
            status: QueryStatus::Idle,
            error: None,
            last_fetched_at: None,
            refetch_interval: None,
            retry_budget,
            optimistic: false,
        }
    }

    pub fn is_stale(&self, stale_time: Duration, now: Instant) -> bool {
        self.last_fetched_at
            .map_or(true, |at| now.saturating_duration_since(at) >= stale_time)
    }

    /// Decode `data` into a typed view model.
    pub fn data_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.data
            .as_ref()
            .and_then(|data| serde_json::from_value(data.clone()).ok())
    }
}

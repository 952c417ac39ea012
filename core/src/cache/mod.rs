//! Key-addressed query cache with stale-while-revalidate semantics.
//!
//! # Design
//! One `Slot` per `CacheKey` holds a `watch` channel carrying the current
//! `CacheEntry`, so any number of observers read the same snapshot and are
//! woken on change. All slot state lives behind a single mutex that is never
//! held across an `.await`; fetches, interval timers and eviction timers run
//! as spawned tasks holding only a `Weak` reference back to the cache.
//!
//! At most one request per key is in flight. Each request gets a
//! process-unique id and a completion only lands if its id is still the
//! key's current request, so a superseded response can never overwrite a
//! newer one.

mod entry;
mod fetcher;
mod invalidate;
mod key;
mod observer;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::config::Mode;
use crate::error::{ApiError, ApiResult};

pub use entry::{CacheEntry, QueryStatus};
pub use fetcher::Fetcher;
pub use key::CacheKey;
pub use observer::QueryObserver;

/// Decides whether a failed fetch may be retried. `false` makes the error
/// terminal.
pub type RetryPredicate = fn(&ApiError) -> bool;

const DEFAULT_GC_TIME: Duration = Duration::from_secs(5 * 60);

/// Cache-wide defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Retries after a failed fetch when the observer does not say otherwise.
    pub retry_count: u32,
    /// How long a successful result counts as fresh for newly mounted observers.
    pub stale_time: Duration,
    /// How long an unobserved entry is kept before eviction.
    pub gc_time: Duration,
    pub refetch_on_focus: bool,
    pub refetch_on_reconnect: bool,
}

impl CacheConfig {
    pub fn for_mode(mode: Mode) -> Self {
        Self {
            retry_count: mode.default_retry_count(),
            stale_time: Duration::ZERO,
            gc_time: DEFAULT_GC_TIME,
            refetch_on_focus: true,
            refetch_on_reconnect: true,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::for_mode(Mode::default())
    }
}

/// Per-observer options.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    pub refetch_interval: Option<Duration>,
    pub retry_count: Option<u32>,
    pub retry_if: Option<RetryPredicate>,
}

impl QueryOptions {
    pub fn refetch_every(mut self, interval: Duration) -> Self {
        self.refetch_interval = Some(interval);
        self
    }

    pub fn retries(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn retry_if(mut self, predicate: RetryPredicate) -> Self {
        self.retry_if = Some(predicate);
        self
    }
}

/// Changes in the host environment that make cached data suspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentEvent {
    Focus,
    Reconnect,
}

/// Shared handle to one cache instance. Clones refer to the same cache.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    fetcher: Arc<dyn Fetcher>,
    config: CacheConfig,
    runtime: Handle,
    slots: Mutex<HashMap<CacheKey, Slot>>,
    request_seq: AtomicU64,
}

struct Slot {
    state: watch::Sender<CacheEntry>,
    observers: usize,
    retry_count: u32,
    retry_if: Option<RetryPredicate>,
    /// Invalidated while unobserved; the next mount must refetch.
    invalidated: bool,
    in_flight: Option<u64>,
    /// The in-flight request was started by an invalidation.
    invalidation_fetch: bool,
    fetch_task: Option<JoinHandle<()>>,
    interval_task: Option<JoinHandle<()>>,
    gc_task: Option<JoinHandle<()>>,
}

impl Slot {
    fn new(retry_count: u32) -> Self {
        let (state, _) = watch::channel(CacheEntry::new(retry_count));
        Self {
            state,
            observers: 0,
            retry_count,
            retry_if: None,
            invalidated: false,
            in_flight: None,
            invalidation_fetch: false,
            fetch_task: None,
            interval_task: None,
            gc_task: None,
        }
    }

    fn abort_tasks(&mut self) {
        for task in [self.fetch_task.take(), self.interval_task.take(), self.gc_task.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}

impl QueryCache {
    /// Create a cache whose background work runs on the current Tokio runtime.
    ///
    /// # Panics
    /// When called outside a Tokio runtime; use `with_runtime` there.
    pub fn new(fetcher: Arc<dyn Fetcher>, config: CacheConfig) -> Self {
        Self::with_runtime(fetcher, config, Handle::current())
    }

    pub fn with_runtime(fetcher: Arc<dyn Fetcher>, config: CacheConfig, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                config,
                runtime,
                slots: Mutex::new(HashMap::new()),
                request_seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// Mount an observer on `key`, fetching when the entry is new, stale or
    /// invalidated and nothing is in flight yet.
    pub fn ensure(&self, key: CacheKey, options: QueryOptions) -> QueryObserver {
        let inner = &self.inner;
        let mut slots = inner.slots.lock();
        let slot = slots
            .entry(key.clone())
            .or_insert_with(|| Slot::new(inner.config.retry_count));

        slot.observers += 1;
        if let Some(task) = slot.gc_task.take() {
            task.abort();
        }
        slot.retry_count = options.retry_count.unwrap_or(inner.config.retry_count);
        if options.retry_if.is_some() {
            slot.retry_if = options.retry_if;
        }
        let receiver = slot.state.subscribe();

        let needs_fetch = slot.in_flight.is_none() && {
            let entry = slot.state.borrow();
            slot.invalidated
                || entry.status == QueryStatus::Idle
                || entry.is_stale(inner.config.stale_time, Instant::now())
        };
        if needs_fetch {
            inner.spawn_fetch(&key, slot);
        }

        if let Some(period) = options.refetch_interval.filter(|period| !period.is_zero()) {
            let current = slot.state.borrow().refetch_interval;
            let restart = slot.interval_task.is_none() || current.is_some_and(|current| period < current);
            if restart {
                if let Some(task) = slot.interval_task.take() {
                    task.abort();
                }
                slot.state.send_modify(|entry| entry.refetch_interval = Some(period));
                slot.interval_task = Some(inner.spawn_interval(&key, period));
            }
        }
        drop(slots);

        QueryObserver::new(key, receiver, Arc::clone(inner))
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.inner
            .slots
            .lock()
            .get(key)
            .map(|slot| slot.state.borrow().clone())
    }

    /// Start a new request for `key` even if one is in flight; the older
    /// response will be discarded. Returns `false` when there is no entry.
    pub fn refetch(&self, key: &CacheKey) -> bool {
        let mut slots = self.inner.slots.lock();
        match slots.get_mut(key) {
            Some(slot) => {
                self.inner.spawn_fetch(key, slot);
                true
            }
            None => false,
        }
    }

    /// Refetch every observed entry that is stale and idle.
    pub fn environment_changed(&self, event: EnvironmentEvent) {
        let config = &self.inner.config;
        let enabled = match event {
            EnvironmentEvent::Focus => config.refetch_on_focus,
            EnvironmentEvent::Reconnect => config.refetch_on_reconnect,
        };
        if !enabled {
            return;
        }

        let now = Instant::now();
        let mut slots = self.inner.slots.lock();
        for (key, slot) in slots.iter_mut() {
            if slot.observers == 0 || slot.in_flight.is_some() {
                continue;
            }
            let stale = slot.invalidated || slot.state.borrow().is_stale(config.stale_time, now);
            if stale {
                debug!(key = %key, ?event, "environment changed, refetching");
                self.inner.spawn_fetch(key, slot);
            }
        }
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<_> = self.inner.slots.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn observer_count(&self, key: &CacheKey) -> usize {
        self.inner
            .slots
            .lock()
            .get(key)
            .map_or(0, |slot| slot.observers)
    }

    pub fn len(&self) -> usize {
        self.inner.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Abort all timers and in-flight work and drop every entry. Observers
    /// still alive keep their last snapshot; their `changed()` returns `None`.
    pub fn teardown(&self) {
        let mut slots = self.inner.slots.lock();
        for (_, mut slot) in slots.drain() {
            slot.abort_tasks();
        }
        debug!("query cache torn down");
    }

    /// Patch cached data in place without a fetch. `patch` returns whether it
    /// changed the value; touched entries are flagged `optimistic` until their
    /// next successful fetch replaces the data. Returns the touched keys.
    pub(crate) fn apply_optimistic(&self, mut patch: impl FnMut(&mut Value) -> bool) -> Vec<CacheKey> {
        let slots = self.inner.slots.lock();
        let mut touched = Vec::new();
        for (key, slot) in slots.iter() {
            let changed = slot.state.send_if_modified(|entry| {
                let hit = entry.data.as_mut().is_some_and(|data| patch(data));
                if hit {
                    entry.optimistic = true;
                }
                hit
            });
            if changed {
                touched.push(key.clone());
            }
        }
        touched.sort();
        touched
    }
}

impl Inner {
    fn spawn_fetch(self: &Arc<Self>, key: &CacheKey, slot: &mut Slot) {
        let id = self.request_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let retries = slot.retry_count;
        let retry_if = slot.retry_if;
        slot.in_flight = Some(id);
        slot.invalidation_fetch = false;
        slot.invalidated = false;
        slot.state.send_modify(|entry| {
            entry.status = QueryStatus::Pending;
            entry.retry_budget = retries;
        });
        debug!(key = %key, request = id, "fetch started");

        let weak = Arc::downgrade(self);
        let fetcher = Arc::clone(&self.fetcher);
        let key = key.clone();
        slot.fetch_task = Some(self.runtime.spawn(async move {
            let mut attempt = 0;
            let result = loop {
                match fetcher.fetch(&key).await {
                    Ok(data) => break Ok(data),
                    Err(err) if attempt < retries && retry_if.map_or(true, |retryable| retryable(&err)) => {
                        attempt += 1;
                        warn!(key = %key, request = id, attempt, code = err.code(), "fetch failed, retrying");
                        let Some(inner) = weak.upgrade() else { return };
                        if !inner.note_retry(&key, id, retries - attempt) {
                            return;
                        }
                    }
                    Err(err) => break Err(err),
                }
            };
            if let Some(inner) = weak.upgrade() {
                inner.complete(&key, id, result);
            }
        }));
    }

    /// Record a spent retry. `false` when the request was superseded or the
    /// entry is gone, which stops further attempts.
    fn note_retry(&self, key: &CacheKey, id: u64, remaining: u32) -> bool {
        let slots = self.slots.lock();
        match slots.get(key) {
            Some(slot) if slot.in_flight == Some(id) => {
                slot.state.send_modify(|entry| entry.retry_budget = remaining);
                true
            }
            _ => false,
        }
    }

    fn complete(self: &Arc<Self>, key: &CacheKey, id: u64, result: ApiResult<Value>) {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(key) else {
            debug!(key = %key, request = id, "response for evicted entry dropped");
            return;
        };
        if slot.in_flight != Some(id) {
            debug!(key = %key, request = id, "superseded response discarded");
            return;
        }
        slot.in_flight = None;
        slot.invalidation_fetch = false;
        slot.fetch_task = None;

        match result {
            Ok(data) => {
                debug!(key = %key, request = id, "fetch succeeded");
                slot.state.send_modify(|entry| {
                    entry.data = Some(data);
                    entry.error = None;
                    entry.status = QueryStatus::Success;
                    entry.last_fetched_at = Some(Instant::now());
                    entry.optimistic = false;
                });
            }
            Err(err) => {
                debug!(key = %key, request = id, code = err.code(), "fetch failed");
                slot.state.send_modify(|entry| {
                    entry.error = Some(err);
                    entry.status = QueryStatus::Error;
                });
            }
        }

        if slot.observers == 0 && self.schedule_gc(key, slot) {
            slots.remove(key);
        }
    }

    fn release(self: &Arc<Self>, key: &CacheKey) {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(key) else {
            return;
        };
        slot.observers = slot.observers.saturating_sub(1);
        if slot.observers > 0 {
            return;
        }
        if let Some(task) = slot.interval_task.take() {
            task.abort();
        }
        slot.state.send_modify(|entry| entry.refetch_interval = None);
        if slot.in_flight.is_none() && self.schedule_gc(key, slot) {
            slots.remove(key);
        }
    }

    /// Arm the eviction timer. Returns `true` when the entry should go now.
    fn schedule_gc(self: &Arc<Self>, key: &CacheKey, slot: &mut Slot) -> bool {
        let delay = self.config.gc_time;
        if delay.is_zero() {
            debug!(key = %key, "entry evicted");
            return true;
        }
        if let Some(task) = slot.gc_task.take() {
            task.abort();
        }
        let weak = Arc::downgrade(self);
        let key = key.clone();
        slot.gc_task = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.collect(&key);
            }
        }));
        false
    }

    fn collect(&self, key: &CacheKey) {
        let mut slots = self.slots.lock();
        let idle = slots
            .get(key)
            .is_some_and(|slot| slot.observers == 0 && slot.in_flight.is_none());
        if idle {
            slots.remove(key);
            debug!(key = %key, "entry evicted");
        }
    }

    fn spawn_interval(self: &Arc<Self>, key: &CacheKey, period: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let key = key.clone();
        self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                inner.refetch_on_tick(&key);
            }
        })
    }

    fn refetch_on_tick(self: &Arc<Self>, key: &CacheKey) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(key) {
            if slot.observers > 0 && slot.in_flight.is_none() {
                debug!(key = %key, "interval refetch");
                self.spawn_fetch(key, slot);
            }
        }
    }
}

//! Query cache behaviour against a scripted fetcher.
//!
//! Every test runs on a paused clock, so fetch latency, refetch intervals and
//! eviction timers advance deterministically whenever the test sleeps.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use feed_core::{
    ApiError, ApiResult, CacheConfig, CacheKey, EnvironmentEvent, Fetcher, Mode, Payload, QueryCache, QueryOptions,
    QueryStatus,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::sleep;

/// Replays queued replies in call order; answers `{"call": n}` immediately
/// once the queue is empty.
#[derive(Default)]
struct Scripted {
    calls: Mutex<Vec<CacheKey>>,
    replies: Mutex<VecDeque<(Duration, ApiResult<Value>)>>,
}

impl Scripted {
    fn push(&self, delay: Duration, reply: ApiResult<Value>) {
        self.replies.lock().push_back((delay, reply));
    }

    fn calls(&self, key: &CacheKey) -> usize {
        self.calls.lock().iter().filter(|called| *called == key).count()
    }
}

#[async_trait]
impl Fetcher for Scripted {
    async fn fetch(&self, key: &CacheKey) -> ApiResult<Value> {
        let n = {
            let mut calls = self.calls.lock();
            calls.push(key.clone());
            calls.len()
        };
        let next = self.replies.lock().pop_front();
        match next {
            Some((delay, reply)) => {
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                reply
            }
            None => Ok(json!({ "call": n })),
        }
    }
}

/// Reads the server's like count when the request goes out and answers two
/// seconds later, like a slow GET racing a mutation.
#[derive(Default)]
struct SlowCounter {
    likes: AtomicU64,
    fetches: AtomicUsize,
}

#[async_trait]
impl Fetcher for SlowCounter {
    async fn fetch(&self, _key: &CacheKey) -> ApiResult<Value> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let likes = self.likes.load(Ordering::SeqCst);
        sleep(Duration::from_secs(2)).await;
        Ok(json!({ "likes": likes }))
    }
}

fn dev_config() -> CacheConfig {
    CacheConfig::for_mode(Mode::Development)
}

fn cache_with(config: CacheConfig) -> (QueryCache, Arc<Scripted>) {
    let fetcher = Arc::new(Scripted::default());
    let cache = QueryCache::new(fetcher.clone(), config);
    (cache, fetcher)
}

fn not_found() -> ApiError {
    ApiError::from_response(
        404,
        Payload::Json(json!({"code": "NOT_FOUND", "message": "Post not found", "details": null})),
    )
}

fn server_error() -> ApiError {
    ApiError::from_response(500, Payload::Text(String::new()))
}

const SECOND: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Fetching
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn concurrent_observers_share_one_fetch() {
    let (cache, fetcher) = cache_with(dev_config());
    let key = CacheKey::new("/posts");
    fetcher.push(SECOND, Ok(json!(["a"])));

    let mut first = cache.ensure(key.clone(), QueryOptions::default());
    let mut second = cache.ensure(key.clone(), QueryOptions::default());
    sleep(Duration::from_millis(500)).await;
    let mut third = cache.ensure(key.clone(), QueryOptions::default());
    assert_eq!(cache.observer_count(&key), 3);

    for observer in [&mut first, &mut second, &mut third] {
        let entry = observer.settled().await;
        assert_eq!(entry.status, QueryStatus::Success);
        assert_eq!(entry.data, Some(json!(["a"])));
    }
    assert_eq!(fetcher.calls(&key), 1);
}

#[tokio::test(start_paused = true)]
async fn new_entry_is_pending_until_first_result() {
    let (cache, fetcher) = cache_with(dev_config());
    fetcher.push(SECOND, Ok(json!({"id": 1})));

    let mut observer = cache.ensure(CacheKey::new("/account"), QueryOptions::default());
    let entry = observer.current();
    assert_eq!(entry.status, QueryStatus::Pending);
    assert!(entry.data.is_none());

    let entry = observer.settled().await;
    assert_eq!(entry.status, QueryStatus::Success);
    assert!(entry.last_fetched_at.is_some());
    assert!(entry.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn same_path_with_different_notify_flag_is_a_separate_entry() {
    let (cache, fetcher) = cache_with(dev_config());
    let silent = CacheKey::new("/users/ana");
    let loud = CacheKey::notifying("/users/ana");

    let mut a = cache.ensure(silent.clone(), QueryOptions::default());
    let mut b = cache.ensure(loud.clone(), QueryOptions::default());
    a.settled().await;
    b.settled().await;

    assert_eq!(cache.len(), 2);
    assert_eq!(fetcher.calls(&silent), 1);
    assert_eq!(fetcher.calls(&loud), 1);
}

#[tokio::test(start_paused = true)]
async fn fresh_entry_is_not_refetched_on_mount() {
    let mut config = dev_config();
    config.stale_time = Duration::from_secs(60);
    let (cache, fetcher) = cache_with(config);
    let key = CacheKey::new("/users");

    let mut first = cache.ensure(key.clone(), QueryOptions::default());
    first.settled().await;
    let second = cache.ensure(key.clone(), QueryOptions::default());
    assert_eq!(second.current().status, QueryStatus::Success);
    sleep(SECOND).await;
    assert_eq!(fetcher.calls(&key), 1);

    sleep(Duration::from_secs(60)).await;
    let mut third = cache.ensure(key.clone(), QueryOptions::default());
    third.settled().await;
    assert_eq!(fetcher.calls(&key), 2);
}

#[tokio::test(start_paused = true)]
async fn stale_entry_is_refetched_on_mount() {
    let (cache, fetcher) = cache_with(dev_config());
    let key = CacheKey::new("/users");

    let mut first = cache.ensure(key.clone(), QueryOptions::default());
    first.settled().await;
    let mut second = cache.ensure(key.clone(), QueryOptions::default());
    let entry = second.settled().await;
    assert_eq!(entry.data, Some(json!({"call": 2})));
    assert_eq!(fetcher.calls(&key), 2);
}

// ---------------------------------------------------------------------------
// Retries
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn retries_are_spent_then_error_is_kept() {
    let mut config = dev_config();
    config.retry_count = 2;
    let (cache, fetcher) = cache_with(config);
    let key = CacheKey::new("/posts");
    for _ in 0..3 {
        fetcher.push(Duration::ZERO, Err(server_error()));
    }

    let mut observer = cache.ensure(key.clone(), QueryOptions::default());
    let entry = observer.settled().await;
    assert_eq!(entry.status, QueryStatus::Error);
    assert_eq!(entry.error.unwrap().code(), "INTERNAL_SERVER_ERROR");
    assert_eq!(entry.retry_budget, 0);
    assert_eq!(fetcher.calls(&key), 3);
}

#[tokio::test(start_paused = true)]
async fn retry_that_succeeds_clears_the_error() {
    let (cache, fetcher) = cache_with(CacheConfig::default());
    let key = CacheKey::new("/posts");
    fetcher.push(Duration::ZERO, Err(server_error()));
    fetcher.push(Duration::ZERO, Ok(json!([])));

    let mut observer = cache.ensure(key.clone(), QueryOptions::default());
    let entry = observer.settled().await;
    assert_eq!(entry.status, QueryStatus::Success);
    assert!(entry.error.is_none());
    assert_eq!(entry.retry_budget, 2);
    assert_eq!(fetcher.calls(&key), 2);
}

#[tokio::test(start_paused = true)]
async fn development_mode_does_not_retry() {
    let (cache, fetcher) = cache_with(dev_config());
    let key = CacheKey::new("/posts");
    fetcher.push(Duration::ZERO, Err(server_error()));

    let mut observer = cache.ensure(key.clone(), QueryOptions::default());
    assert_eq!(observer.settled().await.status, QueryStatus::Error);
    assert_eq!(fetcher.calls(&key), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_predicate_can_make_errors_terminal() {
    let (cache, fetcher) = cache_with(dev_config());
    let key = CacheKey::new("/posts/1");
    fetcher.push(Duration::ZERO, Err(not_found()));

    let options = QueryOptions::default()
        .retries(3)
        .retry_if(|err| err.code() != "NOT_FOUND");
    let mut observer = cache.ensure(key.clone(), options);
    let entry = observer.settled().await;
    assert_eq!(entry.error.unwrap().message(), "Post not found");
    assert_eq!(fetcher.calls(&key), 1);
}

// ---------------------------------------------------------------------------
// Invalidation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn invalidating_unobserved_entry_sends_nothing() {
    let (cache, fetcher) = cache_with(dev_config());
    let key = CacheKey::new("/posts");

    let mut observer = cache.ensure(key.clone(), QueryOptions::default());
    observer.settled().await;
    drop(observer);

    cache.invalidate([&key]);
    sleep(Duration::from_secs(10)).await;
    assert_eq!(fetcher.calls(&key), 1);
    let entry = cache.get(&key).unwrap();
    assert_eq!(entry.status, QueryStatus::Success);
    assert_eq!(entry.data, Some(json!({"call": 1})));

    // The next mount picks the invalidation up.
    let mut observer = cache.ensure(key.clone(), QueryOptions::default());
    observer.settled().await;
    assert_eq!(fetcher.calls(&key), 2);
}

#[tokio::test(start_paused = true)]
async fn invalidating_unknown_key_is_a_no_op() {
    let (cache, _fetcher) = cache_with(dev_config());
    cache.invalidate(&[CacheKey::new("/nowhere")]);
    cache.invalidate_all();
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stale_data_stays_readable_while_revalidating() {
    let (cache, fetcher) = cache_with(dev_config());
    let key = CacheKey::new("/posts");

    let mut observer = cache.ensure(key.clone(), QueryOptions::default());
    observer.settled().await;

    fetcher.push(SECOND, Ok(json!("fresh")));
    cache.invalidate([&key]);
    let entry = observer.current();
    assert_eq!(entry.status, QueryStatus::Pending);
    assert_eq!(entry.data, Some(json!({"call": 1})));

    let entry = observer.settled().await;
    assert_eq!(entry.data, Some(json!("fresh")));
}

#[tokio::test(start_paused = true)]
async fn failed_refetch_keeps_previous_data() {
    let (cache, fetcher) = cache_with(dev_config());
    let key = CacheKey::new("/posts");

    let mut observer = cache.ensure(key.clone(), QueryOptions::default());
    observer.settled().await;

    fetcher.push(Duration::ZERO, Err(server_error()));
    cache.invalidate([&key]);
    let entry = observer.settled().await;
    assert_eq!(entry.status, QueryStatus::Error);
    assert_eq!(entry.data, Some(json!({"call": 1})));
}

#[tokio::test(start_paused = true)]
async fn repeated_invalidation_joins_the_in_flight_fetch() {
    let (cache, fetcher) = cache_with(dev_config());
    let key = CacheKey::new("/posts");

    let mut observer = cache.ensure(key.clone(), QueryOptions::default());
    observer.settled().await;

    fetcher.push(SECOND, Ok(json!("fresh")));
    cache.invalidate([&key]);
    cache.invalidate([&key]);
    cache.invalidate_path("/posts");
    observer.settled().await;
    sleep(Duration::from_secs(5)).await;
    assert_eq!(fetcher.calls(&key), 2);
}

#[tokio::test(start_paused = true)]
async fn invalidation_supersedes_a_fetch_sent_before_the_mutation() {
    let counter = Arc::new(SlowCounter::default());
    let cache = QueryCache::new(counter.clone(), dev_config());
    let key = CacheKey::new("/posts");

    let mut observer = cache.ensure(key.clone(), QueryOptions::default());
    sleep(Duration::from_millis(500)).await;
    counter.likes.store(1, Ordering::SeqCst);
    cache.invalidate([&key]);

    observer.settled().await;
    sleep(Duration::from_secs(10)).await;
    let entry = observer.current();
    assert_eq!(entry.data, Some(json!({"likes": 1})));
    assert_eq!(entry.status, QueryStatus::Success);
    assert_eq!(counter.fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn invalidate_where_only_touches_matching_keys() {
    let (cache, fetcher) = cache_with(dev_config());
    let posts = CacheKey::new("/posts");
    let users = CacheKey::new("/users");

    let mut a = cache.ensure(posts.clone(), QueryOptions::default());
    let mut b = cache.ensure(users.clone(), QueryOptions::default());
    a.settled().await;
    b.settled().await;

    cache.invalidate_where(|key| key.path().starts_with("/posts"));
    a.settled().await;
    sleep(SECOND).await;
    assert_eq!(fetcher.calls(&posts), 2);
    assert_eq!(fetcher.calls(&users), 1);
}

#[tokio::test(start_paused = true)]
async fn forced_refetch_discards_the_superseded_response() {
    let (cache, fetcher) = cache_with(dev_config());
    let key = CacheKey::new("/posts");
    fetcher.push(Duration::from_secs(10), Ok(json!("old")));
    fetcher.push(SECOND, Ok(json!("new")));

    let mut observer = cache.ensure(key.clone(), QueryOptions::default());
    assert!(cache.refetch(&key));
    let entry = observer.settled().await;
    assert_eq!(entry.data, Some(json!("new")));

    // The slow first response lands later and must not win.
    sleep(Duration::from_secs(20)).await;
    let entry = observer.current();
    assert_eq!(entry.data, Some(json!("new")));
    assert_eq!(entry.status, QueryStatus::Success);
    assert_eq!(fetcher.calls(&key), 2);
}

#[tokio::test(start_paused = true)]
async fn refetch_without_entry_reports_false() {
    let (cache, fetcher) = cache_with(dev_config());
    let key = CacheKey::new("/posts");
    assert!(!cache.refetch(&key));
    assert_eq!(fetcher.calls(&key), 0);
}

// ---------------------------------------------------------------------------
// Timers
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn interval_refetches_while_observed() {
    let (cache, fetcher) = cache_with(dev_config());
    let key = CacheKey::new("/posts/1/replies");
    let period = Duration::from_secs(5);

    let mut observer = cache.ensure(key.clone(), QueryOptions::default().refetch_every(period));
    observer.settled().await;
    assert_eq!(observer.current().refetch_interval, Some(period));
    assert_eq!(fetcher.calls(&key), 1);

    sleep(Duration::from_millis(5_500)).await;
    assert_eq!(fetcher.calls(&key), 2);
    sleep(period).await;
    assert_eq!(fetcher.calls(&key), 3);

    drop(observer);
    sleep(Duration::from_secs(30)).await;
    assert_eq!(fetcher.calls(&key), 3);
    assert_eq!(cache.get(&key).unwrap().refetch_interval, None);
}

#[tokio::test(start_paused = true)]
async fn unobserved_entry_is_evicted_after_gc_time() {
    let mut config = dev_config();
    config.gc_time = Duration::from_secs(30);
    let (cache, _fetcher) = cache_with(config);
    let key = CacheKey::new("/users");

    let mut observer = cache.ensure(key.clone(), QueryOptions::default());
    observer.settled().await;
    drop(observer);

    sleep(Duration::from_secs(10)).await;
    assert!(cache.get(&key).is_some());

    // Remounting cancels the countdown.
    let observer = cache.ensure(key.clone(), QueryOptions::default());
    sleep(Duration::from_secs(60)).await;
    assert!(cache.get(&key).is_some());

    drop(observer);
    sleep(Duration::from_secs(31)).await;
    assert!(cache.get(&key).is_none());
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn zero_gc_time_evicts_on_last_release() {
    let mut config = dev_config();
    config.gc_time = Duration::ZERO;
    let (cache, _fetcher) = cache_with(config);
    let key = CacheKey::new("/users");

    let mut first = cache.ensure(key.clone(), QueryOptions::default());
    let second = cache.ensure(key.clone(), QueryOptions::default());
    first.settled().await;

    drop(first);
    assert_eq!(cache.observer_count(&key), 1);
    drop(second);
    assert!(cache.get(&key).is_none());
}

#[tokio::test(start_paused = true)]
async fn teardown_stops_everything() {
    let (cache, fetcher) = cache_with(dev_config());
    let key = CacheKey::new("/posts");

    let mut observer = cache.ensure(key.clone(), QueryOptions::default().refetch_every(Duration::from_secs(5)));
    observer.settled().await;

    cache.teardown();
    assert!(cache.is_empty());
    assert!(observer.changed().await.is_none());
    assert_eq!(observer.current().data, Some(json!({"call": 1})));

    sleep(Duration::from_secs(30)).await;
    assert_eq!(fetcher.calls(&key), 1);
    drop(observer);
}

// ---------------------------------------------------------------------------
// Environment events
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn focus_refetches_observed_stale_entries_only() {
    let (cache, fetcher) = cache_with(dev_config());
    let watched = CacheKey::new("/posts");
    let parked = CacheKey::new("/users");

    let mut observer = cache.ensure(watched.clone(), QueryOptions::default());
    observer.settled().await;
    let mut gone = cache.ensure(parked.clone(), QueryOptions::default());
    gone.settled().await;
    drop(gone);

    cache.environment_changed(EnvironmentEvent::Focus);
    observer.settled().await;
    sleep(SECOND).await;
    assert_eq!(fetcher.calls(&watched), 2);
    assert_eq!(fetcher.calls(&parked), 1);
}

#[tokio::test(start_paused = true)]
async fn disabled_environment_event_is_ignored() {
    let mut config = dev_config();
    config.refetch_on_reconnect = false;
    let (cache, fetcher) = cache_with(config);
    let key = CacheKey::new("/posts");

    let mut observer = cache.ensure(key.clone(), QueryOptions::default());
    observer.settled().await;

    cache.environment_changed(EnvironmentEvent::Reconnect);
    sleep(SECOND).await;
    assert_eq!(fetcher.calls(&key), 1);
}

#[tokio::test(start_paused = true)]
async fn fresh_entries_survive_focus() {
    let mut config = dev_config();
    config.stale_time = Duration::from_secs(60);
    let (cache, fetcher) = cache_with(config);
    let key = CacheKey::new("/posts");

    let mut observer = cache.ensure(key.clone(), QueryOptions::default());
    observer.settled().await;

    cache.environment_changed(EnvironmentEvent::Focus);
    sleep(SECOND).await;
    assert_eq!(fetcher.calls(&key), 1);
}

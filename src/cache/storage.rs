//! Process-wide in-memory cache store.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use regex::Regex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::layer::Flight;
use super::lock::mutex_lock;
use super::stats::{CacheStats, StatsCounters};
use super::traits::{CacheLookup, Freshness};
use crate::error::CacheError;

const SOURCE: &str = "cache::storage";

/// Type-erased cached value. The store never looks inside it.
pub(crate) type Payload = Arc<dyn Any + Send + Sync>;

/// A single cached value with the windows it was stored under.
#[derive(Clone)]
pub(crate) struct CacheEntry {
  pub data: Payload,
  pub stored_at: Instant,
  pub freshness: Freshness,
}

impl CacheEntry {
  fn age(&self, now: Instant) -> Duration {
    now.saturating_duration_since(self.stored_at)
  }

  fn is_stale(&self, now: Instant) -> bool {
    self.age(now) > self.freshness.stale_after
  }

  fn is_expired(&self, now: Instant) -> bool {
    self.age(now) > self.freshness.expire_after
  }
}

/// Entries and in-flight loads share one lock so eviction, invalidation and
/// load completion are atomic with respect to each other.
#[derive(Default)]
pub(crate) struct StoreState {
  pub entries: HashMap<String, CacheEntry>,
  pub flights: HashMap<String, Flight>,
}

#[derive(Default)]
pub(crate) struct StoreInner {
  pub state: Mutex<StoreState>,
  pub stats: StatsCounters,
  pub next_flight: AtomicU64,
}

/// Key/value store of timestamped entries with independent stale and expiry
/// windows.
///
/// Cloning is cheap and yields a handle to the same store. Create one per
/// running client and hand it to every consumer.
#[derive(Clone, Default)]
pub struct CacheStore {
  pub(crate) inner: Arc<StoreInner>,
}

impl CacheStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub(crate) fn lock(&self, op: &'static str) -> MutexGuard<'_, StoreState> {
    mutex_lock(&self.inner.state, SOURCE, op)
  }

  /// Store `data` under `key`, replacing any existing entry and resetting its age.
  pub fn set<T>(&self, key: impl Into<String>, data: T, stale_after: Duration, expire_after: Duration)
  where
    T: Send + Sync + 'static,
  {
    self.put(
      key.into(),
      Arc::new(data),
      Freshness::new(stale_after, expire_after),
    );
  }

  pub(crate) fn put(&self, key: String, data: Payload, freshness: Freshness) {
    let entry = CacheEntry {
      data,
      stored_at: Instant::now(),
      freshness,
    };
    self.lock("set").entries.insert(key, entry);
  }

  /// Read `key` as a `T`.
  ///
  /// Expired entries are removed as a side effect. An entry stored under a
  /// different type is reported as a miss.
  pub fn get<T>(&self, key: &str) -> CacheLookup<T>
  where
    T: Clone + Send + Sync + 'static,
  {
    let now = Instant::now();
    let mut state = self.lock("get");

    let Some(entry) = state.entries.get(key) else {
      self.inner.stats.miss();
      return CacheLookup::missing();
    };

    if entry.is_expired(now) {
      state.entries.remove(key);
      self.inner.stats.evicted(1);
      self.inner.stats.miss();
      debug!(key, "evicted expired entry on read");
      return CacheLookup::missing();
    }

    let is_stale = entry.is_stale(now);
    match entry.data.downcast_ref::<T>() {
      Some(data) => {
        self.inner.stats.hit(is_stale);
        CacheLookup::found(data.clone(), is_stale)
      }
      None => {
        self.inner.stats.miss();
        warn!(
          key,
          expected = std::any::type_name::<T>(),
          "cached value has a different type, treating as a miss"
        );
        CacheLookup::missing()
      }
    }
  }

  /// True iff `key` holds an entry that is neither stale nor expired.
  pub fn has(&self, key: &str) -> bool {
    let now = Instant::now();
    let mut state = self.lock("has");
    match state.entries.get(key) {
      Some(entry) if entry.is_expired(now) => {
        state.entries.remove(key);
        self.inner.stats.evicted(1);
        false
      }
      Some(entry) => !entry.is_stale(now),
      None => false,
    }
  }

  /// Remove `key`. Any load in flight for it is detached: callers already
  /// waiting still receive its result, but it is no longer written back.
  pub fn invalidate(&self, key: &str) {
    let mut state = self.lock("invalidate");
    let removed = state.entries.remove(key).is_some();
    state.flights.remove(key);
    debug!(key, removed, "invalidated cache entry");
  }

  /// Remove every key matching `pattern` as a regular expression.
  ///
  /// Returns the number of entries removed.
  pub fn invalidate_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
    let regex = Regex::new(pattern).map_err(|e| CacheError::InvalidPattern {
      pattern: pattern.to_string(),
      message: e.to_string(),
    })?;

    let mut state = self.lock("invalidate_pattern");
    let before = state.entries.len();
    state.entries.retain(|key, _| !regex.is_match(key));
    state.flights.retain(|key, _| !regex.is_match(key));
    let removed = before - state.entries.len();

    debug!(pattern, removed, "invalidated cache entries by pattern");
    Ok(removed)
  }

  /// Remove everything.
  pub fn clear(&self) {
    let mut state = self.lock("clear");
    state.entries.clear();
    state.flights.clear();
  }

  /// Remove every expired entry, returning how many were removed.
  pub fn sweep(&self) -> usize {
    let now = Instant::now();
    let mut state = self.lock("sweep");
    let before = state.entries.len();
    state.entries.retain(|_, entry| !entry.is_expired(now));
    let removed = before - state.entries.len();
    drop(state);

    if removed > 0 {
      self.inner.stats.evicted(removed);
      debug!(removed, "swept expired cache entries");
    }
    removed
  }

  /// Run [`sweep`](Self::sweep) every `period` on the current tokio runtime.
  ///
  /// The task holds only a weak reference and ends once every handle to the
  /// store has been dropped.
  pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
    let weak = Arc::downgrade(&self.inner);
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      // The first tick completes immediately
      ticker.tick().await;

      loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
          debug!("cache store dropped, stopping sweeper");
          break;
        };
        CacheStore { inner }.sweep();
      }
    })
  }

  /// Number of entries held, expired ones included until they are evicted.
  pub fn len(&self) -> usize {
    self.lock("len").entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// True while a load for `key` is in flight and still attached to the store.
  pub fn is_loading(&self, key: &str) -> bool {
    self.lock("is_loading").flights.contains_key(key)
  }

  pub fn stats(&self) -> CacheStats {
    let entries = self.len();
    self.inner.stats.snapshot(entries)
  }
}

impl std::fmt::Debug for CacheStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CacheStore")
      .field("stats", &self.stats())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::time::sleep;

  const SECOND: Duration = Duration::from_secs(1);

  #[tokio::test(start_paused = true)]
  async fn test_fresh_entry_is_returned() {
    let store = CacheStore::new();
    store.set("artwork:a1", "Nocturne".to_string(), 10 * SECOND, 20 * SECOND);

    let lookup = store.get::<String>("artwork:a1");
    assert!(lookup.exists);
    assert!(!lookup.is_stale);
    assert_eq!(lookup.data.as_deref(), Some("Nocturne"));
    assert!(store.has("artwork:a1"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_stale_entry_is_still_usable() {
    let store = CacheStore::new();
    store.set("favorites:u1", vec!["a1"], SECOND, 5 * SECOND);

    sleep(Duration::from_millis(1500)).await;

    let lookup = store.get::<Vec<&str>>("favorites:u1");
    assert!(lookup.exists);
    assert!(lookup.is_stale);
    assert_eq!(lookup.data, Some(vec!["a1"]));
    assert!(!store.has("favorites:u1"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_expired_entry_is_evicted_on_read() {
    let store = CacheStore::new();
    store.set("stories:u1", 3_u32, SECOND, 2 * SECOND);

    sleep(3 * SECOND).await;
    assert_eq!(store.len(), 1);

    let lookup = store.get::<u32>("stories:u1");
    assert!(!lookup.exists);
    assert_eq!(lookup.data, None);
    assert_eq!(store.len(), 0);
    assert_eq!(store.stats().evictions, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_set_resets_age() {
    let store = CacheStore::new();
    store.set("k", 1_u8, SECOND, 5 * SECOND);
    sleep(2 * SECOND).await;
    store.set("k", 2_u8, SECOND, 5 * SECOND);

    let lookup = store.get::<u8>("k");
    assert!(!lookup.is_stale);
    assert_eq!(lookup.data, Some(2));
  }

  #[tokio::test(start_paused = true)]
  async fn test_type_mismatch_is_a_miss() {
    let store = CacheStore::new();
    store.set("k", 1_u32, SECOND, SECOND);

    assert!(!store.get::<String>("k").exists);
    // The entry itself is left alone
    assert!(store.get::<u32>("k").exists);
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidate_and_clear() {
    let store = CacheStore::new();
    store.set("a", 1_u8, SECOND, SECOND);
    store.set("b", 2_u8, SECOND, SECOND);

    store.invalidate("a");
    store.invalidate("missing");
    assert!(!store.get::<u8>("a").exists);
    assert!(store.get::<u8>("b").exists);

    store.clear();
    assert!(store.is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidate_pattern() {
    let store = CacheStore::new();
    store.set("favorites:u1", 1_u8, SECOND, SECOND);
    store.set("favorites:u2", 2_u8, SECOND, SECOND);
    store.set("published:u1", 3_u8, SECOND, SECOND);

    let removed = store.invalidate_pattern("^favorites:").unwrap();
    assert_eq!(removed, 2);
    assert_eq!(store.len(), 1);
    assert!(store.get::<u8>("published:u1").exists);
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalid_pattern_is_rejected() {
    let store = CacheStore::new();
    store.set("a", 1_u8, SECOND, SECOND);

    let err = store.invalidate_pattern("(unclosed").unwrap_err();
    assert!(matches!(err, CacheError::InvalidPattern { .. }));
    assert_eq!(store.len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_sweep_removes_only_expired() {
    let store = CacheStore::new();
    store.set("short", 1_u8, SECOND, 2 * SECOND);
    store.set("long", 2_u8, SECOND, 60 * SECOND);

    sleep(3 * SECOND).await;
    assert_eq!(store.sweep(), 1);
    assert_eq!(store.len(), 1);
    assert!(store.get::<u8>("long").exists);
  }

  #[tokio::test(start_paused = true)]
  async fn test_sweeper_runs_periodically() {
    let store = CacheStore::new();
    store.set("never-read", 1_u8, SECOND, 30 * SECOND);
    let sweeper = store.spawn_sweeper(60 * SECOND);

    sleep(61 * SECOND).await;
    assert!(store.is_empty());

    sweeper.abort();
  }

  #[tokio::test(start_paused = true)]
  async fn test_sweeper_stops_with_store() {
    let store = CacheStore::new();
    let sweeper = store.spawn_sweeper(SECOND);
    drop(store);

    sleep(3 * SECOND).await;
    assert!(sweeper.is_finished());
  }

  #[tokio::test(start_paused = true)]
  async fn test_stats_track_reads() {
    let store = CacheStore::new();
    store.set("k", 1_u8, SECOND, 5 * SECOND);

    store.get::<u8>("k");
    sleep(2 * SECOND).await;
    store.get::<u8>("k");
    store.get::<u8>("missing");

    let stats = store.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.stale_hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 1);
  }
}

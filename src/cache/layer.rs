//! Load coordination: at most one loader in flight per key.

use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use color_eyre::Result;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::time::Instant;
use tracing::debug;

use super::storage::{CacheEntry, CacheStore, Payload};
use super::traits::Freshness;

/// Outcome of a load, shared between every consumer waiting on it.
pub(crate) type LoadResult = std::result::Result<Payload, String>;

pub(crate) type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

/// A load registered against a key.
pub(crate) struct Flight {
  id: u64,
  load: SharedLoad,
}

impl CacheStore {
  /// Join the load in flight for `key`, or start one with `loader`.
  ///
  /// A started load is driven on its own task, so it completes and writes its
  /// result into the store even if every consumer stops waiting. The write is
  /// skipped when the key was invalidated while the load was running.
  pub(crate) fn load_through<T, F, Fut>(
    &self,
    key: &str,
    loader: F,
    freshness: Freshness,
  ) -> SharedLoad
  where
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    if let Some(flight) = self.lock("load_through.join").flights.get(key) {
      debug!(key, "joining in-flight load");
      return flight.load.clone();
    }

    // The loader is user code; never call it with the store locked.
    let pending = loader();

    let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
    let weak = Arc::downgrade(&self.inner);
    let owned_key = key.to_string();
    let load = async move {
      let result: LoadResult = pending
        .await
        .map(|data| Arc::new(data) as Payload)
        .map_err(|e| e.to_string());

      if let Some(inner) = weak.upgrade() {
        CacheStore { inner }.finish_flight(&owned_key, id, &result, freshness);
      }
      result
    }
    .boxed()
    .shared();

    let mut state = self.lock("load_through.start");
    if let Some(flight) = state.flights.get(key) {
      // Another caller registered a load between our two lock scopes.
      debug!(key, "joining in-flight load");
      return flight.load.clone();
    }
    state.flights.insert(
      key.to_string(),
      Flight {
        id,
        load: load.clone(),
      },
    );
    drop(state);

    self.inner.stats.load();
    debug!(key, flight = id, "starting load");
    tokio::spawn(load.clone());
    load
  }

  /// Stop the load in flight for `key`, if any, from writing its result.
  ///
  /// Callers already waiting on it still receive the result.
  pub(crate) fn detach_load(&self, key: &str) {
    if let Some(flight) = self.lock("detach_load").flights.remove(key) {
      debug!(key, flight = flight.id, "detached in-flight load");
    }
  }

  fn finish_flight(&self, key: &str, id: u64, result: &LoadResult, freshness: Freshness) {
    let mut state = self.lock("finish_flight");
    let current = state.flights.get(key).map(|flight| flight.id) == Some(id);
    if !current {
      debug!(key, flight = id, "load finished after invalidation, result not stored");
      return;
    }

    state.flights.remove(key);
    if let Ok(data) = result {
      let entry = CacheEntry {
        data: Arc::clone(data),
        stored_at: Instant::now(),
        freshness,
      };
      state.entries.insert(key.to_string(), entry);
      debug!(key, flight = id, "load stored");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::AtomicUsize;
  use std::time::Duration;
  use tokio::time::sleep;

  fn counting_loader(
    calls: &Arc<AtomicUsize>,
    value: u32,
  ) -> impl FnOnce() -> BoxFuture<'static, Result<u32>> {
    let calls = Arc::clone(calls);
    move || {
      async move {
        calls.fetch_add(1, Ordering::SeqCst);
        sleep(Duration::from_millis(100)).await;
        Ok(value)
      }
      .boxed()
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_loads_collapse() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let first = store.load_through("k", counting_loader(&calls, 1), Freshness::default());
    let second = store.load_through("k", counting_loader(&calls, 2), Freshness::default());
    assert!(store.is_loading("k"));

    let (a, b) = futures::join!(first, second);
    let a = a.unwrap();
    let b = b.unwrap();
    assert_eq!(a.downcast_ref::<u32>(), Some(&1));
    assert_eq!(b.downcast_ref::<u32>(), Some(&1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!store.is_loading("k"));
    assert_eq!(store.get::<u32>("k").data, Some(1));
    assert_eq!(store.stats().loads, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_load_completes_without_waiters() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicUsize::new(0));

    drop(store.load_through("k", counting_loader(&calls, 7), Freshness::default()));
    sleep(Duration::from_millis(200)).await;

    assert_eq!(store.get::<u32>("k").data, Some(7));
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidated_load_is_not_stored() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let load = store.load_through("k", counting_loader(&calls, 7), Freshness::default());
    store.invalidate("k");

    // Waiters still see the result
    assert!(load.await.is_ok());
    assert!(!store.get::<u32>("k").exists);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_load_stores_nothing() {
    let store = CacheStore::new();

    let result = store
      .load_through(
        "k",
        || async { Err::<u32, _>(eyre!("backend unavailable")) },
        Freshness::default(),
      )
      .await;

    assert_eq!(result.unwrap_err(), "backend unavailable");
    assert!(!store.get::<u32>("k").exists);
    assert!(!store.is_loading("k"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_detached_load_keeps_local_write() {
    let store = CacheStore::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let load = store.load_through("k", counting_loader(&calls, 7), Freshness::default());
    store.detach_load("k");
    store.set("k", 3_u32, Duration::from_secs(60), Duration::from_secs(120));
    assert!(!store.is_loading("k"));

    let result = load.await.unwrap();
    assert_eq!(result.downcast_ref::<u32>(), Some(&7));
    assert_eq!(store.get::<u32>("k").data, Some(3));
  }
}

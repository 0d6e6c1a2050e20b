//! Cached async query: stale-while-revalidate data fetching through the store.
//!
//! Inspired by TanStack Query, `CachedQuery<T>` turns a cache key and a loader
//! into a live value with loading, stale and error flags. Reads go through the
//! shared [`CacheStore`]: fresh entries are served without calling the loader,
//! stale entries are served immediately and revalidated in the background, and
//! misses report loading until the loader resolves.
//!
//! # Example
//!
//! ```ignore
//! let backend = backend.clone();
//! let mut query = CachedQuery::new(&store, "favorites:u1", move || {
//!     let backend = backend.clone();
//!     async move { backend.favorite_ids("u1").await }
//! });
//!
//! // When the consumer starts observing
//! query.activate();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! let state = query.state();
//! if state.is_loading { render_spinner() }
//! if let Some(ids) = &state.data { render_hearts(ids) }
//! if let Some(err) = &state.error { show_toast(err) }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use color_eyre::Result;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::cache::{CacheSource, CacheStore, Freshness, LoadResult};
use crate::error::CacheError;

/// Published state of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchState<T> {
  /// Last known value, possibly stale
  pub data: Option<T>,
  /// True only while this query has never obtained data for its key
  pub is_loading: bool,
  /// Staleness of `data` as of the last read or load
  pub is_stale: bool,
  /// Set when the most recent load failed, cleared on the next success
  pub error: Option<CacheError>,
  /// Where `data` came from
  pub source: Option<CacheSource>,
}

impl<T> FetchState<T> {
  fn empty() -> Self {
    Self {
      data: None,
      is_loading: false,
      is_stale: false,
      error: None,
      source: None,
    }
  }

  pub fn is_error(&self) -> bool {
    self.error.is_some()
  }
}

impl<T> Default for FetchState<T> {
  fn default() -> Self {
    Self::empty()
  }
}

/// A boxed future that returns the loaded value
type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// A factory function that creates futures for loading data
type LoaderFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

type SuccessFn<T> = Box<dyn Fn(&T) + Send + Sync>;
type ErrorFn = Box<dyn Fn(&CacheError) + Send + Sync>;

/// Per-query configuration.
#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
  pub freshness: Freshness,
  /// When false the query performs no loads and publishes empty state
  pub enabled: bool,
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self {
      freshness: Freshness::default(),
      enabled: true,
    }
  }
}

/// Cache-coherent async query bound to one key.
///
/// CachedQuery<T> encapsulates:
/// - The loading logic (via a closure)
/// - Loading/stale/error state published to one consumer
/// - Async result handling via a channel, so late results after the query is
///   dropped are discarded instead of published
/// - Optimistic updates written through to the shared store
pub struct CachedQuery<T> {
  key: String,
  store: CacheStore,
  loader: LoaderFn<T>,
  options: QueryOptions,
  state: FetchState<T>,
  receiver: Option<oneshot::Receiver<LoadResult>>,
  on_success: Option<SuccessFn<T>>,
  on_error: Option<ErrorFn>,
}

impl<T> CachedQuery<T>
where
  T: Clone + Send + Sync + 'static,
{
  /// Create a new query for `key` with the given loader.
  ///
  /// The loader is a closure that returns a future. It is called only when
  /// the store has no fresh entry and no other load for the key is in flight.
  /// Nothing happens until [`activate`](Self::activate) is called.
  pub fn new<F, Fut>(store: &CacheStore, key: impl Into<String>, loader: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    Self {
      key: key.into(),
      store: store.clone(),
      loader: Box::new(move || Box::pin(loader())),
      options: QueryOptions::default(),
      state: FetchState::empty(),
      receiver: None,
      on_success: None,
      on_error: None,
    }
  }

  pub fn with_freshness(mut self, freshness: Freshness) -> Self {
    self.options.freshness = freshness;
    self
  }

  /// Set how long loaded data is served without revalidation.
  pub fn with_stale_time(mut self, duration: Duration) -> Self {
    self.options.freshness.stale_after = duration;
    self
  }

  /// Build the query enabled or disabled, e.g. while a user id is unknown.
  pub fn enabled(mut self, enabled: bool) -> Self {
    self.options.enabled = enabled;
    self
  }

  /// Called with the data of every successful load. Never called for cache hits.
  pub fn on_success(mut self, callback: impl Fn(&T) + Send + Sync + 'static) -> Self {
    self.on_success = Some(Box::new(callback));
    self
  }

  /// Called with the error of every failed load.
  pub fn on_error(mut self, callback: impl Fn(&CacheError) + Send + Sync + 'static) -> Self {
    self.on_error = Some(Box::new(callback));
    self
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  pub fn options(&self) -> QueryOptions {
    self.options
  }

  pub fn state(&self) -> &FetchState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data.as_ref()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading
  }

  pub fn is_stale(&self) -> bool {
    self.state.is_stale
  }

  pub fn error(&self) -> Option<&CacheError> {
    self.state.error.as_ref()
  }

  /// True while this query waits on a load.
  pub fn is_fetching(&self) -> bool {
    self.receiver.is_some()
  }

  /// Read the key from the store and publish it, loading when needed.
  ///
  /// - fresh entry: published as is, no load
  /// - stale entry: published with `is_stale`, revalidated in the background
  /// - no entry: `is_loading` until the load resolves
  ///
  /// Calling this again while a load is pending does not start another one.
  pub fn activate(&mut self) {
    if !self.options.enabled {
      self.reset();
      return;
    }

    let lookup = self.store.get::<T>(&self.key);
    match lookup.data {
      Some(data) if !lookup.is_stale => {
        debug!(key = %self.key, "fresh cache hit");
        self.state.data = Some(data);
        self.state.is_loading = false;
        self.state.is_stale = false;
        self.state.source = Some(CacheSource::CacheFresh);
      }
      Some(data) => {
        debug!(key = %self.key, "stale cache hit, revalidating");
        self.state.data = Some(data);
        self.state.is_loading = false;
        self.state.is_stale = true;
        self.state.source = Some(CacheSource::CacheStale);
        self.start_load();
      }
      None => {
        debug!(key = %self.key, "cache miss");
        // Keep anything this query already showed rather than going blank.
        if self.state.data.is_some() {
          self.state.is_stale = true;
          self.state.source = Some(CacheSource::CacheStale);
        } else {
          self.state.is_loading = true;
        }
        self.start_load();
      }
    }
  }

  /// Enable or disable the query. Enabling activates it, disabling drops any
  /// pending result and clears the published state.
  pub fn set_enabled(&mut self, enabled: bool) {
    if self.options.enabled == enabled {
      return;
    }
    self.options.enabled = enabled;
    if enabled {
      self.activate();
    } else {
      self.reset();
    }
  }

  /// Load regardless of freshness.
  ///
  /// Joins the load already in flight for the key, if any.
  pub fn refetch(&mut self) {
    if !self.options.enabled {
      return;
    }
    self.state.is_loading = true;
    self.start_load();
  }

  /// Remove the key from the store without loading.
  ///
  /// The published data stays visible but is marked stale, and a pending
  /// result from before the invalidation is discarded. The next
  /// [`activate`](Self::activate) revalidates.
  pub fn invalidate(&mut self) {
    self.store.invalidate(&self.key);
    self.receiver = None;
    if self.state.data.is_some() {
      self.state.is_stale = true;
    }
  }

  /// Replace the published data with `updater(current)` and write it to the
  /// store under this query's windows.
  ///
  /// The current value is the published data, or the stored entry when this
  /// query has published nothing yet. A load in flight for the key is
  /// detached so its older result cannot overwrite the update.
  ///
  /// Returns the previous data as a snapshot for [`restore`](Self::restore).
  pub fn update_cache(&mut self, updater: impl FnOnce(Option<&T>) -> T) -> Option<T> {
    let previous = match &self.state.data {
      Some(data) => Some(data.clone()),
      None => self.store.get::<T>(&self.key).data,
    };
    let next = updater(previous.as_ref());

    self.store.detach_load(&self.key);
    self.receiver = None;
    self.write(next);
    self.state.source = Some(CacheSource::Local);
    previous
  }

  /// Put back a snapshot returned by [`update_cache`](Self::update_cache).
  pub fn restore(&mut self, snapshot: Option<T>) {
    match snapshot {
      Some(data) => self.write(data),
      None => {
        self.store.invalidate(&self.key);
        self.state.data = None;
        self.state.is_stale = false;
        self.state.source = None;
      }
    }
  }

  /// Apply `optimistic` immediately, then await the backend `call`.
  ///
  /// On rejection the previous data is restored in both the query and the
  /// store, and the failure is returned as [`CacheError::MutationFailure`].
  pub async fn mutate<R, Fut>(
    &mut self,
    optimistic: impl FnOnce(Option<&T>) -> T,
    call: Fut,
  ) -> std::result::Result<R, CacheError>
  where
    Fut: Future<Output = Result<R>>,
  {
    let snapshot = self.update_cache(optimistic);
    match call.await {
      Ok(value) => Ok(value),
      Err(e) => {
        self.restore(snapshot);
        let err = CacheError::MutationFailure {
          key: self.key.clone(),
          message: e.to_string(),
        };
        warn!(key = %self.key, error = %err, "mutation failed, rolled back");
        Err(err)
      }
    }
  }

  /// Poll for the result of a pending load.
  ///
  /// Returns `true` if the state changed (data arrived or error occurred).
  /// Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok(result) => {
        self.receiver = None;
        self.apply(result);
        true
      }
      Err(oneshot::error::TryRecvError::Empty) => false,
      Err(oneshot::error::TryRecvError::Closed) => {
        self.receiver = None;
        self.apply(Err("load was abandoned".to_string()));
        true
      }
    }
  }

  /// Wait for the pending load, if any, and publish its result.
  ///
  /// Returns `false` immediately when nothing is pending.
  pub async fn next_update(&mut self) -> bool {
    let Some(receiver) = self.receiver.as_mut() else {
      return false;
    };

    let result = receiver
      .await
      .unwrap_or_else(|_| Err("load was abandoned".to_string()));
    self.receiver = None;
    self.apply(result);
    true
  }

  fn start_load(&mut self) {
    if self.receiver.is_some() {
      return;
    }

    let load = self
      .store
      .load_through(&self.key, || (self.loader)(), self.options.freshness);

    let (tx, rx) = oneshot::channel();
    self.receiver = Some(rx);
    tokio::spawn(async move {
      // Ignore send errors - the query may have been dropped
      let _ = tx.send(load.await);
    });
  }

  fn apply(&mut self, result: LoadResult) {
    self.state.is_loading = false;

    let loaded = result.and_then(|payload| {
      payload
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| format!("loaded value is not a {}", std::any::type_name::<T>()))
    });

    match loaded {
      Ok(data) => {
        debug!(key = %self.key, "load succeeded");
        if let Some(callback) = &self.on_success {
          callback(&data);
        }
        self.state.data = Some(data);
        self.state.is_stale = false;
        self.state.error = None;
        self.state.source = Some(CacheSource::Network);
      }
      Err(message) => {
        let err = CacheError::LoadFailure {
          key: self.key.clone(),
          message,
        };
        warn!(key = %self.key, error = %err, "load failed");
        if let Some(callback) = &self.on_error {
          callback(&err);
        }
        self.state.error = Some(err);
      }
    }
  }

  fn write(&mut self, data: T) {
    let freshness = self.options.freshness;
    self.store.set(
      self.key.clone(),
      data.clone(),
      freshness.stale_after,
      freshness.expire_after,
    );
    self.state.data = Some(data);
    self.state.is_loading = false;
    self.state.is_stale = false;
  }

  fn reset(&mut self) {
    self.receiver = None;
    self.state = FetchState::empty();
  }
}

// CachedQuery is not Clone: each consumer owns its own published state.
// Share the underlying data through the store, not the query.

impl<T: std::fmt::Debug> std::fmt::Debug for CachedQuery<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CachedQuery")
      .field("key", &self.key)
      .field("state", &self.state)
      .field("options", &self.options)
      .finish_non_exhaustive()
  }
}

//! Core types shared by the store and the cached-fetch hook.

use std::time::Duration;

/// Default window after which an entry is served as stale.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5 * 60);

/// Default window after which an entry is no longer served at all.
pub const DEFAULT_EXPIRE_AFTER: Duration = Duration::from_secs(10 * 60);

/// Freshness windows attached to every cache entry.
///
/// `stale_after <= expire_after` is expected but not enforced. With the windows
/// inverted an entry is simply never served fresh before it expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freshness {
  /// Age after which the entry is stale but still usable
  pub stale_after: Duration,
  /// Age after which the entry must not be returned and is purged
  pub expire_after: Duration,
}

impl Freshness {
  pub const fn new(stale_after: Duration, expire_after: Duration) -> Self {
    Self {
      stale_after,
      expire_after,
    }
  }
}

impl Default for Freshness {
  fn default() -> Self {
    Self::new(DEFAULT_STALE_AFTER, DEFAULT_EXPIRE_AFTER)
  }
}

/// Result of a typed store read.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup<T> {
  /// The cached value, absent on a miss
  pub data: Option<T>,
  /// Whether the entry is past its stale window
  pub is_stale: bool,
  /// Whether a usable (unexpired) entry was found
  pub exists: bool,
}

impl<T> CacheLookup<T> {
  pub(crate) fn missing() -> Self {
    Self {
      data: None,
      is_stale: false,
      exists: false,
    }
  }

  pub(crate) fn found(data: T, is_stale: bool) -> Self {
    Self {
      data: Some(data),
      is_stale,
      exists: true,
    }
  }
}

/// Indicates where the currently published data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from the loader
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache past its stale window, revalidation pending or failed
  CacheStale,
  /// Written locally by an optimistic update
  Local,
}

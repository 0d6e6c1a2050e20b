//! Cache hit/miss accounting.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of cache activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
  /// Reads that found a fresh entry
  pub hits: u64,
  /// Reads that found a stale but unexpired entry
  pub stale_hits: u64,
  /// Reads that found nothing usable
  pub misses: u64,
  /// Loader invocations started through the store
  pub loads: u64,
  /// Entries removed because they expired (on read or by the sweep)
  pub evictions: u64,
  /// Entries currently held
  pub entries: usize,
}

impl CacheStats {
  /// Share of reads served from cache, stale hits included.
  pub fn hit_ratio(&self) -> f64 {
    let reads = self.hits + self.stale_hits + self.misses;
    if reads == 0 {
      return 0.0;
    }
    (self.hits + self.stale_hits) as f64 / reads as f64
  }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
  hits: AtomicU64,
  stale_hits: AtomicU64,
  misses: AtomicU64,
  loads: AtomicU64,
  evictions: AtomicU64,
}

impl StatsCounters {
  pub fn hit(&self, stale: bool) {
    if stale {
      self.stale_hits.fetch_add(1, Ordering::Relaxed);
    } else {
      self.hits.fetch_add(1, Ordering::Relaxed);
    }
  }

  pub fn miss(&self) {
    self.misses.fetch_add(1, Ordering::Relaxed);
  }

  pub fn load(&self) {
    self.loads.fetch_add(1, Ordering::Relaxed);
  }

  pub fn evicted(&self, count: usize) {
    self.evictions.fetch_add(count as u64, Ordering::Relaxed);
  }

  pub fn snapshot(&self, entries: usize) -> CacheStats {
    CacheStats {
      hits: self.hits.load(Ordering::Relaxed),
      stale_hits: self.stale_hits.load(Ordering::Relaxed),
      misses: self.misses.load(Ordering::Relaxed),
      loads: self.loads.load(Ordering::Relaxed),
      evictions: self.evictions.load(Ordering::Relaxed),
      entries,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hit_ratio_counts_stale_hits() {
    let counters = StatsCounters::default();
    counters.hit(false);
    counters.hit(true);
    counters.miss();
    counters.miss();

    let stats = counters.snapshot(3);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.stale_hits, 1);
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.entries, 3);
    assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);
  }

  #[test]
  fn hit_ratio_without_reads_is_zero() {
    assert_eq!(CacheStats::default().hit_ratio(), 0.0);
  }
}

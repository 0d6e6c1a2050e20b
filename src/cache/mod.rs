//! Client-side stale-while-revalidate cache.
//!
//! This module provides a backend-agnostic store that:
//! - Holds type-erased values with independent stale and expiry windows
//! - Evicts expired entries lazily on read and periodically via a sweeper
//! - Collapses concurrent loads of the same key into one loader call
//! - Supports bulk invalidation of a key family by regular expression

mod layer;
mod lock;
mod stats;
mod storage;
mod traits;

pub use stats::CacheStats;
pub use storage::CacheStore;
pub use traits::{CacheLookup, CacheSource, Freshness, DEFAULT_EXPIRE_AFTER, DEFAULT_STALE_AFTER};

pub(crate) use layer::LoadResult;

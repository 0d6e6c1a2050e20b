//! Stale-while-revalidate data cache for an art marketplace client.
//!
//! A shared [`CacheStore`] holds loaded resources with independent stale and
//! expiry windows. [`CachedQuery`] reads through it, revalidating stale data
//! in the background and collapsing concurrent loads of one key. Gallery
//! accessors bind queries to backend loaders, and the [`InvalidationBus`]
//! tells independent screens when a mutation made their data stale.

pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod gallery;
pub mod logging;
pub mod query;

pub use cache::{CacheStats, CacheStore, Freshness};
pub use config::Config;
pub use error::CacheError;
pub use event::{Changes, InvalidationBus, InvalidationEvent, Scope, Subscription};
pub use gallery::GalleryQueries;
pub use query::{CachedQuery, FetchState, QueryOptions};

//! Art marketplace resources served through the cache.

pub mod api_types;
pub mod cache;
pub mod cached_client;
pub mod client;
pub mod memory;
pub mod types;

pub use cache::{family_user_pattern, normalize_query, user_pattern, Family, GalleryKey};
pub use cached_client::{revalidate_on, GalleryQueries};
pub use client::{ArtworkQuery, Collection, GalleryBackend};
pub use memory::MemoryBackend;
pub use types::{ArtistSummary, Artwork, Story};

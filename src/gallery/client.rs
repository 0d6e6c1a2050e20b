//! Data backend collaborator.
//!
//! The cache core never talks to the backend directly; accessors call it
//! through this trait so every backend dependency is explicit and mockable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::Result;

use super::api_types::Document;

/// Document collections the accessors read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
  Artworks,
  Profiles,
  Stories,
}

impl Collection {
  pub fn name(self) -> &'static str {
    match self {
      Self::Artworks => "artworks",
      Self::Profiles => "users",
      Self::Stories => "stories",
    }
  }
}

/// Filter for artwork listings. Results come back newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtworkQuery {
  /// Only works by these artists (any artist when empty)
  pub artist_ids: Vec<String>,
  pub published: Option<bool>,
  pub in_gallery: Option<bool>,
  /// Case-insensitive match against title and description
  pub search: Option<String>,
  pub limit: Option<usize>,
}

impl ArtworkQuery {
  pub fn published() -> Self {
    Self {
      published: Some(true),
      ..Self::default()
    }
  }

  pub fn by_artist(mut self, artist_id: impl Into<String>) -> Self {
    self.artist_ids = vec![artist_id.into()];
    self
  }

  pub fn with_limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }
}

/// Async access to the managed backend.
///
/// Reads must be idempotent. Writes either fully succeed or fully fail.
#[async_trait]
pub trait GalleryBackend: Send + Sync {
  /// List artwork documents matching `query`.
  async fn list_artworks(&self, query: &ArtworkQuery) -> Result<Vec<Document>>;

  /// Fetch one document, `None` if it does not exist.
  async fn get_document(&self, collection: Collection, id: &str) -> Result<Option<Document>>;

  /// Merge `patch` into an existing document's fields.
  async fn update_document(
    &self,
    collection: Collection,
    id: &str,
    patch: serde_json::Value,
  ) -> Result<()>;

  async fn delete_document(&self, collection: Collection, id: &str) -> Result<()>;

  /// Artwork ids the user marked as favorite.
  async fn favorite_ids(&self, user_id: &str) -> Result<Vec<String>>;

  async fn set_favorite(&self, user_id: &str, artwork_id: &str, favorite: bool) -> Result<()>;

  /// Ids of the artists `user_id` follows.
  async fn followed_artists(&self, user_id: &str) -> Result<Vec<String>>;

  async fn set_following(&self, follower_id: &str, artist_id: &str, following: bool)
    -> Result<()>;

  /// Stories by any of `author_ids` that have not expired at `now`.
  async fn active_stories(&self, author_ids: &[String], now: DateTime<Utc>)
    -> Result<Vec<Document>>;
}

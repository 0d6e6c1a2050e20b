use chrono::{DateTime, Utc};

/// Artist details shown next to an artwork
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtistSummary {
  pub id: String,
  pub display_name: String,
  pub avatar_url: Option<String>,
}

/// Artwork as the UI consumes it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artwork {
  pub id: String,
  pub title: String,
  pub description: Option<String>,
  pub artist_id: String,
  /// Resolved from the artist's current profile, not the artwork document
  pub artist: Option<ArtistSummary>,
  pub image_url: String,
  pub thumbnail_url: Option<String>,
  pub price_cents: Option<u64>,
  pub sold: bool,
  pub published: bool,
  pub in_gallery: bool,
  pub created_at: DateTime<Utc>,
}

/// Short-lived story posted by a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Story {
  pub id: String,
  pub author_id: String,
  pub image_url: String,
  pub caption: Option<String>,
  pub created_at: DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
}

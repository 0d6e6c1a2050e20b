//! Serde-deserializable types matching backend documents.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::types::{ArtistSummary, Artwork, Story};

/// A raw backend document: an id plus a JSON object of fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
  pub id: String,
  pub fields: serde_json::Value,
}

impl Document {
  pub fn new(id: impl Into<String>, fields: impl Serialize) -> serde_json::Result<Self> {
    Ok(Self {
      id: id.into(),
      fields: serde_json::to_value(fields)?,
    })
  }

  /// Decode the fields into a typed struct.
  pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
    serde_json::from_value(self.fields.clone())
  }
}

// ============================================================================
// Artwork documents
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiImages {
  #[serde(default)]
  pub main: String,
  pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiArtworkFields {
  #[serde(default)]
  pub title: String,
  pub description: Option<String>,
  pub artist_id: String,
  #[serde(default)]
  pub images: ApiImages,
  pub price_cents: Option<u64>,
  #[serde(default)]
  pub sold: bool,
  #[serde(default)]
  pub published: bool,
  #[serde(default)]
  pub in_gallery: bool,
  pub created_at: DateTime<Utc>,
}

impl ApiArtworkFields {
  pub fn into_artwork(self, id: String, artist: Option<ArtistSummary>) -> Artwork {
    Artwork {
      id,
      title: self.title,
      description: self.description,
      artist_id: self.artist_id,
      artist,
      image_url: self.images.main,
      thumbnail_url: self.images.thumbnail,
      price_cents: self.price_cents,
      sold: self.sold,
      published: self.published,
      in_gallery: self.in_gallery,
      created_at: self.created_at,
    }
  }
}

// ============================================================================
// Profile documents
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiProfileFields {
  #[serde(default)]
  pub display_name: String,
  pub avatar_url: Option<String>,
  /// Older profiles only carry the auth provider's photo
  #[serde(rename = "photoURL")]
  pub photo_url: Option<String>,
}

impl ApiProfileFields {
  pub fn into_summary(self, id: String) -> ArtistSummary {
    ArtistSummary {
      id,
      display_name: self.display_name,
      avatar_url: self.avatar_url.or(self.photo_url),
    }
  }
}

// ============================================================================
// Story documents
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiStoryFields {
  pub author_id: String,
  pub image_url: String,
  pub caption: Option<String>,
  pub created_at: DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
}

impl ApiStoryFields {
  pub fn into_story(self, id: String) -> Story {
    Story {
      id,
      author_id: self.author_id,
      image_url: self.image_url,
      caption: self.caption,
      created_at: self.created_at,
      expires_at: self.expires_at,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn artwork_document_is_flattened() {
    let doc = Document::new(
      "a1",
      json!({
        "title": "Harbour at Dusk",
        "artistId": "u1",
        "images": { "main": "https://img/a1.jpg", "thumbnail": "https://img/a1_t.jpg" },
        "priceCents": 120000,
        "published": true,
        "createdAt": "2024-03-01T10:00:00Z"
      }),
    )
    .unwrap();

    let fields: ApiArtworkFields = doc.decode().unwrap();
    let artwork = fields.into_artwork(doc.id.clone(), None);
    assert_eq!(artwork.id, "a1");
    assert_eq!(artwork.image_url, "https://img/a1.jpg");
    assert_eq!(artwork.thumbnail_url.as_deref(), Some("https://img/a1_t.jpg"));
    assert_eq!(artwork.price_cents, Some(120000));
    assert!(artwork.published);
    assert!(!artwork.sold);
    assert!(!artwork.in_gallery);
  }

  #[test]
  fn profile_falls_back_to_auth_photo() {
    let fields: ApiProfileFields =
      serde_json::from_value(json!({ "displayName": "Ines", "photoURL": "https://p/ines" }))
        .unwrap();
    let summary = fields.into_summary("u1".to_string());
    assert_eq!(summary.avatar_url.as_deref(), Some("https://p/ines"));

    let fields: ApiProfileFields = serde_json::from_value(json!({
      "displayName": "Ines",
      "avatarUrl": "https://a/ines",
      "photoURL": "https://p/ines"
    }))
    .unwrap();
    assert_eq!(
      fields.into_summary("u1".to_string()).avatar_url.as_deref(),
      Some("https://a/ines")
    );
  }

  #[test]
  fn missing_required_field_fails_to_decode() {
    let doc = Document::new("a1", json!({ "title": "No artist" })).unwrap();
    assert!(doc.decode::<ApiArtworkFields>().is_err());
  }
}

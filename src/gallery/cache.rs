//! Cache key registry for gallery resources.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================================================
// Key families
// ============================================================================

/// A family of cache keys addressing the same kind of resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
  Artworks,
  Artwork,
  Favorites,
  PublishedWorks,
  GalleryWorks,
  HomeFeed,
  Stories,
  Follow,
  Discover,
}

impl Family {
  pub const ALL: [Family; 9] = [
    Family::Artworks,
    Family::Artwork,
    Family::Favorites,
    Family::PublishedWorks,
    Family::GalleryWorks,
    Family::HomeFeed,
    Family::Stories,
    Family::Follow,
    Family::Discover,
  ];

  /// Leading key segment shared by every key of the family.
  pub fn prefix(self) -> &'static str {
    match self {
      Self::Artworks => "artworks",
      Self::Artwork => "artwork",
      Self::Favorites => "favorites",
      Self::PublishedWorks => "published",
      Self::GalleryWorks => "gallery",
      Self::HomeFeed => "feed",
      Self::Stories => "stories",
      Self::Follow => "follow",
      Self::Discover => "discover",
    }
  }

  /// Regular expression matching every key of the family.
  pub fn pattern(self) -> String {
    format!("^{}:", self.prefix())
  }
}

// ============================================================================
// Keys
// ============================================================================

/// Logical gallery resource, one variant per key family.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum GalleryKey {
  /// Newest published artworks, first `limit`
  Artworks { limit: usize },
  /// A single artwork by id
  Artwork { id: String },
  /// Favorite artwork ids of a user
  Favorites { user_id: String },
  /// An artist's published works
  PublishedWorks { user_id: String },
  /// Works an artist placed in their gallery
  GalleryWorks { user_id: String },
  /// Home feed built from the artists a user follows
  HomeFeed { user_id: String, page_size: usize },
  /// Active stories visible to a user
  Stories { user_id: String },
  /// Whether `follower_id` follows `artist_id`
  Follow {
    follower_id: String,
    artist_id: String,
  },
  /// Discovery search results for free-form query text
  Discover { query: String, limit: usize },
}

impl GalleryKey {
  pub fn family(&self) -> Family {
    match self {
      Self::Artworks { .. } => Family::Artworks,
      Self::Artwork { .. } => Family::Artwork,
      Self::Favorites { .. } => Family::Favorites,
      Self::PublishedWorks { .. } => Family::PublishedWorks,
      Self::GalleryWorks { .. } => Family::GalleryWorks,
      Self::HomeFeed { .. } => Family::HomeFeed,
      Self::Stories { .. } => Family::Stories,
      Self::Follow { .. } => Family::Follow,
      Self::Discover { .. } => Family::Discover,
    }
  }

  /// Stable string key for the store.
  ///
  /// Segments are escaped, so ids containing the separator cannot make two
  /// resources share a key.
  pub fn cache_key(&self) -> String {
    let prefix = self.family().prefix();
    match self {
      Self::Artworks { limit } => format!("{}:{}", prefix, limit),
      Self::Artwork { id } => format!("{}:{}", prefix, segment(id)),
      Self::Favorites { user_id }
      | Self::PublishedWorks { user_id }
      | Self::GalleryWorks { user_id }
      | Self::Stories { user_id } => format!("{}:{}", prefix, segment(user_id)),
      Self::HomeFeed { user_id, page_size } => {
        format!("{}:{}:{}", prefix, segment(user_id), page_size)
      }
      Self::Follow {
        follower_id,
        artist_id,
      } => format!("{}:{}:{}", prefix, segment(follower_id), segment(artist_id)),
      Self::Discover { query, limit } => format!("{}:{}:{}", prefix, hash_query(query), limit),
    }
  }

  pub fn description(&self) -> String {
    match self {
      Self::Artworks { limit } => format!("latest {} artworks", limit),
      Self::Artwork { id } => format!("artwork {}", id),
      Self::Favorites { user_id } => format!("favorites of {}", user_id),
      Self::PublishedWorks { user_id } => format!("published works of {}", user_id),
      Self::GalleryWorks { user_id } => format!("gallery of {}", user_id),
      Self::HomeFeed { user_id, page_size } => {
        format!("home feed of {} ({} per page)", user_id, page_size)
      }
      Self::Stories { user_id } => format!("stories for {}", user_id),
      Self::Follow {
        follower_id,
        artist_id,
      } => format!("{} follows {}", follower_id, artist_id),
      Self::Discover { query, .. } => format!("discover: {}", query),
    }
  }
}

/// Regular expression matching every key scoped to `user_id`: their favorites,
/// works, feed, stories and the follow edges they own.
pub fn user_pattern(user_id: &str) -> String {
  let user = regex::escape(&segment(user_id));
  format!(
    "^(?:(?:{}|{}|{}|{}):{}$|(?:{}|{}):{}:)",
    Family::Favorites.prefix(),
    Family::PublishedWorks.prefix(),
    Family::GalleryWorks.prefix(),
    Family::Stories.prefix(),
    user,
    Family::HomeFeed.prefix(),
    Family::Follow.prefix(),
    user,
  )
}

/// Regular expression matching the keys of one family that belong to
/// `user_id`, e.g. every feed page size cached for that user.
pub fn family_user_pattern(family: Family, user_id: &str) -> String {
  format!(
    "^{}:{}(?::|$)",
    family.prefix(),
    regex::escape(&segment(user_id))
  )
}

/// Escape a key segment so it never contains the `:` separator.
fn segment(raw: &str) -> String {
  raw.replace('%', "%25").replace(':', "%3A")
}

/// Normalize search text for consistent hashing.
/// Trims, lowercases and collapses inner whitespace.
///
/// Discovery requests send this same text, so equal keys mean equal results.
pub fn normalize_query(query: &str) -> String {
  query
    .split_whitespace()
    .map(str::to_lowercase)
    .collect::<Vec<_>>()
    .join(" ")
}

/// SHA256 of the normalized query, for stable fixed-length keys.
fn hash_query(query: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(normalize_query(query).as_bytes());
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;
  use regex::Regex;

  fn key(gallery_key: GalleryKey) -> String {
    gallery_key.cache_key()
  }

  #[test]
  fn same_resource_same_key() {
    let a = GalleryKey::Favorites {
      user_id: "u1".to_string(),
    };
    assert_eq!(a.cache_key(), a.clone().cache_key());
    assert_eq!(a.cache_key(), "favorites:u1");
    assert_eq!(key(GalleryKey::Artworks { limit: 20 }), "artworks:20");
    assert_eq!(
      key(GalleryKey::HomeFeed {
        user_id: "u1".to_string(),
        page_size: 12
      }),
      "feed:u1:12"
    );
  }

  #[test]
  fn families_never_share_keys() {
    let keys: Vec<String> = vec![
      key(GalleryKey::Artworks { limit: 1 }),
      key(GalleryKey::Artwork { id: "1".to_string() }),
      key(GalleryKey::Favorites {
        user_id: "1".to_string(),
      }),
      key(GalleryKey::PublishedWorks {
        user_id: "1".to_string(),
      }),
      key(GalleryKey::GalleryWorks {
        user_id: "1".to_string(),
      }),
      key(GalleryKey::HomeFeed {
        user_id: "1".to_string(),
        page_size: 1,
      }),
      key(GalleryKey::Stories {
        user_id: "1".to_string(),
      }),
      key(GalleryKey::Follow {
        follower_id: "1".to_string(),
        artist_id: "1".to_string(),
      }),
      key(GalleryKey::Discover {
        query: "1".to_string(),
        limit: 1,
      }),
    ];

    let unique: std::collections::HashSet<_> = keys.iter().collect();
    assert_eq!(unique.len(), keys.len());
  }

  #[test]
  fn separators_in_ids_do_not_collide() {
    let a = GalleryKey::Follow {
      follower_id: "a:b".to_string(),
      artist_id: "c".to_string(),
    };
    let b = GalleryKey::Follow {
      follower_id: "a".to_string(),
      artist_id: "b:c".to_string(),
    };
    assert_ne!(a.cache_key(), b.cache_key());

    let escaped = GalleryKey::Artwork {
      id: "%3A".to_string(),
    };
    let colon = GalleryKey::Artwork { id: ":".to_string() };
    assert_ne!(escaped.cache_key(), colon.cache_key());
  }

  #[test]
  fn discover_queries_are_normalized() {
    let a = GalleryKey::Discover {
      query: "  Oil   Painting ".to_string(),
      limit: 30,
    };
    let b = GalleryKey::Discover {
      query: "oil painting".to_string(),
      limit: 30,
    };
    let c = GalleryKey::Discover {
      query: "oil paintings".to_string(),
      limit: 30,
    };
    assert_eq!(a.cache_key(), b.cache_key());
    assert_ne!(a.cache_key(), c.cache_key());
    assert_eq!(a.cache_key().len(), "discover:".len() + 64 + ":30".len());
  }

  #[test]
  fn family_pattern_matches_only_its_family() {
    let artwork = Regex::new(&Family::Artwork.pattern()).unwrap();
    assert!(artwork.is_match(&key(GalleryKey::Artwork {
      id: "a1".to_string()
    })));
    assert!(!artwork.is_match(&key(GalleryKey::Artworks { limit: 20 })));

    for family in Family::ALL {
      assert!(family.pattern().starts_with('^'));
    }
  }

  #[test]
  fn user_pattern_covers_user_scoped_keys() {
    let pattern = Regex::new(&user_pattern("u1")).unwrap();
    let user = |f: fn(String) -> GalleryKey| key(f("u1".to_string()));

    assert!(pattern.is_match(&user(|u| GalleryKey::Favorites { user_id: u })));
    assert!(pattern.is_match(&user(|u| GalleryKey::PublishedWorks { user_id: u })));
    assert!(pattern.is_match(&user(|u| GalleryKey::GalleryWorks { user_id: u })));
    assert!(pattern.is_match(&user(|u| GalleryKey::Stories { user_id: u })));
    assert!(pattern.is_match(&user(|u| GalleryKey::HomeFeed {
      user_id: u,
      page_size: 20
    })));
    assert!(pattern.is_match(&user(|u| GalleryKey::Follow {
      follower_id: u,
      artist_id: "a9".to_string()
    })));

    assert!(!pattern.is_match("favorites:u10"));
    assert!(!pattern.is_match("follow:u2:u1"));
    assert!(!pattern.is_match("artwork:u1"));
  }

  #[test]
  fn family_user_pattern_spans_page_sizes() {
    let pattern = Regex::new(&family_user_pattern(Family::HomeFeed, "u1")).unwrap();
    assert!(pattern.is_match("feed:u1:12"));
    assert!(pattern.is_match("feed:u1:40"));
    assert!(!pattern.is_match("feed:u12:12"));
    assert!(!pattern.is_match("stories:u1"));

    let stories = Regex::new(&family_user_pattern(Family::Stories, "u1")).unwrap();
    assert!(stories.is_match("stories:u1"));
  }
}

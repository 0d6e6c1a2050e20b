//! Gallery accessors: cached queries pre-bound to one key family and one loader.
//!
//! This is the only place that knows the shape of backend documents. Loaders
//! decode documents, resolve each artist's current profile by a secondary
//! lookup, and hand flat domain types to the query layer.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::config::{CacheSettings, Config};
use crate::error::CacheError;
use crate::event::{InvalidationBus, InvalidationEvent, Scope, Subscription};
use crate::query::CachedQuery;

use super::api_types::{ApiArtworkFields, ApiProfileFields, ApiStoryFields, Document};
use super::cache::{family_user_pattern, normalize_query, user_pattern, Family, GalleryKey};
use super::client::{ArtworkQuery, Collection, GalleryBackend};
use super::types::{ArtistSummary, Artwork, Story};

/// Factory for gallery queries sharing one store, bus and backend.
///
/// Cheap to clone; every clone addresses the same cache.
#[derive(Clone)]
pub struct GalleryQueries {
  backend: Arc<dyn GalleryBackend>,
  store: CacheStore,
  bus: InvalidationBus,
  settings: CacheSettings,
}

impl GalleryQueries {
  pub fn new(
    backend: Arc<dyn GalleryBackend>,
    store: CacheStore,
    bus: InvalidationBus,
    settings: CacheSettings,
  ) -> Self {
    Self {
      backend,
      store,
      bus,
      settings,
    }
  }

  /// Build with a fresh store and bus, windows taken from `config`.
  pub fn from_config(backend: Arc<dyn GalleryBackend>, config: &Config) -> Self {
    Self::new(
      backend,
      CacheStore::new(),
      InvalidationBus::default(),
      config.cache.clone(),
    )
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  pub fn bus(&self) -> &InvalidationBus {
    &self.bus
  }

  pub fn subscribe(&self, scope: Scope) -> Subscription {
    self.bus.subscribe(scope)
  }

  /// Start the periodic expiry sweep at the configured interval.
  pub fn spawn_sweeper(&self) -> JoinHandle<()> {
    self.store.spawn_sweeper(self.settings.sweep_interval())
  }

  fn query<T, F, Fut>(&self, key: &GalleryKey, loader: F) -> CachedQuery<T>
  where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    debug!(key = %key.cache_key(), "query for {}", key.description());
    CachedQuery::new(&self.store, key.cache_key(), loader)
      .with_freshness(self.settings.freshness_for(key.family()))
  }

  // ==========================================================================
  // Reads
  // ==========================================================================

  /// Newest published artworks.
  pub fn artworks(&self, limit: usize) -> CachedQuery<Vec<Artwork>> {
    let backend = Arc::clone(&self.backend);
    self.query(&GalleryKey::Artworks { limit }, move || {
      let backend = Arc::clone(&backend);
      async move { load_artworks(backend.as_ref(), &ArtworkQuery::published().with_limit(limit)).await }
    })
  }

  /// A single artwork, `None` when it does not exist.
  pub fn artwork(&self, artwork_id: &str) -> CachedQuery<Option<Artwork>> {
    let backend = Arc::clone(&self.backend);
    let id = artwork_id.to_string();
    let key = GalleryKey::Artwork { id: id.clone() };
    self.query(&key, move || {
      let backend = Arc::clone(&backend);
      let id = id.clone();
      async move { load_artwork(backend.as_ref(), &id).await }
    })
  }

  /// Favorite artwork ids of the signed-in user. Disabled while signed out.
  pub fn favorites(&self, user_id: Option<&str>) -> CachedQuery<Vec<String>> {
    let backend = Arc::clone(&self.backend);
    let user = user_id.map(str::to_string);
    let key = GalleryKey::Favorites {
      user_id: user.clone().unwrap_or_default(),
    };
    self
      .query(&key, move || {
        let backend = Arc::clone(&backend);
        let user = user.clone();
        async move { backend.favorite_ids(&signed_in(user)?).await }
      })
      .enabled(user_id.is_some())
  }

  /// Everything an artist has published.
  pub fn published_works(&self, user_id: Option<&str>) -> CachedQuery<Vec<Artwork>> {
    let key = GalleryKey::PublishedWorks {
      user_id: user_id.unwrap_or_default().to_string(),
    };
    self.portfolio(key, user_id, |user| ArtworkQuery::published().by_artist(user))
  }

  /// Works an artist chose to show in their gallery.
  pub fn gallery_works(&self, user_id: Option<&str>) -> CachedQuery<Vec<Artwork>> {
    let key = GalleryKey::GalleryWorks {
      user_id: user_id.unwrap_or_default().to_string(),
    };
    self.portfolio(key, user_id, |user| ArtworkQuery {
      in_gallery: Some(true),
      ..ArtworkQuery::default().by_artist(user)
    })
  }

  fn portfolio(
    &self,
    key: GalleryKey,
    user_id: Option<&str>,
    filter: fn(String) -> ArtworkQuery,
  ) -> CachedQuery<Vec<Artwork>> {
    let backend = Arc::clone(&self.backend);
    let user = user_id.map(str::to_string);
    self
      .query(&key, move || {
        let backend = Arc::clone(&backend);
        let user = user.clone();
        async move { load_artworks(backend.as_ref(), &filter(signed_in(user)?)).await }
      })
      .enabled(user_id.is_some())
  }

  /// Latest published works by the artists the user follows.
  pub fn home_feed(&self, user_id: Option<&str>, page_size: usize) -> CachedQuery<Vec<Artwork>> {
    let backend = Arc::clone(&self.backend);
    let user = user_id.map(str::to_string);
    let key = GalleryKey::HomeFeed {
      user_id: user.clone().unwrap_or_default(),
      page_size,
    };
    self
      .query(&key, move || {
        let backend = Arc::clone(&backend);
        let user = user.clone();
        async move {
          let followed = backend.followed_artists(&signed_in(user)?).await?;
          if followed.is_empty() {
            return Ok(Vec::new());
          }
          let filter = ArtworkQuery {
            artist_ids: followed,
            ..ArtworkQuery::published().with_limit(page_size)
          };
          load_artworks(backend.as_ref(), &filter).await
        }
      })
      .enabled(user_id.is_some())
  }

  /// Unexpired stories by the user and the artists they follow.
  pub fn stories(&self, user_id: Option<&str>) -> CachedQuery<Vec<Story>> {
    let backend = Arc::clone(&self.backend);
    let user = user_id.map(str::to_string);
    let key = GalleryKey::Stories {
      user_id: user.clone().unwrap_or_default(),
    };
    self
      .query(&key, move || {
        let backend = Arc::clone(&backend);
        let user = user.clone();
        async move { load_stories(backend.as_ref(), &signed_in(user)?).await }
      })
      .enabled(user_id.is_some())
  }

  /// Whether the signed-in user follows `artist_id`.
  pub fn follow_state(&self, follower_id: Option<&str>, artist_id: &str) -> CachedQuery<bool> {
    let backend = Arc::clone(&self.backend);
    let follower = follower_id.map(str::to_string);
    let artist = artist_id.to_string();
    let key = GalleryKey::Follow {
      follower_id: follower.clone().unwrap_or_default(),
      artist_id: artist.clone(),
    };
    self
      .query(&key, move || {
        let backend = Arc::clone(&backend);
        let follower = follower.clone();
        let artist = artist.clone();
        async move {
          let followed = backend.followed_artists(&signed_in(follower)?).await;
          followed.map(|artists| artists.contains(&artist))
        }
      })
      .enabled(follower_id.is_some())
  }

  /// Published works whose title or description matches `search`.
  pub fn discover(&self, search: &str, limit: usize) -> CachedQuery<Vec<Artwork>> {
    let backend = Arc::clone(&self.backend);
    let key = GalleryKey::Discover {
      query: search.to_string(),
      limit,
    };
    let filter = ArtworkQuery {
      search: Some(normalize_query(search)),
      ..ArtworkQuery::published().with_limit(limit)
    };
    self.query(&key, move || {
      let backend = Arc::clone(&backend);
      let filter = filter.clone();
      async move { load_artworks(backend.as_ref(), &filter).await }
    })
  }

  // ==========================================================================
  // Actions
  // ==========================================================================

  /// Flip `artwork_id` in the user's favorites.
  ///
  /// The heart updates immediately; other screens holding the same favorites
  /// are told to refetch once the backend confirms. Returns the new state.
  pub async fn toggle_favorite(
    &self,
    favorites: &mut CachedQuery<Vec<String>>,
    user_id: &str,
    artwork_id: &str,
  ) -> Result<bool, CacheError> {
    let favorite = !favorites
      .data()
      .is_some_and(|ids| ids.iter().any(|id| id == artwork_id));

    favorites
      .mutate(
        |ids| {
          let mut ids: Vec<String> = ids.cloned().unwrap_or_default();
          ids.retain(|id| id != artwork_id);
          if favorite {
            ids.push(artwork_id.to_string());
          }
          ids
        },
        self.backend.set_favorite(user_id, artwork_id, favorite),
      )
      .await?;

    info!(user = user_id, artwork = artwork_id, favorite, "favorite toggled");
    self.bus.publish(InvalidationEvent::new(Scope::Favorites, user_id));
    Ok(favorite)
  }

  /// Follow or unfollow `artist_id`. Returns the new state.
  ///
  /// On success the follower's feed and stories are dropped from the store,
  /// since both are derived from who they follow.
  pub async fn toggle_follow(
    &self,
    follow: &mut CachedQuery<bool>,
    follower_id: &str,
    artist_id: &str,
  ) -> Result<bool, CacheError> {
    let following = !follow.data().copied().unwrap_or(false);

    follow
      .mutate(
        |_| following,
        self.backend.set_following(follower_id, artist_id, following),
      )
      .await?;

    for family in [Family::HomeFeed, Family::Stories] {
      self
        .store
        .invalidate_pattern(&family_user_pattern(family, follower_id))?;
    }

    info!(follower = follower_id, artist = artist_id, following, "follow toggled");
    self.bus.publish(InvalidationEvent::new(Scope::Follow, follower_id));
    self.bus.publish(InvalidationEvent::new(Scope::Stories, follower_id));
    Ok(following)
  }

  /// Mark one of the works in `works` as sold or available again.
  pub async fn set_sold(
    &self,
    works: &mut CachedQuery<Vec<Artwork>>,
    artwork_id: &str,
    sold: bool,
  ) -> Result<(), CacheError> {
    let artist_id = self.artist_of(works, artwork_id);

    works
      .mutate(
        |current| {
          let mut next: Vec<Artwork> = current.cloned().unwrap_or_default();
          for artwork in next.iter_mut().filter(|a| a.id == artwork_id) {
            artwork.sold = sold;
          }
          next
        },
        self
          .backend
          .update_document(Collection::Artworks, artwork_id, json!({ "sold": sold })),
      )
      .await?;

    self.artwork_changed(artwork_id, artist_id.as_deref())
  }

  /// Delete one of the works in `works`.
  pub async fn delete_artwork(
    &self,
    works: &mut CachedQuery<Vec<Artwork>>,
    artwork_id: &str,
  ) -> Result<(), CacheError> {
    let artist_id = self.artist_of(works, artwork_id);

    works
      .mutate(
        |current| {
          let mut next: Vec<Artwork> = current.cloned().unwrap_or_default();
          next.retain(|a| a.id != artwork_id);
          next
        },
        self.backend.delete_document(Collection::Artworks, artwork_id),
      )
      .await?;

    // Deleted works also disappear from favorites.
    self.store.invalidate_pattern(&Family::Favorites.pattern())?;
    self.artwork_changed(artwork_id, artist_id.as_deref())
  }

  /// Drop every entry that may embed the artwork and tell other screens.
  fn artwork_changed(&self, artwork_id: &str, artist_id: Option<&str>) -> Result<(), CacheError> {
    self.store.invalidate(
      &GalleryKey::Artwork {
        id: artwork_id.to_string(),
      }
      .cache_key(),
    );
    // Listings are not keyed by artist, so any of them may hold the work.
    for family in [Family::Artworks, Family::HomeFeed, Family::Discover] {
      self.store.invalidate_pattern(&family.pattern())?;
    }
    self.bus.publish(InvalidationEvent::new(Scope::Artwork, artwork_id));

    match artist_id {
      Some(artist_id) => {
        for family in [Family::PublishedWorks, Family::GalleryWorks] {
          self
            .store
            .invalidate_pattern(&family_user_pattern(family, artist_id))?;
        }
        self.bus.publish(InvalidationEvent::new(Scope::Portfolio, artist_id));
      }
      None => {
        warn!(artwork = artwork_id, "artist unknown, portfolio entries left in place");
      }
    }
    Ok(())
  }

  /// Artist of `artwork_id`, from the given list or the cached artwork.
  fn artist_of(&self, works: &CachedQuery<Vec<Artwork>>, artwork_id: &str) -> Option<String> {
    let listed = works
      .data()
      .and_then(|works| works.iter().find(|a| a.id == artwork_id))
      .map(|a| a.artist_id.clone());
    listed.or_else(|| {
      let key = GalleryKey::Artwork {
        id: artwork_id.to_string(),
      };
      self
        .store
        .get::<Option<Artwork>>(&key.cache_key())
        .data
        .flatten()
        .map(|a| a.artist_id)
    })
  }

  /// Drop every entry scoped to `user_id`, e.g. on sign-out.
  pub fn forget_user(&self, user_id: &str) -> Result<usize, CacheError> {
    let removed = self.store.invalidate_pattern(&user_pattern(user_id))?;
    info!(user = user_id, removed, "forgot cached user data");
    Ok(removed)
  }
}

impl std::fmt::Debug for GalleryQueries {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("GalleryQueries")
      .field("store", &self.store)
      .field("settings", &self.settings)
      .finish_non_exhaustive()
  }
}

/// Revalidate `query` if `subscription` saw a change to `subject_id`.
///
/// Call this in your event loop tick handler. Returns whether a reload was
/// started; duplicate events since the last tick cause a single reload.
pub fn revalidate_on<T>(
  query: &mut CachedQuery<T>,
  subscription: &mut Subscription,
  subject_id: &str,
) -> bool
where
  T: Clone + Send + Sync + 'static,
{
  if !subscription.drain().affects(subject_id) {
    return false;
  }
  debug!(key = query.key(), scope = ?subscription.scope(), "revalidating after invalidation");
  query.invalidate();
  query.activate();
  true
}

fn signed_in(user_id: Option<String>) -> Result<String> {
  user_id.ok_or_else(|| eyre!("No signed-in user"))
}

fn decode<T: serde::de::DeserializeOwned>(document: &Document) -> Result<T> {
  document
    .decode()
    .map_err(|e| eyre!("Malformed document {}: {}", document.id, e))
}

/// List artworks and attach each artist's current profile.
///
/// Profiles are looked up once per distinct artist, concurrently.
async fn load_artworks(backend: &dyn GalleryBackend, query: &ArtworkQuery) -> Result<Vec<Artwork>> {
  let documents = backend.list_artworks(query).await?;
  let decoded = documents
    .iter()
    .map(|document| Ok((document.id.clone(), decode::<ApiArtworkFields>(document)?)))
    .collect::<Result<Vec<_>>>()?;

  let artist_ids: BTreeSet<String> = decoded.iter().map(|(_, f)| f.artist_id.clone()).collect();
  let lookups = join_all(artist_ids.iter().map(|id| load_artist(backend, id))).await;
  let artists: HashMap<String, Option<ArtistSummary>> = artist_ids.into_iter().zip(lookups).collect();

  Ok(
    decoded
      .into_iter()
      .map(|(id, fields)| {
        let artist = artists.get(&fields.artist_id).cloned().flatten();
        fields.into_artwork(id, artist)
      })
      .collect(),
  )
}

async fn load_artwork(backend: &dyn GalleryBackend, artwork_id: &str) -> Result<Option<Artwork>> {
  let Some(document) = backend.get_document(Collection::Artworks, artwork_id).await? else {
    return Ok(None);
  };
  let fields: ApiArtworkFields = decode(&document)?;
  let artist = load_artist(backend, &fields.artist_id).await;
  Ok(Some(fields.into_artwork(document.id, artist)))
}

/// Stories by the user and everyone they follow.
async fn load_stories(backend: &dyn GalleryBackend, user_id: &str) -> Result<Vec<Story>> {
  let mut authors = backend.followed_artists(user_id).await?;
  authors.push(user_id.to_string());

  let documents = backend.active_stories(&authors, Utc::now()).await?;
  documents
    .into_iter()
    .map(|document| {
      let fields: ApiStoryFields = decode(&document)?;
      Ok(fields.into_story(document.id))
    })
    .collect()
}

/// Resolve an artist profile. A failed or missing lookup leaves the artwork
/// without an artist rather than failing the whole load.
async fn load_artist(backend: &dyn GalleryBackend, artist_id: &str) -> Option<ArtistSummary> {
  match backend.get_document(Collection::Profiles, artist_id).await {
    Ok(Some(document)) => match decode::<ApiProfileFields>(&document) {
      Ok(profile) => Some(profile.into_summary(document.id)),
      Err(e) => {
        warn!(artist = artist_id, error = %e, "unreadable artist profile");
        None
      }
    },
    Ok(None) => None,
    Err(e) => {
      warn!(artist = artist_id, error = %e, "artist lookup failed");
      None
    }
  }
}

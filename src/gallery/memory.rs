//! In-memory backend for tests and offline hosts.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;

use super::api_types::Document;
use super::client::{ArtworkQuery, Collection, GalleryBackend};

#[derive(Default)]
struct MemoryState {
  documents: HashMap<Collection, BTreeMap<String, Value>>,
  favorites: HashMap<String, Vec<String>>,
  follows: HashMap<String, BTreeSet<String>>,
}

/// [`GalleryBackend`] holding documents in process memory.
///
/// Counts calls per operation and can be told to fail the next call of an
/// operation or to delay every call, which is what cache tests need.
#[derive(Default)]
pub struct MemoryBackend {
  state: Mutex<MemoryState>,
  calls: Mutex<HashMap<&'static str, usize>>,
  failures: Mutex<HashSet<&'static str>>,
  latency: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
  mutex.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  /// Delay every call by `latency`.
  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  /// Insert or replace a document.
  pub fn insert(&self, collection: Collection, document: Document) -> Result<()> {
    lock(&self.state)?
      .documents
      .entry(collection)
      .or_default()
      .insert(document.id, document.fields);
    Ok(())
  }

  /// Number of calls made to `op` (the trait method name).
  pub fn calls(&self, op: &str) -> usize {
    lock(&self.calls)
      .map(|calls| calls.get(op).copied().unwrap_or(0))
      .unwrap_or(0)
  }

  /// Make the next call to `op` fail.
  pub fn fail_next(&self, op: &'static str) -> Result<()> {
    lock(&self.failures)?.insert(op);
    Ok(())
  }

  async fn enter(&self, op: &'static str) -> Result<()> {
    *lock(&self.calls)?.entry(op).or_default() += 1;
    if !self.latency.is_zero() {
      tokio::time::sleep(self.latency).await;
    }
    if lock(&self.failures)?.remove(op) {
      return Err(eyre!("{} failed: backend unavailable", op));
    }
    Ok(())
  }
}

fn str_field<'a>(fields: &'a Value, name: &str) -> Option<&'a str> {
  fields.get(name).and_then(Value::as_str)
}

fn bool_field(fields: &Value, name: &str) -> bool {
  fields.get(name).and_then(Value::as_bool).unwrap_or(false)
}

fn time_field(fields: &Value, name: &str) -> Option<DateTime<Utc>> {
  str_field(fields, name).and_then(|s| s.parse().ok())
}

fn matches(query: &ArtworkQuery, fields: &Value) -> bool {
  if !query.artist_ids.is_empty() {
    let artist = str_field(fields, "artistId").unwrap_or_default();
    if !query.artist_ids.iter().any(|id| id == artist) {
      return false;
    }
  }
  if let Some(published) = query.published {
    if bool_field(fields, "published") != published {
      return false;
    }
  }
  if let Some(in_gallery) = query.in_gallery {
    if bool_field(fields, "inGallery") != in_gallery {
      return false;
    }
  }
  if let Some(search) = &query.search {
    let needle = search.trim().to_lowercase();
    let haystack = format!(
      "{} {}",
      str_field(fields, "title").unwrap_or_default(),
      str_field(fields, "description").unwrap_or_default()
    )
    .to_lowercase();
    if !haystack.contains(&needle) {
      return false;
    }
  }
  true
}

/// Newest first by `createdAt`.
fn newest_first(mut documents: Vec<Document>) -> Vec<Document> {
  documents.sort_by(|a, b| {
    time_field(&b.fields, "createdAt").cmp(&time_field(&a.fields, "createdAt"))
  });
  documents
}

#[async_trait]
impl GalleryBackend for MemoryBackend {
  async fn list_artworks(&self, query: &ArtworkQuery) -> Result<Vec<Document>> {
    self.enter("list_artworks").await?;
    let state = lock(&self.state)?;
    let found: Vec<Document> = state
      .documents
      .get(&Collection::Artworks)
      .into_iter()
      .flatten()
      .filter(|(_, fields)| matches(query, fields))
      .map(|(id, fields)| Document {
        id: id.clone(),
        fields: fields.clone(),
      })
      .collect();

    let mut found = newest_first(found);
    if let Some(limit) = query.limit {
      found.truncate(limit);
    }
    Ok(found)
  }

  async fn get_document(&self, collection: Collection, id: &str) -> Result<Option<Document>> {
    self.enter("get_document").await?;
    let state = lock(&self.state)?;
    Ok(
      state
        .documents
        .get(&collection)
        .and_then(|docs| docs.get(id))
        .map(|fields| Document {
          id: id.to_string(),
          fields: fields.clone(),
        }),
    )
  }

  async fn update_document(&self, collection: Collection, id: &str, patch: Value) -> Result<()> {
    self.enter("update_document").await?;
    let Value::Object(patch) = patch else {
      return Err(eyre!("Patch for {}/{} must be an object", collection.name(), id));
    };

    let mut state = lock(&self.state)?;
    let fields = state
      .documents
      .get_mut(&collection)
      .and_then(|docs| docs.get_mut(id))
      .ok_or_else(|| eyre!("Document {}/{} not found", collection.name(), id))?;
    let Value::Object(existing) = fields else {
      return Err(eyre!("Document {}/{} is not an object", collection.name(), id));
    };
    existing.extend(patch);
    Ok(())
  }

  async fn delete_document(&self, collection: Collection, id: &str) -> Result<()> {
    self.enter("delete_document").await?;
    let mut state = lock(&self.state)?;
    state
      .documents
      .get_mut(&collection)
      .and_then(|docs| docs.remove(id))
      .ok_or_else(|| eyre!("Document {}/{} not found", collection.name(), id))?;

    if collection == Collection::Artworks {
      for ids in state.favorites.values_mut() {
        ids.retain(|favorite| favorite != id);
      }
    }
    Ok(())
  }

  async fn favorite_ids(&self, user_id: &str) -> Result<Vec<String>> {
    self.enter("favorite_ids").await?;
    let state = lock(&self.state)?;
    Ok(state.favorites.get(user_id).cloned().unwrap_or_default())
  }

  async fn set_favorite(&self, user_id: &str, artwork_id: &str, favorite: bool) -> Result<()> {
    self.enter("set_favorite").await?;
    let mut state = lock(&self.state)?;
    let ids = state.favorites.entry(user_id.to_string()).or_default();
    ids.retain(|id| id != artwork_id);
    if favorite {
      ids.push(artwork_id.to_string());
    }
    Ok(())
  }

  async fn followed_artists(&self, user_id: &str) -> Result<Vec<String>> {
    self.enter("followed_artists").await?;
    let state = lock(&self.state)?;
    Ok(
      state
        .follows
        .get(user_id)
        .map(|artists| artists.iter().cloned().collect())
        .unwrap_or_default(),
    )
  }

  async fn set_following(&self, follower_id: &str, artist_id: &str, following: bool) -> Result<()> {
    self.enter("set_following").await?;
    let mut state = lock(&self.state)?;
    let artists = state.follows.entry(follower_id.to_string()).or_default();
    if following {
      artists.insert(artist_id.to_string());
    } else {
      artists.remove(artist_id);
    }
    Ok(())
  }

  async fn active_stories(&self, author_ids: &[String], now: DateTime<Utc>) -> Result<Vec<Document>> {
    self.enter("active_stories").await?;
    let state = lock(&self.state)?;
    let found: Vec<Document> = state
      .documents
      .get(&Collection::Stories)
      .into_iter()
      .flatten()
      .filter(|(_, fields)| {
        let author = str_field(fields, "authorId").unwrap_or_default();
        author_ids.iter().any(|id| id == author)
          && time_field(fields, "expiresAt").is_some_and(|expires| expires > now)
      })
      .map(|(id, fields)| Document {
        id: id.clone(),
        fields: fields.clone(),
      })
      .collect();
    Ok(newest_first(found))
  }
}

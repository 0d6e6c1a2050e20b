//! Cross-component invalidation bus.
//!
//! Independent consumers of the same resource (the discovery grid's hearts and
//! the artwork detail screen, say) each hold their own query. When one of them
//! mutates the resource it publishes an [`InvalidationEvent`]; the others drain
//! their [`Subscription`] on the next tick and revalidate.

use std::collections::HashSet;

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

const DEFAULT_CAPACITY: usize = 256;

/// Resource family an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
  /// A user's favorite artwork ids
  Favorites,
  /// Whether a user follows an artist
  Follow,
  /// A single artwork
  Artwork,
  /// An artist's published and gallery works
  Portfolio,
  /// A user's active stories
  Stories,
}

/// "This subject changed" notice. Carries no payload; subscribers decide
/// whether to refetch.
///
/// Serializes to JSON with exactly two string fields so it can cross a
/// process boundary when the host is split across workers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvalidationEvent {
  pub scope: Scope,
  pub subject_id: String,
}

impl InvalidationEvent {
  pub fn new(scope: Scope, subject_id: impl Into<String>) -> Self {
    Self {
      scope,
      subject_id: subject_id.into(),
    }
  }

  pub fn to_json(&self) -> Result<String> {
    serde_json::to_string(self).map_err(|e| eyre!("Failed to serialize event: {}", e))
  }

  pub fn from_json(json: &str) -> Result<Self> {
    serde_json::from_str(json).map_err(|e| eyre!("Failed to parse event {}: {}", json, e))
  }
}

/// Process-wide broadcast of invalidation events.
///
/// Publishing is fire-and-forget. Delivery is at-least-once from the
/// subscriber's point of view: a subscriber that falls behind is told to treat
/// everything in its scope as changed.
#[derive(Debug, Clone)]
pub struct InvalidationBus {
  tx: broadcast::Sender<InvalidationEvent>,
}

impl InvalidationBus {
  /// Create a bus buffering up to `capacity` undelivered events per subscriber.
  pub fn new(capacity: usize) -> Self {
    let (tx, _rx) = broadcast::channel(capacity.max(1));
    Self { tx }
  }

  /// Publish an event, returning how many subscribers it reached.
  pub fn publish(&self, event: InvalidationEvent) -> usize {
    debug!(scope = ?event.scope, subject = %event.subject_id, "publishing invalidation");
    // No subscribers is not an error
    self.tx.send(event).unwrap_or(0)
  }

  /// Subscribe to events of one scope.
  ///
  /// Events published before this call are not delivered.
  pub fn subscribe(&self, scope: Scope) -> Subscription {
    Subscription {
      scope,
      rx: self.tx.subscribe(),
    }
  }

  pub fn subscriber_count(&self) -> usize {
    self.tx.receiver_count()
  }
}

impl Default for InvalidationBus {
  fn default() -> Self {
    Self::new(DEFAULT_CAPACITY)
  }
}

/// Subjects that changed since the last drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
  /// Changed subjects, duplicates collapsed
  pub subjects: HashSet<String>,
  /// Events were dropped before they could be read
  pub lagged: bool,
}

impl Changes {
  /// Whether `subject_id` must be treated as changed.
  pub fn affects(&self, subject_id: &str) -> bool {
    self.lagged || self.subjects.contains(subject_id)
  }

  pub fn is_empty(&self) -> bool {
    !self.lagged && self.subjects.is_empty()
  }
}

/// Receiving end of the bus for one scope.
#[derive(Debug)]
pub struct Subscription {
  scope: Scope,
  rx: broadcast::Receiver<InvalidationEvent>,
}

impl Subscription {
  pub fn scope(&self) -> Scope {
    self.scope
  }

  /// Take every pending event for this scope without waiting.
  ///
  /// Call this in your event loop tick handler.
  pub fn drain(&mut self) -> Changes {
    let mut changes = Changes::default();
    loop {
      match self.rx.try_recv() {
        Ok(event) if event.scope == self.scope => {
          changes.subjects.insert(event.subject_id);
        }
        Ok(_) => {}
        Err(broadcast::error::TryRecvError::Lagged(missed)) => {
          warn!(scope = ?self.scope, missed, "invalidation subscriber lagged");
          changes.lagged = true;
        }
        Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed) => {
          break;
        }
      }
    }
    changes
  }

  /// Wait for the next event in this scope.
  ///
  /// Returns `None` once every bus handle has been dropped.
  pub async fn next(&mut self) -> Option<InvalidationEvent> {
    loop {
      match self.rx.recv().await {
        Ok(event) if event.scope == self.scope => return Some(event),
        Ok(_) => {}
        Err(broadcast::error::RecvError::Lagged(missed)) => {
          warn!(scope = ?self.scope, missed, "invalidation subscriber lagged");
        }
        Err(broadcast::error::RecvError::Closed) => return None,
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheStore;
  use crate::query::CachedQuery;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  #[test]
  fn test_wire_format_has_two_string_fields() {
    let event = InvalidationEvent::new(Scope::Favorites, "u1");
    let json = event.to_json().unwrap();
    assert_eq!(json, r#"{"scope":"favorites","subject_id":"u1"}"#);

    let parsed = InvalidationEvent::from_json(&json).unwrap();
    assert_eq!(parsed, event);
  }

  #[test]
  fn test_unknown_scope_is_rejected() {
    let result = InvalidationEvent::from_json(r#"{"scope":"chat","subject_id":"u1"}"#);
    assert!(result.is_err());
  }

  #[test]
  fn test_publish_without_subscribers() {
    let bus = InvalidationBus::default();
    assert_eq!(bus.publish(InvalidationEvent::new(Scope::Follow, "u1")), 0);
  }

  #[test]
  fn test_subscription_filters_by_scope() {
    let bus = InvalidationBus::default();
    let mut favorites = bus.subscribe(Scope::Favorites);
    let mut follows = bus.subscribe(Scope::Follow);
    assert_eq!(bus.subscriber_count(), 2);

    bus.publish(InvalidationEvent::new(Scope::Favorites, "u1"));
    bus.publish(InvalidationEvent::new(Scope::Follow, "u2"));

    let changes = favorites.drain();
    assert!(changes.affects("u1"));
    assert!(!changes.affects("u2"));

    let changes = follows.drain();
    assert_eq!(changes.subjects.len(), 1);
    assert!(changes.affects("u2"));

    assert!(favorites.drain().is_empty());
  }

  #[test]
  fn test_lagged_subscriber_treats_everything_as_changed() {
    let bus = InvalidationBus::new(2);
    let mut sub = bus.subscribe(Scope::Artwork);

    for id in ["a1", "a2", "a3", "a4"] {
      bus.publish(InvalidationEvent::new(Scope::Artwork, id));
    }

    let changes = sub.drain();
    assert!(changes.lagged);
    assert!(changes.affects("a1"));
  }

  #[tokio::test]
  async fn test_next_skips_other_scopes() {
    let bus = InvalidationBus::default();
    let mut sub = bus.subscribe(Scope::Stories);

    bus.publish(InvalidationEvent::new(Scope::Favorites, "u1"));
    bus.publish(InvalidationEvent::new(Scope::Stories, "u2"));

    let event = sub.next().await.unwrap();
    assert_eq!(event.subject_id, "u2");

    drop(bus);
    assert_eq!(sub.next().await, None);
  }

  #[tokio::test(start_paused = true)]
  async fn test_duplicate_events_cause_one_refetch() {
    let store = CacheStore::new();
    let bus = InvalidationBus::default();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    let mut hearts = CachedQuery::new(&store, "favorites:u1", move || {
      let counter = Arc::clone(&counter);
      async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) }
    });
    let mut sub = bus.subscribe(Scope::Favorites);
    hearts.activate();
    hearts.next_update().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let event = InvalidationEvent::new(Scope::Favorites, "u1");
    bus.publish(event.clone());
    bus.publish(event);

    if sub.drain().affects("u1") {
      hearts.invalidate();
      hearts.activate();
    }
    hearts.next_update().await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(sub.drain().is_empty());
  }
}

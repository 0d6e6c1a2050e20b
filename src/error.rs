//! Error taxonomy for the cache layer.

use thiserror::Error;

/// Failures surfaced by the cache and the cached-fetch hook.
///
/// Load and mutation failures carry the backend's message rather than the
/// original report so the value can be cloned into every observer's state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
  /// A loader rejected. Previously published data stays visible.
  #[error("failed to load {key}: {message}")]
  LoadFailure { key: String, message: String },

  /// A backend write failed after an optimistic update was applied.
  #[error("failed to update {key}: {message}")]
  MutationFailure { key: String, message: String },

  /// `invalidate_pattern` was given something that is not a regular expression.
  #[error("invalid invalidation pattern {pattern:?}: {message}")]
  InvalidPattern { pattern: String, message: String },
}

impl CacheError {
  /// Cache key the failure relates to, if any.
  pub fn key(&self) -> Option<&str> {
    match self {
      Self::LoadFailure { key, .. } | Self::MutationFailure { key, .. } => Some(key),
      Self::InvalidPattern { .. } => None,
    }
  }
}

//! Error types for the remote store client.

use std::time::Duration;

/// Errors from talking to the remote bucket.
///
/// `Clone` because one fetch result is handed to every caller that joined it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
  /// Rate limited by the bucket on a single attempt.
  #[error("rate limited: retry after {retry_after:?}")]
  RateLimited { retry_after: Option<Duration> },

  /// Retry budget exhausted; the snapshot is unavailable, not empty.
  #[error("snapshot unavailable after {attempts} attempts")]
  Unavailable { attempts: u32 },

  /// Unexpected HTTP status.
  #[error("HTTP {status}: {message}")]
  Status { status: u16, message: String },

  /// Transport failure (connect, TLS, body read).
  #[error("network error: {message}")]
  Network { message: String },

  /// Body was not a valid snapshot.
  #[error("invalid response: {message}")]
  InvalidResponse { message: String },

  /// Payload could not be serialized for a write.
  #[error("failed to encode payload: {message}")]
  Encode { message: String },

  /// The shared fetch task ended without producing a result.
  #[error("fetch task failed: {message}")]
  Interrupted { message: String },
}

impl StoreError {
  /// Whether the caller should report "unavailable" rather than a hard failure.
  pub fn is_unavailable(&self) -> bool {
    matches!(self, Self::Unavailable { .. })
  }
}

impl From<reqwest::Error> for StoreError {
  fn from(err: reqwest::Error) -> Self {
    Self::Network {
      message: err.to_string(),
    }
  }
}

pub type StoreResult<T> = Result<T, StoreError>;

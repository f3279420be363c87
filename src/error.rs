//! Error types shared by the store, gateway, sync engine and intermediary.

use thiserror::Error;

/// Failure of a local sqlite transaction.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("failed to (de)serialize stored record: {0}")]
  Serde(#[from] serde_json::Error),

  #[error("database lock poisoned")]
  LockPoisoned,

  #[error("failed to prepare database location {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

/// Failure reported by a [`crate::gateway::Transport`]: no usable response at all.
#[derive(Debug, Error)]
pub enum TransportError {
  #[error("network unreachable: {0}")]
  Unreachable(String),

  #[error("failed to build HTTP client: {0}")]
  Client(String),
}

/// Normalized failure of an API call.
#[derive(Debug, Error)]
pub enum ApiError {
  /// No response came back.
  #[error("server unreachable: {0}")]
  Unreachable(String),

  /// The server answered with a non-2xx status.
  #[error("server rejected request with status {status}")]
  Rejected { status: u16, body: String },

  /// The server was not reached; the cache answered instead.
  #[error("server unreachable, answered from {served_by}")]
  ServedFromCache { served_by: String },

  /// The server answered 2xx but the body was not valid JSON.
  #[error("invalid JSON in response: {0}")]
  Decode(#[from] serde_json::Error),

  #[error("invalid request: {0}")]
  InvalidRequest(String),
}

impl ApiError {
  /// Client-side rejection (4xx) that a retry will not fix.
  pub fn is_client_rejection(&self) -> bool {
    matches!(self, ApiError::Rejected { status, .. } if (400..500).contains(status))
  }
}

impl From<TransportError> for ApiError {
  fn from(err: TransportError) -> Self {
    match err {
      TransportError::Unreachable(msg) => ApiError::Unreachable(msg),
      TransportError::Client(msg) => ApiError::InvalidRequest(msg),
    }
  }
}

/// Failure surfaced by a sync engine operation.
///
/// Network problems never show up here; they resolve to queued entries or
/// cached data and are reported through outcomes instead.
#[derive(Debug, Error)]
pub enum SyncError {
  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("task title must not be empty")]
  EmptyTitle,
}

/// Failure of the caching intermediary.
#[derive(Debug, Error)]
pub enum CacheError {
  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Transport(#[from] TransportError),

  #[error("failed to precache {url}: {reason}")]
  Install { url: String, reason: String },

  #[error("intermediary is no longer running")]
  WorkerGone,

  #[error("invalid origin {0}")]
  InvalidOrigin(String),
}

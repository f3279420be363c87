//! Core traits and types for the response cache.

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::gateway::{Request, Response};

/// How a request is matched against stored entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
  /// Compare URLs without their query string
  pub ignore_search: bool,
}

/// A stored response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the response was stored
  pub cached_at: DateTime<Utc>,
}

/// Named buckets of request → response entries.
pub trait CacheStorage: Send + Sync {
  /// Create the bucket if needed.
  fn open_bucket(&self, name: &str) -> Result<(), StoreError>;

  fn has_bucket(&self, name: &str) -> Result<bool, StoreError>;

  /// Bucket names in creation order.
  fn bucket_names(&self) -> Result<Vec<String>, StoreError>;

  /// Remove a bucket and its entries; returns whether it existed.
  fn delete_bucket(&self, name: &str) -> Result<bool, StoreError>;

  /// Store (or overwrite) the entry for `request`.
  fn put(&self, bucket: &str, request: &Request, response: &Response) -> Result<(), StoreError>;

  /// Store every entry or none.
  fn put_all(&self, bucket: &str, entries: &[(Request, Response)]) -> Result<(), StoreError>;

  /// First matching entry, searching `bucket` or every bucket in creation order.
  fn lookup(
    &self,
    bucket: Option<&str>,
    request: &Request,
    options: MatchOptions,
  ) -> Result<Option<CachedResponse>, StoreError>;
}

/// Result of an intercepted request, including where the response came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Offline fallback document.
  pub fn offline(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at,
    }
  }

  /// Not intercepted at all.
  pub fn passthrough(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Passthrough,
      cached_at: None,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Stored copy
  Cache,
  /// Offline fallback document
  Offline,
  /// Request bypassed the cache
  Passthrough,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CacheSource::Network => write!(f, "network"),
      CacheSource::Cache => write!(f, "cache"),
      CacheSource::Offline => write!(f, "offline fallback"),
      CacheSource::Passthrough => write!(f, "passthrough"),
    }
  }
}

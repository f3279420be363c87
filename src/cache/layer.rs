//! Cache strategies sitting between clients and the network.

use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::classify::RequestClass;
use super::traits::{CacheResult, CacheStorage, MatchOptions};
use crate::error::CacheError;
use crate::gateway::{Request, Response, Transport, SERVED_FROM_HEADER};

const BUILTIN_OFFLINE_PAGE: &str = "<!doctype html>\
<html><head><meta charset=\"utf-8\"><title>Offline</title></head>\
<body><h1>Offline</h1><p>This page is not available without a connection.</p></body></html>";

/// Serves requests from the network or the cache depending on their class.
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  upstream: Arc<dyn Transport>,
  static_bucket: String,
  runtime_bucket: String,
  offline_url: Url,
}

impl CacheLayer {
  pub fn new(
    storage: Arc<dyn CacheStorage>,
    upstream: Arc<dyn Transport>,
    static_bucket: String,
    runtime_bucket: String,
    offline_url: Url,
  ) -> Self {
    Self {
      storage,
      upstream,
      static_bucket,
      runtime_bucket,
      offline_url,
    }
  }

  pub fn storage(&self) -> &Arc<dyn CacheStorage> {
    &self.storage
  }

  pub fn static_bucket(&self) -> &str {
    &self.static_bucket
  }

  pub fn runtime_bucket(&self) -> &str {
    &self.runtime_bucket
  }

  pub async fn serve(
    &self,
    class: RequestClass,
    request: Request,
  ) -> Result<CacheResult<Response>, CacheError> {
    debug!(?class, url = %request.url, "intercepted");
    match class {
      RequestClass::Passthrough => Ok(CacheResult::passthrough(self.upstream.send(request).await?)),
      RequestClass::Navigation => self.network_first(request, false).await,
      RequestClass::Api => self.network_first(request, true).await,
      RequestClass::Static => self.cache_first(request).await,
    }
  }

  /// Network-first.
  ///
  /// A successful response is copied into the runtime bucket. When the
  /// network fails, API requests fall back to their exact cached copy; every
  /// request then falls back to the offline document.
  pub async fn network_first(
    &self,
    request: Request,
    cached_fallback: bool,
  ) -> Result<CacheResult<Response>, CacheError> {
    match self.upstream.send(request.clone()).await {
      Ok(response) => {
        self.store_runtime(&request, &response);
        Ok(CacheResult::from_network(response))
      }
      Err(err) => {
        debug!(url = %request.url, error = %err, "network failed");
        if cached_fallback {
          if let Some(hit) = self
            .storage
            .lookup(None, &request, MatchOptions::default())?
          {
            return Ok(CacheResult::from_cache(
              hit.response.with_header(SERVED_FROM_HEADER, "cache"),
              hit.cached_at,
            ));
          }
        }
        self.offline()
      }
    }
  }

  /// Cache-first, matching without the query string.
  pub async fn cache_first(&self, request: Request) -> Result<CacheResult<Response>, CacheError> {
    if let Some(hit) = self
      .storage
      .lookup(None, &request, MatchOptions { ignore_search: true })?
    {
      return Ok(CacheResult::from_cache(
        hit.response.with_header(SERVED_FROM_HEADER, "cache"),
        hit.cached_at,
      ));
    }

    match self.upstream.send(request.clone()).await {
      Ok(response) => {
        self.store_runtime(&request, &response);
        Ok(CacheResult::from_network(response))
      }
      Err(err) => {
        debug!(url = %request.url, error = %err, "network failed");
        self.offline()
      }
    }
  }

  /// The cached offline document, or a built-in 503 page.
  ///
  /// Every answer produced without the network carries `SERVED_FROM_HEADER`.
  pub fn offline(&self) -> Result<CacheResult<Response>, CacheError> {
    let request = Request::get(self.offline_url.clone());
    match self
      .storage
      .lookup(Some(&self.static_bucket), &request, MatchOptions::default())?
    {
      Some(hit) => Ok(CacheResult::offline(
        hit.response.with_header(SERVED_FROM_HEADER, "offline"),
        Some(hit.cached_at),
      )),
      None => Ok(CacheResult::offline(
        Response::new(503, BUILTIN_OFFLINE_PAGE)
          .with_header("content-type", "text/html; charset=utf-8")
          .with_header(SERVED_FROM_HEADER, "offline"),
        None,
      )),
    }
  }

  /// Fetch every URL and store them in the static bucket, or store nothing.
  pub async fn precache(&self, urls: &[Url]) -> Result<usize, CacheError> {
    let fetches = urls.iter().map(|url| async move {
      let request = Request::get(url.clone());
      let response = self
        .upstream
        .send(request.clone())
        .await
        .map_err(|e| CacheError::Install {
          url: url.to_string(),
          reason: e.to_string(),
        })?;
      if !response.is_success() {
        return Err(CacheError::Install {
          url: url.to_string(),
          reason: format!("status {}", response.status),
        });
      }
      Ok((request, response))
    });
    let entries = try_join_all(fetches).await?;

    self.storage.put_all(&self.static_bucket, &entries)?;
    info!(bucket = %self.static_bucket, count = entries.len(), "precached");
    Ok(entries.len())
  }

  /// Delete every bucket other than the current static and runtime ones.
  pub fn evict_stale(&self) -> Result<Vec<String>, CacheError> {
    let mut evicted = Vec::new();
    for name in self.storage.bucket_names()? {
      if name != self.static_bucket && name != self.runtime_bucket {
        self.storage.delete_bucket(&name)?;
        info!(bucket = %name, "evicted");
        evicted.push(name);
      }
    }
    Ok(evicted)
  }

  fn store_runtime(&self, request: &Request, response: &Response) {
    if !response.is_success() {
      return;
    }
    if let Err(e) = self.storage.put(&self.runtime_bucket, request, response) {
      warn!(url = %request.url, error = %e, "failed to cache response");
    }
  }
}

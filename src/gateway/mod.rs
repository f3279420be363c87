//! Thin wrapper over the transport that normalizes API success and failure.

mod transport;

pub use transport::{ReqwestTransport, Request, RequestMode, Response, Transport, SERVED_FROM_HEADER};

use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::ApiError;

/// Method and optional JSON body of an API call
#[derive(Debug, Clone)]
pub struct CallOptions {
  pub method: Method,
  pub body: Option<Value>,
}

impl CallOptions {
  pub fn get() -> Self {
    Self {
      method: Method::GET,
      body: None,
    }
  }

  pub fn new(method: Method, body: Option<Value>) -> Self {
    Self { method, body }
  }
}

/// JSON API client resolving paths against the server origin
#[derive(Clone)]
pub struct ApiGateway<T> {
  transport: T,
  origin: Url,
}

impl<T: Transport> ApiGateway<T> {
  pub fn new(transport: T, origin: &str) -> Result<Self, ApiError> {
    let origin = Url::parse(origin)
      .map_err(|e| ApiError::InvalidRequest(format!("{}: {}", origin, e)))?;
    Ok(Self { transport, origin })
  }

  /// Perform one call.
  ///
  /// Returns the parsed JSON body, or `None` when the body is empty. Any
  /// non-2xx status is an `ApiError::Rejected`, never a value, and an answer
  /// the cache produced in place of the server is `ApiError::ServedFromCache`.
  pub async fn call(&self, path: &str, options: CallOptions) -> Result<Option<Value>, ApiError> {
    let url = self
      .origin
      .join(path)
      .map_err(|e| ApiError::InvalidRequest(format!("{}: {}", path, e)))?;

    let mut request = Request::new(options.method, url);
    if let Some(body) = options.body {
      request = request
        .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
        .with_body(serde_json::to_vec(&body)?);
    }

    debug!(method = %request.method, url = %request.url, "api call");
    let response = self.transport.send(request).await?;

    if let Some(source) = response.served_from() {
      return Err(ApiError::ServedFromCache {
        served_by: source.to_string(),
      });
    }

    if !response.is_success() {
      return Err(ApiError::Rejected {
        status: response.status,
        body: String::from_utf8_lossy(&response.body).into_owned(),
      });
    }

    if response.body.is_empty() {
      return Ok(None);
    }

    Ok(Some(serde_json::from_slice(&response.body)?))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::TransportError;
  use async_trait::async_trait;
  use serde_json::json;
  use std::sync::Mutex;

  /// Replies with a fixed response and remembers the last request.
  struct Canned {
    reply: Option<Response>,
    seen: Mutex<Option<Request>>,
  }

  impl Canned {
    fn new(reply: Option<Response>) -> Self {
      Self {
        reply,
        seen: Mutex::new(None),
      }
    }
  }

  #[async_trait]
  impl Transport for Canned {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
      *self.seen.lock().unwrap() = Some(request);
      self
        .reply
        .clone()
        .ok_or_else(|| TransportError::Unreachable("offline".into()))
    }
  }

  #[tokio::test]
  async fn test_json_body_sets_content_type() {
    let gateway =
      ApiGateway::new(Canned::new(Some(Response::new(201, r#"{"idTarea":1}"#))), "http://localhost:8080")
        .unwrap();
    let result = gateway
      .call(
        "/apiTarea/tareas",
        CallOptions::new(Method::POST, Some(json!({ "titulo": "a" }))),
      )
      .await
      .unwrap();
    assert_eq!(result, Some(json!({ "idTarea": 1 })));

    let seen = gateway.transport.seen.lock().unwrap().clone().unwrap();
    assert_eq!(seen.url.as_str(), "http://localhost:8080/apiTarea/tareas");
    assert_eq!(seen.headers.get(CONTENT_TYPE).unwrap(), "application/json");
    assert_eq!(seen.body.unwrap(), br#"{"titulo":"a"}"#.to_vec());
  }

  #[tokio::test]
  async fn test_no_body_no_content_type() {
    let gateway = ApiGateway::new(Canned::new(Some(Response::new(204, ""))), "http://localhost").unwrap();
    let result = gateway
      .call("/apiTarea/tareas/1", CallOptions::new(Method::DELETE, None))
      .await
      .unwrap();
    assert_eq!(result, None);

    let seen = gateway.transport.seen.lock().unwrap().clone().unwrap();
    assert!(seen.headers.get(CONTENT_TYPE).is_none());
    assert!(seen.body.is_none());
  }

  #[tokio::test]
  async fn test_non_success_is_rejection() {
    let gateway =
      ApiGateway::new(Canned::new(Some(Response::new(400, "bad id"))), "http://localhost").unwrap();
    let err = gateway.call("/x", CallOptions::get()).await.unwrap_err();
    assert!(matches!(err, ApiError::Rejected { status: 400, ref body } if body == "bad id"));
  }

  #[tokio::test]
  async fn test_cache_answer_is_not_a_server_answer() {
    let cached = Response::new(200, "[]").with_header(SERVED_FROM_HEADER, "cache");
    let gateway = ApiGateway::new(Canned::new(Some(cached)), "http://localhost").unwrap();
    let err = gateway.call("/apiTarea/tareas", CallOptions::get()).await.unwrap_err();
    assert!(matches!(err, ApiError::ServedFromCache { ref served_by } if served_by == "cache"));
  }

  #[tokio::test]
  async fn test_unreachable_and_decode_errors() {
    let gateway = ApiGateway::new(Canned::new(None), "http://localhost").unwrap();
    let err = gateway.call("/x", CallOptions::get()).await.unwrap_err();
    assert!(matches!(err, ApiError::Unreachable(_)));

    let gateway =
      ApiGateway::new(Canned::new(Some(Response::new(200, "<html>"))), "http://localhost").unwrap();
    let err = gateway.call("/x", CallOptions::get()).await.unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)));
  }
}

use reqwest::Method;

use crate::gateway::{Request, RequestMode};

/// Which strategy an intercepted request is served with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Non-GET, forwarded untouched
  Passthrough,
  /// HTML document load, network-first
  Navigation,
  /// API resource, network-first with exact cached fallback
  Api,
  /// Everything else, cache-first
  Static,
}

pub fn classify(request: &Request, api_prefixes: &[String]) -> RequestClass {
  if request.method != Method::GET {
    return RequestClass::Passthrough;
  }
  if request.mode == RequestMode::Navigate || request.accepts_html() {
    return RequestClass::Navigation;
  }
  let path = request.url.path();
  if api_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str())) {
    return RequestClass::Api;
  }
  RequestClass::Static
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::header::{HeaderValue, ACCEPT};
  use url::Url;

  fn prefixes() -> Vec<String> {
    vec!["/api/".to_string(), "/apiTarea/".to_string()]
  }

  fn url(path: &str) -> Url {
    Url::parse("http://localhost:8080").unwrap().join(path).unwrap()
  }

  #[test]
  fn test_non_get_passes_through() {
    let post = Request::new(Method::POST, url("/apiTarea/tareas"));
    assert_eq!(classify(&post, &prefixes()), RequestClass::Passthrough);
  }

  #[test]
  fn test_navigation_by_mode_or_accept() {
    assert_eq!(
      classify(&Request::navigate(url("/")), &prefixes()),
      RequestClass::Navigation
    );
    let html = Request::get(url("/apiTarea/tareas"))
      .with_header(ACCEPT, HeaderValue::from_static("text/html"));
    assert_eq!(classify(&html, &prefixes()), RequestClass::Navigation);
  }

  #[test]
  fn test_api_prefix_and_static_default() {
    assert_eq!(
      classify(&Request::get(url("/apiTarea/tareas")), &prefixes()),
      RequestClass::Api
    );
    assert_eq!(
      classify(&Request::get(url("/api/health")), &prefixes()),
      RequestClass::Api
    );
    // prefix match is on whole path prefix, including the trailing slash
    assert_eq!(
      classify(&Request::get(url("/apiary.png")), &prefixes()),
      RequestClass::Static
    );
    assert_eq!(
      classify(&Request::get(url("/app.js?v=2")), &prefixes()),
      RequestClass::Static
    );
  }
}

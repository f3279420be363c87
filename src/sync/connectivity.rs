use reqwest::Method;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;
use url::Url;

use crate::gateway::{Request, Transport};

/// Shared online/offline flag.
///
/// Clones observe the same flag; subscribers are woken on every transition.
#[derive(Clone)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Update the flag; returns true if it changed.
  pub fn set_online(&self, online: bool) -> bool {
    self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    })
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

/// Whether the server answers at all. Any HTTP status counts as reachable.
pub async fn probe<T: Transport>(transport: &T, origin: &Url) -> bool {
  match transport.send(Request::new(Method::HEAD, origin.clone())).await {
    Ok(response) => {
      debug!(status = response.status, "server reachable");
      true
    }
    Err(e) => {
      debug!(error = %e, "server unreachable");
      false
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_support::FakeServer;

  #[tokio::test]
  async fn test_transitions_wake_subscribers() {
    let connectivity = Connectivity::new(false);
    let mut rx = connectivity.subscribe();

    assert!(!connectivity.set_online(false));
    assert!(connectivity.set_online(true));
    rx.changed().await.unwrap();
    assert!(*rx.borrow_and_update());
    assert!(connectivity.is_online());
  }

  #[tokio::test]
  async fn test_probe_follows_server_reachability() {
    let server = FakeServer::new();
    let origin = Url::parse("http://localhost:8080").unwrap();
    assert!(probe(&server, &origin).await);

    server.set_online(false);
    assert!(!probe(&server, &origin).await);
  }
}

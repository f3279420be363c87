use serde_json::Value;

use crate::error::ApiError;
use crate::gateway::{ApiGateway, CallOptions, Transport};

use super::api_types::ApiTask;
use super::types::OutboxEntry;

/// Paths of the task API under its base prefix
#[derive(Debug, Clone)]
pub struct TaskRoutes {
  base: String,
}

impl TaskRoutes {
  pub fn new(base: &str) -> Self {
    Self {
      base: base.trim_end_matches('/').to_string(),
    }
  }

  pub fn collection(&self) -> String {
    format!("{}/tareas", self.base)
  }

  pub fn item(&self, id: &str) -> String {
    format!("{}/tareas/{}", self.base, id)
  }

  pub fn completion(&self, id: &str) -> String {
    format!("{}/tareas/{}/completada", self.base, id)
  }
}

/// Task server client
#[derive(Clone)]
pub struct TaskApi<T> {
  gateway: ApiGateway<T>,
  routes: TaskRoutes,
}

impl<T: Transport> TaskApi<T> {
  pub fn new(gateway: ApiGateway<T>, routes: TaskRoutes) -> Self {
    Self { gateway, routes }
  }

  pub fn routes(&self) -> &TaskRoutes {
    &self.routes
  }

  /// Fetch the whole collection.
  pub async fn list(&self) -> Result<Vec<ApiTask>, ApiError> {
    match self
      .gateway
      .call(&self.routes.collection(), CallOptions::get())
      .await?
    {
      Some(value) => Ok(serde_json::from_value(value)?),
      None => Ok(Vec::new()),
    }
  }

  /// Send a mutation to `url` (the entry's own url after id rewriting).
  pub async fn send(&self, entry: &OutboxEntry, url: &str) -> Result<Option<Value>, ApiError> {
    let method = entry.kind.http_method().ok_or_else(|| {
      ApiError::InvalidRequest(format!("unsupported method in queued entry {:?}", entry.kind))
    })?;
    self
      .gateway
      .call(url, CallOptions::new(method, entry.body.clone()))
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_routes_trim_trailing_slash() {
    let routes = TaskRoutes::new("/apiTarea/");
    assert_eq!(routes.collection(), "/apiTarea/tareas");
    assert_eq!(routes.item("7"), "/apiTarea/tareas/7");
    assert_eq!(routes.completion("7"), "/apiTarea/tareas/7/completada");
  }
}

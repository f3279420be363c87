use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::api_types::{CompletionBody, NewTaskBody};
use super::client::TaskRoutes;

/// Prefix that marks an id as locally generated.
pub const PROVISIONAL_PREFIX: &str = "c-";

const PROVISIONAL_LEN: usize = 7;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generate a provisional id such as `c-k3x9a0q`.
pub fn provisional_id() -> String {
  let mut rng = rand::thread_rng();
  let suffix: String = (0..PROVISIONAL_LEN)
    .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
    .collect();
  format!("{}{}", PROVISIONAL_PREFIX, suffix)
}

/// Task record as kept in the local store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
  pub id: String,
  pub title: String,
  pub completed: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at_server: Option<String>,
  /// Set only until the server confirms the record
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub client_id: Option<String>,
}

impl Task {
  /// New unsynced task keyed under a fresh provisional id.
  pub fn provisional(title: impl Into<String>) -> Self {
    let id = provisional_id();
    Self {
      id: id.clone(),
      title: title.into(),
      completed: false,
      created_at: Some(Utc::now()),
      created_at_server: None,
      client_id: Some(id),
    }
  }

  pub fn is_provisional(&self) -> bool {
    self.client_id.is_some()
  }
}

/// What a queued mutation does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
  Create,
  UpdateCompletion,
  Delete,
  /// Any other verb, replayed as-is
  Request { method: String },
}

impl EntryKind {
  pub fn http_method(&self) -> Option<reqwest::Method> {
    match self {
      EntryKind::Create => Some(reqwest::Method::POST),
      EntryKind::UpdateCompletion => Some(reqwest::Method::PUT),
      EntryKind::Delete => Some(reqwest::Method::DELETE),
      EntryKind::Request { method } => reqwest::Method::from_bytes(method.as_bytes()).ok(),
    }
  }
}

/// A mutation waiting for server confirmation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
  /// Queue position, assigned on enqueue
  #[serde(skip)]
  pub position: i64,
  pub kind: EntryKind,
  pub url: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body: Option<Value>,
  #[serde(skip)]
  pub attempts: u32,
  #[serde(skip)]
  pub last_error: Option<String>,
}

impl OutboxEntry {
  fn new(kind: EntryKind, url: String, body: Option<Value>) -> Self {
    Self {
      position: 0,
      kind,
      url,
      body,
      attempts: 0,
      last_error: None,
    }
  }

  pub fn create(routes: &TaskRoutes, task: &Task) -> Result<Self, serde_json::Error> {
    let body = NewTaskBody {
      titulo: task.title.clone(),
      completada: task.completed,
      client_id: task.client_id.clone(),
    };
    Ok(Self::new(
      EntryKind::Create,
      routes.collection(),
      Some(serde_json::to_value(body)?),
    ))
  }

  pub fn update_completion(
    routes: &TaskRoutes,
    id: &str,
    completed: bool,
  ) -> Result<Self, serde_json::Error> {
    let body = CompletionBody {
      completada: completed,
    };
    Ok(Self::new(
      EntryKind::UpdateCompletion,
      routes.completion(id),
      Some(serde_json::to_value(body)?),
    ))
  }

  pub fn delete(routes: &TaskRoutes, id: &str) -> Self {
    Self::new(EntryKind::Delete, routes.item(id), None)
  }

  pub fn request(method: reqwest::Method, url: impl Into<String>, body: Option<Value>) -> Self {
    Self::new(
      EntryKind::Request {
        method: method.as_str().to_string(),
      },
      url.into(),
      body,
    )
  }

  /// Provisional id a `CREATE` entry will confirm.
  pub fn provisional_id(&self) -> Option<&str> {
    if self.kind != EntryKind::Create {
      return None;
    }
    self.body.as_ref()?.get("clientId")?.as_str()
  }
}

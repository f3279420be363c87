//! Serde types matching the task server's JSON.
//!
//! These are separate from [`Task`] so the wire shape (`idTarea`, `titulo`,
//! `completada`) stays out of the local store.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::types::{provisional_id, Task};

/// Task as returned by the server
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiTask {
  #[serde(rename = "idTarea", default, deserialize_with = "deserialize_id")]
  pub id_tarea: Option<String>,
  #[serde(default, deserialize_with = "deserialize_id")]
  pub id: Option<String>,
  pub titulo: Option<String>,
  pub completada: Option<bool>,
  #[serde(rename = "createdAt", default)]
  pub created_at: Option<Value>,
  #[serde(rename = "created_at", default)]
  pub created_at_snake: Option<Value>,
}

impl ApiTask {
  /// Server-assigned identifier, whichever field carries it.
  pub fn server_id(&self) -> Option<&str> {
    self.id_tarea.as_deref().or(self.id.as_deref())
  }

  /// Convert into a confirmed local record.
  ///
  /// A server row without any id still gets a local key so it can be shown.
  pub fn into_task(self) -> Task {
    let id = self
      .server_id()
      .map(String::from)
      .unwrap_or_else(provisional_id);
    let created_at_server = self
      .created_at
      .or(self.created_at_snake)
      .and_then(|v| value_to_string(&v));

    Task {
      id,
      title: self.titulo.unwrap_or_default(),
      completed: self.completada.unwrap_or(false),
      created_at: None,
      created_at_server,
      client_id: None,
    }
  }
}

/// Body of `POST /tareas`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTaskBody {
  pub titulo: String,
  pub completada: bool,
  #[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
  pub client_id: Option<String>,
}

/// Body of `PUT /tareas/{id}/completada`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionBody {
  pub completada: bool,
}

/// Ids arrive as numbers (`idTarea: 12`) or strings; keep them as strings.
fn deserialize_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  let value = Option::<Value>::deserialize(deserializer)?;
  Ok(value.as_ref().and_then(value_to_string))
}

fn value_to_string(value: &Value) -> Option<String> {
  match value {
    Value::String(s) if !s.is_empty() => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

//! In-memory task server used by unit tests.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::db::Database;
use crate::error::TransportError;
use crate::gateway::{ApiGateway, Request, Response, Transport};
use crate::sync::{Connectivity, SyncEngine};
use crate::tasks::{TaskApi, TaskRoutes};

pub const ORIGIN: &str = "http://localhost:8080";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTask {
  pub id: u64,
  pub title: String,
  pub completed: bool,
}

type Predicate = Box<dyn Fn(&Request) -> bool + Send + Sync>;

#[derive(Default)]
struct ServerState {
  tasks: Vec<ServerTask>,
  next_id: u64,
  online: bool,
  assets: HashMap<String, (String, Vec<u8>)>,
  requests: Vec<(Method, String)>,
  drop_when: Option<Predicate>,
  reject_when: Option<(u16, Predicate)>,
}

/// Speaks the `/apiTarea/tareas` contract and serves registered assets.
///
/// Ids are numeric like the real server; a provisional id in a path is a 400.
pub struct FakeServer {
  state: Mutex<ServerState>,
}

impl FakeServer {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      state: Mutex::new(ServerState {
        next_id: 1,
        online: true,
        ..Default::default()
      }),
    })
  }

  pub fn set_online(&self, online: bool) {
    self.state.lock().unwrap().online = online;
  }

  pub fn seed(&self, title: &str, completed: bool) -> u64 {
    let mut state = self.state.lock().unwrap();
    let id = state.next_id;
    state.next_id += 1;
    state.tasks.push(ServerTask {
      id,
      title: title.to_string(),
      completed,
    });
    id
  }

  pub fn tasks(&self) -> Vec<ServerTask> {
    self.state.lock().unwrap().tasks.clone()
  }

  pub fn with_asset(&self, path: &str, content_type: &str, body: &str) {
    self.state.lock().unwrap().assets.insert(
      path.to_string(),
      (content_type.to_string(), body.as_bytes().to_vec()),
    );
  }

  /// Requests seen so far, as (method, path-and-query).
  pub fn requests(&self) -> Vec<(Method, String)> {
    self.state.lock().unwrap().requests.clone()
  }

  pub fn count(&self, method: Method, path: &str) -> usize {
    self
      .requests()
      .iter()
      .filter(|(m, p)| *m == method && p == path)
      .count()
  }

  /// Fail matching requests as if the network dropped them.
  pub fn drop_when(&self, predicate: impl Fn(&Request) -> bool + Send + Sync + 'static) {
    self.state.lock().unwrap().drop_when = Some(Box::new(predicate));
  }

  /// Answer matching requests with `status`.
  pub fn reject_when(
    &self,
    status: u16,
    predicate: impl Fn(&Request) -> bool + Send + Sync + 'static,
  ) {
    self.state.lock().unwrap().reject_when = Some((status, Box::new(predicate)));
  }

  pub fn heal(&self) {
    let mut state = self.state.lock().unwrap();
    state.drop_when = None;
    state.reject_when = None;
  }

  fn handle(state: &mut ServerState, request: &Request) -> Response {
    let path = request.url.path().to_string();
    let body: Value = request
      .body
      .as_ref()
      .and_then(|b| serde_json::from_slice(b).ok())
      .unwrap_or(Value::Null);

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match (request.method.clone(), segments.as_slice()) {
      (Method::GET, ["apiTarea", "tareas"]) => {
        let list: Vec<Value> = state.tasks.iter().map(echo).collect();
        json_response(200, Value::Array(list))
      }
      (Method::POST, ["apiTarea", "tareas"]) => {
        let title = body["titulo"].as_str().unwrap_or_default().to_string();
        if title.is_empty() {
          return Response::new(400, "titulo is required");
        }
        let task = ServerTask {
          id: state.next_id,
          title,
          completed: body["completada"].as_bool().unwrap_or(false),
        };
        state.next_id += 1;
        let response = json_response(201, echo(&task));
        state.tasks.push(task);
        response
      }
      (Method::PUT, ["apiTarea", "tareas", id, "completada"]) => {
        let Ok(id) = id.parse::<u64>() else {
          return Response::new(400, "bad id");
        };
        let Some(completed) = body["completada"].as_bool() else {
          return Response::new(400, "missing completada");
        };
        match state.tasks.iter_mut().find(|t| t.id == id) {
          Some(task) => {
            task.completed = completed;
            json_response(200, echo(task))
          }
          None => Response::new(404, "not found"),
        }
      }
      (Method::DELETE, ["apiTarea", "tareas", id]) => {
        let Ok(id) = id.parse::<u64>() else {
          return Response::new(400, "bad id");
        };
        state.tasks.retain(|t| t.id != id);
        Response::new(204, "")
      }
      (Method::HEAD, _) => Response::new(200, ""),
      (Method::GET, _) => match state.assets.get(&path) {
        Some((content_type, bytes)) => {
          Response::new(200, bytes.clone()).with_header("content-type", content_type)
        }
        None => Response::new(404, "missing"),
      },
      _ => Response::new(405, ""),
    }
  }
}

fn echo(task: &ServerTask) -> Value {
  json!({
    "idTarea": task.id,
    "titulo": task.title,
    "completada": task.completed,
    "createdAt": "2024-01-01T00:00:00.000+00:00",
  })
}

fn json_response(status: u16, value: Value) -> Response {
  Response::new(status, serde_json::to_vec(&value).unwrap())
    .with_header("content-type", "application/json")
}

#[async_trait]
impl Transport for FakeServer {
  async fn send(&self, request: Request) -> Result<Response, TransportError> {
    let mut state = self.state.lock().unwrap();
    let target = match request.url.query() {
      Some(q) => format!("{}?{}", request.url.path(), q),
      None => request.url.path().to_string(),
    };
    state.requests.push((request.method.clone(), target));

    if !state.online {
      return Err(TransportError::Unreachable("connection refused".into()));
    }
    if state.drop_when.as_ref().is_some_and(|p| p(&request)) {
      return Err(TransportError::Unreachable("connection reset".into()));
    }
    if let Some((status, predicate)) = &state.reject_when {
      if predicate(&request) {
        return Ok(Response::new(*status, "rejected"));
      }
    }
    Ok(Self::handle(&mut state, &request))
  }
}

/// Engine over an in-memory database talking to `server`.
pub fn engine(
  server: &Arc<FakeServer>,
  config: &Config,
) -> (SyncEngine<Arc<FakeServer>>, Database, Connectivity) {
  let db = Database::open_in_memory().unwrap();
  let connectivity = Connectivity::new(true);
  let gateway = ApiGateway::new(Arc::clone(server), ORIGIN).unwrap();
  let api = TaskApi::new(gateway, TaskRoutes::new(&config.server.api_base));
  let engine = SyncEngine::new(db.clone(), api, connectivity.clone(), &config.sync);
  (engine, db, connectivity)
}

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::db::Database;
use crate::error::{ApiError, StoreError, SyncError};
use crate::event::ClientMessage;
use crate::gateway::Transport;
use crate::store::{Outbox, TaskEcho, TaskStore};
use crate::tasks::api_types::ApiTask;
use crate::tasks::{OutboxEntry, Task, TaskApi};

use super::connectivity::Connectivity;
use super::state::{Notice, SyncState, TaskView};

/// Asks the platform for a background sync opportunity under a tag.
pub trait SyncRegistrar: Send + Sync {
  fn register(&self, tag: &str);
}

/// Result of a refresh that did not hit a local storage failure.
#[derive(Debug)]
pub enum RefreshOutcome {
  /// Store replaced with the server collection
  Fresh { count: usize },
  /// Server unavailable; the local cache was published instead
  Cached { count: usize, cause: ApiError },
}

impl RefreshOutcome {
  pub fn is_fresh(&self) -> bool {
    matches!(self, RefreshOutcome::Fresh { .. })
  }
}

/// Result of a drain that did not hit a local storage failure.
#[derive(Debug)]
pub enum DrainOutcome {
  /// Nothing queued; refreshed if online
  Empty { refresh: Option<RefreshOutcome> },
  /// Every snapshot entry replayed, queue cleared, store refreshed
  Completed {
    replayed: usize,
    quarantined: usize,
    refresh: RefreshOutcome,
  },
  /// Stopped at the first failing entry; nothing was cleared
  Aborted {
    replayed: usize,
    failed_position: i64,
    error: ApiError,
  },
}

/// Result of a user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
  /// The server accepted the change right away
  Confirmed,
  /// The change waits in the outbox
  Queued,
  /// No local record with that id
  NotFound,
}

/// Foreground owner of the task store and outbox.
///
/// Refreshes, drains and immediate sends are serialized by one async lock so
/// queued mutations replay strictly in order.
pub struct SyncEngine<T> {
  tasks: TaskStore,
  outbox: Outbox,
  api: TaskApi<T>,
  connectivity: Connectivity,
  registrar: Option<Arc<dyn SyncRegistrar>>,
  sync_tag: String,
  max_rejections: Option<u32>,
  lock: Mutex<()>,
  state: watch::Sender<SyncState>,
  view: watch::Sender<TaskView>,
}

impl<T: Transport> SyncEngine<T> {
  pub fn new(db: Database, api: TaskApi<T>, connectivity: Connectivity, config: &SyncConfig) -> Self {
    let (state, _) = watch::channel(SyncState::Idle);
    let (view, _) = watch::channel(TaskView::default());
    Self {
      tasks: TaskStore::new(db.clone()),
      outbox: Outbox::new(db),
      api,
      connectivity,
      registrar: None,
      sync_tag: config.tag.clone(),
      max_rejections: config.max_rejections,
      lock: Mutex::new(()),
      state,
      view,
    }
  }

  pub fn with_registrar(mut self, registrar: Arc<dyn SyncRegistrar>) -> Self {
    self.registrar = Some(registrar);
    self
  }

  pub fn tasks(&self) -> &TaskStore {
    &self.tasks
  }

  pub fn outbox(&self) -> &Outbox {
    &self.outbox
  }

  pub fn state(&self) -> SyncState {
    self.state.borrow().clone()
  }

  pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
    self.state.subscribe()
  }

  pub fn subscribe_view(&self) -> watch::Receiver<TaskView> {
    self.view.subscribe()
  }

  /// Replace the store with the server collection and publish it.
  ///
  /// A network or server failure is not an error: the local cache is
  /// published and `RefreshOutcome::Cached` says why.
  pub async fn refresh(&self) -> Result<RefreshOutcome, SyncError> {
    let _guard = self.lock.lock().await;
    self.refresh_locked().await
  }

  async fn refresh_locked(&self) -> Result<RefreshOutcome, SyncError> {
    self.state.send_replace(SyncState::Refreshing);
    let outcome = self.refresh_inner().await;
    self.settle(outcome.as_ref().err().map(ToString::to_string));
    outcome
  }

  async fn refresh_inner(&self) -> Result<RefreshOutcome, SyncError> {
    match self.api.list().await {
      Ok(server_tasks) => {
        let mut tasks: Vec<Task> = server_tasks.into_iter().map(ApiTask::into_task).collect();

        // Offline creations still waiting in the outbox stay visible.
        let pending = self.pending_creates()?;
        if !pending.is_empty() {
          tasks.extend(
            self
              .tasks
              .get_all()?
              .into_iter()
              .filter(|t| t.is_provisional() && pending.contains(&t.id)),
          );
        }

        self.tasks.replace_all(&tasks)?;
        let count = self.publish(None)?;
        info!(count, "refreshed tasks from server");
        Ok(RefreshOutcome::Fresh { count })
      }
      Err(cause) => {
        warn!(error = %cause, "could not refresh from server, using local cache");
        let count = self.publish(None)?;
        Ok(RefreshOutcome::Cached { count, cause })
      }
    }
  }

  /// Replay the outbox in order, then refresh.
  pub async fn drain(&self) -> Result<DrainOutcome, SyncError> {
    let _guard = self.lock.lock().await;
    self.drain_locked().await
  }

  async fn drain_locked(&self) -> Result<DrainOutcome, SyncError> {
    let outcome = self.drain_inner().await;
    match &outcome {
      Ok(DrainOutcome::Aborted { error, .. }) => self.settle(Some(error.to_string())),
      Ok(_) => self.settle(None),
      Err(e) => self.settle(Some(e.to_string())),
    }
    outcome
  }

  async fn drain_inner(&self) -> Result<DrainOutcome, SyncError> {
    let entries = self.outbox.drain_snapshot()?;
    let Some(last_position) = entries.last().map(|e| e.position) else {
      let refresh = if self.connectivity.is_online() {
        Some(self.refresh_locked().await?)
      } else {
        None
      };
      return Ok(DrainOutcome::Empty { refresh });
    };

    self.state.send_replace(SyncState::Draining);
    info!(entries = entries.len(), "draining outbox");

    let mut remaps = self.outbox.remaps()?;
    let mut replayed = 0;
    let mut quarantined = 0;

    for entry in &entries {
      if let Some(provisional) = entry.provisional_id() {
        if remaps.contains_key(provisional) {
          debug!(position = entry.position, provisional, "create already confirmed, skipping");
          replayed += 1;
          continue;
        }
      }

      let url = rewrite_url(&entry.url, &remaps);
      match self.api.send(entry, &url).await {
        Ok(response) => {
          if let Some((provisional, server_id)) = self.confirm_create(entry, response)? {
            self.outbox.record_remap(&provisional, &server_id)?;
            remaps.insert(provisional, server_id);
          }
          replayed += 1;
        }
        Err(error) => {
          let attempts = self.outbox.record_failure(entry.position, &error.to_string())?;
          if self.should_quarantine(&error, attempts) {
            warn!(
              position = entry.position,
              attempts,
              url = %url,
              error = %error,
              "server keeps rejecting queued entry, moving it to dead letters"
            );
            self.outbox.quarantine(entry.position)?;
            quarantined += 1;
            continue;
          }

          warn!(
            position = entry.position,
            attempts,
            url = %url,
            error = %error,
            "replay failed, outbox left queued"
          );
          return Ok(DrainOutcome::Aborted {
            replayed,
            failed_position: entry.position,
            error,
          });
        }
      }
    }

    self.outbox.clear_through(last_position)?;
    if self.outbox.is_empty()? {
      self.outbox.clear_remaps()?;
    }
    info!(replayed, quarantined, "outbox drained");

    let refresh = self.refresh_locked().await?;
    Ok(DrainOutcome::Completed {
      replayed,
      quarantined,
      refresh,
    })
  }

  /// Create a task locally and try to confirm it.
  pub async fn create(&self, title: &str) -> Result<ActionOutcome, SyncError> {
    let title = title.trim();
    if title.is_empty() {
      return Err(SyncError::EmptyTitle);
    }

    let task = Task::provisional(title);
    self.tasks.put(&task)?;
    self.publish(None)?;

    let entry = OutboxEntry::create(self.api.routes(), &task).map_err(StoreError::from)?;
    self.submit(entry, Notice::CreatedLocally).await
  }

  /// Mark a task done or not done.
  pub async fn set_completed(&self, id: &str, completed: bool) -> Result<ActionOutcome, SyncError> {
    let Some(mut task) = self.tasks.get(id)? else {
      return Ok(ActionOutcome::NotFound);
    };
    task.completed = completed;
    self.tasks.put(&task)?;
    self.publish(None)?;

    let entry =
      OutboxEntry::update_completion(self.api.routes(), id, completed).map_err(StoreError::from)?;
    self.submit(entry, Notice::ChangeQueued).await
  }

  pub async fn delete(&self, id: &str) -> Result<ActionOutcome, SyncError> {
    if self.tasks.get(id)?.is_none() {
      return Ok(ActionOutcome::NotFound);
    }
    self.tasks.delete(id)?;
    self.publish(None)?;

    let entry = OutboxEntry::delete(self.api.routes(), id);
    self.submit(entry, Notice::DeleteQueued).await
  }

  /// Send now when nothing is queued ahead; otherwise queue behind.
  async fn submit(&self, entry: OutboxEntry, notice: Notice) -> Result<ActionOutcome, SyncError> {
    if !self.connectivity.is_online() {
      self.queue(&entry, notice)?;
      return Ok(ActionOutcome::Queued);
    }

    let _guard = self.lock.lock().await;
    if !self.outbox.is_empty()? {
      self.queue(&entry, notice)?;
      self.drain_locked().await?;
      return Ok(ActionOutcome::Queued);
    }

    match self.api.send(&entry, &entry.url).await {
      Ok(response) => {
        self.confirm_create(&entry, response)?;
        self.refresh_locked().await?;
        Ok(ActionOutcome::Confirmed)
      }
      Err(error) => {
        warn!(url = %entry.url, error = %error, "could not confirm change, queueing it");
        self.queue(&entry, notice)?;
        Ok(ActionOutcome::Queued)
      }
    }
  }

  fn queue(&self, entry: &OutboxEntry, notice: Notice) -> Result<(), SyncError> {
    let position = self.outbox.enqueue(entry)?;
    debug!(position, url = %entry.url, "queued change");
    self.publish(Some(notice))?;
    self.register_background_sync();
    Ok(())
  }

  /// Re-key the local record of a confirmed `CREATE`.
  fn confirm_create(
    &self,
    entry: &OutboxEntry,
    response: Option<Value>,
  ) -> Result<Option<(String, String)>, SyncError> {
    let (Some(provisional), Some(value)) = (entry.provisional_id(), response) else {
      return Ok(None);
    };
    let Ok(echo) = serde_json::from_value::<ApiTask>(value) else {
      return Ok(None);
    };
    let Some(server_id) = echo.server_id() else {
      return Ok(None);
    };

    let fields = TaskEcho {
      title: echo.titulo.clone().filter(|t| !t.is_empty()),
      completed: echo.completada,
    };
    self.tasks.remap_id(provisional, server_id, &fields)?;
    Ok(Some((provisional.to_string(), server_id.to_string())))
  }

  fn should_quarantine(&self, error: &ApiError, attempts: u32) -> bool {
    match self.max_rejections {
      Some(limit) => error.is_client_rejection() && attempts >= limit,
      None => false,
    }
  }

  fn pending_creates(&self) -> Result<HashSet<String>, StoreError> {
    Ok(
      self
        .outbox
        .drain_snapshot()?
        .iter()
        .filter_map(|e| e.provisional_id().map(String::from))
        .collect(),
    )
  }

  fn register_background_sync(&self) {
    if let Some(registrar) = &self.registrar {
      registrar.register(&self.sync_tag);
    }
  }

  fn publish(&self, notice: Option<Notice>) -> Result<usize, StoreError> {
    let tasks = self.tasks.get_all()?;
    let count = tasks.len();
    self.view.send_replace(TaskView { tasks, notice });
    Ok(count)
  }

  fn settle(&self, error: Option<String>) {
    self.state.send_replace(match error {
      Some(reason) => SyncState::Error(reason),
      None => SyncState::Idle,
    });
  }
}

impl<T: Transport + 'static> SyncEngine<T> {
  /// React to connectivity transitions and intermediary messages until the
  /// message channel closes.
  ///
  /// Coming online drains directly. A sync message drains only when something
  /// is still queued, so the message that follows a reconnect is a no-op.
  pub async fn run(self: Arc<Self>, mut messages: broadcast::Receiver<ClientMessage>) {
    let mut online = self.connectivity.subscribe();
    loop {
      tokio::select! {
        changed = online.changed() => {
          if changed.is_err() {
            break;
          }
          let is_online = *online.borrow_and_update();
          if is_online {
            info!("connection restored");
            self.drain_logged().await;
          } else {
            info!("connection lost");
          }
        }
        message = messages.recv() => match message {
          Ok(ClientMessage::SyncOutbox) => {
            if self.outbox.is_empty().unwrap_or(false) {
              debug!("background sync requested with nothing queued");
            } else {
              debug!("background sync requested");
              self.drain_logged().await;
            }
          }
          Err(RecvError::Lagged(skipped)) => {
            warn!(skipped, "missed intermediary messages");
            self.drain_logged().await;
          }
          Err(RecvError::Closed) => break,
        },
      }
    }
  }

  async fn drain_logged(&self) {
    match self.drain().await {
      Ok(outcome) => debug!(?outcome, "drain finished"),
      Err(e) => error!(error = %e, "outbox drain failed"),
    }
  }
}

/// Substitute confirmed server ids for provisional ids in path segments.
fn rewrite_url(url: &str, remaps: &HashMap<String, String>) -> String {
  if remaps.is_empty() {
    return url.to_string();
  }
  url
    .split('/')
    .map(|segment| remaps.get(segment).map(String::as_str).unwrap_or(segment))
    .collect::<Vec<_>>()
    .join("/")
}

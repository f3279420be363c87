//! The caching intermediary: a background task owning the cache lifecycle.
//!
//! Clients talk to it only through [`IntermediaryHandle`]. Requests are
//! forwarded over an mpsc channel, sync notifications come back over a
//! broadcast channel, and connectivity arrives on a watch channel.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::classify::{classify, RequestClass};
use super::layer::CacheLayer;
use super::traits::{CacheResult, CacheStorage};
use crate::config::Config;
use crate::error::{CacheError, TransportError};
use crate::event::ClientMessage;
use crate::gateway::{Request, Response, Transport};
use crate::sync::{Connectivity, SyncRegistrar};

const COMMAND_BUFFER: usize = 64;
const CLIENT_BUFFER: usize = 16;

/// Everything the intermediary needs from configuration, resolved to URLs.
#[derive(Debug, Clone)]
pub struct IntermediarySettings {
  pub static_bucket: String,
  pub runtime_bucket: String,
  pub api_prefixes: Vec<String>,
  pub offline_url: Url,
  pub precache: Vec<Url>,
  pub sync_tag: String,
}

impl IntermediarySettings {
  pub fn from_config(config: &Config) -> Result<Self, CacheError> {
    let origin = Url::parse(&config.server.url)
      .map_err(|e| CacheError::InvalidOrigin(format!("{}: {}", config.server.url, e)))?;
    let resolve = |path: &str| {
      origin
        .join(path)
        .map_err(|e| CacheError::InvalidOrigin(format!("{}: {}", path, e)))
    };

    Ok(Self {
      static_bucket: config.cache.static_bucket(),
      runtime_bucket: config.cache.runtime_bucket(),
      api_prefixes: config.cache.api_prefixes.clone(),
      offline_url: resolve(&config.cache.offline_page)?,
      precache: config
        .cache
        .precache
        .iter()
        .map(|p| resolve(p))
        .collect::<Result<_, _>>()?,
      sync_tag: config.sync.tag.clone(),
    })
  }
}

/// Installation progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  Parsed,
  Installing,
  Installed,
  Activating,
  Activated,
}

type Reply<T> = oneshot::Sender<Result<T, CacheError>>;

enum Command {
  Install(Reply<usize>),
  Activate(Reply<Vec<String>>),
  Register(Reply<()>),
  Fetch(Request, Reply<CacheResult<Response>>),
  RegisterSync(String),
  DispatchSync(String),
}

/// Cloneable front door to a running intermediary.
#[derive(Clone)]
pub struct IntermediaryHandle {
  commands: mpsc::Sender<Command>,
  clients: broadcast::Sender<ClientMessage>,
  lifecycle: watch::Receiver<Lifecycle>,
}

impl IntermediaryHandle {
  /// Subscribe to messages sent to foreground clients.
  pub fn connect(&self) -> broadcast::Receiver<ClientMessage> {
    self.clients.subscribe()
  }

  pub fn lifecycle(&self) -> Lifecycle {
    *self.lifecycle.borrow()
  }

  async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, CacheError> {
    let (tx, rx) = oneshot::channel();
    self
      .commands
      .send(make(tx))
      .await
      .map_err(|_| CacheError::WorkerGone)?;
    rx.await.map_err(|_| CacheError::WorkerGone)?
  }

  /// Precache the manifest into the static bucket; returns the entry count.
  pub async fn install(&self) -> Result<usize, CacheError> {
    self.request(Command::Install).await
  }

  /// Evict outdated buckets and start intercepting; returns evicted names.
  pub async fn activate(&self) -> Result<Vec<String>, CacheError> {
    self.request(Command::Activate).await
  }

  /// Install unless the current static bucket already exists, then activate.
  pub async fn register(&self) -> Result<(), CacheError> {
    self.request(Command::Register).await
  }

  pub async fn fetch(&self, request: Request) -> Result<CacheResult<Response>, CacheError> {
    self.request(|reply| Command::Fetch(request, reply)).await
  }

  /// Ask for `tag` to fire once connectivity allows.
  pub async fn register_sync(&self, tag: &str) -> Result<(), CacheError> {
    self
      .commands
      .send(Command::RegisterSync(tag.to_string()))
      .await
      .map_err(|_| CacheError::WorkerGone)
  }

  /// Fire `tag` right away, regardless of connectivity.
  pub async fn dispatch_sync(&self, tag: &str) -> Result<(), CacheError> {
    self
      .commands
      .send(Command::DispatchSync(tag.to_string()))
      .await
      .map_err(|_| CacheError::WorkerGone)
  }
}

#[async_trait]
impl Transport for IntermediaryHandle {
  async fn send(&self, request: Request) -> Result<Response, TransportError> {
    match self.fetch(request).await {
      Ok(result) => {
        debug!(source = %result.source, status = result.data.status, "served");
        Ok(result.data)
      }
      Err(CacheError::Transport(e)) => Err(e),
      Err(e) => Err(TransportError::Unreachable(e.to_string())),
    }
  }
}

impl SyncRegistrar for IntermediaryHandle {
  fn register(&self, tag: &str) {
    if let Err(e) = self.commands.try_send(Command::RegisterSync(tag.to_string())) {
      warn!(tag, error = %e, "failed to register background sync");
    }
  }
}

pub struct Intermediary {
  layer: Arc<CacheLayer>,
  settings: IntermediarySettings,
  connectivity: Connectivity,
  clients: broadcast::Sender<ClientMessage>,
  lifecycle: watch::Sender<Lifecycle>,
  controlling: bool,
  pending_tags: BTreeSet<String>,
}

impl Intermediary {
  /// Start the intermediary on the current runtime.
  pub fn spawn(
    settings: IntermediarySettings,
    storage: Arc<dyn CacheStorage>,
    upstream: Arc<dyn Transport>,
    connectivity: Connectivity,
  ) -> (IntermediaryHandle, JoinHandle<()>) {
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
    let (clients, _) = broadcast::channel(CLIENT_BUFFER);
    let (lifecycle_tx, lifecycle_rx) = watch::channel(Lifecycle::Parsed);

    let layer = CacheLayer::new(
      storage,
      upstream,
      settings.static_bucket.clone(),
      settings.runtime_bucket.clone(),
      settings.offline_url.clone(),
    );

    let worker = Self {
      layer: Arc::new(layer),
      settings,
      connectivity,
      clients: clients.clone(),
      lifecycle: lifecycle_tx,
      controlling: false,
      pending_tags: BTreeSet::new(),
    };

    let handle = IntermediaryHandle {
      commands: commands_tx,
      clients,
      lifecycle: lifecycle_rx,
    };
    (handle, tokio::spawn(worker.run(commands_rx)))
  }

  async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
    let mut online = self.connectivity.subscribe();
    let mut watching = true;

    loop {
      tokio::select! {
        command = commands.recv() => match command {
          Some(command) => self.handle(command).await,
          None => break,
        },
        changed = online.changed(), if watching => {
          if changed.is_err() {
            watching = false;
            continue;
          }
          if *online.borrow_and_update() {
            self.flush_sync();
          }
        }
      }
    }
    debug!("intermediary stopped");
  }

  async fn handle(&mut self, command: Command) {
    match command {
      Command::Install(reply) => {
        let _ = reply.send(self.install().await);
      }
      Command::Activate(reply) => {
        let _ = reply.send(self.activate());
      }
      Command::Register(reply) => {
        let _ = reply.send(self.register().await);
      }
      Command::Fetch(request, reply) => {
        let class = if self.controlling {
          classify(&request, &self.settings.api_prefixes)
        } else {
          RequestClass::Passthrough
        };
        let layer = Arc::clone(&self.layer);
        tokio::spawn(async move {
          let _ = reply.send(layer.serve(class, request).await);
        });
      }
      Command::RegisterSync(tag) => {
        debug!(tag = %tag, "sync registered");
        self.pending_tags.insert(tag);
        if self.connectivity.is_online() {
          self.flush_sync();
        }
      }
      Command::DispatchSync(tag) => self.fire(&tag),
    }
  }

  async fn install(&mut self) -> Result<usize, CacheError> {
    self.lifecycle.send_replace(Lifecycle::Installing);
    match self.layer.precache(&self.settings.precache).await {
      Ok(count) => {
        self.lifecycle.send_replace(Lifecycle::Installed);
        Ok(count)
      }
      Err(e) => {
        warn!(error = %e, "install failed");
        self.lifecycle.send_replace(Lifecycle::Parsed);
        Err(e)
      }
    }
  }

  fn activate(&mut self) -> Result<Vec<String>, CacheError> {
    self.lifecycle.send_replace(Lifecycle::Activating);
    let evicted = self.layer.evict_stale()?;
    self.controlling = true;
    self.lifecycle.send_replace(Lifecycle::Activated);
    info!(bucket = %self.settings.static_bucket, "intermediary active");
    Ok(evicted)
  }

  async fn register(&mut self) -> Result<(), CacheError> {
    if self.layer.storage().has_bucket(self.layer.static_bucket())? {
      debug!(bucket = %self.layer.static_bucket(), "already installed");
    } else {
      self.install().await?;
    }
    self.activate()?;
    Ok(())
  }

  fn flush_sync(&mut self) {
    for tag in std::mem::take(&mut self.pending_tags) {
      self.fire(&tag);
    }
  }

  fn fire(&self, tag: &str) {
    if tag != self.settings.sync_tag {
      debug!(tag, "ignoring unknown sync tag");
      return;
    }
    match self.clients.send(ClientMessage::SyncOutbox) {
      Ok(receivers) => debug!(tag, receivers, "sync fired"),
      Err(_) => debug!(tag, "sync fired with no connected clients"),
    }
  }
}

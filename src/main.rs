use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, eyre::WrapErr, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use agenda::cache::{Intermediary, IntermediaryHandle, IntermediarySettings, SqliteCacheStorage};
use agenda::config::Config;
use agenda::context::AppContext;
use agenda::gateway::{ApiGateway, ReqwestTransport, Request, Transport};
use agenda::sync::{probe, ActionOutcome, DrainOutcome, RefreshOutcome, SyncEngine};
use agenda::tasks::{Task, TaskApi, TaskRoutes};

#[derive(Parser, Debug)]
#[command(name = "agenda")]
#[command(about = "An offline-first task list that syncs when the server is reachable")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/agenda/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Start offline: every change is queued until `sync`
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Refresh from the server and list tasks
  List,
  /// Add a task
  Add { title: String },
  /// Mark a task as done
  Done { id: String },
  /// Mark a task as not done
  Undone { id: String },
  /// Delete a task
  Rm { id: String },
  /// Replay queued changes against the server
  Sync,
  /// Show queued and quarantined changes
  Pending,
  /// GET a path through the caching intermediary
  Fetch {
    path: String,
    /// Issue the request as a document navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Stay running and sync whenever the connection comes back
  Watch,
}

type Engine = SyncEngine<IntermediaryHandle>;

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = agenda::logging::init(&config.logging, &config.log_dir()?);

  let ctx = AppContext::new(config, !args.offline);
  let config = &ctx.config;

  // Network stack: reqwest behind the caching intermediary
  let upstream = Arc::new(ReqwestTransport::new(Duration::from_secs(
    config.server.timeout_secs,
  ))?);
  let cache_path = config.cache_path()?;
  let storage = SqliteCacheStorage::open(&cache_path)
    .wrap_err_with(|| format!("Failed to open cache {}", cache_path.display()))?;
  let (intermediary, _worker) = Intermediary::spawn(
    IntermediarySettings::from_config(config)?,
    Arc::new(storage),
    upstream.clone(),
    ctx.connectivity.clone(),
  );
  if ctx.connectivity.is_online() {
    if let Err(e) = intermediary.register().await {
      warn!(error = %e, "intermediary not installed, requests go straight to the network");
    }
  }

  let gateway = ApiGateway::new(intermediary.clone(), &config.server.url)?;
  let api = TaskApi::new(gateway, TaskRoutes::new(&config.server.api_base));
  let engine = SyncEngine::new(
    ctx.database()?.clone(),
    api,
    ctx.connectivity.clone(),
    &config.sync,
  )
  .with_registrar(Arc::new(intermediary.clone()));

  match args.command {
    Command::List => {
      report_refresh(&engine.refresh().await?);
      print_tasks(&engine.tasks().get_all()?);
    }
    Command::Add { title } => {
      let outcome = engine.create(&title).await?;
      report_action(outcome, &title);
    }
    Command::Done { id } => {
      let outcome = engine.set_completed(&id, true).await?;
      report_action(outcome, &id);
    }
    Command::Undone { id } => {
      let outcome = engine.set_completed(&id, false).await?;
      report_action(outcome, &id);
    }
    Command::Rm { id } => {
      let outcome = engine.delete(&id).await?;
      report_action(outcome, &id);
    }
    Command::Sync => report_drain(&engine.drain().await?),
    Command::Pending => print_pending(&engine)?,
    Command::Fetch { path, navigate } => {
      let origin = Url::parse(&config.server.url)?;
      let url = origin.join(&path)?;
      let request = if navigate {
        Request::navigate(url)
      } else {
        Request::get(url)
      };
      let result = intermediary.fetch(request).await?;
      println!("{} ({})", result.data.status, result.source);
      if let Some(cached_at) = result.cached_at {
        println!("cached at {}", cached_at.format("%Y-%m-%d %H:%M:%S"));
      }
      println!("{}", String::from_utf8_lossy(&result.data.body));
    }
    Command::Watch => watch(engine, intermediary, upstream, &ctx).await?,
  }

  Ok(())
}

async fn watch(
  engine: Engine,
  intermediary: IntermediaryHandle,
  upstream: Arc<ReqwestTransport>,
  ctx: &AppContext,
) -> Result<()> {
  let origin = Url::parse(&ctx.config.server.url)?;
  let period = Duration::from_secs(ctx.config.sync.probe_interval_secs.max(1));
  let connectivity = ctx.connectivity.clone();

  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(period);
    loop {
      ticker.tick().await;
      let online = probe(&upstream, &origin).await;
      if connectivity.set_online(online) {
        info!(online, "connectivity changed");
      }
    }
  });

  let engine = Arc::new(engine);
  let mut view = engine.subscribe_view();
  tokio::spawn(async move {
    while view.changed().await.is_ok() {
      let view = view.borrow_and_update().clone();
      match view.notice {
        Some(notice) => info!(tasks = view.tasks.len(), %notice, "tasks updated"),
        None => info!(tasks = view.tasks.len(), "tasks updated"),
      }
    }
  });

  report_drain(&engine.drain().await?);
  info!("watching for connectivity changes, Ctrl-C to stop");

  let runner = tokio::spawn(Arc::clone(&engine).run(intermediary.connect()));
  tokio::select! {
    _ = tokio::signal::ctrl_c() => info!("stopping"),
    joined = runner => joined.map_err(|e| eyre!("sync loop stopped: {}", e))?,
  }
  Ok(())
}

fn print_tasks(tasks: &[Task]) {
  if tasks.is_empty() {
    println!("No tasks.");
    return;
  }
  for task in tasks {
    let mark = if task.completed { "x" } else { " " };
    let pending = if task.is_provisional() { "  (not synced)" } else { "" };
    println!("[{}] {:<10} {}{}", mark, task.id, task.title, pending);
  }
}

fn print_pending<T: Transport>(engine: &SyncEngine<T>) -> Result<()> {
  let queued = engine.outbox().drain_snapshot()?;
  if queued.is_empty() {
    println!("Outbox is empty.");
  }
  for entry in &queued {
    print!("#{:<4} {:?} {}", entry.position, entry.kind, entry.url);
    match &entry.last_error {
      Some(reason) => println!("  ({} attempts, last: {})", entry.attempts, reason),
      None => println!(),
    }
  }

  let dead = engine.outbox().dead_letters()?;
  if !dead.is_empty() {
    println!("Quarantined:");
    for letter in &dead {
      println!(
        "#{:<4} {:?} {}  ({} attempts, {})",
        letter.entry.position,
        letter.entry.kind,
        letter.entry.url,
        letter.entry.attempts,
        letter.quarantined_at
      );
    }
  }
  Ok(())
}

fn report_action(outcome: ActionOutcome, subject: &str) {
  match outcome {
    ActionOutcome::Confirmed => println!("Saved: {}", subject),
    ActionOutcome::Queued => println!("Queued: {} (will sync when online)", subject),
    ActionOutcome::NotFound => println!("No task with id {}", subject),
  }
}

fn report_refresh(outcome: &RefreshOutcome) {
  if let RefreshOutcome::Cached { cause, .. } = outcome {
    println!("Showing local copy: {}", cause);
  }
}

fn report_drain(outcome: &DrainOutcome) {
  match outcome {
    DrainOutcome::Empty { refresh } => {
      println!("Nothing to sync.");
      if let Some(refresh) = refresh {
        report_refresh(refresh);
      }
    }
    DrainOutcome::Completed {
      replayed,
      quarantined,
      refresh,
    } => {
      println!("Synced {} change(s).", replayed);
      if *quarantined > 0 {
        println!("{} change(s) rejected and quarantined, see `agenda pending`.", quarantined);
      }
      report_refresh(refresh);
    }
    DrainOutcome::Aborted {
      replayed,
      failed_position,
      error,
    } => {
      println!(
        "Synced {} change(s), stopped at #{}: {}. Everything else stays queued.",
        replayed, failed_position, error
      );
    }
  }
}

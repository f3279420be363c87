use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub server: ServerConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Origin of the task server, e.g. http://localhost:8080
  #[serde(default = "default_server_url")]
  pub url: String,
  /// Path prefix of the task API
  #[serde(default = "default_api_base")]
  pub api_base: String,
  /// Request timeout enforced by the HTTP client
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      url: default_server_url(),
      api_base: default_api_base(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Task database location (defaults to $XDG_DATA_HOME/agenda/agenda.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Bucket name prefix
  #[serde(default = "default_cache_name")]
  pub name: String,
  /// Version tag embedded in bucket names; bumping it evicts old buckets
  #[serde(default = "default_cache_version")]
  pub version: String,
  /// Path prefixes served network-first as API resources
  #[serde(default = "default_api_prefixes")]
  pub api_prefixes: Vec<String>,
  /// Document served when nothing else can answer
  #[serde(default = "default_offline_page")]
  pub offline_page: String,
  /// Critical assets fetched at install time
  #[serde(default = "default_precache")]
  pub precache: Vec<String>,
  /// Cache database location (defaults to $XDG_CACHE_HOME/agenda/cache.db)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      name: default_cache_name(),
      version: default_cache_version(),
      api_prefixes: default_api_prefixes(),
      offline_page: default_offline_page(),
      precache: default_precache(),
      path: None,
    }
  }
}

impl CacheConfig {
  pub fn static_bucket(&self) -> String {
    format!("{}-static-{}", self.name, self.version)
  }

  pub fn runtime_bucket(&self) -> String {
    format!("{}-runtime-{}", self.name, self.version)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Background sync tag that triggers an outbox drain
  #[serde(default = "default_sync_tag")]
  pub tag: String,
  /// Quarantine an entry after this many 4xx rejections (unset = retry forever)
  #[serde(default)]
  pub max_rejections: Option<u32>,
  /// Connectivity probe period in watch mode
  #[serde(default = "default_probe_interval_secs")]
  pub probe_interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: default_sync_tag(),
      max_rejections: None,
      probe_interval_secs: default_probe_interval_secs(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
  /// Default filter directive, overridden by RUST_LOG
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Also write a daily rotated log file under the data directory
  #[serde(default = "default_true")]
  pub file: bool,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      file: true,
    }
  }
}

fn default_server_url() -> String {
  "http://localhost:8080".to_string()
}

fn default_api_base() -> String {
  "/apiTarea".to_string()
}

fn default_timeout_secs() -> u64 {
  10
}

fn default_cache_name() -> String {
  "agenda".to_string()
}

fn default_cache_version() -> String {
  "v1".to_string()
}

fn default_api_prefixes() -> Vec<String> {
  vec!["/api/".to_string(), "/apiTarea/".to_string()]
}

fn default_offline_page() -> String {
  "/offline.html".to_string()
}

fn default_precache() -> Vec<String> {
  [
    "/",
    "/index.html",
    "/app.js",
    "/manifest.json",
    "/offline.html",
    "/icons/icon-192.png",
    "/icons/icon-512.png",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}

fn default_sync_tag() -> String {
  "sync-outbox".to_string()
}

fn default_probe_interval_secs() -> u64 {
  15
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./agenda.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/agenda/config.yaml
  ///
  /// Without any file the defaults are used. `AGENDA_SERVER_URL` overrides
  /// the server origin in every case.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    if let Ok(url) = std::env::var("AGENDA_SERVER_URL") {
      config.server.url = url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("agenda.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("agenda").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Resolved task database path.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(p) = &self.storage.path {
      return Ok(p.clone());
    }
    Ok(data_dir()?.join("agenda.db"))
  }

  /// Resolved cache database path.
  pub fn cache_path(&self) -> Result<PathBuf> {
    if let Some(p) = &self.cache.path {
      return Ok(p.clone());
    }
    let cache_dir = dirs::cache_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".cache")))
      .ok_or_else(|| eyre!("Could not determine cache directory"))?;
    Ok(cache_dir.join("agenda").join("cache.db"))
  }

  /// Directory for log files.
  pub fn log_dir(&self) -> Result<PathBuf> {
    Ok(data_dir()?.join("logs"))
  }
}

fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;
  Ok(data_dir.join("agenda"))
}

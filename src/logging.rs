use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingConfig;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. The returned guard flushes the
/// log file and must be held until exit.
pub fn init(config: &LoggingConfig, log_dir: &Path) -> Option<WorkerGuard> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

  let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);

  let (file, guard) = match file_appender(config, log_dir) {
    Some(appender) => {
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = fmt::layer().with_writer(writer).with_ansi(false).boxed();
      (Some(layer), Some(guard))
    }
    None => (None, None),
  };

  // A second init (tests, embedding) keeps the first subscriber.
  let _ = tracing_subscriber::registry()
    .with(filter)
    .with(stderr)
    .with(file)
    .try_init();

  guard
}

/// Daily rolling file under `log_dir`, when file logging is enabled.
fn file_appender(config: &LoggingConfig, log_dir: &Path) -> Option<RollingFileAppender> {
  if !config.file {
    return None;
  }
  match RollingFileAppender::builder()
    .rotation(Rotation::DAILY)
    .filename_prefix("agenda")
    .filename_suffix("log")
    .build(log_dir)
  {
    Ok(appender) => Some(appender),
    Err(e) => {
      eprintln!("file logging disabled: {}", e);
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_file_layer_only_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = LoggingConfig::default();

    config.file = false;
    assert!(file_appender(&config, dir.path()).is_none());

    config.file = true;
    assert!(file_appender(&config, &dir.path().join("logs")).is_some());
  }
}

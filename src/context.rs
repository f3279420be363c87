use color_eyre::{eyre::WrapErr, Result};
use once_cell::sync::OnceCell;

use crate::config::Config;
use crate::db::Database;
use crate::sync::Connectivity;

/// Process-wide state shared by every component.
///
/// The task database is opened on first use and reused afterwards.
pub struct AppContext {
  pub config: Config,
  pub connectivity: Connectivity,
  database: OnceCell<Database>,
}

impl AppContext {
  pub fn new(config: Config, online: bool) -> Self {
    Self {
      config,
      connectivity: Connectivity::new(online),
      database: OnceCell::new(),
    }
  }

  pub fn database(&self) -> Result<&Database> {
    self.database.get_or_try_init(|| {
      let path = self.config.database_path()?;
      Database::open(&path).wrap_err_with(|| format!("Failed to open database {}", path.display()))
    })
  }
}

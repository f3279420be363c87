pub mod schema;

use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::StoreError;

/// Shared handle to the task database.
///
/// One connection per process; clones share it. Every access holds the lock
/// for the duration of a single statement or transaction.
#[derive(Clone)]
pub struct Database {
  conn: Arc<Mutex<Connection>>,
}

impl Database {
  /// Open or create the database at `path`.
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
        path: parent.display().to_string(),
        source,
      })?;
    }

    let conn = Connection::open(path)?;
    Self::from_connection(conn)
  }

  /// Private database that disappears with the handle.
  pub fn open_in_memory() -> Result<Self, StoreError> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Self, StoreError> {
    conn.execute_batch(schema::SCHEMA)?;
    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  /// Run `f` against the connection.
  pub fn with_conn<T>(
    &self,
    f: impl FnOnce(&Connection) -> Result<T, StoreError>,
  ) -> Result<T, StoreError> {
    let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    f(&conn)
  }

  /// Run `f` inside one transaction.
  ///
  /// Commits when `f` returns `Ok`; any error (or panic) drops the
  /// transaction, which rolls it back.
  pub fn transaction<T>(
    &self,
    f: impl FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
  ) -> Result<T, StoreError> {
    let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    let tx = conn.transaction()?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rusqlite::params;

  #[test]
  fn test_failed_transaction_rolls_back() {
    let db = Database::open_in_memory().unwrap();

    let result: Result<(), StoreError> = db.transaction(|tx| {
      tx.execute(
        "INSERT INTO tasks (id, data) VALUES (?, ?)",
        params!["1", b"{}".to_vec()],
      )?;
      Err(StoreError::LockPoisoned)
    });
    assert!(result.is_err());

    let count: i64 = db
      .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM tasks", [], |r| r.get(0))?))
      .unwrap();
    assert_eq!(count, 0);
  }

  #[test]
  fn test_open_creates_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("agenda.db");
    Database::open(&path).unwrap();
    assert!(path.exists());
  }
}

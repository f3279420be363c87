use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::db::Database;
use crate::error::StoreError;
use crate::tasks::Task;

/// Server-echoed fields applied when a provisional record is confirmed.
#[derive(Debug, Clone, Default)]
pub struct TaskEcho {
  pub title: Option<String>,
  pub completed: Option<bool>,
}

/// Table of task records keyed by id.
#[derive(Clone)]
pub struct TaskStore {
  db: Database,
}

impl TaskStore {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  /// Insert or replace a record.
  pub fn put(&self, task: &Task) -> Result<(), StoreError> {
    self.db.with_conn(|conn| put_task(conn, task))
  }

  pub fn get(&self, id: &str) -> Result<Option<Task>, StoreError> {
    self.db.with_conn(|conn| get_task(conn, id))
  }

  /// All records in insertion order.
  pub fn get_all(&self) -> Result<Vec<Task>, StoreError> {
    self.db.with_conn(|conn| {
      let mut stmt = conn.prepare("SELECT data FROM tasks ORDER BY rowid")?;
      let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;

      let mut tasks = Vec::new();
      for data in rows {
        tasks.push(serde_json::from_slice(&data?)?);
      }
      Ok(tasks)
    })
  }

  pub fn delete(&self, id: &str) -> Result<(), StoreError> {
    self.db.with_conn(|conn| {
      conn.execute("DELETE FROM tasks WHERE id = ?", params![id])?;
      Ok(())
    })
  }

  pub fn clear(&self) -> Result<(), StoreError> {
    self.db.with_conn(|conn| {
      conn.execute("DELETE FROM tasks", [])?;
      Ok(())
    })
  }

  /// Replace every record with `tasks` in one transaction.
  ///
  /// Readers observe either the old set or the new set.
  pub fn replace_all(&self, tasks: &[Task]) -> Result<(), StoreError> {
    self.db.transaction(|tx| {
      tx.execute("DELETE FROM tasks", [])?;
      for task in tasks {
        put_task(tx, task)?;
      }
      Ok(())
    })
  }

  /// Re-key a provisional record under its server id.
  ///
  /// Drops the `client_id` marker and applies echoed fields. Returns false if
  /// no record is stored under `provisional_id` (e.g. deleted meanwhile).
  pub fn remap_id(
    &self,
    provisional_id: &str,
    server_id: &str,
    echo: &TaskEcho,
  ) -> Result<bool, StoreError> {
    self.db.transaction(|tx| {
      let Some(mut task) = get_task(tx, provisional_id)? else {
        return Ok(false);
      };

      task.id = server_id.to_string();
      task.client_id = None;
      if let Some(title) = &echo.title {
        task.title = title.clone();
      }
      if let Some(completed) = echo.completed {
        task.completed = completed;
      }

      tx.execute("DELETE FROM tasks WHERE id = ?", params![provisional_id])?;
      put_task(tx, &task)?;
      debug!(provisional_id, server_id, "remapped task id");
      Ok(true)
    })
  }
}

fn put_task(conn: &Connection, task: &Task) -> Result<(), StoreError> {
  let data = serde_json::to_vec(task)?;
  conn.execute(
    "INSERT OR REPLACE INTO tasks (id, data, stored_at) VALUES (?, ?, datetime('now'))",
    params![task.id, data],
  )?;
  Ok(())
}

fn get_task(conn: &Connection, id: &str) -> Result<Option<Task>, StoreError> {
  let data: Option<Vec<u8>> = conn
    .query_row("SELECT data FROM tasks WHERE id = ?", params![id], |row| {
      row.get(0)
    })
    .optional()?;

  match data {
    Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
    None => Ok(None),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  fn store() -> TaskStore {
    TaskStore::new(Database::open_in_memory().unwrap())
  }

  fn confirmed(id: &str, title: &str) -> Task {
    Task {
      id: id.to_string(),
      title: title.to_string(),
      completed: false,
      created_at: None,
      created_at_server: None,
      client_id: None,
    }
  }

  #[test]
  fn test_put_get_delete() {
    let store = store();
    let task = confirmed("1", "Laundry");
    store.put(&task).unwrap();
    assert_eq!(store.get("1").unwrap(), Some(task));

    store.delete("1").unwrap();
    assert_eq!(store.get("1").unwrap(), None);
  }

  #[test]
  fn test_put_replaces_same_key() {
    let store = store();
    store.put(&confirmed("1", "Old")).unwrap();
    store.put(&confirmed("1", "New")).unwrap();

    let all = store.get_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].title, "New");
  }

  #[test]
  fn test_replace_all_swaps_contents() {
    let store = store();
    store.put(&confirmed("1", "a")).unwrap();
    store.put(&confirmed("2", "b")).unwrap();

    let fresh = vec![confirmed("3", "c"), confirmed("4", "d")];
    store.replace_all(&fresh).unwrap();
    assert_eq!(store.get_all().unwrap(), fresh);

    store.clear().unwrap();
    assert!(store.get_all().unwrap().is_empty());
  }

  #[test]
  fn test_remap_rekeys_and_confirms() {
    let store = store();
    let task = Task::provisional("Draft");
    store.put(&task).unwrap();

    let echo = TaskEcho {
      title: Some("Draft (server)".into()),
      completed: Some(true),
    };
    assert!(store.remap_id(&task.id, "17", &echo).unwrap());

    assert_eq!(store.get(&task.id).unwrap(), None);
    let remapped = store.get("17").unwrap().unwrap();
    assert_eq!(remapped.title, "Draft (server)");
    assert!(remapped.completed);
    assert!(remapped.client_id.is_none());
    assert_eq!(store.get_all().unwrap().len(), 1);
  }

  #[test]
  fn test_remap_missing_record() {
    let store = store();
    assert!(!store
      .remap_id("c-missing", "5", &TaskEcho::default())
      .unwrap());
    assert!(store.get_all().unwrap().is_empty());
  }
}

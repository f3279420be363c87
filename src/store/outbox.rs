use rusqlite::params;
use std::collections::HashMap;

use crate::db::Database;
use crate::error::StoreError;
use crate::tasks::OutboxEntry;

/// An entry moved out of the queue after repeated rejections.
#[derive(Debug, Clone)]
pub struct DeadLetter {
  pub entry: OutboxEntry,
  pub quarantined_at: String,
}

/// Append-ordered queue of pending mutations.
///
/// Entries are stored as opaque JSON; ordering comes solely from the
/// position the queue assigns on enqueue.
#[derive(Clone)]
pub struct Outbox {
  db: Database,
}

impl Outbox {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  /// Append an entry, returning its position.
  pub fn enqueue(&self, entry: &OutboxEntry) -> Result<i64, StoreError> {
    let data = serde_json::to_vec(entry)?;
    self.db.with_conn(|conn| {
      conn.execute("INSERT INTO outbox (data) VALUES (?)", params![data])?;
      Ok(conn.last_insert_rowid())
    })
  }

  /// Every queued entry in enqueue order.
  pub fn drain_snapshot(&self) -> Result<Vec<OutboxEntry>, StoreError> {
    self.db.with_conn(|conn| {
      let mut stmt =
        conn.prepare("SELECT position, data, attempts, last_error FROM outbox ORDER BY position")?;
      let rows = stmt.query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, Vec<u8>>(1)?,
          row.get::<_, u32>(2)?,
          row.get::<_, Option<String>>(3)?,
        ))
      })?;

      let mut entries = Vec::new();
      for row in rows {
        let (position, data, attempts, last_error) = row?;
        let mut entry: OutboxEntry = serde_json::from_slice(&data)?;
        entry.position = position;
        entry.attempts = attempts;
        entry.last_error = last_error;
        entries.push(entry);
      }
      Ok(entries)
    })
  }

  pub fn len(&self) -> Result<usize, StoreError> {
    self.db.with_conn(|conn| {
      let count: i64 = conn.query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
      Ok(count as usize)
    })
  }

  pub fn is_empty(&self) -> Result<bool, StoreError> {
    Ok(self.len()? == 0)
  }

  pub fn clear_all(&self) -> Result<(), StoreError> {
    self.db.with_conn(|conn| {
      conn.execute("DELETE FROM outbox", [])?;
      Ok(())
    })
  }

  /// Remove entries up to and including `position`.
  ///
  /// Entries appended after a snapshot was taken survive.
  pub fn clear_through(&self, position: i64) -> Result<(), StoreError> {
    self.db.with_conn(|conn| {
      conn.execute("DELETE FROM outbox WHERE position <= ?", params![position])?;
      Ok(())
    })
  }

  /// Count a failed replay; returns the new attempt count.
  pub fn record_failure(&self, position: i64, reason: &str) -> Result<u32, StoreError> {
    self.db.with_conn(|conn| {
      conn.execute(
        "UPDATE outbox SET attempts = attempts + 1, last_error = ? WHERE position = ?",
        params![reason, position],
      )?;
      let attempts: u32 = conn.query_row(
        "SELECT attempts FROM outbox WHERE position = ?",
        params![position],
        |row| row.get(0),
      )?;
      Ok(attempts)
    })
  }

  /// Move an entry to the dead-letter table.
  pub fn quarantine(&self, position: i64) -> Result<(), StoreError> {
    self.db.transaction(|tx| {
      tx.execute(
        "INSERT OR REPLACE INTO outbox_dead (position, data, attempts, last_error)
         SELECT position, data, attempts, last_error FROM outbox WHERE position = ?",
        params![position],
      )?;
      tx.execute("DELETE FROM outbox WHERE position = ?", params![position])?;
      Ok(())
    })
  }

  pub fn dead_letters(&self) -> Result<Vec<DeadLetter>, StoreError> {
    self.db.with_conn(|conn| {
      let mut stmt = conn.prepare(
        "SELECT position, data, attempts, last_error, quarantined_at
         FROM outbox_dead ORDER BY position",
      )?;
      let rows = stmt.query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, Vec<u8>>(1)?,
          row.get::<_, u32>(2)?,
          row.get::<_, Option<String>>(3)?,
          row.get::<_, String>(4)?,
        ))
      })?;

      let mut letters = Vec::new();
      for row in rows {
        let (position, data, attempts, last_error, quarantined_at) = row?;
        let mut entry: OutboxEntry = serde_json::from_slice(&data)?;
        entry.position = position;
        entry.attempts = attempts;
        entry.last_error = last_error;
        letters.push(DeadLetter {
          entry,
          quarantined_at,
        });
      }
      Ok(letters)
    })
  }

  /// Remember that `provisional_id` now lives under `server_id`.
  pub fn record_remap(&self, provisional_id: &str, server_id: &str) -> Result<(), StoreError> {
    self.db.with_conn(|conn| {
      conn.execute(
        "INSERT OR REPLACE INTO id_remaps (provisional_id, server_id) VALUES (?, ?)",
        params![provisional_id, server_id],
      )?;
      Ok(())
    })
  }

  pub fn remaps(&self) -> Result<HashMap<String, String>, StoreError> {
    self.db.with_conn(|conn| {
      let mut stmt = conn.prepare("SELECT provisional_id, server_id FROM id_remaps")?;
      let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
      let mut remaps = HashMap::new();
      for row in rows {
        let (provisional, server): (String, String) = row?;
        remaps.insert(provisional, server);
      }
      Ok(remaps)
    })
  }

  pub fn clear_remaps(&self) -> Result<(), StoreError> {
    self.db.with_conn(|conn| {
      conn.execute("DELETE FROM id_remaps", [])?;
      Ok(())
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tasks::{Task, TaskRoutes};

  fn outbox() -> Outbox {
    Outbox::new(Database::open_in_memory().unwrap())
  }

  fn routes() -> TaskRoutes {
    TaskRoutes::new("/apiTarea")
  }

  #[test]
  fn test_snapshot_preserves_enqueue_order() {
    let outbox = outbox();
    let task = Task::provisional("first");
    let create = OutboxEntry::create(&routes(), &task).unwrap();
    let update = OutboxEntry::update_completion(&routes(), &task.id, true).unwrap();
    let delete = OutboxEntry::delete(&routes(), "9");

    let p1 = outbox.enqueue(&create).unwrap();
    let p2 = outbox.enqueue(&update).unwrap();
    let p3 = outbox.enqueue(&delete).unwrap();
    assert!(p1 < p2 && p2 < p3);

    let snapshot = outbox.drain_snapshot().unwrap();
    let urls: Vec<&str> = snapshot.iter().map(|e| e.url.as_str()).collect();
    assert_eq!(urls, vec![create.url.as_str(), update.url.as_str(), delete.url.as_str()]);
    assert_eq!(snapshot[0].position, p1);
    assert_eq!(snapshot[0].body, create.body);
  }

  #[test]
  fn test_clear_through_keeps_later_entries() {
    let outbox = outbox();
    let p1 = outbox.enqueue(&OutboxEntry::delete(&routes(), "1")).unwrap();
    outbox.enqueue(&OutboxEntry::delete(&routes(), "2")).unwrap();

    outbox.clear_through(p1).unwrap();
    let remaining = outbox.drain_snapshot().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].url, "/apiTarea/tareas/2");

    outbox.clear_all().unwrap();
    assert!(outbox.is_empty().unwrap());
  }

  #[test]
  fn test_failure_bookkeeping_and_quarantine() {
    let outbox = outbox();
    let position = outbox.enqueue(&OutboxEntry::delete(&routes(), "1")).unwrap();

    assert_eq!(outbox.record_failure(position, "status 400").unwrap(), 1);
    assert_eq!(outbox.record_failure(position, "status 400").unwrap(), 2);
    let snapshot = outbox.drain_snapshot().unwrap();
    assert_eq!(snapshot[0].attempts, 2);
    assert_eq!(snapshot[0].last_error.as_deref(), Some("status 400"));

    outbox.quarantine(position).unwrap();
    assert!(outbox.is_empty().unwrap());
    let dead = outbox.dead_letters().unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].entry.attempts, 2);
    assert_eq!(dead[0].entry.url, "/apiTarea/tareas/1");
  }

  #[test]
  fn test_remap_table() {
    let outbox = outbox();
    outbox.record_remap("c-abc1234", "12").unwrap();
    assert_eq!(
      outbox.remaps().unwrap().get("c-abc1234").map(String::as_str),
      Some("12")
    );
    outbox.clear_remaps().unwrap();
    assert!(outbox.remaps().unwrap().is_empty());
  }
}

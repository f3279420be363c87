//! SQLite implementation of the response cache.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;
use url::Url;

use super::traits::{CacheStorage, CachedResponse, MatchOptions};
use crate::error::StoreError;
use crate::gateway::{Request, Response};

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Named buckets, ordered by creation
CREATE TABLE IF NOT EXISTS cache_buckets (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses keyed by request hash
CREATE TABLE IF NOT EXISTS cache_entries (
    bucket TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    url_without_query TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (bucket, request_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_url
    ON cache_entries(url_without_query);
"#;

/// SQLite-based response cache, on its own connection.
pub struct SqliteCacheStorage {
  conn: Mutex<Connection>,
}

impl SqliteCacheStorage {
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
        path: parent.display().to_string(),
        source,
      })?;
    }
    Self::from_connection(Connection::open(path)?)
  }

  pub fn open_in_memory() -> Result<Self, StoreError> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Self, StoreError> {
    conn.execute_batch(CACHE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
    self.conn.lock().map_err(|_| StoreError::LockPoisoned)
  }
}

/// Stable key for a request: SHA256 of method and full URL.
fn request_key(request: &Request) -> String {
  let mut hasher = Sha256::new();
  hasher.update(request.method.as_str().as_bytes());
  hasher.update(b" ");
  hasher.update(request.url.as_str().as_bytes());
  hex::encode(hasher.finalize())
}

fn without_query(url: &Url) -> String {
  let mut url = url.clone();
  url.set_query(None);
  url.set_fragment(None);
  url.to_string()
}

fn insert_entry(
  conn: &Connection,
  bucket: &str,
  request: &Request,
  response: &Response,
) -> Result<(), StoreError> {
  conn.execute(
    "INSERT OR IGNORE INTO cache_buckets (name) VALUES (?)",
    params![bucket],
  )?;
  let headers = serde_json::to_string(&response.headers)?;
  conn.execute(
    "INSERT OR REPLACE INTO cache_entries
       (bucket, request_key, url, url_without_query, status, headers, body, cached_at)
     VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
    params![
      bucket,
      request_key(request),
      request.url.as_str(),
      without_query(&request.url),
      response.status,
      headers,
      response.body,
    ],
  )?;
  Ok(())
}

impl CacheStorage for SqliteCacheStorage {
  fn open_bucket(&self, name: &str) -> Result<(), StoreError> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT OR IGNORE INTO cache_buckets (name) VALUES (?)",
      params![name],
    )?;
    Ok(())
  }

  fn has_bucket(&self, name: &str) -> Result<bool, StoreError> {
    let conn = self.lock()?;
    let found: Option<i64> = conn
      .query_row(
        "SELECT seq FROM cache_buckets WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()?;
    Ok(found.is_some())
  }

  fn bucket_names(&self) -> Result<Vec<String>, StoreError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT name FROM cache_buckets ORDER BY seq")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
  }

  fn delete_bucket(&self, name: &str) -> Result<bool, StoreError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM cache_entries WHERE bucket = ?", params![name])?;
    let removed = tx.execute("DELETE FROM cache_buckets WHERE name = ?", params![name])?;
    tx.commit()?;
    Ok(removed > 0)
  }

  fn put(&self, bucket: &str, request: &Request, response: &Response) -> Result<(), StoreError> {
    let conn = self.lock()?;
    insert_entry(&conn, bucket, request, response)
  }

  fn put_all(&self, bucket: &str, entries: &[(Request, Response)]) -> Result<(), StoreError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute(
      "INSERT OR IGNORE INTO cache_buckets (name) VALUES (?)",
      params![bucket],
    )?;
    for (request, response) in entries {
      insert_entry(&tx, bucket, request, response)?;
    }
    tx.commit()?;
    Ok(())
  }

  fn lookup(
    &self,
    bucket: Option<&str>,
    request: &Request,
    options: MatchOptions,
  ) -> Result<Option<CachedResponse>, StoreError> {
    let conn = self.lock()?;

    let (column, needle) = if options.ignore_search {
      ("e.url_without_query", without_query(&request.url))
    } else {
      ("e.request_key", request_key(request))
    };
    let sql = format!(
      "SELECT e.status, e.headers, e.body, e.cached_at
       FROM cache_entries e
       INNER JOIN cache_buckets b ON b.name = e.bucket
       WHERE {} = ?1 AND (?2 IS NULL OR e.bucket = ?2)
       ORDER BY b.seq, e.rowid
       LIMIT 1",
      column
    );

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(&sql, params![needle, bucket], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .optional()?;

    match row {
      Some((status, headers, body, cached_at)) => Ok(Some(CachedResponse {
        response: Response {
          status,
          headers: serde_json::from_str(&headers)?,
          body,
        },
        cached_at: parse_datetime(&cached_at),
      })),
      None => Ok(None),
    }
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> DateTime<Utc> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .unwrap_or_else(|_| Utc::now())
}

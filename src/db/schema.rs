/// Schema for the task database.
pub const SCHEMA: &str = r#"
-- Local mirror of the server collection (stores serialized JSON)
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Pending mutations, replayed in position order
CREATE TABLE IF NOT EXISTS outbox (
    position INTEGER PRIMARY KEY AUTOINCREMENT,
    data BLOB NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    enqueued_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Entries the server kept rejecting
CREATE TABLE IF NOT EXISTS outbox_dead (
    position INTEGER PRIMARY KEY,
    data BLOB NOT NULL,
    attempts INTEGER NOT NULL,
    last_error TEXT,
    quarantined_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Provisional ids already confirmed by the server
CREATE TABLE IF NOT EXISTS id_remaps (
    provisional_id TEXT PRIMARY KEY,
    server_id TEXT NOT NULL
);
"#;

use serde::{Deserialize, Serialize};

/// Messages the intermediary sends to every connected foreground client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  /// A background sync opportunity arrived; drain the outbox
  SyncOutbox,
}

//! Task domain: local records, queued mutations and the server wire format.

pub mod api_types;
pub mod client;
pub mod types;

pub use client::{TaskApi, TaskRoutes};
pub use types::{EntryKind, OutboxEntry, Task};

//! Durable local state: the task mirror and the outbox.

mod outbox;
mod records;

pub use outbox::{DeadLetter, Outbox};
pub use records::{TaskEcho, TaskStore};

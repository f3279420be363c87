//! Offline-first task list client.
//!
//! Local changes land in a durable record store and an ordered outbox, and are
//! replayed against the task server once it is reachable. A caching
//! intermediary sits in front of the network and keeps the app usable offline.

pub mod cache;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod event;
pub mod gateway;
pub mod logging;
pub mod store;
pub mod sync;
pub mod tasks;

#[cfg(test)]
pub(crate) mod test_support;

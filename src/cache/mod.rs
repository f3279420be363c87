//! Cache-strategy intermediary between foreground clients and the network.
//!
//! This module provides:
//! - Versioned response buckets stored in their own sqlite database
//! - Network-first handling for documents and API resources, cache-first for static assets
//! - An offline document when neither network nor cache can answer
//! - A background sync bridge that tells clients when to drain their outbox

mod classify;
mod layer;
mod storage;
mod traits;
mod worker;

pub use classify::{classify, RequestClass};
pub use layer::CacheLayer;
pub use storage::SqliteCacheStorage;
pub use traits::{CacheResult, CacheSource, CacheStorage, CachedResponse, MatchOptions};
pub use worker::{Intermediary, IntermediaryHandle, IntermediarySettings, Lifecycle};

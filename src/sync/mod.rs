//! Offline reconciliation: refresh, outbox drain and id remapping.

mod connectivity;
mod engine;
mod state;

pub use connectivity::{probe, Connectivity};
pub use engine::{ActionOutcome, DrainOutcome, RefreshOutcome, SyncEngine, SyncRegistrar};
pub use state::{Notice, SyncState, TaskView};

//! Replay of queued mutations and the triggers that drive it.

mod engine;
mod error;
mod scheduler;

pub use engine::{DrainSummary, SyncEngine, DEFAULT_SYNC_INTERVAL};
pub use error::ReplayError;
pub use scheduler::{Scheduler, TriggerHandler};

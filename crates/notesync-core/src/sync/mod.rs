//! Sync state tracking, reconciliation and scheduling.

mod backoff;
mod engine;
mod error;
mod scheduler;
mod tracker;

pub use backoff::RetryPolicy;
pub use engine::{ConflictPolicy, CycleReport, EngineConfig, ReconciliationEngine, Resolution};
pub use error::{SyncError, SyncResult};
pub use scheduler::{
    CycleCause, CycleOutcome, SchedulerConfig, SchedulerHandle, SyncScheduler, Trigger,
};
pub use tracker::{can_transition, SyncFailure, SyncTracker};

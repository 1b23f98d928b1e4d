//! Data models for notesync

mod record;
mod sync_conflict;
mod sync_job;
mod sync_state;

pub use record::{Record, RecordDraft, RecordId, RecordPatch};
pub use sync_conflict::{ConflictStrategy, ConflictWinner, SyncConflict};
pub use sync_job::{SyncJob, SyncOperation};
pub use sync_state::SyncState;

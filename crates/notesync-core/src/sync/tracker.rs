//! Per-record sync state machine.
//!
//! All functions mutate an in-memory [`Record`] and never touch storage; the
//! caller persists the result with a revision compare-and-swap.
//!
//! ```text
//! NotSynced --push--> Syncing --ack--> Synced
//!     ^                  |               |
//!     |                  +--error--> SyncFailed --retry--> Syncing
//!     +------------- local edit (from any state) ------------+
//! ```

use crate::error::{Error, Result};
use crate::models::{Record, RecordId, SyncState};

/// A failed push, as recorded on the record's job and in the cycle report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub id: RecordId,
    pub revision: i64,
    pub reason: String,
}

/// Whether the engine may move a record from `from` to `to`
///
/// Local edits (`-> NotSynced`) are always allowed and go through
/// [`SyncTracker::mark_dirty`] instead.
#[must_use]
pub const fn can_transition(from: SyncState, to: SyncState) -> bool {
    matches!(
        (from, to),
        (SyncState::NotSynced | SyncState::SyncFailed, SyncState::Syncing)
            | (SyncState::Syncing | SyncState::Synced, SyncState::Synced)
            | (SyncState::Syncing, SyncState::SyncFailed)
            | (_, SyncState::NotSynced)
    )
}

/// Pure transitions over a record's sync fields
pub struct SyncTracker;

impl SyncTracker {
    /// A local mutation happened: the record must be pushed again
    pub fn mark_dirty(record: &mut Record) {
        record.sync_state = SyncState::NotSynced;
    }

    /// A push attempt is starting
    pub fn mark_syncing(record: &mut Record) -> Result<()> {
        Self::transition(record, SyncState::Syncing)
    }

    /// The remote acknowledged the current revision at `at`
    ///
    /// `last_synced_at` is clamped to at least `updated_at` so that a synced
    /// record never looks older than its own content.
    pub fn mark_synced(record: &mut Record, at: i64) -> Result<()> {
        Self::transition(record, SyncState::Synced)?;
        record.last_synced_at = Some(at.max(record.updated_at));
        record.synced_revision = record.revision;
        Ok(())
    }

    /// The push attempt failed
    pub fn mark_failed(record: &mut Record, reason: impl Into<String>) -> Result<SyncFailure> {
        Self::transition(record, SyncState::SyncFailed)?;
        Ok(SyncFailure {
            id: record.id,
            revision: record.revision,
            reason: reason.into(),
        })
    }

    /// Record content was just replaced by the server copy
    ///
    /// Only used by pull merges and conflict resolution, where the local
    /// revision is known to be clean or explicitly discarded.
    pub fn adopt_remote(record: &mut Record, at: i64) {
        record.sync_state = SyncState::Synced;
        record.last_synced_at = Some(at.max(record.updated_at));
        record.synced_revision = record.revision;
    }

    fn transition(record: &mut Record, to: SyncState) -> Result<()> {
        let from = record.sync_state;
        if !can_transition(from, to) {
            return Err(Error::InvalidTransition {
                id: record.id.to_string(),
                from,
                to,
            });
        }
        record.sync_state = to;
        Ok(())
    }
}

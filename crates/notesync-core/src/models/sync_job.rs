//! Ephemeral sync work items

use super::RecordId;

/// What a job does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncOperation {
    /// Push one record's current revision
    Push(RecordId),
    /// Fetch remote changes since the watermark
    Pull,
}

/// Unit of sync work with its retry bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncJob {
    pub operation: SyncOperation,
    /// Failed attempts so far
    pub attempts: u32,
    /// Earliest time (Unix ms) the job may run again
    pub next_retry_at: i64,
    /// Record revision the job was created for (0 for pulls)
    pub revision: i64,
}

impl SyncJob {
    #[must_use]
    pub const fn push(id: RecordId, revision: i64) -> Self {
        Self {
            operation: SyncOperation::Push(id),
            attempts: 0,
            next_retry_at: 0,
            revision,
        }
    }

    #[must_use]
    pub const fn pull() -> Self {
        Self {
            operation: SyncOperation::Pull,
            attempts: 0,
            next_retry_at: 0,
            revision: 0,
        }
    }

    /// Whether the job may run at `now`
    #[must_use]
    pub const fn is_due(&self, now: i64) -> bool {
        self.next_retry_at <= now
    }

    /// A newer local revision replaces the job and clears its retry history
    #[must_use]
    pub const fn is_superseded_by(&self, revision: i64) -> bool {
        revision > self.revision
    }

    /// Record a failure and schedule the next attempt `delay_ms` from `now`
    pub fn record_failure(&mut self, now: i64, delay_ms: i64) {
        self.attempts = self.attempts.saturating_add(1);
        self.next_retry_at = now.saturating_add(delay_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_push_job_is_due_immediately() {
        let job = SyncJob::push(RecordId::new(), 3);
        assert!(job.is_due(0));
        assert_eq!(job.attempts, 0);
    }

    #[test]
    fn failure_pushes_retry_into_future() {
        let mut job = SyncJob::pull();
        job.record_failure(1_000, 2_000);
        assert_eq!(job.attempts, 1);
        assert!(!job.is_due(2_999));
        assert!(job.is_due(3_000));
    }

    #[test]
    fn newer_revision_supersedes() {
        let job = SyncJob::push(RecordId::new(), 2);
        assert!(job.is_superseded_by(3));
        assert!(!job.is_superseded_by(2));
    }
}

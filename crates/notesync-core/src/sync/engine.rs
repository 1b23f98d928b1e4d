//! Reconciliation engine: converges the local store with the remote.
//!
//! A cycle checks reachability, pushes dirty records in ascending id order,
//! then pulls remote changes since the stored watermark and merges them.
//! Every write back into the store is a compare-and-swap on the revision
//! captured before the network call, so a local edit made while a push is in
//! flight always survives.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{RetryPolicy, SyncError, SyncFailure, SyncResult, SyncTracker};
use crate::config::SyncSettings;
use crate::db::{NewConflict, RecordQuery};
use crate::models::{
    ConflictStrategy, ConflictWinner, Record, RecordId, SyncConflict, SyncJob, SyncOperation,
    SyncState,
};
use crate::remote::{PushMode, RemoteClient, RemoteError, RemoteId, RemoteRecord, RemoteResult};
use crate::services::RecordStore;
use crate::util::now_millis;
use crate::Error;

/// What happens when the remote holds a newer copy than the one being pushed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The newer `updated_at` wins; the loser is overwritten
    #[default]
    LastWriteWins,
    /// Keep both sides and wait for [`ReconciliationEngine::resolve_conflict`]
    Manual,
}

impl ConflictPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LastWriteWins => "last_write_wins",
            Self::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Per-record and pull retry backoff
    pub retry: RetryPolicy,
    pub conflict_policy: ConflictPolicy,
}

impl EngineConfig {
    #[must_use]
    pub const fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            retry: settings.retry,
            conflict_policy: settings.conflict_policy,
        }
    }
}

/// Side to keep when settling an open manual conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    KeepLocal,
    KeepRemote,
}

/// Summary of one completed cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Records acknowledged by the remote and now `Synced`
    pub pushed: usize,
    /// Pushes that failed and will be retried with backoff
    pub failed: Vec<SyncFailure>,
    /// Conflicts detected while pushing
    pub conflicts: usize,
    /// Remote changes written locally
    pub pulled: usize,
    /// Remote changes skipped because the local copy has unpushed edits
    pub deferred: usize,
    /// Writes dropped because a local edit landed first
    pub superseded: usize,
    /// Tombstones removed after the deletion was acknowledged or pulled
    pub purged: usize,
    /// Dirty records left alone: waiting on backoff or an open conflict
    pub skipped: usize,
    /// Set when the pull failed; the watermark was left unchanged
    pub pull_error: Option<String>,
    /// Server change cursor pulled up to, after the cycle
    pub watermark: i64,
}

impl CycleReport {
    /// Whether every push and the pull went through
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.pull_error.is_none()
    }
}

enum PushOutcome {
    /// Nothing left to do for this revision
    Done,
    /// Retry later
    Retry(SyncFailure),
}

type Jobs = HashMap<SyncOperation, SyncJob>;

/// Drives push/pull cycles between a [`RecordStore`] and a [`RemoteClient`]
pub struct ReconciliationEngine<C> {
    store: RecordStore,
    client: C,
    config: EngineConfig,
    /// Pending retries; the lock also serializes cycles
    jobs: Mutex<Jobs>,
}

impl<C> std::fmt::Debug for ReconciliationEngine<C> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ReconciliationEngine")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<C: RemoteClient> ReconciliationEngine<C> {
    pub fn new(store: RecordStore, client: C, config: EngineConfig) -> Self {
        Self {
            store,
            client,
            config,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub const fn store(&self) -> &RecordStore {
        &self.store
    }

    pub const fn client(&self) -> &C {
        &self.client
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Retry bookkeeping for pending work, ordered by operation
    pub async fn pending_jobs(&self) -> Vec<SyncJob> {
        let jobs = self.jobs.lock().await;
        let mut pending: Vec<SyncJob> = jobs.values().cloned().collect();
        pending.sort_by_key(|job| match job.operation {
            SyncOperation::Push(id) => (0, Some(id)),
            SyncOperation::Pull => (1, None),
        });
        pending
    }

    /// Run one push/pull cycle
    ///
    /// Concurrent callers wait for the active cycle to finish.
    pub async fn run_cycle(&self) -> SyncResult<CycleReport> {
        let mut jobs = self.jobs.lock().await;

        if !self.client.is_reachable().await {
            tracing::info!("{}", SyncError::Offline);
            return Err(SyncError::Offline);
        }

        let mut report = CycleReport::default();
        self.push_dirty(&mut jobs, &mut report).await?;
        self.pull_changes(&mut jobs, &mut report).await?;

        tracing::info!(
            pushed = report.pushed,
            failed = report.failed.len(),
            conflicts = report.conflicts,
            pulled = report.pulled,
            deferred = report.deferred,
            superseded = report.superseded,
            purged = report.purged,
            skipped = report.skipped,
            watermark = report.watermark,
            "Sync cycle finished"
        );
        Ok(report)
    }

    /// Settle an open manual conflict
    ///
    /// `KeepRemote` writes the stored server copy locally. `KeepLocal` re-dates
    /// the local record past the server copy so the next cycle pushes it as
    /// the newer version.
    pub async fn resolve_conflict(
        &self,
        id: &RecordId,
        resolution: Resolution,
    ) -> SyncResult<SyncConflict> {
        let mut jobs = self.jobs.lock().await;

        let mut conflict = self
            .store
            .open_conflict(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("open conflict for {id}")))?;
        let local = self.store.find_any(id).await?;

        let winner = match resolution {
            Resolution::KeepRemote => {
                let now = now_millis();
                if local.is_some() || !conflict.remote.deleted {
                    let applied = self
                        .store
                        .apply_remote(local.as_ref(), &conflict.remote, now)
                        .await?;
                    if !applied {
                        return Err(changed_while_resolving(id).into());
                    }
                }
                ConflictWinner::Remote
            }
            Resolution::KeepLocal => {
                let local = local.ok_or_else(|| Error::NotFound(id.to_string()))?;
                if !self
                    .store
                    .supersede_remote(&local, conflict.remote.timestamp)
                    .await?
                {
                    return Err(changed_while_resolving(id).into());
                }
                ConflictWinner::Local
            }
        };

        self.store.close_conflict(conflict.id, winner).await?;
        jobs.remove(&SyncOperation::Push(*id));
        tracing::info!(record_id = %id, winner = winner.as_str(), "Resolved sync conflict");

        conflict.winner = Some(winner);
        conflict.resolved_at = Some(now_millis());
        Ok(conflict)
    }

    async fn push_dirty(&self, jobs: &mut Jobs, report: &mut CycleReport) -> SyncResult<()> {
        let recovered = self.store.reset_in_flight().await?;
        if recovered > 0 {
            tracing::warn!("Recovered {recovered} record(s) left mid-push by an interrupted cycle");
        }

        let blocked = self.store.open_conflict_ids().await?;
        let dirty = self.store.query(&RecordQuery::dirty()).await?;

        let dirty_ids: HashSet<RecordId> = dirty.iter().map(|record| record.id).collect();
        jobs.retain(|operation, _| match operation {
            SyncOperation::Push(id) => dirty_ids.contains(id),
            SyncOperation::Pull => true,
        });

        let now = now_millis();
        for record in dirty {
            let id = record.id;
            let revision = record.revision;
            let key = SyncOperation::Push(id);

            if blocked.contains(&id) {
                report.skipped += 1;
                continue;
            }

            let job = jobs
                .entry(key)
                .or_insert_with(|| SyncJob::push(id, revision));
            if job.is_superseded_by(revision) {
                tracing::debug!(record_id = %id, revision, "Newer local revision replaces pending retry");
                *job = SyncJob::push(id, revision);
            }
            if !job.is_due(now) {
                report.skipped += 1;
                continue;
            }

            match self.push_record(record, report).await {
                Ok(PushOutcome::Done) => {
                    jobs.remove(&key);
                }
                Ok(PushOutcome::Retry(failure)) => {
                    if let Some(job) = jobs.get_mut(&key) {
                        let delay_ms = self.config.retry.delay_ms_for(job.attempts);
                        job.record_failure(now_millis(), delay_ms);
                        tracing::debug!(
                            record_id = %id,
                            attempts = job.attempts,
                            retry_in_ms = delay_ms,
                            "Scheduled push retry"
                        );
                    }
                    report.failed.push(failure);
                }
                Err(SyncError::Store(error)) => {
                    tracing::error!(record_id = %id, "Local store failure while pushing: {error}");
                    report.failed.push(SyncFailure {
                        id,
                        revision,
                        reason: error.to_string(),
                    });
                }
                Err(error) => return Err(error),
            }
        }

        Ok(())
    }

    async fn push_record(&self, record: Record, report: &mut CycleReport) -> SyncResult<PushOutcome> {
        let mut syncing = record;
        SyncTracker::mark_syncing(&mut syncing)?;
        syncing.last_push_at = Some(now_millis());
        if !self.store.commit_sync_state(&syncing).await? {
            report.superseded += 1;
            return Ok(PushOutcome::Done);
        }

        let payload = RemoteRecord::from_record(&syncing);
        match self.client.push(&payload, PushMode::Normal).await {
            Err(RemoteError::Conflict { remote }) => {
                self.handle_conflict(syncing, *remote, report).await
            }
            result => self.settle_push(syncing, result, report).await,
        }
    }

    async fn settle_push(
        &self,
        syncing: Record,
        result: RemoteResult<RemoteId>,
        report: &mut CycleReport,
    ) -> SyncResult<PushOutcome> {
        match result {
            Ok(_) => {
                self.acknowledge(syncing, report).await?;
                Ok(PushOutcome::Done)
            }
            Err(RemoteError::Unauthorized) => {
                let mut restored = syncing;
                SyncTracker::mark_dirty(&mut restored);
                self.store.commit_sync_state(&restored).await?;
                tracing::error!(record_id = %restored.id, "Remote rejected credentials; aborting cycle");
                Err(SyncError::Unauthorized)
            }
            Err(error) => {
                let mut failed = syncing;
                let failure = SyncTracker::mark_failed(&mut failed, error.to_string())?;
                if !self.store.commit_sync_state(&failed).await? {
                    report.superseded += 1;
                }
                tracing::warn!(record_id = %failed.id, "Push failed: {error}");
                Ok(PushOutcome::Retry(failure))
            }
        }
    }

    async fn acknowledge(&self, mut syncing: Record, report: &mut CycleReport) -> SyncResult<()> {
        if syncing.is_tombstone() {
            if self
                .store
                .purge_tombstone(&syncing.id, syncing.revision)
                .await?
            {
                tracing::debug!(record_id = %syncing.id, "Deletion acknowledged; tombstone purged");
                report.purged += 1;
            } else {
                report.superseded += 1;
            }
            return Ok(());
        }

        SyncTracker::mark_synced(&mut syncing, now_millis())?;
        if self.store.commit_sync_state(&syncing).await? {
            report.pushed += 1;
        } else {
            tracing::debug!(
                record_id = %syncing.id,
                "Record changed during push; keeping the local edit for the next cycle"
            );
            report.superseded += 1;
        }
        Ok(())
    }

    async fn handle_conflict(
        &self,
        mut syncing: Record,
        remote: RemoteRecord,
        report: &mut CycleReport,
    ) -> SyncResult<PushOutcome> {
        report.conflicts += 1;
        let detected_at = now_millis();

        match self.config.conflict_policy {
            ConflictPolicy::LastWriteWins if remote.timestamp > syncing.updated_at => {
                tracing::info!(
                    record_id = %syncing.id,
                    local_updated_at = syncing.updated_at,
                    remote_updated_at = remote.timestamp,
                    "Conflict: server copy is newer, adopting it"
                );
                if self
                    .store
                    .apply_remote(Some(&syncing), &remote, detected_at)
                    .await?
                {
                    self.log_conflict(
                        &syncing,
                        &remote,
                        ConflictStrategy::Lww,
                        Some(ConflictWinner::Remote),
                        detected_at,
                    )
                    .await?;
                } else {
                    // The newer local revision meets the server copy next cycle
                    tracing::debug!(
                        record_id = %syncing.id,
                        "Record changed during push; conflict deferred"
                    );
                    report.superseded += 1;
                }
                Ok(PushOutcome::Done)
            }
            ConflictPolicy::LastWriteWins => {
                tracing::info!(
                    record_id = %syncing.id,
                    local_updated_at = syncing.updated_at,
                    remote_updated_at = remote.timestamp,
                    "Conflict: local copy is newer, overwriting server copy"
                );
                self.log_conflict(
                    &syncing,
                    &remote,
                    ConflictStrategy::Lww,
                    Some(ConflictWinner::Local),
                    detected_at,
                )
                .await?;
                let payload = RemoteRecord::from_record(&syncing);
                let result = self.client.push(&payload, PushMode::Overwrite).await;
                self.settle_push(syncing, result, report).await
            }
            ConflictPolicy::Manual => {
                SyncTracker::mark_failed(&mut syncing, "conflict")?;
                if !self.store.commit_sync_state(&syncing).await? {
                    tracing::debug!(
                        record_id = %syncing.id,
                        "Record changed during push; conflict deferred"
                    );
                    report.superseded += 1;
                    return Ok(PushOutcome::Done);
                }
                self.log_conflict(&syncing, &remote, ConflictStrategy::Manual, None, detected_at)
                    .await?;
                tracing::warn!(
                    record_id = %syncing.id,
                    "Conflict left open for manual resolution"
                );
                Ok(PushOutcome::Done)
            }
        }
    }

    async fn log_conflict(
        &self,
        local: &Record,
        remote: &RemoteRecord,
        strategy: ConflictStrategy,
        winner: Option<ConflictWinner>,
        detected_at: i64,
    ) -> SyncResult<()> {
        self.store
            .record_conflict(&NewConflict {
                record_id: local.id,
                local_updated_at: local.updated_at,
                remote,
                strategy,
                winner,
                detected_at,
            })
            .await?;
        Ok(())
    }

    async fn pull_changes(&self, jobs: &mut Jobs, report: &mut CycleReport) -> SyncResult<()> {
        let since = self.store.pull_watermark().await?;
        report.watermark = since;

        let now = now_millis();
        let job = jobs.entry(SyncOperation::Pull).or_insert_with(SyncJob::pull);
        if !job.is_due(now) {
            tracing::debug!("Pull waiting on backoff");
            return Ok(());
        }

        let changes = match self.client.pull(since).await {
            Ok(changes) => changes,
            Err(RemoteError::Unauthorized) => {
                tracing::error!("Remote rejected credentials during pull");
                return Err(SyncError::Unauthorized);
            }
            Err(error) => {
                let delay_ms = self.config.retry.delay_ms_for(job.attempts);
                job.record_failure(now_millis(), delay_ms);
                tracing::warn!(attempts = job.attempts, retry_in_ms = delay_ms, "Pull failed: {error}");
                report.pull_error = Some(error.to_string());
                return Ok(());
            }
        };
        jobs.remove(&SyncOperation::Pull);

        let mut newest = since;
        let mut merged_all = true;
        for remote in &changes {
            newest = newest.max(remote.cursor);
            if let Err(error) = self.merge(remote, report).await {
                tracing::error!(record_id = %remote.id, "Failed to merge remote change: {error}");
                merged_all = false;
            }
        }

        if !merged_all {
            tracing::warn!("Pull watermark held at {since} until every change merges");
        } else if newest > since {
            self.store.set_pull_watermark(newest).await?;
            report.watermark = newest;
        }
        Ok(())
    }

    async fn merge(&self, remote: &RemoteRecord, report: &mut CycleReport) -> crate::Result<()> {
        let local = self.store.find_any(&remote.id).await?;
        let now = now_millis();

        match local {
            None if remote.deleted => {}
            None => {
                if self.store.apply_remote(None, remote, now).await? {
                    report.pulled += 1;
                }
            }
            Some(local) if local.is_dirty() || local.sync_state == SyncState::Syncing => {
                tracing::debug!(record_id = %local.id, "Local copy has unpushed edits; deferring remote change");
                report.deferred += 1;
            }
            Some(local) if local.updated_at < remote.timestamp => {
                if !self.store.apply_remote(Some(&local), remote, now).await? {
                    report.deferred += 1;
                } else if remote.deleted {
                    report.purged += 1;
                } else {
                    report.pulled += 1;
                }
            }
            Some(_) => {}
        }
        Ok(())
    }
}

fn changed_while_resolving(id: &RecordId) -> Error {
    Error::Database(format!("record {id} changed while resolving its conflict; try again"))
}

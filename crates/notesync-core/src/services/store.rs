//! Shared record store used by the CLI, the sync engine and embedding apps.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{
    ConflictRepository, Database, MetaRepository, NewConflict, RecordQuery, RecordRepository,
    SqliteConflictRepository, SqliteMetaRepository, SqliteRecordRepository,
};
use crate::models::{
    ConflictWinner, Record, RecordDraft, RecordId, RecordPatch, SyncConflict, SyncState,
};
use crate::remote::RemoteRecord;
use crate::sync::SyncTracker;
use crate::util::now_millis;
use crate::{Error, Result};

/// Snapshot for status displays
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStatus {
    /// Rows per sync state, pending deletions included
    pub counts: Vec<(SyncState, usize)>,
    /// Server change cursor of the newest remote change already merged
    pub pull_watermark: i64,
    pub open_conflicts: usize,
}

impl StoreStatus {
    #[must_use]
    pub fn count(&self, state: SyncState) -> usize {
        self.counts
            .iter()
            .find(|(candidate, _)| *candidate == state)
            .map_or(0, |(_, count)| *count)
    }

    /// Records waiting to be pushed
    #[must_use]
    pub fn pending(&self) -> usize {
        self.count(SyncState::NotSynced) + self.count(SyncState::SyncFailed)
    }
}

/// Thread-safe handle over the local database
///
/// Clones share one connection. Public writes are local edits and always
/// leave the record `NotSynced`; sync bookkeeping is written only by the
/// reconciliation engine through the crate-private methods, each of which is
/// a compare-and-swap on the record revision.
#[derive(Clone)]
pub struct RecordStore {
    db: Arc<Mutex<Database>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RecordStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RecordStore {
    /// Open (or create) the store at `path`
    pub fn open_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&path)?;
        tracing::debug!("Opened record store at {}", path.display());
        Ok(Self::from_database(db))
    }

    /// Open an in-memory store (primarily for tests)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    fn from_database(db: Database) -> Self {
        let path = db.path().map(Path::to_path_buf);
        Self {
            db: Arc::new(Mutex::new(db)),
            path,
        }
    }

    /// Filesystem location, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Create a record; the caller reads the generated id from the result
    pub async fn create(&self, draft: RecordDraft) -> Result<Record> {
        if draft.is_empty() {
            return Err(Error::InvalidInput(
                "record title and content cannot both be empty".to_string(),
            ));
        }

        let record = Record::new(draft.title, draft.content);
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).insert(&record)?;
        tracing::debug!(record_id = %record.id, "Created record");
        Ok(record)
    }

    /// Apply a local edit
    pub async fn update(&self, id: &RecordId, patch: RecordPatch) -> Result<Record> {
        if patch.is_empty() {
            return Err(Error::InvalidInput("nothing to update".to_string()));
        }

        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        let mut record = find_live(&repo, id)?;
        let expected = record.revision;

        if let Some(title) = patch.title {
            record.title = title;
        }
        if let Some(content) = patch.content {
            record.content = content;
        }
        touch(&mut record);

        if !repo.replace(&record, expected)? {
            return Err(concurrent_write(id));
        }
        tracing::debug!(record_id = %id, revision = record.revision, "Updated record");
        Ok(record)
    }

    /// Delete a record
    ///
    /// Records never sent to the remote are removed outright. Everything else,
    /// including records whose push failed without an answer, becomes a
    /// tombstone that the engine pushes as a deletion and purges once the
    /// remote acknowledges it.
    pub async fn delete(&self, id: &RecordId) -> Result<()> {
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());
        let mut record = find_live(&repo, id)?;
        let expected = record.revision;

        if !record.may_exist_remotely() && record.sync_state != SyncState::Syncing {
            if !repo.remove(id, expected)? {
                return Err(concurrent_write(id));
            }
            tracing::debug!(record_id = %id, "Removed record the remote never saw");
            return Ok(());
        }

        touch(&mut record);
        record.deleted_at = Some(record.updated_at);
        if !repo.replace(&record, expected)? {
            return Err(concurrent_write(id));
        }
        tracing::debug!(record_id = %id, "Tombstoned record pending deletion sync");
        Ok(())
    }

    /// Query records
    pub async fn query(&self, query: &RecordQuery) -> Result<Vec<Record>> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).query(query)
    }

    /// Fetch a live record
    pub async fn get(&self, id: &RecordId) -> Result<Record> {
        let db = self.db.lock().await;
        find_live(&SqliteRecordRepository::new(db.connection()), id)
    }

    /// Live record ids starting with `prefix`
    pub async fn find_by_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).find_ids_by_prefix(prefix, limit)
    }

    /// Counts, watermark and open conflicts in one read
    pub async fn status(&self) -> Result<StoreStatus> {
        let db = self.db.lock().await;
        let counts = SqliteRecordRepository::new(db.connection()).count_by_state()?;
        let pull_watermark = SqliteMetaRepository::new(db.connection()).pull_watermark()?;
        let open_conflicts = SqliteConflictRepository::new(db.connection())
            .open_record_ids()?
            .len();
        Ok(StoreStatus {
            counts,
            pull_watermark,
            open_conflicts,
        })
    }

    pub async fn pull_watermark(&self) -> Result<i64> {
        let db = self.db.lock().await;
        SqliteMetaRepository::new(db.connection()).pull_watermark()
    }

    /// Conflict log, most recent first
    pub async fn conflicts(&self, limit: usize, open_only: bool) -> Result<Vec<SyncConflict>> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).list(limit, open_only)
    }

    /// The unresolved conflict blocking `id`, if any
    pub async fn open_conflict(&self, id: &RecordId) -> Result<Option<SyncConflict>> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).find_open(id)
    }

    // Engine-facing writes. A `false` result means a local edit moved the
    // revision on and the engine's copy is stale.

    /// Row by id, tombstones included
    pub(crate) async fn find_any(&self, id: &RecordId) -> Result<Option<Record>> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).find(id)
    }

    /// Persist sync fields of `record` if its revision is still current
    pub(crate) async fn commit_sync_state(&self, record: &Record) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).replace(record, record.revision)
    }

    /// Drop an acknowledged tombstone
    pub(crate) async fn purge_tombstone(&self, id: &RecordId, revision: i64) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).remove(id, revision)
    }

    /// Replace local state with the server copy
    ///
    /// `local` is the row the decision was made on (`None` when the record is
    /// unknown locally). Remote deletions purge the row.
    pub(crate) async fn apply_remote(
        &self,
        local: Option<&Record>,
        remote: &RemoteRecord,
        at: i64,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());

        match local {
            Some(local) if remote.deleted => repo.remove(&local.id, local.revision),
            Some(local) => {
                let mut merged = local.clone();
                merged.title.clone_from(&remote.title);
                merged.content.clone_from(&remote.content);
                merged.updated_at = remote.timestamp;
                merged.deleted_at = None;
                merged.revision = local.revision + 1;
                SyncTracker::adopt_remote(&mut merged, at);
                repo.replace(&merged, local.revision)
            }
            None if remote.deleted => Ok(false),
            None => {
                let mut record = Record::new(remote.title.clone(), remote.content.clone());
                record.id = remote.id;
                record.created_at = remote.timestamp;
                record.updated_at = remote.timestamp;
                SyncTracker::adopt_remote(&mut record, at);
                repo.insert(&record)?;
                Ok(true)
            }
        }
    }

    /// Re-date a local record so that it supersedes a server copy stamped
    /// `remote_timestamp`, leaving it dirty for the next push
    pub(crate) async fn supersede_remote(
        &self,
        local: &Record,
        remote_timestamp: i64,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = SqliteRecordRepository::new(db.connection());

        let mut record = local.clone();
        touch(&mut record);
        record.updated_at = record.updated_at.max(remote_timestamp + 1);
        if record.is_tombstone() {
            record.deleted_at = Some(record.updated_at);
        }
        repo.replace(&record, local.revision)
    }

    /// Rows left in `Syncing` by an interrupted cycle go back to `NotSynced`
    pub(crate) async fn reset_in_flight(&self) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteRecordRepository::new(db.connection()).reset_in_flight()
    }

    pub(crate) async fn set_pull_watermark(&self, watermark: i64) -> Result<()> {
        let db = self.db.lock().await;
        SqliteMetaRepository::new(db.connection()).set_pull_watermark(watermark)
    }

    pub(crate) async fn record_conflict(&self, conflict: &NewConflict<'_>) -> Result<i64> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).insert(conflict)
    }

    pub(crate) async fn open_conflict_ids(&self) -> Result<HashSet<RecordId>> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).open_record_ids()
    }

    pub(crate) async fn close_conflict(&self, id: i64, winner: ConflictWinner) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).resolve(id, winner, now_millis())
    }
}

fn find_live(repo: &SqliteRecordRepository<'_>, id: &RecordId) -> Result<Record> {
    repo.find(id)?
        .filter(|record| !record.is_tombstone())
        .ok_or_else(|| Error::NotFound(id.to_string()))
}

/// Local mutation bookkeeping: strictly increasing `updated_at`, new revision
fn touch(record: &mut Record) {
    record.updated_at = now_millis().max(record.updated_at + 1);
    record.revision += 1;
    SyncTracker::mark_dirty(record);
}

fn concurrent_write(id: &RecordId) -> Error {
    Error::Database(format!("record {id} changed during the write"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConflictStrategy;
    use pretty_assertions::assert_eq;

    fn remote_copy(id: RecordId, title: &str, timestamp: i64) -> RemoteRecord {
        RemoteRecord {
            id,
            title: title.to_string(),
            content: String::new(),
            timestamp,
            deleted: false,
            cursor: 0,
        }
    }

    async fn mark_synced(store: &RecordStore, id: &RecordId) -> Record {
        let mut record = store.find_any(id).await.unwrap().unwrap();
        SyncTracker::mark_syncing(&mut record).unwrap();
        SyncTracker::mark_synced(&mut record, now_millis()).unwrap();
        assert!(store.commit_sync_state(&record).await.unwrap());
        record
    }

    #[tokio::test]
    async fn create_and_get() {
        let store = RecordStore::open_in_memory().unwrap();
        let record = store
            .create(RecordDraft::new("Groceries", "milk"))
            .await
            .unwrap();

        let fetched = store.get(&record.id).await.unwrap();
        assert_eq!(fetched, record);
        assert_eq!(fetched.sync_state, SyncState::NotSynced);
        assert_eq!(fetched.last_synced_at, None);
    }

    #[tokio::test]
    async fn create_rejects_empty_draft() {
        let store = RecordStore::open_in_memory().unwrap();
        let error = store.create(RecordDraft::new(" ", "")).await.unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let store = RecordStore::open_in_memory().unwrap();
        let error = store.get(&RecordId::new()).await.unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn editing_a_synced_record_makes_it_dirty() {
        let store = RecordStore::open_in_memory().unwrap();
        let record = store.create(RecordDraft::new("A", "")).await.unwrap();
        let synced = mark_synced(&store, &record.id).await;
        assert_eq!(synced.sync_state, SyncState::Synced);

        let edited = store
            .update(&record.id, RecordPatch::content("more"))
            .await
            .unwrap();
        assert_eq!(edited.sync_state, SyncState::NotSynced);
        assert_eq!(edited.revision, synced.revision + 1);
        assert!(edited.updated_at > synced.updated_at);
        assert_eq!(edited.title, "A");
        assert_eq!(edited.content, "more");
        // last_synced_at is kept for display until the next push
        assert_eq!(edited.last_synced_at, synced.last_synced_at);
    }

    #[tokio::test]
    async fn empty_patch_is_rejected() {
        let store = RecordStore::open_in_memory().unwrap();
        let record = store.create(RecordDraft::new("A", "")).await.unwrap();
        let error = store
            .update(&record.id, RecordPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn deleting_a_never_synced_record_removes_it() {
        let store = RecordStore::open_in_memory().unwrap();
        let record = store.create(RecordDraft::new("A", "")).await.unwrap();

        store.delete(&record.id).await.unwrap();
        assert!(store.find_any(&record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_a_synced_record_leaves_a_tombstone() {
        let store = RecordStore::open_in_memory().unwrap();
        let record = store.create(RecordDraft::new("A", "")).await.unwrap();
        mark_synced(&store, &record.id).await;

        store.delete(&record.id).await.unwrap();

        let tombstone = store.find_any(&record.id).await.unwrap().unwrap();
        assert!(tombstone.is_tombstone());
        assert_eq!(tombstone.sync_state, SyncState::NotSynced);
        assert!(matches!(
            store.get(&record.id).await.unwrap_err(),
            Error::NotFound(_)
        ));
        assert!(store.query(&RecordQuery::recent(10)).await.unwrap().is_empty());
        assert_eq!(store.query(&RecordQuery::dirty()).await.unwrap().len(), 1);

        // Tombstones cannot be edited or deleted again
        assert!(store
            .update(&record.id, RecordPatch::title("B"))
            .await
            .is_err());
        assert!(store.delete(&record.id).await.is_err());
    }

    #[tokio::test]
    async fn deleting_a_record_mid_first_push_keeps_a_tombstone() {
        let store = RecordStore::open_in_memory().unwrap();
        let mut record = store.create(RecordDraft::new("A", "")).await.unwrap();
        SyncTracker::mark_syncing(&mut record).unwrap();
        assert!(store.commit_sync_state(&record).await.unwrap());

        store.delete(&record.id).await.unwrap();

        let tombstone = store.find_any(&record.id).await.unwrap().unwrap();
        assert!(tombstone.is_tombstone());
    }

    #[tokio::test]
    async fn deleting_after_an_unanswered_push_keeps_a_tombstone() {
        let store = RecordStore::open_in_memory().unwrap();
        let mut record = store.create(RecordDraft::new("A", "")).await.unwrap();
        record.last_push_at = Some(now_millis());
        SyncTracker::mark_syncing(&mut record).unwrap();
        SyncTracker::mark_failed(&mut record, "timeout").unwrap();
        assert!(store.commit_sync_state(&record).await.unwrap());

        store.delete(&record.id).await.unwrap();

        let tombstone = store.find_any(&record.id).await.unwrap().unwrap();
        assert!(tombstone.is_tombstone());
        assert_eq!(tombstone.sync_state, SyncState::NotSynced);
    }

    #[tokio::test]
    async fn stale_sync_commit_is_rejected() {
        let store = RecordStore::open_in_memory().unwrap();
        let record = store.create(RecordDraft::new("A", "")).await.unwrap();

        let mut captured = record.clone();
        SyncTracker::mark_syncing(&mut captured).unwrap();
        assert!(store.commit_sync_state(&captured).await.unwrap());

        store
            .update(&record.id, RecordPatch::title("edited"))
            .await
            .unwrap();

        SyncTracker::mark_synced(&mut captured, now_millis()).unwrap();
        assert!(!store.commit_sync_state(&captured).await.unwrap());

        let stored = store.get(&record.id).await.unwrap();
        assert_eq!(stored.title, "edited");
        assert_eq!(stored.sync_state, SyncState::NotSynced);
    }

    #[tokio::test]
    async fn apply_remote_inserts_unknown_records_as_synced() {
        let store = RecordStore::open_in_memory().unwrap();
        let id = RecordId::new();

        assert!(store
            .apply_remote(None, &remote_copy(id, "server", 42), 100)
            .await
            .unwrap());

        let stored = store.get(&id).await.unwrap();
        assert_eq!(stored.title, "server");
        assert_eq!(stored.updated_at, 42);
        assert_eq!(stored.sync_state, SyncState::Synced);
        assert_eq!(stored.last_synced_at, Some(100));
        assert_eq!(stored.synced_revision, stored.revision);
    }

    #[tokio::test]
    async fn apply_remote_ignores_deletions_of_unknown_records() {
        let store = RecordStore::open_in_memory().unwrap();
        let mut remote = remote_copy(RecordId::new(), "gone", 42);
        remote.deleted = true;

        assert!(!store.apply_remote(None, &remote, 100).await.unwrap());
        assert!(store.find_any(&remote.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn apply_remote_overwrites_and_purges_with_cas() {
        let store = RecordStore::open_in_memory().unwrap();
        let record = store.create(RecordDraft::new("A", "")).await.unwrap();
        let synced = mark_synced(&store, &record.id).await;

        let newer = remote_copy(record.id, "server", synced.updated_at + 10);
        assert!(store
            .apply_remote(Some(&synced), &newer, now_millis())
            .await
            .unwrap());
        let merged = store.get(&record.id).await.unwrap();
        assert_eq!(merged.title, "server");
        assert_eq!(merged.sync_state, SyncState::Synced);
        assert!(merged.last_synced_at.unwrap() >= merged.updated_at);

        // `synced` is now stale
        assert!(!store
            .apply_remote(Some(&synced), &newer, now_millis())
            .await
            .unwrap());

        let mut deletion = newer.clone();
        deletion.timestamp += 1;
        deletion.deleted = true;
        assert!(store
            .apply_remote(Some(&merged), &deletion, now_millis())
            .await
            .unwrap());
        assert!(store.find_any(&record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn supersede_remote_redates_and_dirties() {
        let store = RecordStore::open_in_memory().unwrap();
        let record = store.create(RecordDraft::new("A", "")).await.unwrap();
        let far_future = record.updated_at + 1_000_000;

        assert!(store.supersede_remote(&record, far_future).await.unwrap());
        let stored = store.get(&record.id).await.unwrap();
        assert_eq!(stored.updated_at, far_future + 1);
        assert_eq!(stored.revision, record.revision + 1);
        assert_eq!(stored.sync_state, SyncState::NotSynced);
    }

    #[tokio::test]
    async fn status_counts_and_conflicts() {
        let store = RecordStore::open_in_memory().unwrap();
        let a = store.create(RecordDraft::new("A", "")).await.unwrap();
        store.create(RecordDraft::new("B", "")).await.unwrap();
        mark_synced(&store, &a.id).await;

        let remote = remote_copy(a.id, "server", 1);
        store
            .record_conflict(&NewConflict {
                record_id: a.id,
                local_updated_at: a.updated_at,
                remote: &remote,
                strategy: ConflictStrategy::Manual,
                winner: None,
                detected_at: 5,
            })
            .await
            .unwrap();
        store.set_pull_watermark(77).await.unwrap();

        let status = store.status().await.unwrap();
        assert_eq!(status.count(SyncState::Synced), 1);
        assert_eq!(status.pending(), 1);
        assert_eq!(status.pull_watermark, 77);
        assert_eq!(status.open_conflicts, 1);

        let open = store.open_conflict(&a.id).await.unwrap().unwrap();
        assert!(store
            .close_conflict(open.id, ConflictWinner::Local)
            .await
            .unwrap());
        assert_eq!(store.status().await.unwrap().open_conflicts, 0);
        assert!(store.open_conflict_ids().await.unwrap().is_empty());
        assert_eq!(store.conflicts(10, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn on_disk_store_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data").join("notesync.db");

        let id = {
            let store = RecordStore::open_path(&path).unwrap();
            assert_eq!(store.path(), Some(path.as_path()));
            store
                .create(RecordDraft::new("persisted", ""))
                .await
                .unwrap()
                .id
        };

        let store = RecordStore::open_path(&path).unwrap();
        assert_eq!(store.get(&id).await.unwrap().title, "persisted");
        let ids = store.find_by_prefix(&id.as_str()[..8], 5).await.unwrap();
        assert_eq!(ids, vec![id.as_str()]);
    }
}

//! In-process remote with server-side upsert rules.
//!
//! Backs the reference API server and doubles as a scriptable remote in tests:
//! reachability can be toggled, failures queued, and pushes held mid-flight.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use super::{PushMode, RemoteClient, RemoteError, RemoteId, RemoteRecord, RemoteResult};
use crate::models::RecordId;

/// Handles for pausing pushes inside [`MemoryRemote`]
#[derive(Debug, Clone, Default)]
pub struct PushHold {
    /// Notified when a push reaches the hold point
    pub entered: Arc<Notify>,
    /// Notify to let the held push continue
    pub release: Arc<Notify>,
}

/// Stored records plus the last change cursor handed out
#[derive(Debug, Default)]
struct Changes {
    records: BTreeMap<RecordId, RemoteRecord>,
    cursor: i64,
}

#[derive(Debug)]
pub struct MemoryRemote {
    changes: Mutex<Changes>,
    reachable: AtomicBool,
    push_failures: Mutex<VecDeque<RemoteError>>,
    pull_failures: Mutex<VecDeque<RemoteError>>,
    hold: Mutex<Option<PushHold>>,
    pushes: AtomicUsize,
    pulls: AtomicUsize,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryRemote {
    /// A reachable, empty remote
    #[must_use]
    pub fn new() -> Self {
        Self {
            changes: Mutex::new(Changes::default()),
            reachable: AtomicBool::new(true),
            push_failures: Mutex::new(VecDeque::new()),
            pull_failures: Mutex::new(VecDeque::new()),
            hold: Mutex::new(None),
            pushes: AtomicUsize::new(0),
            pulls: AtomicUsize::new(0),
        }
    }

    /// Server-side upsert
    ///
    /// A normal push older than the stored copy is rejected with that copy;
    /// equal timestamps are accepted so retries of the same push stay idempotent.
    /// Every accepted write gets the next change cursor, whatever its timestamp.
    pub fn upsert(&self, record: &RemoteRecord, mode: PushMode) -> Result<RemoteId, RemoteRecord> {
        let mut changes = lock(&self.changes);
        if let Some(existing) = changes.records.get(&record.id) {
            if mode == PushMode::Normal && existing.timestamp > record.timestamp {
                return Err(existing.clone());
            }
        }
        changes.cursor += 1;
        let mut stored = record.clone();
        stored.cursor = changes.cursor;
        changes.records.insert(stored.id, stored);
        Ok(record.id)
    }

    /// Records stored after cursor `since`, in the order they were written
    pub fn changes_since(&self, since: i64) -> Vec<RemoteRecord> {
        let mut changes: Vec<RemoteRecord> = lock(&self.changes)
            .records
            .values()
            .filter(|record| record.cursor > since)
            .cloned()
            .collect();
        changes.sort_by_key(|record| record.cursor);
        changes
    }

    pub fn get(&self, id: &RecordId) -> Option<RemoteRecord> {
        lock(&self.changes).records.get(id).cloned()
    }

    /// Cursor of the latest accepted write, 0 when nothing was stored
    pub fn cursor(&self) -> i64 {
        lock(&self.changes).cursor
    }

    /// Number of stored records, deletion markers included
    pub fn len(&self) -> usize {
        lock(&self.changes).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Make the next push fail with `error`
    pub fn fail_next_push(&self, error: RemoteError) {
        lock(&self.push_failures).push_back(error);
    }

    /// Make the next pull fail with `error`
    pub fn fail_next_pull(&self, error: RemoteError) {
        lock(&self.pull_failures).push_back(error);
    }

    /// Pause every push until released through the returned handles
    pub fn hold_pushes(&self) -> PushHold {
        let hold = PushHold::default();
        *lock(&self.hold) = Some(hold.clone());
        hold
    }

    pub fn release_pushes(&self) {
        if let Some(hold) = lock(&self.hold).take() {
            hold.release.notify_waiters();
        }
    }

    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    pub fn pull_count(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }
}

impl RemoteClient for MemoryRemote {
    async fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    async fn push(&self, record: &RemoteRecord, mode: PushMode) -> RemoteResult<RemoteId> {
        self.pushes.fetch_add(1, Ordering::SeqCst);

        let hold = lock(&self.hold).clone();
        if let Some(hold) = hold {
            let released = hold.release.notified();
            hold.entered.notify_one();
            released.await;
        }

        if !self.reachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport("remote unreachable".to_string()));
        }
        let failure = lock(&self.push_failures).pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        self.upsert(record, mode).map_err(|remote| RemoteError::Conflict {
            remote: Box::new(remote),
        })
    }

    async fn pull(&self, since: i64) -> RemoteResult<Vec<RemoteRecord>> {
        self.pulls.fetch_add(1, Ordering::SeqCst);

        if !self.reachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport("remote unreachable".to_string()));
        }
        let failure = lock(&self.pull_failures).pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        Ok(self.changes_since(since))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_record(id: RecordId, timestamp: i64) -> RemoteRecord {
        RemoteRecord {
            id,
            title: format!("t{timestamp}"),
            content: String::new(),
            timestamp,
            deleted: false,
            cursor: 0,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_rejects_older_copies() {
        let remote = MemoryRemote::new();
        let id = RecordId::new();

        remote.push(&remote_record(id, 10), PushMode::Normal).await.unwrap();
        remote.push(&remote_record(id, 10), PushMode::Normal).await.unwrap();
        assert_eq!(remote.len(), 1);

        let error = remote
            .push(&remote_record(id, 5), PushMode::Normal)
            .await
            .unwrap_err();
        assert!(matches!(error, RemoteError::Conflict { remote } if remote.timestamp == 10));

        remote
            .push(&remote_record(id, 5), PushMode::Overwrite)
            .await
            .unwrap();
        assert_eq!(remote.get(&id).unwrap().timestamp, 5);
    }

    #[tokio::test]
    async fn pull_returns_changes_after_the_cursor() {
        let remote = MemoryRemote::new();
        let a = RecordId::new();
        let b = RecordId::new();
        remote.upsert(&remote_record(a, 10), PushMode::Normal).unwrap();
        remote.upsert(&remote_record(b, 20), PushMode::Normal).unwrap();
        assert_eq!(remote.cursor(), 2);

        let changes = remote.pull(1).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].id, b);
        assert_eq!(changes[0].cursor, 2);
    }

    #[tokio::test]
    async fn late_upload_of_an_old_edit_gets_a_new_cursor() {
        let remote = MemoryRemote::new();
        let newer = RecordId::new();
        let late = RecordId::new();
        remote.upsert(&remote_record(newer, 1_000), PushMode::Normal).unwrap();
        let seen = remote.cursor();

        // Edited offline long ago, uploaded only now
        remote.upsert(&remote_record(late, 500), PushMode::Normal).unwrap();

        let changes = remote.pull(seen).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].id, late);
        assert_eq!(changes[0].timestamp, 500);
    }

    #[tokio::test]
    async fn rejected_push_does_not_advance_the_cursor() {
        let remote = MemoryRemote::new();
        let id = RecordId::new();
        remote.upsert(&remote_record(id, 10), PushMode::Normal).unwrap();
        assert!(remote.upsert(&remote_record(id, 5), PushMode::Normal).is_err());
        assert_eq!(remote.cursor(), 1);
    }

    #[tokio::test]
    async fn scripted_failures_and_reachability() {
        let remote = MemoryRemote::new();
        remote.fail_next_pull(RemoteError::ServerError(502));
        assert_eq!(remote.pull(0).await, Err(RemoteError::ServerError(502)));
        assert!(remote.pull(0).await.is_ok());

        remote.set_reachable(false);
        assert!(!remote.is_reachable().await);
        assert!(matches!(
            remote.push(&remote_record(RecordId::new(), 1), PushMode::Normal).await,
            Err(RemoteError::Transport(_))
        ));
        assert_eq!(remote.push_count(), 1);
        assert_eq!(remote.pull_count(), 2);
    }
}

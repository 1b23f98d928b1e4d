//! Network boundary between the local store and the remote source of truth.

mod http;
mod memory;
mod reachability;

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Record, RecordId};

pub use http::HttpRemoteClient;
pub use memory::{MemoryRemote, PushHold};
pub use reachability::ReachabilityCache;

/// Identifier the remote assigns; records keep their local id on the server
pub type RemoteId = RecordId;

/// Wire representation of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: RecordId,
    pub title: String,
    pub content: String,
    /// The record's `updated_at` (Unix ms)
    pub timestamp: i64,
    /// Deletion marker; absent on the wire means `false`
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    /// Server change sequence stamped when the server stores the record.
    /// Pull cursors are built from it; clients send 0.
    #[serde(default, skip_serializing_if = "is_unset")]
    pub cursor: i64,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde passes fields by reference
const fn is_unset(cursor: &i64) -> bool {
    *cursor == 0
}

impl RemoteRecord {
    /// Wire form of a local record; tombstones travel as `deleted`
    #[must_use]
    pub fn from_record(record: &Record) -> Self {
        Self {
            id: record.id,
            title: record.title.clone(),
            content: record.content.clone(),
            timestamp: record.updated_at,
            deleted: record.is_tombstone(),
            cursor: 0,
        }
    }
}

/// How a push treats a newer server copy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PushMode {
    /// Upsert; the server answers 409 when its copy is newer
    #[default]
    Normal,
    /// Unconditional upsert, used after conflict resolution picked the local side
    Overwrite,
}

/// Errors returned by a [`RemoteClient`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote rejected credentials")]
    Unauthorized,
    #[error("Remote holds a newer copy of {}", remote.id)]
    Conflict { remote: Box<RemoteRecord> },
    #[error("Server error: {0}")]
    ServerError(u16),
    #[error("Transport error: {0}")]
    Transport(String),
}

impl RemoteError {
    /// Transport failures and server errors are retried with backoff
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ServerError(_) | Self::Transport(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Abstract remote API used by the reconciliation engine
///
/// Pushes must be idempotent per record id: the server upserts.
pub trait RemoteClient: Send + Sync {
    /// Cheap connectivity probe; implementations cache the answer briefly
    fn is_reachable(&self) -> impl Future<Output = bool> + Send;

    /// Upsert one record
    fn push(
        &self,
        record: &RemoteRecord,
        mode: PushMode,
    ) -> impl Future<Output = RemoteResult<RemoteId>> + Send;

    /// Records the server stored after cursor `since`, in cursor order
    fn pull(&self, since: i64) -> impl Future<Output = RemoteResult<Vec<RemoteRecord>>> + Send;
}

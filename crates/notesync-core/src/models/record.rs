//! Record model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::SyncState;

/// A unique identifier for a record, using UUID v7 (time-sortable)
///
/// Ordering follows the UUID bytes, so ascending ids follow creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A user record (note) in the local store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier
    pub id: RecordId,
    /// Title line
    pub title: String,
    /// Body text
    pub content: String,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last local or merged update timestamp (Unix ms)
    pub updated_at: i64,
    /// When the remote last acknowledged this record (Unix ms)
    pub last_synced_at: Option<i64>,
    /// Current sync state
    pub sync_state: SyncState,
    /// Tombstone marker; set while a deletion waits to be synced
    pub deleted_at: Option<i64>,
    /// Monotonic local revision, bumped by every local mutation
    pub revision: i64,
    /// Revision last acknowledged by the remote (0 = never)
    pub synced_revision: i64,
    /// When a push of this record was last sent (Unix ms), acknowledged or not
    pub last_push_at: Option<i64>,
}

impl Record {
    /// Create a new, never-synced record
    #[must_use]
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: RecordId::new(),
            title: title.into(),
            content: content.into(),
            created_at: now,
            updated_at: now,
            last_synced_at: None,
            sync_state: SyncState::NotSynced,
            deleted_at: None,
            revision: 1,
            synced_revision: 0,
            last_push_at: None,
        }
    }

    /// Whether local state changed since the last acknowledged sync
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.sync_state.is_dirty()
    }

    /// Whether this row is a pending deletion
    #[must_use]
    pub const fn is_tombstone(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether the remote has ever acknowledged this record
    #[must_use]
    pub const fn was_ever_synced(&self) -> bool {
        self.synced_revision > 0 || self.last_synced_at.is_some()
    }

    /// Whether the remote may hold a copy: a push was sent, even if its
    /// response never arrived
    #[must_use]
    pub const fn may_exist_remotely(&self) -> bool {
        self.last_push_at.is_some() || self.was_ever_synced()
    }

    /// Get the title, falling back to the first content line, truncated to `max_len` characters
    #[must_use]
    pub fn title_preview(&self, max_len: usize) -> String {
        let source = if self.title.trim().is_empty() {
            self.content.lines().next().unwrap_or("")
        } else {
            self.title.as_str()
        };
        source.trim().chars().take(max_len).collect()
    }
}

/// Input for creating a record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordDraft {
    pub title: String,
    pub content: String,
}

impl RecordDraft {
    #[must_use]
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }

    /// Split free text into a draft: the first line becomes the title
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        let text = text.trim();
        match text.split_once('\n') {
            Some((title, rest)) => Self::new(title.trim(), rest.trim()),
            None => Self::new(text, ""),
        }
    }

    /// Whether both title and content are blank
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty() && self.content.trim().is_empty()
    }
}

/// Partial update applied by a local edit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPatch {
    pub title: Option<String>,
    pub content: Option<String>,
}

impl RecordPatch {
    #[must_use]
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            content: None,
        }
    }

    #[must_use]
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            title: None,
            content: Some(content.into()),
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none()
    }
}

//! Sync conflict model

use serde::{Deserialize, Serialize};

use super::RecordId;
use crate::remote::RemoteRecord;

/// How a conflict was (or will be) settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Newer `updated_at` wins automatically
    Lww,
    /// Left for the user to resolve
    Manual,
}

impl ConflictStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lww => "lww",
            Self::Manual => "manual",
        }
    }

    #[must_use]
    pub fn from_db(value: &str) -> Self {
        if value == "manual" {
            Self::Manual
        } else {
            Self::Lww
        }
    }
}

/// Which side survived a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictWinner {
    Local,
    Remote,
}

impl ConflictWinner {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }

    #[must_use]
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "local" => Some(Self::Local),
            "remote" => Some(Self::Remote),
            _ => None,
        }
    }
}

/// Recorded conflict between a local edit and the server copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Record involved in the conflict
    pub record_id: RecordId,
    /// Local `updated_at` when the conflict was detected
    pub local_updated_at: i64,
    /// Server copy's timestamp
    pub remote_updated_at: i64,
    /// Detection timestamp (unix ms)
    pub detected_at: i64,
    /// Resolution strategy
    pub strategy: ConflictStrategy,
    /// Surviving side, `None` while a manual conflict is open
    pub winner: Option<ConflictWinner>,
    /// Server copy at detection time
    pub remote: RemoteRecord,
    /// Resolution timestamp (unix ms), `None` while open
    pub resolved_at: Option<i64>,
}

impl SyncConflict {
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

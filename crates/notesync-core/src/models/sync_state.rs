//! Per-record sync state

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a record stands relative to the remote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Local changes not yet pushed
    #[default]
    NotSynced,
    /// Push in flight
    Syncing,
    /// Remote acknowledged the current revision
    Synced,
    /// Last push attempt failed; will be retried
    SyncFailed,
}

impl SyncState {
    pub const ALL: [Self; 4] = [
        Self::NotSynced,
        Self::Syncing,
        Self::Synced,
        Self::SyncFailed,
    ];

    /// Integer code stored in the database
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::NotSynced => 0,
            Self::Syncing => 1,
            Self::Synced => 2,
            Self::SyncFailed => 3,
        }
    }

    /// Decode a stored code; unknown codes read as `NotSynced` so they get re-pushed
    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Syncing,
            2 => Self::Synced,
            3 => Self::SyncFailed,
            _ => Self::NotSynced,
        }
    }

    /// States the engine selects for pushing
    #[must_use]
    pub const fn is_dirty(self) -> bool {
        matches!(self, Self::NotSynced | Self::SyncFailed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotSynced => "not_synced",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::SyncFailed => "sync_failed",
        }
    }

    /// Human-readable label for status displays
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::NotSynced => "Not Synced",
            Self::Syncing => "Syncing...",
            Self::Synced => "Synced",
            Self::SyncFailed => "Sync Failed",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SyncState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "not_synced" | "notsynced" | "dirty" => Ok(Self::NotSynced),
            "syncing" => Ok(Self::Syncing),
            "synced" => Ok(Self::Synced),
            "sync_failed" | "syncfailed" | "failed" => Ok(Self::SyncFailed),
            other => Err(format!("unknown sync state '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip() {
        for state in SyncState::ALL {
            assert_eq!(SyncState::from_code(state.code()), state);
        }
        assert_eq!(SyncState::from_code(42), SyncState::NotSynced);
    }

    #[test]
    fn dirty_states() {
        assert!(SyncState::NotSynced.is_dirty());
        assert!(SyncState::SyncFailed.is_dirty());
        assert!(!SyncState::Syncing.is_dirty());
        assert!(!SyncState::Synced.is_dirty());
    }

    #[test]
    fn labels_match_status_display() {
        assert_eq!(SyncState::NotSynced.to_string(), "Not Synced");
        assert_eq!(SyncState::Syncing.to_string(), "Syncing...");
        assert_eq!(SyncState::SyncFailed.to_string(), "Sync Failed");
    }

    #[test]
    fn parses_cli_spellings() {
        assert_eq!("sync-failed".parse::<SyncState>(), Ok(SyncState::SyncFailed));
        assert_eq!("Not Synced".parse::<SyncState>(), Ok(SyncState::NotSynced));
        assert!("bogus".parse::<SyncState>().is_err());
    }
}

//! Cycle-level sync errors.

use std::time::Duration;

use thiserror::Error;

use crate::error::Error;
use crate::remote::RemoteError;

/// Why a whole sync cycle (or a conflict resolution) did not complete
///
/// Per-record push failures are not errors at this level; they are counted
/// in the cycle report and retried with backoff.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Device is offline. Changes will sync when online.")]
    Offline,

    #[error("Remote rejected credentials; sync is paused until they are fixed")]
    Unauthorized,

    #[error("Sync cycle timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Local store error: {0}")]
    Store(#[from] Error),

    #[error("Remote error: {0}")]
    Remote(RemoteError),
}

impl SyncError {
    /// Whether the scheduler should keep retrying automatically
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Offline | Self::Timeout(_) | Self::Store(_) => true,
            Self::Unauthorized => false,
            Self::Remote(error) => error.is_retryable(),
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Unauthorized => Self::Unauthorized,
            other => Self::Remote(other),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

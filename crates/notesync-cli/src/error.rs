use std::io;

use notesync_core::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] notesync_core::Error),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No record content provided")]
    EmptyContent,
    #[error("Edited record cannot be empty")]
    EmptyEditedContent,
    #[error("Record ID cannot be empty")]
    EmptyRecordId,
    #[error("Record not found for id/prefix: {0}")]
    RecordNotFound(String),
    #[error("No open conflict for id/prefix: {0}")]
    ConflictNotFound(String),
    #[error("{0}")]
    AmbiguousRecordId(String),
    #[error("Editor command failed: {0}")]
    EditorFailed(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Automatic sync is disabled. Set \"sync_enabled\": true in {0}")]
    SyncDisabled(String),
}

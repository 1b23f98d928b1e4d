//! notesync-core - Core library for notesync
//!
//! Offline-first record storage and the machinery that keeps it in step with
//! a remote: sync state tracking, a pluggable remote client, the
//! reconciliation engine and the background scheduler. Shared by the CLI and
//! the reference API server.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod sync;
pub mod util;

pub use config::{Environment, SyncSettings};
pub use error::{Error, Result};
pub use models::{Record, RecordDraft, RecordId, RecordPatch, SyncConflict, SyncState};
pub use remote::{HttpRemoteClient, MemoryRemote, RemoteClient, RemoteRecord};
pub use services::{RecordStore, StoreStatus};
pub use sync::{ReconciliationEngine, SyncError, SyncScheduler, Trigger};

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use notesync_core::sync::Resolution;
use notesync_core::SyncState;

#[derive(Parser)]
#[command(name = "notesync")]
#[command(about = "Offline-first notes that sync when a connection is available")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to sync settings (JSON)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Quick capture: notesync "my thought here"
    #[arg(trailing_var_arg = true)]
    pub text: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new record; the first line becomes the title
    #[command(alias = "new")]
    Add {
        /// Record text
        text: Vec<String>,
    },
    /// List recent records
    List {
        /// Number of records to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Only show records in this sync state (not_synced, syncing, synced, sync_failed)
        #[arg(long)]
        state: Option<SyncState>,
        /// Only show records whose title or content contains this text
        #[arg(short, long)]
        search: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one record with its sync status
    Show {
        /// Record ID or unique ID prefix
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an existing record (opens $EDITOR without flags)
    Edit {
        /// Record ID or unique ID prefix
        id: String,
        /// Replace the title
        #[arg(long)]
        title: Option<String>,
        /// Replace the content
        #[arg(long)]
        content: Option<String>,
    },
    /// Delete an existing record
    Delete {
        /// Record ID or unique ID prefix
        id: String,
    },
    /// Run one sync cycle now
    Sync,
    /// Show pending changes and sync position
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recorded sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Only show conflicts waiting for resolution
        #[arg(long)]
        open: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Settle an open conflict
    Resolve {
        /// Record ID or unique ID prefix
        id: String,
        /// Side to keep
        #[arg(long, value_enum)]
        keep: KeepSide,
    },
    /// Keep syncing in the background until Ctrl-C
    Watch,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum KeepSide {
    Local,
    Remote,
}

impl From<KeepSide> for Resolution {
    fn from(side: KeepSide) -> Self {
        match side {
            KeepSide::Local => Self::KeepLocal,
            KeepSide::Remote => Self::KeepRemote,
        }
    }
}

//! Database layer for notesync

mod conflict_repository;
mod connection;
mod meta_repository;
mod migrations;
mod repository;

pub use conflict_repository::{ConflictRepository, NewConflict, SqliteConflictRepository};
pub use connection::Database;
pub use meta_repository::{MetaRepository, SqliteMetaRepository};
pub use repository::{RecordOrder, RecordQuery, RecordRepository, SqliteRecordRepository};

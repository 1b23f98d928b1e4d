//! Sync conflict log repository

#![allow(clippy::cast_possible_wrap)]

use std::collections::HashSet;

use crate::error::Result;
use crate::models::{ConflictStrategy, ConflictWinner, RecordId, SyncConflict};
use crate::remote::RemoteRecord;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

const CONFLICT_COLUMNS: &str = "id, record_id, local_updated_at, remote_updated_at, detected_at, \
     strategy, winner, remote_json, resolved_at";

/// Conflict to be logged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConflict<'a> {
    pub record_id: RecordId,
    pub local_updated_at: i64,
    pub remote: &'a RemoteRecord,
    pub strategy: ConflictStrategy,
    /// `None` leaves the conflict open for manual resolution
    pub winner: Option<ConflictWinner>,
    pub detected_at: i64,
}

/// Trait for conflict log operations
pub trait ConflictRepository {
    /// Append a conflict; settled conflicts are stored as resolved at detection time
    fn insert(&self, conflict: &NewConflict<'_>) -> Result<i64>;

    /// Most recent conflicts first
    fn list(&self, limit: usize, open_only: bool) -> Result<Vec<SyncConflict>>;

    /// The open conflict for a record, if any
    fn find_open(&self, record_id: &RecordId) -> Result<Option<SyncConflict>>;

    /// Records blocked on an open conflict
    fn open_record_ids(&self) -> Result<HashSet<RecordId>>;

    /// Close an open conflict
    fn resolve(&self, id: i64, winner: ConflictWinner, resolved_at: i64) -> Result<bool>;
}

/// `SQLite` implementation of `ConflictRepository`
pub struct SqliteConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_conflict(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncConflict> {
        let record_id: String = row.get(1)?;
        let record_id = record_id
            .parse()
            .map_err(|error| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(error)))?;
        let strategy: String = row.get(5)?;
        let winner: Option<String> = row.get(6)?;
        let remote_json: String = row.get(7)?;
        let remote = serde_json::from_str(&remote_json)
            .map_err(|error| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(error)))?;

        Ok(SyncConflict {
            id: row.get(0)?,
            record_id,
            local_updated_at: row.get(2)?,
            remote_updated_at: row.get(3)?,
            detected_at: row.get(4)?,
            strategy: ConflictStrategy::from_db(&strategy),
            winner: winner.as_deref().and_then(ConflictWinner::from_db),
            remote,
            resolved_at: row.get(8)?,
        })
    }
}

impl ConflictRepository for SqliteConflictRepository<'_> {
    fn insert(&self, conflict: &NewConflict<'_>) -> Result<i64> {
        let remote_json = serde_json::to_string(conflict.remote)?;
        let resolved_at = conflict.winner.map(|_| conflict.detected_at);

        self.conn.execute(
            "INSERT INTO sync_conflicts (record_id, local_updated_at, remote_updated_at,
                 detected_at, strategy, winner, remote_json, resolved_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                conflict.record_id.as_str(),
                conflict.local_updated_at,
                conflict.remote.timestamp,
                conflict.detected_at,
                conflict.strategy.as_str(),
                conflict.winner.map(ConflictWinner::as_str),
                remote_json,
                resolved_at,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    fn list(&self, limit: usize, open_only: bool) -> Result<Vec<SyncConflict>> {
        let filter = if open_only {
            "WHERE resolved_at IS NULL"
        } else {
            ""
        };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts {filter}
             ORDER BY detected_at DESC, id DESC
             LIMIT ?"
        ))?;

        let conflicts = stmt
            .query_map(params![limit as i64], Self::parse_conflict)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(conflicts)
    }

    fn find_open(&self, record_id: &RecordId) -> Result<Option<SyncConflict>> {
        let conflict = self
            .conn
            .query_row(
                &format!(
                    "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts
                     WHERE record_id = ? AND resolved_at IS NULL
                     ORDER BY id DESC
                     LIMIT 1"
                ),
                params![record_id.as_str()],
                Self::parse_conflict,
            )
            .optional()?;
        Ok(conflict)
    }

    fn open_record_ids(&self) -> Result<HashSet<RecordId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT record_id FROM sync_conflicts WHERE resolved_at IS NULL")?;

        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(ids.into_iter().filter_map(|id| id.parse().ok()).collect())
    }

    fn resolve(&self, id: i64, winner: ConflictWinner, resolved_at: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE sync_conflicts SET winner = ?, resolved_at = ?
             WHERE id = ? AND resolved_at IS NULL",
            params![winner.as_str(), resolved_at, id],
        )?;
        Ok(rows == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn remote_copy(id: RecordId, timestamp: i64) -> RemoteRecord {
        RemoteRecord {
            id,
            title: "server".to_string(),
            content: "copy".to_string(),
            timestamp,
            deleted: false,
            cursor: 0,
        }
    }

    #[test]
    fn test_lww_conflict_is_stored_resolved() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteConflictRepository::new(db.connection());
        let record_id = RecordId::new();
        let remote = remote_copy(record_id, 200);

        repo.insert(&NewConflict {
            record_id,
            local_updated_at: 100,
            remote: &remote,
            strategy: ConflictStrategy::Lww,
            winner: Some(ConflictWinner::Remote),
            detected_at: 300,
        })
        .unwrap();

        let conflicts = repo.list(10, false).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].resolved_at, Some(300));
        assert_eq!(conflicts[0].winner, Some(ConflictWinner::Remote));
        assert_eq!(conflicts[0].remote, remote);
        assert!(repo.list(10, true).unwrap().is_empty());
        assert!(repo.open_record_ids().unwrap().is_empty());
    }

    #[test]
    fn test_manual_conflict_stays_open_until_resolved() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteConflictRepository::new(db.connection());
        let record_id = RecordId::new();
        let remote = remote_copy(record_id, 200);

        let id = repo
            .insert(&NewConflict {
                record_id,
                local_updated_at: 100,
                remote: &remote,
                strategy: ConflictStrategy::Manual,
                winner: None,
                detected_at: 300,
            })
            .unwrap();

        assert!(repo.open_record_ids().unwrap().contains(&record_id));
        let open = repo.find_open(&record_id).unwrap().unwrap();
        assert_eq!(open.id, id);
        assert!(open.is_open());

        assert!(repo.resolve(id, ConflictWinner::Local, 400).unwrap());
        assert!(!repo.resolve(id, ConflictWinner::Remote, 500).unwrap());
        assert!(repo.find_open(&record_id).unwrap().is_none());
    }
}

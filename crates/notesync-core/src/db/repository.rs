//! Record repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use crate::error::Result;
use crate::models::{Record, RecordId, SyncState};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

const RECORD_COLUMNS: &str = "id, title, content, created_at, updated_at, last_synced_at, \
     sync_state, deleted_at, revision, synced_revision, last_push_at";

/// Sort order for record queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordOrder {
    /// Most recently updated first
    #[default]
    RecentlyUpdated,
    /// Ascending id (creation order); used by the sync engine
    IdAscending,
}

/// Filter for `RecordRepository::query`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordQuery {
    /// Restrict to these sync states; empty means any
    pub states: Vec<SyncState>,
    /// Case-insensitive substring match on title or content
    pub text: Option<String>,
    /// Include pending deletions
    pub include_tombstones: bool,
    pub order: RecordOrder,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl RecordQuery {
    /// Live records, newest first
    #[must_use]
    pub fn recent(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Everything the engine must push, tombstones included, in id order
    #[must_use]
    pub fn dirty() -> Self {
        Self {
            states: vec![SyncState::NotSynced, SyncState::SyncFailed],
            include_tombstones: true,
            order: RecordOrder::IdAscending,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_states(mut self, states: impl IntoIterator<Item = SyncState>) -> Self {
        self.states = states.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    fn to_sql(&self) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if !self.include_tombstones {
            clauses.push("deleted_at IS NULL".to_string());
        }

        if !self.states.is_empty() {
            let placeholders = vec!["?"; self.states.len()].join(", ");
            clauses.push(format!("sync_state IN ({placeholders})"));
            values.extend(self.states.iter().map(|state| Value::Integer(state.code())));
        }

        if let Some(text) = self.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            clauses.push("(title LIKE ? ESCAPE '\\' OR content LIKE ? ESCAPE '\\')".to_string());
            let pattern = format!("%{}%", escape_like(text));
            values.push(Value::Text(pattern.clone()));
            values.push(Value::Text(pattern));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let order_clause = match self.order {
            RecordOrder::RecentlyUpdated => "ORDER BY updated_at DESC, id DESC",
            RecordOrder::IdAscending => "ORDER BY id ASC",
        };

        values.push(Value::Integer(self.limit.map_or(-1, |limit| limit as i64)));
        values.push(Value::Integer(self.offset as i64));

        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records {where_clause} {order_clause} LIMIT ? OFFSET ?"
        );
        (sql, values)
    }
}

fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Trait for record storage operations
///
/// Writes that replace an existing row are compare-and-swap on `revision`: they
/// return `false` when the stored revision no longer matches.
pub trait RecordRepository {
    /// Insert a new row
    fn insert(&self, record: &Record) -> Result<()>;

    /// Get a row by ID, tombstones included
    fn find(&self, id: &RecordId) -> Result<Option<Record>>;

    /// Query rows
    fn query(&self, query: &RecordQuery) -> Result<Vec<Record>>;

    /// Replace the row if its stored revision equals `expected_revision`
    fn replace(&self, record: &Record, expected_revision: i64) -> Result<bool>;

    /// Remove the row if its stored revision equals `expected_revision`
    fn remove(&self, id: &RecordId, expected_revision: i64) -> Result<bool>;

    /// Live record IDs starting with `prefix`
    fn find_ids_by_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<String>>;

    /// Row counts per sync state, tombstones included
    fn count_by_state(&self) -> Result<Vec<(SyncState, usize)>>;

    /// Return rows left in `Syncing` by an interrupted push to `NotSynced`
    fn reset_in_flight(&self) -> Result<usize>;
}

/// `SQLite` implementation of `RecordRepository`
pub struct SqliteRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a record from a database row
    fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
        let id: String = row.get(0)?;
        let id = id
            .parse()
            .map_err(|error| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(error)))?;
        Ok(Record {
            id,
            title: row.get(1)?,
            content: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            last_synced_at: row.get(5)?,
            sync_state: SyncState::from_code(row.get(6)?),
            deleted_at: row.get(7)?,
            revision: row.get(8)?,
            synced_revision: row.get(9)?,
            last_push_at: row.get(10)?,
        })
    }
}

impl RecordRepository for SqliteRecordRepository<'_> {
    fn insert(&self, record: &Record) -> Result<()> {
        self.conn.execute(
            "INSERT INTO records (id, title, content, created_at, updated_at, last_synced_at,
                 sync_state, deleted_at, revision, synced_revision, last_push_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                record.id.as_str(),
                record.title,
                record.content,
                record.created_at,
                record.updated_at,
                record.last_synced_at,
                record.sync_state.code(),
                record.deleted_at,
                record.revision,
                record.synced_revision,
                record.last_push_at,
            ],
        )?;
        Ok(())
    }

    fn find(&self, id: &RecordId) -> Result<Option<Record>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?"),
                params![id.as_str()],
                Self::parse_record,
            )
            .optional()?;
        Ok(record)
    }

    fn query(&self, query: &RecordQuery) -> Result<Vec<Record>> {
        let (sql, values) = query.to_sql();
        let mut stmt = self.conn.prepare(&sql)?;

        let records = stmt
            .query_map(params_from_iter(values.iter()), Self::parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    fn replace(&self, record: &Record, expected_revision: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE records SET title = ?, content = ?, created_at = ?, updated_at = ?,
                 last_synced_at = ?, sync_state = ?, deleted_at = ?, revision = ?,
                 synced_revision = ?, last_push_at = ?
             WHERE id = ? AND revision = ?",
            params![
                record.title,
                record.content,
                record.created_at,
                record.updated_at,
                record.last_synced_at,
                record.sync_state.code(),
                record.deleted_at,
                record.revision,
                record.synced_revision,
                record.last_push_at,
                record.id.as_str(),
                expected_revision,
            ],
        )?;
        Ok(rows == 1)
    }

    fn remove(&self, id: &RecordId, expected_revision: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM records WHERE id = ? AND revision = ?",
            params![id.as_str(), expected_revision],
        )?;
        Ok(rows == 1)
    }

    fn find_ids_by_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM records
             WHERE deleted_at IS NULL AND id LIKE ? ESCAPE '\\'
             ORDER BY id ASC
             LIMIT ?",
        )?;

        let pattern = format!("{}%", escape_like(prefix.trim()));
        let ids = stmt
            .query_map(params![pattern, limit as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(ids)
    }

    fn count_by_state(&self) -> Result<Vec<(SyncState, usize)>> {
        let mut stmt = self.conn.prepare(
            "SELECT sync_state, COUNT(*) FROM records GROUP BY sync_state ORDER BY sync_state",
        )?;

        let counts = stmt
            .query_map([], |row| {
                Ok((
                    SyncState::from_code(row.get(0)?),
                    row.get::<_, usize>(1)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(counts)
    }

    fn reset_in_flight(&self) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE records SET sync_state = ? WHERE sync_state = ?",
            params![SyncState::NotSynced.code(), SyncState::Syncing.code()],
        )?;
        Ok(rows)
    }
}

//! Sync metadata repository implementation

use crate::error::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};

const PULL_WATERMARK_KEY: &str = "pull_watermark";

/// Trait for sync bookkeeping values kept next to the records
pub trait MetaRepository {
    /// Server change cursor of the last fully merged pull, 0 when never pulled
    fn pull_watermark(&self) -> Result<i64>;

    /// Persist the pull watermark
    fn set_pull_watermark(&self, watermark: i64) -> Result<()>;
}

/// `SQLite` implementation of `MetaRepository`
pub struct SqliteMetaRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteMetaRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn get_value(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM sync_meta WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }
}

impl MetaRepository for SqliteMetaRepository<'_> {
    fn pull_watermark(&self) -> Result<i64> {
        let Some(value) = self.get_value(PULL_WATERMARK_KEY)? else {
            return Ok(0);
        };
        value
            .parse()
            .map_err(|_| Error::Database(format!("corrupt pull watermark '{value}'")))
    }

    fn set_pull_watermark(&self, watermark: i64) -> Result<()> {
        self.set_value(PULL_WATERMARK_KEY, &watermark.to_string())
    }
}

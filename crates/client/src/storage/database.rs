//! SQLite database for the FileDeck client.
//!
//! This module provides:
//! - Schema management and migrations
//! - The persisted login record
//! - Small key-value settings (e.g. the last username)

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Path error.
    #[error("Invalid database path: {0}")]
    InvalidPath(String),
}

/// Result type for database operations.
pub type StorageResult<T> = Result<T, DatabaseError>;

/// The single persisted login.
///
/// The user profile is kept as an opaque JSON document so the schema does
/// not have to follow every field the server adds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Bearer token.
    pub token: String,
    /// Serialized user profile.
    pub user_json: String,
    /// Unix timestamp of the login.
    pub saved_at: i64,
}

/// Schema version written by the latest migration.
const SCHEMA_VERSION: i32 = 1;

/// Database wrapper providing all storage operations.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path.
    ///
    /// Missing parent directories are created and pending migrations applied.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::InvalidPath(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        let mut db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Schema version recorded in `PRAGMA user_version`.
    pub fn get_schema_version(&self) -> StorageResult<i32> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    fn migrate(&mut self) -> StorageResult<()> {
        let from = self.get_schema_version()?;
        if from >= SCHEMA_VERSION {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        // `session` holds at most one row; the CHECK keeps it that way.
        tx.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS session (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                token TEXT NOT NULL,
                user_json TEXT NOT NULL,
                saved_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;
        tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        tx.commit()?;

        tracing::debug!(from, to = SCHEMA_VERSION, "Migrated client database");
        Ok(())
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Load the persisted login, if any.
    pub fn load_session(&self) -> StorageResult<Option<SessionRecord>> {
        let result = self
            .conn
            .query_row(
                "SELECT token, user_json, saved_at FROM session WHERE id = 1",
                [],
                |row| {
                    Ok(SessionRecord {
                        token: row.get(0)?,
                        user_json: row.get(1)?,
                        saved_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(result)
    }

    /// Replace the persisted login in a single statement.
    pub fn store_session(&self, record: &SessionRecord) -> StorageResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO session (id, token, user_json, saved_at) VALUES (1, ?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                token = excluded.token,
                user_json = excluded.user_json,
                saved_at = excluded.saved_at
            "#,
            params![record.token, record.user_json, record.saved_at],
        )?;
        Ok(())
    }

    /// Remove the persisted login. Returns whether one existed.
    pub fn clear_session(&self) -> StorageResult<bool> {
        let rows_affected = self.conn.execute("DELETE FROM session", [])?;
        Ok(rows_affected > 0)
    }

    // =========================================================================
    // Settings
    // =========================================================================

    pub fn get_setting(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    /// Insert or overwrite a setting.
    pub fn set_setting(&self, key: &str, value: &str) -> StorageResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

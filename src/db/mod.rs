//! SQLite-backed entity store for prospects, message templates, and activities.
//!
//! The database lives at `<data_dir>/dmflow.db` (default `~/.dmflow/dmflow.db`)
//! and is the single writer-of-record inside the app process. The shared
//! container (see `bridge`) is the only state another process writes.
//!
//! Methods here are plain statements; callers that need several mutations to
//! land together wrap them in [`FlowDb::with_transaction`].

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

pub mod types;
pub use types::*;

pub mod activities;
pub mod prospects;
pub mod templates;

/// File name of the store inside the data directory.
pub const DB_FILE_NAME: &str = "dmflow.db";

pub struct FlowDb {
    conn: Connection,
}

impl FlowDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err, so callers never observe a partial batch.
    pub fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<DbError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(DbError::from)?;
        match f(self) {
            Ok(val) => {
                if let Err(e) = self.conn.execute_batch("COMMIT") {
                    let _ = self.conn.execute_batch("ROLLBACK");
                    return Err(DbError::from(e).into());
                }
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the store inside `data_dir` and apply the schema.
    pub fn open(data_dir: &Path) -> Result<Self, DbError> {
        Self::open_at(data_dir.join(DB_FILE_NAME))
    }

    /// Open a database at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// Volatile store used when no file-backed database can be opened.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, DbError> {
        crate::migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Resolve the default database path: `~/.dmflow/dmflow.db`.
    pub fn default_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".dmflow").join(DB_FILE_NAME))
    }
}

/// Storage spelling for timestamps: fixed-width RFC 3339 so text order is time order.
pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

pub(crate) fn bad_enum(idx: usize, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unrecognized value '{raw}'").into(),
    )
}

// =============================================================================
// Shared test utilities
// =============================================================================


// =============================================================================
// Tests
// =============================================================================

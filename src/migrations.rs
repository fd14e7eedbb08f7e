//! Versioned schema upgrades.
//!
//! Each step is a SQL script compiled into the binary. A step and the row that
//! records it commit together, so an interrupted upgrade leaves the store at
//! the last fully applied version.

use rusqlite::Connection;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(
        "Store schema version {found} is newer than this build understands ({supported}). \
         Update DMFlow to open it."
    )]
    TooNew { found: u32, supported: u32 },

    #[error("Schema step v{version} failed: {source}")]
    Step {
        version: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Schema bookkeeping failed: {0}")]
    Bookkeeping(#[from] rusqlite::Error),
}

/// Ordered by version, starting at 1 with no gaps.
const STEPS: &[(u32, &str)] = &[(1, include_str!("migrations/001_baseline.sql"))];

fn latest_known() -> u32 {
    STEPS.last().map_or(0, |(version, _)| *version)
}

fn applied_version(conn: &Connection) -> Result<u32, MigrationError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );",
    )?;
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Bring the schema up to the latest version. Returns how many steps ran.
///
/// A store written by a newer build is refused untouched.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    let current = applied_version(conn)?;
    let supported = latest_known();
    if current > supported {
        return Err(MigrationError::TooNew {
            found: current,
            supported,
        });
    }

    let mut applied = 0;
    for (version, sql) in STEPS.iter().filter(|(version, _)| *version > current) {
        let step = |source| MigrationError::Step {
            version: *version,
            source,
        };
        let tx = conn.unchecked_transaction().map_err(step)?;
        tx.execute_batch(sql).map_err(step)?;
        tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
            .map_err(step)?;
        tx.commit().map_err(step)?;
        log::info!("Store schema upgraded to v{}", version);
        applied += 1;
    }
    Ok(applied)
}

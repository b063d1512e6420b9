//! SQLite storage bootstrap and schema checks for the schedule store.
//!
//! # Responsibility
//! - Open and configure SQLite connections backing the schedule store.
//! - Apply schema migrations in deterministic order.
//! - Classify SQLite failures so callers can tell a busy store from a broken one.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - No schedule data is read or written before migrations succeed.
//! - A repository only accepts a connection whose schema is exactly current.

use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// The file was written by a newer build.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    /// The connection skipped `open_db` and still needs migrations.
    SchemaOutdated { db_version: u32, required: u32 },
}

impl DbError {
    /// Busy or locked database: the same call may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(failure, _)) => matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "schedule schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::SchemaOutdated {
                db_version,
                required,
            } => write!(
                f,
                "schedule schema version {db_version} is behind required {required}; open the connection through db::open_db"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } | Self::SchemaOutdated { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

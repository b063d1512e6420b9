//! Schedule schema migrations.
//!
//! # Invariants
//! - `version` values are strictly increasing; `name` is for logs only.
//! - All pending steps commit in one transaction together with their
//!   `PRAGMA user_version` bumps.

use crate::db::{DbError, DbResult};
use log::{debug, info};
use rusqlite::Connection;

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "events_workers_assignments",
        sql: include_str!("0001_init.sql"),
    },
    Migration {
        version: 2,
        name: "assignment_live_pair_index",
        sql: include_str!("0002_assignment_uniqueness.sql"),
    },
];

/// Newest schema version this build can migrate to.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Reads `PRAGMA user_version`.
pub fn schema_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?)
}

/// Brings the schema up to `latest_version`.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let from = schema_version(conn)?;
    let latest = latest_version();
    if from > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: from,
            latest_supported: latest,
        });
    }

    let pending: Vec<&Migration> = MIGRATIONS
        .iter()
        .filter(|migration| migration.version > from)
        .collect();
    if pending.is_empty() {
        debug!("event=db_migrate module=db status=skip version={from}");
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in &pending {
        tx.execute_batch(migration.sql)?;
        tx.pragma_update(None, "user_version", migration.version)?;
        debug!(
            "event=db_migrate module=db status=step version={} name={}",
            migration.version, migration.name
        );
    }
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from_version={from} to_version={latest} steps={}",
        pending.len()
    );
    Ok(())
}

/// Fails unless the schema is exactly `latest_version`.
///
/// Repositories call this instead of migrating, so a connection opened
/// outside `open_db` is rejected rather than silently upgraded.
pub fn ensure_current(conn: &Connection) -> DbResult<()> {
    let version = schema_version(conn)?;
    let latest = latest_version();
    if version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: version,
            latest_supported: latest,
        });
    }
    if version < latest {
        return Err(DbError::SchemaOutdated {
            db_version: version,
            required: latest,
        });
    }
    Ok(())
}

//! Schema migrations for the object store.
//!
//! Each migration is one SQL file applied in version order inside a single
//! transaction; the reached version is mirrored to `PRAGMA user_version`.
//! A database stamped with a version newer than this binary knows about is
//! refused rather than opened.

use crate::db::{DbError, DbResult};
use log::{debug, info};
use rusqlite::{Connection, Transaction};

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "objects",
        sql: include_str!("0001_objects.sql"),
    },
    Migration {
        version: 2,
        name: "entities",
        sql: include_str!("0002_entities.sql"),
    },
];

/// Latest schema version this binary can open.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Brings the schema on `conn` up to [`latest_version`].
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let from_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let latest = latest_version();
    if from_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: from_version,
            latest_supported: latest,
        });
    }

    let pending: Vec<&Migration> = MIGRATIONS
        .iter()
        .filter(|migration| migration.version > from_version)
        .collect();
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in &pending {
        run_migration(&tx, migration)?;
    }
    tx.commit()?;

    info!(
        "event=db_migrate module=db status=ok from_version={} to_version={} applied={}",
        from_version,
        latest,
        pending.len()
    );
    Ok(())
}

fn run_migration(tx: &Transaction<'_>, migration: &Migration) -> DbResult<()> {
    let stamp = format!("PRAGMA user_version = {};", migration.version);
    tx.execute_batch(migration.sql)
        .and_then(|()| tx.execute_batch(&stamp))
        .map_err(|source| DbError::Migration {
            version: migration.version,
            name: migration.name,
            source,
        })?;
    debug!(
        "event=db_migration_step module=db status=ok version={} name={}",
        migration.version, migration.name
    );
    Ok(())
}

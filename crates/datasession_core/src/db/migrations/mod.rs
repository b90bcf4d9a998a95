//! Per-context migration executor.
//!
//! # Responsibility
//! - Check that configured migrations are strictly increasing.
//! - Apply pending migrations atomically.
//!
//! # Invariants
//! - Applied migration version is mirrored to `PRAGMA user_version`.
//! - A store newer than the latest configured migration is rejected.

use crate::config::Migration;
use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

/// Returns the latest version among `migrations`, or 0 when there are none.
pub fn latest_version(migrations: &[Migration]) -> u32 {
    migrations.last().map_or(0, |migration| migration.version)
}

/// Rejects migration lists whose versions are not strictly increasing.
pub fn check_order(context: &str, migrations: &[Migration]) -> DbResult<()> {
    let mut previous = 0;
    for migration in migrations {
        if migration.version <= previous {
            return Err(DbError::InvalidMigrationOrder {
                context: context.to_string(),
                version: migration.version,
            });
        }
        previous = migration.version;
    }
    Ok(())
}

/// Applies all pending migrations of `context` on the provided connection.
pub fn apply_migrations(
    conn: &mut Connection,
    context: &str,
    migrations: &[Migration],
) -> DbResult<()> {
    check_order(context, migrations)?;

    let current_version = current_user_version(conn)?;
    let latest = latest_version(migrations);

    if current_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            context: context.to_string(),
            db_version: current_version,
            latest_supported: latest,
        });
    }

    if current_version == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in migrations {
        if migration.version <= current_version {
            continue;
        }

        tx.execute_batch(&migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
    }
    tx.commit()?;

    info!(
        "event=migration_apply module=db status=ok context={} from_version={} to_version={}",
        context, current_version, latest
    );
    Ok(())
}

pub fn current_user_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

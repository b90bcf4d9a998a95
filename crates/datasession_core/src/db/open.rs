//! Connection bootstrap for one context grouping.
//!
//! # Responsibility
//! - Open the file or in-memory SQLite store configured for a context.
//! - Configure connection pragmas required by session behavior.
//! - Trigger the context's schema migrations before returning.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`.
//! - File-backed connections run in WAL mode so readers see a snapshot.
//! - Returned connections have migrations fully applied.

use super::migrations::apply_migrations;
use super::DbResult;
use crate::config::{ContextConfig, DatabaseLocation};
use log::{error, info};
use rusqlite::Connection;
use std::time::Instant;

/// Opens the store configured for `context` and applies pending migrations.
///
/// # Side effects
/// - Performs connection bootstrap and migration checks.
/// - Emits `db_open` logging events with duration and status.
pub fn open_context(context: &str, config: &ContextConfig) -> DbResult<Connection> {
    let started_at = Instant::now();
    let mode = if config.is_memory() { "memory" } else { "file" };
    info!(
        "event=db_open module=db status=start context={} mode={}",
        context, mode
    );

    let opened = match &config.location {
        DatabaseLocation::File { path } => Connection::open(path),
        DatabaseLocation::Memory => Connection::open_in_memory(),
    };
    let mut conn = match opened {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error context={} mode={} duration_ms={} error_code=db_open_failed error={}",
                context,
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&mut conn, context, config) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok context={} mode={} duration_ms={}",
                context,
                mode,
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error context={} mode={} duration_ms={} error_code=db_bootstrap_failed error={}",
                context,
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(
    conn: &mut Connection,
    context: &str,
    config: &ContextConfig,
) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(config.busy_timeout())?;
    if !config.is_memory() {
        // journal_mode returns the resulting mode as a row.
        conn.query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(()))?;
    }
    apply_migrations(conn, context, &config.migrations)?;
    Ok(())
}

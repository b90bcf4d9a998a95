//! Lazily opened store connection for one context grouping.
//!
//! # Responsibility
//! - Open the context's connection on first use and keep it for the session.
//! - Run commands with an optional deadline.
//! - Provide flat transactions and savepoints to the transaction logic.
//!
//! # Invariants
//! - At most one native transaction is open per handle.
//! - Once the engine rolls an open transaction back on its own (interrupts),
//!   the handle refuses further work with `TransactionClosed` until the
//!   transaction is committed or abandoned.
//! - In-memory stores keep their connection until the handle is dropped.

use crate::config::ContextConfig;
use crate::db::open_context;
use crate::error::{DataError, DataResult};
use crate::model::declaration::quote_identifier;
use log::warn;
use rusqlite::{Connection, ErrorCode};
use std::time::{Duration, Instant};

/// Virtual machine steps between deadline checks.
const PROGRESS_STEPS: i32 = 1_000;

/// Connection capability the nested-transaction logic depends on.
pub(crate) trait CheckpointedConnection {
    fn name(&self) -> &str;
    fn ensure_open(&mut self) -> DataResult<()>;
    fn begin(&mut self) -> DataResult<()>;
    fn checkpoint(&mut self, id: &str) -> DataResult<()>;
    fn rollback_to(&mut self, id: &str) -> DataResult<()>;
    fn commit(&mut self) -> DataResult<()>;
    fn rollback(&mut self) -> DataResult<()>;
    fn close(&mut self);
}

pub(crate) struct ContextHandle {
    name: String,
    config: ContextConfig,
    connection: Option<Connection>,
    in_transaction: bool,
    aborted: bool,
}

impl ContextHandle {
    pub(crate) fn new(name: impl Into<String>, config: ContextConfig) -> Self {
        Self {
            name: name.into(),
            config,
            connection: None,
            in_transaction: false,
            aborted: false,
        }
    }

    fn connection(&mut self) -> DataResult<&Connection> {
        let conn = match self.connection.take() {
            Some(conn) => conn,
            None => open_context(&self.name, &self.config)?,
        };
        let conn: &Connection = self.connection.insert(conn);
        Ok(conn)
    }

    /// Records that the engine rolled the native transaction back by itself.
    fn note_engine_rollback(&mut self) {
        if !self.in_transaction || self.aborted {
            return;
        }
        if self.connection.as_ref().is_some_and(Connection::is_autocommit) {
            self.aborted = true;
            warn!(
                "event=transaction_rollback module=session status=aborted context={}",
                self.name
            );
        }
    }

    fn check_alive(&mut self) -> DataResult<()> {
        self.note_engine_rollback();
        if self.aborted {
            return Err(DataError::TransactionClosed);
        }
        Ok(())
    }

    /// Runs `f` on the open connection, interrupting it once `timeout` (or
    /// the context's command timeout) elapses.
    pub(crate) fn run<R>(
        &mut self,
        timeout: Option<Duration>,
        f: impl FnOnce(&Connection) -> rusqlite::Result<R>,
    ) -> DataResult<R> {
        self.check_alive()?;
        let timeout = timeout.or_else(|| self.config.command_timeout());
        let context = self.name.clone();
        let conn = self.connection()?;

        let outcome = match timeout {
            Some(limit) => {
                let deadline = Instant::now() + limit;
                conn.progress_handler(PROGRESS_STEPS, Some(move || Instant::now() >= deadline));
                let outcome = f(conn);
                conn.progress_handler(PROGRESS_STEPS, None::<fn() -> bool>);
                outcome
            }
            None => f(conn),
        };

        if outcome.is_err() {
            self.note_engine_rollback();
        }

        match outcome {
            Err(rusqlite::Error::SqliteFailure(native, _))
                if native.code == ErrorCode::OperationInterrupted =>
            {
                let limit = timeout.unwrap_or_default();
                warn!(
                    "event=command_timeout module=session status=error context={} timeout_ms={}",
                    context,
                    limit.as_millis()
                );
                Err(DataError::Timeout {
                    context,
                    timeout_ms: limit.as_millis(),
                })
            }
            other => other.map_err(DataError::from),
        }
    }

    fn execute(&mut self, sql: &str) -> DataResult<()> {
        self.connection()?.execute_batch(sql)?;
        Ok(())
    }
}

impl CheckpointedConnection for ContextHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn ensure_open(&mut self) -> DataResult<()> {
        self.connection().map(|_| ())
    }

    fn begin(&mut self) -> DataResult<()> {
        self.execute("BEGIN DEFERRED;")?;
        self.in_transaction = true;
        self.aborted = false;
        Ok(())
    }

    fn checkpoint(&mut self, id: &str) -> DataResult<()> {
        self.check_alive()?;
        self.execute(&format!("SAVEPOINT {};", quote_identifier(id)))
    }

    fn rollback_to(&mut self, id: &str) -> DataResult<()> {
        self.check_alive()?;
        self.execute(&format!("ROLLBACK TO SAVEPOINT {};", quote_identifier(id)))
    }

    fn commit(&mut self) -> DataResult<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        if std::mem::take(&mut self.aborted) {
            return Err(DataError::TransactionClosed);
        }
        let conn = self.connection()?;
        // The engine rolls the whole transaction back on some failures, e.g. interrupts.
        if conn.is_autocommit() {
            return Err(DataError::TransactionClosed);
        }
        conn.execute_batch("COMMIT;")?;
        Ok(())
    }

    fn rollback(&mut self) -> DataResult<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.aborted = false;
        if let Some(conn) = &self.connection {
            if !conn.is_autocommit() {
                conn.execute_batch("ROLLBACK;")?;
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Err(err) = self.rollback() {
            warn!(
                "event=transaction_rollback module=session status=error context={} error={}",
                self.name, err
            );
        }
        if self.config.is_memory() {
            return;
        }
        if let Some(conn) = self.connection.take() {
            if let Err((_, err)) = conn.close() {
                warn!(
                    "event=db_close module=session status=error context={} error={}",
                    self.name, err
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CheckpointedConnection, ContextHandle};
    use crate::config::ContextConfig;
    use crate::error::DataError;
    use std::time::Duration;

    fn memory_handle() -> ContextHandle {
        ContextHandle::new(
            "Test",
            ContextConfig::memory()
                .migration(1, "CREATE TABLE item (ItemId INTEGER PRIMARY KEY, Name TEXT);"),
        )
    }

    fn count(handle: &mut ContextHandle) -> i64 {
        handle
            .run(None, |conn| {
                conn.query_row("SELECT COUNT(*) FROM item;", [], |row| row.get(0))
            })
            .expect("count should succeed")
    }

    #[test]
    fn long_running_command_times_out() {
        let mut handle = memory_handle();
        let err = handle
            .run(Some(Duration::from_millis(20)), |conn| {
                conn.query_row(
                    "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 500000000)
                     SELECT COUNT(*) FROM c;",
                    [],
                    |row| row.get::<_, i64>(0),
                )
            })
            .expect_err("query should be interrupted");

        assert!(matches!(err, DataError::Timeout { .. }));

        let after = handle
            .run(None, |conn| conn.query_row("SELECT 1;", [], |row| row.get::<_, i64>(0)))
            .expect("handle should stay usable without a deadline");
        assert_eq!(after, 1);
    }

    #[test]
    fn interrupted_write_closes_the_transaction_until_it_ends() {
        let mut handle = memory_handle();
        handle.begin().expect("begin should succeed");
        handle.checkpoint("sp1").expect("savepoint should be created");
        handle
            .run(None, |conn| conn.execute("INSERT INTO item (Name) VALUES ('a');", []))
            .expect("insert should succeed");

        let err = handle
            .run(Some(Duration::from_millis(20)), |conn| {
                conn.execute(
                    "INSERT INTO item (Name)
                     WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 500000000)
                     SELECT 'bulk' || x FROM c;",
                    [],
                )
            })
            .expect_err("insert should be interrupted");
        assert!(matches!(err, DataError::Timeout { .. }));

        let err = handle
            .run(None, |conn| conn.execute("INSERT INTO item (Name) VALUES ('b');", []))
            .expect_err("writes after the engine rollback must be refused");
        assert!(matches!(err, DataError::TransactionClosed));
        assert!(matches!(
            handle.checkpoint("sp2"),
            Err(DataError::TransactionClosed)
        ));
        assert!(matches!(
            handle.rollback_to("sp1"),
            Err(DataError::TransactionClosed)
        ));

        handle.rollback().expect("rollback should succeed");
        assert_eq!(count(&mut handle), 0);
    }

    #[test]
    fn rollback_to_savepoint_discards_later_writes() {
        let mut handle = memory_handle();
        handle.begin().expect("begin should succeed");
        handle
            .run(None, |conn| conn.execute("INSERT INTO item (Name) VALUES ('a');", []))
            .expect("insert should succeed");
        handle.checkpoint("sp1").expect("savepoint should be created");
        handle
            .run(None, |conn| conn.execute("INSERT INTO item (Name) VALUES ('b');", []))
            .expect("insert should succeed");

        handle.rollback_to("sp1").expect("rollback to savepoint should succeed");
        assert_eq!(count(&mut handle), 1);

        handle.commit().expect("commit should succeed");
        assert_eq!(count(&mut handle), 1);
    }

    #[test]
    fn close_keeps_memory_store_but_discards_open_transaction() {
        let mut handle = memory_handle();
        handle
            .run(None, |conn| conn.execute("INSERT INTO item (Name) VALUES ('kept');", []))
            .expect("insert should succeed");
        handle.begin().expect("begin should succeed");
        handle
            .run(None, |conn| conn.execute("INSERT INTO item (Name) VALUES ('dropped');", []))
            .expect("insert should succeed");

        handle.close();

        assert_eq!(count(&mut handle), 1);
    }
}

//! Nested transactions emulated with savepoints.
//!
//! # Responsibility
//! - Open one flat native transaction per enlisted context handle.
//! - Map child transactions to savepoints created on every enlisted handle.
//! - Commit or discard all enlisted handles together.
//!
//! # Invariants
//! - Savepoints are released in exact reverse order of creation.
//! - A handle enlisted late receives every open savepoint, so rolling back
//!   any child reaches it too.
//! - Releasing a savepoint that is not on top is an ordering fault.

use super::handle::CheckpointedConnection;
use super::Session;
use crate::error::{DataError, DataResult};
use log::{info, warn};
use std::collections::BTreeMap;

pub(crate) struct TransactionState {
    id: u64,
    savepoints: Vec<String>,
    enlisted: Vec<String>,
}

impl TransactionState {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            savepoints: Vec::new(),
            enlisted: Vec::new(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn depth(&self) -> usize {
        self.savepoints.len()
    }

    pub(crate) fn is_enlisted(&self, context: &str) -> bool {
        self.enlisted.iter().any(|name| name == context)
    }

    /// Opens a native transaction on `handle` unless it is already enlisted.
    pub(crate) fn enlist<C: CheckpointedConnection>(&mut self, handle: &mut C) -> DataResult<()> {
        if self.is_enlisted(handle.name()) {
            return Ok(());
        }

        handle.ensure_open()?;
        handle.begin()?;
        for savepoint in &self.savepoints {
            if let Err(err) = handle.checkpoint(savepoint) {
                if let Err(rollback_err) = handle.rollback() {
                    warn!(
                        "event=transaction_rollback module=session status=error transaction_id={} context={} error={}",
                        self.id,
                        handle.name(),
                        rollback_err
                    );
                }
                return Err(err);
            }
        }
        self.enlisted.push(handle.name().to_string());

        info!(
            "event=context_enlist module=session status=ok transaction_id={} context={} depth={}",
            self.id,
            handle.name(),
            self.savepoints.len()
        );
        Ok(())
    }

    /// Pushes savepoint `id` and creates it on every enlisted handle.
    pub(crate) fn register_child<C: CheckpointedConnection>(
        &mut self,
        id: String,
        handles: &mut BTreeMap<String, C>,
    ) -> DataResult<()> {
        for name in &self.enlisted {
            if let Some(handle) = handles.get_mut(name) {
                handle.checkpoint(&id)?;
            }
        }
        info!(
            "event=savepoint_create module=session status=ok transaction_id={} savepoint={} depth={}",
            self.id,
            id,
            self.savepoints.len() + 1
        );
        self.savepoints.push(id);
        Ok(())
    }

    /// Pops savepoint `id`; native state is untouched.
    pub(crate) fn commit_child(&mut self, id: &str) -> DataResult<()> {
        self.check_top(id)?;
        self.savepoints.pop();
        info!(
            "event=savepoint_release module=session status=ok transaction_id={} savepoint={} depth={}",
            self.id,
            id,
            self.savepoints.len()
        );
        Ok(())
    }

    /// Pops savepoint `id` and rolls every enlisted handle back to it.
    ///
    /// Every handle is attempted; the first failure is returned.
    pub(crate) fn rollback_child<C: CheckpointedConnection>(
        &mut self,
        id: &str,
        handles: &mut BTreeMap<String, C>,
    ) -> DataResult<()> {
        self.check_top(id)?;
        self.savepoints.pop();
        let mut first_error = None;
        for name in &self.enlisted {
            let Some(handle) = handles.get_mut(name) else {
                continue;
            };
            if let Err(err) = handle.rollback_to(id) {
                warn!(
                    "event=savepoint_rollback module=session status=error transaction_id={} savepoint={} context={} error={}",
                    self.id, id, name, err
                );
                first_error.get_or_insert(err);
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }
        info!(
            "event=savepoint_rollback module=session status=ok transaction_id={} savepoint={} depth={}",
            self.id,
            id,
            self.savepoints.len()
        );
        Ok(())
    }

    /// Commits every enlisted handle, then closes their connections.
    pub(crate) fn commit<C: CheckpointedConnection>(
        &mut self,
        handles: &mut BTreeMap<String, C>,
    ) -> DataResult<()> {
        for name in &self.enlisted {
            if let Some(handle) = handles.get_mut(name) {
                handle.commit()?;
            }
        }
        for name in self.enlisted.drain(..) {
            if let Some(handle) = handles.get_mut(&name) {
                handle.close();
            }
        }
        self.savepoints.clear();
        Ok(())
    }

    /// Closes every enlisted handle without committing.
    pub(crate) fn abandon<C: CheckpointedConnection>(&mut self, handles: &mut BTreeMap<String, C>) {
        for name in self.enlisted.drain(..) {
            if let Some(handle) = handles.get_mut(&name) {
                handle.close();
            }
        }
        self.savepoints.clear();
    }

    fn check_top(&self, id: &str) -> DataResult<()> {
        match self.savepoints.last() {
            Some(top) if top == id => Ok(()),
            top => Err(DataError::TransactionOrder {
                expected: top.cloned(),
                actual: id.to_string(),
            }),
        }
    }
}

/// Guard returned by [`Session::begin_transaction`].
#[must_use = "dropping a transaction without commit rolls it back"]
pub enum Transaction<'s> {
    Outer(OuterTransaction<'s>),
    Child(ChildTransaction<'s>),
}

impl Transaction<'_> {
    pub fn commit(self) -> DataResult<()> {
        match self {
            Self::Outer(transaction) => transaction.commit(),
            Self::Child(transaction) => transaction.commit(),
        }
    }

    pub fn rollback(self) -> DataResult<()> {
        match self {
            Self::Outer(transaction) => transaction.rollback(),
            Self::Child(transaction) => transaction.rollback(),
        }
    }

    pub fn is_child(&self) -> bool {
        matches!(self, Self::Child(_))
    }

    /// Savepoint id of a child transaction.
    pub fn savepoint(&self) -> Option<&str> {
        match self {
            Self::Outer(_) => None,
            Self::Child(transaction) => Some(&transaction.savepoint),
        }
    }
}

/// The session's active transaction; dropping it uncommitted discards all work.
pub struct OuterTransaction<'s> {
    session: &'s Session,
    id: u64,
    finished: bool,
}

impl<'s> OuterTransaction<'s> {
    pub(crate) fn new(session: &'s Session, id: u64) -> Self {
        Self {
            session,
            id,
            finished: false,
        }
    }

    pub fn commit(mut self) -> DataResult<()> {
        self.finished = true;
        self.session.commit_transaction(self.id)
    }

    pub fn rollback(mut self) -> DataResult<()> {
        self.finished = true;
        self.session.end_transaction(self.id);
        Ok(())
    }
}

impl Drop for OuterTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.session.end_transaction(self.id);
        }
    }
}

/// A savepoint inside the active transaction; dropping it uncommitted rolls it back.
pub struct ChildTransaction<'s> {
    session: &'s Session,
    transaction_id: u64,
    savepoint: String,
    finished: bool,
}

impl<'s> ChildTransaction<'s> {
    pub(crate) fn new(session: &'s Session, transaction_id: u64, savepoint: String) -> Self {
        Self {
            session,
            transaction_id,
            savepoint,
            finished: false,
        }
    }

    pub fn savepoint(&self) -> &str {
        &self.savepoint
    }

    pub fn commit(mut self) -> DataResult<()> {
        self.finished = true;
        self.session
            .commit_savepoint(self.transaction_id, &self.savepoint)
    }

    pub fn rollback(mut self) -> DataResult<()> {
        self.finished = true;
        self.session
            .rollback_savepoint(self.transaction_id, &self.savepoint)
    }
}

impl Drop for ChildTransaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self
            .session
            .rollback_savepoint(self.transaction_id, &self.savepoint)
        {
            warn!(
                "event=savepoint_rollback module=session status=error transaction_id={} savepoint={} error={}",
                self.transaction_id, self.savepoint, err
            );
        }
    }
}

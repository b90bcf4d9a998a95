//! Per-unit-of-work state behind a session.
//!
//! # Responsibility
//! - Cache context handles and per-entity statements.
//! - Hold ambient items, the principal and the active transaction.
//!
//! # Invariants
//! - Teardown runs once and releases the transaction, every handle and
//!   every ambient item.

use super::handle::ContextHandle;
use super::transaction::TransactionState;
use crate::error::{DataError, DataResult};
use crate::registry::{EntityMetadata, EntityRegistry};
use crate::repo::statements::EntityStatements;
use log::info;
use rusqlite::Connection;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

pub(crate) const DEFAULT_USER_NAME: &str = "system";

pub(crate) struct SessionContext {
    pub(crate) identifier: String,
    pub(crate) user_id: i64,
    pub(crate) user_name: String,
    pub(crate) handles: BTreeMap<String, ContextHandle>,
    pub(crate) statements: HashMap<TypeId, Arc<EntityStatements>>,
    pub(crate) items: HashMap<String, Box<dyn Any + Send>>,
    pub(crate) transaction: Option<TransactionState>,
    pub(crate) next_transaction_id: u64,
    pub(crate) cascading: HashSet<(TypeId, i64)>,
}

impl SessionContext {
    pub(crate) fn new(identifier: String) -> Self {
        Self {
            identifier,
            user_id: 0,
            user_name: DEFAULT_USER_NAME.to_string(),
            handles: BTreeMap::new(),
            statements: HashMap::new(),
            items: HashMap::new(),
            transaction: None,
            next_transaction_id: 0,
            cascading: HashSet::new(),
        }
    }

    fn handle<'a>(
        handles: &'a mut BTreeMap<String, ContextHandle>,
        registry: &EntityRegistry,
        context: &str,
    ) -> DataResult<&'a mut ContextHandle> {
        if !handles.contains_key(context) {
            let config = registry
                .context_config(context)
                .cloned()
                .ok_or_else(|| DataError::ContextNotFound(context.to_string()))?;
            handles.insert(context.to_string(), ContextHandle::new(context, config));
        }
        handles
            .get_mut(context)
            .ok_or_else(|| DataError::ContextNotFound(context.to_string()))
    }

    /// Enlists the context's handle in the active transaction, if any.
    pub(crate) fn enlist(&mut self, registry: &EntityRegistry, context: &str) -> DataResult<()> {
        let handle = Self::handle(&mut self.handles, registry, context)?;
        if let Some(transaction) = self.transaction.as_mut() {
            transaction.enlist(handle)?;
        }
        Ok(())
    }

    pub(crate) fn run<R>(
        &mut self,
        registry: &EntityRegistry,
        context: &str,
        timeout: Option<Duration>,
        f: impl FnOnce(&Connection) -> rusqlite::Result<R>,
    ) -> DataResult<R> {
        let handle = Self::handle(&mut self.handles, registry, context)?;
        if let Some(transaction) = self.transaction.as_mut() {
            transaction.enlist(handle)?;
        }
        handle.run(timeout, f)
    }

    pub(crate) fn statements(
        &mut self,
        metadata: &EntityMetadata,
    ) -> DataResult<Arc<EntityStatements>> {
        if let Some(statements) = self.statements.get(&metadata.type_id()) {
            return Ok(Arc::clone(statements));
        }
        let statements = Arc::new(EntityStatements::build(metadata)?);
        self.statements
            .insert(metadata.type_id(), Arc::clone(&statements));
        Ok(statements)
    }

    pub(crate) fn teardown(&mut self) {
        let had_transaction = match self.transaction.take() {
            Some(mut transaction) => {
                transaction.abandon(&mut self.handles);
                true
            }
            None => false,
        };
        let handles = self.handles.len();
        // Dropping the handles closes every connection, in-memory ones included.
        self.handles.clear();
        self.statements.clear();
        let items = self.items.len();
        for (_, item) in self.items.drain() {
            drop(item);
        }

        info!(
            "event=session_close module=session status=ok session_id={} handles={} items={} abandoned_transaction={}",
            self.identifier, handles, items, had_transaction
        );
    }
}

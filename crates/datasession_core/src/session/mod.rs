//! Caller-facing unit of work over the entity registry.
//!
//! # Responsibility
//! - Resolve entity types to repositories bound to their context handle.
//! - Expose query, get, save, delete and bulk-delete operations.
//! - Begin outer and nested transactions.
//! - Carry the ambient principal and item bag used by audit stamping and hooks.
//!
//! # Invariants
//! - A session is `Send` but not `Sync`; it serves one thread at a time.
//! - Handles and statements are cached per session only.
//! - Dropping the session tears its context down exactly once.

use crate::error::{DataError, DataResult};
use crate::model::declaration::quote_identifier;
use crate::model::entity::{Entity, EntityKey};
use crate::model::validation::ValidationList;
use crate::registry::{EntityMetadata, EntityRegistry};
use crate::repo::query::Query;
use crate::repo::repository::Repository;
use crate::repo::statements::EntityStatements;
use crate::service::entity_model::EntityModel;
use log::{error, info};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::any::{Any, TypeId};
use std::cell::{RefCell, RefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

mod context;
pub(crate) mod handle;
pub mod transaction;

use context::SessionContext;
use transaction::{ChildTransaction, OuterTransaction, TransactionState};

pub use transaction::Transaction;

pub struct Session {
    registry: Arc<EntityRegistry>,
    context: RefCell<SessionContext>,
}

impl Session {
    /// Opens a session with a generated 32-hex identifier.
    pub fn open(registry: Arc<EntityRegistry>) -> Self {
        Self::open_with_identifier(registry, Uuid::new_v4().simple().to_string())
    }

    pub fn open_with_identifier(
        registry: Arc<EntityRegistry>,
        identifier: impl Into<String>,
    ) -> Self {
        let identifier = identifier.into();
        info!(
            "event=session_open module=session status=ok session_id={}",
            identifier
        );
        Self {
            registry,
            context: RefCell::new(SessionContext::new(identifier)),
        }
    }

    /// Opens a session on the process-wide registry.
    pub fn open_global() -> DataResult<Self> {
        let registry = EntityRegistry::global().ok_or(DataError::RegistryNotInitialized)?;
        Ok(Self::open(registry))
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn identifier(&self) -> String {
        self.context.borrow().identifier.clone()
    }

    pub fn user_id(&self) -> i64 {
        self.context.borrow().user_id
    }

    pub fn set_user_id(&self, user_id: i64) {
        self.context.borrow_mut().user_id = user_id;
    }

    /// Defaults to `system`.
    pub fn user_name(&self) -> String {
        self.context.borrow().user_name.clone()
    }

    pub fn set_user_name(&self, user_name: impl Into<String>) {
        self.context.borrow_mut().user_name = user_name.into();
    }

    /// Stores an ambient item; it is dropped when replaced, removed or on teardown.
    pub fn set_item<V: Any + Send>(&self, key: impl Into<String>, value: V) {
        self.context
            .borrow_mut()
            .items
            .insert(key.into(), Box::new(value));
    }

    /// Runs `f` on item `key` when it exists and has type `V`.
    pub fn with_item<V: Any, R>(&self, key: &str, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let mut item = self.context.borrow_mut().items.remove(key)?;
        let result = item.downcast_mut::<V>().map(f);
        self.context
            .borrow_mut()
            .items
            .insert(key.to_string(), item);
        result
    }

    pub fn remove_item<V: Any>(&self, key: &str) -> Option<V> {
        let mut context = self.context.borrow_mut();
        let item = context.items.remove(key)?;
        match item.downcast::<V>() {
            Ok(value) => Some(*value),
            Err(item) => {
                context.items.insert(key.to_string(), item);
                None
            }
        }
    }

    pub fn has_item(&self, key: &str) -> bool {
        self.context.borrow().items.contains_key(key)
    }

    /// Typed repository for `T`, without lifecycle hooks.
    pub fn repository<T: Entity>(&self) -> DataResult<Repository<'_, T>> {
        let metadata = self.registry.metadata::<T>()?;
        Ok(Repository::new(self, metadata))
    }

    /// Entity model for `T`, running the hooks registered for it.
    pub fn model<T: Entity>(&self) -> DataResult<EntityModel<'_, T>> {
        let metadata = self.registry.metadata::<T>()?;
        Ok(EntityModel::new(self, metadata))
    }

    pub fn query<T: Entity>(&self, timeout: Option<Duration>) -> DataResult<Query<'_, T>> {
        self.repository::<T>()?.with_timeout(timeout).query()
    }

    pub fn get<T: Entity>(&self, key: T::Key, timeout: Option<Duration>) -> DataResult<Option<T>> {
        self.repository::<T>()?.with_timeout(timeout).get(key)
    }

    pub fn get_by_unique_identifier<T: Entity>(
        &self,
        unique_identifier: &str,
        timeout: Option<Duration>,
    ) -> DataResult<Option<T>> {
        self.repository::<T>()?
            .with_timeout(timeout)
            .get_by_unique_identifier(unique_identifier)
    }

    /// Inserts when the key is zero, updates otherwise.
    pub fn save<T: Entity>(
        &self,
        entity: &mut T,
        timeout: Option<Duration>,
    ) -> DataResult<ValidationList> {
        self.model::<T>()?.with_timeout(timeout).save(entity)
    }

    pub fn delete<T: Entity>(
        &self,
        entity: &mut T,
        delete_children: bool,
        timeout: Option<Duration>,
    ) -> DataResult<ValidationList> {
        self.model::<T>()?
            .with_timeout(timeout)
            .delete(entity, delete_children)
    }

    /// Deletes rows by key without loading them; hooks do not run.
    pub fn delete_keys<T: Entity>(&self, keys: &[T::Key]) -> DataResult<ValidationList> {
        let metadata = self.registry.metadata::<T>()?;
        if keys.is_empty() {
            return Ok(ValidationList::new());
        }
        let table = metadata.writable_table()?.qualified();
        let key = quote_identifier(metadata.require_key()?);
        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!("DELETE FROM {table} WHERE {key} IN ({placeholders})");
        let bind_values: Vec<Value> = keys.iter().map(|key| Value::Integer(key.to_i64())).collect();

        self.bulk_delete(metadata, None, &sql, &bind_values)
    }

    /// Deletes every row `query` selects; hooks do not run.
    pub fn delete_query<T: Entity>(&self, query: Query<'_, T>) -> DataResult<ValidationList> {
        let (sql, bind_values) = query.to_delete_sql()?;
        self.bulk_delete(query.metadata(), query.timeout(), &sql, &bind_values)
    }

    fn bulk_delete(
        &self,
        metadata: &EntityMetadata,
        timeout: Option<Duration>,
        sql: &str,
        bind_values: &[Value],
    ) -> DataResult<ValidationList> {
        let started_at = Instant::now();
        let deleted = self.run(metadata, timeout, |conn| {
            conn.execute(sql, params_from_iter(bind_values.iter()))
        })?;
        info!(
            "event=bulk_delete module=session status=ok entity={} rows={} duration_ms={}",
            metadata.name(),
            deleted,
            started_at.elapsed().as_millis()
        );
        Ok(ValidationList::new())
    }

    /// Starts the session transaction, or a nested one when it is already active.
    pub fn begin_transaction(&self) -> DataResult<Transaction<'_>> {
        let mut state = self.state()?;
        let context = &mut *state;

        match context.transaction.as_mut() {
            Some(transaction) => {
                let savepoint = Uuid::new_v4().simple().to_string();
                transaction.register_child(savepoint.clone(), &mut context.handles)?;
                Ok(Transaction::Child(ChildTransaction::new(
                    self,
                    transaction.id(),
                    savepoint,
                )))
            }
            None => {
                context.next_transaction_id += 1;
                let id = context.next_transaction_id;
                context.transaction = Some(TransactionState::new(id));
                info!(
                    "event=transaction_begin module=session status=ok session_id={} transaction_id={}",
                    context.identifier, id
                );
                Ok(Transaction::Outer(OuterTransaction::new(self, id)))
            }
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.context.borrow().transaction.is_some()
    }

    /// Runs `f` on the raw connection of `context`, enlisting it in the
    /// active transaction first.
    ///
    /// The session stays borrowed while `f` runs. Store operations called
    /// on it from inside `f` fail with [`DataError::SessionBusy`]; `f` should
    /// only use the connection it is given.
    pub fn with_connection<R>(
        &self,
        context: &str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<R>,
    ) -> DataResult<R> {
        let mut state = self.state()?;
        state.run(&self.registry, context, None, f)
    }

    /// Tears the session down; equivalent to dropping it.
    pub fn close(self) {}

    fn state(&self) -> DataResult<RefMut<'_, SessionContext>> {
        self.context
            .try_borrow_mut()
            .map_err(|_| DataError::SessionBusy)
    }

    pub(crate) fn enlist(&self, metadata: &EntityMetadata) -> DataResult<()> {
        let context = metadata
            .context()
            .ok_or_else(|| DataError::EntityMissingContext(metadata.name().to_string()))?;
        self.state()?.enlist(&self.registry, context)
    }

    pub(crate) fn run<R>(
        &self,
        metadata: &EntityMetadata,
        timeout: Option<Duration>,
        f: impl FnOnce(&Connection) -> rusqlite::Result<R>,
    ) -> DataResult<R> {
        let context = metadata
            .context()
            .ok_or_else(|| DataError::EntityMissingContext(metadata.name().to_string()))?;
        self.state()?.run(&self.registry, context, timeout, f)
    }

    pub(crate) fn statements(
        &self,
        metadata: &EntityMetadata,
    ) -> DataResult<Arc<EntityStatements>> {
        self.state()?.statements(metadata)
    }

    pub(crate) fn principal(&self) -> DataResult<(i64, String)> {
        let context = self
            .context
            .try_borrow()
            .map_err(|_| DataError::SessionBusy)?;
        Ok((context.user_id, context.user_name.clone()))
    }

    /// Marks `(type_id, key)` as being cascade-deleted; `None` when it already is.
    pub(crate) fn enter_cascade(&self, type_id: TypeId, key: i64) -> Option<CascadeGuard<'_>> {
        let inserted = self.context.borrow_mut().cascading.insert((type_id, key));
        inserted.then_some(CascadeGuard {
            session: self,
            entry: (type_id, key),
        })
    }

    pub(crate) fn commit_transaction(&self, id: u64) -> DataResult<()> {
        let mut state = self.context.borrow_mut();
        let context = &mut *state;
        let Some(transaction) = context.transaction.as_mut() else {
            return Ok(());
        };
        if transaction.id() != id {
            return Ok(());
        }

        let outcome = transaction.commit(&mut context.handles);
        if let Err(err) = &outcome {
            error!(
                "event=transaction_commit module=session status=error session_id={} transaction_id={} error={}",
                context.identifier, id, err
            );
            transaction.abandon(&mut context.handles);
        } else {
            info!(
                "event=transaction_commit module=session status=ok session_id={} transaction_id={}",
                context.identifier, id
            );
        }
        context.transaction = None;
        outcome
    }

    pub(crate) fn end_transaction(&self, id: u64) {
        let mut state = self.context.borrow_mut();
        let context = &mut *state;
        let Some(transaction) = context.transaction.as_mut() else {
            return;
        };
        if transaction.id() != id {
            return;
        }
        transaction.abandon(&mut context.handles);
        context.transaction = None;
        info!(
            "event=transaction_rollback module=session status=ok session_id={} transaction_id={}",
            context.identifier, id
        );
    }

    pub(crate) fn commit_savepoint(&self, transaction_id: u64, savepoint: &str) -> DataResult<()> {
        let mut state = self.context.borrow_mut();
        match state.transaction.as_mut() {
            Some(transaction) if transaction.id() == transaction_id => {
                transaction.commit_child(savepoint)
            }
            _ => Err(DataError::TransactionClosed),
        }
    }

    pub(crate) fn rollback_savepoint(
        &self,
        transaction_id: u64,
        savepoint: &str,
    ) -> DataResult<()> {
        let mut state = self.context.borrow_mut();
        let context = &mut *state;
        match context.transaction.as_mut() {
            Some(transaction) if transaction.id() == transaction_id => {
                transaction.rollback_child(savepoint, &mut context.handles)
            }
            _ => Err(DataError::TransactionClosed),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.context.get_mut().teardown();
    }
}

pub(crate) struct CascadeGuard<'s> {
    session: &'s Session,
    entry: (TypeId, i64),
}

impl Drop for CascadeGuard<'_> {
    fn drop(&mut self) {
        self.session
            .context
            .borrow_mut()
            .cascading
            .remove(&self.entry);
    }
}

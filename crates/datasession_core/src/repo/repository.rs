//! Typed insert, update and delete for one entity type.
//!
//! # Responsibility
//! - Stamp audit fields and unique identifiers before writes.
//! - Run declarative and entity-level validation before touching the store.
//! - Translate constraint failures into field-addressable validation results.
//! - Delete children before their parent when asked to.
//!
//! # Invariants
//! - A zero key means insert; an insert never writes the key column.
//! - Updates never change the key.
//! - Unmatched store failures propagate unchanged.

use crate::error::{DataError, DataResult};
use crate::model::declaration::quote_identifier;
use crate::model::entity::{AuditBy, AuditFields, Entity, EntityKey, EpochMillis, FieldValues};
use crate::model::validation::ValidationList;
use crate::registry::EntityMetadata;
use crate::repo::fault::StoreFault;
use crate::repo::query::Query;
use crate::session::Session;
use log::{error, info, warn};
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use std::any::TypeId;
use std::marker::PhantomData;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub struct Repository<'s, T: Entity> {
    session: &'s Session,
    metadata: &'s EntityMetadata,
    timeout: Option<Duration>,
    _entity: PhantomData<fn() -> T>,
}

impl<'s, T: Entity> Repository<'s, T> {
    pub(crate) fn new(session: &'s Session, metadata: &'s EntityMetadata) -> Self {
        Self {
            session,
            metadata,
            timeout: None,
            _entity: PhantomData,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn metadata(&self) -> &'s EntityMetadata {
        self.metadata
    }

    /// Enlists the entity's context and returns a detached query.
    pub fn query(&self) -> DataResult<Query<'s, T>> {
        self.session.enlist(self.metadata)?;
        Ok(Query::new(self.session, self.metadata, self.timeout))
    }

    pub fn get(&self, key: T::Key) -> DataResult<Option<T>> {
        let statements = self.session.statements(self.metadata)?;
        let sql = statements
            .get_by_key
            .as_deref()
            .ok_or_else(|| DataError::EntityMissingKey(self.metadata.name().to_string()))?;
        self.fetch_one(sql, Value::Integer(key.to_i64()))
    }

    /// Looks an entity up by its `UniqueIdentifier` column.
    pub fn get_by_unique_identifier(&self, unique_identifier: &str) -> DataResult<Option<T>> {
        let statements = self.session.statements(self.metadata)?;
        let sql = statements.get_by_unique_identifier.as_deref().ok_or_else(|| {
            DataError::UnknownField {
                entity: self.metadata.name().to_string(),
                field: "UniqueIdentifier".to_string(),
            }
        })?;
        self.fetch_one(sql, Value::Text(unique_identifier.to_string()))
    }

    /// Inserts when the key is zero, updates otherwise.
    pub fn save(&self, entity: &mut T) -> DataResult<ValidationList> {
        self.metadata.writable_table()?;
        if entity.is_new() {
            self.insert(entity)
        } else {
            self.update(entity)
        }
    }

    /// Deletes `entity`, removing its children first when `delete_children` is set.
    pub fn delete(&self, entity: &mut T, delete_children: bool) -> DataResult<ValidationList> {
        self.metadata.writable_table()?;
        self.session.enlist(self.metadata)?;

        if !delete_children || self.metadata.children().is_empty() {
            return self.delete_entity(entity);
        }

        let key = entity.key().to_i64();
        let Some(_cascade) = self.session.enter_cascade(TypeId::of::<T>(), key) else {
            // Already being deleted further up the cascade.
            return Ok(ValidationList::new());
        };

        let transaction = self.session.begin_transaction()?;
        for link in self.metadata.children() {
            let child = self
                .session
                .registry()
                .metadata_by_id(link.child())
                .ok_or_else(|| DataError::EntityNotFound(link.child_name().to_string()))?;
            let validation = (child.cascade())(self.session, link.field(), key, self.timeout)?;
            if !validation.is_valid() {
                return Ok(validation);
            }
        }

        let validation = self.delete_entity(entity)?;
        if !validation.is_valid() {
            return Ok(validation);
        }
        transaction.commit()?;
        Ok(validation)
    }

    fn fetch_one(&self, sql: &str, key: Value) -> DataResult<Option<T>> {
        self.session.run(self.metadata, self.timeout, |conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query([key])?;
            if let Some(row) = rows.next()? {
                return Ok(Some(T::from_row(row)?));
            }
            Ok(None)
        })
    }

    fn insert(&self, entity: &mut T) -> DataResult<ValidationList> {
        let (user_id, user_name) = self.session.principal()?;
        let now = now_millis();
        let mut audit = entity.audit_fields();
        stamp(audit.created_on.take(), audit.created_by.take(), now, user_id, &user_name);
        stamp_modified(audit, now, user_id, &user_name);
        if let Some(unique_identifier) = entity.unique_identifier() {
            *unique_identifier = Uuid::new_v4().simple().to_string();
        }

        let values = entity.field_values();
        let validation = self.validate(entity, &values);
        if !validation.is_valid() {
            return Ok(validation);
        }

        let statements = self.session.statements(self.metadata)?;
        let sql = statements
            .insert
            .as_deref()
            .ok_or_else(|| DataError::ReadOnlyView(self.metadata.name().to_string()))?;
        let bind_values = statements.insert_params(&values);
        let delete_sql = statements.delete.as_deref();

        let started_at = Instant::now();
        let outcome = self.session.run(self.metadata, self.timeout, |conn| {
            conn.execute(sql, params_from_iter(bind_values.iter()))?;
            let row_id = conn.last_insert_rowid();
            // A key the entity cannot hold must not leave a row behind.
            if let (None, Some(delete_sql)) = (T::Key::from_i64(row_id), delete_sql) {
                conn.execute(delete_sql, [row_id])?;
            }
            Ok(row_id)
        });

        match outcome {
            Ok(row_id) => {
                let key = T::Key::from_i64(row_id).ok_or_else(|| DataError::KeyOutOfRange {
                    entity: self.metadata.name().to_string(),
                    key: row_id,
                })?;
                entity.set_key(key);
                info!(
                    "event=entity_save module=repo status=ok op=insert entity={} key={} duration_ms={}",
                    self.metadata.name(),
                    row_id,
                    started_at.elapsed().as_millis()
                );
                Ok(ValidationList::new())
            }
            Err(err) => self.translate_failure(err, &values, "insert"),
        }
    }

    fn update(&self, entity: &mut T) -> DataResult<ValidationList> {
        let (user_id, user_name) = self.session.principal()?;
        stamp_modified(entity.audit_fields(), now_millis(), user_id, &user_name);

        let values = entity.field_values();
        let validation = self.validate(entity, &values);
        if !validation.is_valid() {
            return Ok(validation);
        }

        let statements = self.session.statements(self.metadata)?;
        let sql = statements
            .update
            .as_deref()
            .ok_or_else(|| DataError::ReadOnlyView(self.metadata.name().to_string()))?;
        let key = entity.key().to_i64();
        let bind_values = statements.update_params(&values, key);

        let started_at = Instant::now();
        let outcome = self.session.run(self.metadata, self.timeout, |conn| {
            conn.execute(sql, params_from_iter(bind_values.iter()))
        });

        match outcome {
            Ok(0) => {
                warn!(
                    "event=entity_save module=repo status=missing op=update entity={} key={}",
                    self.metadata.name(),
                    key
                );
                Ok(ValidationList::general(self.metadata.missing_row_message()))
            }
            Ok(_) => {
                info!(
                    "event=entity_save module=repo status=ok op=update entity={} key={} duration_ms={}",
                    self.metadata.name(),
                    key,
                    started_at.elapsed().as_millis()
                );
                Ok(ValidationList::new())
            }
            Err(err) => self.translate_failure(err, &values, "update"),
        }
    }

    fn delete_entity(&self, entity: &mut T) -> DataResult<ValidationList> {
        if let Some(deleted) = entity.deleted_flag() {
            if *deleted {
                return Ok(ValidationList::new());
            }
            *deleted = true;
            let validation = self.update(entity)?;
            if !validation.is_valid() {
                if let Some(deleted) = entity.deleted_flag() {
                    *deleted = false;
                }
            }
            return Ok(validation);
        }

        let statements = self.session.statements(self.metadata)?;
        let sql = statements
            .delete
            .as_deref()
            .ok_or_else(|| DataError::ReadOnlyView(self.metadata.name().to_string()))?;
        let key = entity.key().to_i64();

        let started_at = Instant::now();
        let deleted = self
            .session
            .run(self.metadata, self.timeout, |conn| conn.execute(sql, [key]))?;
        if deleted == 0 {
            warn!(
                "event=entity_delete module=repo status=missing entity={} key={}",
                self.metadata.name(),
                key
            );
            return Ok(ValidationList::general(self.metadata.missing_row_message()));
        }

        entity.set_key(T::Key::default());
        info!(
            "event=entity_delete module=repo status=ok entity={} key={} duration_ms={}",
            self.metadata.name(),
            key,
            started_at.elapsed().as_millis()
        );
        Ok(ValidationList::new())
    }

    fn validate(&self, entity: &T, values: &FieldValues) -> ValidationList {
        let mut validation = self.metadata.check_fields(values);
        validation.extend(entity.validate());
        validation
    }

    fn translate_failure(
        &self,
        err: DataError,
        values: &FieldValues,
        op: &str,
    ) -> DataResult<ValidationList> {
        let Some(native) = err.sqlite_error() else {
            return Err(err);
        };
        let fault = self
            .session
            .registry()
            .fault_translator()
            .classify(self.metadata.name(), native);

        let translated = match &fault {
            StoreFault::UniqueIndex(name) => self
                .metadata
                .unique_constraint(name)
                .map(|constraint| constraint.violation()),
            StoreFault::UniqueColumns(columns) => self
                .metadata
                .unique_constraint_on(columns)
                .map(|constraint| constraint.violation()),
            StoreFault::ForeignKey(Some(field)) => self
                .metadata
                .parent_link(field)
                .map(|link| ValidationList::single(link.field(), link.message())),
            StoreFault::ForeignKey(None) => self.find_missing_parent(values)?,
            StoreFault::Unrecognized => None,
        };

        match translated {
            Some(validation) => {
                info!(
                    "event=store_fault module=repo status=translated op={} entity={} fault={:?} fields={}",
                    op,
                    self.metadata.name(),
                    fault,
                    validation.fields().join(",")
                );
                Ok(validation)
            }
            None => {
                error!(
                    "event=store_fault module=repo status=error op={} entity={} fault={:?} error={}",
                    op,
                    self.metadata.name(),
                    fault,
                    err
                );
                Err(err)
            }
        }
    }

    /// Finds the first declared parent whose referenced row does not exist.
    fn find_missing_parent(&self, values: &FieldValues) -> DataResult<Option<ValidationList>> {
        for link in self.metadata.parents() {
            let Some(Value::Integer(parent_key)) = values.get(link.field()) else {
                continue;
            };
            let Some(parent) = self.session.registry().metadata_by_id(link.parent()) else {
                continue;
            };
            if parent.context() != self.metadata.context() {
                continue;
            }
            let (Some(table), Some(key)) = (parent.table(), parent.key_field()) else {
                continue;
            };

            let sql = format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1)",
                table.qualified(),
                quote_identifier(key)
            );
            let parent_key = *parent_key;
            let exists = self.session.run(self.metadata, self.timeout, |conn| {
                conn.query_row(&sql, [parent_key], |row| row.get::<_, bool>(0))
            })?;
            if !exists {
                return Ok(Some(ValidationList::single(link.field(), link.message())));
            }
        }
        Ok(None)
    }
}

/// Deletes, through the entity model of `C`, every `C` whose `field` equals `parent_key`.
pub(crate) fn delete_children_of<C: Entity>(
    session: &Session,
    field: &'static str,
    parent_key: i64,
    timeout: Option<Duration>,
) -> DataResult<ValidationList> {
    let model = session.model::<C>()?.with_timeout(timeout);
    let mut query = model.query()?.eq(field, parent_key);
    if let Some(key) = model.repository().metadata().key_field() {
        query = query.order_by(key);
    }
    let children = query.fetch()?;
    for mut child in children {
        let validation = model.delete(&mut child, true)?;
        if !validation.is_valid() {
            return Ok(validation);
        }
    }
    Ok(ValidationList::new())
}

fn stamp(
    on: Option<&mut EpochMillis>,
    by: Option<AuditBy<'_>>,
    now: EpochMillis,
    user_id: i64,
    user_name: &str,
) {
    if let Some(on) = on {
        *on = now;
    }
    match by {
        Some(AuditBy::Id(id)) => *id = user_id,
        Some(AuditBy::Name(name)) => *name = user_name.to_string(),
        None => {}
    }
}

fn stamp_modified(audit: AuditFields<'_>, now: EpochMillis, user_id: i64, user_name: &str) {
    stamp(audit.modified_on, audit.modified_by, now, user_id, user_name);
}

fn now_millis() -> EpochMillis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

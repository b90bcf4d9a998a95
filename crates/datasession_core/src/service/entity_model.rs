//! Entity lifecycle hooks around repository writes.
//!
//! # Responsibility
//! - Run an overridable pre-check before insert, update and delete.
//! - Run an overridable post-action after a successful write.
//!
//! # Invariants
//! - A failing pre-check returns its validation list without touching the store.
//! - Post-actions run only when the repository reported success.
//! - Model APIs never bypass repository validation or fault translation.

use crate::error::DataResult;
use crate::model::entity::Entity;
use crate::model::validation::ValidationList;
use crate::registry::EntityMetadata;
use crate::repo::query::Query;
use crate::repo::repository::Repository;
use crate::session::Session;
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle hooks for entity `T`, registered with its context binding.
///
/// Every method has a default: pre-checks return an empty list and
/// post-actions do nothing.
pub trait EntityHooks<T: Entity>: Send + Sync {
    fn inserting(&self, _session: &Session, _entity: &T) -> DataResult<ValidationList> {
        Ok(ValidationList::new())
    }

    fn updating(&self, _session: &Session, _entity: &T) -> DataResult<ValidationList> {
        Ok(ValidationList::new())
    }

    fn deleting(&self, _session: &Session, _entity: &T) -> DataResult<ValidationList> {
        Ok(ValidationList::new())
    }

    fn inserted(&self, _session: &Session, _entity: &T) -> DataResult<()> {
        Ok(())
    }

    fn updated(&self, _session: &Session, _entity: &T) -> DataResult<()> {
        Ok(())
    }

    fn deleted(&self, _session: &Session, _entity: &T) -> DataResult<()> {
        Ok(())
    }
}

/// Hooks used when none are registered.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl<T: Entity> EntityHooks<T> for DefaultHooks {}

pub(crate) struct HookSlot<T: Entity>(pub(crate) Arc<dyn EntityHooks<T>>);

/// Repository wrapper that runs the hooks registered for `T`.
pub struct EntityModel<'s, T: Entity> {
    session: &'s Session,
    repository: Repository<'s, T>,
    hooks: Arc<dyn EntityHooks<T>>,
}

impl<'s, T: Entity> EntityModel<'s, T> {
    pub(crate) fn new(session: &'s Session, metadata: &'s EntityMetadata) -> Self {
        Self {
            session,
            repository: Repository::new(session, metadata),
            hooks: metadata.hooks::<T>(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.repository = self.repository.with_timeout(timeout);
        self
    }

    pub fn repository(&self) -> &Repository<'s, T> {
        &self.repository
    }

    pub fn query(&self) -> DataResult<Query<'s, T>> {
        self.repository.query()
    }

    pub fn get(&self, key: T::Key) -> DataResult<Option<T>> {
        self.repository.get(key)
    }

    pub fn get_by_unique_identifier(&self, unique_identifier: &str) -> DataResult<Option<T>> {
        self.repository.get_by_unique_identifier(unique_identifier)
    }

    pub fn save(&self, entity: &mut T) -> DataResult<ValidationList> {
        if entity.is_new() {
            self.insert(entity)
        } else {
            self.update(entity)
        }
    }

    fn insert(&self, entity: &mut T) -> DataResult<ValidationList> {
        let precheck = self.hooks.inserting(self.session, entity)?;
        if !precheck.is_valid() {
            return Ok(precheck);
        }
        let validation = self.repository.save(entity)?;
        if validation.is_valid() {
            self.hooks.inserted(self.session, entity)?;
        }
        Ok(validation)
    }

    fn update(&self, entity: &mut T) -> DataResult<ValidationList> {
        let precheck = self.hooks.updating(self.session, entity)?;
        if !precheck.is_valid() {
            return Ok(precheck);
        }
        let validation = self.repository.save(entity)?;
        if validation.is_valid() {
            self.hooks.updated(self.session, entity)?;
        }
        Ok(validation)
    }

    pub fn delete(&self, entity: &mut T, delete_children: bool) -> DataResult<ValidationList> {
        let precheck = self.hooks.deleting(self.session, entity)?;
        if !precheck.is_valid() {
            return Ok(precheck);
        }
        let validation = self.repository.delete(entity, delete_children)?;
        if validation.is_valid() {
            self.hooks.deleted(self.session, entity)?;
        }
        Ok(validation)
    }
}

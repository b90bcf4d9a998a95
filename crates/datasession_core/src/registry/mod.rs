//! Immutable entity-metadata registry.
//!
//! # Responsibility
//! - Map entity types to their derived metadata.
//! - Hold per-context connection settings and the store-failure translator.
//! - Optionally publish one process-wide instance.
//!
//! # Invariants
//! - The registry is read-only once built.
//! - The process-wide instance is built at most once, even under
//!   concurrent first use.

use crate::config::ContextConfig;
use crate::error::{DataError, DataResult};
use crate::model::entity::Entity;
use crate::repo::fault::FaultTranslator;
use once_cell::sync::OnceCell;
use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

pub mod builder;
pub mod error;
pub mod metadata;

pub use builder::{ContextBinding, RegistryBuilder};
pub use error::{KeyFault, RegistryError, RegistryResult, UniqueFieldFault};
pub use metadata::{ChildLink, EntityMetadata, FieldMetadata, ParentLink, UniqueConstraint};

static GLOBAL_REGISTRY: OnceCell<Arc<EntityRegistry>> = OnceCell::new();

pub struct EntityRegistry {
    entities: HashMap<TypeId, EntityMetadata>,
    order: Vec<TypeId>,
    contexts: BTreeMap<String, ContextConfig>,
    translator: Box<dyn FaultTranslator>,
}

impl EntityRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    fn from_parts(
        entities: Vec<EntityMetadata>,
        contexts: BTreeMap<String, ContextConfig>,
        translator: Box<dyn FaultTranslator>,
    ) -> Self {
        let order = entities.iter().map(|entity| entity.type_id).collect();
        let entities = entities
            .into_iter()
            .map(|entity| (entity.type_id, entity))
            .collect();
        Self {
            entities,
            order,
            contexts,
            translator,
        }
    }

    /// Returns metadata for `T`, or `EntityNotFound` when `T` was not kept.
    pub fn metadata<T: Entity>(&self) -> DataResult<&EntityMetadata> {
        self.entities.get(&TypeId::of::<T>()).ok_or_else(|| {
            DataError::EntityNotFound(
                crate::model::declaration::short_type_name::<T>().to_string(),
            )
        })
    }

    pub fn metadata_by_id(&self, type_id: TypeId) -> Option<&EntityMetadata> {
        self.entities.get(&type_id)
    }

    pub fn metadata_by_name(&self, name: &str) -> Option<&EntityMetadata> {
        self.entities().find(|entity| entity.name == name)
    }

    /// Registered entities in registration order.
    pub fn entities(&self) -> impl Iterator<Item = &EntityMetadata> {
        self.order
            .iter()
            .filter_map(|type_id| self.entities.get(type_id))
    }

    pub fn context_config(&self, name: &str) -> Option<&ContextConfig> {
        self.contexts.get(name)
    }

    pub fn context_names(&self) -> impl Iterator<Item = &str> {
        self.contexts.keys().map(String::as_str)
    }

    pub fn fault_translator(&self) -> &dyn FaultTranslator {
        self.translator.as_ref()
    }

    /// Builds and publishes the process-wide registry, running `build` at
    /// most once. Later calls return the published instance.
    pub fn initialize<F>(build: F) -> RegistryResult<Arc<EntityRegistry>>
    where
        F: FnOnce() -> RegistryResult<EntityRegistry>,
    {
        GLOBAL_REGISTRY
            .get_or_try_init(|| build().map(Arc::new))
            .map(Arc::clone)
    }

    /// Publishes an already built registry as the process-wide instance.
    pub fn publish(registry: EntityRegistry) -> RegistryResult<Arc<EntityRegistry>> {
        let registry = Arc::new(registry);
        GLOBAL_REGISTRY
            .set(Arc::clone(&registry))
            .map_err(|_| RegistryError::AlreadyInitialized)?;
        Ok(registry)
    }

    pub fn global() -> Option<Arc<EntityRegistry>> {
        GLOBAL_REGISTRY.get().map(Arc::clone)
    }
}

impl Debug for EntityRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("entities", &self.entities().map(|e| e.name).collect::<Vec<_>>())
            .field("contexts", &self.contexts.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

//! Start-up registration of entity types and context groupings.
//!
//! # Responsibility
//! - Collect entity declarations and their context bindings via typed calls.
//! - Validate every declaration and derive immutable metadata in one pass.
//!
//! # Invariants
//! - Binding names are `{EntityTypeName}DbSet`.
//! - Non-view entities without a context binding are excluded, not rejected.
//! - Child links are computed only after every entity is validated.

use super::error::{KeyFault, RegistryError, RegistryResult, UniqueFieldFault};
use super::metadata::{
    CascadeFn, ChildLink, EntityMetadata, FieldMetadata, ParentLink, UniqueConstraint,
};
use super::EntityRegistry;
use crate::config::DataAccessConfig;
use crate::model::declaration::EntityDeclaration;
use crate::model::entity::Entity;
use crate::repo::fault::{FaultTranslator, SqliteFaultTranslator};
use crate::repo::repository::delete_children_of;
use crate::service::entity_model::{DefaultHooks, EntityHooks, HookSlot};
use log::{debug, error, info};
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

struct Registration {
    declaration: EntityDeclaration,
    cascade: CascadeFn,
    hooks: Arc<dyn Any + Send + Sync>,
}

impl Registration {
    fn of<T: Entity>(hooks: Arc<dyn EntityHooks<T>>) -> Self {
        Self {
            declaration: T::declare(EntityDeclaration::for_type::<T>()),
            cascade: delete_children_of::<T>,
            hooks: Arc::new(HookSlot(hooks)),
        }
    }
}

struct EntitySetBinding {
    type_id: TypeId,
    type_name: &'static str,
    binding: String,
    registration: Registration,
    custom_hooks: bool,
}

/// Entity sets of one context grouping.
pub struct ContextBinding {
    name: String,
    sets: Vec<EntitySetBinding>,
}

impl ContextBinding {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sets: Vec::new(),
        }
    }

    /// Binds entity `T` to this context under `binding`.
    pub fn entity_set<T: Entity>(self, binding: impl Into<String>) -> Self {
        self.push_set::<T>(binding.into(), Arc::new(DefaultHooks), false)
    }

    /// Binds entity `T` with lifecycle hooks used by `EntityModel<T>`.
    pub fn entity_set_with<T: Entity, H: EntityHooks<T> + 'static>(
        self,
        binding: impl Into<String>,
        hooks: H,
    ) -> Self {
        self.push_set::<T>(binding.into(), Arc::new(hooks), true)
    }

    fn push_set<T: Entity>(
        mut self,
        binding: String,
        hooks: Arc<dyn EntityHooks<T>>,
        custom_hooks: bool,
    ) -> Self {
        let registration = Registration::of::<T>(hooks);
        self.sets.push(EntitySetBinding {
            type_id: TypeId::of::<T>(),
            type_name: registration.declaration.type_name,
            binding,
            registration,
            custom_hooks,
        });
        self
    }
}

/// Collects declarations and builds an [`EntityRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    declared: Vec<Registration>,
    contexts: Vec<ContextBinding>,
    translator: Option<Box<dyn FaultTranslator>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares entity `T` without binding it to a context.
    pub fn declare<T: Entity>(mut self) -> Self {
        self.declared.push(Registration::of::<T>(Arc::new(DefaultHooks)));
        self
    }

    pub fn declare_with<T: Entity, H: EntityHooks<T> + 'static>(mut self, hooks: H) -> Self {
        self.declared.push(Registration::of::<T>(Arc::new(hooks)));
        self
    }

    pub fn context(mut self, context: ContextBinding) -> Self {
        self.contexts.push(context);
        self
    }

    /// Replaces the store-failure translator; SQLite codes are used by default.
    pub fn fault_translator(mut self, translator: impl FaultTranslator + 'static) -> Self {
        self.translator = Some(Box::new(translator));
        self
    }

    /// Validates all declarations and publishes the immutable metadata map.
    pub fn build(self, config: &DataAccessConfig) -> RegistryResult<EntityRegistry> {
        let started_at = Instant::now();
        info!("event=registry_init module=registry status=start");

        match self.build_inner(config) {
            Ok(registry) => {
                info!(
                    "event=registry_init module=registry status=ok entities={} contexts={} duration_ms={}",
                    registry.entities.len(),
                    registry.contexts.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(registry)
            }
            Err(err) => {
                error!(
                    "event=registry_init module=registry status=error duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn build_inner(self, config: &DataAccessConfig) -> RegistryResult<EntityRegistry> {
        let mut order: Vec<TypeId> = Vec::new();
        let mut registrations: HashMap<TypeId, Registration> = HashMap::new();
        for registration in self.declared {
            let type_id = registration.declaration.type_id;
            if !registrations.contains_key(&type_id) {
                order.push(type_id);
            }
            registrations.insert(type_id, registration);
        }

        let mut bound: HashMap<TypeId, String> = HashMap::new();
        let mut contexts = BTreeMap::new();
        for context in self.contexts {
            if contexts.contains_key(&context.name) {
                return Err(RegistryError::DuplicateContext(context.name));
            }
            let context_config = config
                .context(&context.name)
                .cloned()
                .ok_or_else(|| RegistryError::MissingContextConfig(context.name.clone()))?;

            for set in context.sets {
                let expected = format!("{}DbSet", set.type_name);
                if set.binding != expected {
                    return Err(RegistryError::InvalidBindingName {
                        context: context.name,
                        binding: set.binding,
                    });
                }
                if let Some(first) = bound.get(&set.type_id) {
                    return Err(RegistryError::DuplicateEntityBinding {
                        entity: set.type_name.to_string(),
                        first: first.clone(),
                        second: context.name,
                    });
                }
                bound.insert(set.type_id, context.name.clone());

                match registrations.get_mut(&set.type_id) {
                    Some(existing) if set.custom_hooks => existing.hooks = set.registration.hooks,
                    Some(_) => {}
                    None => {
                        order.push(set.type_id);
                        registrations.insert(set.type_id, set.registration);
                    }
                }
            }
            contexts.insert(context.name, context_config);
        }

        let mut kept: Vec<Registration> = Vec::new();
        for type_id in order {
            let Some(registration) = registrations.remove(&type_id) else {
                continue;
            };
            let declaration = &registration.declaration;
            if declaration.view.is_none() && !bound.contains_key(&type_id) {
                debug!(
                    "event=registry_init module=registry status=skip entity={} reason=no_context",
                    declaration.type_name
                );
                continue;
            }
            kept.push(registration);
        }

        let persistable: HashSet<TypeId> = kept
            .iter()
            .filter(|registration| registration.declaration.view.is_none())
            .map(|registration| registration.declaration.type_id)
            .collect();
        let display_names: HashMap<TypeId, String> = kept
            .iter()
            .map(|registration| {
                let declaration = &registration.declaration;
                let display = declaration
                    .display_name
                    .clone()
                    .unwrap_or_else(|| declaration.type_name.to_string());
                (declaration.type_id, display)
            })
            .collect();

        let mut entities: Vec<EntityMetadata> = Vec::with_capacity(kept.len());
        for registration in kept {
            let context = bound.get(&registration.declaration.type_id).cloned();
            entities.push(derive_metadata(
                registration,
                context,
                &persistable,
                &display_names,
            )?);
        }

        let mut children: HashMap<TypeId, Vec<ChildLink>> = HashMap::new();
        for entity in entities.iter().filter(|entity| !entity.is_view()) {
            for link in &entity.parents {
                children.entry(link.parent).or_default().push(ChildLink {
                    child: entity.type_id,
                    child_name: entity.name,
                    field: link.field,
                });
            }
        }
        for entity in &mut entities {
            if let Some(links) = children.remove(&entity.type_id) {
                entity.children = links;
            }
        }

        let translator = self
            .translator
            .unwrap_or_else(|| Box::new(SqliteFaultTranslator));
        Ok(EntityRegistry::from_parts(entities, contexts, translator))
    }
}

fn derive_metadata(
    registration: Registration,
    context: Option<String>,
    persistable: &HashSet<TypeId>,
    display_names: &HashMap<TypeId, String>,
) -> RegistryResult<EntityMetadata> {
    let Registration {
        declaration,
        cascade,
        hooks,
    } = registration;
    let entity = declaration.type_name.to_string();
    let is_view = declaration.view.is_some();

    let mut seen = HashSet::new();
    for field in &declaration.fields {
        if !seen.insert(field.name) {
            return Err(RegistryError::DuplicateField {
                entity,
                field: field.name.to_string(),
            });
        }
    }

    let keys: Vec<_> = declaration.fields.iter().filter(|field| field.is_key).collect();
    let key_field = match keys.as_slice() {
        [] if is_view => None,
        [] => {
            return Err(RegistryError::InvalidEntityKey {
                entity,
                fault: KeyFault::Missing,
            })
        }
        [key] => {
            if !key.kind.is_key_kind() {
                return Err(RegistryError::InvalidEntityKey {
                    entity,
                    fault: KeyFault::UnsupportedType {
                        field: key.name.to_string(),
                        kind: key.kind,
                    },
                });
            }
            if key.kind != declaration.key_kind {
                return Err(RegistryError::InvalidEntityKey {
                    entity,
                    fault: KeyFault::KindMismatch {
                        field: key.name.to_string(),
                        declared: key.kind,
                        expected: declaration.key_kind,
                    },
                });
            }
            Some(key.name)
        }
        many => {
            return Err(RegistryError::InvalidEntityKey {
                entity,
                fault: KeyFault::Multiple(
                    many.iter().map(|field| field.name.to_string()).collect(),
                ),
            })
        }
    };

    if !is_view && declaration.table.is_none() {
        return Err(RegistryError::EntityMissingTable { entity });
    }

    let mut unique_constraints = Vec::with_capacity(declaration.unique.len());
    for unique in &declaration.unique {
        let mut fields = Vec::with_capacity(unique.fields.len());
        for name in &unique.fields {
            if key_field == Some(name.as_str()) {
                return Err(RegistryError::InvalidUniqueConstraintField {
                    entity,
                    constraint: unique.name.clone(),
                    field: name.clone(),
                    fault: UniqueFieldFault::KeyField,
                });
            }
            let Some(field) = declaration
                .fields
                .iter()
                .find(|field| field.name == name.as_str())
            else {
                return Err(RegistryError::InvalidUniqueConstraintField {
                    entity,
                    constraint: unique.name.clone(),
                    field: name.clone(),
                    fault: UniqueFieldFault::UnknownField,
                });
            };
            fields.push(field.name);
        }
        unique_constraints.push(UniqueConstraint {
            name: unique.name.clone(),
            fields,
        });
    }

    let mut parents = Vec::new();
    for field in &declaration.fields {
        let Some(parent) = &field.parent else {
            continue;
        };
        if !persistable.contains(&parent.type_id) {
            return Err(RegistryError::InvalidParentEntity {
                entity,
                field: field.name.to_string(),
                parent: parent.type_name.to_string(),
            });
        }
        let parent_display = display_names
            .get(&parent.type_id)
            .map(String::as_str)
            .unwrap_or(parent.type_name);
        parents.push(ParentLink {
            field: field.name,
            parent: parent.type_id,
            parent_name: parent.type_name,
            required: field.required,
            message: parent
                .message
                .clone()
                .unwrap_or_else(|| format!("The specified {parent_display} doesn't exist.")),
        });
    }

    let fields = declaration
        .fields
        .iter()
        .filter(|field| !field.is_key)
        .map(|field| FieldMetadata {
            name: field.name,
            kind: field.kind,
            display_name: field
                .display
                .clone()
                .unwrap_or_else(|| field.name.to_string()),
            required: field.required,
            required_message: field.required_message.clone(),
            max_length: field.max_length,
            max_length_message: field.max_length_message.clone(),
        })
        .collect();

    let display_name = display_names
        .get(&declaration.type_id)
        .cloned()
        .unwrap_or_else(|| entity.clone());
    let delete_confirmation = declaration
        .delete_confirmation
        .clone()
        .unwrap_or_else(|| format!("Are you sure you want to delete this {display_name}?"));

    Ok(EntityMetadata {
        type_id: declaration.type_id,
        name: declaration.type_name,
        key_field,
        key_kind: declaration.key_kind,
        table: declaration.table,
        view: declaration.view,
        fields,
        unique_constraints,
        parents,
        children: Vec::new(),
        display_name,
        delete_confirmation,
        context,
        cascade,
        hooks,
    })
}

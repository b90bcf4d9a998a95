//! Derived, immutable metadata for one registered entity type.
//!
//! # Responsibility
//! - Answer key, relation, field-rule, constraint and link questions for
//!   repositories, queries and fault translation.
//! - Carry the type-erased cascade function used to delete children whose
//!   concrete type is only known at registration.
//!
//! # Invariants
//! - Non-view entities always have a key field and a table binding.
//! - Child links are the inverse of other entities' parent links.

use crate::error::{DataError, DataResult};
use crate::model::declaration::{FieldKind, TableBinding};
use crate::model::entity::{Entity, FieldValues};
use crate::model::validation::ValidationList;
use crate::service::entity_model::{DefaultHooks, EntityHooks, HookSlot};
use crate::session::Session;
use rusqlite::types::Value;
use std::any::{Any, TypeId};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

/// Deletes every child of one parent row for a concrete child type.
pub(crate) type CascadeFn =
    fn(&Session, &'static str, i64, Option<Duration>) -> DataResult<ValidationList>;

/// Declared non-key column with its validation rules.
#[derive(Debug, Clone)]
pub struct FieldMetadata {
    pub(crate) name: &'static str,
    pub(crate) kind: FieldKind,
    pub(crate) display_name: String,
    pub(crate) required: bool,
    pub(crate) required_message: Option<String>,
    pub(crate) max_length: Option<usize>,
    pub(crate) max_length_message: Option<String>,
}

impl FieldMetadata {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn max_length(&self) -> Option<usize> {
        self.max_length
    }

    pub(crate) fn check(&self, value: Option<&Value>, out: &mut ValidationList) {
        let missing = match value {
            None | Some(Value::Null) => true,
            Some(Value::Text(text)) => text.trim().is_empty(),
            Some(_) => false,
        };
        if self.required && missing {
            let message = self
                .required_message
                .clone()
                .unwrap_or_else(|| format!("{} is required.", self.display_name));
            out.add(self.name, message);
            return;
        }

        if let (Some(max), Some(Value::Text(text))) = (self.max_length, value) {
            if text.chars().count() > max {
                let message = self.max_length_message.clone().unwrap_or_else(|| {
                    format!("{} must be {max} characters or less.", self.display_name)
                });
                out.add(self.name, message);
            }
        }
    }
}

/// Named set of fields that must be unique together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueConstraint {
    pub(crate) name: String,
    pub(crate) fields: Vec<&'static str>,
}

impl UniqueConstraint {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[&'static str] {
        &self.fields
    }

    /// True when `columns` names exactly this constraint's fields, in any order.
    pub fn covers_columns(&self, columns: &[String]) -> bool {
        columns.len() == self.fields.len()
            && self
                .fields
                .iter()
                .all(|field| columns.iter().any(|column| column.eq_ignore_ascii_case(field)))
    }

    /// One message per constraint field, each carrying the constraint name.
    pub fn violation(&self) -> ValidationList {
        let mut list = ValidationList::new();
        for field in &self.fields {
            list.add(*field, self.name.clone());
        }
        list
    }
}

/// Field of this entity that references another entity's key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    pub(crate) field: &'static str,
    pub(crate) parent: TypeId,
    pub(crate) parent_name: &'static str,
    pub(crate) required: bool,
    pub(crate) message: String,
}

impl ParentLink {
    pub fn field(&self) -> &'static str {
        self.field
    }

    pub fn parent(&self) -> TypeId {
        self.parent
    }

    pub fn parent_name(&self) -> &'static str {
        self.parent_name
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Inverse of a parent link: entity `child` references this entity through `field`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildLink {
    pub(crate) child: TypeId,
    pub(crate) child_name: &'static str,
    pub(crate) field: &'static str,
}

impl ChildLink {
    pub fn child(&self) -> TypeId {
        self.child
    }

    pub fn child_name(&self) -> &'static str {
        self.child_name
    }

    pub fn field(&self) -> &'static str {
        self.field
    }
}

pub struct EntityMetadata {
    pub(crate) type_id: TypeId,
    pub(crate) name: &'static str,
    pub(crate) key_field: Option<&'static str>,
    pub(crate) key_kind: FieldKind,
    pub(crate) table: Option<TableBinding>,
    pub(crate) view: Option<TableBinding>,
    pub(crate) fields: Vec<FieldMetadata>,
    pub(crate) unique_constraints: Vec<UniqueConstraint>,
    pub(crate) parents: Vec<ParentLink>,
    pub(crate) children: Vec<ChildLink>,
    pub(crate) display_name: String,
    pub(crate) delete_confirmation: String,
    pub(crate) context: Option<String>,
    pub(crate) cascade: CascadeFn,
    pub(crate) hooks: Arc<dyn Any + Send + Sync>,
}

impl EntityMetadata {
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn key_field(&self) -> Option<&'static str> {
        self.key_field
    }

    pub fn key_kind(&self) -> FieldKind {
        self.key_kind
    }

    pub(crate) fn require_key(&self) -> DataResult<&'static str> {
        self.key_field
            .ok_or_else(|| DataError::EntityMissingKey(self.name.to_string()))
    }

    pub fn table(&self) -> Option<&TableBinding> {
        self.table.as_ref()
    }

    pub fn is_view(&self) -> bool {
        self.table.is_none()
    }

    /// Relation read by queries: the table, or the view relation for views.
    pub fn relation(&self) -> DataResult<&TableBinding> {
        self.table
            .as_ref()
            .or(self.view.as_ref())
            .ok_or_else(|| DataError::EntityMissingContext(self.name.to_string()))
    }

    pub(crate) fn writable_table(&self) -> DataResult<&TableBinding> {
        self.table
            .as_ref()
            .ok_or_else(|| DataError::ReadOnlyView(self.name.to_string()))
    }

    pub fn fields(&self) -> &[FieldMetadata] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldMetadata> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Resolves a declared column name, key included.
    pub fn column(&self, name: &str) -> Option<&'static str> {
        if self.key_field == Some(name) {
            return self.key_field;
        }
        self.field(name).map(|field| field.name)
    }

    pub fn unique_constraints(&self) -> &[UniqueConstraint] {
        &self.unique_constraints
    }

    pub fn unique_constraint(&self, name: &str) -> Option<&UniqueConstraint> {
        self.unique_constraints
            .iter()
            .find(|constraint| constraint.name == name)
    }

    pub fn unique_constraint_on(&self, columns: &[String]) -> Option<&UniqueConstraint> {
        self.unique_constraints
            .iter()
            .find(|constraint| constraint.covers_columns(columns))
    }

    pub fn parents(&self) -> &[ParentLink] {
        &self.parents
    }

    pub fn parent_link(&self, field: &str) -> Option<&ParentLink> {
        self.parents
            .iter()
            .find(|link| link.field.eq_ignore_ascii_case(field))
    }

    pub fn children(&self) -> &[ChildLink] {
        &self.children
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn delete_confirmation(&self) -> &str {
        &self.delete_confirmation
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Message returned when an update or delete matched no row.
    pub fn missing_row_message(&self) -> String {
        format!("The specified {} doesn't exist.", self.display_name)
    }

    pub(crate) fn check_fields(&self, values: &FieldValues) -> ValidationList {
        let mut list = ValidationList::new();
        for field in &self.fields {
            field.check(values.get(field.name), &mut list);
        }
        list
    }

    pub(crate) fn cascade(&self) -> CascadeFn {
        self.cascade
    }

    pub(crate) fn hooks<T: Entity>(&self) -> Arc<dyn EntityHooks<T>> {
        match self.hooks.downcast_ref::<HookSlot<T>>() {
            Some(slot) => Arc::clone(&slot.0),
            None => Arc::new(DefaultHooks),
        }
    }
}

impl Debug for EntityMetadata {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityMetadata")
            .field("name", &self.name)
            .field("key_field", &self.key_field)
            .field("key_kind", &self.key_kind)
            .field("table", &self.table)
            .field("view", &self.view)
            .field("fields", &self.fields)
            .field("unique_constraints", &self.unique_constraints)
            .field("parents", &self.parents)
            .field("children", &self.children)
            .field("display_name", &self.display_name)
            .field("delete_confirmation", &self.delete_confirmation)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

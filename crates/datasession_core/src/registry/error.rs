//! Registry construction errors.

use crate::model::declaration::FieldKind;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Why an entity's key declaration was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFault {
    Missing,
    Multiple(Vec<String>),
    UnsupportedType { field: String, kind: FieldKind },
    /// The declared key field kind differs from the entity's `Key` type.
    KindMismatch {
        field: String,
        declared: FieldKind,
        expected: FieldKind,
    },
}

impl Display for KeyFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "no key field declared"),
            Self::Multiple(fields) => write!(f, "multiple key fields: {}", fields.join(", ")),
            Self::UnsupportedType { field, kind } => {
                write!(f, "key field `{field}` has unsupported type {kind}")
            }
            Self::KindMismatch {
                field,
                declared,
                expected,
            } => write!(
                f,
                "key field `{field}` is declared {declared} but the key type is {expected}"
            ),
        }
    }
}

/// Why a unique-constraint field was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueFieldFault {
    KeyField,
    UnknownField,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    InvalidEntityKey {
        entity: String,
        fault: KeyFault,
    },
    EntityMissingTable {
        entity: String,
    },
    InvalidUniqueConstraintField {
        entity: String,
        constraint: String,
        field: String,
        fault: UniqueFieldFault,
    },
    InvalidParentEntity {
        entity: String,
        field: String,
        parent: String,
    },
    InvalidBindingName {
        context: String,
        binding: String,
    },
    DuplicateContext(String),
    DuplicateEntityBinding {
        entity: String,
        first: String,
        second: String,
    },
    MissingContextConfig(String),
    DuplicateField {
        entity: String,
        field: String,
    },
    AlreadyInitialized,
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEntityKey { entity, fault } => {
                write!(f, "entity `{entity}` has an invalid key: {fault}")
            }
            Self::EntityMissingTable { entity } => {
                write!(f, "entity `{entity}` has no table binding")
            }
            Self::InvalidUniqueConstraintField {
                entity,
                constraint,
                field,
                fault,
            } => match fault {
                UniqueFieldFault::KeyField => write!(
                    f,
                    "unique constraint `{constraint}` on `{entity}` must not include key field `{field}`"
                ),
                UniqueFieldFault::UnknownField => write!(
                    f,
                    "unique constraint `{constraint}` on `{entity}` references unknown field `{field}`"
                ),
            },
            Self::InvalidParentEntity {
                entity,
                field,
                parent,
            } => write!(
                f,
                "field `{entity}.{field}` references `{parent}`, which is not a persistable entity"
            ),
            Self::InvalidBindingName { context, binding } => write!(
                f,
                "context `{context}` has invalid binding name `{binding}`; expected `{{EntityName}}DbSet`"
            ),
            Self::DuplicateContext(name) => write!(f, "context `{name}` is declared twice"),
            Self::DuplicateEntityBinding {
                entity,
                first,
                second,
            } => write!(
                f,
                "entity `{entity}` is bound to both `{first}` and `{second}`"
            ),
            Self::MissingContextConfig(name) => {
                write!(f, "context `{name}` has no connection settings")
            }
            Self::DuplicateField { entity, field } => {
                write!(f, "entity `{entity}` declares field `{field}` twice")
            }
            Self::AlreadyInitialized => {
                write!(f, "process-wide entity registry is already initialized")
            }
        }
    }
}

impl Error for RegistryError {}

//! Typed declaration calls for entity metadata.
//!
//! # Responsibility
//! - Collect key, table, field rules, unique constraints and parent links
//!   for one entity type at registration time.
//!
//! # Invariants
//! - Declarations are plain data; structural checks happen when the registry
//!   is built.
//!
//! # See also
//! - `crate::registry::builder`

use super::entity::{Entity, EntityKey};
use std::any::TypeId;
use std::fmt::{Display, Formatter};

/// Storage type of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Int,
    Long,
    Real,
    Text,
    Bool,
    Timestamp,
    Blob,
}

impl FieldKind {
    /// Key fields must be 32-bit or 64-bit integers.
    pub fn is_key_kind(self) -> bool {
        matches!(self, Self::Int | Self::Long)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Long => "long",
            Self::Real => "real",
            Self::Text => "text",
            Self::Bool => "bool",
            Self::Timestamp => "timestamp",
            Self::Blob => "blob",
        }
    }
}

impl Display for FieldKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Schema-qualified store relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableBinding {
    pub schema: Option<String>,
    pub name: String,
}

impl TableBinding {
    /// Renders the relation as quoted SQL identifiers.
    pub fn qualified(&self) -> String {
        match &self.schema {
            Some(schema) => format!(
                "{}.{}",
                quote_identifier(schema),
                quote_identifier(&self.name)
            ),
            None => quote_identifier(&self.name),
        }
    }
}

impl Display for TableBinding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Quotes an SQL identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Debug, Clone)]
pub(crate) struct ParentDeclaration {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) message: Option<String>,
}

/// One declared column of an entity.
#[derive(Debug, Clone)]
pub struct Field {
    pub(crate) name: &'static str,
    pub(crate) kind: FieldKind,
    pub(crate) is_key: bool,
    pub(crate) display: Option<String>,
    pub(crate) required: bool,
    pub(crate) required_message: Option<String>,
    pub(crate) max_length: Option<usize>,
    pub(crate) max_length_message: Option<String>,
    pub(crate) parent: Option<ParentDeclaration>,
}

impl Field {
    pub fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            is_key: false,
            display: None,
            required: false,
            required_message: None,
            max_length: None,
            max_length_message: None,
            parent: None,
        }
    }

    pub fn int(name: &'static str) -> Self {
        Self::new(name, FieldKind::Int)
    }

    pub fn long(name: &'static str) -> Self {
        Self::new(name, FieldKind::Long)
    }

    pub fn real(name: &'static str) -> Self {
        Self::new(name, FieldKind::Real)
    }

    pub fn text(name: &'static str) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn bool(name: &'static str) -> Self {
        Self::new(name, FieldKind::Bool)
    }

    pub fn timestamp(name: &'static str) -> Self {
        Self::new(name, FieldKind::Timestamp)
    }

    pub fn blob(name: &'static str) -> Self {
        Self::new(name, FieldKind::Blob)
    }

    /// Marks this field as the entity key.
    pub fn key(mut self) -> Self {
        self.is_key = true;
        self
    }

    /// Name used in validation messages instead of the column name.
    pub fn display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn required_with(mut self, message: impl Into<String>) -> Self {
        self.required = true;
        self.required_message = Some(message.into());
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn max_length_with(mut self, max: usize, message: impl Into<String>) -> Self {
        self.max_length = Some(max);
        self.max_length_message = Some(message.into());
        self
    }

    /// Links this field to the key of entity `P`.
    pub fn parent<P: Entity>(mut self) -> Self {
        self.parent = Some(ParentDeclaration {
            type_id: TypeId::of::<P>(),
            type_name: short_type_name::<P>(),
            message: None,
        });
        self
    }

    /// Links this field to entity `P` with the message used when the parent is missing.
    pub fn parent_with<P: Entity>(mut self, message: impl Into<String>) -> Self {
        self.parent = Some(ParentDeclaration {
            type_id: TypeId::of::<P>(),
            type_name: short_type_name::<P>(),
            message: Some(message.into()),
        });
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }
}

#[derive(Debug, Clone)]
pub(crate) struct UniqueDeclaration {
    pub(crate) name: String,
    pub(crate) fields: Vec<String>,
}

/// Metadata declared by one entity type.
#[derive(Debug, Clone)]
pub struct EntityDeclaration {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) key_kind: FieldKind,
    pub(crate) table: Option<TableBinding>,
    pub(crate) view: Option<TableBinding>,
    pub(crate) display_name: Option<String>,
    pub(crate) delete_confirmation: Option<String>,
    pub(crate) fields: Vec<Field>,
    pub(crate) unique: Vec<UniqueDeclaration>,
}

impl EntityDeclaration {
    pub(crate) fn for_type<T: Entity>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: short_type_name::<T>(),
            key_kind: <T::Key as EntityKey>::KIND,
            table: None,
            view: None,
            display_name: None,
            delete_confirmation: None,
            fields: Vec::new(),
            unique: Vec::new(),
        }
    }

    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table = Some(TableBinding {
            schema: None,
            name: name.into(),
        });
        self
    }

    pub fn table_in(mut self, schema: impl Into<String>, name: impl Into<String>) -> Self {
        self.table = Some(TableBinding {
            schema: Some(schema.into()),
            name: name.into(),
        });
        self
    }

    /// Declares a read-only entity backed by store relation `relation`.
    pub fn view(mut self, relation: impl Into<String>) -> Self {
        self.view = Some(TableBinding {
            schema: None,
            name: relation.into(),
        });
        self
    }

    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn delete_confirmation(mut self, text: impl Into<String>) -> Self {
        self.delete_confirmation = Some(text.into());
        self
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Declares a unique constraint; store failures on it are reported under `name`.
    pub fn unique(mut self, name: impl Into<String>, fields: &[&str]) -> Self {
        self.unique.push(UniqueDeclaration {
            name: name.into(),
            fields: fields.iter().map(|field| (*field).to_string()).collect(),
        });
        self
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

/// Type name without its module path.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

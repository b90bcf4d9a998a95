//! Traits implemented by persisted record types.
//!
//! # Responsibility
//! - Expose key, column values, audit fields and flags of one record type.
//! - Rebuild records from result rows.
//!
//! # Invariants
//! - A zero key means the record has never been inserted.
//! - `field_values()` lists every declared non-key field, keyed by column name.

use super::declaration::{EntityDeclaration, FieldKind};
use super::validation::ValidationList;
use rusqlite::types::{ToSql, Value};
use rusqlite::Row;
use std::fmt::{Debug, Display};

/// Milliseconds since the Unix epoch, as stored in audit columns.
pub type EpochMillis = i64;

/// Integer types accepted as entity keys.
pub trait EntityKey:
    Copy + Default + PartialEq + Debug + Display + ToSql + Send + Sync + 'static
{
    const KIND: FieldKind;

    fn to_i64(self) -> i64;
    fn from_i64(value: i64) -> Option<Self>;
}

impl EntityKey for i32 {
    const KIND: FieldKind = FieldKind::Int;

    fn to_i64(self) -> i64 {
        i64::from(self)
    }

    fn from_i64(value: i64) -> Option<Self> {
        i32::try_from(value).ok()
    }
}

impl EntityKey for i64 {
    const KIND: FieldKind = FieldKind::Long;

    fn to_i64(self) -> i64 {
        self
    }

    fn from_i64(value: i64) -> Option<Self> {
        Some(value)
    }
}

/// Who performed an audited write.
pub enum AuditBy<'a> {
    /// Numeric audit column, stamped with the session user id.
    Id(&'a mut i64),
    /// Text audit column, stamped with the session user name.
    Name(&'a mut String),
}

/// Mutable views of the audit columns an entity carries.
#[derive(Default)]
pub struct AuditFields<'a> {
    pub created_on: Option<&'a mut EpochMillis>,
    pub created_by: Option<AuditBy<'a>>,
    pub modified_on: Option<&'a mut EpochMillis>,
    pub modified_by: Option<AuditBy<'a>>,
}

/// Column values of one record, excluding the key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldValues {
    values: Vec<(&'static str, Value)>,
}

impl FieldValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &'static str, value: impl Into<Value>) -> Self {
        self.push(field, value);
        self
    }

    pub fn push(&mut self, field: &'static str, value: impl Into<Value>) {
        self.values.push((field, value.into()));
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.values.iter().map(|(name, value)| (*name, value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A record type persisted through a session.
///
/// Implementations declare their metadata in `declare` and map themselves
/// to and from rows. Optional capabilities (audit columns, a globally unique
/// identifier, a logical-delete flag) are exposed by overriding the
/// accessor that returns `None` by default.
pub trait Entity: Sized + 'static {
    type Key: EntityKey;

    /// Adds table binding, fields and constraints to `entity`.
    fn declare(entity: EntityDeclaration) -> EntityDeclaration;

    fn key(&self) -> Self::Key;
    fn set_key(&mut self, key: Self::Key);

    fn field_values(&self) -> FieldValues;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;

    fn audit_fields(&mut self) -> AuditFields<'_> {
        AuditFields::default()
    }

    /// Column `UniqueIdentifier`, assigned a fresh 32-hex value on insert.
    fn unique_identifier(&mut self) -> Option<&mut String> {
        None
    }

    /// Logical-delete flag; when present, delete sets it instead of removing the row.
    fn deleted_flag(&mut self) -> Option<&mut bool> {
        None
    }

    /// Entity-level rules checked after the declarative field rules.
    fn validate(&self) -> ValidationList {
        ValidationList::new()
    }

    fn is_new(&self) -> bool {
        self.key() == Self::Key::default()
    }
}

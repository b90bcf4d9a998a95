//! Field-addressable validation results.
//!
//! # Responsibility
//! - Carry business-rule and constraint failures back to callers as data.
//!
//! # Invariants
//! - An empty list means the operation succeeded.
//! - Messages keep insertion order.
//! - A message not tied to one field uses the empty field name.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// One failure, addressed to a declared field or to the whole entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationMessage {
    pub field: String,
    pub message: String,
}

impl ValidationMessage {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        let field = field.into();
        let field = if field.trim().is_empty() {
            String::new()
        } else {
            field
        };
        Self {
            field,
            message: message.into(),
        }
    }

    pub fn is_general(&self) -> bool {
        self.field.is_empty()
    }
}

impl Display for ValidationMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_general() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Ordered list of validation failures; empty when valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationList {
    messages: Vec<ValidationMessage>,
}

impl ValidationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut list = Self::new();
        list.add(field, message);
        list
    }

    /// Builds a list holding one message with no field name.
    pub fn general(message: impl Into<String>) -> Self {
        Self::single("", message)
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.messages.push(ValidationMessage::new(field, message));
    }

    pub fn extend(&mut self, other: ValidationList) {
        self.messages.extend(other.messages);
    }

    pub fn is_valid(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ValidationMessage> {
        self.messages.iter()
    }

    /// Field names in message order, duplicates included.
    pub fn fields(&self) -> Vec<&str> {
        self.messages
            .iter()
            .map(|message| message.field.as_str())
            .collect()
    }

    pub fn messages_for(&self, field: &str) -> Vec<&str> {
        self.messages
            .iter()
            .filter(|message| message.field == field)
            .map(|message| message.message.as_str())
            .collect()
    }
}

impl Display for ValidationList {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (index, message) in self.messages.iter().enumerate() {
            if index > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{message}")?;
        }
        Ok(())
    }
}

impl IntoIterator for ValidationList {
    type Item = ValidationMessage;
    type IntoIter = std::vec::IntoIter<ValidationMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}

impl<'a> IntoIterator for &'a ValidationList {
    type Item = &'a ValidationMessage;
    type IntoIter = std::slice::Iter<'a, ValidationMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

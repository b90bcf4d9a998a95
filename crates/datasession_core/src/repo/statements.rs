//! SQL text derived once per entity type and cached per session.
//!
//! # Invariants
//! - Identifiers are always quoted; values are always bound.
//! - Non-key parameters follow the declared field order.

use crate::error::DataResult;
use crate::model::declaration::quote_identifier;
use crate::model::entity::FieldValues;
use crate::registry::EntityMetadata;
use rusqlite::types::Value;

const UNIQUE_IDENTIFIER_FIELD: &str = "UniqueIdentifier";

#[derive(Debug, Clone)]
pub(crate) struct EntityStatements {
    pub(crate) relation: String,
    pub(crate) select: String,
    pub(crate) key_column: Option<String>,
    columns: Vec<&'static str>,
    pub(crate) insert: Option<String>,
    pub(crate) update: Option<String>,
    pub(crate) delete: Option<String>,
    pub(crate) get_by_key: Option<String>,
    pub(crate) get_by_unique_identifier: Option<String>,
}

impl EntityStatements {
    pub(crate) fn build(metadata: &EntityMetadata) -> DataResult<Self> {
        let relation = metadata.relation()?.qualified();
        let columns: Vec<&'static str> = metadata.fields().iter().map(|f| f.name()).collect();
        let key_column = metadata.key_field().map(quote_identifier);

        let mut select_list: Vec<String> = Vec::with_capacity(columns.len() + 1);
        if let Some(key) = &key_column {
            select_list.push(key.clone());
        }
        select_list.extend(columns.iter().map(|column| quote_identifier(column)));
        let select = format!("SELECT {} FROM {}", select_list.join(", "), relation);

        let get_by_key = key_column
            .as_ref()
            .map(|key| format!("{select} WHERE {key} = ?1"));
        let get_by_unique_identifier = metadata.field(UNIQUE_IDENTIFIER_FIELD).map(|_| {
            format!(
                "{select} WHERE {} = ?1",
                quote_identifier(UNIQUE_IDENTIFIER_FIELD)
            )
        });

        let (insert, update, delete) = match (metadata.table(), &key_column) {
            (Some(table), Some(key)) => {
                let table = table.qualified();
                let quoted: Vec<String> =
                    columns.iter().map(|column| quote_identifier(column)).collect();
                let placeholders: Vec<String> =
                    (1..=columns.len()).map(|index| format!("?{index}")).collect();
                let insert = if columns.is_empty() {
                    format!("INSERT INTO {table} DEFAULT VALUES")
                } else {
                    format!(
                        "INSERT INTO {table} ({}) VALUES ({})",
                        quoted.join(", "),
                        placeholders.join(", ")
                    )
                };
                let assignments: Vec<String> = quoted
                    .iter()
                    .zip(&placeholders)
                    .map(|(column, placeholder)| format!("{column} = {placeholder}"))
                    .collect();
                let update = if assignments.is_empty() {
                    format!("UPDATE {table} SET {key} = {key} WHERE {key} = ?1")
                } else {
                    format!(
                        "UPDATE {table} SET {} WHERE {key} = ?{}",
                        assignments.join(", "),
                        columns.len() + 1
                    )
                };
                let delete = format!("DELETE FROM {table} WHERE {key} = ?1");
                (Some(insert), Some(update), Some(delete))
            }
            _ => (None, None, None),
        };

        Ok(Self {
            relation,
            select,
            key_column,
            columns,
            insert,
            update,
            delete,
            get_by_key,
            get_by_unique_identifier,
        })
    }

    pub(crate) fn insert_params(&self, values: &FieldValues) -> Vec<Value> {
        self.columns
            .iter()
            .map(|column| values.get(column).cloned().unwrap_or(Value::Null))
            .collect()
    }

    pub(crate) fn update_params(&self, values: &FieldValues, key: i64) -> Vec<Value> {
        let mut params = self.insert_params(values);
        params.push(Value::Integer(key));
        params
    }
}

//! Minimal typed query over one entity relation.
//!
//! # Responsibility
//! - Filter, order and page rows of one entity by declared fields.
//! - Render store-native SQL for fetches, counts and bulk deletes.
//!
//! # Invariants
//! - Filters reference declared fields only; unknown names fail at render.
//! - Identifiers are quoted and values are bound, never inlined.
//! - Results are detached values; nothing is tracked after fetch.

use crate::error::{DataError, DataResult};
use crate::model::declaration::quote_identifier;
use crate::model::entity::{Entity, EntityKey};
use crate::registry::EntityMetadata;
use crate::session::Session;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use std::marker::PhantomData;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Filter {
    Compare {
        column: &'static str,
        operator: &'static str,
        value: Value,
    },
    IsNull(&'static str),
    IsNotNull(&'static str),
    In {
        column: &'static str,
        values: Vec<Value>,
    },
}

pub struct Query<'s, T: Entity> {
    session: &'s Session,
    metadata: &'s EntityMetadata,
    filters: Vec<Filter>,
    order: Vec<(&'static str, bool)>,
    limit: Option<u64>,
    offset: Option<u64>,
    timeout: Option<Duration>,
    unknown_field: Option<String>,
    _entity: PhantomData<fn() -> T>,
}

impl<'s, T: Entity> Query<'s, T> {
    pub(crate) fn new(
        session: &'s Session,
        metadata: &'s EntityMetadata,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            session,
            metadata,
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            timeout,
            unknown_field: None,
            _entity: PhantomData,
        }
    }

    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.compare(field, "=", value.into())
    }

    pub fn ne(self, field: &str, value: impl Into<Value>) -> Self {
        self.compare(field, "<>", value.into())
    }

    pub fn lt(self, field: &str, value: impl Into<Value>) -> Self {
        self.compare(field, "<", value.into())
    }

    pub fn le(self, field: &str, value: impl Into<Value>) -> Self {
        self.compare(field, "<=", value.into())
    }

    pub fn gt(self, field: &str, value: impl Into<Value>) -> Self {
        self.compare(field, ">", value.into())
    }

    pub fn ge(self, field: &str, value: impl Into<Value>) -> Self {
        self.compare(field, ">=", value.into())
    }

    /// SQL `LIKE` with the store's default case rules.
    pub fn like(self, field: &str, pattern: impl Into<String>) -> Self {
        self.compare(field, "LIKE", Value::Text(pattern.into()))
    }

    pub fn is_null(mut self, field: &str) -> Self {
        if let Some(column) = self.resolve(field) {
            self.filters.push(Filter::IsNull(column));
        }
        self
    }

    pub fn is_not_null(mut self, field: &str) -> Self {
        if let Some(column) = self.resolve(field) {
            self.filters.push(Filter::IsNotNull(column));
        }
        self
    }

    /// Matches any of `values`; an empty list matches nothing.
    pub fn in_values<V: Into<Value>>(
        mut self,
        field: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        if let Some(column) = self.resolve(field) {
            self.filters.push(Filter::In {
                column,
                values: values.into_iter().map(Into::into).collect(),
            });
        }
        self
    }

    pub fn order_by(mut self, field: &str) -> Self {
        if let Some(column) = self.resolve(field) {
            self.order.push((column, false));
        }
        self
    }

    pub fn order_by_desc(mut self, field: &str) -> Self {
        if let Some(column) = self.resolve(field) {
            self.order.push((column, true));
        }
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Renders the select statement and its bound values.
    pub fn to_sql(&self) -> DataResult<(String, Vec<Value>)> {
        let statements = self.session.statements(self.metadata)?;
        self.render(&statements.select)
    }

    pub fn fetch(self) -> DataResult<Vec<T>> {
        let (sql, bind_values) = self.to_sql()?;
        self.session.run(self.metadata, self.timeout, |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(bind_values.iter()))?;
            let mut items = Vec::new();
            while let Some(row) = rows.next()? {
                items.push(T::from_row(row)?);
            }
            Ok(items)
        })
    }

    pub fn first(self) -> DataResult<Option<T>> {
        let mut items = self.limit(1).fetch()?;
        Ok(items.pop())
    }

    pub fn count(self) -> DataResult<u64> {
        let (inner, bind_values) = self.to_sql()?;
        let sql = format!("SELECT COUNT(*) FROM ({inner})");
        let count = self.session.run(self.metadata, self.timeout, |conn| {
            conn.query_row(&sql, params_from_iter(bind_values.iter()), |row| {
                row.get::<_, i64>(0)
            })
        })?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    pub fn keys(self) -> DataResult<Vec<T::Key>> {
        let key = quote_identifier(self.metadata.require_key()?);
        let statements = self.session.statements(self.metadata)?;
        let select = format!("SELECT {key} FROM {}", statements.relation);
        let (sql, bind_values) = self.render(&select)?;

        let raw = self.session.run(self.metadata, self.timeout, |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(bind_values.iter()))?;
            let mut keys = Vec::new();
            while let Some(row) = rows.next()? {
                keys.push(row.get::<_, i64>(0)?);
            }
            Ok(keys)
        })?;

        raw.into_iter()
            .map(|value| {
                T::Key::from_i64(value).ok_or_else(|| DataError::KeyOutOfRange {
                    entity: self.metadata.name().to_string(),
                    key: value,
                })
            })
            .collect()
    }

    /// Renders `DELETE` of every row this query selects.
    pub(crate) fn to_delete_sql(&self) -> DataResult<(String, Vec<Value>)> {
        let table = self.metadata.writable_table()?.qualified();
        let key = quote_identifier(self.metadata.require_key()?);
        let select = format!("SELECT {key} FROM {table}");
        let (inner, bind_values) = self.render(&select)?;
        Ok((
            format!("DELETE FROM {table} WHERE {key} IN ({inner})"),
            bind_values,
        ))
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn metadata(&self) -> &'s EntityMetadata {
        self.metadata
    }

    fn compare(mut self, field: &str, operator: &'static str, value: Value) -> Self {
        if let Some(column) = self.resolve(field) {
            self.filters.push(Filter::Compare {
                column,
                operator,
                value,
            });
        }
        self
    }

    fn resolve(&mut self, field: &str) -> Option<&'static str> {
        let column = self.metadata.column(field);
        if column.is_none() && self.unknown_field.is_none() {
            self.unknown_field = Some(field.to_string());
        }
        column
    }

    fn render(&self, select: &str) -> DataResult<(String, Vec<Value>)> {
        if let Some(field) = &self.unknown_field {
            return Err(DataError::UnknownField {
                entity: self.metadata.name().to_string(),
                field: field.clone(),
            });
        }

        let mut sql = format!("{select} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        for filter in &self.filters {
            match filter {
                Filter::Compare {
                    column,
                    operator,
                    value,
                } => {
                    sql.push_str(&format!(" AND {} {operator} ?", quote_identifier(column)));
                    bind_values.push(value.clone());
                }
                Filter::IsNull(column) => {
                    sql.push_str(&format!(" AND {} IS NULL", quote_identifier(column)));
                }
                Filter::IsNotNull(column) => {
                    sql.push_str(&format!(" AND {} IS NOT NULL", quote_identifier(column)));
                }
                Filter::In { values, .. } if values.is_empty() => {
                    sql.push_str(" AND 1 = 0");
                }
                Filter::In { column, values } => {
                    let placeholders = vec!["?"; values.len()].join(", ");
                    sql.push_str(&format!(
                        " AND {} IN ({placeholders})",
                        quote_identifier(column)
                    ));
                    bind_values.extend(values.iter().cloned());
                }
            }
        }

        if !self.order.is_empty() {
            let order: Vec<String> = self
                .order
                .iter()
                .map(|(column, descending)| {
                    let direction = if *descending { "DESC" } else { "ASC" };
                    format!("{} {direction}", quote_identifier(column))
                })
                .collect();
            sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
        }

        match (self.limit, self.offset) {
            (Some(limit), offset) => {
                sql.push_str(" LIMIT ?");
                bind_values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
                if let Some(offset) = offset {
                    sql.push_str(" OFFSET ?");
                    bind_values.push(Value::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));
                }
            }
            (None, Some(offset)) => {
                sql.push_str(" LIMIT -1 OFFSET ?");
                bind_values.push(Value::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));
            }
            (None, None) => {}
        }

        Ok((sql, bind_values))
    }
}

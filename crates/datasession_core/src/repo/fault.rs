//! Classification of store failures into constraint faults.
//!
//! # Responsibility
//! - Recognize unique-index and foreign-key violations in driver errors.
//! - Report which index, columns or field were involved when the engine
//!   says so.
//!
//! # Invariants
//! - Structured SQLite result codes are consulted before message text.
//! - Anything not recognized is `StoreFault::Unrecognized`; the caller then
//!   propagates the original error.

use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::ffi;
use rusqlite::ErrorCode;

static SQLITE_UNIQUE_INDEX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^UNIQUE constraint failed: index '(?P<index>[^']+)'")
        .expect("valid sqlite unique index regex")
});
static SQLITE_UNIQUE_COLUMNS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:UNIQUE|PRIMARY KEY) constraint failed: (?P<columns>.+)$")
        .expect("valid sqlite unique columns regex")
});
static DUPLICATE_KEY_INDEX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Cannot insert duplicate key row in object '[^']+' with unique index '(?P<index>[^']+)'")
        .expect("valid duplicate key regex")
});
static UNIQUE_KEY_CONSTRAINT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Violation of UNIQUE KEY constraint '(?P<index>[^']+)'")
        .expect("valid unique key regex")
});
static FOREIGN_KEY_CONSTRAINT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"conflicted with the FOREIGN KEY constraint "(?P<constraint>[^"]+)""#)
        .expect("valid foreign key regex")
});

/// Constraint violation recovered from a store failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreFault {
    /// Unique index reported by name.
    UniqueIndex(String),
    /// Unique violation reported by the columns involved.
    UniqueColumns(Vec<String>),
    /// Foreign-key violation; the field is known only when the engine names it.
    ForeignKey(Option<String>),
    Unrecognized,
}

/// Turns driver errors into [`StoreFault`]s for one entity.
pub trait FaultTranslator: Send + Sync {
    fn classify(&self, entity: &str, error: &rusqlite::Error) -> StoreFault;
}

/// Uses SQLite extended result codes, falling back to SQLite message text.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteFaultTranslator;

impl FaultTranslator for SqliteFaultTranslator {
    fn classify(&self, _entity: &str, error: &rusqlite::Error) -> StoreFault {
        let rusqlite::Error::SqliteFailure(native, message) = error else {
            return StoreFault::Unrecognized;
        };
        if native.code != ErrorCode::ConstraintViolation {
            return StoreFault::Unrecognized;
        }
        let message = message.as_deref().unwrap_or_default();

        match native.extended_code {
            ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                parse_sqlite_unique(message).unwrap_or(StoreFault::Unrecognized)
            }
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => StoreFault::ForeignKey(None),
            _ => classify_sqlite_message(message),
        }
    }
}

fn classify_sqlite_message(message: &str) -> StoreFault {
    if let Some(fault) = parse_sqlite_unique(message) {
        return fault;
    }
    if message.starts_with("FOREIGN KEY constraint failed") {
        return StoreFault::ForeignKey(None);
    }
    StoreFault::Unrecognized
}

fn parse_sqlite_unique(message: &str) -> Option<StoreFault> {
    if let Some(captures) = SQLITE_UNIQUE_INDEX_RE.captures(message) {
        return Some(StoreFault::UniqueIndex(captures["index"].to_string()));
    }
    let captures = SQLITE_UNIQUE_COLUMNS_RE.captures(message)?;
    let columns = captures["columns"]
        .split(',')
        .map(|column| {
            let column = column.trim();
            column.rsplit('.').next().unwrap_or(column).to_string()
        })
        .filter(|column| !column.is_empty())
        .collect();
    Some(StoreFault::UniqueColumns(columns))
}

/// Parses engines that only report text, naming foreign keys `FK_{Entity}_{Field}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageFaultTranslator;

impl FaultTranslator for MessageFaultTranslator {
    fn classify(&self, entity: &str, error: &rusqlite::Error) -> StoreFault {
        let text = match error {
            rusqlite::Error::SqliteFailure(_, Some(message)) => message.clone(),
            other => other.to_string(),
        };

        if let Some(captures) = DUPLICATE_KEY_INDEX_RE
            .captures(&text)
            .or_else(|| UNIQUE_KEY_CONSTRAINT_RE.captures(&text))
        {
            return StoreFault::UniqueIndex(captures["index"].to_string());
        }

        if let Some(captures) = FOREIGN_KEY_CONSTRAINT_RE.captures(&text) {
            let prefix = format!("FK_{entity}_");
            let field = captures["constraint"]
                .strip_prefix(prefix.as_str())
                .map(str::to_string);
            return StoreFault::ForeignKey(field);
        }

        classify_sqlite_message(&text)
    }
}

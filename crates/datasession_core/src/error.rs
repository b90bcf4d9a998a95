//! Error type for session, repository and transaction operations.
//!
//! # Responsibility
//! - Report lookup, ordering and store failures that callers cannot handle
//!   as business results.
//!
//! # Invariants
//! - Business failures (field rules, unique and parent violations,
//!   concurrency conflicts) never surface here; they are `ValidationList`s.

use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type DataResult<T> = Result<T, DataError>;

#[derive(Debug)]
pub enum DataError {
    Db(DbError),
    EntityNotFound(String),
    EntityMissingContext(String),
    EntityMissingKey(String),
    ContextNotFound(String),
    ReadOnlyView(String),
    UnknownField {
        entity: String,
        field: String,
    },
    /// A savepoint was released while another one was on top of the stack.
    TransactionOrder {
        expected: Option<String>,
        actual: String,
    },
    TransactionClosed,
    Timeout {
        context: String,
        timeout_ms: u128,
    },
    KeyOutOfRange {
        entity: String,
        key: i64,
    },
    /// The session was re-entered from a callback running on its own connection.
    SessionBusy,
    RegistryNotInitialized,
}

impl DataError {
    /// Returns the driver error when this failure came from the store.
    pub fn sqlite_error(&self) -> Option<&rusqlite::Error> {
        match self {
            Self::Db(DbError::Sqlite(err)) => Some(err),
            _ => None,
        }
    }
}

impl Display for DataError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::EntityNotFound(entity) => {
                write!(f, "entity `{entity}` is not registered")
            }
            Self::EntityMissingContext(entity) => {
                write!(f, "entity `{entity}` is not bound to a context")
            }
            Self::EntityMissingKey(entity) => {
                write!(f, "entity `{entity}` has no key field")
            }
            Self::ContextNotFound(context) => {
                write!(f, "context `{context}` is not configured")
            }
            Self::ReadOnlyView(entity) => {
                write!(f, "entity `{entity}` is a read-only view")
            }
            Self::UnknownField { entity, field } => {
                write!(f, "entity `{entity}` has no field `{field}`")
            }
            Self::TransactionOrder { expected, actual } => match expected {
                Some(expected) => write!(
                    f,
                    "nested transactions must be committed in creation order: expected savepoint {expected}, got {actual}"
                ),
                None => write!(
                    f,
                    "nested transactions must be committed in creation order: no savepoint is open, got {actual}"
                ),
            },
            Self::TransactionClosed => write!(f, "transaction is no longer active"),
            Self::Timeout {
                context,
                timeout_ms,
            } => write!(
                f,
                "command on context `{context}` exceeded timeout of {timeout_ms} ms"
            ),
            Self::KeyOutOfRange { entity, key } => {
                write!(f, "generated key {key} does not fit the key type of `{entity}`")
            }
            Self::SessionBusy => {
                write!(f, "session is in use by a running connection callback")
            }
            Self::RegistryNotInitialized => {
                write!(f, "process-wide entity registry is not initialized")
            }
        }
    }
}

impl Error for DataError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for DataError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for DataError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

//! SQLite connection bootstrap and per-context schema migrations.
//!
//! # Responsibility
//! - Open and configure SQLite connections for one context grouping.
//! - Apply that context's schema migrations in deterministic order.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - No entity data is read or written before migrations succeed.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::open_context;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        context: String,
        db_version: u32,
        latest_supported: u32,
    },
    InvalidMigrationOrder {
        context: String,
        version: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                context,
                db_version,
                latest_supported,
            } => write!(
                f,
                "context `{context}` schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::InvalidMigrationOrder { context, version } => write!(
                f,
                "context `{context}` migration {version} is not greater than the previous migration"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } | Self::InvalidMigrationOrder { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

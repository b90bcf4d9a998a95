//! Data-access session layer over SQLite.
//!
//! Entity types are declared once in an [`EntityRegistry`]; a [`Session`]
//! then gives typed query, save and delete access with nested transactions
//! and constraint failures reported as [`ValidationList`]s.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod registry;
pub mod repo;
pub mod service;
pub mod session;

pub use config::{ContextConfig, DataAccessConfig, DatabaseLocation, Migration};
pub use db::{DbError, DbResult};
pub use error::{DataError, DataResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::declaration::{EntityDeclaration, Field, FieldKind, TableBinding};
pub use model::entity::{AuditBy, AuditFields, Entity, EntityKey, EpochMillis, FieldValues};
pub use model::validation::{ValidationList, ValidationMessage};
pub use registry::{
    ContextBinding, EntityMetadata, EntityRegistry, KeyFault, RegistryBuilder, RegistryError,
    RegistryResult, UniqueFieldFault,
};
pub use repo::fault::{FaultTranslator, MessageFaultTranslator, SqliteFaultTranslator, StoreFault};
pub use repo::query::Query;
pub use repo::repository::Repository;
pub use service::entity_model::{DefaultHooks, EntityHooks, EntityModel};
pub use session::transaction::{ChildTransaction, OuterTransaction};
pub use session::{Session, Transaction};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

//! Persistence for declared entities.
//!
//! # Responsibility
//! - Keep SQL details inside the repository boundary.
//! - Recover constraint violations from store failures.

pub mod fault;
pub mod query;
pub mod repository;
pub(crate) mod statements;

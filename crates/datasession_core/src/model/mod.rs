//! Entity contracts and declarative metadata inputs.
//!
//! # Responsibility
//! - Define the traits persisted record types implement.
//! - Define the typed declaration calls used at registration time.
//! - Define the field-addressable validation result.

pub mod declaration;
pub mod entity;
pub mod validation;

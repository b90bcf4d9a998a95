//! Use-case layer over repositories.
//!
//! # Responsibility
//! - Run per-entity lifecycle hooks around repository writes.

pub mod entity_model;

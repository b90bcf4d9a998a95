//! Connection settings per context grouping.
//!
//! # Responsibility
//! - Describe where each context grouping stores its data.
//! - Carry the schema migrations applied when a context connection opens.
//!
//! # Invariants
//! - Context names match the names used in registry context bindings.
//! - Migration versions are strictly increasing within one context.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Connection settings for every declared context grouping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataAccessConfig {
    #[serde(default)]
    pub contexts: BTreeMap<String, ContextConfig>,
}

impl DataAccessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the settings of one context grouping.
    pub fn with_context(mut self, name: impl Into<String>, config: ContextConfig) -> Self {
        self.contexts.insert(name.into(), config);
        self
    }

    pub fn context(&self, name: &str) -> Option<&ContextConfig> {
        self.contexts.get(name)
    }
}

/// Storage location of one context grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatabaseLocation {
    File { path: PathBuf },
    Memory,
}

/// Connection settings for one context grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    pub location: DatabaseLocation,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Applied to calls that do not pass their own timeout.
    #[serde(default)]
    pub command_timeout_ms: Option<u64>,
    #[serde(default)]
    pub migrations: Vec<Migration>,
}

impl ContextConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::with_location(DatabaseLocation::File { path: path.into() })
    }

    pub fn memory() -> Self {
        Self::with_location(DatabaseLocation::Memory)
    }

    fn with_location(location: DatabaseLocation) -> Self {
        Self {
            location,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            command_timeout_ms: None,
            migrations: Vec::new(),
        }
    }

    pub fn busy_timeout_ms(mut self, value: u64) -> Self {
        self.busy_timeout_ms = value;
        self
    }

    pub fn command_timeout_ms(mut self, value: u64) -> Self {
        self.command_timeout_ms = Some(value);
        self
    }

    pub fn migration(mut self, version: u32, sql: impl Into<String>) -> Self {
        self.migrations.push(Migration {
            version,
            sql: sql.into(),
        });
        self
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }

    pub fn is_memory(&self) -> bool {
        matches!(self.location, DatabaseLocation::Memory)
    }
}

/// One schema step, mirrored to `PRAGMA user_version` once applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    pub version: u32,
    pub sql: String,
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

#[cfg(test)]
mod tests {
    use super::{ContextConfig, DataAccessConfig, DatabaseLocation};
    use std::time::Duration;

    #[test]
    fn deserializes_with_defaults() {
        let raw = r#"{
            "contexts": {
                "HrContext": { "location": { "kind": "file", "path": "/tmp/hr.db" } },
                "AuditContext": {
                    "location": { "kind": "memory" },
                    "command_timeout_ms": 250,
                    "migrations": [{ "version": 1, "sql": "CREATE TABLE t (id INTEGER PRIMARY KEY);" }]
                }
            }
        }"#;

        let config: DataAccessConfig = serde_json::from_str(raw).expect("config should parse");
        let hr = config.context("HrContext").expect("hr context should exist");
        assert_eq!(hr.busy_timeout(), Duration::from_secs(5));
        assert_eq!(hr.command_timeout(), None);
        assert!(matches!(hr.location, DatabaseLocation::File { .. }));

        let audit = config
            .context("AuditContext")
            .expect("audit context should exist");
        assert!(audit.is_memory());
        assert_eq!(audit.command_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(audit.migrations.len(), 1);
    }

    #[test]
    fn builder_accumulates_migrations() {
        let config = ContextConfig::memory()
            .busy_timeout_ms(100)
            .migration(1, "CREATE TABLE a (id INTEGER PRIMARY KEY);")
            .migration(2, "CREATE TABLE b (id INTEGER PRIMARY KEY);");

        assert_eq!(config.busy_timeout(), Duration::from_millis(100));
        let versions: Vec<u32> = config.migrations.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2]);
    }
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::MigrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Mysql,
    Postgres,
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Engine::Mysql => write!(f, "mysql"),
            Engine::Postgres => write!(f, "postgres"),
        }
    }
}

/// Connection parameters for one side of the migration. The `options` map is
/// passed through to the driver URL untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionParams {
    #[serde(rename = "type")]
    pub engine: Engine,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: String,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl ConnectionParams {
    pub fn validate(&self) -> Result<(), MigrationError> {
        if self.database.is_empty() {
            return Err(MigrationError::config(format!(
                "{}: database name is required",
                self.engine
            )));
        }
        Ok(())
    }
}

/// What to do with MySQL zero dates (`0000-00-00 00:00:00`), which have no
/// PostgreSQL representation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZeroDatePolicy {
    /// Translate to NULL and warn.
    #[default]
    Null,
    /// Substitute the Unix epoch.
    Epoch,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnumMapping {
    /// VARCHAR sized to the longest variant, with a CHECK constraint.
    #[default]
    Varchar,
    /// CREATE TYPE … AS ENUM emitted ahead of the table.
    Native,
}

/// Disposition of a target table whose row pipeline failed partway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Leave committed batches in place for inspection.
    #[default]
    Leave,
    /// Drop the partially-loaded table.
    Drop,
}

fn default_batch_size() -> usize {
    1000
}
fn default_workers() -> usize {
    4
}
fn default_commit_every() -> usize {
    1
}
fn default_true() -> bool {
    true
}
fn default_progress_every() -> u64 {
    10_000
}
fn default_connect_timeout() -> u64 {
    30
}

/// Immutable snapshot taken at `migrate()` entry; edits made to the migrator
/// afterwards do not affect a running migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationOptions {
    /// Include patterns (`*`/`?` globs, or literal names). Empty = all tables.
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub exclude_tables: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Commit every N batches.
    #[serde(default = "default_commit_every")]
    pub commit_every: usize,
    #[serde(default = "default_true")]
    pub drop_target: bool,
    #[serde(default = "default_true")]
    pub migrate_indexes: bool,
    #[serde(default = "default_true")]
    pub migrate_foreign_keys: bool,
    /// Create secondary indexes after data load (much faster on the target).
    #[serde(default = "default_true")]
    pub indexes_after_data: bool,
    #[serde(default)]
    pub stop_on_error: bool,
    /// Optional per-table SQL fragment appended as `WHERE <fragment>`.
    #[serde(default)]
    pub where_clauses: HashMap<String, String>,
    #[serde(default)]
    pub zero_date: ZeroDatePolicy,
    #[serde(default)]
    pub enum_mapping: EnumMapping,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    /// Row-count cadence for data-phase progress events.
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Optional cap on a single batch insert; a timeout fails the table the
    /// same way a driver error does.
    #[serde(default)]
    pub statement_timeout_secs: Option<u64>,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        MigrationOptions {
            tables: Vec::new(),
            exclude_tables: Vec::new(),
            batch_size: default_batch_size(),
            workers: default_workers(),
            commit_every: default_commit_every(),
            drop_target: true,
            migrate_indexes: true,
            migrate_foreign_keys: true,
            indexes_after_data: true,
            stop_on_error: false,
            where_clauses: HashMap::new(),
            zero_date: ZeroDatePolicy::default(),
            enum_mapping: EnumMapping::default(),
            on_failure: FailurePolicy::default(),
            progress_every: default_progress_every(),
            connect_timeout_secs: default_connect_timeout(),
            statement_timeout_secs: None,
        }
    }
}

impl MigrationOptions {
    pub fn validate(&self) -> Result<(), MigrationError> {
        if self.batch_size == 0 {
            return Err(MigrationError::config("batch_size must be at least 1"));
        }
        if self.workers == 0 {
            return Err(MigrationError::config("workers must be at least 1"));
        }
        if self.commit_every == 0 {
            return Err(MigrationError::config("commit_every must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_buffer")]
    pub buffer_size: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_buffer() -> usize {
    1000
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            level: default_log_level(),
            buffer_size: default_log_buffer(),
        }
    }
}

/// The configuration document wrappers feed to the engine, usually loaded
/// from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationDocument {
    pub source: ConnectionParams,
    pub target: ConnectionParams,
    #[serde(default)]
    pub options: MigrationOptions,
    /// User overrides consulted before the built-in type table, keyed by the
    /// source type (`enum`, `char(36)`, …) lowercased.
    #[serde(default)]
    pub type_mappings: HashMap<String, String>,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl MigrationDocument {
    pub fn from_yaml(text: &str) -> Result<Self, MigrationError> {
        let doc: MigrationDocument = serde_yaml::from_str(text)
            .map_err(|e| MigrationError::config(format!("invalid configuration: {}", e)))?;
        doc.validate()?;
        Ok(doc)
    }

    pub fn validate(&self) -> Result<(), MigrationError> {
        self.source.validate()?;
        self.target.validate()?;
        self.options.validate()?;
        if self.source.engine != Engine::Mysql {
            return Err(MigrationError::config(
                "source engine must be a MySQL-family database",
            ));
        }
        if self.target.engine != Engine::Postgres {
            return Err(MigrationError::config(
                "target engine must be a PostgreSQL-family database",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
source:
  type: mysql
  host: db.internal
  port: 3306
  username: app
  password: secret
  database: shop
target:
  type: postgres
  host: localhost
  database: shop
options:
  tables: ["user_*"]
  exclude_tables: ["*_log"]
  batch_size: 500
  workers: 2
  drop_target: true
  where_clauses:
    orders: "created_at >= '2024-01-01'"
type_mappings:
  enum: varchar(32)
logging:
  level: debug
"#;

    #[test]
    fn parses_yaml_document() {
        let doc = MigrationDocument::from_yaml(SAMPLE).unwrap();
        assert_eq!(doc.source.engine, Engine::Mysql);
        assert_eq!(doc.source.port, Some(3306));
        assert_eq!(doc.options.batch_size, 500);
        assert_eq!(doc.options.workers, 2);
        assert_eq!(doc.options.tables, vec!["user_*"]);
        assert_eq!(doc.type_mappings.get("enum").unwrap(), "varchar(32)");
        assert_eq!(doc.logging.level, "debug");
        assert_eq!(
            doc.options.where_clauses.get("orders").unwrap(),
            "created_at >= '2024-01-01'"
        );
    }

    #[test]
    fn defaults_fill_missing_options() {
        let minimal = r#"
source: { type: mysql, database: a }
target: { type: postgres, database: b }
"#;
        let doc = MigrationDocument::from_yaml(minimal).unwrap();
        assert_eq!(doc.options.batch_size, 1000);
        assert_eq!(doc.options.workers, 4);
        assert!(doc.options.drop_target);
        assert!(doc.options.migrate_indexes);
        assert!(doc.options.migrate_foreign_keys);
        assert_eq!(doc.options.zero_date, ZeroDatePolicy::Null);
        assert_eq!(doc.options.enum_mapping, EnumMapping::Varchar);
    }

    #[test]
    fn rejects_swapped_engines() {
        let swapped = r#"
source: { type: postgres, database: a }
target: { type: mysql, database: b }
"#;
        assert!(MigrationDocument::from_yaml(swapped).is_err());
    }

    #[test]
    fn rejects_zero_batch_size() {
        let mut options = MigrationOptions::default();
        options.batch_size = 0;
        assert!(options.validate().is_err());
    }

    #[test]
    fn document_roundtrips_from_disk() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let text = std::fs::read_to_string(file.path()).unwrap();
        let doc = MigrationDocument::from_yaml(&text).unwrap();
        assert_eq!(doc.target.engine, Engine::Postgres);
    }
}

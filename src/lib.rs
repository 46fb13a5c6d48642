//! dbshift - one-shot migration of a MySQL-family database into a
//! PostgreSQL-family database.
//!
//! The engine translates table structure (types, defaults, identity columns,
//! indexes, foreign keys), streams row data in bounded batches through
//! parameterized bulk inserts, orders tables by FK dependency with deferred
//! FK installation, and resyncs identity sequences after the copy.
//!
//! Wrappers (CLI, GUI) drive the [`Migrator`] API and consume progress
//! through [`models::ProgressEvent`] callbacks; this crate has no user
//! interface of its own.

pub mod config;
pub mod drivers;
pub mod error;
pub mod logger;
pub mod migrator;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod pool_manager;
pub mod schema;
pub mod selection;
pub mod topo;
pub mod type_map;
pub mod value;

pub use config::{
    ConnectionParams, Engine, EnumMapping, FailurePolicy, LoggingSettings, MigrationDocument,
    MigrationOptions, ZeroDatePolicy,
};
pub use error::MigrationError;
pub use migrator::Migrator;
pub use models::{
    ColumnDescriptor, ConnectionCheck, ForeignKeyDescriptor, IndexDescriptor, MigrationPlan,
    MigrationResult, Phase, ProgressEvent, TableDescriptor, TableResult, TableStatus,
};
pub use orchestrator::{create_cancellation_token, CancellationToken, ProgressCallback};
pub use type_map::{LogicalKind, TypeMapper};
pub use value::SqlValue;

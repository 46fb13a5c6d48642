use serde::{Deserialize, Serialize};

use crate::config::MigrationOptions;
use crate::type_map::LogicalKind;

/// Provenance of a column default: a plain literal that can be re-quoted for
/// the target, or an engine function that needs dialect translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefaultKind {
    Literal,
    EngineFunction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultValue {
    pub expr: String,
    pub kind: DefaultKind,
}

/// Engine-neutral description of one column, built once from live
/// introspection and immutable for the duration of a migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Logical kind parsed from the engine type; `Unknown` aborts schema
    /// translation unless a user override maps the raw type.
    pub kind: LogicalKind,
    /// The engine's own type text (e.g. `int(10) unsigned`), kept for
    /// override lookup and error reporting.
    pub raw_type: String,
    pub nullable: bool,
    pub default: Option<DefaultValue>,
    /// Server-generated monotonically increasing column (AUTO_INCREMENT).
    pub identity: bool,
    /// Dense, zero-based position; row tuples match this ordering exactly.
    pub ordinal: usize,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    /// Column names in index order.
    pub columns: Vec<String>,
    pub unique: bool,
    pub primary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyDescriptor {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_update: Option<String>,
    pub on_delete: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    /// Primary key first if present.
    pub indexes: Vec<IndexDescriptor>,
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
    /// Engine-reported estimate, used for progress totals only.
    pub row_estimate: u64,
    pub byte_size: u64,
}

impl TableDescriptor {
    pub fn primary_key(&self) -> Option<&IndexDescriptor> {
        self.indexes.iter().find(|i| i.primary)
    }

    /// Identity columns needing a sequence resync after row copy.
    pub fn identity_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| c.identity)
    }
}

/// Finalized before any DDL runs: tables in FK-dependency order plus the
/// options snapshot taken at `migrate()` entry.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    /// Topologically sorted: a table never precedes a table it references,
    /// except inside `cyclic`.
    pub tables: Vec<TableDescriptor>,
    /// Tables involved in an FK cycle; their load order ignores in-cycle
    /// dependencies and all their FKs are installed in the post-step.
    pub cyclic: Vec<String>,
    pub options: MigrationOptions,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableStatus {
    Success,
    Failed,
    Skipped,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableResult {
    pub table: String,
    pub status: TableStatus,
    pub rows_copied: u64,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// Zero-based index of the batch that failed, when `status` is `Failed`
    /// from a data error.
    pub failed_batch: Option<usize>,
}

impl TableResult {
    pub fn skipped(table: &str, reason: &str) -> Self {
        TableResult {
            table: table.to_string(),
            status: TableStatus::Skipped,
            rows_copied: 0,
            duration_ms: 0,
            error: Some(reason.to_string()),
            failed_batch: None,
        }
    }

    pub fn cancelled(table: &str) -> Self {
        TableResult {
            table: table.to_string(),
            status: TableStatus::Cancelled,
            rows_copied: 0,
            duration_ms: 0,
            error: None,
            failed_batch: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationResult {
    pub tables: Vec<TableResult>,
    pub total_rows: u64,
    pub tables_migrated: usize,
    pub tables_failed: usize,
    pub tables_skipped: usize,
    pub cancelled: bool,
    /// Deferred FK installs or sequence resyncs that failed; data stays in
    /// place, the constraint or resync is absent.
    pub post_step_errors: Vec<String>,
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

impl MigrationResult {
    /// Exit code contract for CLI wrappers: 0 success, 3 partial, 4 cancelled.
    pub fn exit_code(&self) -> i32 {
        if self.cancelled {
            4
        } else if self.tables_failed > 0 || !self.post_step_errors.is_empty() {
            3
        } else {
            0
        }
    }

    pub fn record(&mut self, result: TableResult) {
        match result.status {
            TableStatus::Success => {
                self.tables_migrated += 1;
                self.total_rows += result.rows_copied;
            }
            TableStatus::Failed => self.tables_failed += 1,
            TableStatus::Skipped => self.tables_skipped += 1,
            TableStatus::Cancelled => self.cancelled = true,
        }
        self.tables.push(result);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Connect,
    Plan,
    Ddl,
    Data,
    Post,
    Done,
    Error,
}

/// Emitted at every phase transition and at a row-count cadence while
/// copying. Callbacks run on the worker that produced the event and must
/// not block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub table: Option<String>,
    pub rows_done: Option<u64>,
    pub rows_total: Option<u64>,
    pub message: String,
}

impl ProgressEvent {
    pub fn phase(phase: Phase, message: impl Into<String>) -> Self {
        ProgressEvent {
            phase,
            table: None,
            rows_done: None,
            rows_total: None,
            message: message.into(),
        }
    }

    pub fn table(phase: Phase, table: &str, message: impl Into<String>) -> Self {
        ProgressEvent {
            phase,
            table: Some(table.to_string()),
            rows_done: None,
            rows_total: None,
            message: message.into(),
        }
    }

    pub fn rows(table: &str, done: u64, total: u64) -> Self {
        ProgressEvent {
            phase: Phase::Data,
            table: Some(table.to_string()),
            rows_done: Some(done),
            rows_total: Some(total),
            message: format!("{}: {}/{} rows", table, done, total),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConnectionCheck {
    pub source: bool,
    pub target: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_result(status: TableStatus, rows: u64) -> TableResult {
        TableResult {
            table: "t".into(),
            status,
            rows_copied: rows,
            duration_ms: 1,
            error: None,
            failed_batch: None,
        }
    }

    #[test]
    fn exit_code_reflects_outcome() {
        let mut result = MigrationResult::default();
        result.record(table_result(TableStatus::Success, 10));
        assert_eq!(result.exit_code(), 0);

        result.record(table_result(TableStatus::Failed, 0));
        assert_eq!(result.exit_code(), 3);

        result.record(table_result(TableStatus::Cancelled, 0));
        assert_eq!(result.exit_code(), 4);
    }

    #[test]
    fn record_aggregates_counters() {
        let mut result = MigrationResult::default();
        result.record(table_result(TableStatus::Success, 10));
        result.record(table_result(TableStatus::Success, 5));
        result.record(table_result(TableStatus::Skipped, 0));

        assert_eq!(result.total_rows, 15);
        assert_eq!(result.tables_migrated, 2);
        assert_eq!(result.tables_skipped, 1);
        assert_eq!(result.tables_failed, 0);
    }

    #[test]
    fn post_step_errors_mean_partial() {
        let mut result = MigrationResult::default();
        result.record(table_result(TableStatus::Success, 1));
        result.post_step_errors.push("fk failed".into());
        assert_eq!(result.exit_code(), 3);
    }

    #[test]
    fn progress_event_serializes_lowercase_phase() {
        let event = ProgressEvent::phase(Phase::Ddl, "creating");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"phase\":\"ddl\""));
    }
}

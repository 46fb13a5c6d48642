pub mod mysql;
pub mod postgres;

use async_trait::async_trait;

use crate::config::Engine;
use crate::error::MigrationError;
use crate::models::ColumnDescriptor;
use crate::type_map::LogicalKind;

/// Engine-feature flags consulted by the orchestrator instead of matching on
/// the engine tag at call sites.
#[derive(Debug, Clone, Copy)]
pub struct DialectCapabilities {
    /// Supports DEFERRABLE constraint evaluation.
    pub deferrable_constraints: bool,
    /// TRUNCATE can cascade to referencing tables.
    pub truncate_cascade: bool,
    /// Streaming reads use a server-side cursor / streaming result set.
    pub server_side_cursors: bool,
    /// Has a native enumerated type.
    pub native_enums: bool,
    /// Source scans can run under REPEATABLE READ.
    pub repeatable_read_scans: bool,
}

/// One column of a bulk insert. `cast` is an explicit type the dialect
/// applies to every bound placeholder for the column; PostgreSQL needs it
/// for user-defined enum targets, which have no implicit cast from text.
#[derive(Debug, Clone)]
pub struct InsertColumn {
    pub name: String,
    pub cast: Option<String>,
}

impl InsertColumn {
    pub fn plain(name: impl Into<String>) -> Self {
        InsertColumn {
            name: name.into(),
            cast: None,
        }
    }
}

/// Everything engine-specific about SQL text: identifier quoting,
/// placeholder style, DDL fragments, catalog idioms. Adding an engine is
/// adding an implementation, not patching call sites.
pub trait Dialect: Send + Sync {
    fn engine(&self) -> Engine;

    fn capabilities(&self) -> DialectCapabilities;

    fn quote_ident(&self, name: &str) -> String;

    /// Placeholder for the 1-based parameter `n` (`?` or `$n`).
    fn placeholder(&self, n: usize) -> String;

    /// Session statement putting a source scan under the isolation the
    /// engine supports, if any.
    fn scan_isolation_sql(&self) -> Option<&'static str>;

    /// Header + placeholder matrix of a parameterized multi-row insert.
    fn bulk_insert_sql(&self, table: &str, columns: &[InsertColumn], row_count: usize) -> String;

    /// Type token carrying identity semantics for the column, where the
    /// engine expresses identity through the type (SERIAL family).
    fn identity_sql(&self, column: &ColumnDescriptor) -> Option<String>;

    /// Statement aligning the identity generator of `table.column` past the
    /// maximum migrated value.
    fn sequence_resync_sql(&self, table: &str, column: &str) -> Option<String>;
}

pub struct MysqlDialect;

impl Dialect for MysqlDialect {
    fn engine(&self) -> Engine {
        Engine::Mysql
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities {
            deferrable_constraints: false,
            truncate_cascade: false,
            server_side_cursors: true,
            native_enums: false,
            repeatable_read_scans: true,
        }
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn placeholder(&self, _n: usize) -> String {
        "?".to_string()
    }

    fn scan_isolation_sql(&self) -> Option<&'static str> {
        Some("SET SESSION TRANSACTION ISOLATION LEVEL REPEATABLE READ")
    }

    fn bulk_insert_sql(&self, table: &str, columns: &[InsertColumn], row_count: usize) -> String {
        bulk_insert(self, table, columns, row_count)
    }

    fn identity_sql(&self, _column: &ColumnDescriptor) -> Option<String> {
        // AUTO_INCREMENT is a column attribute, not a type.
        None
    }

    fn sequence_resync_sql(&self, _table: &str, _column: &str) -> Option<String> {
        None
    }
}

pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities {
            deferrable_constraints: true,
            truncate_cascade: true,
            server_side_cursors: true,
            native_enums: true,
            repeatable_read_scans: true,
        }
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, n: usize) -> String {
        format!("${}", n)
    }

    fn scan_isolation_sql(&self) -> Option<&'static str> {
        Some("SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL REPEATABLE READ")
    }

    fn bulk_insert_sql(&self, table: &str, columns: &[InsertColumn], row_count: usize) -> String {
        bulk_insert(self, table, columns, row_count)
    }

    fn identity_sql(&self, column: &ColumnDescriptor) -> Option<String> {
        let serial = match column.kind {
            LogicalKind::Int64 | LogicalKind::UInt32 | LogicalKind::UInt64 => "BIGSERIAL",
            _ => "SERIAL",
        };
        Some(serial.to_string())
    }

    fn sequence_resync_sql(&self, table: &str, column: &str) -> Option<String> {
        // setval(…, max, false): the next nextval() yields max + 1.
        Some(format!(
            "SELECT setval(pg_get_serial_sequence('{}', '{}'), \
             COALESCE((SELECT MAX({}) FROM {}), 0) + 1, false)",
            self.quote_ident(table).replace('\'', "''"),
            column.replace('\'', "''"),
            self.quote_ident(column),
            self.quote_ident(table),
        ))
    }
}

fn bulk_insert(
    dialect: &dyn Dialect,
    table: &str,
    columns: &[InsertColumn],
    row_count: usize,
) -> String {
    let column_list = columns
        .iter()
        .map(|c| dialect.quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ",
        dialect.quote_ident(table),
        column_list
    );
    let width = columns.len();
    for row in 0..row_count {
        if row > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for (col, column) in columns.iter().enumerate() {
            if col > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&dialect.placeholder(row * width + col + 1));
            if let Some(cast) = &column.cast {
                sql.push_str("::");
                sql.push_str(cast);
            }
        }
        sql.push(')');
    }
    sql
}

/// The common face of both engine connectors: connectivity probe, statement
/// execution, scoped shutdown. Engine-typed streaming stays on the concrete
/// types.
#[async_trait]
pub trait Connector: Send + Sync {
    fn engine(&self) -> Engine;

    async fn test(&self) -> Result<(), MigrationError>;

    async fn execute(&self, sql: &str) -> Result<u64, MigrationError>;

    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mysql_quoting_escapes_backticks() {
        assert_eq!(MysqlDialect.quote_ident("users"), "`users`");
        assert_eq!(MysqlDialect.quote_ident("we`ird"), "`we``ird`");
    }

    #[test]
    fn postgres_quoting_escapes_double_quotes() {
        assert_eq!(PostgresDialect.quote_ident("users"), "\"users\"");
        assert_eq!(PostgresDialect.quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn postgres_bulk_insert_numbers_placeholders() {
        let columns = vec![InsertColumn::plain("id"), InsertColumn::plain("email")];
        let sql = PostgresDialect.bulk_insert_sql("users", &columns, 2);
        assert_eq!(
            sql,
            "INSERT INTO \"users\" (\"id\", \"email\") VALUES ($1, $2), ($3, $4)"
        );
    }

    #[test]
    fn mysql_bulk_insert_uses_question_marks() {
        let columns = vec![InsertColumn::plain("a")];
        let sql = MysqlDialect.bulk_insert_sql("t", &columns, 3);
        assert_eq!(sql, "INSERT INTO `t` (`a`) VALUES (?), (?), (?)");
    }

    #[test]
    fn cast_columns_wrap_every_placeholder() {
        let columns = vec![
            InsertColumn::plain("id"),
            InsertColumn {
                name: "state".into(),
                cast: Some("\"jobs_state_enum\"".into()),
            },
        ];
        let sql = PostgresDialect.bulk_insert_sql("jobs", &columns, 2);
        assert_eq!(
            sql,
            "INSERT INTO \"jobs\" (\"id\", \"state\") VALUES ($1, $2::\"jobs_state_enum\"), ($3, $4::\"jobs_state_enum\")"
        );
    }

    #[test]
    fn sequence_resync_targets_serial_sequence() {
        let sql = PostgresDialect.sequence_resync_sql("users", "id").unwrap();
        assert!(sql.contains("pg_get_serial_sequence"));
        assert!(sql.contains("MAX(\"id\")"));
        assert!(sql.contains("+ 1, false"));
    }

    #[test]
    fn identity_serial_widths() {
        let mut col = crate::models::ColumnDescriptor {
            name: "id".into(),
            kind: LogicalKind::Int32,
            raw_type: "int(11)".into(),
            nullable: false,
            default: None,
            identity: true,
            ordinal: 0,
            comment: None,
        };
        assert_eq!(PostgresDialect.identity_sql(&col).as_deref(), Some("SERIAL"));
        col.kind = LogicalKind::Int64;
        assert_eq!(PostgresDialect.identity_sql(&col).as_deref(), Some("BIGSERIAL"));
        col.kind = LogicalKind::UInt32;
        assert_eq!(PostgresDialect.identity_sql(&col).as_deref(), Some("BIGSERIAL"));
    }
}

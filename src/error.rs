use thiserror::Error;

/// Error taxonomy of the migration engine. Per-table DDL and data errors are
/// recorded in the table's `TableResult` and never unwind `migrate()`; the
/// variants here surface only for genuinely fatal conditions (configuration,
/// initial connections, plan-time mapping) or as the payload of a table
/// failure record.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("connection error: {0}")]
    Connection(String),

    /// All offending columns are reported in one batch at plan time.
    #[error("no type mapping for: {}", .columns.join(", "))]
    Mapping { columns: Vec<String> },

    #[error("DDL rejected for table {table}: {message}")]
    Ddl { table: String, message: String },

    #[error("data error in table {table} at batch {batch}: {message}")]
    Data {
        table: String,
        batch: usize,
        message: String,
    },

    /// Deferred FK installation failed; data remains, the constraint is absent.
    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("migration cancelled")]
    Cancelled,
}

impl MigrationError {
    pub fn config(message: impl Into<String>) -> Self {
        MigrationError::Config(message.into())
    }

    pub fn connection(message: impl std::fmt::Display) -> Self {
        MigrationError::Connection(message.to_string())
    }

    /// Exit code contract for CLI wrappers (spec'd alongside the result
    /// codes: 0 success, 3 partial, 4 cancelled).
    pub fn exit_code(&self) -> i32 {
        match self {
            MigrationError::Config(_) | MigrationError::Mapping { .. } => 1,
            MigrationError::Connection(_) => 2,
            MigrationError::Ddl { .. }
            | MigrationError::Data { .. }
            | MigrationError::Integrity(_) => 3,
            MigrationError::Cancelled => 4,
        }
    }
}

/// Transient driver failures are retried with backoff by the pool layer;
/// everything else surfaces immediately.
pub fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Tls(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_cli_contract() {
        assert_eq!(MigrationError::config("bad").exit_code(), 1);
        assert_eq!(
            MigrationError::Mapping { columns: vec!["t.c".into()] }.exit_code(),
            1
        );
        assert_eq!(MigrationError::connection("refused").exit_code(), 2);
        assert_eq!(MigrationError::Cancelled.exit_code(), 4);
        assert_eq!(
            MigrationError::Ddl { table: "t".into(), message: "m".into() }.exit_code(),
            3
        );
    }

    #[test]
    fn mapping_error_lists_all_columns() {
        let err = MigrationError::Mapping {
            columns: vec!["a.x".into(), "b.y".into()],
        };
        let text = err.to_string();
        assert!(text.contains("a.x"));
        assert!(text.contains("b.y"));
    }
}

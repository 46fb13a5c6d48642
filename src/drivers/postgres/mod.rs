use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use crate::config::{ConnectionParams, Engine};
use crate::drivers::{Connector, Dialect, PostgresDialect};
use crate::error::MigrationError;
use crate::models::ColumnDescriptor;
use crate::type_map::LogicalKind;
use crate::value::SqlValue;

use crate::pool_manager::get_postgres_pool;

/// Target-side connector: applies translated DDL, hosts the bulk-insert
/// bind path, and resyncs identity sequences after row copy.
pub struct PostgresTarget {
    pool: Pool<Postgres>,
}

impl PostgresTarget {
    pub async fn connect(
        params: &ConnectionParams,
        max_connections: u32,
        connect_timeout: Duration,
    ) -> Result<Self, MigrationError> {
        let pool = get_postgres_pool(params, max_connections, connect_timeout).await?;
        Ok(PostgresTarget { pool })
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    pub async fn execute_ddl(&self, table: &str, sql: &str) -> Result<(), MigrationError> {
        log::debug!("PostgreSQL DDL for {}: {}", table, sql);
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| MigrationError::Ddl {
                table: table.to_string(),
                message: e.to_string(),
            })
    }

    pub async fn drop_table(&self, table: &str) -> Result<(), MigrationError> {
        let sql = format!(
            "DROP TABLE IF EXISTS {} CASCADE",
            PostgresDialect.quote_ident(table)
        );
        self.execute_ddl(table, &sql).await
    }

    /// Align the identity generator so the next generated value exceeds the
    /// maximum migrated value.
    pub async fn resync_sequence(&self, table: &str, column: &str) -> Result<(), MigrationError> {
        let sql = PostgresDialect
            .sequence_resync_sql(table, column)
            .unwrap_or_default();
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| {
                MigrationError::Integrity(format!(
                    "sequence resync for {}.{} failed: {}",
                    table, column, e
                ))
            })
    }

    pub async fn count_rows(&self, table: &str) -> Result<u64, MigrationError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {}",
            PostgresDialect.quote_ident(table)
        );
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(MigrationError::connection)?;
        Ok(row.try_get::<i64, _>(0).unwrap_or(0) as u64)
    }
}

#[async_trait]
impl Connector for PostgresTarget {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    async fn test(&self) -> Result<(), MigrationError> {
        use sqlx::Connection;
        let mut conn = self.pool.acquire().await.map_err(MigrationError::connection)?;
        conn.ping().await.map_err(MigrationError::connection)
    }

    async fn execute(&self, sql: &str) -> Result<u64, MigrationError> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected())
            .map_err(MigrationError::connection)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Bind one neutral value as a native parameter. NULLs are typed by the
/// column kind; PostgreSQL rejects parameters whose declared type cannot
/// reach the column type.
pub fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    column: &ColumnDescriptor,
    value: &'q SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        SqlValue::Null => bind_null(query, column),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::UInt(v) => {
            // u64 beyond i64 range only occurs for NUMERIC(20,0) targets.
            match i64::try_from(*v) {
                Ok(signed) => query.bind(signed),
                Err(_) => query.bind(Decimal::from(*v)),
            }
        }
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Decimal(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
        SqlValue::Date(v) => query.bind(*v),
        SqlValue::Time(v) => query.bind(*v),
        SqlValue::DateTime(v) => query.bind(*v),
        SqlValue::TimestampTz(v) => query.bind(*v),
        SqlValue::Uuid(v) => query.bind(*v),
        SqlValue::Json(v) => query.bind(v),
    }
}

fn bind_null<'q>(
    query: Query<'q, Postgres, PgArguments>,
    column: &ColumnDescriptor,
) -> Query<'q, Postgres, PgArguments> {
    match &column.kind {
        LogicalKind::Bool => query.bind(None::<bool>),
        LogicalKind::Int8
        | LogicalKind::Int16
        | LogicalKind::Int32
        | LogicalKind::Int64
        | LogicalKind::UInt8
        | LogicalKind::UInt16
        | LogicalKind::UInt32
        | LogicalKind::UInt64 => query.bind(None::<i64>),
        LogicalKind::Decimal { .. } => query.bind(None::<Decimal>),
        LogicalKind::Float32 | LogicalKind::Float64 => query.bind(None::<f64>),
        LogicalKind::Bytes | LogicalKind::Unknown => query.bind(None::<Vec<u8>>),
        LogicalKind::Date => query.bind(None::<NaiveDate>),
        LogicalKind::Time => query.bind(None::<NaiveTime>),
        LogicalKind::DateTime => query.bind(None::<NaiveDateTime>),
        LogicalKind::TimestampTz => query.bind(None::<DateTime<Utc>>),
        LogicalKind::Uuid { .. } => query.bind(None::<Uuid>),
        LogicalKind::Json => query.bind(None::<serde_json::Value>),
        LogicalKind::Char { .. }
        | LogicalKind::Varchar { .. }
        | LogicalKind::Text
        | LogicalKind::Enum { .. } => query.bind(None::<String>),
    }
}

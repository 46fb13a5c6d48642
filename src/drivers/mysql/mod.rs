pub mod extract;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{MySql, Pool, Row};

use crate::config::{ConnectionParams, Engine};
use crate::drivers::{Connector, Dialect, MysqlDialect};
use crate::error::MigrationError;
use crate::models::{
    ColumnDescriptor, DefaultKind, DefaultValue, ForeignKeyDescriptor, IndexDescriptor,
    TableDescriptor,
};
use crate::pool_manager::get_mysql_pool;
use crate::type_map::parse_mysql_type;

/// Read a string from a MySQL row by index.
/// MySQL 8 information_schema returns VARBINARY/BLOB instead of VARCHAR,
/// so try_get::<String> fails silently. This falls back to reading raw bytes.
pub(crate) fn mysql_row_str(row: &sqlx::mysql::MySqlRow, idx: usize) -> String {
    row.try_get::<String, _>(idx).unwrap_or_else(|_| {
        row.try_get::<Vec<u8>, _>(idx)
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
            .unwrap_or_default()
    })
}

/// Optional string variant of mysql_row_str.
pub(crate) fn mysql_row_str_opt(row: &sqlx::mysql::MySqlRow, idx: usize) -> Option<String> {
    match row.try_get::<Option<String>, _>(idx) {
        Ok(val) => val,
        Err(_) => row
            .try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string()),
    }
}

/// Tolerant signed read: catalog integers arrive as int, bigint, or an
/// unsigned flavor depending on server version, and a strict try_get on the
/// wrong width fails. Walks the same ladder as `mysql_row_u64` before
/// falling back to the textual form.
fn mysql_row_i64(row: &sqlx::mysql::MySqlRow, idx: usize) -> i64 {
    row.try_get::<i64, _>(idx)
        .or_else(|_| row.try_get::<i32, _>(idx).map(i64::from))
        .or_else(|_| row.try_get::<u64, _>(idx).map(|v| v as i64))
        .ok()
        .or_else(|| mysql_row_str(row, idx).trim().parse::<i64>().ok())
        .unwrap_or(0)
}

fn mysql_row_u64(row: &sqlx::mysql::MySqlRow, idx: usize) -> u64 {
    row.try_get::<u64, _>(idx)
        .or_else(|_| row.try_get::<i64, _>(idx).map(|v| v.max(0) as u64))
        .unwrap_or(0)
}

fn mysql_row_u64_opt(row: &sqlx::mysql::MySqlRow, idx: usize) -> Option<u64> {
    row.try_get::<Option<u64>, _>(idx)
        .ok()
        .flatten()
        .or_else(|| {
            row.try_get::<Option<i64>, _>(idx)
                .ok()
                .flatten()
                .map(|v| v.max(0) as u64)
        })
}

/// Source-side connector: owns the MySQL pool and populates descriptors
/// from information_schema. All catalog reads are batched per migration,
/// not per table.
pub struct MysqlSource {
    pool: Pool<MySql>,
    database: String,
}

impl MysqlSource {
    pub async fn connect(
        params: &ConnectionParams,
        max_connections: u32,
        connect_timeout: Duration,
    ) -> Result<Self, MigrationError> {
        let pool = get_mysql_pool(params, max_connections, connect_timeout).await?;
        Ok(MysqlSource {
            pool,
            database: params.database.clone(),
        })
    }

    pub fn pool(&self) -> &Pool<MySql> {
        &self.pool
    }

    /// The engine must negotiate a Unicode session charset; latin1 and
    /// friends would silently mangle non-ASCII data on the way through.
    pub async fn assert_utf8_session(&self) -> Result<(), MigrationError> {
        let row = sqlx::query("SELECT @@character_set_connection")
            .fetch_one(&self.pool)
            .await
            .map_err(MigrationError::connection)?;
        let charset = mysql_row_str(&row, 0);
        if !charset.to_lowercase().starts_with("utf8") {
            return Err(MigrationError::connection(format!(
                "source session charset is '{}'; a utf8 connection charset is required",
                charset
            )));
        }
        Ok(())
    }

    /// All base tables with the engine's row and byte estimates.
    pub async fn list_tables(&self) -> Result<Vec<(String, u64, u64)>, MigrationError> {
        log::debug!("MySQL: fetching tables for database: {}", self.database);
        let rows = sqlx::query(
            "SELECT table_name, COALESCE(table_rows, 0), \
             COALESCE(data_length, 0) + COALESCE(index_length, 0) \
             FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' \
             ORDER BY table_name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(MigrationError::connection)?;

        let tables: Vec<(String, u64, u64)> = rows
            .iter()
            .map(|r| (mysql_row_str(r, 0), mysql_row_u64(r, 1), mysql_row_u64(r, 2)))
            .collect();
        log::debug!("MySQL: found {} tables in {}", tables.len(), self.database);
        Ok(tables)
    }

    /// Full descriptors for the selected tables: columns, indexes (primary
    /// key first), and foreign keys, each read in one catalog query.
    pub async fn describe_tables(
        &self,
        names: &[String],
    ) -> Result<Vec<TableDescriptor>, MigrationError> {
        let stats: HashMap<String, (u64, u64)> = self
            .list_tables()
            .await?
            .into_iter()
            .map(|(name, rows, bytes)| (name, (rows, bytes)))
            .collect();

        let mut columns = self.all_columns().await?;
        let mut indexes = self.all_indexes().await?;
        let mut foreign_keys = self.all_foreign_keys().await?;

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let (row_estimate, byte_size) = stats.get(name).copied().unwrap_or((0, 0));
            tables.push(TableDescriptor {
                schema: self.database.clone(),
                name: name.clone(),
                columns: columns.remove(name).unwrap_or_default(),
                indexes: indexes.remove(name).unwrap_or_default(),
                foreign_keys: foreign_keys.remove(name).unwrap_or_default(),
                row_estimate,
                byte_size,
            });
        }
        Ok(tables)
    }

    pub async fn count_rows(
        &self,
        table: &str,
        where_clause: Option<&str>,
    ) -> Result<u64, MigrationError> {
        let mut sql = format!(
            "SELECT COUNT(*) FROM {}",
            MysqlDialect.quote_ident(table)
        );
        if let Some(clause) = where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(clause);
        }
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(MigrationError::connection)?;
        Ok(mysql_row_u64(&row, 0))
    }

    async fn all_columns(
        &self,
    ) -> Result<HashMap<String, Vec<ColumnDescriptor>>, MigrationError> {
        let query = r#"
            SELECT table_name, column_name, data_type, column_type,
                   character_maximum_length, numeric_precision, numeric_scale,
                   is_nullable, column_default, extra, column_comment
            FROM information_schema.columns
            WHERE table_schema = DATABASE()
            ORDER BY table_name, ordinal_position
        "#;

        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .map_err(MigrationError::connection)?;

        let mut result: HashMap<String, Vec<ColumnDescriptor>> = HashMap::new();

        for row in &rows {
            let table_name = mysql_row_str(row, 0);
            let column_name = mysql_row_str(row, 1);
            let data_type = mysql_row_str(row, 2);
            let column_type = mysql_row_str(row, 3);
            let char_length = mysql_row_u64_opt(row, 4);
            let numeric_precision = mysql_row_u64_opt(row, 5);
            let numeric_scale = mysql_row_u64_opt(row, 6);
            let null_str = mysql_row_str(row, 7);
            let default_val = mysql_row_str_opt(row, 8);
            let extra = mysql_row_str(row, 9);
            let comment = mysql_row_str_opt(row, 10).filter(|c| !c.is_empty());

            let identity = extra.to_lowercase().contains("auto_increment");
            let default = if identity {
                None
            } else {
                parse_default(default_val, &extra)
            };

            let kind = parse_mysql_type(
                &data_type,
                &column_type,
                char_length,
                numeric_precision,
                numeric_scale,
            );

            let columns = result.entry(table_name).or_default();
            let ordinal = columns.len();
            columns.push(ColumnDescriptor {
                name: column_name,
                kind,
                raw_type: column_type,
                nullable: null_str == "YES",
                default,
                identity,
                ordinal,
                comment,
            });
        }

        Ok(result)
    }

    async fn all_indexes(
        &self,
    ) -> Result<HashMap<String, Vec<IndexDescriptor>>, MigrationError> {
        let query = r#"
            SELECT table_name, index_name, column_name, non_unique
            FROM information_schema.statistics
            WHERE table_schema = DATABASE()
            ORDER BY table_name, index_name, seq_in_index
        "#;

        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .map_err(MigrationError::connection)?;

        // (table, index) → descriptor, columns appended in seq order
        let mut grouped: HashMap<(String, String), IndexDescriptor> = HashMap::new();
        let mut order: Vec<(String, String)> = Vec::new();

        for row in &rows {
            let table_name = mysql_row_str(row, 0);
            let index_name = mysql_row_str(row, 1);
            let column_name = mysql_row_str(row, 2);
            let non_unique = mysql_row_i64(row, 3);

            let key = (table_name, index_name.clone());
            if !grouped.contains_key(&key) {
                order.push(key.clone());
            }
            grouped
                .entry(key)
                .or_insert_with(|| IndexDescriptor {
                    name: index_name.clone(),
                    columns: Vec::new(),
                    unique: non_unique == 0,
                    primary: index_name == "PRIMARY",
                })
                .columns
                .push(column_name);
        }

        let mut result: HashMap<String, Vec<IndexDescriptor>> = HashMap::new();
        for key in order {
            let descriptor = grouped.remove(&key).unwrap_or_else(|| unreachable!());
            result.entry(key.0).or_default().push(descriptor);
        }
        // Primary key first.
        for indexes in result.values_mut() {
            indexes.sort_by_key(|i| !i.primary);
        }

        Ok(result)
    }

    async fn all_foreign_keys(
        &self,
    ) -> Result<HashMap<String, Vec<ForeignKeyDescriptor>>, MigrationError> {
        let query = r#"
            SELECT
                kcu.TABLE_NAME,
                kcu.CONSTRAINT_NAME,
                kcu.COLUMN_NAME,
                kcu.REFERENCED_TABLE_NAME,
                kcu.REFERENCED_COLUMN_NAME,
                rc.UPDATE_RULE,
                rc.DELETE_RULE
            FROM information_schema.KEY_COLUMN_USAGE kcu
            JOIN information_schema.REFERENTIAL_CONSTRAINTS rc
            ON kcu.CONSTRAINT_NAME = rc.CONSTRAINT_NAME
            AND kcu.CONSTRAINT_SCHEMA = rc.CONSTRAINT_SCHEMA
            WHERE kcu.TABLE_SCHEMA = DATABASE()
            AND kcu.REFERENCED_TABLE_NAME IS NOT NULL
            ORDER BY kcu.TABLE_NAME, kcu.CONSTRAINT_NAME, kcu.ORDINAL_POSITION
        "#;

        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .map_err(MigrationError::connection)?;

        let mut grouped: HashMap<(String, String), ForeignKeyDescriptor> = HashMap::new();
        let mut order: Vec<(String, String)> = Vec::new();

        for row in &rows {
            let table_name = mysql_row_str(row, 0);
            let constraint = mysql_row_str(row, 1);
            let column = mysql_row_str(row, 2);
            let referenced_table = mysql_row_str(row, 3);
            let referenced_column = mysql_row_str(row, 4);
            let on_update = mysql_row_str_opt(row, 5);
            let on_delete = mysql_row_str_opt(row, 6);

            let key = (table_name, constraint.clone());
            if !grouped.contains_key(&key) {
                order.push(key.clone());
            }
            let fk = grouped.entry(key).or_insert_with(|| ForeignKeyDescriptor {
                name: constraint.clone(),
                columns: Vec::new(),
                referenced_table,
                referenced_columns: Vec::new(),
                on_update,
                on_delete,
            });
            fk.columns.push(column);
            fk.referenced_columns.push(referenced_column);
        }

        let mut result: HashMap<String, Vec<ForeignKeyDescriptor>> = HashMap::new();
        for key in order {
            let descriptor = grouped.remove(&key).unwrap_or_else(|| unreachable!());
            result.entry(key.0).or_default().push(descriptor);
        }

        Ok(result)
    }
}

/// SELECT over the descriptor's columns in ordinal order, with the optional
/// user predicate appended. No ORDER BY: rows flow in the source's natural
/// order.
pub fn select_sql(table: &TableDescriptor, where_clause: Option<&str>) -> String {
    let columns = table
        .columns
        .iter()
        .map(|c| MysqlDialect.quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!(
        "SELECT {} FROM {}",
        columns,
        MysqlDialect.quote_ident(&table.name)
    );
    if let Some(clause) = where_clause {
        sql.push_str(" WHERE ");
        sql.push_str(clause);
    }
    sql
}

fn parse_default(default_val: Option<String>, extra: &str) -> Option<DefaultValue> {
    let expr = match default_val {
        Some(val) if !val.is_empty() && !val.eq_ignore_ascii_case("null") => val,
        _ => return None,
    };

    // MySQL 8 flags expression defaults; older servers only ever report
    // CURRENT_TIMESTAMP as a function default.
    let upper = expr.to_uppercase();
    let kind = if extra.to_uppercase().contains("DEFAULT_GENERATED")
        || upper.starts_with("CURRENT_TIMESTAMP")
        || upper.starts_with("NOW(")
    {
        DefaultKind::EngineFunction
    } else {
        DefaultKind::Literal
    };

    Some(DefaultValue { expr, kind })
}

#[async_trait]
impl Connector for MysqlSource {
    fn engine(&self) -> Engine {
        Engine::Mysql
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_map::LogicalKind;

    #[test]
    fn default_parsing_distinguishes_provenance() {
        let literal = parse_default(Some("pending".into()), "").unwrap();
        assert_eq!(literal.kind, DefaultKind::Literal);

        let func = parse_default(Some("CURRENT_TIMESTAMP".into()), "").unwrap();
        assert_eq!(func.kind, DefaultKind::EngineFunction);

        let generated = parse_default(Some("uuid()".into()), "DEFAULT_GENERATED").unwrap();
        assert_eq!(generated.kind, DefaultKind::EngineFunction);

        assert!(parse_default(Some("NULL".into()), "").is_none());
        assert!(parse_default(None, "").is_none());
    }

    #[test]
    fn select_sql_quotes_and_appends_predicate() {
        let table = TableDescriptor {
            schema: "db".into(),
            name: "orders".into(),
            columns: vec![
                ColumnDescriptor {
                    name: "id".into(),
                    kind: LogicalKind::Int64,
                    raw_type: "bigint(20)".into(),
                    nullable: false,
                    default: None,
                    identity: true,
                    ordinal: 0,
                    comment: None,
                },
                ColumnDescriptor {
                    name: "state".into(),
                    kind: LogicalKind::Text,
                    raw_type: "text".into(),
                    nullable: true,
                    default: None,
                    identity: false,
                    ordinal: 1,
                    comment: None,
                },
            ],
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            row_estimate: 0,
            byte_size: 0,
        };
        assert_eq!(
            select_sql(&table, None),
            "SELECT `id`, `state` FROM `orders`"
        );
        assert_eq!(
            select_sql(&table, Some("id > 100")),
            "SELECT `id`, `state` FROM `orders` WHERE id > 100"
        );
    }
}

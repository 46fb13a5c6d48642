use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::StreamExt;
use sqlx::{Postgres, Transaction};

use crate::config::{EnumMapping, MigrationOptions};
use crate::drivers::mysql::{extract, select_sql, MysqlSource};
use crate::drivers::postgres::{bind_value, PostgresTarget};
use crate::drivers::{Dialect, InsertColumn, MysqlDialect, PostgresDialect};
use crate::error::MigrationError;
use crate::models::{ProgressEvent, TableDescriptor};
use crate::orchestrator::{CancellationToken, ProgressSink};
use crate::schema::enum_type_name;
use crate::type_map::LogicalKind;
use crate::value::RowValues;

/// A pipeline failure carries the rows already committed, which stay in
/// place unless the failure policy drops the table.
#[derive(Debug)]
pub struct PipelineError {
    pub error: MigrationError,
    pub rows_committed: u64,
    pub failed_batch: Option<usize>,
}

impl PipelineError {
    fn new(error: MigrationError, rows_committed: u64) -> Self {
        let failed_batch = match &error {
            MigrationError::Data { batch, .. } => Some(*batch),
            _ => None,
        };
        PipelineError {
            error,
            rows_committed,
            failed_batch,
        }
    }
}

/// Copy one table: stream rows from the source under a repeatable-read
/// scan, group them into `batch_size` batches, and bulk-insert each batch
/// into the target inside a transaction committed every `commit_every`
/// batches. Synchronous within the table; parallelism is across tables.
pub async fn copy_table(
    source: &MysqlSource,
    target: &PostgresTarget,
    table: &TableDescriptor,
    options: &MigrationOptions,
    cancel: &CancellationToken,
    progress: &ProgressSink,
) -> Result<u64, PipelineError> {
    let where_clause = options.where_clauses.get(&table.name).map(String::as_str);

    let rows_total = match where_clause {
        Some(clause) => source
            .count_rows(&table.name, Some(clause))
            .await
            .map_err(|e| PipelineError::new(e, 0))?,
        None => table.row_estimate,
    };

    let mut conn = source
        .pool()
        .acquire()
        .await
        .map_err(|e| PipelineError::new(MigrationError::connection(e), 0))?;

    if MysqlDialect.capabilities().repeatable_read_scans {
        if let Some(isolation) = MysqlDialect.scan_isolation_sql() {
            sqlx::query(isolation)
                .execute(&mut *conn)
                .await
                .map_err(|e| PipelineError::new(MigrationError::connection(e), 0))?;
        }
    }

    let select = select_sql(table, where_clause);
    log::debug!("{}: streaming with: {}", table.name, select);
    let mut rows = sqlx::query(&select).fetch(&mut *conn);

    let mut writer = BatchWriter::new(target, table, options);
    let mut batch: Vec<RowValues> = Vec::with_capacity(options.batch_size);
    let mut streamed: u64 = 0;
    let mut next_report = options.progress_every;

    while let Some(result) = rows.next().await {
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                writer.abandon().await;
                return Err(PipelineError::new(
                    MigrationError::connection(e),
                    writer.rows_committed,
                ));
            }
        };

        let values = extract::decode_row(&row, &table.columns, options.zero_date).map_err(
            |message| {
                PipelineError::new(
                    MigrationError::Data {
                        table: table.name.clone(),
                        batch: writer.batch_index,
                        message,
                    },
                    writer.rows_committed,
                )
            },
        )?;

        batch.push(values);
        streamed += 1;

        if batch.len() == options.batch_size {
            if cancel.load(Ordering::Relaxed) {
                writer.abandon().await;
                return Err(PipelineError::new(
                    MigrationError::Cancelled,
                    writer.rows_committed,
                ));
            }
            writer.write(&batch).await?;
            batch.clear();
        }

        if streamed >= next_report {
            progress.emit(ProgressEvent::rows(
                &table.name,
                streamed,
                rows_total.max(streamed),
            ));
            next_report += options.progress_every;
        }
    }

    if !batch.is_empty() {
        writer.write(&batch).await?;
    }
    writer.finish().await?;

    progress.emit(ProgressEvent::rows(
        &table.name,
        streamed,
        rows_total.max(streamed),
    ));
    Ok(writer.rows_committed)
}

/// Native-enum targets need the bound text cast onto the generated enum
/// type; PostgreSQL has no implicit cast from text to a user-defined enum.
fn insert_columns(table: &TableDescriptor, enum_mapping: EnumMapping) -> Vec<InsertColumn> {
    table
        .columns
        .iter()
        .map(|c| {
            let cast = match (&c.kind, enum_mapping) {
                (LogicalKind::Enum { .. }, EnumMapping::Native) => Some(
                    PostgresDialect.quote_ident(&enum_type_name(&table.name, &c.name)),
                ),
                _ => None,
            };
            InsertColumn {
                name: c.name.clone(),
                cast,
            }
        })
        .collect()
}

/// Transactional bulk-insert sink for one table.
struct BatchWriter<'a> {
    target: &'a PostgresTarget,
    table: &'a TableDescriptor,
    insert_columns: Vec<InsertColumn>,
    commit_every: usize,
    statement_timeout: Option<Duration>,
    tx: Option<Transaction<'a, Postgres>>,
    batches_since_commit: usize,
    pending_rows: u64,
    rows_committed: u64,
    batch_index: usize,
    /// PostgreSQL caps bind parameters per statement at u16::MAX; wide
    /// tables split a batch across several statements in the same
    /// transaction.
    rows_per_statement: usize,
}

impl<'a> BatchWriter<'a> {
    fn new(
        target: &'a PostgresTarget,
        table: &'a TableDescriptor,
        options: &MigrationOptions,
    ) -> Self {
        let insert_columns = insert_columns(table, options.enum_mapping);
        let width = table.columns.len().max(1);
        let rows_per_statement = (u16::MAX as usize / width).max(1);

        BatchWriter {
            target,
            table,
            insert_columns,
            commit_every: options.commit_every,
            statement_timeout: options.statement_timeout_secs.map(Duration::from_secs),
            tx: None,
            batches_since_commit: 0,
            pending_rows: 0,
            rows_committed: 0,
            batch_index: 0,
            rows_per_statement,
        }
    }

    async fn write(&mut self, batch: &[RowValues]) -> Result<(), PipelineError> {
        if self.tx.is_none() {
            let tx = self.target.pool().begin().await.map_err(|e| {
                PipelineError::new(MigrationError::connection(e), self.rows_committed)
            })?;
            self.tx = Some(tx);
        }

        for chunk in batch.chunks(self.rows_per_statement) {
            if let Err(message) = self.insert_chunk(chunk).await {
                let error = MigrationError::Data {
                    table: self.table.name.clone(),
                    batch: self.batch_index,
                    message,
                };
                self.abandon().await;
                return Err(PipelineError::new(error, self.rows_committed));
            }
        }

        self.pending_rows += batch.len() as u64;
        self.batch_index += 1;
        self.batches_since_commit += 1;

        if self.batches_since_commit >= self.commit_every {
            self.commit().await?;
        }
        Ok(())
    }

    async fn insert_chunk(&mut self, chunk: &[RowValues]) -> Result<(), String> {
        let sql = PostgresDialect.bulk_insert_sql(
            &self.table.name,
            &self.insert_columns,
            chunk.len(),
        );

        let mut query = sqlx::query(&sql);
        for row in chunk {
            for (column, value) in self.table.columns.iter().zip(row.iter()) {
                query = bind_value(query, column, value);
            }
        }

        let tx = self.tx.as_mut().ok_or("writer has no open transaction")?;
        let execute = query.execute(&mut **tx);
        match self.statement_timeout {
            Some(limit) => tokio::time::timeout(limit, execute)
                .await
                .map_err(|_| format!("batch insert timed out after {:?}", limit))?
                .map(|_| ())
                .map_err(|e| e.to_string()),
            None => execute.await.map(|_| ()).map_err(|e| e.to_string()),
        }
    }

    async fn commit(&mut self) -> Result<(), PipelineError> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await.map_err(|e| {
                PipelineError::new(
                    MigrationError::Data {
                        table: self.table.name.clone(),
                        batch: self.batch_index.saturating_sub(1),
                        message: format!("commit failed: {}", e),
                    },
                    self.rows_committed,
                )
            })?;
            self.rows_committed += self.pending_rows;
            self.pending_rows = 0;
            self.batches_since_commit = 0;
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), PipelineError> {
        self.commit().await
    }

    /// Roll back whatever is in flight; committed batches stay.
    async fn abandon(&mut self) {
        if let Some(tx) = self.tx.take() {
            if let Err(e) = tx.rollback().await {
                log::warn!("{}: rollback failed: {}", self.table.name, e);
            }
            self.pending_rows = 0;
        }
    }
}

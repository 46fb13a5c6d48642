use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConnectionParams, MigrationDocument, MigrationOptions};
use crate::drivers::mysql::MysqlSource;
use crate::drivers::postgres::PostgresTarget;
use crate::drivers::Connector;
use crate::error::MigrationError;
use crate::models::{ConnectionCheck, MigrationResult, Phase, ProgressEvent, TableDescriptor};
use crate::orchestrator::{
    create_cancellation_token, CancellationToken, Orchestrator, ProgressCallback, ProgressSink,
};
use crate::pool_manager::close_pools;

/// Programmatic entry point of the engine. Wrappers construct one, adjust
/// selection and options, attach a progress callback, and call `migrate()`.
/// Options are snapshotted at `migrate()` entry; later edits do not affect
/// a running migration.
pub struct Migrator {
    source_params: ConnectionParams,
    target_params: ConnectionParams,
    options: MigrationOptions,
    type_mappings: HashMap<String, String>,
    callback: Option<ProgressCallback>,
    cancel: CancellationToken,
}

impl Migrator {
    pub fn new(source: ConnectionParams, target: ConnectionParams) -> Self {
        Migrator {
            source_params: source,
            target_params: target,
            options: MigrationOptions::default(),
            type_mappings: HashMap::new(),
            callback: None,
            cancel: create_cancellation_token(),
        }
    }

    /// Build a migrator from the wrapper-facing configuration document.
    pub fn from_document(document: MigrationDocument) -> Result<Self, MigrationError> {
        document.validate()?;
        let mut migrator = Migrator::new(document.source, document.target);
        migrator.options = document.options;
        migrator.type_mappings = document.type_mappings;
        Ok(migrator)
    }

    pub fn set_selection(&mut self, include: Vec<String>, exclude: Vec<String>) {
        self.options.tables = include;
        self.options.exclude_tables = exclude;
    }

    pub fn set_options(&mut self, options: MigrationOptions) {
        self.options = options;
    }

    pub fn options(&self) -> &MigrationOptions {
        &self.options
    }

    /// Overrides consulted before the built-in type table.
    pub fn set_type_mappings(&mut self, mappings: HashMap<String, String>) {
        self.type_mappings = mappings;
    }

    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
    }

    /// Handle the caller keeps to request cancellation; workers honor it
    /// between batches and at table boundaries.
    pub fn cancellation_token(&self) -> CancellationToken {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.options.connect_timeout_secs)
    }

    fn pool_size(&self) -> u32 {
        // One connection per worker plus one for the orchestrator's own
        // catalog and post-step statements.
        self.options.workers as u32 + 1
    }

    pub async fn test_connections(&self) -> ConnectionCheck {
        let source = match MysqlSource::connect(
            &self.source_params,
            self.pool_size(),
            self.connect_timeout(),
        )
        .await
        {
            Ok(source) => source.test().await.is_ok(),
            Err(_) => false,
        };
        let target = match PostgresTarget::connect(
            &self.target_params,
            self.pool_size(),
            self.connect_timeout(),
        )
        .await
        {
            Ok(target) => target.test().await.is_ok(),
            Err(_) => false,
        };
        ConnectionCheck { source, target }
    }

    /// Descriptors for every base table of the source database, regardless
    /// of the current selection.
    pub async fn list_tables(&self) -> Result<Vec<TableDescriptor>, MigrationError> {
        self.source_params.validate()?;
        let source = MysqlSource::connect(
            &self.source_params,
            self.pool_size(),
            self.connect_timeout(),
        )
        .await?;
        let names: Vec<String> = source
            .list_tables()
            .await?
            .into_iter()
            .map(|(name, _, _)| name)
            .collect();
        source.describe_tables(&names).await
    }

    /// One-shot copy of the selected tables. Per-table failures are recorded
    /// in the result; only configuration errors, initial connection
    /// failures, and plan-time mapping errors return `Err`.
    pub async fn migrate(&self) -> Result<MigrationResult, MigrationError> {
        self.cancel.store(false, Ordering::Relaxed);

        let sink = Arc::new(ProgressSink::new(self.callback.clone()));
        let result = self.run_migration(Arc::clone(&sink)).await;

        match &result {
            Ok(summary) => log::info!(
                "migration finished: {} migrated, {} failed, {} skipped",
                summary.tables_migrated,
                summary.tables_failed,
                summary.tables_skipped
            ),
            Err(e) => {
                sink.emit(ProgressEvent::phase(Phase::Error, e.to_string()));
                log::error!("migration aborted: {}", e);
            }
        }

        close_pools(&self.source_params, &self.target_params).await;
        result
    }

    async fn run_migration(
        &self,
        sink: Arc<ProgressSink>,
    ) -> Result<MigrationResult, MigrationError> {
        self.source_params.validate()?;
        self.target_params.validate()?;
        self.options.validate()?;

        sink.emit(ProgressEvent::phase(Phase::Connect, "connecting to source"));
        let source = Arc::new(
            MysqlSource::connect(
                &self.source_params,
                self.pool_size(),
                self.connect_timeout(),
            )
            .await?,
        );
        source.assert_utf8_session().await?;

        sink.emit(ProgressEvent::phase(Phase::Connect, "connecting to target"));
        let target = Arc::new(
            PostgresTarget::connect(
                &self.target_params,
                self.pool_size(),
                self.connect_timeout(),
            )
            .await?,
        );

        let orchestrator = Orchestrator {
            source,
            target,
            options: Arc::new(self.options.clone()),
            type_mappings: self.type_mappings.clone(),
            sink,
            cancel: Arc::clone(&self.cancel),
        };
        orchestrator.run().await
    }
}

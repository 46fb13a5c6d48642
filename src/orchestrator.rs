use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::task::JoinSet;

use crate::config::{FailurePolicy, MigrationOptions};
use crate::drivers::mysql::MysqlSource;
use crate::drivers::postgres::PostgresTarget;
use crate::error::MigrationError;
use crate::models::{
    MigrationPlan, MigrationResult, Phase, ProgressEvent, TableDescriptor, TableResult,
    TableStatus,
};
use crate::pipeline::{copy_table, PipelineError};
use crate::schema::{SchemaTranslator, TableDdl};
use crate::selection::resolve_tables;
use crate::topo::{load_dependencies, sort_by_dependency};
use crate::type_map::TypeMapper;

/// Workers check this between batches and at every table boundary.
pub type CancellationToken = Arc<AtomicBool>;

pub fn create_cancellation_token() -> CancellationToken {
    Arc::new(AtomicBool::new(false))
}

pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// The only shared mutable sink of the run; emission is serialized so
/// consumers never see interleaved events.
pub struct ProgressSink {
    callback: Mutex<Option<ProgressCallback>>,
}

impl ProgressSink {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        ProgressSink {
            callback: Mutex::new(callback),
        }
    }

    pub fn emit(&self, event: ProgressEvent) {
        log::debug!("progress: {:?} {}", event.phase, event.message);
        let guard = self
            .callback
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(callback) = guard.as_ref() {
            callback(event);
        }
    }
}

/// Drives one migration end-to-end: plan, dependency-ordered table workers,
/// then the single-threaded post-step (deferred FKs, sequence resync).
pub struct Orchestrator {
    pub source: Arc<MysqlSource>,
    pub target: Arc<PostgresTarget>,
    pub options: Arc<MigrationOptions>,
    pub type_mappings: HashMap<String, String>,
    pub sink: Arc<ProgressSink>,
    pub cancel: CancellationToken,
}

impl Orchestrator {
    pub async fn run(self) -> Result<MigrationResult, MigrationError> {
        let started = Instant::now();

        self.sink
            .emit(ProgressEvent::phase(Phase::Plan, "resolving table set"));
        let (plan, ddl_by_table) = self.build_plan().await?;
        self.sink.emit(ProgressEvent::phase(
            Phase::Plan,
            format!("{} tables planned", plan.tables.len()),
        ));

        let mut result = MigrationResult {
            warnings: plan.warnings.clone(),
            ..MigrationResult::default()
        };

        self.execute_tables(&plan, &ddl_by_table, &mut result).await;

        if !self.cancel.load(Ordering::Relaxed) {
            self.post_steps(&plan, &ddl_by_table, &mut result).await;
        } else {
            result.cancelled = true;
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        self.sink.emit(ProgressEvent::phase(
            Phase::Done,
            format!(
                "{} tables migrated, {} failed, {} skipped, {} rows in {} ms",
                result.tables_migrated,
                result.tables_failed,
                result.tables_skipped,
                result.total_rows,
                result.duration_ms
            ),
        ));
        Ok(result)
    }

    /// Select, introspect, order, and pre-translate every table. All DDL is
    /// rendered here, single-threaded, so mapping failures surface in one
    /// batch and workers only execute.
    async fn build_plan(
        &self,
    ) -> Result<(MigrationPlan, HashMap<String, TableDdl>), MigrationError> {
        let all: Vec<String> = self
            .source
            .list_tables()
            .await?
            .into_iter()
            .map(|(name, _, _)| name)
            .collect();

        let (selected, warnings) = resolve_tables(
            &all,
            &self.options.tables,
            &self.options.exclude_tables,
        );
        for warning in &warnings {
            log::warn!("{}", warning);
        }
        if selected.is_empty() {
            return Err(MigrationError::config(
                "table selection matches no source table",
            ));
        }

        let descriptors = self.source.describe_tables(&selected).await?;

        let topo = sort_by_dependency(&descriptors);
        let mut warnings = warnings;
        if !topo.cyclic.is_empty() {
            let cycle_list = topo.cyclic.iter().cloned().collect::<Vec<_>>().join(", ");
            log::warn!(
                "foreign key cycle involving {}; their FKs install in the post-step",
                cycle_list
            );
            warnings.push(format!("foreign key cycle involving {}", cycle_list));
        }

        let by_name: HashMap<String, TableDescriptor> = descriptors
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect();
        let mut ordered = Vec::with_capacity(by_name.len());
        for name in &topo.order {
            if let Some(descriptor) = by_name.get(name) {
                ordered.push(descriptor.clone());
            }
        }

        let mapper = TypeMapper::new(
            self.type_mappings.clone(),
            self.options.enum_mapping,
            self.options.zero_date,
        );
        let translator = SchemaTranslator::new(mapper, self.options.drop_target);

        // Pre-flight: every unmapped column across every table, reported at once.
        let unmapped: Vec<String> = ordered
            .iter()
            .flat_map(|t| translator.unmapped_columns(t))
            .collect();
        if !unmapped.is_empty() {
            return Err(MigrationError::Mapping { columns: unmapped });
        }

        let mut ddl_by_table = HashMap::with_capacity(ordered.len());
        for table in &ordered {
            let ddl = translator.translate(table)?;
            warnings.extend(ddl.warnings.iter().cloned());
            ddl_by_table.insert(table.name.clone(), ddl);
        }

        let plan = MigrationPlan {
            tables: ordered,
            cyclic: topo.cyclic.into_iter().collect(),
            options: (*self.options).clone(),
            warnings,
        };
        Ok((plan, ddl_by_table))
    }

    /// Feed tables to a bounded worker set. A table becomes eligible only
    /// when every table it depends on has finished; dependents of a failed
    /// table are skipped, not attempted.
    async fn execute_tables(
        &self,
        plan: &MigrationPlan,
        ddl_by_table: &HashMap<String, TableDdl>,
        result: &mut MigrationResult,
    ) {
        let selected: BTreeSet<String> = plan.tables.iter().map(|t| t.name.clone()).collect();
        let cyclic: BTreeSet<String> = plan.cyclic.iter().cloned().collect();

        let mut pending: Vec<TableDescriptor> = plan.tables.clone();
        let mut finished: BTreeMap<String, TableStatus> = BTreeMap::new();
        let mut join_set: JoinSet<TableResult> = JoinSet::new();
        let mut in_flight = 0usize;
        let mut stop = false;

        loop {
            // Launch everything currently eligible, up to the worker bound.
            let mut i = 0;
            while i < pending.len()
                && in_flight < self.options.workers
                && !stop
                && !self.cancel.load(Ordering::Relaxed)
            {
                let deps = load_dependencies(&pending[i], &selected, &cyclic);
                if !deps.iter().all(|d| finished.contains_key(d)) {
                    i += 1;
                    continue;
                }
                let table = pending.remove(i);
                if deps
                    .iter()
                    .any(|d| finished.get(d) != Some(&TableStatus::Success))
                {
                    log::warn!("{}: skipped, a dependency did not migrate", table.name);
                    finished.insert(table.name.clone(), TableStatus::Skipped);
                    result.record(TableResult::skipped(
                        &table.name,
                        "a table it depends on did not migrate",
                    ));
                    continue;
                }

                let ddl = ddl_by_table
                    .get(&table.name)
                    .cloned()
                    .unwrap_or_else(|| unreachable!("plan has DDL for every table"));
                join_set.spawn(migrate_table(
                    Arc::clone(&self.source),
                    Arc::clone(&self.target),
                    table,
                    ddl,
                    Arc::clone(&self.options),
                    Arc::clone(&self.cancel),
                    Arc::clone(&self.sink),
                ));
                in_flight += 1;
            }

            if join_set.is_empty() {
                break;
            }

            match join_set.join_next().await {
                Some(Ok(table_result)) => {
                    in_flight -= 1;
                    finished.insert(table_result.table.clone(), table_result.status);
                    if table_result.status == TableStatus::Failed && self.options.stop_on_error {
                        stop = true;
                    }
                    result.record(table_result);
                }
                Some(Err(join_error)) => {
                    in_flight -= 1;
                    log::error!("table worker panicked: {}", join_error);
                    if self.options.stop_on_error {
                        stop = true;
                    }
                }
                None => break,
            }
        }

        // Whatever never started: skipped, with the reason on record.
        let cancelled = self.cancel.load(Ordering::Relaxed);
        for table in pending {
            let reason = if cancelled {
                "migration cancelled before this table started"
            } else if stop {
                "stopped after an earlier failure"
            } else {
                "a table it depends on did not migrate"
            };
            result.record(TableResult::skipped(&table.name, reason));
        }
        if cancelled {
            result.cancelled = true;
        }
    }

    /// Strictly single-threaded: deferred FK installation, then sequence
    /// resync for every identity column of every migrated table.
    async fn post_steps(
        &self,
        plan: &MigrationPlan,
        ddl_by_table: &HashMap<String, TableDdl>,
        result: &mut MigrationResult,
    ) {
        let succeeded: BTreeSet<&str> = result
            .tables
            .iter()
            .filter(|t| t.status == TableStatus::Success)
            .map(|t| t.table.as_str())
            .collect();

        if self.options.migrate_foreign_keys {
            self.sink.emit(ProgressEvent::phase(
                Phase::Post,
                "installing deferred foreign keys",
            ));
            for table in &plan.tables {
                if !succeeded.contains(table.name.as_str()) {
                    continue;
                }
                let ddl = match ddl_by_table.get(&table.name) {
                    Some(ddl) => ddl,
                    None => continue,
                };
                for (fk, sql) in table.foreign_keys.iter().zip(ddl.foreign_keys.iter()) {
                    if !succeeded.contains(fk.referenced_table.as_str()) {
                        result.warnings.push(format!(
                            "{}: foreign key {} skipped, references unmigrated table {}",
                            table.name, fk.name, fk.referenced_table
                        ));
                        continue;
                    }
                    if let Err(e) = self.target.execute_ddl(&table.name, sql).await {
                        let message = MigrationError::Integrity(format!(
                            "{}: foreign key {} not installed: {}",
                            table.name, fk.name, e
                        ))
                        .to_string();
                        log::error!("{}", message);
                        result.post_step_errors.push(message);
                    }
                }
            }
        }

        self.sink.emit(ProgressEvent::phase(
            Phase::Post,
            "resyncing identity sequences",
        ));
        for table in &plan.tables {
            if !succeeded.contains(table.name.as_str()) {
                continue;
            }
            for column in table.identity_columns() {
                if let Err(e) = self.target.resync_sequence(&table.name, &column.name).await {
                    let message = e.to_string();
                    log::error!("{}", message);
                    result.post_step_errors.push(message);
                }
            }
        }
    }
}

/// One worker's end-to-end handling of a single table: drop, DDL, rows,
/// then secondary indexes.
async fn migrate_table(
    source: Arc<MysqlSource>,
    target: Arc<PostgresTarget>,
    table: TableDescriptor,
    ddl: TableDdl,
    options: Arc<MigrationOptions>,
    cancel: CancellationToken,
    sink: Arc<ProgressSink>,
) -> TableResult {
    let started = Instant::now();
    let name = table.name.clone();

    if cancel.load(Ordering::Relaxed) {
        return TableResult::cancelled(&name);
    }

    let fail = |message: String, rows: u64, batch: Option<usize>, started: Instant| {
        log::error!("{}: {}", name, message);
        sink.emit(ProgressEvent::table(Phase::Error, &name, message.clone()));
        TableResult {
            table: name.clone(),
            status: TableStatus::Failed,
            rows_copied: rows,
            duration_ms: started.elapsed().as_millis() as u64,
            error: Some(message),
            failed_batch: batch,
        }
    };

    sink.emit(ProgressEvent::table(Phase::Ddl, &name, format!("creating {}", name)));

    if options.drop_target {
        if let Err(e) = target.drop_table(&name).await {
            return fail(e.to_string(), 0, None, started);
        }
    }
    for sql in &ddl.pre {
        if let Err(e) = target.execute_ddl(&name, sql).await {
            return fail(e.to_string(), 0, None, started);
        }
    }
    if let Err(e) = target.execute_ddl(&name, &ddl.create).await {
        return fail(e.to_string(), 0, None, started);
    }
    for sql in &ddl.comments {
        if let Err(e) = target.execute_ddl(&name, sql).await {
            return fail(e.to_string(), 0, None, started);
        }
    }
    if options.migrate_indexes && !options.indexes_after_data {
        for sql in &ddl.indexes {
            if let Err(e) = target.execute_ddl(&name, sql).await {
                return fail(e.to_string(), 0, None, started);
            }
        }
    }

    sink.emit(ProgressEvent::table(Phase::Data, &name, format!("copying {}", name)));

    match copy_table(&source, &target, &table, &options, &cancel, &sink).await {
        Ok(rows_copied) => {
            if options.migrate_indexes && options.indexes_after_data {
                for sql in &ddl.indexes {
                    if let Err(e) = target.execute_ddl(&name, sql).await {
                        return fail(e.to_string(), rows_copied, None, started);
                    }
                }
            }
            log::info!(
                "{}: {} rows migrated in {} ms",
                name,
                rows_copied,
                started.elapsed().as_millis()
            );
            TableResult {
                table: name,
                status: TableStatus::Success,
                rows_copied,
                duration_ms: started.elapsed().as_millis() as u64,
                error: None,
                failed_batch: None,
            }
        }
        Err(PipelineError {
            error: MigrationError::Cancelled,
            rows_committed,
            ..
        }) => {
            log::warn!("{}: cancelled after {} committed rows", name, rows_committed);
            TableResult {
                table: name,
                status: TableStatus::Cancelled,
                rows_copied: rows_committed,
                duration_ms: started.elapsed().as_millis() as u64,
                error: None,
                failed_batch: None,
            }
        }
        Err(pipeline_error) => {
            if options.on_failure == FailurePolicy::Drop {
                if let Err(e) = target.drop_table(&name).await {
                    log::warn!("{}: drop after failure failed: {}", name, e);
                }
            }
            fail(
                pipeline_error.error.to_string(),
                pipeline_error.rows_committed,
                pipeline_error.failed_batch,
                started,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn cancellation_token_round_trip() {
        let token = create_cancellation_token();
        assert!(!token.load(Ordering::Relaxed));
        token.store(true, Ordering::Relaxed);
        assert!(token.load(Ordering::Relaxed));
    }

    #[test]
    fn progress_sink_without_callback_is_silent() {
        let sink = ProgressSink::new(None);
        sink.emit(ProgressEvent::phase(Phase::Plan, "noop"));
    }

    #[test]
    fn progress_sink_delivers_serialized_events() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let sink = ProgressSink::new(Some(Arc::new(move |event: ProgressEvent| {
            assert_eq!(event.phase, Phase::Data);
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        sink.emit(ProgressEvent::rows("t", 10, 100));
        sink.emit(ProgressEvent::rows("t", 20, 100));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}

//! Run orchestration: plan, structure, data, finalize, verify.

use crate::catalog::TableDescriptor;
use crate::config::{Config, MirrorConfig, RunMode};
use crate::constraints;
use crate::error::Result;
use crate::plan::RunPlan;
use crate::pool;
use crate::report::{MirrorReport, Phase, RunStatus, TableOutcome, VerificationEntry};
use crate::schema;
use crate::sequence;
use crate::source::SourcePool;
use crate::target::TargetPool;
use crate::transfer::{TransferConfig, TransferEngine};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Drives a run across every planned table, one phase at a time.
pub struct Orchestrator {
    config: MirrorConfig,
    source: Arc<dyn SourcePool>,
    target: Arc<dyn TargetPool>,
    progress: bool,
}

impl Orchestrator {
    /// Connect to both endpoints and create an orchestrator.
    pub async fn new(config: Config) -> Result<Self> {
        let (source, target) = pool::connect(&config).await?;
        Ok(Self::with_pools(
            config.mirror,
            Arc::new(source),
            Arc::new(target),
        ))
    }

    /// Create an orchestrator over existing pools.
    pub fn with_pools(
        config: MirrorConfig,
        source: Arc<dyn SourcePool>,
        target: Arc<dyn TargetPool>,
    ) -> Self {
        Self {
            config,
            source,
            target,
            progress: false,
        }
    }

    /// Print each table outcome as a JSON line on stderr as it is produced.
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    /// Phase 0 only.
    pub async fn plan(&self) -> Result<RunPlan> {
        RunPlan::discover(self.source.as_ref(), &self.config).await
    }

    /// Run all phases, or only the plan when `dry_run` is set.
    ///
    /// Only discovery failures are returned as errors; everything else ends
    /// up in the report's outcomes.
    pub async fn run(&self, dry_run: bool) -> Result<MirrorReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let mode = self.config.mode();
        info!("Starting run {} (mode: {})", run_id, mode);

        info!("Phase 0: planning");
        let plan = self.plan().await?;
        let mut outcomes: Vec<TableOutcome> = Vec::new();
        for outcome in &plan.outcomes {
            self.emit(outcome);
            outcomes.push(outcome.clone());
        }

        let mut verification = Vec::new();
        if dry_run {
            for table in &plan.tables {
                info!(
                    "  {} ({} columns, {} foreign keys, {} indexes)",
                    table.full_name(),
                    table.columns.len(),
                    table.foreign_keys.len(),
                    table.indexes.len()
                );
            }
        } else {
            let mut skipped: HashSet<String> = HashSet::new();

            if mode == RunMode::Mirror {
                self.drop_tables(&plan, &mut outcomes, &mut skipped).await;
            }
            self.structure_phase(&plan, &mut outcomes, &mut skipped).await;
            self.data_phase(&plan, &mut outcomes, &skipped).await;
            self.finalize_phase(&plan, &mut outcomes, &skipped).await;

            info!("Verifying row counts");
            verification = self.verify_tables(&plan.tables).await;
        }

        let completed_at = Utc::now();
        let mut report = MirrorReport {
            run_id,
            mode,
            dry_run,
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            tables: plan.table_names(),
            outcomes,
            verification,
            status: RunStatus::Completed,
        };
        report.status = report.compute_status();

        info!(
            "Run {}: {} tables, {} rows copied in {:.1}s",
            report.status,
            report.tables.len(),
            report.rows_copied(),
            report.duration_seconds
        );

        Ok(report)
    }

    /// Compare source and target row counts for every planned table.
    pub async fn verify(&self) -> Result<Vec<VerificationEntry>> {
        let plan = self.plan().await?;
        Ok(self.verify_tables(&plan.tables).await)
    }

    /// Close both pools.
    pub async fn close(&self) {
        self.source.close().await;
        self.target.close().await;
    }

    async fn drop_tables(
        &self,
        plan: &RunPlan,
        outcomes: &mut Vec<TableOutcome>,
        skipped: &mut HashSet<String>,
    ) {
        info!("Mirror mode: dropping {} target tables", plan.tables.len());
        for table in plan.drop_order() {
            let mut outcome = TableOutcome::for_table(table, Phase::Drop);
            if let Err(e) = self.target.drop_table(&table.schema, &table.name).await {
                outcome.record_error(format!("drop table: {}", e.summary()));
                skipped.insert(table.full_name());
            }
            self.push(outcomes, outcome);
        }
    }

    async fn structure_phase(
        &self,
        plan: &RunPlan,
        outcomes: &mut Vec<TableOutcome>,
        skipped: &mut HashSet<String>,
    ) {
        info!("Phase 1: creating schemas and tables");

        let mut failed_schemas: Vec<(String, String)> = Vec::new();
        for s in &plan.schemas {
            if let Err(e) = schema::ensure_schema(self.target.as_ref(), &s.name).await {
                warn!("Could not create schema {}: {}", s.name, e.summary());
                failed_schemas.push((s.name.clone(), e.summary()));
            }
        }

        for table in &plan.tables {
            if skipped.contains(&table.full_name()) {
                continue;
            }

            let outcome = match failed_schemas.iter().find(|(name, _)| *name == table.schema) {
                Some((_, message)) => {
                    let mut outcome = TableOutcome::for_table(table, Phase::Structure);
                    outcome.record_error(format!("create schema: {}", message));
                    outcome
                }
                None => schema::ensure_table(self.target.as_ref(), table).await,
            };

            if !outcome.is_ok() {
                skipped.insert(table.full_name());
            }
            self.push(outcomes, outcome);
        }
    }

    async fn data_phase(
        &self,
        plan: &RunPlan,
        outcomes: &mut Vec<TableOutcome>,
        skipped: &HashSet<String>,
    ) {
        info!("Phase 2: copying data");
        let tables = active_tables(plan, skipped);

        // Foreign keys are only dropped when they will be recreated afterwards
        if self.config.create_foreign_keys {
            for table in &tables {
                constraints::drop_foreign_keys_if_present(self.target.as_ref(), table).await;
            }
        }

        let engine = TransferEngine::new(
            self.source.as_ref(),
            self.target.as_ref(),
            TransferConfig {
                batch_size: self.config.batch_size,
                ..Default::default()
            },
        );
        for table in &tables {
            let outcome = engine.copy_table(table).await;
            self.push(outcomes, outcome);
        }
    }

    /// Indexes for every table, then foreign keys for every table, so a
    /// foreign key never runs ahead of the key it references. Sequences last.
    async fn finalize_phase(
        &self,
        plan: &RunPlan,
        outcomes: &mut Vec<TableOutcome>,
        skipped: &HashSet<String>,
    ) {
        info!("Phase 3: indexes, foreign keys and sequences");
        let tables = active_tables(plan, skipped);
        let mut finalized: Vec<TableOutcome> = tables
            .iter()
            .map(|t| TableOutcome::for_table(t, Phase::Finalize))
            .collect();

        if self.config.create_indexes {
            for (table, outcome) in tables.iter().zip(finalized.iter_mut()) {
                outcome.absorb(constraints::create_indexes(self.target.as_ref(), table).await);
            }
        }
        if self.config.create_foreign_keys {
            for (table, outcome) in tables.iter().zip(finalized.iter_mut()) {
                outcome.absorb(
                    constraints::create_foreign_keys(self.target.as_ref(), table).await,
                );
            }
        }
        if self.config.sync_sequences {
            for (table, outcome) in tables.iter().zip(finalized.iter_mut()) {
                outcome.absorb(
                    sequence::sync_sequences(self.source.as_ref(), self.target.as_ref(), table)
                        .await,
                );
            }
        }

        for outcome in finalized {
            self.push(outcomes, outcome);
        }
    }

    async fn verify_tables(&self, tables: &[TableDescriptor]) -> Vec<VerificationEntry> {
        let mut entries = Vec::with_capacity(tables.len());
        for table in tables {
            let source_rows = self.source.row_count(&table.schema, &table.name).await.ok();
            let target_rows = self.target.row_count(&table.schema, &table.name).await.ok();
            let entry =
                VerificationEntry::new(&table.schema, &table.name, source_rows, target_rows);

            if entry.matches {
                info!("{}: {} rows (match)", table.full_name(), source_rows.unwrap_or(0));
            } else {
                warn!(
                    "{}: source={:?} target={:?} (MISMATCH)",
                    table.full_name(),
                    source_rows,
                    target_rows
                );
            }
            entries.push(entry);
        }
        entries
    }

    fn push(&self, outcomes: &mut Vec<TableOutcome>, outcome: TableOutcome) {
        self.emit(&outcome);
        outcomes.push(outcome);
    }

    fn emit(&self, outcome: &TableOutcome) {
        if !self.progress {
            return;
        }
        match serde_json::to_string(outcome) {
            Ok(line) => eprintln!("{}", line),
            Err(e) => warn!("Could not serialize progress for {}: {}", outcome.full_name(), e),
        }
    }
}

fn active_tables<'a>(plan: &'a RunPlan, skipped: &HashSet<String>) -> Vec<&'a TableDescriptor> {
    plan.tables
        .iter()
        .filter(|t| !skipped.contains(&t.full_name()))
        .collect()
}

//! Data transfer engine.
//!
//! A table is read from one source snapshot in batches while the previous
//! batch is being written: the reader and the writer are two futures joined
//! on a bounded channel, so nothing outlives `copy_table`. Each batch is one
//! conflict-tolerant multi-row insert; when that fails the batch is replayed
//! row by row so a single bad row only costs itself.

use crate::catalog::TableDescriptor;
use crate::config::DEFAULT_BATCH_SIZE;
use crate::ddl::max_rows_per_insert;
use crate::report::{Phase, TableOutcome};
use crate::source::{Row, SourcePool};
use crate::target::TargetPool;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Row-level errors recorded per table before further ones are only counted.
pub const MAX_ROW_ERRORS: usize = 100;

/// Transfer engine configuration.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Requested rows per batch; capped by the bind parameter limit.
    pub batch_size: usize,
    /// Batches buffered between reader and writer.
    pub read_ahead: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            read_ahead: 2,
        }
    }
}

/// Copies table data from source to target.
pub struct TransferEngine<'a> {
    source: &'a dyn SourcePool,
    target: &'a dyn TargetPool,
    config: TransferConfig,
}

#[derive(Default)]
struct WriteProgress {
    processed: i64,
    copied: i64,
    failed: i64,
    row_errors: Vec<String>,
    suppressed: usize,
}

impl<'a> TransferEngine<'a> {
    pub fn new(
        source: &'a dyn SourcePool,
        target: &'a dyn TargetPool,
        config: TransferConfig,
    ) -> Self {
        Self {
            source,
            target,
            config,
        }
    }

    /// Copy every source row of `table` that the target does not already hold.
    pub async fn copy_table(&self, table: &TableDescriptor) -> TableOutcome {
        let mut outcome = TableOutcome::for_table(table, Phase::Data);
        let name = table.full_name();

        outcome.rows_expected = match self.source.row_count(&table.schema, &table.name).await {
            Ok(n) => n,
            Err(e) => {
                outcome.record_error(format!("source row count: {}", e.summary()));
                return outcome;
            }
        };

        if outcome.rows_expected == 0 {
            debug!("{}: empty, nothing to copy", name);
            return outcome;
        }

        if !table.has_conflict_target() {
            match self.target.row_count(&table.schema, &table.name).await {
                Ok(0) => {}
                Ok(existing) => {
                    outcome.rows_skipped = outcome.rows_expected;
                    outcome.record_error(format!(
                        "target already holds {} rows and the table has no primary key or \
                         unique index; skipped to avoid duplicating rows",
                        existing
                    ));
                    return outcome;
                }
                Err(e) => {
                    outcome.record_error(format!("target row count: {}", e.summary()));
                    return outcome;
                }
            }
        }

        let columns = table.copy_columns();
        if columns.is_empty() {
            outcome.record_error("no writable columns");
            return outcome;
        }

        let batch_size = max_rows_per_insert(self.config.batch_size, columns.len());
        if batch_size < self.config.batch_size {
            debug!(
                "{}: batch size capped at {} rows ({} columns)",
                name,
                batch_size,
                columns.len()
            );
        }

        let key_positions = key_positions(table);
        let start = Instant::now();
        let (tx, mut rx) = mpsc::channel::<Vec<Row>>(self.config.read_ahead.max(1));

        let reader = self.source.read_batches(table, batch_size, tx);
        let writer = async {
            let mut progress = WriteProgress::default();
            while let Some(batch) = rx.recv().await {
                self.write_batch(table, batch, &key_positions, &mut progress)
                    .await;
            }
            progress
        };

        let (read_result, progress) = tokio::join!(reader, writer);

        outcome.rows_copied = progress.copied;
        outcome.rows_failed = progress.failed;
        outcome.rows_skipped = progress.processed - progress.copied - progress.failed;
        for e in progress.row_errors {
            outcome.record_error(e);
        }
        if progress.suppressed > 0 {
            outcome.record_error(format!("{} more failed rows not listed", progress.suppressed));
        }

        if let Err(e) = read_result {
            outcome.record_error(format!(
                "read aborted after {} rows: {}",
                progress.processed,
                e.summary()
            ));
        }

        let secs = start.elapsed().as_secs_f64();
        info!(
            "{}: {} copied, {} already present, {} failed of {} in {:.1}s",
            name,
            outcome.rows_copied,
            outcome.rows_skipped,
            outcome.rows_failed,
            outcome.rows_expected,
            secs
        );

        outcome
    }

    async fn write_batch(
        &self,
        table: &TableDescriptor,
        batch: Vec<Row>,
        key_positions: &[(String, usize)],
        progress: &mut WriteProgress,
    ) {
        progress.processed += batch.len() as i64;

        match self.target.insert_rows(table, &batch).await {
            Ok(inserted) => {
                progress.copied += inserted as i64;
                return;
            }
            Err(e) => {
                debug!(
                    "{}: batch of {} rows failed ({}); retrying row by row",
                    table.full_name(),
                    batch.len(),
                    e.summary()
                );
            }
        }

        for row in &batch {
            match self.target.insert_rows(table, std::slice::from_ref(row)).await {
                Ok(inserted) => progress.copied += inserted as i64,
                Err(e) => {
                    progress.failed += 1;
                    if progress.row_errors.len() < MAX_ROW_ERRORS {
                        progress.row_errors.push(format!(
                            "row {}: {}",
                            row_key(row, key_positions),
                            e.summary()
                        ));
                    } else {
                        progress.suppressed += 1;
                    }
                }
            }
        }
    }
}

/// Columns identifying a row in error messages, with their positions in a
/// copied row: the primary key, or the first few columns without one.
fn key_positions(table: &TableDescriptor) -> Vec<(String, usize)> {
    let columns = table.copy_columns();
    let position = |name: &str| columns.iter().position(|c| c.name == name);

    if table.has_primary_key() {
        let keyed: Vec<(String, usize)> = table
            .primary_key
            .iter()
            .filter_map(|k| position(k).map(|p| (k.clone(), p)))
            .collect();
        if !keyed.is_empty() {
            return keyed;
        }
    }

    columns
        .iter()
        .take(3)
        .enumerate()
        .map(|(i, c)| (c.name.clone(), i))
        .collect()
}

fn row_key(row: &Row, key_positions: &[(String, usize)]) -> String {
    let parts: Vec<String> = key_positions
        .iter()
        .filter_map(|(name, pos)| row.get(*pos).map(|v| format!("{}={}", name, v.preview())))
        .collect();
    format!("({})", parts.join(", "))
}

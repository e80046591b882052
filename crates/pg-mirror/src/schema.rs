//! Phase 1: create schemas, sequences and tables on the target.

use crate::catalog::TableDescriptor;
use crate::error::Result;
use crate::report::{Phase, TableOutcome};
use crate::target::TargetPool;
use tracing::debug;

/// Create a schema on the target if it is missing.
pub async fn ensure_schema(target: &dyn TargetPool, schema: &str) -> Result<()> {
    debug!("Ensuring schema {}", schema);
    target.create_schema(schema).await
}

/// Create a table on the target if it is missing.
///
/// Sequences named by `nextval(...)` defaults are created first, since the
/// table statement references them. An existing table is left untouched.
/// Unique indexes follow the table: like the primary key they are the
/// conflict target that keeps a rerun from inserting rows twice.
pub async fn ensure_table(target: &dyn TargetPool, table: &TableDescriptor) -> TableOutcome {
    let mut outcome = TableOutcome::for_table(table, Phase::Structure);

    let mut sequences: Vec<String> = Vec::new();
    for col in &table.columns {
        if let Some(seq) = col.default_sequence() {
            if !sequences.contains(&seq) {
                sequences.push(seq);
            }
        }
    }

    for seq in &sequences {
        if let Err(e) = target.create_sequence(seq).await {
            outcome.record_error(format!("create sequence {}: {}", seq, e.summary()));
        }
    }

    debug!("Ensuring table {}", table.full_name());
    if let Err(e) = target.create_table(table).await {
        outcome.record_error(format!("create table: {}", e.summary()));
        return outcome;
    }

    for index in table.unique_indexes() {
        debug!("Creating unique index {} on {}", index.name, table.full_name());
        if let Err(e) = target.create_index(table, index).await {
            outcome.record_error(format!("unique index {}: {}", index.name, e.summary()));
        }
    }

    outcome
}

//! Advance target sequences past the copied data.

use crate::catalog::{ColumnDescriptor, SequenceRef, TableDescriptor};
use crate::report::{Phase, TableOutcome};
use crate::source::SourcePool;
use crate::target::TargetPool;
use tracing::{debug, info};

/// Resolve the source sequence behind a column.
///
/// The catalog lookup wins; a `nextval('...')` default is the fallback.
pub async fn resolve_source_sequence(
    source: &dyn SourcePool,
    table: &TableDescriptor,
    col: &ColumnDescriptor,
) -> Option<SequenceRef> {
    let looked_up = match source
        .serial_sequence(&table.schema, &table.name, &col.name)
        .await
    {
        Ok(found) => found,
        Err(e) => {
            debug!(
                "serial sequence lookup failed for {}.{}: {}",
                table.full_name(),
                col.name,
                e.summary()
            );
            None
        }
    };

    looked_up.or_else(|| col.default_sequence()).map(|name| SequenceRef {
        name,
        schema: table.schema.clone(),
        table: table.name.clone(),
        column: col.name.clone(),
    })
}

/// Set every sequence-backed column's target sequence to the source maximum.
///
/// After this, the next generated value on the target is `max + 1`; for an
/// empty table it is 1.
pub async fn sync_sequences(
    source: &dyn SourcePool,
    target: &dyn TargetPool,
    table: &TableDescriptor,
) -> TableOutcome {
    let mut outcome = TableOutcome::for_table(table, Phase::Finalize);

    for col in table.copy_columns() {
        if !col.is_sequence_backed() {
            continue;
        }

        let Some(seq) = resolve_source_sequence(source, table, col).await else {
            outcome.record_error(format!("column {}: no backing sequence found", col.name));
            continue;
        };

        let max = match source.max_value(&table.schema, &table.name, &col.name).await {
            Ok(v) => v,
            Err(e) => {
                outcome.record_error(format!("MAX({}) on source: {}", col.name, e.summary()));
                continue;
            }
        };

        let target_name = match target
            .serial_sequence(&table.schema, &table.name, &col.name)
            .await
        {
            Ok(Some(name)) => name,
            _ => {
                // Not owned by the column on the target; make sure it exists
                if let Err(e) = target.create_sequence(&seq.name).await {
                    outcome.record_error(format!("create sequence {}: {}", seq.name, e.summary()));
                    continue;
                }
                seq.name.clone()
            }
        };

        let (value, is_called) = if max >= 1 { (max, true) } else { (1, false) };
        match target.set_sequence(&target_name, value, is_called).await {
            Ok(()) => info!(
                "Sequence {} for {}.{} set to {} (next value {})",
                target_name,
                table.full_name(),
                col.name,
                value,
                if is_called { value + 1 } else { value }
            ),
            Err(e) => {
                outcome.record_error(format!("setval {}: {}", target_name, e.summary()))
            }
        }
    }

    outcome
}

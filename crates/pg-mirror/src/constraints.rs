//! Foreign key and index lifecycle around the data phase.

use crate::catalog::TableDescriptor;
use crate::report::{Phase, TableOutcome};
use crate::target::TargetPool;
use tracing::{debug, warn};

/// Drop the table's foreign keys on the target before any rows are copied.
///
/// Most of these constraints do not exist on a first run, so failures are
/// only logged.
pub async fn drop_foreign_keys_if_present(target: &dyn TargetPool, table: &TableDescriptor) {
    for fk in &table.foreign_keys {
        debug!("Dropping foreign key {} on {}", fk.name, table.full_name());
        if let Err(e) = target.drop_foreign_key(table, fk).await {
            warn!(
                "Could not drop foreign key {} on {}: {}",
                fk.name,
                table.full_name(),
                e.summary()
            );
        }
    }
}

/// Add the table's foreign keys. Each failure is recorded by constraint name.
pub async fn create_foreign_keys(target: &dyn TargetPool, table: &TableDescriptor) -> TableOutcome {
    let mut outcome = TableOutcome::for_table(table, Phase::Finalize);
    for fk in &table.foreign_keys {
        debug!("Creating foreign key {} on {}", fk.name, table.full_name());
        if let Err(e) = target.add_foreign_key(table, fk).await {
            outcome.record_error(format!("foreign key {}: {}", fk.name, e.summary()));
        }
    }
    outcome
}

/// Recreate the table's non-unique indexes from their captured definitions.
///
/// Unique indexes already exist: they are created with the table.
pub async fn create_indexes(target: &dyn TargetPool, table: &TableDescriptor) -> TableOutcome {
    let mut outcome = TableOutcome::for_table(table, Phase::Finalize);
    for index in table.secondary_indexes() {
        debug!("Creating index {} on {}", index.name, table.full_name());
        if let Err(e) = target.create_index(table, index).await {
            outcome.record_error(format!("index {}: {}", index.name, e.summary()));
        }
    }
    outcome
}

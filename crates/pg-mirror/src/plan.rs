//! Phase 0: discover what the run will touch.

use crate::catalog::{SchemaRef, TableDescriptor};
use crate::config::MirrorConfig;
use crate::error::Result;
use crate::report::{Phase, TableOutcome};
use crate::source::SourcePool;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

/// Everything discovered before the target is touched.
///
/// Built once and passed through the later phases; never mutated after
/// discovery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunPlan {
    /// Schemas selected for the run.
    pub schemas: Vec<SchemaRef>,

    /// Fully described tables, in discovery order.
    pub tables: Vec<TableDescriptor>,

    /// Tables that could not be described and are left out of the run.
    pub outcomes: Vec<TableOutcome>,
}

impl RunPlan {
    /// Discover schemas and tables on the source.
    ///
    /// Listing failures are fatal; a table that cannot be described is
    /// recorded in `outcomes` and skipped.
    pub async fn discover(source: &dyn SourcePool, config: &MirrorConfig) -> Result<Self> {
        let mut plan = RunPlan::default();

        for schema in source.list_schemas().await? {
            if !config.includes_schema(&schema.name) {
                debug!("Skipping schema {}", schema.name);
                continue;
            }

            for table in source.list_tables(&schema.name).await? {
                if config.excludes_table(&schema.name, &table) {
                    debug!("Excluding table {}.{}", schema.name, table);
                    continue;
                }

                match source.describe_table(&schema.name, &table).await {
                    Ok(desc) => plan.add_table(desc),
                    Err(e) => {
                        let mut outcome = TableOutcome::new(&schema.name, &table, Phase::Plan);
                        outcome.record_error(format!("describe failed: {}", e.summary()));
                        plan.outcomes.push(outcome);
                    }
                }
            }

            plan.schemas.push(schema);
        }

        info!(
            "Planned {} tables in {} schemas ({} skipped)",
            plan.tables.len(),
            plan.schemas.len(),
            plan.outcomes.len()
        );
        Ok(plan)
    }

    /// Append a described table, reporting malformed foreign keys.
    pub fn add_table(&mut self, mut table: TableDescriptor) {
        let (good, bad): (Vec<_>, Vec<_>) = table
            .foreign_keys
            .drain(..)
            .partition(|fk| fk.is_well_formed());
        table.foreign_keys = good;

        if !bad.is_empty() {
            let mut outcome = TableOutcome::for_table(&table, Phase::Plan);
            for fk in bad {
                outcome.record_error(format!(
                    "foreign key {} has {} local and {} referenced columns; not applied",
                    fk.name,
                    fk.columns.len(),
                    fk.foreign_columns.len()
                ));
            }
            self.outcomes.push(outcome);
        }

        self.tables.push(table);
    }

    /// `schema.table` names in discovery order.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.full_name()).collect()
    }

    /// Tables ordered so that referenced tables come before the tables that
    /// reference them.
    ///
    /// Ties keep discovery order. Tables caught in a reference cycle are
    /// appended in discovery order after everything that could be ordered.
    pub fn dependency_order(&self) -> Vec<&TableDescriptor> {
        let index: HashMap<(String, String), usize> = self
            .tables
            .iter()
            .enumerate()
            .map(|(i, t)| ((t.schema.clone(), t.name.clone()), i))
            .collect();

        let mut in_degree = vec![0usize; self.tables.len()];
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); self.tables.len()];
        for (child, table) in self.tables.iter().enumerate() {
            for parent_key in table.referenced_tables() {
                if let Some(&parent) = index.get(&parent_key) {
                    children[parent].push(child);
                    in_degree[child] += 1;
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..self.tables.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.tables.len());
        let mut placed = vec![false; self.tables.len()];

        while let Some(next) = ready.pop_first() {
            placed[next] = true;
            order.push(next);
            for &child in &children[next] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.insert(child);
                }
            }
        }

        if order.len() < self.tables.len() {
            debug!("Foreign key cycle detected; remaining tables keep discovery order");
            order.extend((0..self.tables.len()).filter(|&i| !placed[i]));
        }

        order.into_iter().map(|i| &self.tables[i]).collect()
    }

    /// Order for `DROP TABLE ... CASCADE` in mirror mode: dependents first.
    pub fn drop_order(&self) -> Vec<&TableDescriptor> {
        let mut order = self.dependency_order();
        order.reverse();
        order
    }
}

//! Per-table outcomes and the final run report.

use crate::catalog::TableDescriptor;
use crate::config::RunMode;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Run phase an outcome belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Catalog discovery and per-table description.
    Plan,
    /// Mirror mode only: dropping target tables.
    Drop,
    /// Schemas, sequences and tables.
    Structure,
    /// Row copy.
    Data,
    /// Foreign keys, indexes and sequences.
    Finalize,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Plan => "plan",
            Phase::Drop => "drop",
            Phase::Structure => "structure",
            Phase::Data => "data",
            Phase::Finalize => "finalize",
        };
        f.write_str(s)
    }
}

/// What happened to one table in one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableOutcome {
    pub schema: String,
    pub table: String,
    pub phase: Phase,

    /// Source row count (data phase).
    pub rows_expected: i64,

    /// Rows inserted on the target.
    pub rows_copied: i64,

    /// Rows already present on the target.
    pub rows_skipped: i64,

    /// Rows that could not be inserted.
    pub rows_failed: i64,

    pub errors: Vec<String>,
}

impl TableOutcome {
    pub fn new(schema: impl Into<String>, table: impl Into<String>, phase: Phase) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            phase,
            rows_expected: 0,
            rows_copied: 0,
            rows_skipped: 0,
            rows_failed: 0,
            errors: Vec::new(),
        }
    }

    pub fn for_table(table: &TableDescriptor, phase: Phase) -> Self {
        Self::new(&table.schema, &table.name, phase)
    }

    /// Record a non-fatal error and log it with the table's context.
    pub fn record_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}.{} [{}]: {}", self.schema, self.table, self.phase, message);
        self.errors.push(message);
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Fold another outcome's errors for the same table into this one.
    pub fn absorb(&mut self, other: TableOutcome) {
        self.errors.extend(other.errors);
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

/// Source and target row counts for one table after the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationEntry {
    pub schema: String,
    pub table: String,
    pub source_rows: Option<i64>,
    pub target_rows: Option<i64>,
    pub matches: bool,
}

impl VerificationEntry {
    pub fn new(
        schema: impl Into<String>,
        table: impl Into<String>,
        source_rows: Option<i64>,
        target_rows: Option<i64>,
    ) -> Self {
        let matches = matches!((source_rows, target_rows), (Some(s), Some(t)) if s == t);
        Self {
            schema: schema.into(),
            table: table.into(),
            source_rows,
            target_rows,
            matches,
        }
    }

    /// The target holds fewer rows than the source, or could not be counted.
    ///
    /// In additive mode the target may legitimately hold more rows than the
    /// source, so only a shortfall counts against the run.
    pub fn is_missing_rows(&self) -> bool {
        match (self.source_rows, self.target_rows) {
            (Some(s), Some(t)) => t < s,
            _ => true,
        }
    }
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    CompletedWithErrors,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Completed => "completed",
            RunStatus::CompletedWithErrors => "completed_with_errors",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of a complete run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorReport {
    /// Unique run identifier.
    pub run_id: String,

    pub mode: RunMode,

    /// Plan only; nothing was written to the target.
    pub dry_run: bool,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,

    /// Tables selected for the run.
    pub tables: Vec<String>,

    /// Outcomes in the order they were produced.
    pub outcomes: Vec<TableOutcome>,

    pub verification: Vec<VerificationEntry>,

    pub status: RunStatus,
}

impl MirrorReport {
    /// Distinct tables that recorded at least one error, in first-seen order.
    pub fn tables_with_errors(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for outcome in self.outcomes.iter().filter(|o| !o.is_ok()) {
            let name = outcome.full_name();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Total rows inserted across all tables.
    pub fn rows_copied(&self) -> i64 {
        self.outcomes
            .iter()
            .filter(|o| o.phase == Phase::Data)
            .map(|o| o.rows_copied)
            .sum()
    }

    /// Total rows that could not be inserted.
    pub fn rows_failed(&self) -> i64 {
        self.outcomes
            .iter()
            .filter(|o| o.phase == Phase::Data)
            .map(|o| o.rows_failed)
            .sum()
    }

    /// Outcomes for one phase.
    pub fn phase_outcomes(&self, phase: Phase) -> impl Iterator<Item = &TableOutcome> {
        self.outcomes.iter().filter(move |o| o.phase == phase)
    }

    /// Derive the run status from the outcomes and the verification pass.
    ///
    /// `failed` means no planned table made it through without an error;
    /// any error or row shortfall short of that is `completed_with_errors`.
    pub fn compute_status(&self) -> RunStatus {
        let failing = self.tables_with_errors();
        let missing = self.verification.iter().any(|v| v.is_missing_rows());

        if !self.tables.is_empty() && self.tables.iter().all(|t| failing.contains(t)) {
            RunStatus::Failed
        } else if !failing.is_empty() || missing {
            RunStatus::CompletedWithErrors
        } else {
            RunStatus::Completed
        }
    }

    /// Convert to a pretty JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Phase-by-phase, table-by-table summary for operators.
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Run {} ({}{}): {}\n",
            self.run_id,
            self.mode,
            if self.dry_run { ", dry run" } else { "" },
            self.status
        ));
        out.push_str(&format!(
            "  {} tables, {} rows copied, {} rows failed, {:.1}s\n",
            self.tables.len(),
            self.rows_copied(),
            self.rows_failed(),
            self.duration_seconds
        ));

        for phase in [
            Phase::Plan,
            Phase::Drop,
            Phase::Structure,
            Phase::Data,
            Phase::Finalize,
        ] {
            let outcomes: Vec<&TableOutcome> = self.phase_outcomes(phase).collect();
            if outcomes.is_empty() {
                continue;
            }
            out.push_str(&format!("\n[{}]\n", phase));
            for o in outcomes {
                let state = if o.is_ok() { "ok" } else { "ERRORS" };
                if phase == Phase::Data {
                    out.push_str(&format!(
                        "  {:<40} {:>6}  copied={} skipped={} failed={} expected={}\n",
                        o.full_name(),
                        state,
                        o.rows_copied,
                        o.rows_skipped,
                        o.rows_failed,
                        o.rows_expected
                    ));
                } else {
                    out.push_str(&format!("  {:<40} {:>6}\n", o.full_name(), state));
                }
                for e in &o.errors {
                    out.push_str(&format!("      - {}\n", e));
                }
            }
        }

        if !self.verification.is_empty() {
            out.push_str("\n[verification]\n");
            for v in &self.verification {
                let fmt_count = |c: Option<i64>| c.map_or("?".to_string(), |n| n.to_string());
                out.push_str(&format!(
                    "  {:<40} source={} target={} {}\n",
                    format!("{}.{}", v.schema, v.table),
                    fmt_count(v.source_rows),
                    fmt_count(v.target_rows),
                    if v.matches { "match" } else { "MISMATCH" }
                ));
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(tables: &[&str], outcomes: Vec<TableOutcome>) -> MirrorReport {
        let now = Utc::now();
        MirrorReport {
            run_id: "run".into(),
            mode: RunMode::Migrate,
            dry_run: false,
            started_at: now,
            completed_at: now,
            duration_seconds: 0.0,
            tables: tables.iter().map(|t| t.to_string()).collect(),
            outcomes,
            verification: Vec::new(),
            status: RunStatus::Completed,
        }
    }

    fn data(table: &str, copied: i64, failed: i64) -> TableOutcome {
        let mut o = TableOutcome::new("public", table, Phase::Data);
        o.rows_copied = copied;
        o.rows_failed = failed;
        if failed > 0 {
            o.errors.push(format!("{} rows failed", failed));
        }
        o
    }

    #[test]
    fn test_all_clean_is_completed() {
        let r = report(&["public.a", "public.b"], vec![data("a", 10, 0), data("b", 5, 0)]);
        assert_eq!(r.compute_status(), RunStatus::Completed);
        assert_eq!(r.rows_copied(), 15);
    }

    #[test]
    fn test_some_errors_is_completed_with_errors() {
        let r = report(&["public.a", "public.b"], vec![data("a", 99, 1), data("b", 5, 0)]);
        assert_eq!(r.compute_status(), RunStatus::CompletedWithErrors);
        assert_eq!(r.tables_with_errors(), vec!["public.a".to_string()]);
        assert_eq!(r.rows_failed(), 1);
    }

    #[test]
    fn test_every_table_failing_is_failed() {
        let r = report(&["public.a"], vec![data("a", 0, 3)]);
        assert_eq!(r.compute_status(), RunStatus::Failed);
    }

    #[test]
    fn test_empty_run_is_completed() {
        let r = report(&[], Vec::new());
        assert_eq!(r.compute_status(), RunStatus::Completed);
    }

    #[test]
    fn test_verification_shortfall_counts_as_error() {
        let mut r = report(&["public.a"], vec![data("a", 10, 0)]);
        r.verification
            .push(VerificationEntry::new("public", "a", Some(10), Some(12)));
        assert!(!r.verification[0].matches);
        assert_eq!(r.compute_status(), RunStatus::Completed);

        r.verification
            .push(VerificationEntry::new("public", "a", Some(10), Some(9)));
        assert_eq!(r.compute_status(), RunStatus::CompletedWithErrors);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&RunStatus::CompletedWithErrors).unwrap();
        assert_eq!(json, "\"completed_with_errors\"");
        let json = serde_json::to_string(&Phase::Finalize).unwrap();
        assert_eq!(json, "\"finalize\"");
    }

    #[test]
    fn test_summary_lists_errors_per_table() {
        let r = report(&["public.a"], vec![data("a", 99, 1)]);
        let text = r.render_summary();
        assert!(text.contains("[data]"));
        assert!(text.contains("public.a"));
        assert!(text.contains("- 1 rows failed"));
    }
}

//! Source database introspection and reads.

mod postgres;

pub use postgres::PgSourcePool;

use crate::catalog::{
    ColumnDescriptor, ForeignKeyDescriptor, IndexDescriptor, SchemaRef, TableDescriptor,
};
use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A single column value in transit.
///
/// Every value, JSON included, travels as the text the source server
/// renders for it; the target casts it back to the column type.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Text(String),
}

impl CellValue {
    /// Bind parameter for the target insert.
    pub fn to_param(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            CellValue::Text(s) => Some(s.clone()),
        }
    }

    /// Short rendering used when reporting a failing row.
    pub fn preview(&self) -> String {
        const MAX: usize = 40;
        let text = match self {
            CellValue::Null => return "NULL".to_string(),
            CellValue::Text(s) => s,
        };
        if text.chars().count() > MAX {
            let cut: String = text.chars().take(MAX).collect();
            format!("{}...", cut)
        } else {
            text.clone()
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

/// One row, aligned with `TableDescriptor::copy_columns`.
pub type Row = Vec<CellValue>;

/// Read-side operations against the source database.
#[async_trait]
pub trait SourcePool: Send + Sync {
    /// Non-system schemas.
    async fn list_schemas(&self) -> Result<Vec<SchemaRef>>;

    /// Ordinary and partitioned tables in a schema, sorted by name.
    ///
    /// Individual partitions are left out; their rows are read through the
    /// partitioned parent.
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>>;

    /// Columns in ordinal order.
    async fn describe_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnDescriptor>>;

    /// Primary key columns in key order; empty when there is none.
    async fn describe_primary_key(&self, schema: &str, table: &str) -> Result<Vec<String>>;

    /// One descriptor per foreign key constraint.
    async fn describe_foreign_keys(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ForeignKeyDescriptor>>;

    /// Non-primary-key indexes with reusable definitions.
    async fn describe_indexes(&self, schema: &str, table: &str) -> Result<Vec<IndexDescriptor>>;

    /// Sequence owned by a column, as reported by `pg_get_serial_sequence`.
    async fn serial_sequence(&self, schema: &str, table: &str, column: &str)
        -> Result<Option<String>>;

    /// Exact row count.
    async fn row_count(&self, schema: &str, table: &str) -> Result<i64>;

    /// `MAX(column)`, or 0 for an empty table.
    async fn max_value(&self, schema: &str, table: &str, column: &str) -> Result<i64>;

    /// Stream the table's copy columns in batches of at most `batch_size`
    /// rows over `tx`, reading from a single consistent snapshot.
    ///
    /// Returns early without error when the receiver goes away.
    async fn read_batches(
        &self,
        table: &TableDescriptor,
        batch_size: usize,
        tx: mpsc::Sender<Vec<Row>>,
    ) -> Result<()>;

    /// Close all connections.
    async fn close(&self);

    /// Describe a table completely.
    async fn describe_table(&self, schema: &str, table: &str) -> Result<TableDescriptor> {
        let mut desc = TableDescriptor::new(schema, table);
        desc.columns = self.describe_columns(schema, table).await?;
        desc.primary_key = self.describe_primary_key(schema, table).await?;
        desc.foreign_keys = self.describe_foreign_keys(schema, table).await?;
        desc.indexes = self.describe_indexes(schema, table).await?;
        Ok(desc)
    }
}

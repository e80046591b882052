//! Target database operations.

use crate::catalog::{ForeignKeyDescriptor, IndexDescriptor, TableDescriptor};
use crate::ddl::{self, qualify_table};
use crate::error::{MirrorError, Result};
use crate::source::Row;
use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use tokio_postgres::types::ToSql;
use tracing::debug;

/// Write-side operations against the target database.
///
/// Every statement is idempotent or conflict-tolerant, so any of these can be
/// repeated by a later run.
#[async_trait]
pub trait TargetPool: Send + Sync {
    /// Create a schema if it doesn't exist.
    async fn create_schema(&self, schema: &str) -> Result<()>;

    /// Create a sequence if it doesn't exist (name as a regclass literal).
    async fn create_sequence(&self, name: &str) -> Result<()>;

    /// Create a table with its inline primary key if it doesn't exist.
    async fn create_table(&self, table: &TableDescriptor) -> Result<()>;

    /// Drop a table and everything that depends on it.
    async fn drop_table(&self, schema: &str, table: &str) -> Result<()>;

    /// Drop a foreign key constraint if present.
    async fn drop_foreign_key(&self, table: &TableDescriptor, fk: &ForeignKeyDescriptor)
        -> Result<()>;

    /// Add a foreign key constraint.
    async fn add_foreign_key(&self, table: &TableDescriptor, fk: &ForeignKeyDescriptor)
        -> Result<()>;

    /// Create an index if it doesn't exist.
    async fn create_index(&self, table: &TableDescriptor, index: &IndexDescriptor) -> Result<()>;

    /// Insert rows in one statement, skipping rows that conflict.
    ///
    /// Returns the number of rows actually inserted.
    async fn insert_rows(&self, table: &TableDescriptor, rows: &[Row]) -> Result<u64>;

    /// Exact row count.
    async fn row_count(&self, schema: &str, table: &str) -> Result<i64>;

    /// Sequence owned by a column on the target.
    async fn serial_sequence(&self, schema: &str, table: &str, column: &str)
        -> Result<Option<String>>;

    /// `setval(sequence, value, is_called)`.
    async fn set_sequence(&self, sequence: &str, value: i64, is_called: bool) -> Result<()>;

    /// Close all connections.
    async fn close(&self);
}

/// PostgreSQL target pool implementation.
pub struct PgTargetPool {
    pool: Pool,
}

impl PgTargetPool {
    /// Wrap an already probed pool (see [`crate::pool::build_pool`]).
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn client(&self, context: &str) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MirrorError::pool(e, format!("target: {}", context)))
    }

    async fn execute_ddl(&self, context: &str, sql: &str) -> Result<()> {
        let client = self.client(context).await?;
        debug!("{}", sql);
        client.batch_execute(sql).await?;
        Ok(())
    }
}

#[async_trait]
impl TargetPool for PgTargetPool {
    async fn create_schema(&self, schema: &str) -> Result<()> {
        self.execute_ddl("create_schema", &ddl::create_schema(schema))
            .await
    }

    async fn create_sequence(&self, name: &str) -> Result<()> {
        self.execute_ddl("create_sequence", &ddl::create_sequence(name))
            .await
    }

    async fn create_table(&self, table: &TableDescriptor) -> Result<()> {
        self.execute_ddl("create_table", &ddl::create_table(table))
            .await
    }

    async fn drop_table(&self, schema: &str, table: &str) -> Result<()> {
        self.execute_ddl("drop_table", &ddl::drop_table_cascade(schema, table))
            .await
    }

    async fn drop_foreign_key(
        &self,
        table: &TableDescriptor,
        fk: &ForeignKeyDescriptor,
    ) -> Result<()> {
        self.execute_ddl("drop_foreign_key", &ddl::drop_foreign_key(table, fk))
            .await
    }

    async fn add_foreign_key(
        &self,
        table: &TableDescriptor,
        fk: &ForeignKeyDescriptor,
    ) -> Result<()> {
        self.execute_ddl("add_foreign_key", &ddl::add_foreign_key(table, fk))
            .await
    }

    async fn create_index(&self, _table: &TableDescriptor, index: &IndexDescriptor) -> Result<()> {
        self.execute_ddl("create_index", &ddl::idempotent_index(index))
            .await
    }

    async fn insert_rows(&self, table: &TableDescriptor, rows: &[Row]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let cols = table.copy_columns();
        let sql = ddl::insert_rows(table, &cols, rows.len());

        let params: Vec<Option<String>> = rows
            .iter()
            .flat_map(|row| row.iter().map(|v| v.to_param()))
            .collect();
        let param_refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        let client = self.client("insert_rows").await?;
        let inserted = client.execute(sql.as_str(), &param_refs).await?;
        Ok(inserted)
    }

    async fn row_count(&self, schema: &str, table: &str) -> Result<i64> {
        let client = self.client("row_count").await?;
        let row = client
            .query_one(ddl::count_rows(schema, table).as_str(), &[])
            .await?;
        Ok(row.get(0))
    }

    async fn serial_sequence(
        &self,
        schema: &str,
        table: &str,
        column: &str,
    ) -> Result<Option<String>> {
        let client = self.client("serial_sequence").await?;
        let row = client
            .query_one(
                "SELECT pg_catalog.pg_get_serial_sequence($1, $2)",
                &[&qualify_table(schema, table), &column],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn set_sequence(&self, sequence: &str, value: i64, is_called: bool) -> Result<()> {
        let client = self.client("set_sequence").await?;
        client
            .query_one(
                "SELECT pg_catalog.setval($1::text::regclass, $2, $3)",
                &[&sequence, &value, &is_called],
            )
            .await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close();
    }
}

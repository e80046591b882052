//! PostgreSQL source: catalog introspection and snapshot reads.

use crate::catalog::{
    ColumnDescriptor, ForeignKeyDescriptor, IdentityKind, IndexDescriptor, SchemaRef,
    TableDescriptor,
};
use crate::ddl::{self, qualify_table};
use crate::error::{describe_db_error, MirrorError, Result};
use crate::source::{CellValue, Row, SourcePool};
use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use tokio::sync::mpsc;
use tokio_postgres::IsolationLevel;
use tracing::{debug, info};

/// PostgreSQL source pool implementation.
pub struct PgSourcePool {
    pool: Pool,
}

impl PgSourcePool {
    /// Wrap an already probed pool (see [`crate::pool::build_pool`]).
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn client(&self, context: &str) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MirrorError::pool(e, format!("source: {}", context)))
    }
}

fn referential_action(code: &str) -> String {
    match code {
        "r" => "RESTRICT",
        "c" => "CASCADE",
        "n" => "SET NULL",
        "d" => "SET DEFAULT",
        _ => "NO ACTION",
    }
    .to_string()
}

fn decode_row(row: &tokio_postgres::Row) -> Result<Row> {
    let mut values = Vec::with_capacity(row.len());
    for idx in 0..row.len() {
        let value = match row.try_get::<_, Option<String>>(idx)? {
            Some(s) => CellValue::Text(s),
            None => CellValue::Null,
        };
        values.push(value);
    }
    Ok(values)
}

/// Tables and partitioned parents. A partitioned parent is copied as one
/// plain table holding every partition's rows.
const LIST_TABLES: &str = r#"
    SELECT c.relname::text, c.relkind = 'p'
    FROM pg_catalog.pg_class c
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1
      AND c.relkind IN ('r', 'p')
      AND NOT c.relispartition
    ORDER BY c.relname
"#;

#[async_trait]
impl SourcePool for PgSourcePool {
    async fn list_schemas(&self) -> Result<Vec<SchemaRef>> {
        let client = self.client("list_schemas").await?;
        let rows = client
            .query(
                r#"
                SELECT nspname::text
                FROM pg_catalog.pg_namespace
                WHERE nspname NOT IN ('pg_catalog', 'information_schema')
                  AND nspname NOT LIKE 'pg\_%'
                ORDER BY nspname
                "#,
                &[],
            )
            .await
            .map_err(|e| {
                MirrorError::Introspection(format!("listing schemas: {}", describe_db_error(&e)))
            })?;

        Ok(rows.iter().map(|r| SchemaRef::new(r.get::<_, String>(0))).collect())
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let client = self.client("list_tables").await?;
        let rows = client
            .query(LIST_TABLES, &[&schema])
            .await
            .map_err(|e| {
                MirrorError::Introspection(format!(
                    "listing tables in {}: {}",
                    schema,
                    describe_db_error(&e)
                ))
            })?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.get(0);
            if row.get::<_, bool>(1) {
                info!(
                    "{}.{} is partitioned; its partitions are copied into one plain table",
                    schema, name
                );
            }
            tables.push(name);
        }
        Ok(tables)
    }

    async fn describe_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let client = self.client("describe_columns").await?;
        let rows = client
            .query(
                r#"
                SELECT
                    column_name::text,
                    ordinal_position::int4,
                    data_type::text,
                    udt_schema::text,
                    udt_name::text,
                    is_nullable = 'YES',
                    column_default::text,
                    character_maximum_length::int4,
                    numeric_precision::int4,
                    numeric_scale::int4,
                    identity_generation::text,
                    CASE WHEN is_generated = 'ALWAYS' THEN generation_expression::text END,
                    datetime_precision::int4,
                    domain_schema::text,
                    domain_name::text
                FROM information_schema.columns
                WHERE table_schema = $1 AND table_name = $2
                ORDER BY ordinal_position
                "#,
                &[&schema, &table],
            )
            .await?;

        let columns = rows
            .iter()
            .map(|row| {
                let identity = match row.get::<_, Option<String>>(10).as_deref() {
                    Some("ALWAYS") => Some(IdentityKind::Always),
                    Some(_) => Some(IdentityKind::ByDefault),
                    None => None,
                };
                let column = ColumnDescriptor {
                    name: row.get(0),
                    ordinal_position: row.get(1),
                    data_type: row.get(2),
                    udt_schema: row.get(3),
                    udt_name: row.get(4),
                    nullable: row.get(5),
                    default_expression: row.get(6),
                    max_length: row.get(7),
                    precision: row.get(8),
                    scale: row.get(9),
                    datetime_precision: row.get(12),
                    identity,
                    generation_expression: row.get(11),
                };
                match (row.get::<_, Option<String>>(13), row.get::<_, Option<String>>(14)) {
                    (Some(domain_schema), Some(domain_name)) => {
                        column.with_domain(domain_schema, domain_name)
                    }
                    _ => column,
                }
            })
            .collect();

        Ok(columns)
    }

    async fn describe_primary_key(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        let client = self.client("describe_primary_key").await?;
        let rows = client
            .query(
                r#"
                SELECT a.attname::text
                FROM pg_catalog.pg_index i
                JOIN pg_catalog.pg_class c ON c.oid = i.indrelid
                JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
                CROSS JOIN LATERAL unnest(i.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
                JOIN pg_catalog.pg_attribute a ON a.attrelid = c.oid AND a.attnum = k.attnum
                WHERE n.nspname = $1 AND c.relname = $2 AND i.indisprimary
                ORDER BY k.ord
                "#,
                &[&schema, &table],
            )
            .await?;

        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn describe_foreign_keys(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ForeignKeyDescriptor>> {
        let client = self.client("describe_foreign_keys").await?;
        let rows = client
            .query(
                r#"
                SELECT
                    con.conname::text,
                    ARRAY(
                        SELECT a.attname::text
                        FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
                        JOIN pg_catalog.pg_attribute a
                          ON a.attrelid = con.conrelid AND a.attnum = k.attnum
                        ORDER BY k.ord
                    ),
                    fn.nspname::text,
                    fc.relname::text,
                    ARRAY(
                        SELECT a.attname::text
                        FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
                        JOIN pg_catalog.pg_attribute a
                          ON a.attrelid = con.confrelid AND a.attnum = k.attnum
                        ORDER BY k.ord
                    ),
                    con.confdeltype::text,
                    con.confupdtype::text,
                    con.condeferrable,
                    con.condeferred
                FROM pg_catalog.pg_constraint con
                JOIN pg_catalog.pg_class c ON c.oid = con.conrelid
                JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
                JOIN pg_catalog.pg_class fc ON fc.oid = con.confrelid
                JOIN pg_catalog.pg_namespace fn ON fn.oid = fc.relnamespace
                WHERE con.contype = 'f' AND n.nspname = $1 AND c.relname = $2
                ORDER BY con.conname
                "#,
                &[&schema, &table],
            )
            .await?;

        let fks = rows
            .iter()
            .map(|row| ForeignKeyDescriptor {
                name: row.get(0),
                columns: row.get(1),
                foreign_schema: row.get(2),
                foreign_table: row.get(3),
                foreign_columns: row.get(4),
                on_delete: referential_action(row.get(5)),
                on_update: referential_action(row.get(6)),
                deferrable: row.get(7),
                initially_deferred: row.get(8),
            })
            .collect();

        Ok(fks)
    }

    async fn describe_indexes(&self, schema: &str, table: &str) -> Result<Vec<IndexDescriptor>> {
        let client = self.client("describe_indexes").await?;
        // Exclusion constraint indexes cannot be recreated as plain indexes.
        let rows = client
            .query(
                r#"
                SELECT ic.relname::text, pg_catalog.pg_get_indexdef(i.indexrelid), i.indisunique
                FROM pg_catalog.pg_index i
                JOIN pg_catalog.pg_class ic ON ic.oid = i.indexrelid
                JOIN pg_catalog.pg_class c ON c.oid = i.indrelid
                JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
                WHERE n.nspname = $1 AND c.relname = $2
                  AND NOT i.indisprimary
                  AND NOT EXISTS (
                      SELECT 1 FROM pg_catalog.pg_constraint con
                      WHERE con.conindid = i.indexrelid AND con.contype = 'x'
                  )
                ORDER BY ic.relname
                "#,
                &[&schema, &table],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| IndexDescriptor {
                name: row.get(0),
                definition: row.get(1),
                is_unique: row.get(2),
            })
            .collect())
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

    async fn row_count(&self, schema: &str, table: &str) -> Result<i64> {
        let client = self.client("row_count").await?;
        let row = client
            .query_one(ddl::count_rows(schema, table).as_str(), &[])
            .await?;
        Ok(row.get(0))
    }

    async fn max_value(&self, schema: &str, table: &str, column: &str) -> Result<i64> {
        let client = self.client("max_value").await?;
        let row = client
            .query_one(ddl::max_value(schema, table, column).as_str(), &[])
            .await?;
        Ok(row.get(0))
    }

    async fn read_batches(
        &self,
        table: &TableDescriptor,
        batch_size: usize,
        tx: mpsc::Sender<Vec<Row>>,
    ) -> Result<()> {
        let mut client = self.client("read_batches").await?;
        let sql = ddl::select_rows(table);
        debug!("{}: {}", table.full_name(), sql);

        // One snapshot for the whole table keeps page boundaries stable.
        let txn = client
            .build_transaction()
            .isolation_level(IsolationLevel::RepeatableRead)
            .read_only(true)
            .start()
            .await?;

        let portal = txn.bind(sql.as_str(), &[]).await?;
        let fetch = i32::try_from(batch_size).unwrap_or(i32::MAX).max(1);

        loop {
            let rows = txn.query_portal(&portal, fetch).await?;
            if rows.is_empty() {
                break;
            }
            let exhausted = rows.len() < batch_size;

            let batch = rows
                .iter()
                .map(decode_row)
                .collect::<Result<Vec<_>>>()?;

            if tx.send(batch).await.is_err() {
                debug!("{}: reader stopped, receiver closed", table.full_name());
                break;
            }
            if exhausted {
                break;
            }
        }

        txn.commit().await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close();
    }
}

//! SQL statement builders.
//!
//! Every statement the engine sends is built here as a pure function so it
//! can be checked without a database.

use crate::catalog::{ColumnDescriptor, ForeignKeyDescriptor, IndexDescriptor, TableDescriptor};
use crate::typemap::{cast_type, column_definition};

/// PostgreSQL limit on bind parameters per statement.
pub const MAX_BIND_PARAMS: usize = 65_535;

/// Quote a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Fully qualify a table name.
pub fn qualify_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

fn column_list<S: AsRef<str>>(cols: &[S]) -> String {
    cols.iter()
        .map(|c| quote_ident(c.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn create_schema(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema))
}

/// `CREATE SEQUENCE IF NOT EXISTS` for a regclass-style sequence name.
pub fn create_sequence(name: &str) -> String {
    format!("CREATE SEQUENCE IF NOT EXISTS {}", name)
}

/// Generate DDL for table creation.
///
/// Columns keep their source order; the primary key is declared inline and
/// every other constraint is left for the finalize phase.
pub fn create_table(table: &TableDescriptor) -> String {
    let mut ddl = format!(
        "CREATE TABLE IF NOT EXISTS {} (\n",
        table.qualified_name()
    );

    let mut lines: Vec<String> = table
        .columns
        .iter()
        .map(|col| format!("    {}", column_definition(col)))
        .collect();

    if table.has_primary_key() {
        lines.push(format!("    PRIMARY KEY ({})", column_list(&table.primary_key)));
    }

    ddl.push_str(&lines.join(",\n"));
    ddl.push_str("\n)");
    ddl
}

pub fn drop_table_cascade(schema: &str, table: &str) -> String {
    format!("DROP TABLE IF EXISTS {} CASCADE", qualify_table(schema, table))
}

pub fn drop_foreign_key(table: &TableDescriptor, fk: &ForeignKeyDescriptor) -> String {
    format!(
        "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
        table.qualified_name(),
        quote_ident(&fk.name)
    )
}

pub fn add_foreign_key(table: &TableDescriptor, fk: &ForeignKeyDescriptor) -> String {
    let mut sql = format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
        table.qualified_name(),
        quote_ident(&fk.name),
        column_list(&fk.columns),
        qualify_table(&fk.foreign_schema, &fk.foreign_table),
        column_list(&fk.foreign_columns),
        fk.on_delete,
        fk.on_update
    );
    if fk.deferrable {
        sql.push_str(" DEFERRABLE");
        if fk.initially_deferred {
            sql.push_str(" INITIALLY DEFERRED");
        }
    }
    sql
}

/// Make a captured index definition safe to re-run.
pub fn idempotent_index(index: &IndexDescriptor) -> String {
    let def = index.definition.trim();
    for prefix in ["CREATE UNIQUE INDEX ", "CREATE INDEX "] {
        if let Some(rest) = def.strip_prefix(prefix) {
            if rest.starts_with("IF NOT EXISTS ") {
                return def.to_string();
            }
            return format!("{}IF NOT EXISTS {}", prefix, rest);
        }
    }
    def.to_string()
}

/// Multi-row conflict-tolerant INSERT with textual parameters.
///
/// Each placeholder is cast `$n::text::<type>` so values decoded as text on
/// the source are converted by the target, whatever the column type.
pub fn insert_rows(
    table: &TableDescriptor,
    cols: &[&ColumnDescriptor],
    row_count: usize,
) -> String {
    let names: Vec<&str> = cols.iter().map(|c| c.name.as_str()).collect();
    let casts: Vec<String> = cols.iter().map(|c| cast_type(c)).collect();

    let mut idx = 1;
    let mut value_rows = Vec::with_capacity(row_count);
    for _ in 0..row_count {
        let placeholders: Vec<String> = casts
            .iter()
            .map(|cast| {
                let p = format!("${}::text::{}", idx, cast);
                idx += 1;
                p
            })
            .collect();
        value_rows.push(format!("({})", placeholders.join(", ")));
    }

    let overriding = if table.has_identity() {
        " OVERRIDING SYSTEM VALUE"
    } else {
        ""
    };

    format!(
        "INSERT INTO {} ({}){} VALUES {} ON CONFLICT DO NOTHING",
        table.qualified_name(),
        column_list(&names),
        overriding,
        value_rows.join(", ")
    )
}

/// Largest number of rows per INSERT that stays under the parameter limit.
pub fn max_rows_per_insert(batch_size: usize, column_count: usize) -> usize {
    let by_params = MAX_BIND_PARAMS / column_count.max(1);
    batch_size.min(by_params).max(1)
}

/// Ordering key for reading a table in stable pages.
///
/// The primary key when there is one; otherwise every orderable column.
pub fn order_key(table: &TableDescriptor) -> Vec<String> {
    if table.has_primary_key() {
        return table.primary_key.clone();
    }
    table
        .copy_columns()
        .iter()
        .filter(|c| c.is_orderable())
        .map(|c| c.name.clone())
        .collect()
}

/// Source read query selecting every copied column as its text
/// representation.
///
/// JSON documents are rendered by the server too, so numbers of any size or
/// precision reach the target digit for digit.
pub fn select_rows(table: &TableDescriptor) -> String {
    let cols: Vec<String> = table
        .copy_columns()
        .iter()
        .map(|c| format!("{}::text", quote_ident(&c.name)))
        .collect();

    let mut sql = format!(
        "SELECT {} FROM {}",
        cols.join(", "),
        table.qualified_name()
    );

    let key = order_key(table);
    if !key.is_empty() {
        sql.push_str(&format!(" ORDER BY {}", column_list(&key)));
    }
    sql
}

pub fn count_rows(schema: &str, table: &str) -> String {
    format!("SELECT COUNT(*)::int8 FROM {}", qualify_table(schema, table))
}

pub fn max_value(schema: &str, table: &str, column: &str) -> String {
    format!(
        "SELECT COALESCE(MAX({})::bigint, 0) FROM {}",
        quote_ident(column),
        qualify_table(schema, table)
    )
}

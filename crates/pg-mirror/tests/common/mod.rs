//! In-memory source and target used by the engine tests.

#![allow(dead_code)]

use async_trait::async_trait;
use pg_mirror::catalog::{
    ColumnDescriptor, ForeignKeyDescriptor, IndexDescriptor, SchemaRef, TableDescriptor,
};
use pg_mirror::source::{CellValue, Row, SourcePool};
use pg_mirror::target::TargetPool;
use pg_mirror::{MirrorError, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::mpsc;

pub fn int_col(name: &str, ordinal: i32) -> ColumnDescriptor {
    ColumnDescriptor::new(name, ordinal, "integer", "int4")
}

pub fn text_col(name: &str, ordinal: i32) -> ColumnDescriptor {
    ColumnDescriptor::new(name, ordinal, "text", "text")
}

pub fn serial_col(name: &str, ordinal: i32, sequence: &str) -> ColumnDescriptor {
    let mut col = int_col(name, ordinal);
    col.nullable = false;
    col.default_expression = Some(format!("nextval('{}'::regclass)", sequence));
    col
}

pub fn fk(
    name: &str,
    columns: &[&str],
    foreign_table: &str,
    foreign_columns: &[&str],
) -> ForeignKeyDescriptor {
    ForeignKeyDescriptor {
        name: name.to_string(),
        columns: columns.iter().map(|c| c.to_string()).collect(),
        foreign_schema: "public".to_string(),
        foreign_table: foreign_table.to_string(),
        foreign_columns: foreign_columns.iter().map(|c| c.to_string()).collect(),
        on_delete: "NO ACTION".to_string(),
        on_update: "NO ACTION".to_string(),
        deferrable: false,
        initially_deferred: false,
    }
}

pub fn text_row(values: &[Option<&str>]) -> Row {
    values
        .iter()
        .map(|v| match v {
            Some(s) => CellValue::from(*s),
            None => CellValue::Null,
        })
        .collect()
}

fn key(schema: &str, table: &str) -> String {
    format!("{}.{}", schema, table)
}

fn fake_error(message: impl ToString) -> MirrorError {
    MirrorError::pool(message, "in-memory database")
}

/// Column names of a `CREATE [UNIQUE] INDEX ... (a, b)` definition.
fn index_columns(definition: &str) -> Vec<String> {
    let open = definition.rfind('(').map_or(0, |i| i + 1);
    let close = definition[open..].find(')').map_or(definition.len(), |i| open + i);
    definition[open..close]
        .split(',')
        .map(|c| c.trim().trim_matches('"').to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Key values of `row`, or `None` when any of them is NULL (NULLs never
/// conflict).
fn key_values(row: &HashMap<String, Option<String>>, columns: &[String]) -> Option<Vec<String>> {
    columns
        .iter()
        .map(|c| row.get(c).cloned().flatten())
        .collect()
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

pub struct SourceTable {
    pub desc: TableDescriptor,
    pub rows: Vec<Row>,
}

#[derive(Default)]
pub struct FakeSource {
    pub tables: Vec<SourceTable>,
    /// `schema.table.column` -> sequence reported by the catalog lookup.
    pub serial: HashMap<String, String>,
    /// `schema.table` entries whose description fails.
    pub broken: HashSet<String>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, desc: TableDescriptor, rows: Vec<Row>) {
        self.tables.push(SourceTable { desc, rows });
    }

    fn table(&self, schema: &str, table: &str) -> Result<&SourceTable> {
        if self.broken.contains(&key(schema, table)) {
            return Err(MirrorError::Introspection(format!(
                "permission denied for table {}",
                table
            )));
        }
        self.tables
            .iter()
            .find(|t| t.desc.schema == schema && t.desc.name == table)
            .ok_or_else(|| fake_error(format!("relation {}.{} does not exist", schema, table)))
    }
}

#[async_trait]
impl SourcePool for FakeSource {
    async fn list_schemas(&self) -> Result<Vec<SchemaRef>> {
        let mut names: Vec<String> = self.tables.iter().map(|t| t.desc.schema.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names.into_iter().map(SchemaRef::new).collect())
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .tables
            .iter()
            .filter(|t| t.desc.schema == schema)
            .map(|t| t.desc.name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn describe_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnDescriptor>> {
        Ok(self.table(schema, table)?.desc.columns.clone())
    }

    async fn describe_primary_key(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        Ok(self.table(schema, table)?.desc.primary_key.clone())
    }

    async fn describe_foreign_keys(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ForeignKeyDescriptor>> {
        Ok(self.table(schema, table)?.desc.foreign_keys.clone())
    }

    async fn describe_indexes(&self, schema: &str, table: &str) -> Result<Vec<IndexDescriptor>> {
        Ok(self.table(schema, table)?.desc.indexes.clone())
    }

    async fn serial_sequence(
        &self,
        schema: &str,
        table: &str,
        column: &str,
    ) -> Result<Option<String>> {
        Ok(self
            .serial
            .get(&format!("{}.{}.{}", schema, table, column))
            .cloned())
    }

    async fn row_count(&self, schema: &str, table: &str) -> Result<i64> {
        Ok(self.table(schema, table)?.rows.len() as i64)
    }

    async fn max_value(&self, schema: &str, table: &str, column: &str) -> Result<i64> {
        let t = self.table(schema, table)?;
        let pos = t
            .desc
            .copy_columns()
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| fake_error(format!("column {} does not exist", column)))?;
        Ok(t.rows
            .iter()
            .filter_map(|r| match &r[pos] {
                CellValue::Text(s) => s.parse::<i64>().ok(),
                _ => None,
            })
            .max()
            .unwrap_or(0))
    }

    async fn read_batches(
        &self,
        table: &TableDescriptor,
        batch_size: usize,
        tx: mpsc::Sender<Vec<Row>>,
    ) -> Result<()> {
        let t = self.table(&table.schema, &table.name)?;
        for chunk in t.rows.chunks(batch_size) {
            if tx.send(chunk.to_vec()).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn close(&self) {}
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

pub struct TargetTable {
    pub desc: TableDescriptor,
    /// Stored values by column name.
    pub rows: Vec<HashMap<String, Option<String>>>,
}

impl TargetTable {
    pub fn column_names(&self) -> Vec<String> {
        self.desc.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn values(&self, column: &str) -> Vec<Option<String>> {
        self.rows
            .iter()
            .map(|r| r.get(column).cloned().flatten())
            .collect()
    }
}

#[derive(Default)]
pub struct TargetState {
    pub schemas: HashSet<String>,
    pub tables: BTreeMap<String, TargetTable>,
    /// name -> (value, is_called)
    pub sequences: HashMap<String, (i64, bool)>,
    /// table -> constraint name -> descriptor
    pub foreign_keys: HashMap<String, BTreeMap<String, ForeignKeyDescriptor>>,
    pub indexes: HashSet<String>,
    /// index name -> owning table
    pub index_owner: HashMap<String, String>,
    /// table -> column lists of its unique indexes
    pub unique_keys: HashMap<String, Vec<Vec<String>>>,
    /// DDL log in execution order.
    pub log: Vec<String>,
    /// Tables whose inserts fail.
    pub failing_inserts: HashSet<String>,
}

#[derive(Default)]
pub struct FakeTarget {
    pub state: Mutex<TargetState>,
}

impl FakeTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&mut TargetState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn row_count_of(&self, schema: &str, table: &str) -> Option<usize> {
        self.with_state(|s| s.tables.get(&key(schema, table)).map(|t| t.rows.len()))
    }

    /// Next value a sequence would hand out.
    pub fn next_value(&self, sequence: &str) -> Option<i64> {
        self.with_state(|s| {
            s.sequences
                .get(sequence)
                .map(|(v, called)| if *called { v + 1 } else { *v })
        })
    }

    fn identity_sequence(table: &TableDescriptor, column: &str) -> String {
        format!("{}.{}_{}_seq", table.schema, table.name, column)
    }
}

#[async_trait]
impl TargetPool for FakeTarget {
    async fn create_schema(&self, schema: &str) -> Result<()> {
        self.with_state(|s| {
            s.schemas.insert(schema.to_string());
            s.log.push(format!("CREATE SCHEMA {}", schema));
        });
        Ok(())
    }

    async fn create_sequence(&self, name: &str) -> Result<()> {
        self.with_state(|s| {
            s.sequences.entry(name.to_string()).or_insert((1, false));
            s.log.push(format!("CREATE SEQUENCE {}", name));
        });
        Ok(())
    }

    async fn create_table(&self, table: &TableDescriptor) -> Result<()> {
        self.with_state(|s| {
            if !s.schemas.contains(&table.schema) {
                return Err(fake_error(format!("schema {} does not exist", table.schema)));
            }
            let k = table.full_name();
            if s.tables.contains_key(&k) {
                return Ok(());
            }
            for col in &table.columns {
                if let Some(seq) = col.default_sequence() {
                    if !s.sequences.contains_key(&seq) {
                        return Err(fake_error(format!("relation {} does not exist", seq)));
                    }
                }
                if col.identity.is_some() {
                    s.sequences
                        .insert(Self::identity_sequence(table, &col.name), (1, false));
                }
            }
            s.tables.insert(
                k.clone(),
                TargetTable {
                    desc: table.clone(),
                    rows: Vec::new(),
                },
            );
            s.log.push(format!("CREATE TABLE {}", k));
            Ok(())
        })
    }

    async fn drop_table(&self, schema: &str, table: &str) -> Result<()> {
        self.with_state(|s| {
            let k = key(schema, table);
            s.tables.remove(&k);
            s.foreign_keys.remove(&k);
            s.unique_keys.remove(&k);
            let owned: Vec<String> = s
                .index_owner
                .iter()
                .filter(|(_, owner)| **owner == k)
                .map(|(name, _)| name.clone())
                .collect();
            for name in owned {
                s.index_owner.remove(&name);
                s.indexes.remove(&name);
            }
            for fks in s.foreign_keys.values_mut() {
                fks.retain(|_, fk| !(fk.foreign_schema == schema && fk.foreign_table == table));
            }
            s.log.push(format!("DROP TABLE {}", k));
        });
        Ok(())
    }

    async fn drop_foreign_key(
        &self,
        table: &TableDescriptor,
        fk: &ForeignKeyDescriptor,
    ) -> Result<()> {
        self.with_state(|s| {
            if let Some(fks) = s.foreign_keys.get_mut(&table.full_name()) {
                fks.remove(&fk.name);
            }
            s.log.push(format!("DROP CONSTRAINT {}", fk.name));
        });
        Ok(())
    }

    async fn add_foreign_key(
        &self,
        table: &TableDescriptor,
        fk: &ForeignKeyDescriptor,
    ) -> Result<()> {
        self.with_state(|s| {
            let referenced = key(&fk.foreign_schema, &fk.foreign_table);
            let Some(parent) = s.tables.get(&referenced) else {
                return Err(fake_error(format!("relation {} does not exist", referenced)));
            };
            let wanted: BTreeSet<&String> = fk.foreign_columns.iter().collect();
            let matches = |cols: &Vec<String>| cols.iter().collect::<BTreeSet<_>>() == wanted;
            let keyed = matches(&parent.desc.primary_key)
                || s
                    .unique_keys
                    .get(&referenced)
                    .is_some_and(|keys| keys.iter().any(matches));
            if !keyed {
                return Err(fake_error(format!(
                    "there is no unique constraint matching given keys for referenced table \"{}\"",
                    fk.foreign_table
                )));
            }
            let fks = s.foreign_keys.entry(table.full_name()).or_default();
            if fks.contains_key(&fk.name) {
                return Err(fake_error(format!("constraint \"{}\" already exists", fk.name)));
            }
            fks.insert(fk.name.clone(), fk.clone());
            s.log.push(format!("ADD CONSTRAINT {}", fk.name));
            Ok(())
        })
    }

    async fn create_index(&self, table: &TableDescriptor, index: &IndexDescriptor) -> Result<()> {
        self.with_state(|s| {
            // IF NOT EXISTS
            if s.indexes.contains(&index.name) {
                return Ok(());
            }
            let k = table.full_name();
            if index.is_unique {
                let columns = index_columns(&index.definition);
                let rows = s.tables.get(&k).map(|t| t.rows.as_slice()).unwrap_or_default();
                let mut seen = HashSet::new();
                let duplicated = rows
                    .iter()
                    .filter_map(|r| key_values(r, &columns))
                    .any(|key| !seen.insert(key));
                if duplicated {
                    return Err(fake_error(format!(
                        "could not create unique index \"{}\"",
                        index.name
                    )));
                }
                s.unique_keys.entry(k.clone()).or_default().push(columns);
                s.log.push(format!("CREATE UNIQUE INDEX {}", index.name));
            } else {
                s.log.push(format!("CREATE INDEX {}", index.name));
            }
            s.indexes.insert(index.name.clone());
            s.index_owner.insert(index.name.clone(), k);
            Ok(())
        })
    }

    async fn insert_rows(&self, table: &TableDescriptor, rows: &[Row]) -> Result<u64> {
        self.with_state(|s| {
            let k = table.full_name();
            if s.failing_inserts.contains(&k) {
                return Err(fake_error("could not write to relation: disk full"));
            }
            let unique_keys = s.unique_keys.get(&k).cloned().unwrap_or_default();
            let target = s
                .tables
                .get_mut(&k)
                .ok_or_else(|| fake_error(format!("relation {} does not exist", k)))?;

            let names: Vec<String> = table.copy_columns().iter().map(|c| c.name.clone()).collect();
            let incoming: Vec<HashMap<String, Option<String>>> = rows
                .iter()
                .map(|row| {
                    names
                        .iter()
                        .cloned()
                        .zip(row.iter().map(|v| v.to_param()))
                        .collect()
                })
                .collect();

            // The whole statement fails on any constraint violation
            for row in &incoming {
                for col in &target.desc.columns {
                    if !col.nullable && col.generation_expression.is_none() {
                        if let Some(None) = row.get(&col.name) {
                            return Err(fake_error(format!(
                                "null value in column \"{}\" violates not-null constraint",
                                col.name
                            )));
                        }
                    }
                }
            }

            // ON CONFLICT DO NOTHING against the primary key and every
            // unique index that exists right now
            let mut keys: Vec<Vec<String>> = Vec::new();
            if !target.desc.primary_key.is_empty() {
                keys.push(target.desc.primary_key.clone());
            }
            keys.extend(unique_keys);
            let mut seen: Vec<HashSet<Vec<String>>> = keys
                .iter()
                .map(|cols| target.rows.iter().filter_map(|r| key_values(r, cols)).collect())
                .collect();

            let mut inserted = 0;
            for row in incoming {
                let row_keys: Vec<Option<Vec<String>>> =
                    keys.iter().map(|cols| key_values(&row, cols)).collect();
                let conflict = row_keys
                    .iter()
                    .zip(&seen)
                    .any(|(key, existing)| key.as_ref().is_some_and(|k| existing.contains(k)));
                if conflict {
                    continue;
                }
                for (key, existing) in row_keys.into_iter().zip(seen.iter_mut()) {
                    if let Some(key) = key {
                        existing.insert(key);
                    }
                }
                target.rows.push(row);
                inserted += 1;
            }
            Ok(inserted)
        })
    }

    async fn row_count(&self, schema: &str, table: &str) -> Result<i64> {
        self.row_count_of(schema, table)
            .map(|n| n as i64)
            .ok_or_else(|| fake_error(format!("relation {}.{} does not exist", schema, table)))
    }

    async fn serial_sequence(
        &self,
        schema: &str,
        table: &str,
        column: &str,
    ) -> Result<Option<String>> {
        self.with_state(|s| {
            let Some(t) = s.tables.get(&key(schema, table)) else {
                return Ok(None);
            };
            Ok(t.desc
                .column(column)
                .filter(|c| c.identity.is_some())
                .map(|_| Self::identity_sequence(&t.desc, column)))
        })
    }

    async fn set_sequence(&self, sequence: &str, value: i64, is_called: bool) -> Result<()> {
        self.with_state(|s| match s.sequences.get_mut(sequence) {
            Some(entry) => {
                *entry = (value, is_called);
                Ok(())
            }
            None => Err(fake_error(format!("relation \"{}\" does not exist", sequence))),
        })
    }

    async fn close(&self) {}
}

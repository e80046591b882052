//! Schema and metadata descriptors discovered from the source catalog.

use serde::{Deserialize, Serialize};

/// A non-system namespace on the source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaRef {
    /// Schema name.
    pub name: String,
}

impl SchemaRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Table metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Schema name.
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Column definitions, in source ordinal order.
    pub columns: Vec<ColumnDescriptor>,

    /// Primary key column names, in key order.
    pub primary_key: Vec<String>,

    /// Foreign key constraints.
    pub foreign_keys: Vec<ForeignKeyDescriptor>,

    /// Non-primary key indexes.
    pub indexes: Vec<IndexDescriptor>,
}

impl TableDescriptor {
    /// Create an empty descriptor for a table.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Get the fully qualified table name (unquoted, for display).
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Quoted `"schema"."table"` for SQL.
    pub fn qualified_name(&self) -> String {
        crate::ddl::qualify_table(&self.schema, &self.name)
    }

    /// Check if the table has a primary key.
    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Whether `ON CONFLICT DO NOTHING` can detect rows that already exist.
    ///
    /// Holds on the target only once the unique indexes exist there, which
    /// is why they are created with the table rather than after the copy.
    pub fn has_conflict_target(&self) -> bool {
        self.has_primary_key() || self.indexes.iter().any(|i| i.is_unique)
    }

    /// Unique indexes, created together with the table.
    pub fn unique_indexes(&self) -> impl Iterator<Item = &IndexDescriptor> {
        self.indexes.iter().filter(|i| i.is_unique)
    }

    /// Plain indexes, created after the data is copied.
    pub fn secondary_indexes(&self) -> impl Iterator<Item = &IndexDescriptor> {
        self.indexes.iter().filter(|i| !i.is_unique)
    }

    /// Columns whose values are copied, in ordinal order.
    ///
    /// Stored generated columns are computed by the target and cannot be
    /// written to.
    pub fn copy_columns(&self) -> Vec<&ColumnDescriptor> {
        self.columns
            .iter()
            .filter(|c| c.generation_expression.is_none())
            .collect()
    }

    /// Whether any copied column is an identity column.
    pub fn has_identity(&self) -> bool {
        self.copy_columns().iter().any(|c| c.identity.is_some())
    }

    /// Tables referenced by this table's foreign keys, excluding itself.
    pub fn referenced_tables(&self) -> Vec<(String, String)> {
        let mut refs: Vec<(String, String)> = Vec::new();
        for fk in &self.foreign_keys {
            let key = (fk.foreign_schema.clone(), fk.foreign_table.clone());
            if key.0 == self.schema && key.1 == self.name {
                continue;
            }
            if !refs.contains(&key) {
                refs.push(key);
            }
        }
        refs
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Identity column flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    Always,
    ByDefault,
}

/// Column metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,

    /// Ordinal position (1-based).
    pub ordinal_position: i32,

    /// Native type name as reported by `information_schema`
    /// (e.g. "integer", "character varying", "ARRAY", "USER-DEFINED").
    pub data_type: String,

    /// Schema of the underlying type (`pg_catalog` for built-ins).
    pub udt_schema: String,

    /// Underlying type name (e.g. "int4", "varchar", "_text").
    pub udt_name: String,

    /// Whether the column allows NULL.
    pub nullable: bool,

    /// Raw default expression.
    pub default_expression: Option<String>,

    /// Maximum length for string/bit types.
    pub max_length: Option<i32>,

    /// Numeric precision.
    pub precision: Option<i32>,

    /// Numeric scale.
    pub scale: Option<i32>,

    /// Fractional seconds precision of time and timestamp types.
    #[serde(default)]
    pub datetime_precision: Option<i32>,

    /// Identity column kind, if any.
    pub identity: Option<IdentityKind>,

    /// Expression of a stored generated column.
    pub generation_expression: Option<String>,
}

impl ColumnDescriptor {
    /// Create a nullable column with a built-in type, no default.
    pub fn new(
        name: impl Into<String>,
        ordinal_position: i32,
        data_type: &str,
        udt_name: &str,
    ) -> Self {
        Self {
            name: name.into(),
            ordinal_position,
            data_type: data_type.to_string(),
            udt_schema: "pg_catalog".to_string(),
            udt_name: udt_name.to_string(),
            nullable: true,
            default_expression: None,
            max_length: None,
            precision: None,
            scale: None,
            datetime_precision: None,
            identity: None,
            generation_expression: None,
        }
    }

    /// Declare the column with a domain instead of the domain's base type.
    ///
    /// `information_schema` describes domain columns by their base type, so
    /// the domain and its checks would otherwise be flattened away.
    pub fn with_domain(mut self, schema: impl Into<String>, name: impl Into<String>) -> Self {
        self.data_type = "USER-DEFINED".to_string();
        self.udt_schema = schema.into();
        self.udt_name = name.into();
        self.max_length = None;
        self.precision = None;
        self.scale = None;
        self.datetime_precision = None;
        self
    }

    /// Whether the column is fed by a sequence (serial default or identity).
    pub fn is_sequence_backed(&self) -> bool {
        self.identity.is_some() || self.default_sequence().is_some()
    }

    /// Sequence named by a `nextval('...'::regclass)` default, as written.
    pub fn default_sequence(&self) -> Option<String> {
        parse_nextval(self.default_expression.as_deref()?)
    }

    /// Whether the type supports ordering (usable as a pagination key).
    pub fn is_orderable(&self) -> bool {
        !matches!(
            self.udt_name.as_str(),
            "json" | "xml" | "point" | "line" | "lseg" | "box" | "path" | "polygon" | "circle"
        ) && self.data_type != "ARRAY"
            && self.data_type != "USER-DEFINED"
    }
}

/// Extract the sequence name from a `nextval('name'::regclass)` expression.
///
/// The returned text keeps the quoting of the regclass literal, so it can be
/// spliced back into SQL as-is.
pub fn parse_nextval(expression: &str) -> Option<String> {
    let start = expression.find("nextval('")? + "nextval('".len();
    let rest = &expression[start..];
    let mut name = String::new();
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' {
            if chars.peek() == Some(&'\'') {
                name.push('\'');
                chars.next();
                continue;
            }
            return if name.is_empty() { None } else { Some(name) };
        }
        name.push(c);
    }
    None
}

/// Foreign key metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyDescriptor {
    /// Constraint name.
    pub name: String,

    /// Local column names, in key order.
    pub columns: Vec<String>,

    /// Referenced schema name.
    pub foreign_schema: String,

    /// Referenced table name.
    pub foreign_table: String,

    /// Referenced column names, pairwise with `columns`.
    pub foreign_columns: Vec<String>,

    /// ON DELETE action (SQL spelling, e.g. "CASCADE").
    pub on_delete: String,

    /// ON UPDATE action.
    pub on_update: String,

    /// DEFERRABLE constraint.
    #[serde(default)]
    pub deferrable: bool,

    /// INITIALLY DEFERRED constraint.
    #[serde(default)]
    pub initially_deferred: bool,
}

impl ForeignKeyDescriptor {
    /// Local and referenced column lists pair up.
    pub fn is_well_formed(&self) -> bool {
        !self.columns.is_empty() && self.columns.len() == self.foreign_columns.len()
    }
}

/// Index metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Index name.
    pub name: String,

    /// Full create statement as produced by `pg_get_indexdef`.
    pub definition: String,

    /// Whether the index is unique.
    pub is_unique: bool,
}

/// A sequence backing a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceRef {
    /// Sequence name as a regclass literal (may be schema-qualified and quoted).
    pub name: String,

    /// Owning table's schema.
    pub schema: String,

    /// Owning table.
    pub table: String,

    /// Owning column.
    pub column: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nextval() {
        assert_eq!(
            parse_nextval("nextval('users_id_seq'::regclass)"),
            Some("users_id_seq".to_string())
        );
        assert_eq!(
            parse_nextval("nextval('app.\"Orders_id_seq\"'::regclass)"),
            Some("app.\"Orders_id_seq\"".to_string())
        );
        assert_eq!(
            parse_nextval("nextval('it''s_seq'::regclass)"),
            Some("it's_seq".to_string())
        );
        assert_eq!(parse_nextval("now()"), None);
        assert_eq!(parse_nextval("nextval(''::regclass)"), None);
    }

    #[test]
    fn test_sequence_backed_columns() {
        let mut serial = ColumnDescriptor::new("id", 1, "integer", "int4");
        serial.default_expression = Some("nextval('t_id_seq'::regclass)".into());
        assert!(serial.is_sequence_backed());

        let mut identity = ColumnDescriptor::new("id", 1, "bigint", "int8");
        identity.identity = Some(IdentityKind::Always);
        assert!(identity.is_sequence_backed());

        let plain = ColumnDescriptor::new("name", 2, "text", "text");
        assert!(!plain.is_sequence_backed());
    }

    #[test]
    fn test_conflict_target() {
        let mut table = TableDescriptor::new("public", "t");
        assert!(!table.has_conflict_target());
        table.indexes.push(IndexDescriptor {
            name: "t_email_key".into(),
            definition: "CREATE UNIQUE INDEX t_email_key ON public.t USING btree (email)".into(),
            is_unique: true,
        });
        assert!(table.has_conflict_target());
    }

    #[test]
    fn test_unique_and_secondary_indexes() {
        let mut table = TableDescriptor::new("public", "tags");
        for (name, unique) in [("tags_name_key", true), ("tags_created_idx", false)] {
            table.indexes.push(IndexDescriptor {
                name: name.into(),
                definition: String::new(),
                is_unique: unique,
            });
        }
        let unique: Vec<&str> = table.unique_indexes().map(|i| i.name.as_str()).collect();
        let plain: Vec<&str> = table.secondary_indexes().map(|i| i.name.as_str()).collect();
        assert_eq!(unique, vec!["tags_name_key"]);
        assert_eq!(plain, vec!["tags_created_idx"]);
    }

    #[test]
    fn test_domain_column_keeps_domain() {
        let mut base = ColumnDescriptor::new("email", 1, "character varying", "varchar");
        base.max_length = Some(254);
        let col = base.with_domain("app", "email_address");
        assert_eq!(col.data_type, "USER-DEFINED");
        assert_eq!(col.udt_schema, "app");
        assert_eq!(col.udt_name, "email_address");
        assert_eq!(col.max_length, None);
    }

    #[test]
    fn test_copy_columns_skip_generated() {
        let mut table = TableDescriptor::new("public", "t");
        table.columns.push(ColumnDescriptor::new("a", 1, "integer", "int4"));
        let mut generated = ColumnDescriptor::new("b", 2, "integer", "int4");
        generated.generation_expression = Some("(a * 2)".into());
        table.columns.push(generated);
        let names: Vec<&str> = table.copy_columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a"]);
    }

    #[test]
    fn test_referenced_tables_skip_self() {
        let mut table = TableDescriptor::new("public", "employees");
        for (name, target) in [("fk_manager", "employees"), ("fk_dept", "departments")] {
            table.foreign_keys.push(ForeignKeyDescriptor {
                name: name.into(),
                columns: vec!["x".into()],
                foreign_schema: "public".into(),
                foreign_table: target.into(),
                foreign_columns: vec!["id".into()],
                on_delete: "NO ACTION".into(),
                on_update: "NO ACTION".into(),
                deferrable: false,
                initially_deferred: false,
            });
        }
        assert_eq!(
            table.referenced_tables(),
            vec![("public".to_string(), "departments".to_string())]
        );
    }
}

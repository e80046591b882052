//! Type mapping from introspected column metadata to target declarations.
//!
//! Source and target are the same engine family, so most types map to
//! themselves. Types this table does not know are passed through unchanged:
//! that is a best-effort fallback, and a type the target cannot resolve will
//! surface as a reported `CREATE TABLE` failure rather than being rewritten.

use crate::catalog::ColumnDescriptor;
use crate::ddl::quote_ident;
use tracing::debug;

/// Map a column to its target type declaration.
pub fn map_type(col: &ColumnDescriptor) -> String {
    match col.data_type.to_lowercase().as_str() {
        // Parametrised strings carry their length
        "character varying" => with_length("varchar", col.max_length),
        "character" => with_length("char", col.max_length),
        "bit" => with_length("bit", col.max_length),
        "bit varying" => with_length("varbit", col.max_length),

        // Exact numerics carry precision/scale when present
        "numeric" | "decimal" => match (col.precision, col.scale) {
            (Some(p), Some(s)) if p > 0 => format!("numeric({},{})", p, s),
            (Some(p), None) if p > 0 => format!("numeric({})", p),
            _ => "numeric".to_string(),
        },

        // Date/time types carry fractional seconds precision
        "timestamp without time zone" => with_precision("timestamp", col.datetime_precision),
        "timestamp with time zone" => with_precision("timestamptz", col.datetime_precision),
        "time without time zone" => with_precision("time", col.datetime_precision),
        "time with time zone" => with_precision("timetz", col.datetime_precision),

        // Integer and floating point
        "smallint" => "smallint".to_string(),
        "integer" => "integer".to_string(),
        "bigint" => "bigint".to_string(),
        "real" => "real".to_string(),
        "double precision" => "double precision".to_string(),

        // Types that are spelled the same on both sides
        "text" | "boolean" | "date" | "interval" | "bytea" | "uuid" | "json" | "jsonb"
        | "xml" | "money" | "inet" | "cidr" | "macaddr" | "macaddr8" | "tsvector"
        | "tsquery" | "point" | "line" | "lseg" | "box" | "path" | "polygon" | "circle"
        | "oid" | "int4range" | "int8range" | "numrange" | "tsrange" | "tstzrange"
        | "daterange" => col.data_type.to_lowercase(),

        // Arrays: element type from the underscore-prefixed udt name
        "array" => match col.udt_name.strip_prefix('_') {
            Some(element) => format!("{}[]", qualified_udt(&col.udt_schema, element)),
            None => fallback(col),
        },

        // Enums, domains, composite and extension types
        "user-defined" => qualified_udt(&col.udt_schema, &col.udt_name),

        _ => fallback(col),
    }
}

/// Pass a default expression through unmodified.
///
/// Defaults that are not valid on the target are caught when the table is
/// created and reported there; they are never silently dropped.
pub fn map_default(expression: Option<&str>) -> Option<String> {
    expression.map(|e| e.to_string())
}

/// Full column definition for `CREATE TABLE`.
pub fn column_definition(col: &ColumnDescriptor) -> String {
    let mut def = format!("{} {}", quote_ident(&col.name), map_type(col));

    if let Some(expr) = &col.generation_expression {
        def.push_str(&format!(" GENERATED ALWAYS AS ({}) STORED", expr));
    } else if col.identity.is_some() {
        // Always BY DEFAULT so migrated ids can be inserted verbatim
        def.push_str(" GENERATED BY DEFAULT AS IDENTITY");
    } else if let Some(default) = map_default(col.default_expression.as_deref()) {
        def.push_str(&format!(" DEFAULT {}", default));
    }

    if !col.nullable {
        def.push_str(" NOT NULL");
    }

    def
}

/// Base type used to cast a textual parameter into this column.
///
/// Carries no length/precision modifier: an explicit cast to
/// `varchar(n)` truncates, while assignment to the column raises an error.
pub fn cast_type(col: &ColumnDescriptor) -> String {
    qualified_udt(&col.udt_schema, &col.udt_name)
}

fn with_length(base: &str, length: Option<i32>) -> String {
    match length {
        Some(n) if n > 0 => format!("{}({})", base, n),
        _ => base.to_string(),
    }
}

fn with_precision(base: &str, precision: Option<i32>) -> String {
    match precision {
        Some(p) if p >= 0 => format!("{}({})", base, p),
        _ => base.to_string(),
    }
}

fn qualified_udt(schema: &str, name: &str) -> String {
    if schema.is_empty() {
        quote_ident(name)
    } else {
        format!("{}.{}", quote_ident(schema), quote_ident(name))
    }
}

fn fallback(col: &ColumnDescriptor) -> String {
    debug!(
        "No mapping for type '{}' (udt {}.{}) on column {}; passing through",
        col.data_type, col.udt_schema, col.udt_name, col.name
    );
    col.data_type.clone()
}

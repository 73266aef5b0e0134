//! Table names and schema reflection.
//!
//! Column metadata is read from `information_schema.columns` at call time
//! rather than declared in code.

use crate::error::{DbError, DbResult};
use crate::sql::quote_ident;
use sqlx::PgExecutor;
use std::fmt;
use tracing::debug;

/// Schema used for unqualified table names.
pub const DEFAULT_SCHEMA: &str = "public";

const REFLECT_COLUMNS_SQL: &str = r#"
    SELECT column_name::text,
           data_type::text,
           udt_schema::text,
           udt_name::text,
           is_nullable::text
    FROM information_schema.columns
    WHERE table_schema = $1 AND table_name = $2
    ORDER BY ordinal_position
"#;

/// A possibly schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub schema: String,
    pub table: String,
}

impl TableName {
    /// Parse `table` or `schema.table`.
    pub fn parse(name: &str) -> DbResult<Self> {
        let parts: Vec<&str> = name.trim().split('.').map(str::trim).collect();

        match parts.as_slice() {
            [table] if !table.is_empty() => Ok(Self {
                schema: DEFAULT_SCHEMA.to_string(),
                table: table.to_string(),
            }),
            [schema, table] if !schema.is_empty() && !table.is_empty() => Ok(Self {
                schema: schema.to_string(),
                table: table.to_string(),
            }),
            _ => Err(DbError::invalid_argument(format!(
                "invalid table name '{}', expected 'table' or 'schema.table'",
                name
            ))),
        }
    }

    /// `"schema"."table"`
    pub fn quoted(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// How values of a column are decoded when reading rows back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Bool,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Numeric,
    Text,
    Date,
    Timestamp,
    TimestampTz,
    Json,
    /// Arrays, uuid, enums and anything else, read through a `::text` cast.
    Other,
}

impl ColumnKind {
    /// Whether the select list should cast this column to text.
    pub fn reads_as_text_cast(&self) -> bool {
        matches!(self, ColumnKind::Json | ColumnKind::Other)
    }
}

/// One reflected column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    /// `information_schema` type description (`integer`, `ARRAY`, `USER-DEFINED`, ...)
    pub data_type: String,
    pub udt_schema: String,
    /// Underlying type name (`int4`, `_text`, `jsonb`, ...)
    pub udt_name: String,
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn is_array(&self) -> bool {
        self.data_type == "ARRAY"
    }

    pub fn is_json(&self) -> bool {
        !self.is_array() && matches!(self.udt_name.as_str(), "json" | "jsonb")
    }

    /// Fully-qualified type used to cast bound parameters for this column.
    pub fn cast_type(&self) -> String {
        if self.is_array() {
            let element = self.udt_name.strip_prefix('_').unwrap_or(&self.udt_name);
            format!("{}.{}[]", quote_ident(&self.udt_schema), quote_ident(element))
        } else {
            format!("{}.{}", quote_ident(&self.udt_schema), quote_ident(&self.udt_name))
        }
    }

    pub fn kind(&self) -> ColumnKind {
        if self.is_array() {
            return ColumnKind::Other;
        }
        match self.udt_name.as_str() {
            "bool" => ColumnKind::Bool,
            "int2" => ColumnKind::Int16,
            "int4" => ColumnKind::Int32,
            "int8" => ColumnKind::Int64,
            "float4" => ColumnKind::Float32,
            "float8" => ColumnKind::Float64,
            "numeric" => ColumnKind::Numeric,
            "text" | "varchar" | "bpchar" | "name" => ColumnKind::Text,
            "date" => ColumnKind::Date,
            "timestamp" => ColumnKind::Timestamp,
            "timestamptz" => ColumnKind::TimestampTz,
            "json" | "jsonb" => ColumnKind::Json,
            _ => ColumnKind::Other,
        }
    }
}

/// Reflected columns of one table, in ordinal order.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub table: TableName,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Names from `names` that the table does not have, in input order.
    pub fn unknown_columns<'a, I>(&self, names: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names
            .into_iter()
            .filter(|n| self.column(n).is_none())
            .map(str::to_string)
            .collect()
    }

    /// Table columns whose names appear in `names`, in table order.
    pub fn ordered_subset(&self, names: &[&str]) -> Vec<&ColumnSchema> {
        self.columns
            .iter()
            .filter(|c| names.contains(&c.name.as_str()))
            .collect()
    }

    /// Fail with `SchemaMismatch` when any name is not a column.
    pub fn ensure_columns<'a, I>(&self, names: I) -> DbResult<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let unknown = self.unknown_columns(names);
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(DbError::SchemaMismatch {
                table: self.table.to_string(),
                columns: unknown,
            })
        }
    }
}

/// Read a table's columns from the database.
///
/// A table with no visible columns (missing, or not readable by this role)
/// is reported as `TableNotFound`.
pub async fn reflect_table<'e, E>(executor: E, table: &TableName) -> DbResult<TableSchema>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, (String, String, String, String, String)>(REFLECT_COLUMNS_SQL)
        .bind(&table.schema)
        .bind(&table.table)
        .fetch_all(executor)
        .await?;

    if rows.is_empty() {
        return Err(DbError::TableNotFound(table.to_string()));
    }

    let columns: Vec<ColumnSchema> = rows
        .into_iter()
        .map(|(name, data_type, udt_schema, udt_name, nullable)| ColumnSchema {
            name,
            data_type,
            udt_schema,
            udt_name,
            nullable: nullable == "YES",
        })
        .collect();

    debug!(
        table = %table,
        columns = ?columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        "Reflected table schema"
    );

    Ok(TableSchema {
        table: table.clone(),
        columns,
    })
}

/// Column with a built-in type, for tests.
#[cfg(test)]
pub(crate) fn test_column(name: &str, data_type: &str, udt_name: &str) -> ColumnSchema {
    ColumnSchema {
        name: name.to_string(),
        data_type: data_type.to_string(),
        udt_schema: "pg_catalog".to_string(),
        udt_name: udt_name.to_string(),
        nullable: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identifiers_schema() -> TableSchema {
        TableSchema {
            table: TableName::parse("instrument_identifiers").unwrap(),
            columns: vec![
                test_column("id", "integer", "int4"),
                test_column("ticker", "text", "text"),
                test_column("isin", "character varying", "varchar"),
                test_column("aliases", "ARRAY", "_text"),
            ],
        }
    }

    #[test]
    fn test_parse_table_names() {
        let t = TableName::parse("prices").unwrap();
        assert_eq!(t.schema, "public");
        assert_eq!(t.table, "prices");

        let t = TableName::parse("market.prices").unwrap();
        assert_eq!(t.schema, "market");
        assert_eq!(t.to_string(), "market.prices");
        assert_eq!(t.quoted(), "\"market\".\"prices\"");

        assert!(TableName::parse("").is_err());
        assert!(TableName::parse("a.b.c").is_err());
        assert!(TableName::parse(".prices").is_err());
    }

    #[test]
    fn test_cast_types() {
        assert_eq!(
            test_column("id", "integer", "int4").cast_type(),
            "\"pg_catalog\".\"int4\""
        );
        assert_eq!(
            test_column("tags", "ARRAY", "_text").cast_type(),
            "\"pg_catalog\".\"text\"[]"
        );

        let mood = ColumnSchema {
            name: "mood".to_string(),
            data_type: "USER-DEFINED".to_string(),
            udt_schema: "app".to_string(),
            udt_name: "Mood".to_string(),
            nullable: false,
        };
        assert_eq!(mood.cast_type(), "\"app\".\"Mood\"");
        assert_eq!(mood.kind(), ColumnKind::Other);
    }

    #[test]
    fn test_column_kinds() {
        assert_eq!(test_column("a", "smallint", "int2").kind(), ColumnKind::Int16);
        assert_eq!(test_column("a", "bigint", "int8").kind(), ColumnKind::Int64);
        assert_eq!(test_column("a", "character", "bpchar").kind(), ColumnKind::Text);
        assert_eq!(test_column("a", "jsonb", "jsonb").kind(), ColumnKind::Json);
        assert_eq!(test_column("a", "ARRAY", "_int4").kind(), ColumnKind::Other);
        assert_eq!(test_column("a", "uuid", "uuid").kind(), ColumnKind::Other);
        assert!(test_column("a", "json", "json").is_json());
        assert!(!test_column("a", "ARRAY", "_json").is_json());
    }

    #[test]
    fn test_unknown_and_ordered_columns() {
        let schema = identifiers_schema();

        assert!(schema.unknown_columns(["ticker", "id"]).is_empty());
        assert_eq!(schema.unknown_columns(["ticker", "cusip"]), vec!["cusip"]);

        let ordered: Vec<&str> = schema
            .ordered_subset(&["isin", "id"])
            .into_iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(ordered, vec!["id", "isin"]);
    }

    #[test]
    fn test_ensure_columns() {
        let schema = identifiers_schema();
        assert!(schema.ensure_columns(["ticker"]).is_ok());

        match schema.ensure_columns(["ticker", "figi"]) {
            Err(DbError::SchemaMismatch { table, columns }) => {
                assert_eq!(table, "public.instrument_identifiers");
                assert_eq!(columns, vec!["figi"]);
            }
            other => panic!("expected SchemaMismatch, got {:?}", other),
        }
    }
}

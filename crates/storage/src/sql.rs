//! SQL text generation.
//!
//! Every identifier is double-quoted and every value goes through a `$n`
//! placeholder cast to the target column's type, so statements never embed
//! caller data.

use crate::schema::{ColumnSchema, TableName};

/// PostgreSQL accepts at most this many bind parameters per statement.
pub const MAX_BIND_PARAMS: usize = 65_535;

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `$index::type`
pub fn placeholder(index: usize, column: &ColumnSchema) -> String {
    format!("${}::{}", index, column.cast_type())
}

/// Rows that fit in one statement for a given column count.
pub fn rows_per_statement(column_count: usize, batch_size: usize) -> usize {
    let by_params = MAX_BIND_PARAMS / column_count.max(1);
    by_params.min(batch_size).max(1)
}

/// Multi-row `INSERT`, optionally with an `ON CONFLICT` upsert clause.
///
/// With conflict columns, every other column is overwritten from `EXCLUDED`;
/// when all columns are conflict columns there is nothing to update and the
/// clause becomes `DO NOTHING`.
pub fn insert_statement(
    table: &TableName,
    columns: &[&ColumnSchema],
    row_count: usize,
    conflict_columns: Option<&[String]>,
) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!("INSERT INTO {} ({}) VALUES ", table.quoted(), column_list);

    let mut param_idx = 1;
    for row in 0..row_count {
        if row > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&placeholder(param_idx, column));
            param_idx += 1;
        }
        sql.push(')');
    }

    if let Some(keys) = conflict_columns {
        sql.push_str(&upsert_clause(columns, keys));
    }

    sql
}

fn upsert_clause(columns: &[&ColumnSchema], keys: &[String]) -> String {
    let key_list = keys
        .iter()
        .map(|k| quote_ident(k))
        .collect::<Vec<_>>()
        .join(", ");

    let updates = columns
        .iter()
        .filter(|c| !keys.contains(&c.name))
        .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(&c.name)))
        .collect::<Vec<_>>();

    if updates.is_empty() {
        format!(" ON CONFLICT ({}) DO NOTHING", key_list)
    } else {
        format!(" ON CONFLICT ({}) DO UPDATE SET {}", key_list, updates.join(", "))
    }
}

/// One `WHERE` condition of a select.
#[derive(Debug, Clone, Copy)]
pub struct Condition<'a> {
    pub column: &'a ColumnSchema,
    /// Compile to `IS NULL` instead of binding a parameter.
    pub is_null: bool,
}

/// `SELECT` with equality filters joined by `AND`.
///
/// Columns without a native decoder are cast to text in the projection so
/// every value can be read back.
pub fn select_statement(
    table: &TableName,
    projection: &[&ColumnSchema],
    conditions: &[Condition<'_>],
    order_by: Option<(&ColumnSchema, bool)>,
    limit: Option<usize>,
) -> String {
    let select_list = projection
        .iter()
        .map(|c| {
            let name = quote_ident(&c.name);
            if c.kind().reads_as_text_cast() {
                format!("{0}::text AS {0}", name)
            } else {
                name
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!("SELECT {} FROM {}", select_list, table.quoted());

    let mut param_idx = 1;
    for (i, condition) in conditions.iter().enumerate() {
        sql.push_str(if i == 0 { " WHERE " } else { " AND " });
        let name = quote_ident(&condition.column.name);
        if condition.is_null {
            sql.push_str(&format!("{} IS NULL", name));
        } else {
            sql.push_str(&format!("{} = {}", name, placeholder(param_idx, condition.column)));
            param_idx += 1;
        }
    }

    if let Some((column, descending)) = order_by {
        sql.push_str(&format!(
            " ORDER BY {} {}",
            quote_ident(&column.name),
            if descending { "DESC" } else { "ASC" }
        ));
    }

    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::test_column;

    fn prices() -> TableName {
        TableName::parse("market.prices").unwrap()
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("price"), "\"price\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_rows_per_statement() {
        assert_eq!(rows_per_statement(3, 1000), 1000);
        assert_eq!(rows_per_statement(100, 1000), 655);
        assert_eq!(rows_per_statement(70_000, 1000), 1);
        assert_eq!(rows_per_statement(0, 10), 10);
    }

    #[test]
    fn test_plain_insert() {
        let id = test_column("id", "integer", "int4");
        let px = test_column("px", "numeric", "numeric");

        let sql = insert_statement(&prices(), &[&id, &px], 2, None);
        assert_eq!(
            sql,
            "INSERT INTO \"market\".\"prices\" (\"id\", \"px\") VALUES \
             ($1::\"pg_catalog\".\"int4\", $2::\"pg_catalog\".\"numeric\"), \
             ($3::\"pg_catalog\".\"int4\", $4::\"pg_catalog\".\"numeric\")"
        );
    }

    #[test]
    fn test_upsert_updates_non_key_columns() {
        let id = test_column("id", "integer", "int4");
        let px = test_column("px", "numeric", "numeric");
        let src = test_column("source", "text", "text");

        let sql = insert_statement(&prices(), &[&id, &px, &src], 1, Some(&["id".to_string()]));
        assert!(sql.ends_with(
            " ON CONFLICT (\"id\") DO UPDATE SET \"px\" = EXCLUDED.\"px\", \"source\" = EXCLUDED.\"source\""
        ));
    }

    #[test]
    fn test_upsert_with_only_key_columns_does_nothing() {
        let id = test_column("id", "integer", "int4");

        let sql = insert_statement(&prices(), &[&id], 1, Some(&["id".to_string()]));
        assert!(sql.ends_with(" ON CONFLICT (\"id\") DO NOTHING"));
    }

    #[test]
    fn test_select_with_filters() {
        let ticker = test_column("ticker", "text", "text");
        let isin = test_column("isin", "character varying", "varchar");
        let meta = test_column("meta", "jsonb", "jsonb");
        let table = TableName::parse("instrument_identifiers").unwrap();

        let sql = select_statement(
            &table,
            &[&ticker, &isin, &meta],
            &[
                Condition { column: &ticker, is_null: false },
                Condition { column: &isin, is_null: true },
                Condition { column: &meta, is_null: false },
            ],
            Some((&ticker, false)),
            Some(10),
        );

        assert_eq!(
            sql,
            "SELECT \"ticker\", \"isin\", \"meta\"::text AS \"meta\" \
             FROM \"public\".\"instrument_identifiers\" \
             WHERE \"ticker\" = $1::\"pg_catalog\".\"text\" AND \"isin\" IS NULL \
             AND \"meta\" = $2::\"pg_catalog\".\"jsonb\" ORDER BY \"ticker\" ASC LIMIT 10"
        );
    }

    #[test]
    fn test_select_without_filters() {
        let ticker = test_column("ticker", "text", "text");
        let table = TableName::parse("instrument_identifiers").unwrap();

        let sql = select_statement(&table, &[&ticker], &[], None, None);
        assert_eq!(sql, "SELECT \"ticker\" FROM \"public\".\"instrument_identifiers\"");
    }
}

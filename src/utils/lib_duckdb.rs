use duckdb::{
    params, params_from_iter,
    types::{ToSql, ToSqlOutput, Value},
    Connection,
};
use itertools::Itertools;
use log::info;

use crate::{
    db::rki::feature_service::{FeatureTable, FieldValue},
    errors::EtlError,
};

/// Quote an identifier for DuckDB, e.g. `cases7_per_100k` -> `"cases7_per_100k"`.
/// Embedded double quotes are doubled.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Fully qualified table name, e.g. `"rki_covid"."log"`
pub fn qualified_name(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// SQL string literal, e.g. `it's` -> `'it''s'`
pub fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Check the catalog for a table.  Names are compared as stored.
pub fn table_exists(conn: &Connection, schema: &str, table: &str) -> Result<bool, duckdb::Error> {
    let n: i64 = conn.query_row(
        r"
SELECT count(*)
FROM information_schema.tables
WHERE table_schema = ? AND table_name = ?;",
        params![schema, table],
        |row| row.get(0),
    )?;
    Ok(n > 0)
}

/// `CREATE TABLE IF NOT EXISTS` statement for the given `(column, sql type)` pairs.
pub fn create_table_sql(schema: &str, table: &str, columns: &[(String, &str)]) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({});",
        qualified_name(schema, table),
        columns
            .iter()
            .map(|(name, sql_type)| format!("{} {}", quote_ident(name), sql_type))
            .join(", ")
    )
}

/// Parametrized `INSERT` naming every column explicitly, so a column the
/// target table doesn't know about fails the statement.
pub fn insert_sql(schema: &str, table: &str, columns: &[String]) -> String {
    format!(
        "INSERT INTO {} ({}) VALUES ({});",
        qualified_name(schema, table),
        columns.iter().map(|c| quote_ident(c)).join(", "),
        columns.iter().map(|_| "?").join(", ")
    )
}

/// Append all rows of `data` to `schema.table` in one transaction.
///
/// The table is created from `column_type` if it doesn't exist yet.  Any
/// failure after the transaction started rolls the whole batch back and is
/// reported as [`EtlError::BulkWriteRejected`].
pub fn append_table<F>(
    conn: &mut Connection,
    schema: &str,
    table: &str,
    data: &FeatureTable,
    column_type: F,
) -> Result<usize, EtlError>
where
    F: Fn(&str) -> &'static str,
{
    let reject = |source| EtlError::BulkWriteRejected {
        table: table.to_string(),
        source,
    };
    let tx = conn.transaction()?;
    if !table_exists(&tx, schema, table).map_err(reject)? {
        let columns: Vec<(String, &str)> = data
            .columns
            .iter()
            .map(|c| (c.clone(), column_type(c)))
            .collect();
        tx.execute_batch(&create_table_sql(schema, table, &columns))
            .map_err(reject)?;
        info!("Created table {}", qualified_name(schema, table));
    }
    {
        let mut stmt = tx
            .prepare(&insert_sql(schema, table, &data.columns))
            .map_err(reject)?;
        for row in &data.rows {
            stmt.execute(params_from_iter(row.iter())).map_err(reject)?;
        }
    }
    tx.commit().map_err(reject)?;
    Ok(data.len())
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        let value = match self {
            FieldValue::Null => Value::Null,
            FieldValue::Boolean(v) => Value::Boolean(*v),
            FieldValue::Integer(v) => Value::BigInt(*v),
            FieldValue::Float(v) => Value::Double(*v),
            FieldValue::Text(v) => Value::Text(v.clone()),
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

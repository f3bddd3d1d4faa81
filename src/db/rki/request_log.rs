use std::str::FromStr;

use duckdb::{params, Connection};
use jiff::Zoned;
use log::info;

use crate::{
    db::rki::feature_service::{FeatureTable, FieldValue},
    errors::EtlError,
    utils::lib_duckdb::{append_table, qualified_name, quote_literal},
};

/// How the id of the request row just inserted is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestIdStrategy {
    /// Insert, then `SELECT MAX(ID_REQUEST)`.  Only correct if a single
    /// instance of the job writes to the table at a time.
    #[default]
    MaxLookup,
    /// `INSERT ... RETURNING ID_REQUEST`
    Returning,
}

impl FromStr for RequestIdStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "max_lookup" => Ok(RequestIdStrategy::MaxLookup),
            "returning" => Ok(RequestIdStrategy::Returning),
            _ => Err(format!("Failed to parse {s} as RequestIdStrategy")),
        }
    }
}

/// Shape of the error record written when the bulk append fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorLogMode {
    /// Explicit `INSERT (ID_REQUEST, COMMENT)` into the error table.
    #[default]
    Insert,
    /// Push a one row `{ID_REQUEST, COMMENT}` mapping through the same bulk
    /// append used for the data.  Fails if the error table doesn't accept
    /// exactly these columns.
    BulkAppend,
}

impl FromStr for ErrorLogMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(ErrorLogMode::Insert),
            "bulk_append" => Ok(ErrorLogMode::BulkAppend),
            _ => Err(format!("Failed to parse {s} as ErrorLogMode")),
        }
    }
}

/// Local time as `DD/MM/YYYY HH:MM:SS`
pub fn format_request_date(now: &Zoned) -> String {
    now.strftime("%d/%m/%Y %H:%M:%S").to_string()
}

/// The request table gets its ids from a sequence named after it.
pub fn create_request_table(conn: &Connection, schema: &str, table: &str) -> Result<(), EtlError> {
    let seq = qualified_name(schema, &format!("{}_id_seq", table));
    conn.execute_batch(&format!(
        r"
CREATE SEQUENCE IF NOT EXISTS {} START 1;
CREATE TABLE IF NOT EXISTS {} (
    ID_REQUEST BIGINT PRIMARY KEY DEFAULT nextval({}),
    DATE_REQUEST VARCHAR NOT NULL,
    NAME_OF_REQUEST VARCHAR NOT NULL,
    NUMBER_OF_ROWS INTEGER NOT NULL
);",
        seq,
        qualified_name(schema, table),
        quote_literal(&seq),
    ))?;
    Ok(())
}

pub fn create_error_table(conn: &Connection, schema: &str, table: &str) -> Result<(), EtlError> {
    conn.execute_batch(&format!(
        r"
CREATE TABLE IF NOT EXISTS {} (
    ID_REQUEST BIGINT,
    COMMENT VARCHAR
);",
        qualified_name(schema, table)
    ))?;
    Ok(())
}

/// Insert one audit row and return its id.
pub fn insert_request(
    conn: &Connection,
    schema: &str,
    table: &str,
    date_request: &str,
    name_of_request: &str,
    number_of_rows: usize,
    strategy: RequestIdStrategy,
) -> Result<i64, EtlError> {
    let query = format!(
        "INSERT INTO {} (DATE_REQUEST, NAME_OF_REQUEST, NUMBER_OF_ROWS) VALUES (?, ?, ?)",
        qualified_name(schema, table)
    );
    let rows = number_of_rows as i64;
    let id = match strategy {
        RequestIdStrategy::MaxLookup => {
            conn.execute(&query, params![date_request, name_of_request, rows])?;
            latest_request_id(conn, schema, table)?
        }
        RequestIdStrategy::Returning => conn.query_row(
            &format!("{} RETURNING ID_REQUEST;", query),
            params![date_request, name_of_request, rows],
            |row| row.get::<usize, i64>(0),
        )?,
    };
    info!(
        "Logged request {} for {} ({} rows)",
        id, name_of_request, number_of_rows
    );
    Ok(id)
}

/// The largest request id in the table.
pub fn latest_request_id(conn: &Connection, schema: &str, table: &str) -> Result<i64, EtlError> {
    let id: Option<i64> = conn.query_row(
        &format!("SELECT MAX(ID_REQUEST) FROM {};", qualified_name(schema, table)),
        [],
        |row| row.get(0),
    )?;
    id.ok_or_else(|| EtlError::MissingRequestId(table.to_string()))
}

/// Write one error record for a request.
pub fn insert_error(
    conn: &mut Connection,
    schema: &str,
    table: &str,
    id_request: i64,
    comment: &str,
    mode: ErrorLogMode,
) -> Result<(), EtlError> {
    match mode {
        ErrorLogMode::Insert => {
            conn.execute(
                &format!(
                    "INSERT INTO {} (ID_REQUEST, COMMENT) VALUES (?, ?);",
                    qualified_name(schema, table)
                ),
                params![id_request, comment],
            )?;
        }
        ErrorLogMode::BulkAppend => {
            let payload = FeatureTable {
                columns: vec!["ID_REQUEST".to_string(), "COMMENT".to_string()],
                rows: vec![vec![
                    FieldValue::Integer(id_request),
                    FieldValue::Text(comment.to_string()),
                ]],
            };
            append_table(conn, schema, table, &payload, |c| match c {
                "ID_REQUEST" => "BIGINT",
                _ => "VARCHAR",
            })?;
        }
    }
    Ok(())
}

use std::error::Error;

use duckdb::Connection;
use jiff::Zoned;
use log::{error, info, warn};

use crate::{
    db::rki::{
        feature_service::{
            FeatureSet, FeatureSource, FeatureTable, FieldValue, HttpFeatureSource,
        },
        request_log::{
            create_error_table, create_request_table, format_request_date, insert_error,
            insert_request, ErrorLogMode, RequestIdStrategy,
        },
    },
    errors::EtlError,
    utils::lib_duckdb::{append_table, quote_ident},
};

/// The one column the RKI publishes with a German decimal comma.
pub const DECIMAL_COMMA_COLUMN: &str = "cases7_per_100k_txt";

/// Column added to every data row, pointing at the request table.
pub const ID_REQUEST: &str = "ID_REQUEST";

/// District level (Landkreis) Covid-19 data from the RKI, appended to DuckDB
/// once per run.  Every run logs itself in `request_table`, and the data rows
/// carry the id of that log entry.
#[derive(Debug, Clone)]
pub struct RkiLandkreisArchive {
    pub duckdb_path: String,
    pub url: String,
    pub schema: String,
    pub request_name: String,
    pub data_table: String,
    pub request_table: String,
    pub error_table: String,
    pub id_strategy: RequestIdStrategy,
    pub error_log_mode: ErrorLogMode,
}

/// What happened to the data of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Appended { id_request: i64, rows: usize },
    ErrorLogged { id_request: i64, cause: String },
}

impl LoadOutcome {
    pub fn id_request(&self) -> i64 {
        match self {
            LoadOutcome::Appended { id_request, .. } => *id_request,
            LoadOutcome::ErrorLogged { id_request, .. } => *id_request,
        }
    }
}

/// Replace the decimal comma and parse, e.g. `"12,5"` -> `12.5`.
pub fn normalize_decimal_comma(text: &str) -> Option<f64> {
    text.replace(',', ".").trim().parse::<f64>().ok()
}

/// Turn the [`DECIMAL_COMMA_COLUMN`] into floats.  Numbers the service
/// already sent as numbers are kept, anything else fails the run.
pub fn normalize(table: &mut FeatureTable) -> Result<(), EtlError> {
    let i = table
        .column_index(DECIMAL_COMMA_COLUMN)
        .ok_or_else(|| EtlError::MissingColumn(DECIMAL_COMMA_COLUMN.to_string()))?;
    for row in table.rows.iter_mut() {
        let value = match &row[i] {
            FieldValue::Text(s) => normalize_decimal_comma(s),
            FieldValue::Float(x) => Some(*x),
            FieldValue::Integer(x) => Some(*x as f64),
            _ => None,
        };
        match value {
            Some(x) => row[i] = FieldValue::Float(x),
            None => {
                return Err(EtlError::Normalize {
                    column: DECIMAL_COMMA_COLUMN.to_string(),
                    value: format!("{:?}", row[i]),
                })
            }
        }
    }
    Ok(())
}

/// Every row gets the same request id.  An `ID_REQUEST` column sent by the
/// service is overwritten.
pub fn stamp(table: &mut FeatureTable, id_request: i64) {
    match table.column_index(ID_REQUEST) {
        Some(i) => {
            for row in table.rows.iter_mut() {
                row[i] = FieldValue::Integer(id_request);
            }
        }
        None => table.add_column(ID_REQUEST, FieldValue::Integer(id_request)),
    }
}

impl RkiLandkreisArchive {
    /// Comment of the error row written when the data can't be appended.
    pub fn error_comment(&self) -> String {
        format!("Error appending data to {}", self.data_table)
    }

    /// The live feature service at `url`.
    pub fn feature_service(&self) -> HttpFeatureSource {
        HttpFeatureSource::new(self.url.clone())
    }

    /// Fetch and flatten the data, with the decimal column fixed.
    pub fn get_data(
        &self,
        source: &impl FeatureSource,
    ) -> Result<(FeatureSet, FeatureTable), EtlError> {
        let fs = source.fetch()?;
        let mut table = fs.flatten();
        normalize(&mut table)?;
        info!(
            "Got {} rows with {} columns",
            table.len(),
            table.columns.len()
        );
        Ok((fs, table))
    }

    pub fn open_session(&self) -> Result<Connection, EtlError> {
        let conn = Connection::open(&self.duckdb_path)?;
        Ok(conn)
    }

    /// Create the schema, the request and the error tables if they're not
    /// there.  The data table is created on the first append.
    pub fn prepare_tables(&self, conn: &Connection) -> Result<(), EtlError> {
        conn.execute_batch(&format!(
            "CREATE SCHEMA IF NOT EXISTS {};",
            quote_ident(&self.schema)
        ))?;
        create_request_table(conn, &self.schema, &self.request_table)?;
        create_error_table(conn, &self.schema, &self.error_table)?;
        Ok(())
    }

    /// SQL type for a data column when the table has to be created.
    fn column_type<'a>(fs: &'a FeatureSet) -> impl Fn(&str) -> &'static str + 'a {
        move |name: &str| match name {
            DECIMAL_COMMA_COLUMN => "DOUBLE",
            ID_REQUEST => "BIGINT",
            _ => fs.column_type(name),
        }
    }

    /// Log the request, stamp the rows with its id and append them.  If the
    /// append is rejected, write one error row instead.
    pub fn load(
        &self,
        conn: &mut Connection,
        fs: &FeatureSet,
        mut table: FeatureTable,
        requested_at: &Zoned,
    ) -> Result<LoadOutcome, EtlError> {
        self.prepare_tables(conn)?;
        let id_request = insert_request(
            conn,
            &self.schema,
            &self.request_table,
            &format_request_date(requested_at),
            &self.request_name,
            table.len(),
            self.id_strategy,
        )?;
        stamp(&mut table, id_request);

        match append_table(
            conn,
            &self.schema,
            &self.data_table,
            &table,
            Self::column_type(fs),
        ) {
            Ok(rows) => {
                info!(
                    "Appended {} rows to {} for request {}",
                    rows, self.data_table, id_request
                );
                Ok(LoadOutcome::Appended { id_request, rows })
            }
            Err(e @ EtlError::BulkWriteRejected { .. }) => {
                let cause = match e.source() {
                    Some(source) => format!("{}: {}", e, source),
                    None => e.to_string(),
                };
                error!("{}", cause);
                insert_error(
                    conn,
                    &self.schema,
                    &self.error_table,
                    id_request,
                    &self.error_comment(),
                    self.error_log_mode,
                )
                .map_err(|source| EtlError::ErrorLogRejected {
                    id_request,
                    cause: cause.clone(),
                    source: Box::new(source),
                })?;
                Ok(LoadOutcome::ErrorLogged { id_request, cause })
            }
            Err(e) => Err(e),
        }
    }

    /// One complete run against an open connection.
    pub fn run_with(
        &self,
        source: &impl FeatureSource,
        conn: &mut Connection,
    ) -> Result<LoadOutcome, EtlError> {
        let (fs, table) = self.get_data(source)?;
        self.load(conn, &fs, table, &Zoned::now())
    }

    /// One complete run: fetch, transform, write, then close the database.
    pub fn run(&self, source: &impl FeatureSource) -> Result<LoadOutcome, EtlError> {
        let (fs, table) = self.get_data(source)?;
        let mut conn = self.open_session()?;
        let outcome = self.load(&mut conn, &fs, table, &Zoned::now());
        if let Err((_, e)) = conn.close() {
            warn!("Failed to close {}: {}", self.duckdb_path, e);
        }
        outcome
    }
}

use thiserror::Error;

/// Everything that can stop an ingestion run.
///
/// Only [`EtlError::BulkWriteRejected`] is recovered by the pipeline (it is
/// turned into an error log row).  All other variants abort the run.
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("request to the feature service failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("feature service returned error {code}: {message}")]
    Service { code: i64, message: String },
    #[error("failed to decode the feature service response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("column '{0}' is not present in the data")]
    MissingColumn(String),
    #[error("column '{column}' holds a non numeric value: {value}")]
    Normalize { column: String, value: String },
    #[error(transparent)]
    Db(#[from] duckdb::Error),
    #[error("table '{0}' has no request id")]
    MissingRequestId(String),
    #[error("bulk write to '{table}' was rejected")]
    BulkWriteRejected {
        table: String,
        #[source]
        source: duckdb::Error,
    },
    #[error("failed to log the error for request {id_request} ({cause})")]
    ErrorLogRejected {
        id_request: i64,
        cause: String,
        #[source]
        source: Box<EtlError>,
    },
    #[error("configuration error: {0}")]
    Configuration(String),
}

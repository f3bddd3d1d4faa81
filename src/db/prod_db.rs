use std::env;

use crate::{
    db::rki::{
        feature_service::RKI_LANDKREIS_URL, landkreis_archive::RkiLandkreisArchive,
        request_log::{ErrorLogMode, RequestIdStrategy},
    },
    errors::EtlError,
};

/// Production archives, configured from the environment (see `.env/prod.env`).
pub struct ProdDb {}

impl ProdDb {
    /// Needs `RKI_DUCKDB_PATH`.  Optional: `RKI_LANDKREIS_URL`, `RKI_SCHEMA`,
    /// `RKI_REQUEST_ID_STRATEGY` (`max_lookup|returning`) and
    /// `RKI_ERROR_LOG_MODE` (`insert|bulk_append`).
    pub fn rki_landkreis() -> Result<RkiLandkreisArchive, EtlError> {
        let duckdb_path = env::var("RKI_DUCKDB_PATH")
            .map_err(|_| EtlError::Configuration("RKI_DUCKDB_PATH is not set".into()))?;
        Ok(RkiLandkreisArchive {
            duckdb_path,
            url: env::var("RKI_LANDKREIS_URL").unwrap_or_else(|_| RKI_LANDKREIS_URL.to_string()),
            schema: env::var("RKI_SCHEMA").unwrap_or_else(|_| "rki_covid".to_string()),
            request_name: "rki_landkreis".to_string(),
            data_table: "rki_landkreis".to_string(),
            request_table: "data_requests".to_string(),
            error_table: "log".to_string(),
            id_strategy: parse_var::<RequestIdStrategy>("RKI_REQUEST_ID_STRATEGY")?.unwrap_or_default(),
            error_log_mode: parse_var::<ErrorLogMode>("RKI_ERROR_LOG_MODE")?.unwrap_or_default(),
        })
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>, EtlError>
where
    T: std::str::FromStr<Err = String>,
{
    match env::var(name) {
        Ok(v) => v.parse::<T>().map(Some).map_err(EtlError::Configuration),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_missing_var() {
        let v = parse_var::<RequestIdStrategy>("RKI_TEST_UNSET_VARIABLE");
        assert!(matches!(v, Ok(None)));
    }

    #[test]
    fn parse_var_values() {
        env::set_var("RKI_TEST_ID_STRATEGY", "returning");
        env::set_var("RKI_TEST_ERROR_LOG_MODE", "csv");
        assert_eq!(
            parse_var::<RequestIdStrategy>("RKI_TEST_ID_STRATEGY").unwrap(),
            Some(RequestIdStrategy::Returning)
        );
        assert!(matches!(
            parse_var::<ErrorLogMode>("RKI_TEST_ERROR_LOG_MODE"),
            Err(EtlError::Configuration(_))
        ));
    }
}

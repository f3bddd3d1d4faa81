use log::{info, warn};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::errors::EtlError;

/// The district level (Landkreis) layer of the RKI Covid-19 dashboard.
/// See <https://npgeo-corona-npgeo-de.hub.arcgis.com/datasets/rki-corona-landkreise>
pub const RKI_LANDKREIS_URL: &str = "https://services7.arcgis.com/mOBPykOjAyBO2ZKk/arcgis/rest/services/RKI_Landkreisdaten/FeatureServer/0/query";

/// All records, all fields, no geometry.
const QUERY: [(&str, &str); 5] = [
    ("where", "1=1"),
    ("outFields", "*"),
    ("returnGeometry", "false"),
    ("outSR", "4326"),
    ("f", "json"),
];

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: Option<String>,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Feature {
    pub attributes: Map<String, Value>,
}

/// The body of an Esri feature service `query` response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeatureSet {
    pub fields: Vec<Field>,
    pub features: Vec<Feature>,
    #[serde(default, rename = "exceededTransferLimit")]
    pub exceeded_transfer_limit: bool,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    code: i64,
    #[serde(default)]
    message: String,
}

/// A single cell of a flattened feature.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<&Value> for FieldValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(v) => FieldValue::Boolean(*v),
            Value::Number(n) => match n.as_i64() {
                Some(v) => FieldValue::Integer(v),
                None => FieldValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => FieldValue::Text(s.clone()),
            other => FieldValue::Text(other.to_string()),
        }
    }
}

/// Rows of features, all sharing the same ordered list of columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<FieldValue>>,
}

impl FeatureTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Append a column holding the same value on every row.
    pub fn add_column(&mut self, name: &str, value: FieldValue) {
        self.columns.push(name.to_string());
        for row in self.rows.iter_mut() {
            row.push(value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl FeatureSet {
    /// One row per feature.  Columns come from the `fields` list, followed by
    /// any attribute the service returned without declaring it.  A missing
    /// attribute is `Null`.
    pub fn flatten(&self) -> FeatureTable {
        let mut columns: Vec<String> = self.fields.iter().map(|f| f.name.clone()).collect();
        for feature in &self.features {
            for key in feature.attributes.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = self
            .features
            .iter()
            .map(|feature| {
                columns
                    .iter()
                    .map(|c| match feature.attributes.get(c) {
                        Some(v) => FieldValue::from(v),
                        None => FieldValue::Null,
                    })
                    .collect()
            })
            .collect();

        FeatureTable { columns, rows }
    }

    /// SQL type of a column, from the Esri field type.  Unknown or
    /// undeclared fields are stored as text.
    pub fn column_type(&self, name: &str) -> &'static str {
        let field_type = self
            .fields
            .iter()
            .find(|f| f.name == name)
            .and_then(|f| f.field_type.as_deref());
        match field_type {
            Some("esriFieldTypeOID")
            | Some("esriFieldTypeInteger")
            | Some("esriFieldTypeSmallInteger")
            | Some("esriFieldTypeBigInteger")
            | Some("esriFieldTypeDate") => "BIGINT",
            Some("esriFieldTypeDouble") | Some("esriFieldTypeSingle") => "DOUBLE",
            _ => "VARCHAR",
        }
    }
}

/// Decode the body of a `query` call.  ArcGIS reports query errors with a
/// 200 status and an `error` object instead of the features.
pub fn parse_response(body: &str) -> Result<FeatureSet, EtlError> {
    let v: Value = serde_json::from_str(body)?;
    if let Some(error) = v.get("error") {
        let error: ServiceError = serde_json::from_value(error.clone())?;
        return Err(EtlError::Service {
            code: error.code,
            message: error.message,
        });
    }
    let fs: FeatureSet = serde_json::from_value(v)?;
    if fs.exceeded_transfer_limit {
        warn!(
            "Feature service truncated the response at {} features",
            fs.features.len()
        );
    }
    Ok(fs)
}

/// Where the features come from.
pub trait FeatureSource {
    fn fetch(&self) -> Result<FeatureSet, EtlError>;
}

pub struct HttpFeatureSource {
    pub url: String,
}

impl HttpFeatureSource {
    pub fn new(url: impl Into<String>) -> Self {
        HttpFeatureSource { url: url.into() }
    }
}

impl FeatureSource for HttpFeatureSource {
    fn fetch(&self) -> Result<FeatureSet, EtlError> {
        let client = reqwest::blocking::Client::new();
        let response = client
            .get(&self.url)
            .query(&QUERY)
            .send()?
            .error_for_status()?;
        let body = response.text()?;
        let fs = parse_response(&body)?;
        info!("Downloaded {} features from {}", fs.features.len(), self.url);
        Ok(fs)
    }
}

/// A canned response.
impl FeatureSource for FeatureSet {
    fn fetch(&self) -> Result<FeatureSet, EtlError> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    const BODY: &str = r#"{
        "objectIdFieldName": "OBJECTID",
        "geometryType": "esriGeometryPolygon",
        "fields": [
            {"name": "OBJECTID", "type": "esriFieldTypeOID", "alias": "OBJECTID"},
            {"name": "GEN", "type": "esriFieldTypeString", "alias": "GEN", "length": 33},
            {"name": "EWZ", "type": "esriFieldTypeInteger", "alias": "EWZ"},
            {"name": "cases7_per_100k", "type": "esriFieldTypeDouble"},
            {"name": "cases7_per_100k_txt", "type": "esriFieldTypeString"}
        ],
        "features": [
            {"attributes": {"OBJECTID": 1, "GEN": "Flensburg", "EWZ": 89934,
                "cases7_per_100k": 86.74, "cases7_per_100k_txt": "86,7"}},
            {"attributes": {"OBJECTID": 2, "GEN": "Kiel", "EWZ": 246601,
                "cases7_per_100k_txt": "101,4", "last_update": "01.03.2021, 00:00 Uhr"}},
            {"attributes": {"OBJECTID": 3, "GEN": "Lübeck", "EWZ": null,
                "cases7_per_100k": 50, "cases7_per_100k_txt": "50,0"}}
        ]
    }"#;

    #[test]
    fn parse_features() -> Result<(), Box<dyn Error>> {
        let fs = parse_response(BODY)?;
        assert_eq!(fs.fields.len(), 5);
        assert_eq!(fs.features.len(), 3);
        assert!(!fs.exceeded_transfer_limit);
        assert_eq!(fs.fields[1].field_type.as_deref(), Some("esriFieldTypeString"));
        Ok(())
    }

    #[test]
    fn flatten_keeps_one_row_per_feature() -> Result<(), Box<dyn Error>> {
        let fs = parse_response(BODY)?;
        let table = fs.flatten();
        assert_eq!(table.len(), fs.features.len());
        assert_eq!(
            table.columns,
            vec![
                "OBJECTID",
                "GEN",
                "EWZ",
                "cases7_per_100k",
                "cases7_per_100k_txt",
                "last_update"
            ]
        );
        assert!(table.rows.iter().all(|row| row.len() == table.columns.len()));
        assert_eq!(table.rows[0][1], FieldValue::Text("Flensburg".into()));
        assert_eq!(table.rows[0][3], FieldValue::Float(86.74));
        // missing attribute and explicit null
        assert_eq!(table.rows[1][3], FieldValue::Null);
        assert_eq!(table.rows[2][2], FieldValue::Null);
        assert_eq!(table.rows[2][3], FieldValue::Integer(50));
        Ok(())
    }

    #[test]
    fn flatten_empty_response() -> Result<(), Box<dyn Error>> {
        let fs = parse_response(r#"{"fields": [{"name": "GEN"}], "features": []}"#)?;
        let table = fs.flatten();
        assert!(table.is_empty());
        assert_eq!(table.columns, vec!["GEN"]);
        Ok(())
    }

    #[test]
    fn add_column_stamps_every_row() -> Result<(), Box<dyn Error>> {
        let mut table = parse_response(BODY)?.flatten();
        table.add_column("ID_REQUEST", FieldValue::Integer(42));
        let i = table.column_index("ID_REQUEST").unwrap();
        assert!(table.rows.iter().all(|row| row[i] == FieldValue::Integer(42)));
        Ok(())
    }

    #[test]
    fn column_types() -> Result<(), Box<dyn Error>> {
        let fs = parse_response(BODY)?;
        assert_eq!(fs.column_type("OBJECTID"), "BIGINT");
        assert_eq!(fs.column_type("EWZ"), "BIGINT");
        assert_eq!(fs.column_type("cases7_per_100k"), "DOUBLE");
        assert_eq!(fs.column_type("GEN"), "VARCHAR");
        assert_eq!(fs.column_type("last_update"), "VARCHAR");
        Ok(())
    }

    #[test]
    fn service_error_body() {
        let body = r#"{"error": {"code": 400, "message": "Invalid query", "details": []}}"#;
        match parse_response(body) {
            Err(EtlError::Service { code, message }) => {
                assert_eq!(code, 400);
                assert_eq!(message, "Invalid query");
            }
            other => panic!("expected a service error, got {:?}", other),
        }
    }

    #[test]
    fn malformed_body() {
        let res = parse_response(r#"{"features": "nope"}"#);
        assert!(matches!(res, Err(EtlError::Decode(_))));
    }

    #[test]
    fn transfer_limit_flag() -> Result<(), Box<dyn Error>> {
        let fs = parse_response(
            r#"{"fields": [], "features": [], "exceededTransferLimit": true}"#,
        )?;
        assert!(fs.exceeded_transfer_limit);
        Ok(())
    }

    #[ignore]
    #[test]
    fn download_landkreis() -> Result<(), Box<dyn Error>> {
        let fs = HttpFeatureSource::new(RKI_LANDKREIS_URL).fetch()?;
        assert!(fs.features.len() > 400);
        Ok(())
    }
}

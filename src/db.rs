use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{ClientOptions, Tls, TlsOptions};
use mongodb::{Client, Collection};

use crate::config::StoreConfig;
use crate::models::LateRecord;

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("missing field '{0}'")]
    Missing(&'static str),
    #[error("field '{field}' has unsupported type {kind}")]
    WrongType { field: &'static str, kind: String },
    #[error("unrecognised date '{0}'")]
    BadDate(String),
}

/// Everything read from a source in one pass. `total` counts raw documents
/// or rows, including the ones rejected during decoding.
#[derive(Debug, Clone, Default)]
pub struct FetchedRecords {
    pub total: usize,
    pub records: Vec<LateRecord>,
    pub rejected: usize,
}

impl FetchedRecords {
    fn push(&mut self, source_id: &str, decoded: Result<LateRecord, RecordError>) {
        self.total += 1;
        match decoded {
            Ok(record) => self.records.push(record),
            Err(err) => {
                tracing::warn!(record = %source_id, error = %err, "skipping malformed latecomer record");
                self.rejected += 1;
            }
        }
    }
}

#[async_trait]
pub trait RecordSource {
    async fn fetch_all(&self) -> anyhow::Result<FetchedRecords>;
}

pub struct MongoSource {
    collection: Collection<Document>,
}

impl MongoSource {
    pub async fn connect(config: &StoreConfig) -> anyhow::Result<Self> {
        let options = client_options(config).await?;
        let client = Client::with_options(options).context("failed to build MongoDB client")?;
        let collection = client
            .database(&config.database)
            .collection::<Document>(&config.collection);

        Ok(Self { collection })
    }
}

/// Parses `MONGO_URI` and forces TLS on, whatever the URI says. Without
/// `MONGO_TLS_CA_FILE` the driver's bundled root certificates are used.
pub async fn client_options(config: &StoreConfig) -> anyhow::Result<ClientOptions> {
    let mut options = ClientOptions::parse(&config.uri)
        .await
        .context("failed to parse MONGO_URI")?;

    let mut tls = TlsOptions::default();
    tls.ca_file_path = config.tls_ca_file.clone();
    options.tls = Some(Tls::Enabled(tls));

    Ok(options)
}

#[async_trait]
impl RecordSource for MongoSource {
    async fn fetch_all(&self) -> anyhow::Result<FetchedRecords> {
        let mut cursor = self
            .collection
            .find(doc! {})
            .await
            .context("failed to query latecomers collection")?;

        let mut fetched = FetchedRecords::default();
        while cursor.advance().await.context("failed to read latecomers cursor")? {
            let document = cursor
                .deserialize_current()
                .context("failed to decode latecomers document")?;
            let id = document
                .get("_id")
                .map(|value| value.to_string())
                .unwrap_or_else(|| format!("#{}", fetched.total));
            fetched.push(&id, decode_document(&document));
        }

        Ok(fetched)
    }
}

/// Reads records from a CSV export with `pin,name,department,date` headers.
pub struct CsvSource {
    path: PathBuf,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(path: &Path) -> anyhow::Result<FetchedRecords> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let mut fetched = FetchedRecords::default();

        for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
            let row = result.with_context(|| format!("bad row in {}", path.display()))?;
            fetched.push(&format!("row {}", index + 1), decode_row(row));
        }

        Ok(fetched)
    }
}

#[derive(serde::Deserialize)]
struct CsvRow {
    pin: String,
    name: String,
    department: String,
    date: String,
}

fn decode_row(row: CsvRow) -> Result<LateRecord, RecordError> {
    Ok(LateRecord {
        pin: non_empty("pin", row.pin)?,
        name: non_empty("name", row.name)?,
        department: non_empty("department", row.department)?,
        date: parse_record_date(&row.date)?,
    })
}

#[async_trait]
impl RecordSource for CsvSource {
    async fn fetch_all(&self) -> anyhow::Result<FetchedRecords> {
        Self::read(&self.path)
    }
}

/// Blank values count as missing; anything else is kept exactly as stored.
fn non_empty(field: &'static str, value: String) -> Result<String, RecordError> {
    if value.trim().is_empty() {
        return Err(RecordError::Missing(field));
    }
    Ok(value)
}

fn text_field(document: &Document, field: &'static str) -> Result<String, RecordError> {
    match document.get(field) {
        None | Some(Bson::Null) => Err(RecordError::Missing(field)),
        Some(Bson::String(value)) => non_empty(field, value.clone()),
        Some(Bson::Int32(value)) => Ok(value.to_string()),
        Some(Bson::Int64(value)) => Ok(value.to_string()),
        Some(other) => Err(RecordError::WrongType {
            field,
            kind: format!("{:?}", other.element_type()),
        }),
    }
}

pub fn decode_document(document: &Document) -> Result<LateRecord, RecordError> {
    let date = match document.get("date") {
        None | Some(Bson::Null) => return Err(RecordError::Missing("date")),
        Some(Bson::DateTime(value)) => {
            DateTime::<Utc>::from_timestamp_millis(value.timestamp_millis())
                .map(|timestamp| timestamp.date_naive())
                .ok_or_else(|| RecordError::BadDate(value.to_string()))?
        }
        Some(Bson::String(value)) => parse_record_date(value)?,
        Some(other) => {
            return Err(RecordError::WrongType {
                field: "date",
                kind: format!("{:?}", other.element_type()),
            })
        }
    };

    Ok(LateRecord {
        pin: text_field(document, "pin")?,
        name: text_field(document, "name")?,
        department: text_field(document, "department")?,
        date,
    })
}

/// Accepts RFC 3339 timestamps (converted to UTC), naive timestamps and plain dates.
pub fn parse_record_date(raw: &str) -> Result<NaiveDate, RecordError> {
    let value = raw.trim();

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Ok(timestamp.with_timezone(&Utc).date_naive());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(timestamp) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(timestamp.date());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| RecordError::BadDate(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn parses_supported_date_shapes() {
        assert_eq!(parse_record_date("2024-06-03").unwrap(), date(2024, 6, 3));
        assert_eq!(
            parse_record_date("2024-06-03T08:45:00").unwrap(),
            date(2024, 6, 3)
        );
        assert_eq!(
            parse_record_date("2024-06-03 08:45:00.250").unwrap(),
            date(2024, 6, 3)
        );
        assert_eq!(
            parse_record_date("2024-06-03T23:30:00-02:00").unwrap(),
            date(2024, 6, 4)
        );
        assert!(matches!(
            parse_record_date("03/06/2024"),
            Err(RecordError::BadDate(_))
        ));
    }

    #[test]
    fn decodes_document_with_bson_datetime() {
        let millis = DateTime::parse_from_rfc3339("2024-06-10T09:05:00Z")
            .unwrap()
            .timestamp_millis();
        let document = doc! {
            "_id": "abc",
            "pin": "P001",
            "name": "Alice",
            "department": "CS",
            "date": mongodb::bson::DateTime::from_millis(millis),
            "__v": 0,
        };

        let record = decode_document(&document).expect("document decodes");
        assert_eq!(record.pin, "P001");
        assert_eq!(record.department, "CS");
        assert_eq!(record.date, date(2024, 6, 10));
    }

    #[test]
    fn numeric_pin_is_accepted_as_text() {
        let document = doc! {
            "pin": 21042_i64,
            "name": "Bob",
            "department": "EE",
            "date": "2024-06-11",
        };

        assert_eq!(decode_document(&document).unwrap().pin, "21042");
    }

    #[test]
    fn rejects_documents_missing_fields() {
        let document = doc! { "pin": "P001", "name": "Alice", "date": "2024-06-11" };
        assert!(matches!(
            decode_document(&document),
            Err(RecordError::Missing("department"))
        ));

        let document = doc! { "pin": "P001", "name": "Alice", "department": "CS" };
        assert!(matches!(
            decode_document(&document),
            Err(RecordError::Missing("date"))
        ));
    }

    #[test]
    fn rejects_unsupported_field_types() {
        let document = doc! {
            "pin": "P001",
            "name": ["Alice"],
            "department": "CS",
            "date": "2024-06-11",
        };
        assert!(matches!(
            decode_document(&document),
            Err(RecordError::WrongType { field: "name", .. })
        ));
    }

    fn store_config(uri: &str, ca_file: Option<&str>) -> StoreConfig {
        StoreConfig {
            uri: uri.to_string(),
            database: "studentDB".to_string(),
            collection: "latecomers".to_string(),
            tls_ca_file: ca_file.map(PathBuf::from),
        }
    }

    #[tokio::test]
    async fn plain_uri_still_connects_over_tls() {
        let options = client_options(&store_config("mongodb://127.0.0.1:27017", None))
            .await
            .unwrap();

        let Some(Tls::Enabled(tls)) = options.tls else {
            panic!("store connection must use TLS");
        };
        assert!(tls.ca_file_path.is_none());
    }

    #[tokio::test]
    async fn tls_uses_configured_ca_file() {
        let options = client_options(&store_config(
            "mongodb://127.0.0.1:27017/?tls=false",
            Some("/etc/ssl/certs/ca-bundle.pem"),
        ))
        .await
        .unwrap();

        let Some(Tls::Enabled(tls)) = options.tls else {
            panic!("store connection must use TLS");
        };
        assert_eq!(
            tls.ca_file_path,
            Some(PathBuf::from("/etc/ssl/certs/ca-bundle.pem"))
        );
    }

    #[test]
    fn text_fields_are_kept_verbatim() {
        let document = doc! {
            "pin": " P001",
            "name": "Alice ",
            "department": "CS ",
            "date": "2024-06-11",
        };

        let record = decode_document(&document).unwrap();
        assert_eq!(record.pin, " P001");
        assert_eq!(record.name, "Alice ");
        assert_eq!(record.department, "CS ");

        let blank = doc! { "pin": "P001", "name": "  ", "department": "CS", "date": "2024-06-11" };
        assert!(matches!(
            decode_document(&blank),
            Err(RecordError::Missing("name"))
        ));
    }

    #[tokio::test]
    async fn csv_source_counts_rejected_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "pin,name,department,date").unwrap();
        writeln!(file, "P001,Alice,CS,2024-06-03").unwrap();
        writeln!(file, "P002,Bob,,2024-06-03").unwrap();
        writeln!(file, "P003,Cara,EE,yesterday").unwrap();
        file.flush().unwrap();

        let fetched = CsvSource::new(file.path()).fetch_all().await.unwrap();
        assert_eq!(fetched.total, 3);
        assert_eq!(fetched.rejected, 2);
        assert_eq!(fetched.records.len(), 1);
        assert_eq!(fetched.records[0].name, "Alice");
    }
}

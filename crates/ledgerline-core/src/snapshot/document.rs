//! Snapshot documents
//!
//! The JSON document is the only format that round-trips: a top-level object
//! keyed by endpoint name (`banks`, `accounts`, ...) holding arrays of
//! records, plus derived collections such as `wealth_over_time`. CSV and
//! XLSX exports produce a placeholder body.

use std::io::Read;

use chrono::{Local, NaiveDate};
use flate2::read::GzDecoder;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::EntityType;
use crate::schema::{schema, topological_order};

use super::{Snapshot, SnapshotMode, DERIVED_KEYS};

/// Artifact name prefix
const FILE_PREFIX: &str = "ledgerline_export";

/// Requested export format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv",
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "xlsx" | "excel" => Ok(Self::Xlsx),
            _ => Err(format!("Unknown export format: {}", s)),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// A serialized snapshot, ready to be written or offered for download
#[derive(Debug, Clone)]
pub struct Artifact {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
    /// Hex SHA-256 of `bytes`
    pub sha256: String,
}

impl Artifact {
    fn new(file_name: String, content_type: &'static str, bytes: Vec<u8>) -> Self {
        let sha256 = hex::encode(Sha256::digest(&bytes));
        Self {
            file_name,
            content_type,
            bytes,
            sha256,
        }
    }
}

/// `ledgerline_export_<mode>_<YYYY-MM-DD>.<ext>`
pub fn artifact_file_name(mode: SnapshotMode, date: NaiveDate, format: ExportFormat) -> String {
    format!(
        "{}_{}_{}.{}",
        FILE_PREFIX,
        mode.as_str(),
        date.format("%Y-%m-%d"),
        format.extension()
    )
}

/// Parse the export date out of an artifact name
pub fn parse_artifact_date(file_name: &str) -> Option<NaiveDate> {
    let rest = file_name.strip_prefix(FILE_PREFIX)?.strip_prefix('_')?;
    let rest = rest
        .strip_prefix("raw_")
        .or_else(|| rest.strip_prefix("readable_"))?;
    let date = rest.get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Serialize a snapshot, naming the artifact after today's date
pub fn serialize(snapshot: &Snapshot, format: ExportFormat) -> Result<Artifact> {
    serialize_on(snapshot, format, Local::now().date_naive())
}

/// Serialize a snapshot, naming the artifact after `date`
pub fn serialize_on(
    snapshot: &Snapshot,
    format: ExportFormat,
    date: NaiveDate,
) -> Result<Artifact> {
    let file_name = artifact_file_name(snapshot.overall_mode(), date, format);

    let bytes = match format {
        ExportFormat::Json => serde_json::to_vec_pretty(&to_document(snapshot)?)?,
        ExportFormat::Csv | ExportFormat::Xlsx => {
            let err = Error::UnsupportedFormat(format.extension().to_uppercase());
            warn!(error = %err, "Writing placeholder export");
            placeholder_body(format, snapshot).into_bytes()
        }
    };

    debug!(file_name = %file_name, size = bytes.len(), "Serialized snapshot");
    Ok(Artifact::new(file_name, format.content_type(), bytes))
}

fn placeholder_body(format: ExportFormat, snapshot: &Snapshot) -> String {
    format!(
        "ledgerline {} export is not available yet ({} records omitted). \
         Export as JSON to get a file that can be imported again.\n",
        format.extension().to_uppercase(),
        snapshot.record_count()
    )
}

fn to_document(snapshot: &Snapshot) -> Result<Value> {
    let mut document = Map::new();
    for entity_type in topological_order()? {
        if let Some(records) = snapshot.collections.get(entity_type) {
            let records = records.iter().cloned().map(Value::Object).collect();
            document.insert(entity_type.endpoint().to_string(), Value::Array(records));
        }
    }
    for (key, value) in &snapshot.derived {
        document.insert(key.clone(), value.clone());
    }
    Ok(Value::Object(document))
}

/// Parse a JSON snapshot document
pub fn parse(raw: &str) -> Result<Snapshot> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| Error::MalformedSnapshot(e.to_string()))?;
    let Value::Object(document) = value else {
        return Err(Error::MalformedSnapshot(
            "top level must be an object keyed by collection".into(),
        ));
    };

    let mut unknown: Vec<String> = document
        .keys()
        .filter(|k| EntityType::from_endpoint(k).is_none() && !DERIVED_KEYS.contains(&k.as_str()))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        unknown.sort();
        return Err(Error::InvalidSnapshotShape(unknown));
    }

    let mut snapshot = Snapshot::new();
    for (key, value) in document {
        let Some(entity_type) = EntityType::from_endpoint(&key) else {
            snapshot.derived.insert(key, value);
            continue;
        };

        let Value::Array(items) = value else {
            return Err(Error::MalformedSnapshot(format!("'{}' must be an array", key)));
        };
        let mut records = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            match item {
                Value::Object(record) => records.push(record),
                other => {
                    return Err(Error::MalformedSnapshot(format!(
                        "'{}'[{}] must be an object, got {}",
                        key, index, other
                    )))
                }
            }
        }

        let mode = match records.first() {
            Some(first) if schema(entity_type).is_readable_record(first) => SnapshotMode::Readable,
            _ => SnapshotMode::Raw,
        };
        debug!(
            entity_type = %entity_type,
            count = records.len(),
            mode = %mode,
            "Parsed collection"
        );
        snapshot.insert(entity_type, records, mode);
    }

    Ok(snapshot)
}

/// Parse an artifact for import, by file name.
///
/// Only JSON documents (optionally gzipped) can be imported.
pub fn parse_artifact(bytes: &[u8], file_name: &str) -> Result<Snapshot> {
    let lower = file_name.to_lowercase();
    let text = if lower.ends_with(".json.gz") {
        let mut text = String::new();
        GzDecoder::new(bytes)
            .read_to_string(&mut text)
            .map_err(|e| Error::MalformedSnapshot(format!("Failed to decompress: {}", e)))?;
        text
    } else if lower.ends_with(".json") {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::MalformedSnapshot(format!("Not UTF-8: {}", e)))?
    } else {
        let ext = lower.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
        return Err(Error::UnsupportedFormat(format!(
            "cannot import '{}' files, only JSON snapshots",
            ext
        )));
    };
    parse(&text)
}

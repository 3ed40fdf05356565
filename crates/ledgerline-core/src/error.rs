//! Error types for Ledgerline

use thiserror::Error;

use crate::models::{BatchFailure, EntityType};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Cyclic dependency in entity schema: {0}")]
    CyclicDependency(String),

    #[error("Unresolved reference in {entity_type} record '{record}': {field} = '{reference}' matches no known {target}")]
    UnresolvedReference {
        entity_type: EntityType,
        record: String,
        field: String,
        reference: String,
        target: EntityType,
    },

    #[error("Batch {operation} for {entity_type} failed for {} item(s): {}", .failures.len(), summarize_failures(.failures))]
    PartialBatchFailure {
        entity_type: EntityType,
        operation: &'static str,
        failures: Vec<BatchFailure>,
    },

    #[error("Reference in {entity_type} record '{record}': {field} = {id} has no counterpart among the imported {target} records")]
    UnmappedReference {
        entity_type: EntityType,
        record: String,
        field: String,
        id: i64,
        target: EntityType,
    },

    #[error("Created {entity_type} records could not be traced back to the snapshot: {}", .records.join(", "))]
    UntracedRecords {
        entity_type: EntityType,
        records: Vec<String>,
    },

    #[error("Batch response for {entity_type} accounts for {accounted} of {requested} requested items")]
    BatchContract {
        entity_type: EntityType,
        requested: usize,
        accounted: usize,
    },

    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),

    #[error("Invalid snapshot shape: unknown top-level key(s) {}", .0.join(", "))]
    InvalidSnapshotShape(Vec<String>),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Transport error calling {endpoint}{}: {message}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    Transport {
        endpoint: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Deletion requires explicit confirmation")]
    ConfirmationRequired,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a transport error for a failed endpoint call
    pub fn transport(
        endpoint: impl Into<String>,
        status: Option<u16>,
        message: impl ToString,
    ) -> Self {
        Error::Transport {
            endpoint: endpoint.into(),
            status,
            message: message.to_string(),
        }
    }
}

fn summarize_failures(failures: &[BatchFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("'{}' ({})", f.label(), f.error))
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, Error>;

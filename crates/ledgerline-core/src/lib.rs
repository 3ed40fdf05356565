//! Ledgerline Core Library
//!
//! Export/import reconciliation engine for the Ledgerline finance tracker:
//! - Entity schema registry and dependency ordering
//! - Snapshot builder, JSON documents and the local artifact store
//! - Dependency-ordered importer with id and name reconciliation
//! - Dependency-ordered deleter
//! - Progress and result reporting
//! - Pluggable backends (REST API, in-memory)

pub mod backend;
pub mod config;
pub mod delete;
pub mod error;
pub mod import;
pub mod models;
pub mod progress;
pub mod schema;
pub mod snapshot;

/// Test utilities including a mock REST backend
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use backend::{fetch_all, Backend, BackendCall, BackendClient, HttpBackend, MemoryBackend};
pub use config::{BackendKind, EngineConfig};
pub use delete::{Confirmation, DeleteReport, Deleter, CONFIRMATION_PHRASE};
pub use error::{Error, Result};
pub use import::{
    IdMappingTable, ImportReport, Importer, NameResolutionTable, ReconciliationContext,
};
pub use models::{
    BatchDeleteResponse, BatchFailure, BatchOperationResponse, EntityRecord, EntityType, ListPage,
};
pub use progress::{
    LogProgress, NoopProgress, ProgressCallback, ProgressSink, ProgressTracker, ProgressUpdate,
    RunKind, RunReport, TypeOutcome,
};
pub use schema::{
    reverse_order, schema, topological_order, DependencyGraph, EntitySchema, ForeignKey,
};
pub use snapshot::{
    Artifact, ArtifactInfo, ArtifactStore, BuildOutcome, ExportFormat, ExportRequest, FetchFailure,
    Snapshot, SnapshotBuilder, SnapshotMode,
};

//! Snapshots of the user dataset
//!
//! A snapshot maps each exported entity type to its records, remembers
//! whether each collection was written in raw or readable mode, and carries
//! derived collections (the wealth time series) that are exported but never
//! imported.
//!
//! - [`builder`] fetches a snapshot from a backend
//! - [`document`] turns snapshots into artifacts and back
//! - [`artifacts`] keeps artifacts on disk

pub mod artifacts;
pub mod builder;
pub mod document;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{EntityRecord, EntityType};

pub use artifacts::{ArtifactInfo, ArtifactStore};
pub use builder::{BuildOutcome, ExportRequest, FetchFailure, SnapshotBuilder};
pub use document::{
    artifact_file_name, parse, parse_artifact, serialize, serialize_on, Artifact, ExportFormat,
};

/// Key of the derived wealth time series
pub const WEALTH_OVER_TIME: &str = "wealth_over_time";

/// Derived collections a snapshot document may carry
pub const DERIVED_KEYS: &[&str] = &[WEALTH_OVER_TIME];

/// How a collection encodes its references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotMode {
    /// Numeric ids and foreign keys, verbatim
    #[default]
    Raw,
    /// Foreign keys replaced by display names, ids kept as `original_id`
    Readable,
}

impl SnapshotMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Readable => "readable",
        }
    }
}

impl std::fmt::Display for SnapshotMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A point-in-time copy of (part of) the dataset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub collections: BTreeMap<EntityType, Vec<EntityRecord>>,
    pub modes: BTreeMap<EntityType, SnapshotMode>,
    pub derived: BTreeMap<String, Value>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the collection of an entity type
    pub fn insert(
        &mut self,
        entity_type: EntityType,
        records: Vec<EntityRecord>,
        mode: SnapshotMode,
    ) {
        self.collections.insert(entity_type, records);
        self.modes.insert(entity_type, mode);
    }

    /// Builder-style [`Snapshot::insert`]
    pub fn with(
        mut self,
        entity_type: EntityType,
        records: Vec<EntityRecord>,
        mode: SnapshotMode,
    ) -> Self {
        self.insert(entity_type, records, mode);
        self
    }

    /// Records of a type (empty if the type isn't present)
    pub fn records(&self, entity_type: EntityType) -> &[EntityRecord] {
        self.collections
            .get(&entity_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn contains(&self, entity_type: EntityType) -> bool {
        self.collections.contains_key(&entity_type)
    }

    pub fn mode(&self, entity_type: EntityType) -> SnapshotMode {
        self.modes.get(&entity_type).copied().unwrap_or_default()
    }

    /// Entity types present, in declaration order
    pub fn entity_types(&self) -> impl Iterator<Item = EntityType> + '_ {
        self.collections.keys().copied()
    }

    /// Whether any collection references by display name
    pub fn is_readable(&self) -> bool {
        self.modes.values().any(|m| *m == SnapshotMode::Readable)
    }

    /// Mode used to name artifacts of this snapshot
    pub fn overall_mode(&self) -> SnapshotMode {
        if self.is_readable() {
            SnapshotMode::Readable
        } else {
            SnapshotMode::Raw
        }
    }

    /// Total number of entity records
    pub fn record_count(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty() && self.derived.is_empty()
    }
}

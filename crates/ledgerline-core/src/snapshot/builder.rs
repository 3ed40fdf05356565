//! Snapshot builder
//!
//! Fetches every selected collection from the backend and, for readable
//! exports, swaps foreign-key ids for the display names of what they point
//! at. Export is best-effort per type: a collection that can't be fetched is
//! reported and left out while the rest of the snapshot is still built.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::backend::{fetch_all, Backend};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::models::{record_id, EntityRecord, EntityType};
use crate::progress::{ProgressSink, ProgressTracker, RunKind};
use crate::schema::{schema, topological_order, ForeignKey};

use super::{Snapshot, SnapshotMode, WEALTH_OVER_TIME};

/// What to export
#[derive(Debug, Clone, Default)]
pub struct ExportRequest {
    pub types: BTreeSet<EntityType>,
    /// Replace foreign-key ids with display names
    pub readable: bool,
    pub include_wealth_over_time: bool,
}

impl ExportRequest {
    /// Export every entity type
    pub fn all(readable: bool) -> Self {
        Self {
            types: EntityType::all().iter().copied().collect(),
            readable,
            include_wealth_over_time: true,
        }
    }
}

/// A collection that could not be fetched
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchFailure {
    /// Endpoint name of the collection, e.g. `accounts`
    pub collection: String,
    pub error: String,
}

/// Result of a build: the snapshot plus whatever was left out
#[derive(Debug, Clone, Default)]
pub struct BuildOutcome {
    pub snapshot: Snapshot,
    pub failures: Vec<FetchFailure>,
}

/// Builds snapshots from a backend
pub struct SnapshotBuilder<'a> {
    backend: &'a dyn Backend,
    page_size: usize,
}

/// Listings fetched during one build. A failed fetch is remembered too so a
/// broken collection isn't requested again for every reference into it.
#[derive(Default)]
struct ListingCache {
    listings: HashMap<EntityType, std::result::Result<Vec<EntityRecord>, String>>,
}

impl ListingCache {
    async fn get(
        &mut self,
        backend: &dyn Backend,
        entity_type: EntityType,
        page_size: usize,
    ) -> std::result::Result<&[EntityRecord], String> {
        if !self.listings.contains_key(&entity_type) {
            let fetched = fetch_all(backend, entity_type, page_size)
                .await
                .map_err(|e| e.to_string());
            self.listings.insert(entity_type, fetched);
        }
        match self.listings.get(&entity_type) {
            Some(Ok(records)) => Ok(records.as_slice()),
            Some(Err(e)) => Err(e.clone()),
            None => Ok(&[]),
        }
    }
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(backend: &'a dyn Backend, config: &EngineConfig) -> Self {
        Self {
            backend,
            page_size: config.page_size,
        }
    }

    /// Build a snapshot of the requested types.
    ///
    /// Only fails if the schema itself is inconsistent; fetch problems end
    /// up in [`BuildOutcome::failures`].
    pub async fn build(
        &self,
        request: &ExportRequest,
        progress: &dyn ProgressSink,
    ) -> Result<BuildOutcome> {
        let order: Vec<EntityType> = topological_order()?
            .iter()
            .copied()
            .filter(|t| request.types.contains(t))
            .collect();

        let total_steps = order.len() + usize::from(request.include_wealth_over_time);
        let mut tracker = ProgressTracker::new(RunKind::Export, total_steps, progress);
        let mut cache = ListingCache::default();
        let mut outcome = BuildOutcome::default();
        let mode = if request.readable {
            SnapshotMode::Readable
        } else {
            SnapshotMode::Raw
        };

        for entity_type in order {
            tracker.report(Some(entity_type), format!("Fetching {}", entity_type.endpoint()));

            let records = match cache.get(self.backend, entity_type, self.page_size).await {
                Ok(records) => records.to_vec(),
                Err(error) => {
                    warn!(entity_type = %entity_type, error = %error, "Skipping collection");
                    outcome.failures.push(FetchFailure {
                        collection: entity_type.endpoint().to_string(),
                        error,
                    });
                    let message = format!("Skipped {}", entity_type.endpoint());
                    tracker.advance(Some(entity_type), message);
                    continue;
                }
            };

            let records = if request.readable {
                self.make_readable(entity_type, records, &mut cache).await
            } else {
                records
            };

            info!(entity_type = %entity_type, count = records.len(), "Exported collection");
            tracker.advance(
                Some(entity_type),
                format!("Fetched {} {}", records.len(), entity_type.endpoint()),
            );
            outcome.snapshot.insert(entity_type, records, mode);
        }

        if request.include_wealth_over_time {
            match self.backend.wealth_over_time().await {
                Ok(series) => {
                    outcome
                        .snapshot
                        .derived
                        .insert(WEALTH_OVER_TIME.to_string(), series);
                }
                Err(e) => {
                    warn!(error = %e, "Skipping wealth over time");
                    outcome.failures.push(FetchFailure {
                        collection: WEALTH_OVER_TIME.to_string(),
                        error: e.to_string(),
                    });
                }
            }
            tracker.advance(None, "Fetched wealth over time");
        }

        Ok(outcome)
    }

    /// Rewrite records to reference by name, keeping their id as `original_id`
    async fn make_readable(
        &self,
        entity_type: EntityType,
        records: Vec<EntityRecord>,
        cache: &mut ListingCache,
    ) -> Vec<EntityRecord> {
        let entity_schema = schema(entity_type);
        let mut out = Vec::with_capacity(records.len());

        for mut record in records {
            if let Some(id) = record.remove("id") {
                record.insert("original_id".into(), id);
            }

            for fk in entity_schema.foreign_keys {
                let Some(value) = record.remove(fk.id_field) else {
                    continue;
                };
                let target_id = value.as_i64();
                let target = match target_id {
                    Some(id) => self.lookup(cache, fk, id).await,
                    None => None,
                };

                let name = target
                    .as_ref()
                    .and_then(|t| schema(fk.target).display_name(t));
                if target_id.is_some() && name.is_none() {
                    warn!(
                        entity_type = %entity_type,
                        field = fk.id_field,
                        reference = ?target_id,
                        "Reference target missing, exporting null"
                    );
                }
                record.insert(
                    fk.readable_field.into(),
                    name.map(Value::String).unwrap_or(Value::Null),
                );

                if let Some(companion) = fk.amount_companion() {
                    let amount = target
                        .as_ref()
                        .and_then(|t| t.get("amount").cloned())
                        .unwrap_or(Value::Null);
                    record.insert(companion, amount);
                }
            }
            out.push(record);
        }
        out
    }

    async fn lookup(
        &self,
        cache: &mut ListingCache,
        fk: &ForeignKey,
        id: i64,
    ) -> Option<EntityRecord> {
        match cache.get(self.backend, fk.target, self.page_size).await {
            Ok(targets) => targets.iter().find(|t| record_id(t) == Some(id)).cloned(),
            Err(error) => {
                warn!(target_type = %fk.target, error = %error, "Cannot resolve references");
                None
            }
        }
    }
}

//! Dependency-ordered importer
//!
//! Recreates a snapshot in the target system one entity type at a time, in
//! topological order. After each type's batch-create the new ids are known,
//! so the foreign keys of every later type can be rewritten before they are
//! sent:
//!
//! - raw references (`bank_id: 7`) go through the [`IdMappingTable`] when the
//!   target type is imported in the same run, and pass through unchanged
//!   otherwise. A source id of an imported type with no mapping is an error.
//! - readable references (`bank: "My Bank"`) are resolved through the
//!   [`NameResolutionTable`], which also knows the records that already
//!   existed in the target system
//!
//! A run is all-or-nothing: an unresolved name, any failed item in a batch,
//! or a created record that cannot be traced back to its source record
//! aborts it before the next type is touched.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info};

use crate::backend::{fetch_all, Backend};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::models::{BatchOperationResponse, EntityRecord, EntityType};
use crate::progress::{ProgressSink, ProgressTracker, RunKind, RunReport};
use crate::schema::{schema, topological_order, ForeignKey, INVESTMENT_POSTING_FIELD};
use crate::snapshot::Snapshot;

/// Report of an import run
pub type ImportReport = RunReport;

/// Two amounts closer than this are the same amount
const AMOUNT_TOLERANCE: f64 = 0.005;

/// Source id -> new id, per entity type
#[derive(Debug, Default)]
pub struct IdMappingTable {
    maps: HashMap<EntityType, HashMap<i64, i64>>,
}

impl IdMappingTable {
    pub fn register(&mut self, entity_type: EntityType, original_id: i64, new_id: i64) {
        self.maps
            .entry(entity_type)
            .or_default()
            .insert(original_id, new_id);
    }

    pub fn get(&self, entity_type: EntityType, original_id: i64) -> Option<i64> {
        self.maps.get(&entity_type)?.get(&original_id).copied()
    }

    pub fn len(&self, entity_type: EntityType) -> usize {
        self.maps.get(&entity_type).map_or(0, HashMap::len)
    }
}

#[derive(Debug, Clone, Copy)]
struct NameCandidate {
    id: i64,
    amount: Option<f64>,
}

/// Display name -> id of a record in the target system, per entity type.
///
/// A name can be registered more than once (two transactions both called
/// "Coffee"); lookups prefer the candidate with a matching amount and
/// otherwise the most recently registered one.
#[derive(Debug, Default)]
pub struct NameResolutionTable {
    names: HashMap<EntityType, HashMap<String, Vec<NameCandidate>>>,
}

impl NameResolutionTable {
    pub fn register(
        &mut self,
        entity_type: EntityType,
        name: &str,
        id: i64,
        amount: Option<f64>,
    ) {
        self.names
            .entry(entity_type)
            .or_default()
            .entry(name.to_string())
            .or_default()
            .push(NameCandidate { id, amount });
    }

    /// Register every name a record can be referenced by
    pub fn register_record(&mut self, entity_type: EntityType, record: &EntityRecord, id: i64) {
        let amount = record.get("amount").and_then(Value::as_f64);
        for name in schema(entity_type).reference_names(record) {
            self.register(entity_type, &name, id, amount);
        }
    }

    pub fn resolve(&self, entity_type: EntityType, name: &str, amount: Option<f64>) -> Option<i64> {
        let candidates = self.names.get(&entity_type)?.get(name)?;

        if let Some(amount) = amount {
            let matching = candidates
                .iter()
                .rev()
                .find(|c| c.amount.is_some_and(|a| amounts_equal(a, amount)));
            if let Some(candidate) = matching {
                return Some(candidate.id);
            }
        }

        let chosen = candidates.last()?;
        if candidates.len() > 1 {
            debug!(
                entity_type = %entity_type,
                name,
                candidates = candidates.len(),
                chosen = chosen.id,
                "Ambiguous name reference, using the most recent record"
            );
        }
        Some(chosen.id)
    }
}

/// Per-run reconciliation state
pub struct ReconciliationContext<'a> {
    /// Types with records in this run's snapshot
    pub imported: BTreeSet<EntityType>,
    pub ids: IdMappingTable,
    pub names: NameResolutionTable,
    pub progress: ProgressTracker<'a>,
    pub report: ImportReport,
}

impl<'a> ReconciliationContext<'a> {
    pub fn new(
        imported: BTreeSet<EntityType>,
        total_steps: usize,
        sink: &'a dyn ProgressSink,
    ) -> Self {
        Self {
            imported,
            ids: IdMappingTable::default(),
            names: NameResolutionTable::default(),
            progress: ProgressTracker::new(RunKind::Import, total_steps, sink),
            report: RunReport::new(RunKind::Import),
        }
    }
}

/// An input record ready to be sent
struct PreparedItem {
    original_id: Option<i64>,
    payload: EntityRecord,
    consumed: bool,
}

/// Imports snapshots into a backend
pub struct Importer<'a> {
    backend: &'a dyn Backend,
    page_size: usize,
}

impl<'a> Importer<'a> {
    pub fn new(backend: &'a dyn Backend, config: &EngineConfig) -> Self {
        Self {
            backend,
            page_size: config.page_size,
        }
    }

    /// Import a snapshot
    pub async fn import(
        &self,
        snapshot: &Snapshot,
        progress: &dyn ProgressSink,
    ) -> Result<ImportReport> {
        let started = Instant::now();
        let order: Vec<EntityType> = topological_order()?
            .iter()
            .copied()
            .filter(|t| snapshot.contains(*t))
            .collect();

        let imported = order
            .iter()
            .copied()
            .filter(|t| !snapshot.records(*t).is_empty())
            .collect();
        let mut ctx = ReconciliationContext::new(imported, order.len(), progress);
        info!(
            backend = self.backend.name(),
            types = order.len(),
            records = snapshot.record_count(),
            "Starting import"
        );

        self.index_existing(snapshot, &mut ctx).await?;

        for entity_type in order {
            let records = snapshot.records(entity_type);
            if records.is_empty() {
                let message = format!("No {} to import", entity_type.endpoint());
                ctx.progress.advance(Some(entity_type), message);
                continue;
            }

            ctx.progress.report(
                Some(entity_type),
                format!("Importing {} {}", records.len(), entity_type.endpoint()),
            );
            if entity_type == EntityType::Category {
                self.import_categories(records, &mut ctx).await?;
            } else {
                self.import_type(entity_type, records, &mut ctx).await?;
            }
            ctx.progress
                .advance(Some(entity_type), format!("Imported {}", entity_type.endpoint()));
        }

        ctx.report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            created = ctx.report.total_succeeded(),
            skipped = ctx.report.total_skipped(),
            elapsed_ms = ctx.report.elapsed_ms,
            "Import complete"
        );
        Ok(ctx.report)
    }

    /// Index records that already exist in the target system for every type
    /// referenced by name but not imported in this run
    async fn index_existing(
        &self,
        snapshot: &Snapshot,
        ctx: &mut ReconciliationContext<'_>,
    ) -> Result<()> {
        let mut referenced = BTreeSet::new();
        for entity_type in snapshot.entity_types() {
            for fk in schema(entity_type).foreign_keys {
                let by_name = snapshot
                    .records(entity_type)
                    .iter()
                    .any(|r| matches!(r.get(fk.readable_field), Some(Value::String(_))));
                if by_name && snapshot.records(fk.target).is_empty() {
                    referenced.insert(fk.target);
                }
            }
        }

        for target in referenced {
            let existing = fetch_all(self.backend, target, self.page_size).await?;
            debug!(entity_type = %target, count = existing.len(), "Indexed existing records");
            for record in &existing {
                if let Some(id) = record.get("id").and_then(Value::as_i64) {
                    ctx.names.register_record(target, record, id);
                }
            }
        }
        Ok(())
    }

    async fn import_categories(
        &self,
        records: &[EntityRecord],
        ctx: &mut ReconciliationContext<'_>,
    ) -> Result<()> {
        let entity_schema = schema(EntityType::Category);
        let payload: Vec<EntityRecord> = records
            .iter()
            .map(|r| {
                let mut r = r.clone();
                entity_schema.strip_for_create(&mut r);
                r
            })
            .collect();
        let requested = payload.len();

        let stored = self.backend.replace_categories(payload).await?;
        info!(count = requested, stored = stored.len(), "Replaced categories");

        let outcome = ctx.report.outcome_mut(EntityType::Category);
        outcome.requested = requested;
        outcome.succeeded = requested;
        Ok(())
    }

    async fn import_type(
        &self,
        entity_type: EntityType,
        records: &[EntityRecord],
        ctx: &mut ReconciliationContext<'_>,
    ) -> Result<()> {
        let entity_schema = schema(entity_type);
        let mut items = Vec::with_capacity(records.len());
        let mut skipped = 0;

        for record in records {
            if entity_type == EntityType::Transaction && is_investment_posting(record) {
                skipped += 1;
                continue;
            }
            let mut payload = record.clone();
            let original_id = payload
                .get("id")
                .or_else(|| payload.get("original_id"))
                .and_then(Value::as_i64);
            for fk in entity_schema.foreign_keys {
                resolve_reference(entity_type, fk, &mut payload, ctx)?;
            }
            entity_schema.strip_for_create(&mut payload);
            items.push(PreparedItem {
                original_id,
                payload,
                consumed: false,
            });
        }

        {
            let outcome = ctx.report.outcome_mut(entity_type);
            outcome.requested = records.len();
            outcome.skipped = skipped;
        }
        if skipped > 0 {
            debug!(entity_type = %entity_type, skipped, "Skipped investment postings");
        }
        if items.is_empty() {
            return Ok(());
        }

        let payloads: Vec<EntityRecord> = items.iter().map(|i| i.payload.clone()).collect();
        let response = self.backend.batch_create(entity_type, payloads).await?;
        check_partition(entity_type, items.len(), &response)?;

        for created in &response.successful {
            let Some(new_id) = created.get("id").and_then(Value::as_i64) else {
                continue;
            };
            ctx.names.register_record(entity_type, created, new_id);

            let input = items
                .iter_mut()
                .find(|i| !i.consumed && identity_matches(entity_type, created, &i.payload));
            match input {
                Some(input) => {
                    input.consumed = true;
                    if let Some(original_id) = input.original_id {
                        ctx.ids.register(entity_type, original_id, new_id);
                    }
                }
                None => debug!(
                    entity_type = %entity_type,
                    id = new_id,
                    "Created record matches no input"
                ),
            }
        }

        let outcome = ctx.report.outcome_mut(entity_type);
        outcome.succeeded = response.successful.len();
        outcome.record_failures(&response.failed);

        if !response.failed.is_empty() {
            return Err(Error::PartialBatchFailure {
                entity_type,
                operation: "create",
                failures: response.failed,
            });
        }

        // Dependents need a mapping for every source id of this type
        let untraced: Vec<String> = items
            .iter()
            .filter(|i| !i.consumed)
            .filter_map(|i| {
                let id = i.original_id?;
                Some(format!("'{}' (source id {})", entity_schema.record_label(&i.payload), id))
            })
            .collect();
        if !untraced.is_empty() {
            return Err(Error::UntracedRecords {
                entity_type,
                records: untraced,
            });
        }

        info!(entity_type = %entity_type, count = response.successful.len(), "Created records");
        Ok(())
    }
}

/// Transactions booked by the backend as the side effect of an investment
fn is_investment_posting(record: &EntityRecord) -> bool {
    !matches!(record.get(INVESTMENT_POSTING_FIELD), None | Some(Value::Null))
}

/// Rewrite one foreign key of `payload` to point into the target system
fn resolve_reference(
    entity_type: EntityType,
    fk: &ForeignKey,
    payload: &mut EntityRecord,
    ctx: &ReconciliationContext<'_>,
) -> Result<()> {
    let amount = fk
        .amount_companion()
        .and_then(|companion| payload.remove(&companion))
        .and_then(|v| v.as_f64());

    if !payload.contains_key(fk.id_field) {
        if let Some(reference) = payload.remove(fk.readable_field) {
            let resolved = match reference {
                Value::String(name) => {
                    let id = ctx.names.resolve(fk.target, &name, amount).ok_or_else(|| {
                        Error::UnresolvedReference {
                            entity_type,
                            record: schema(entity_type).record_label(payload),
                            field: fk.readable_field.to_string(),
                            reference: name.clone(),
                            target: fk.target,
                        }
                    })?;
                    Value::from(id)
                }
                Value::Number(n) => remap(entity_type, fk, payload, ctx, n.as_i64())?,
                _ => Value::Null,
            };
            payload.insert(fk.id_field.to_string(), resolved);
        }
        return Ok(());
    }

    if let Some(id) = payload.get(fk.id_field).and_then(Value::as_i64) {
        let mapped = remap(entity_type, fk, payload, ctx, Some(id))?;
        payload.insert(fk.id_field.to_string(), mapped);
    }
    payload.remove(fk.readable_field);
    Ok(())
}

/// Map a source id through the id table.
///
/// Ids of types outside this run already live in the target system and pass
/// through unchanged.
fn remap(
    entity_type: EntityType,
    fk: &ForeignKey,
    payload: &EntityRecord,
    ctx: &ReconciliationContext<'_>,
    id: Option<i64>,
) -> Result<Value> {
    let Some(id) = id else {
        return Ok(Value::Null);
    };
    if let Some(mapped) = ctx.ids.get(fk.target, id) {
        return Ok(Value::from(mapped));
    }
    if ctx.imported.contains(&fk.target) {
        return Err(Error::UnmappedReference {
            entity_type,
            record: schema(entity_type).record_label(payload),
            field: fk.id_field.to_string(),
            id,
            target: fk.target,
        });
    }
    Ok(Value::from(id))
}

/// `successful` and `failed` must account for every requested item
fn check_partition(
    entity_type: EntityType,
    requested: usize,
    response: &BatchOperationResponse,
) -> Result<()> {
    let accounted = response.successful.len() + response.failed.len();
    if accounted != requested {
        return Err(Error::BatchContract {
            entity_type,
            requested,
            accounted,
        });
    }
    Ok(())
}

/// Whether a created record is the one built from `input`
fn identity_matches(entity_type: EntityType, created: &EntityRecord, input: &EntityRecord) -> bool {
    schema(entity_type).identity_fields.iter().all(|field| {
        let a = created.get(*field).unwrap_or(&Value::Null);
        let b = input.get(*field).unwrap_or(&Value::Null);
        values_match(a, b)
    })
}

fn values_match(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => amounts_equal(x, y),
            _ => x == y,
        },
        (Value::String(x), Value::String(y)) => x == y || same_date(x, y),
        _ => a == b,
    }
}

fn amounts_equal(a: f64, b: f64) -> bool {
    (a - b).abs() < AMOUNT_TOLERANCE
}

/// `2024-01-05` matches `2024-01-05T00:00:00` and `2024-01-05 00:00:00`
fn same_date(a: &str, b: &str) -> bool {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    short.len() == 10
        && long.starts_with(short)
        && matches!(long.as_bytes().get(10), Some(b'T') | Some(b' '))
}

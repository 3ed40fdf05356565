//! Dependency-ordered deleter
//!
//! Removes records in reverse topological order so nothing is deleted while
//! something else still points at it. Unlike import, deletion keeps going
//! after per-item failures: removing records never rewires references, so
//! a failure can't corrupt what comes later. Every failure ends up in the
//! report.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::{fetch_all, Backend};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::models::{record_id, BatchFailure, EntityRecord, EntityType};
use crate::progress::{ProgressSink, ProgressTracker, RunKind, RunReport};
use crate::schema::{reverse_order, schema};

/// Report of a delete run
pub type DeleteReport = RunReport;

/// Phrase a user types to confirm deletion
pub const CONFIRMATION_PHRASE: &str = "DELETE";

/// Explicit acknowledgement required before anything is deleted
#[derive(Debug, Clone, Default)]
pub struct Confirmation {
    phrase: Option<String>,
    acknowledged: bool,
}

impl Confirmation {
    /// Confirmation by typed phrase; only [`CONFIRMATION_PHRASE`] counts
    pub fn typed(phrase: impl Into<String>) -> Self {
        Self {
            phrase: Some(phrase.into()),
            acknowledged: false,
        }
    }

    /// Confirmation given up front (`--yes`)
    pub fn acknowledged() -> Self {
        Self {
            phrase: None,
            acknowledged: true,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.acknowledged || self.phrase.as_deref() == Some(CONFIRMATION_PHRASE)
    }
}

/// Deletes records from a backend
pub struct Deleter<'a> {
    backend: &'a dyn Backend,
    page_size: usize,
}

impl<'a> Deleter<'a> {
    pub fn new(backend: &'a dyn Backend, config: &EngineConfig) -> Self {
        Self {
            backend,
            page_size: config.page_size,
        }
    }

    /// Delete every record of the selected types.
    ///
    /// Selecting every type is a full wipe: only banks (the server cascades
    /// to their accounts and transactions), assets, and refund items left
    /// without their transactions are deleted.
    pub async fn delete_all(
        &self,
        types: &BTreeSet<EntityType>,
        confirmation: &Confirmation,
        progress: &dyn ProgressSink,
    ) -> Result<DeleteReport> {
        if !confirmation.is_confirmed() {
            return Err(Error::ConfirmationRequired);
        }
        let started = Instant::now();

        let mut report = if EntityType::all().iter().all(|t| types.contains(t)) {
            self.full_wipe(progress).await?
        } else {
            let order: Vec<EntityType> = reverse_order()?
                .into_iter()
                .filter(|t| types.contains(t))
                .collect();
            let mut tracker = ProgressTracker::new(RunKind::Delete, order.len(), progress);
            let mut report = RunReport::new(RunKind::Delete);

            for entity_type in order {
                tracker.report(Some(entity_type), format!("Deleting {}", entity_type.endpoint()));
                if entity_type == EntityType::Category {
                    self.clear_categories(None, &mut report).await?;
                } else {
                    let ids = self.existing_ids(entity_type).await?;
                    self.delete_ids(entity_type, &ids, &mut report).await?;
                }
                tracker.advance(Some(entity_type), format!("Deleted {}", entity_type.endpoint()));
            }
            report
        };

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        log_summary(&report);
        Ok(report)
    }

    /// Delete specific records, by id per type
    pub async fn delete_selected(
        &self,
        selection: &BTreeMap<EntityType, Vec<i64>>,
        confirmation: &Confirmation,
        progress: &dyn ProgressSink,
    ) -> Result<DeleteReport> {
        if !confirmation.is_confirmed() {
            return Err(Error::ConfirmationRequired);
        }
        let started = Instant::now();

        let order: Vec<EntityType> = reverse_order()?
            .into_iter()
            .filter(|t| selection.get(t).is_some_and(|ids| !ids.is_empty()))
            .collect();
        let mut tracker = ProgressTracker::new(RunKind::Delete, order.len(), progress);
        let mut report = RunReport::new(RunKind::Delete);

        for entity_type in order {
            let ids = selection.get(&entity_type).map(Vec::as_slice).unwrap_or_default();
            tracker.report(
                Some(entity_type),
                format!("Deleting {} {}", ids.len(), entity_type.endpoint()),
            );
            if entity_type == EntityType::Category {
                self.clear_categories(Some(ids), &mut report).await?;
            } else {
                self.delete_ids(entity_type, ids, &mut report).await?;
            }
            tracker.advance(Some(entity_type), format!("Deleted {}", entity_type.endpoint()));
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        log_summary(&report);
        Ok(report)
    }

    async fn full_wipe(&self, progress: &dyn ProgressSink) -> Result<DeleteReport> {
        let mut tracker = ProgressTracker::new(RunKind::Delete, 3, progress);
        let mut report = RunReport::new(RunKind::Delete);
        info!("Full wipe: deleting banks, assets and orphaned refund items");

        tracker.report(Some(EntityType::Bank), "Deleting banks");
        let banks = self.existing_ids(EntityType::Bank).await?;
        self.delete_ids(EntityType::Bank, &banks, &mut report).await?;
        tracker.advance(Some(EntityType::Bank), "Deleted banks");

        tracker.report(Some(EntityType::Asset), "Deleting assets");
        let assets = self.existing_ids(EntityType::Asset).await?;
        self.delete_ids(EntityType::Asset, &assets, &mut report).await?;
        tracker.advance(Some(EntityType::Asset), "Deleted assets");

        tracker.report(Some(EntityType::RefundItem), "Deleting orphaned refund items");
        let orphans = self.orphaned_refund_items().await?;
        self.delete_ids(EntityType::RefundItem, &orphans, &mut report).await?;
        tracker.advance(Some(EntityType::RefundItem), "Deleted orphaned refund items");

        Ok(report)
    }

    async fn existing_ids(&self, entity_type: EntityType) -> Result<Vec<i64>> {
        let records = fetch_all(self.backend, entity_type, self.page_size).await?;
        Ok(records.iter().filter_map(record_id).collect())
    }

    /// Refund items whose expense or income transaction no longer exists
    async fn orphaned_refund_items(&self) -> Result<Vec<i64>> {
        let transactions: HashSet<i64> = self
            .existing_ids(EntityType::Transaction)
            .await?
            .into_iter()
            .collect();
        let items = fetch_all(self.backend, EntityType::RefundItem, self.page_size).await?;

        let missing = |item: &EntityRecord, field: &str| match item.get(field) {
            Some(Value::Number(n)) => n.as_i64().is_some_and(|id| !transactions.contains(&id)),
            _ => false,
        };
        let orphans: Vec<i64> = items
            .iter()
            .filter(|item| {
                missing(item, "expense_transaction_id") || missing(item, "income_transaction_id")
            })
            .filter_map(record_id)
            .collect();
        debug!(count = orphans.len(), "Found orphaned refund items");
        Ok(orphans)
    }

    /// Delete ids of one type, recording the outcome
    async fn delete_ids(
        &self,
        entity_type: EntityType,
        ids: &[i64],
        report: &mut DeleteReport,
    ) -> Result<()> {
        let outcome = report.outcome_mut(entity_type);
        outcome.requested += ids.len();
        if ids.is_empty() {
            return Ok(());
        }

        if !schema(entity_type).batch_delete {
            for id in ids {
                match self.backend.delete_one(entity_type, *id).await {
                    Ok(()) => outcome.succeeded += 1,
                    Err(e) => {
                        warn!(entity_type = %entity_type, id, error = %e, "Delete failed");
                        outcome.record_failures(&[BatchFailure::for_id(*id, e.to_string())]);
                    }
                }
            }
            return Ok(());
        }

        match self.backend.batch_delete(entity_type, ids).await {
            Ok(response) => {
                let accounted = response.successful.len() + response.failed.len();
                if accounted != ids.len() {
                    return Err(Error::BatchContract {
                        entity_type,
                        requested: ids.len(),
                        accounted,
                    });
                }
                outcome.succeeded += response.successful.len();
                if !response.failed.is_empty() {
                    let err = Error::PartialBatchFailure {
                        entity_type,
                        operation: "delete",
                        failures: response.failed.clone(),
                    };
                    warn!(error = %err, "Continuing after delete failures");
                    outcome.record_failures(&response.failed);
                }
            }
            Err(e) => {
                warn!(entity_type = %entity_type, error = %e, "Batch delete failed");
                let failures: Vec<BatchFailure> = ids
                    .iter()
                    .map(|id| BatchFailure::for_id(*id, e.to_string()))
                    .collect();
                outcome.record_failures(&failures);
            }
        }
        Ok(())
    }

    /// Remove categories by replacing the structure. `None` removes all.
    async fn clear_categories(
        &self,
        ids: Option<&[i64]>,
        report: &mut DeleteReport,
    ) -> Result<()> {
        let current = self.backend.categories().await?;
        let (removed, kept): (Vec<EntityRecord>, Vec<EntityRecord>) = match ids {
            None => (current, Vec::new()),
            Some(ids) => current
                .into_iter()
                .partition(|c| record_id(c).is_some_and(|id| ids.contains(&id))),
        };

        let missing: Vec<BatchFailure> = ids
            .unwrap_or_default()
            .iter()
            .filter(|id| !removed.iter().any(|c| record_id(c) == Some(**id)))
            .map(|id| BatchFailure::for_id(*id, "not found"))
            .collect();

        let outcome = report.outcome_mut(EntityType::Category);
        outcome.requested += ids.map_or(removed.len(), <[i64]>::len);
        outcome.record_failures(&missing);
        match self.backend.replace_categories(kept).await {
            Ok(_) => outcome.succeeded += removed.len(),
            Err(e) => {
                warn!(error = %e, "Replacing categories failed");
                let failures: Vec<BatchFailure> = removed
                    .iter()
                    .filter_map(record_id)
                    .map(|id| BatchFailure::for_id(id, e.to_string()))
                    .collect();
                outcome.record_failures(&failures);
            }
        }
        Ok(())
    }
}

fn log_summary(report: &DeleteReport) {
    if report.has_failures() {
        warn!(
            deleted = report.total_succeeded(),
            failed = report.total_failed(),
            "Delete finished with failures"
        );
    } else {
        info!(deleted = report.total_succeeded(), "Delete complete");
    }
}

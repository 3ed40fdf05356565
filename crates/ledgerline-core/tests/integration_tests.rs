//! Integration tests for ledgerline-core
//!
//! These tests exercise the full export → artifact → import workflow and the
//! failure semantics of import runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};

use ledgerline_core::{
    backend::{Backend, BackendCall, MemoryBackend},
    config::EngineConfig,
    error::{Error, Result},
    import::Importer,
    models::{
        BatchDeleteResponse, BatchOperationResponse, EntityRecord, EntityType, ListPage,
    },
    progress::NoopProgress,
    schema::{schema, topological_order},
    snapshot::{
        parse_artifact, serialize_on, ExportFormat, ExportRequest, Snapshot, SnapshotBuilder,
        SnapshotMode,
    },
};

fn record(value: Value) -> EntityRecord {
    value.as_object().cloned().unwrap()
}

fn export_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()
}

/// A small but complete dataset: every entity type, every kind of reference
async fn seed_dataset(backend: &MemoryBackend) {
    let my_bank = backend.seed(EntityType::Bank, json!({"name": "My Bank"})).unwrap();
    let other_bank = backend.seed(EntityType::Bank, json!({"name": "Other Bank"})).unwrap();
    let checking = backend
        .seed(EntityType::Account, json!({"name": "Checking", "bank_id": my_bank}))
        .unwrap();
    let brokerage = backend
        .seed(EntityType::Account, json!({"name": "Brokerage", "bank_id": other_bank}))
        .unwrap();
    let voo = backend
        .seed(EntityType::Asset, json!({"name": "Vanguard S&P 500", "symbol": "VOO"}))
        .unwrap();
    backend
        .replace_categories(vec![
            record(json!({"id": 1, "name": "Food"})),
            record(json!({"id": 2, "name": "Rent"})),
        ])
        .await
        .unwrap();
    let vacation = backend
        .seed(EntityType::RefundGroup, json!({"name": "Vacation"}))
        .unwrap();

    let shoes = backend
        .seed(
            EntityType::Transaction,
            json!({"description": "Shoes", "amount": -80.0, "date": "2024-02-01",
                   "from_account_id": checking}),
        )
        .unwrap();
    backend
        .seed(
            EntityType::Transaction,
            json!({"description": "Salary", "amount": 3000.0, "date": "2024-02-01",
                   "to_account_id": checking}),
        )
        .unwrap();
    let refund = backend
        .seed(
            EntityType::Transaction,
            json!({"description": "Shoes refund", "amount": 80.0, "date": "2024-02-10",
                   "to_account_id": checking}),
        )
        .unwrap();

    backend
        .seed(
            EntityType::Investment,
            json!({"asset_id": voo, "quantity": 2.0, "price": 400.0, "date": "2024-03-01",
                   "from_account_id": brokerage}),
        )
        .unwrap();
    backend
        .seed(
            EntityType::RefundItem,
            json!({"expense_transaction_id": shoes, "income_transaction_id": refund,
                   "refund_group_id": vacation, "amount": 80.0}),
        )
        .unwrap();
    backend.set_wealth_over_time(json!([{"date": "2024-03-31", "total": 3720.0}]));
}

async fn build(backend: &dyn Backend, readable: bool) -> Snapshot {
    let builder = SnapshotBuilder::new(backend, &EngineConfig::default());
    let outcome = builder
        .build(&ExportRequest::all(readable), &NoopProgress)
        .await
        .unwrap();
    assert!(outcome.failures.is_empty(), "{:?}", outcome.failures);
    outcome.snapshot
}

/// Drop everything that legitimately differs between two systems holding
/// the same data: ids, and values the backend derives itself
fn normalized(snapshot: &Snapshot) -> BTreeMap<EntityType, Vec<EntityRecord>> {
    snapshot
        .collections
        .iter()
        .map(|(t, records)| {
            let records = records
                .iter()
                .map(|r| {
                    let mut r = r.clone();
                    schema(*t).strip_for_create(&mut r);
                    r.remove("investment_id");
                    r
                })
                .collect();
            (*t, records)
        })
        .collect()
}

/// Export through a JSON artifact and import into `target`
async fn transfer(source: &MemoryBackend, target: &MemoryBackend, readable: bool) {
    let snapshot = build(source, readable).await;
    let artifact = serialize_on(&snapshot, ExportFormat::Json, export_date()).unwrap();
    let parsed = parse_artifact(&artifact.bytes, &artifact.file_name).unwrap();

    let report = Importer::new(target, &EngineConfig::default())
        .import(&parsed, &NoopProgress)
        .await
        .unwrap();
    assert!(!report.has_failures());
    // The investment posting is recreated by the investment, not imported
    assert_eq!(report.outcome(EntityType::Transaction).unwrap().skipped, 1);
}

// =============================================================================
// Round Trips
// =============================================================================

#[tokio::test]
async fn test_raw_round_trip() {
    let source = MemoryBackend::new();
    seed_dataset(&source).await;
    let target = MemoryBackend::new().with_id_offset(500).with_strict_references();

    transfer(&source, &target, false).await;

    // Same values and the same graph once ids are mapped: comparing the
    // readable renderings of both systems checks both at once
    let before = build(&source, true).await;
    let after = build(&target, true).await;
    assert_eq!(normalized(&after), normalized(&before));

    // Raw ids were renumbered and rewritten
    let bank_ids: Vec<Value> = target
        .records(EntityType::Bank)
        .iter()
        .map(|b| b["id"].clone())
        .collect();
    assert_eq!(bank_ids, vec![json!(501), json!(502)]);
    assert_eq!(target.records(EntityType::Account)[0]["bank_id"], json!(501));
}

#[tokio::test]
async fn test_readable_round_trip() {
    let source = MemoryBackend::new();
    seed_dataset(&source).await;
    let target = MemoryBackend::new().with_id_offset(900).with_strict_references();

    transfer(&source, &target, true).await;

    let before = build(&source, true).await;
    let after = build(&target, true).await;
    assert_eq!(normalized(&after), normalized(&before));

    let checking = target
        .records(EntityType::Account)
        .into_iter()
        .find(|a| a["name"] == json!("Checking"))
        .unwrap();
    let my_bank = target
        .records(EntityType::Bank)
        .into_iter()
        .find(|b| b["id"] == checking["bank_id"])
        .unwrap();
    assert_eq!(my_bank["name"], json!("My Bank"));
}

#[tokio::test]
async fn test_wealth_over_time_is_exported_not_imported() {
    let source = MemoryBackend::new();
    seed_dataset(&source).await;
    let snapshot = build(&source, false).await;
    assert_eq!(
        snapshot.derived["wealth_over_time"],
        json!([{"date": "2024-03-31", "total": 3720.0}])
    );

    let target = MemoryBackend::new();
    Importer::new(&target, &EngineConfig::default())
        .import(&snapshot, &NoopProgress)
        .await
        .unwrap();
    assert!(!target
        .calls()
        .iter()
        .any(|c| matches!(c, BackendCall::WealthOverTime)));
}

// =============================================================================
// Concrete Scenarios
// =============================================================================

#[tokio::test]
async fn test_readable_bank_and_account_scenario() {
    let backend = MemoryBackend::new().with_id_offset(7);
    let snapshot = Snapshot::new()
        .with(EntityType::Bank, vec![record(json!({"name": "Alpha"}))], SnapshotMode::Readable)
        .with(
            EntityType::Account,
            vec![record(json!({"name": "Checking", "bank": "Alpha"}))],
            SnapshotMode::Readable,
        );

    Importer::new(&backend, &EngineConfig::default())
        .import(&snapshot, &NoopProgress)
        .await
        .unwrap();

    let banks = backend.records(EntityType::Bank);
    let accounts = backend.records(EntityType::Account);
    assert_eq!(banks.len(), 1);
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0]["bank_id"], banks[0]["id"]);
}

#[tokio::test]
async fn test_raw_ids_outside_the_run_pass_through() {
    let backend = MemoryBackend::new();
    let snapshot = Snapshot::new().with(
        EntityType::Transaction,
        vec![record(json!({
            "description": "Coffee", "amount": -5, "from_account_id": 7, "to_account_id": 9
        }))],
        SnapshotMode::Raw,
    );

    Importer::new(&backend, &EngineConfig::default())
        .import(&snapshot, &NoopProgress)
        .await
        .unwrap();

    let batches = backend.creates_for(EntityType::Transaction);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0][0]["from_account_id"], json!(7));
    assert_eq!(batches[0][0]["to_account_id"], json!(9));
}

#[tokio::test]
async fn test_partial_bank_failure_aborts_run() {
    let backend = MemoryBackend::new();
    backend.reject_named("Dup", "duplicate");
    let snapshot = Snapshot::new()
        .with(
            EntityType::Bank,
            vec![
                record(json!({"id": 1, "name": "Alpha"})),
                record(json!({"id": 2, "name": "Dup"})),
                record(json!({"id": 3, "name": "Gamma"})),
            ],
            SnapshotMode::Raw,
        )
        .with(
            EntityType::Account,
            vec![record(json!({"id": 1, "name": "Checking", "bank_id": 1}))],
            SnapshotMode::Raw,
        );

    let err = Importer::new(&backend, &EngineConfig::default())
        .import(&snapshot, &NoopProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::PartialBatchFailure { entity_type: EntityType::Bank, .. }));
    assert!(err.to_string().contains("Dup"));
    assert!(backend.creates_for(EntityType::Account).is_empty());
}

// =============================================================================
// Failure Semantics
// =============================================================================

#[tokio::test]
async fn test_dangling_reference_stops_at_offending_type() {
    let backend = MemoryBackend::new();
    let snapshot = Snapshot::new()
        .with(
            EntityType::Bank,
            vec![record(json!({"original_id": 1, "name": "Alpha"}))],
            SnapshotMode::Readable,
        )
        .with(
            EntityType::Account,
            vec![record(json!({"original_id": 1, "name": "Checking", "bank": "Ghost"}))],
            SnapshotMode::Readable,
        )
        .with(
            EntityType::Transaction,
            vec![record(json!({
                "original_id": 1, "description": "Coffee", "from_account": "Checking"
            }))],
            SnapshotMode::Readable,
        );

    let err = Importer::new(&backend, &EngineConfig::default())
        .import(&snapshot, &NoopProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnresolvedReference { .. }));
    assert!(err.to_string().contains("Ghost"));

    let order = topological_order().unwrap();
    let offending = order.iter().position(|t| *t == EntityType::Account).unwrap();
    for t in &order[offending..] {
        assert!(backend.creates_for(*t).is_empty(), "{} was created", t);
    }
    assert_eq!(backend.count(EntityType::Bank), 1);
}

/// Wraps a backend and rewrites every batch-create response
struct TamperingBackend {
    inner: MemoryBackend,
    tamper: fn(EntityType, &mut BatchOperationResponse),
}

impl TamperingBackend {
    /// Silently drops the last item of every batch
    fn dropping() -> Self {
        Self {
            inner: MemoryBackend::new(),
            tamper: |_, response| {
                response.successful.pop();
            },
        }
    }

    /// Fills in today's date on transactions created without one
    fn dating(inner: MemoryBackend) -> Self {
        Self {
            inner,
            tamper: |t, response| {
                if t != EntityType::Transaction {
                    return;
                }
                for created in &mut response.successful {
                    if created.get("date").map_or(true, Value::is_null) {
                        created.insert("date".to_string(), json!("2024-06-30T00:00:00"));
                    }
                }
            },
        }
    }
}

#[async_trait]
impl Backend for TamperingBackend {
    async fn list(&self, t: EntityType, page_size: usize, page: usize) -> Result<ListPage> {
        self.inner.list(t, page_size, page).await
    }

    async fn batch_create(
        &self,
        t: EntityType,
        items: Vec<EntityRecord>,
    ) -> Result<BatchOperationResponse> {
        let mut response = self.inner.batch_create(t, items).await?;
        (self.tamper)(t, &mut response);
        Ok(response)
    }

    async fn batch_delete(&self, t: EntityType, ids: &[i64]) -> Result<BatchDeleteResponse> {
        self.inner.batch_delete(t, ids).await
    }

    async fn delete_one(&self, t: EntityType, id: i64) -> Result<()> {
        self.inner.delete_one(t, id).await
    }

    async fn categories(&self) -> Result<Vec<EntityRecord>> {
        self.inner.categories().await
    }

    async fn replace_categories(&self, c: Vec<EntityRecord>) -> Result<Vec<EntityRecord>> {
        self.inner.replace_categories(c).await
    }

    async fn wealth_over_time(&self) -> Result<Value> {
        self.inner.wealth_over_time().await
    }

    fn name(&self) -> &str {
        "tampering"
    }
}

#[tokio::test]
async fn test_batch_partition_is_enforced() {
    // A well-behaved backend partitions every request
    let backend = MemoryBackend::new();
    backend.reject_named("B", "nope");
    let items = vec![
        record(json!({"name": "A"})),
        record(json!({"name": "B"})),
        record(json!({"name": "A"})),
    ];
    let response = backend.batch_create(EntityType::Bank, items).await.unwrap();
    assert_eq!(response.successful.len() + response.failed.len(), 3);
    assert_eq!(response.failed.len(), 2);

    // One that drops items fails the import
    let dropping = TamperingBackend::dropping();
    let snapshot = Snapshot::new().with(
        EntityType::Bank,
        vec![record(json!({"name": "X"})), record(json!({"name": "Y"}))],
        SnapshotMode::Raw,
    );
    let err = Importer::new(&dropping, &EngineConfig::default())
        .import(&snapshot, &NoopProgress)
        .await
        .unwrap_err();
    match err {
        Error::BatchContract {
            requested,
            accounted,
            ..
        } => assert_eq!((requested, accounted), (2, 1)),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_untraceable_create_aborts_before_dependents() {
    let store = MemoryBackend::new().with_id_offset(10);
    let backend = TamperingBackend::dating(store.clone());
    let snapshot = Snapshot::new()
        .with(
            EntityType::Transaction,
            vec![record(json!({"id": 1, "description": "Shoes", "amount": -80}))],
            SnapshotMode::Raw,
        )
        .with(
            EntityType::RefundItem,
            vec![record(json!({"id": 1, "expense_transaction_id": 1, "amount": 80}))],
            SnapshotMode::Raw,
        );

    let err = Importer::new(&backend, &EngineConfig::default())
        .import(&snapshot, &NoopProgress)
        .await
        .unwrap_err();
    match &err {
        Error::UntracedRecords {
            entity_type,
            records,
        } => {
            assert_eq!(*entity_type, EntityType::Transaction);
            assert_eq!(records, &vec!["'Shoes' (source id 1)".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.count(EntityType::Transaction), 1);
    assert!(store.creates_for(EntityType::RefundItem).is_empty());
}

// =============================================================================
// HTTP End To End
// =============================================================================

#[cfg(feature = "test-utils")]
mod http {
    use super::*;
    use ledgerline_core::backend::HttpBackend;
    use ledgerline_core::test_utils::MockBackendServer;
    use std::time::Duration;

    #[tokio::test]
    async fn test_transfer_between_http_backends() {
        let source_store = MemoryBackend::new();
        seed_dataset(&source_store).await;
        let target_store = MemoryBackend::new().with_id_offset(300).with_strict_references();

        let source_server = MockBackendServer::start(source_store.clone()).await;
        let target_server = MockBackendServer::start(target_store.clone()).await;
        let source = HttpBackend::new(&source_server.url(), Duration::from_secs(5)).unwrap();
        let target = HttpBackend::new(&target_server.url(), Duration::from_secs(5)).unwrap();

        let snapshot = build(&source, true).await;
        Importer::new(&target, &EngineConfig::default())
            .import(&snapshot, &NoopProgress)
            .await
            .unwrap();

        let before = build(&source_store, true).await;
        let after = build(&target_store, true).await;
        assert_eq!(normalized(&after), normalized(&before));
    }
}

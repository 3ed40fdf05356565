//! CLI command tests
//!
//! This module contains all tests for the CLI commands. Commands run against
//! an in-memory backend and a temporary export directory.

use std::path::Path;

use ledgerline_core::{ArtifactStore, BackendKind, EngineConfig, EntityType, MemoryBackend};
use serde_json::json;
use tempfile::TempDir;

use crate::cli::parse_selection;
use crate::commands::{self, ExportDestination};

fn setup_test_config(dir: &Path) -> EngineConfig {
    EngineConfig {
        backend_kind: BackendKind::Memory,
        export_dir: Some(dir.join("exports")),
        ..EngineConfig::default()
    }
}

fn setup_test_backend() -> MemoryBackend {
    let backend = MemoryBackend::new();
    let bank = backend
        .seed(EntityType::Bank, json!({"name": "My Bank"}))
        .unwrap();
    let account = backend
        .seed(EntityType::Account, json!({"name": "Checking", "bank_id": bank}))
        .unwrap();
    backend
        .seed(
            EntityType::Transaction,
            json!({"description": "Coffee", "amount": -4.5, "date": "2024-01-02",
                   "from_account_id": account}),
        )
        .unwrap();
    backend
}

/// Export everything to the config's export dir, returning the stored file
async fn export_all(backend: &MemoryBackend, config: &EngineConfig, readable: bool) -> String {
    let request = commands::export_request(&[], readable, true);
    commands::cmd_export(
        backend,
        config,
        &request,
        ledgerline_core::ExportFormat::Json,
        ExportDestination::Store(None),
    )
    .await
    .unwrap();

    let store = ArtifactStore::new(config.export_dir(), false).unwrap();
    let listed = store.list().unwrap();
    assert_eq!(listed.len(), 1);
    listed[0].name.clone()
}

// ========== Argument Parsing Tests ==========

#[test]
fn test_parse_selection() {
    assert_eq!(
        parse_selection("transactions:42").unwrap(),
        (EntityType::Transaction, 42)
    );
    assert_eq!(
        parse_selection("refund-items: 7").unwrap(),
        (EntityType::RefundItem, 7)
    );
    assert!(parse_selection("transactions").is_err());
    assert!(parse_selection("budgets:1").is_err());
    assert!(parse_selection("banks:abc").is_err());
}

#[test]
fn test_export_request_defaults_to_all_types() {
    let request = commands::export_request(&[], true, false);
    assert_eq!(request.types.len(), EntityType::all().len());
    assert!(request.readable);
    assert!(!request.include_wealth_over_time);

    let request = commands::export_request(&[EntityType::Bank, EntityType::Bank], false, true);
    assert_eq!(request.types.len(), 1);
}

#[test]
fn test_load_config_backend_url_override() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("config.toml");
    let config = commands::load_config(Some(&missing), Some("http://example.test:9000/")).unwrap();
    assert_eq!(config.backend_url, "http://example.test:9000");
}

// ========== Export / Import Command Tests ==========

#[tokio::test]
async fn test_cmd_export_stores_artifact() {
    let dir = TempDir::new().unwrap();
    let config = setup_test_config(dir.path());
    let backend = setup_test_backend();

    let name = export_all(&backend, &config, false).await;
    assert!(name.starts_with("ledgerline_export_raw_"));
    assert!(name.ends_with(".json"));
}

#[tokio::test]
async fn test_cmd_export_readable_then_import() {
    let dir = TempDir::new().unwrap();
    let config = setup_test_config(dir.path());
    let source = setup_test_backend();

    let name = export_all(&source, &config, true).await;
    assert!(name.starts_with("ledgerline_export_readable_"));

    let target = MemoryBackend::new().with_id_offset(100);
    let path = config.export_dir().join(&name);
    commands::cmd_import(&target, &config, &path, false)
        .await
        .unwrap();

    assert_eq!(target.count(EntityType::Bank), 1);
    assert_eq!(target.count(EntityType::Account), 1);
    let account_id = target.records(EntityType::Account)[0]["id"].clone();
    assert_eq!(account_id, json!(101));
    let transactions = target.records(EntityType::Transaction);
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0]["from_account_id"], account_id);
}

#[tokio::test]
async fn test_cmd_import_dry_run_creates_nothing() {
    let dir = TempDir::new().unwrap();
    let config = setup_test_config(dir.path());
    let name = export_all(&setup_test_backend(), &config, false).await;

    let target = MemoryBackend::new();
    commands::cmd_import(&target, &config, &config.export_dir().join(name), true)
        .await
        .unwrap();
    assert!(target.calls().is_empty());
}

#[tokio::test]
async fn test_cmd_import_rejects_non_json() {
    let dir = TempDir::new().unwrap();
    let config = setup_test_config(dir.path());
    let file = dir.path().join("export.csv");
    std::fs::write(&file, "a,b\n1,2\n").unwrap();

    let result = commands::cmd_import(&MemoryBackend::new(), &config, &file, false).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_cmd_import_reports_abort() {
    let dir = TempDir::new().unwrap();
    let config = setup_test_config(dir.path());
    let file = dir.path().join("ledgerline_export_readable_2024-01-05.json");
    std::fs::write(
        &file,
        r#"{"accounts": [{"original_id": 1, "name": "Checking", "bank": "Ghost"}]}"#,
    )
    .unwrap();

    let target = MemoryBackend::new();
    let err = commands::cmd_import(&target, &config, &file, false)
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("Ghost"));
    assert!(target.creates_for(EntityType::Account).is_empty());
}

// ========== Delete Command Tests ==========

#[tokio::test]
async fn test_cmd_delete_types() {
    let dir = TempDir::new().unwrap();
    let config = setup_test_config(dir.path());
    let backend = setup_test_backend();

    commands::cmd_delete(&backend, &config, &[EntityType::Transaction], &[], true)
        .await
        .unwrap();
    assert_eq!(backend.count(EntityType::Transaction), 0);
    assert_eq!(backend.count(EntityType::Account), 1);
}

#[tokio::test]
async fn test_cmd_delete_selected_ids() {
    let dir = TempDir::new().unwrap();
    let config = setup_test_config(dir.path());
    let backend = setup_test_backend();

    commands::cmd_delete(&backend, &config, &[], &[(EntityType::Transaction, 1)], true)
        .await
        .unwrap();
    assert_eq!(backend.count(EntityType::Transaction), 0);
}

#[tokio::test]
async fn test_cmd_delete_requires_selection() {
    let dir = TempDir::new().unwrap();
    let config = setup_test_config(dir.path());
    let backend = setup_test_backend();

    assert!(commands::cmd_delete(&backend, &config, &[], &[], true)
        .await
        .is_err());
    assert!(commands::cmd_delete(
        &backend,
        &config,
        &[EntityType::Bank],
        &[(EntityType::Bank, 1)],
        true
    )
    .await
    .is_err());
    assert_eq!(backend.count(EntityType::Bank), 1);
}

#[test]
fn test_group_selection_dedupes() {
    let selection = commands::group_selection(&[
        (EntityType::Transaction, 3),
        (EntityType::Account, 1),
        (EntityType::Transaction, 3),
        (EntityType::Transaction, 4),
    ]);
    assert_eq!(selection[&EntityType::Transaction], vec![3, 4]);
    assert_eq!(selection[&EntityType::Account], vec![1]);
}

#[test]
fn test_read_confirmation() {
    assert!(commands::read_confirmation("DELETE\n").is_confirmed());
    assert!(!commands::read_confirmation("delete\n").is_confirmed());
    assert!(!commands::read_confirmation("\n").is_confirmed());
}

// ========== Schema / Artifacts Command Tests ==========

#[test]
fn test_cmd_schema() {
    assert!(commands::cmd_schema(false).is_ok());
    assert!(commands::cmd_schema(true).is_ok());
}

#[test]
fn test_cmd_artifacts_list_missing_dir() {
    let dir = TempDir::new().unwrap();
    let config = setup_test_config(dir.path());
    assert!(commands::cmd_artifacts_list(&config, None).is_ok());
    assert!(!config.export_dir().exists());
}

#[tokio::test]
async fn test_cmd_artifacts_list_and_delete() {
    let dir = TempDir::new().unwrap();
    let config = setup_test_config(dir.path());
    let name = export_all(&setup_test_backend(), &config, false).await;

    assert!(commands::cmd_artifacts_list(&config, None).is_ok());
    commands::cmd_artifacts_delete(&config, &name, None, true).unwrap();
    assert!(!config.export_dir().join(&name).exists());
    assert!(commands::cmd_artifacts_delete(&config, &name, None, true).is_err());
}

#[test]
fn test_format_size() {
    assert_eq!(commands::format_size(512), "512 B");
    assert_eq!(commands::format_size(2048), "2.0 KB");
    assert_eq!(commands::format_size(3 * 1024 * 1024), "3.0 MB");
}

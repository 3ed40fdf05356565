//! Import command implementation

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use ledgerline_core::snapshot::parse_artifact;
use ledgerline_core::{topological_order, Backend, EngineConfig, Importer, Snapshot};

use super::{print_report, progress_printer};

pub async fn cmd_import(
    backend: &dyn Backend,
    config: &EngineConfig,
    file: &Path,
    dry_run: bool,
) -> Result<()> {
    let snapshot = read_snapshot(file)?;
    print_summary(file, &snapshot)?;

    if dry_run {
        println!("Dry run: nothing was imported");
        return Ok(());
    }
    if snapshot.is_empty() {
        println!("Nothing to import");
        return Ok(());
    }

    println!("📥 Importing into {}...", backend.name());
    let printer = progress_printer();
    let report = Importer::new(backend, config)
        .import(&snapshot, &printer)
        .await
        .context("Import aborted")?;

    print_report(&report);
    println!(
        "✅ Imported {} record(s), skipped {}",
        report.total_succeeded(),
        report.total_skipped()
    );

    Ok(())
}

/// Read and parse a snapshot file
pub fn read_snapshot(file: &Path) -> Result<Snapshot> {
    let bytes =
        fs::read(file).with_context(|| format!("Failed to open file: {}", file.display()))?;
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    parse_artifact(&bytes, name)
        .with_context(|| format!("Failed to read snapshot: {}", file.display()))
}

fn print_summary(file: &Path, snapshot: &Snapshot) -> Result<()> {
    println!(
        "Snapshot {} ({} records)",
        file.display(),
        snapshot.record_count()
    );
    for entity_type in topological_order()? {
        if snapshot.contains(*entity_type) {
            println!(
                "   {:<14} {:>6}  {}",
                entity_type.endpoint(),
                snapshot.records(*entity_type).len(),
                snapshot.mode(*entity_type)
            );
        }
    }
    for key in snapshot.derived.keys() {
        println!("   {:<14} (derived, not imported)", key);
    }
    Ok(())
}

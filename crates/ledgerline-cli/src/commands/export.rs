//! Export command implementation

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use ledgerline_core::snapshot::serialize;
use ledgerline_core::{
    ArtifactStore, Backend, EngineConfig, EntityType, ExportFormat, ExportRequest, NoopProgress,
    ProgressSink, SnapshotBuilder,
};

use super::{format_size, progress_printer};

/// Where an export ends up
pub enum ExportDestination {
    /// The artifact store; `None` uses the configured export directory
    Store(Option<PathBuf>),
    Stdout,
}

/// Build an export request; no types means every type
pub fn export_request(types: &[EntityType], readable: bool, include_wealth: bool) -> ExportRequest {
    let mut request = ExportRequest::all(readable);
    if !types.is_empty() {
        request.types = types.iter().copied().collect();
    }
    request.include_wealth_over_time = include_wealth;
    request
}

pub async fn cmd_export(
    backend: &dyn Backend,
    config: &EngineConfig,
    request: &ExportRequest,
    format: ExportFormat,
    destination: ExportDestination,
) -> Result<()> {
    let to_stdout = matches!(destination, ExportDestination::Stdout);

    // Progress would corrupt the document on stdout
    let printer = progress_printer();
    let progress: &dyn ProgressSink = if to_stdout { &NoopProgress } else { &printer };

    if !to_stdout {
        println!(
            "📦 Exporting {} entity type(s) from {} ({})...",
            request.types.len(),
            backend.name(),
            if request.readable { "readable" } else { "raw" }
        );
    }

    let outcome = SnapshotBuilder::new(backend, config)
        .build(request, progress)
        .await
        .context("Export failed")?;

    for failure in &outcome.failures {
        eprintln!("⚠️  Left out {}: {}", failure.collection, failure.error);
    }

    let artifact = serialize(&outcome.snapshot, format).context("Failed to serialize snapshot")?;

    match destination {
        ExportDestination::Stdout => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&artifact.bytes)?;
            stdout.flush()?;
        }
        ExportDestination::Store(dir) => {
            let dir = dir.unwrap_or_else(|| config.export_dir());
            let store = ArtifactStore::new(&dir, config.compress).with_context(|| {
                format!("Failed to initialize export directory: {}", dir.display())
            })?;
            let info = store.write(&artifact).context("Failed to store export")?;

            println!("✅ Export saved: {}", info.name);
            println!("   Location: {}", info.path.display());
            println!("   Size: {}", format_size(info.size));
            println!("   Records: {}", outcome.snapshot.record_count());
            println!("   SHA-256: {}", artifact.sha256);
            if info.compressed {
                println!("   📦 Compressed");
            }
            if format != ExportFormat::Json {
                println!(
                    "   ⚠️  {} export is a placeholder; export as JSON to import it again",
                    format.extension().to_uppercase()
                );
            }
            if !outcome.failures.is_empty() {
                println!(
                    "   ⚠️  {} collection(s) could not be fetched and were left out",
                    outcome.failures.len()
                );
            }
        }
    }

    Ok(())
}

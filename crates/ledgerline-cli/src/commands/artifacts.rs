//! Stored export management commands

use std::path::PathBuf;

use anyhow::{Context, Result};
use ledgerline_core::{ArtifactStore, EngineConfig};

use super::{confirm, format_size};

/// List stored artifacts
pub fn cmd_artifacts_list(config: &EngineConfig, dir: Option<PathBuf>) -> Result<()> {
    let export_dir = dir.unwrap_or_else(|| config.export_dir());

    if !export_dir.exists() {
        println!("No exports found (export directory does not exist)");
        println!("Directory: {}", export_dir.display());
        return Ok(());
    }

    let store = ArtifactStore::new(&export_dir, config.compress).with_context(|| {
        format!(
            "Failed to access export directory: {}",
            export_dir.display()
        )
    })?;
    let artifacts = store.list().context("Failed to list exports")?;

    if artifacts.is_empty() {
        println!("No exports found");
        println!("Directory: {}", export_dir.display());
        return Ok(());
    }

    println!("Stored exports ({}):", export_dir.display());
    println!();
    println!("{:<48} {:>10} {:>16}", "NAME", "SIZE", "CREATED");
    println!("{}", "-".repeat(76));

    for artifact in artifacts {
        let created = artifact.created_at.format("%Y-%m-%d %H:%M");
        println!(
            "{:<48} {:>10} {:>16} {}",
            artifact.name,
            format_size(artifact.size),
            created,
            if artifact.compressed { "📦" } else { "" }
        );
    }

    Ok(())
}

/// Delete a stored artifact
pub fn cmd_artifacts_delete(
    config: &EngineConfig,
    name: &str,
    dir: Option<PathBuf>,
    yes: bool,
) -> Result<()> {
    let export_dir = dir.unwrap_or_else(|| config.export_dir());
    let store = ArtifactStore::new(&export_dir, config.compress).with_context(|| {
        format!(
            "Failed to access export directory: {}",
            export_dir.display()
        )
    })?;

    if !yes && !confirm(&format!("Delete export {}?", name))? {
        println!("Cancelled");
        return Ok(());
    }

    store
        .delete(name)
        .with_context(|| format!("Failed to delete export {}", name))?;
    println!("✅ Deleted export: {}", name);

    Ok(())
}

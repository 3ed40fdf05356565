//! Shared utilities for commands
//!
//! This module contains:
//! - `load_config` - Layered config plus command-line overrides
//! - `open_backend` - Build the configured backend client
//! - `progress_printer` - Progress sink that prints to the terminal
//! - `print_report` - Per-type table for a finished run

use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use ledgerline_core::{
    config::default_config_path, BackendClient, EngineConfig, ProgressCallback, ProgressUpdate,
    RunReport,
};

/// Load configuration, preferring an explicit file over the default location
pub fn load_config(path: Option<&Path>, backend_url: Option<&str>) -> Result<EngineConfig> {
    let path = path.map(Path::to_path_buf).or_else(default_config_path);
    let mut config = EngineConfig::load_from(path.as_deref()).context("Failed to load config")?;
    if let Some(url) = backend_url {
        config.backend_url = url.trim_end_matches('/').to_string();
    }
    Ok(config)
}

/// Open the configured backend
pub fn open_backend(config: &EngineConfig) -> Result<BackendClient> {
    BackendClient::from_config(config)
        .with_context(|| format!("Failed to set up backend at {}", config.backend_url))
}

/// Print one line per progress update
pub fn progress_printer() -> ProgressCallback {
    Box::new(|update: &ProgressUpdate| {
        println!("   [{:>3.0}%] {}", update.percent, update.message);
    })
}

/// Print a per-type summary of a run
pub fn print_report(report: &RunReport) {
    println!();
    println!(
        "{:<14} {:>10} {:>10} {:>8} {:>8}",
        "TYPE", "REQUESTED", "SUCCEEDED", "FAILED", "SKIPPED"
    );
    println!("{}", "-".repeat(54));
    for (entity_type, outcome) in &report.outcomes {
        println!(
            "{:<14} {:>10} {:>10} {:>8} {:>8}",
            entity_type.endpoint(),
            outcome.requested,
            outcome.succeeded,
            outcome.failed,
            outcome.skipped
        );
    }

    let failures: Vec<_> = report
        .outcomes
        .iter()
        .flat_map(|(t, o)| o.failures.iter().map(move |f| (t, f)))
        .collect();
    if !failures.is_empty() {
        println!();
        println!("Failures:");
        for (entity_type, failure) in failures {
            println!("  - {} {}: {}", entity_type, failure.label(), failure.error);
        }
    }
    println!();
    println!("Finished in {} ms", report.elapsed_ms);
}

/// Ask a y/N question on stdin
pub fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

/// Format a byte size as human-readable
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

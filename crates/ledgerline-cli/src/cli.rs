//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ledgerline_core::{EntityType, ExportFormat};

/// Ledgerline - Export, import and wipe finance tracker data
#[derive(Parser)]
#[command(name = "ledgerline")]
#[command(about = "Snapshot export/import for the Ledgerline finance tracker", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to ~/.config/ledgerline/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Backend base URL, overriding the config file
    #[arg(long, global = true)]
    pub backend_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Export a snapshot of the backend's data
    Export {
        /// Entity types to export, comma separated (default: all)
        ///
        /// Example: --types banks,accounts,transactions
        #[arg(short, long, value_delimiter = ',')]
        types: Vec<EntityType>,

        /// Output format: json, csv, xlsx (only JSON can be imported again)
        #[arg(short, long, default_value = "json")]
        format: ExportFormat,

        /// Replace foreign-key ids with display names
        #[arg(long)]
        readable: bool,

        /// Directory to store the artifact in (defaults to the export directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the artifact to stdout instead of storing it
        #[arg(long, conflicts_with = "output")]
        stdout: bool,

        /// Leave out the wealth-over-time series
        #[arg(long)]
        no_wealth: bool,
    },

    /// Import a JSON snapshot
    Import {
        /// Snapshot file (.json or .json.gz)
        #[arg(short, long)]
        file: PathBuf,

        /// Parse and summarize the snapshot without creating anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete records, in reverse dependency order
    Delete {
        /// Entity types to delete entirely, comma separated
        #[arg(short, long, value_delimiter = ',')]
        types: Vec<EntityType>,

        /// Specific records to delete, as <type>:<id> (repeatable)
        ///
        /// Example: --id transactions:42 --id accounts:7
        #[arg(long = "id", value_parser = parse_selection)]
        ids: Vec<(EntityType, i64)>,

        /// Every entity type (a full wipe)
        #[arg(long, conflicts_with = "types")]
        all: bool,

        /// Skip the typed confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Show entity types in dependency order
    Schema {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage stored export artifacts
    Artifacts {
        #[command(subcommand)]
        action: Option<ArtifactsAction>,
    },
}

#[derive(Subcommand)]
pub enum ArtifactsAction {
    /// List stored artifacts, newest first
    List {
        /// Export directory (defaults to the configured one)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Delete a stored artifact
    Delete {
        /// Artifact file name
        name: String,

        /// Export directory (defaults to the configured one)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Parse `<type>:<id>`, e.g. `transactions:42`
pub fn parse_selection(s: &str) -> Result<(EntityType, i64), String> {
    let (entity_type, id) = s
        .split_once(':')
        .ok_or_else(|| format!("Expected <type>:<id>, got '{}'", s))?;
    let entity_type: EntityType = entity_type.parse()?;
    let id = id
        .trim()
        .parse::<i64>()
        .map_err(|_| format!("Invalid id in '{}'", s))?;
    Ok((entity_type, id))
}

//! Ledgerline CLI - Snapshot export/import for the finance tracker
//!
//! Usage:
//!   ledgerline export --readable         Export everything with display names
//!   ledgerline import --file SNAPSHOT    Import a JSON snapshot
//!   ledgerline delete --all              Wipe the backend (asks for DELETE)
//!   ledgerline artifacts list            Show stored exports

mod cli;
mod commands;

#[cfg(test)]
mod tests;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;
use commands::ExportDestination;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let config = commands::load_config(cli.config.as_deref(), cli.backend_url.as_deref())?;

    match cli.command {
        Commands::Export {
            types,
            format,
            readable,
            output,
            stdout,
            no_wealth,
        } => {
            let backend = commands::open_backend(&config)?;
            let request = commands::export_request(&types, readable, !no_wealth);
            let destination = if stdout {
                ExportDestination::Stdout
            } else {
                ExportDestination::Store(output)
            };
            commands::cmd_export(&backend, &config, &request, format, destination).await
        }
        Commands::Import { file, dry_run } => {
            let backend = commands::open_backend(&config)?;
            commands::cmd_import(&backend, &config, &file, dry_run).await
        }
        Commands::Delete {
            types,
            ids,
            all,
            yes,
        } => {
            let backend = commands::open_backend(&config)?;
            let types = if all {
                ledgerline_core::EntityType::all().to_vec()
            } else {
                types
            };
            commands::cmd_delete(&backend, &config, &types, &ids, yes).await
        }
        Commands::Schema { json } => commands::cmd_schema(json),
        Commands::Artifacts { action } => match action {
            None => commands::cmd_artifacts_list(&config, None),
            Some(ArtifactsAction::List { dir }) => commands::cmd_artifacts_list(&config, dir),
            Some(ArtifactsAction::Delete { name, dir, yes }) => {
                commands::cmd_artifacts_delete(&config, &name, dir, yes)
            }
        },
    }
}

//! Delete command implementation

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};

use anyhow::{Context, Result};
use ledgerline_core::{
    Backend, Confirmation, Deleter, EngineConfig, EntityType, CONFIRMATION_PHRASE,
};

use super::{print_report, progress_printer};

pub async fn cmd_delete(
    backend: &dyn Backend,
    config: &EngineConfig,
    types: &[EntityType],
    ids: &[(EntityType, i64)],
    yes: bool,
) -> Result<()> {
    if types.is_empty() && ids.is_empty() {
        anyhow::bail!("Nothing selected. Use --types, --id or --all.");
    }
    if !types.is_empty() && !ids.is_empty() {
        anyhow::bail!("Use either --types/--all or --id, not both.");
    }

    let types: BTreeSet<EntityType> = types.iter().copied().collect();
    let selection = group_selection(ids);

    println!("⚠️  This will permanently delete from {}:", backend.name());
    if selection.is_empty() {
        for entity_type in &types {
            println!("  - all {}", entity_type.endpoint());
        }
        if types.len() == EntityType::all().len() {
            println!("  (full wipe: categories, refund groups and transactions");
            println!("   without an account are left in place)");
        }
    } else {
        for (entity_type, ids) in &selection {
            println!("  - {} {}", ids.len(), entity_type.endpoint());
        }
    }

    let confirmation = if yes {
        Confirmation::acknowledged()
    } else {
        print!("Type {} to confirm: ", CONFIRMATION_PHRASE);
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        read_confirmation(&input)
    };
    if !confirmation.is_confirmed() {
        println!("Cancelled");
        return Ok(());
    }

    let printer = progress_printer();
    let deleter = Deleter::new(backend, config);
    let report = if selection.is_empty() {
        deleter.delete_all(&types, &confirmation, &printer).await
    } else {
        deleter
            .delete_selected(&selection, &confirmation, &printer)
            .await
    }
    .context("Delete failed")?;

    print_report(&report);
    if report.has_failures() {
        println!(
            "⚠️  Deleted {} record(s); {} could not be deleted",
            report.total_succeeded(),
            report.total_failed()
        );
    } else {
        println!("✅ Deleted {} record(s)", report.total_succeeded());
    }

    Ok(())
}

/// Group `<type>:<id>` selections by type, dropping repeats
pub fn group_selection(ids: &[(EntityType, i64)]) -> BTreeMap<EntityType, Vec<i64>> {
    let mut selection: BTreeMap<EntityType, Vec<i64>> = BTreeMap::new();
    for (entity_type, id) in ids {
        let entry = selection.entry(*entity_type).or_default();
        if !entry.contains(id) {
            entry.push(*id);
        }
    }
    selection
}

/// Interpret what the user typed at the confirmation prompt
pub fn read_confirmation(input: &str) -> Confirmation {
    Confirmation::typed(input.trim())
}

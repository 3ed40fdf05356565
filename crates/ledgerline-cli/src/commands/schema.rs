//! Schema command implementation

use anyhow::{Context, Result};
use ledgerline_core::{schema, topological_order};
use serde_json::{json, Value};

/// Print entity types in dependency order with their references
pub fn cmd_schema(as_json: bool) -> Result<()> {
    let order = topological_order().context("Entity schema is inconsistent")?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&schema_json(order))?);
        return Ok(());
    }

    println!("Entity types in import order (delete runs in reverse):");
    println!();
    for (position, entity_type) in order.iter().enumerate() {
        let entry = schema(*entity_type);
        let delete = if entry.batch_delete { "batch" } else { "single" };
        println!(
            "{:>2}. {:<14} delete: {}",
            position + 1,
            entity_type.endpoint(),
            delete
        );
        for fk in entry.foreign_keys {
            println!(
                "      {} / {} → {}{}",
                fk.id_field,
                fk.readable_field,
                fk.target.endpoint(),
                if fk.optional { " (optional)" } else { "" }
            );
        }
    }

    Ok(())
}

fn schema_json(order: &[ledgerline_core::EntityType]) -> Value {
    let types: Vec<Value> = order
        .iter()
        .map(|entity_type| {
            let entry = schema(*entity_type);
            let references: Vec<Value> = entry
                .foreign_keys
                .iter()
                .map(|fk| {
                    json!({
                        "field": fk.id_field,
                        "readable_field": fk.readable_field,
                        "target": fk.target,
                        "optional": fk.optional,
                    })
                })
                .collect();
            json!({
                "type": entity_type,
                "endpoint": entity_type.endpoint(),
                "references": references,
                "batch_delete": entry.batch_delete,
            })
        })
        .collect();
    json!({ "types": types })
}

//! Entity schema registry
//!
//! Static description of every entity type: the foreign keys it carries, the
//! fields used to display and identify it, and the fields the backend computes
//! itself. The dependency graph induced by the foreign keys drives the
//! creation order of imports and the removal order of deletes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{EntityRecord, EntityType};

/// Fields the backend assigns on every entity; never sent to a create call
pub const SERVER_MANAGED_FIELDS: &[&str] = &["id", "original_id", "created_at", "updated_at"];

/// Field marking a transaction as the posting derived from an investment
pub const INVESTMENT_POSTING_FIELD: &str = "investment_id";

/// Suffix of the companion field carrying a referenced transaction's amount
/// in readable exports
pub const AMOUNT_COMPANION_SUFFIX: &str = "_amount";

/// Creation order observed in the running system. The computed topological
/// order must agree with it.
const CANONICAL_ORDER: [EntityType; 8] = [
    EntityType::Bank,
    EntityType::Account,
    EntityType::Asset,
    EntityType::Category,
    EntityType::RefundGroup,
    EntityType::Transaction,
    EntityType::Investment,
    EntityType::RefundItem,
];

/// A foreign-key field on an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    /// Field holding the numeric id (raw mode), e.g. `bank_id`
    pub id_field: &'static str,
    /// Field holding the display name (readable mode), e.g. `bank`
    pub readable_field: &'static str,
    /// Entity type the key points at
    pub target: EntityType,
    /// Whether the relation may be null
    pub optional: bool,
}

impl ForeignKey {
    const fn new(
        id_field: &'static str,
        readable_field: &'static str,
        target: EntityType,
        optional: bool,
    ) -> Self {
        Self {
            id_field,
            readable_field,
            target,
            optional,
        }
    }

    /// Name of the amount companion emitted next to transaction references
    pub fn amount_companion(&self) -> Option<String> {
        (self.target == EntityType::Transaction)
            .then(|| format!("{}{}", self.readable_field, AMOUNT_COMPANION_SUFFIX))
    }
}

/// Static schema of one entity type
#[derive(Debug, Clone, Copy)]
pub struct EntitySchema {
    pub entity_type: EntityType,
    pub foreign_keys: &'static [ForeignKey],
    /// Fields tried in order when a display name is needed
    pub display_fields: &'static [&'static str],
    /// Fields that together identify a created record as one of our inputs
    pub identity_fields: &'static [&'static str],
    /// Derived fields the backend computes (running balances etc.)
    pub computed_fields: &'static [&'static str],
    /// Whether the backend offers a batch-delete endpoint for this type
    pub batch_delete: bool,
}

const ACCOUNT_FKS: &[ForeignKey] = &[ForeignKey::new("bank_id", "bank", EntityType::Bank, false)];

const TRANSACTION_FKS: &[ForeignKey] = &[
    ForeignKey::new("from_account_id", "from_account", EntityType::Account, true),
    ForeignKey::new("to_account_id", "to_account", EntityType::Account, true),
];

const INVESTMENT_FKS: &[ForeignKey] = &[
    ForeignKey::new("from_account_id", "from_account", EntityType::Account, true),
    ForeignKey::new("to_account_id", "to_account", EntityType::Account, true),
    ForeignKey::new("asset_id", "asset", EntityType::Asset, false),
];

const REFUND_ITEM_FKS: &[ForeignKey] = &[
    ForeignKey::new(
        "income_transaction_id",
        "income_transaction",
        EntityType::Transaction,
        true,
    ),
    ForeignKey::new(
        "expense_transaction_id",
        "expense_transaction",
        EntityType::Transaction,
        false,
    ),
    ForeignKey::new("refund_group_id", "refund_group", EntityType::RefundGroup, true),
];

static SCHEMAS: [EntitySchema; 8] = [
    EntitySchema {
        entity_type: EntityType::Bank,
        foreign_keys: &[],
        display_fields: &["name"],
        identity_fields: &["name"],
        computed_fields: &[],
        batch_delete: true,
    },
    EntitySchema {
        entity_type: EntityType::Account,
        foreign_keys: ACCOUNT_FKS,
        display_fields: &["name"],
        identity_fields: &["name"],
        computed_fields: &["balance"],
        batch_delete: true,
    },
    EntitySchema {
        entity_type: EntityType::Asset,
        foreign_keys: &[],
        display_fields: &["name", "symbol"],
        identity_fields: &["name"],
        computed_fields: &["current_price", "market_value"],
        batch_delete: false,
    },
    EntitySchema {
        entity_type: EntityType::Category,
        foreign_keys: &[],
        display_fields: &["name"],
        identity_fields: &["name"],
        computed_fields: &[],
        batch_delete: false,
    },
    EntitySchema {
        entity_type: EntityType::RefundGroup,
        foreign_keys: &[],
        display_fields: &["name"],
        identity_fields: &["name"],
        computed_fields: &["total_refunded"],
        batch_delete: true,
    },
    EntitySchema {
        entity_type: EntityType::Transaction,
        foreign_keys: TRANSACTION_FKS,
        display_fields: &["description"],
        identity_fields: &["description", "amount", "date"],
        computed_fields: &["from_account_balance", "to_account_balance"],
        batch_delete: true,
    },
    EntitySchema {
        entity_type: EntityType::Investment,
        foreign_keys: INVESTMENT_FKS,
        display_fields: &[],
        identity_fields: &["asset_id", "date", "quantity"],
        computed_fields: &["total_paid"],
        batch_delete: true,
    },
    EntitySchema {
        entity_type: EntityType::RefundItem,
        foreign_keys: REFUND_ITEM_FKS,
        display_fields: &[],
        identity_fields: &["expense_transaction_id", "amount"],
        computed_fields: &[],
        batch_delete: true,
    },
];

/// Get the schema for an entity type
pub fn schema(entity_type: EntityType) -> &'static EntitySchema {
    SCHEMAS
        .iter()
        .find(|s| s.entity_type == entity_type)
        .unwrap_or_else(|| unreachable!("every entity type has a schema"))
}

impl EntitySchema {
    /// Display name of a record: first non-empty display field
    pub fn display_name(&self, record: &EntityRecord) -> Option<String> {
        self.display_fields.iter().find_map(|f| match record.get(*f) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        })
    }

    /// Every name a record can be referenced by in readable mode
    /// (assets are referenced by name or symbol)
    pub fn reference_names(&self, record: &EntityRecord) -> Vec<String> {
        self.display_fields
            .iter()
            .filter_map(|f| match record.get(*f) {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    /// Label used in error messages: display name, else original id, else id
    pub fn record_label(&self, record: &EntityRecord) -> String {
        if let Some(name) = self.display_name(record) {
            return name;
        }
        for key in ["original_id", "id"] {
            if let Some(id) = record.get(key).and_then(Value::as_i64) {
                return format!("#{}", id);
            }
        }
        "<unnamed>".to_string()
    }

    /// Whether a record names its references instead of carrying their ids
    pub fn is_readable_record(&self, record: &EntityRecord) -> bool {
        if self.foreign_keys.is_empty() {
            return record.contains_key("original_id") && !record.contains_key("id");
        }
        self.foreign_keys.iter().any(|fk| {
            record.contains_key(fk.readable_field) && !record.contains_key(fk.id_field)
        })
    }

    /// Remove every field a create call must not receive
    pub fn strip_for_create(&self, record: &mut EntityRecord) {
        for field in SERVER_MANAGED_FIELDS.iter().chain(self.computed_fields) {
            record.remove(*field);
        }
    }
}

/// Directed dependency graph over entity types.
///
/// An edge `A -> B` means records of `A` carry a foreign key to `B`,
/// so `B` must exist first.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// entity -> entities it depends on
    pub dependencies: BTreeMap<EntityType, BTreeSet<EntityType>>,
    /// entity -> entities that depend on it
    pub dependents: BTreeMap<EntityType, BTreeSet<EntityType>>,
}

impl DependencyGraph {
    /// Build the graph from the registered schemas
    pub fn from_schemas() -> Self {
        Self::from_edges(SCHEMAS.iter().flat_map(|s| {
            s.foreign_keys
                .iter()
                .map(move |fk| (s.entity_type, fk.target))
        }))
    }

    /// Build a graph from explicit `(dependent, dependency)` edges
    pub fn from_edges(edges: impl IntoIterator<Item = (EntityType, EntityType)>) -> Self {
        let mut graph = DependencyGraph::default();
        for t in EntityType::all() {
            graph.dependencies.entry(*t).or_default();
            graph.dependents.entry(*t).or_default();
        }
        for (from, to) in edges {
            // Self-references don't constrain ordering between types
            if from == to {
                continue;
            }
            graph.dependencies.entry(from).or_default().insert(to);
            graph.dependents.entry(to).or_default().insert(from);
        }
        graph
    }

    /// Kahn's algorithm. Among the types whose dependencies are all placed,
    /// the earliest-declared one goes next, so the result is deterministic.
    pub fn topological_sort(&self) -> Result<Vec<EntityType>> {
        let mut remaining: BTreeMap<EntityType, usize> = self
            .dependencies
            .iter()
            .map(|(t, deps)| (*t, deps.len()))
            .collect();

        // EntityType orders by declaration
        let mut ready: BTreeSet<EntityType> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(t, _)| *t)
            .collect();

        let mut order = Vec::with_capacity(remaining.len());
        while let Some(t) = ready.pop_first() {
            order.push(t);
            if let Some(dependents) = self.dependents.get(&t) {
                for dependent in dependents {
                    if let Some(count) = remaining.get_mut(dependent) {
                        *count -= 1;
                        if *count == 0 {
                            ready.insert(*dependent);
                        }
                    }
                }
            }
        }

        if order.len() != remaining.len() {
            let stuck: Vec<String> = remaining
                .iter()
                .filter(|(t, _)| !order.contains(t))
                .map(|(t, _)| t.to_string())
                .collect();
            return Err(Error::CyclicDependency(format!(
                "no valid order for {}",
                stuck.join(", ")
            )));
        }

        Ok(order)
    }

    /// Check that `order` places every dependency before its dependents
    pub fn validate_order(&self, order: &[EntityType]) -> Result<()> {
        let position = |t: &EntityType| order.iter().position(|o| o == t);
        for (from, deps) in &self.dependencies {
            for to in deps {
                match (position(from), position(to)) {
                    (Some(a), Some(b)) if b < a => {}
                    (Some(_), Some(_)) => {
                        return Err(Error::CyclicDependency(format!(
                            "{} must precede {}",
                            to, from
                        )))
                    }
                    _ => {
                        return Err(Error::CyclicDependency(format!(
                            "order is missing {} or {}",
                            from, to
                        )))
                    }
                }
            }
        }
        Ok(())
    }
}

fn compute_order() -> Result<Vec<EntityType>> {
    let graph = DependencyGraph::from_schemas();
    let order = graph.topological_sort()?;
    graph.validate_order(&CANONICAL_ORDER)?;
    if order != CANONICAL_ORDER {
        return Err(Error::CyclicDependency(format!(
            "computed order {:?} disagrees with the known creation order",
            order
        )));
    }
    Ok(order)
}

/// Creation order of entity types: every foreign-key target precedes the
/// types that reference it. Computed once.
pub fn topological_order() -> Result<&'static [EntityType]> {
    static ORDER: OnceLock<std::result::Result<Vec<EntityType>, String>> = OnceLock::new();
    match ORDER.get_or_init(|| compute_order().map_err(|e| e.to_string())) {
        Ok(order) => Ok(order.as_slice()),
        Err(msg) => Err(Error::CyclicDependency(msg.clone())),
    }
}

/// Removal order: the reverse of [`topological_order`]
pub fn reverse_order() -> Result<Vec<EntityType>> {
    Ok(topological_order()?.iter().rev().copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> EntityRecord {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_topological_order_matches_canonical() {
        let order = topological_order().unwrap();
        assert_eq!(order, CANONICAL_ORDER.as_slice());
    }

    #[test]
    fn test_every_fk_target_precedes_source() {
        let order = topological_order().unwrap();
        for s in SCHEMAS.iter() {
            let source = order.iter().position(|t| *t == s.entity_type).unwrap();
            for fk in s.foreign_keys {
                let target = order.iter().position(|t| *t == fk.target).unwrap();
                assert!(
                    target < source,
                    "{} must come before {}",
                    fk.target,
                    s.entity_type
                );
            }
        }
    }

    #[test]
    fn test_reverse_order() {
        let rev = reverse_order().unwrap();
        assert_eq!(rev.first(), Some(&EntityType::RefundItem));
        assert_eq!(rev.last(), Some(&EntityType::Bank));
    }

    #[test]
    fn test_cycle_detected() {
        let graph = DependencyGraph::from_edges([
            (EntityType::Account, EntityType::Bank),
            (EntityType::Bank, EntityType::Account),
        ]);
        let err = graph.topological_sort().unwrap_err();
        assert!(matches!(err, Error::CyclicDependency(_)));
        assert!(err.to_string().contains("Bank"));
    }

    #[test]
    fn test_validate_order_rejects_inverted_edge() {
        let graph = DependencyGraph::from_schemas();
        let mut order = CANONICAL_ORDER.to_vec();
        order.swap(0, 1);
        assert!(graph.validate_order(&order).is_err());
        assert!(graph.validate_order(&CANONICAL_ORDER).is_ok());
    }

    #[test]
    fn test_self_reference_ignored() {
        let graph = DependencyGraph::from_edges([(EntityType::Category, EntityType::Category)]);
        assert!(graph.topological_sort().is_ok());
    }

    #[test]
    fn test_display_name_and_asset_symbol() {
        let asset = record(json!({"id": 3, "name": "Vanguard S&P 500", "symbol": "VOO"}));
        let s = schema(EntityType::Asset);
        assert_eq!(s.display_name(&asset).as_deref(), Some("Vanguard S&P 500"));
        assert_eq!(s.reference_names(&asset), vec!["Vanguard S&P 500", "VOO"]);
    }

    #[test]
    fn test_readable_detection() {
        let s = schema(EntityType::Transaction);
        let raw = record(json!({"id": 1, "from_account_id": 7}));
        let readable = record(json!({"original_id": 1, "from_account": "Checking"}));
        assert!(!s.is_readable_record(&raw));
        assert!(s.is_readable_record(&readable));

        let bank = schema(EntityType::Bank);
        assert!(bank.is_readable_record(&record(json!({"original_id": 1, "name": "A"}))));
        assert!(!bank.is_readable_record(&record(json!({"id": 1, "name": "A"}))));
    }

    #[test]
    fn test_strip_for_create() {
        let s = schema(EntityType::Transaction);
        let mut r = record(json!({
            "id": 5,
            "original_id": 5,
            "description": "Coffee",
            "from_account_balance": 100.0,
            "created_at": "2024-01-01"
        }));
        s.strip_for_create(&mut r);
        assert_eq!(r.len(), 1);
        assert!(r.contains_key("description"));
    }

    #[test]
    fn test_amount_companion_only_for_transactions() {
        let fk = schema(EntityType::RefundItem).foreign_keys[1];
        assert_eq!(
            fk.amount_companion().as_deref(),
            Some("expense_transaction_amount")
        );
        let fk = schema(EntityType::Account).foreign_keys[0];
        assert!(fk.amount_companion().is_none());
    }
}

//! In-memory backend
//!
//! Behaves like the REST API closely enough to exercise the engine without a
//! server: sequential ids per type, unique names where the API enforces them,
//! per-item batch results, bank deletion cascading to accounts and their
//! transactions, and a derived posting transaction for every investment.
//! Every call is recorded so tests can assert what the engine sent.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::models::{
    BatchDeleteResponse, BatchFailure, BatchOperationResponse, EntityRecord, EntityType, ListPage,
};
use crate::schema::{schema, INVESTMENT_POSTING_FIELD};

use super::Backend;

/// Entity types whose `name` must be unique
const UNIQUE_NAME_TYPES: &[EntityType] =
    &[EntityType::Bank, EntityType::Asset, EntityType::RefundGroup];

/// A recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    List {
        entity_type: EntityType,
        page_size: usize,
        page: usize,
    },
    BatchCreate {
        entity_type: EntityType,
        items: Vec<EntityRecord>,
    },
    BatchDelete {
        entity_type: EntityType,
        ids: Vec<i64>,
    },
    DeleteOne {
        entity_type: EntityType,
        id: i64,
    },
    Categories,
    ReplaceCategories {
        count: usize,
    },
    WealthOverTime,
}

#[derive(Debug, Default)]
struct MemoryState {
    collections: BTreeMap<EntityType, BTreeMap<i64, EntityRecord>>,
    next_ids: HashMap<EntityType, i64>,
    id_offset: i64,
    categories: Vec<EntityRecord>,
    wealth_over_time: Value,
    calls: Vec<BackendCall>,
    /// display name -> error message returned for items carrying it
    rejections: HashMap<String, String>,
    /// entity types whose listing fails
    broken_listings: HashSet<EntityType>,
    strict_references: bool,
}

impl MemoryState {
    fn allocate_id(&mut self, entity_type: EntityType) -> i64 {
        let offset = self.id_offset;
        let next = self.next_ids.entry(entity_type).or_insert(offset + 1);
        let id = *next;
        *next += 1;
        id
    }

    fn collection(&mut self, entity_type: EntityType) -> &mut BTreeMap<i64, EntityRecord> {
        self.collections.entry(entity_type).or_default()
    }

    fn contains(&self, entity_type: EntityType, id: i64) -> bool {
        self.collections
            .get(&entity_type)
            .is_some_and(|c| c.contains_key(&id))
    }

    fn name_taken(&self, entity_type: EntityType, name: &str) -> bool {
        self.collections.get(&entity_type).is_some_and(|c| {
            c.values()
                .any(|r| r.get("name").and_then(Value::as_str) == Some(name))
        })
    }

    /// Why an item cannot be created, if it can't
    fn rejection(&self, entity_type: EntityType, item: &EntityRecord) -> Option<String> {
        let label = schema(entity_type)
            .display_name(item)
            .or_else(|| item.get("name").and_then(Value::as_str).map(String::from));
        if let Some(label) = &label {
            if let Some(error) = self.rejections.get(label) {
                return Some(error.clone());
            }
            if UNIQUE_NAME_TYPES.contains(&entity_type) && self.name_taken(entity_type, label) {
                return Some("duplicate".to_string());
            }
        }

        for fk in schema(entity_type).foreign_keys {
            match item.get(fk.id_field) {
                Some(Value::Number(n)) if self.strict_references => {
                    let id = n.as_i64().unwrap_or_default();
                    if !self.contains(fk.target, id) {
                        return Some(format!("{} {} does not exist", fk.id_field, id));
                    }
                }
                None | Some(Value::Null) if !fk.optional && self.strict_references => {
                    return Some(format!("{} is required", fk.id_field));
                }
                _ => {}
            }
        }
        None
    }

    fn insert(&mut self, entity_type: EntityType, mut item: EntityRecord) -> EntityRecord {
        let id = self.allocate_id(entity_type);
        item.insert("id".into(), json!(id));
        if entity_type == EntityType::Account {
            item.entry("balance").or_insert(json!(0.0));
        }
        self.collection(entity_type).insert(id, item.clone());

        if entity_type == EntityType::Investment {
            self.insert_posting(id, &item);
        }
        item
    }

    /// The API books a transaction for every investment it creates
    fn insert_posting(&mut self, investment_id: i64, investment: &EntityRecord) {
        let quantity = investment.get("quantity").and_then(Value::as_f64).unwrap_or(0.0);
        let price = investment.get("price").and_then(Value::as_f64).unwrap_or(0.0);
        let mut posting = EntityRecord::new();
        posting.insert("description".into(), json!("Investment"));
        posting.insert("amount".into(), json!(-(quantity * price)));
        for field in ["date", "from_account_id", "to_account_id"] {
            if let Some(v) = investment.get(field) {
                posting.insert(field.into(), v.clone());
            }
        }
        posting.insert(INVESTMENT_POSTING_FIELD.into(), json!(investment_id));
        let id = self.allocate_id(EntityType::Transaction);
        posting.insert("id".into(), json!(id));
        self.collection(EntityType::Transaction).insert(id, posting);
    }

    /// Remove records of `entity_type` whose `field` points at one of `ids`
    fn remove_referencing(
        &mut self,
        entity_type: EntityType,
        fields: &[&str],
        ids: &HashSet<i64>,
    ) -> HashSet<i64> {
        let collection = self.collection(entity_type);
        let doomed: HashSet<i64> = collection
            .iter()
            .filter(|(_, r)| {
                fields.iter().any(|f| {
                    r.get(*f)
                        .and_then(Value::as_i64)
                        .is_some_and(|id| ids.contains(&id))
                })
            })
            .map(|(id, _)| *id)
            .collect();
        collection.retain(|id, _| !doomed.contains(id));
        doomed
    }

    fn remove(&mut self, entity_type: EntityType, id: i64) -> bool {
        if self.collection(entity_type).remove(&id).is_none() {
            return false;
        }
        let removed: HashSet<i64> = [id].into_iter().collect();
        match entity_type {
            EntityType::Bank => {
                let accounts = self.remove_referencing(EntityType::Account, &["bank_id"], &removed);
                self.cascade_accounts(&accounts);
            }
            EntityType::Account => self.cascade_accounts(&removed),
            EntityType::Investment => {
                self.remove_referencing(
                    EntityType::Transaction,
                    &[INVESTMENT_POSTING_FIELD],
                    &removed,
                );
            }
            _ => {}
        }
        true
    }

    fn cascade_accounts(&mut self, accounts: &HashSet<i64>) {
        if accounts.is_empty() {
            return;
        }
        let account_fields = ["from_account_id", "to_account_id"];
        self.remove_referencing(EntityType::Transaction, &account_fields, accounts);
        self.remove_referencing(EntityType::Investment, &account_fields, accounts);
    }
}

/// In-memory backend for tests and local runs
///
/// Cloning shares the underlying store.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Start id allocation above `offset` (ids become `offset + 1`, ...)
    pub fn with_id_offset(self, offset: i64) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.id_offset = offset;
        }
        self
    }

    /// Reject creates whose foreign keys point at missing records
    pub fn with_strict_references(self) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.strict_references = true;
        }
        self
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::transport("memory", None, "store lock poisoned"))
    }

    /// Reject every created item whose display name is `name`
    pub fn reject_named(&self, name: &str, error: &str) {
        if let Ok(mut state) = self.state() {
            state.rejections.insert(name.to_string(), error.to_string());
        }
    }

    /// Make listing calls for `entity_type` fail
    pub fn break_listing(&self, entity_type: EntityType) {
        if let Ok(mut state) = self.state() {
            state.broken_listings.insert(entity_type);
        }
    }

    /// Seed a record directly (not recorded as a call). Returns its id.
    pub fn seed(&self, entity_type: EntityType, record: Value) -> Result<i64> {
        let mut state = self.state()?;
        let record = match record {
            Value::Object(map) => map,
            other => {
                return Err(Error::transport(
                    "memory",
                    None,
                    format!("seed expects an object, got {}", other),
                ))
            }
        };
        let created = state.insert(entity_type, record);
        Ok(created.get("id").and_then(Value::as_i64).unwrap_or_default())
    }

    /// Set the derived wealth time series
    pub fn set_wealth_over_time(&self, series: Value) {
        if let Ok(mut state) = self.state() {
            state.wealth_over_time = series;
        }
    }

    /// Current records of a type, ordered by id
    pub fn records(&self, entity_type: EntityType) -> Vec<EntityRecord> {
        self.state()
            .map(|s| {
                s.collections
                    .get(&entity_type)
                    .map(|c| c.values().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Number of records of a type
    pub fn count(&self, entity_type: EntityType) -> usize {
        self.records(entity_type).len()
    }

    /// Every call made so far
    pub fn calls(&self) -> Vec<BackendCall> {
        self.state().map(|s| s.calls.clone()).unwrap_or_default()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        if let Ok(mut state) = self.state() {
            state.calls.clear();
        }
    }

    /// Item lists of every batch-create call for a type
    pub fn creates_for(&self, entity_type: EntityType) -> Vec<Vec<EntityRecord>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                BackendCall::BatchCreate { entity_type: t, items } if t == entity_type => {
                    Some(items)
                }
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn list(
        &self,
        entity_type: EntityType,
        page_size: usize,
        page: usize,
    ) -> Result<ListPage> {
        let mut state = self.state()?;
        state.calls.push(BackendCall::List {
            entity_type,
            page_size,
            page,
        });
        if state.broken_listings.contains(&entity_type) {
            return Err(Error::transport(
                format!("GET /api/{}", entity_type.endpoint()),
                Some(500),
                "listing unavailable",
            ));
        }

        let collection = state.collection(entity_type);
        let total = collection.len();
        let skip = page.saturating_sub(1).saturating_mul(page_size);
        let items = collection.values().skip(skip).take(page_size).cloned().collect();
        Ok(ListPage { items, total })
    }

    async fn batch_create(
        &self,
        entity_type: EntityType,
        items: Vec<EntityRecord>,
    ) -> Result<BatchOperationResponse> {
        let mut state = self.state()?;
        state.calls.push(BackendCall::BatchCreate {
            entity_type,
            items: items.clone(),
        });

        let mut successful = Vec::new();
        let mut failed = Vec::new();
        for mut item in items {
            item.remove("id");
            match state.rejection(entity_type, &item) {
                Some(error) => failed.push(BatchFailure::for_data(Value::Object(item), error)),
                None => successful.push(state.insert(entity_type, item)),
            }
        }
        Ok(BatchOperationResponse::new(successful, failed))
    }

    async fn batch_delete(
        &self,
        entity_type: EntityType,
        ids: &[i64],
    ) -> Result<BatchDeleteResponse> {
        let mut state = self.state()?;
        state.calls.push(BackendCall::BatchDelete {
            entity_type,
            ids: ids.to_vec(),
        });

        let mut successful = Vec::new();
        let mut failed = Vec::new();
        for id in ids {
            if state.remove(entity_type, *id) {
                successful.push(*id);
            } else {
                failed.push(BatchFailure::for_id(*id, "not found"));
            }
        }
        Ok(BatchDeleteResponse::new(successful, failed))
    }

    async fn delete_one(&self, entity_type: EntityType, id: i64) -> Result<()> {
        let mut state = self.state()?;
        state.calls.push(BackendCall::DeleteOne { entity_type, id });
        if state.remove(entity_type, id) {
            Ok(())
        } else {
            Err(Error::transport(
                format!("DELETE /api/{}/{}", entity_type.endpoint(), id),
                Some(404),
                "not found",
            ))
        }
    }

    async fn categories(&self) -> Result<Vec<EntityRecord>> {
        let mut state = self.state()?;
        state.calls.push(BackendCall::Categories);
        if state.broken_listings.contains(&EntityType::Category) {
            return Err(Error::transport("GET /api/categories", Some(500), "unavailable"));
        }
        Ok(state.categories.clone())
    }

    async fn replace_categories(
        &self,
        categories: Vec<EntityRecord>,
    ) -> Result<Vec<EntityRecord>> {
        let mut state = self.state()?;
        state.calls.push(BackendCall::ReplaceCategories {
            count: categories.len(),
        });
        state.categories = categories;
        Ok(state.categories.clone())
    }

    async fn wealth_over_time(&self) -> Result<Value> {
        let mut state = self.state()?;
        state.calls.push(BackendCall::WealthOverTime);
        Ok(state.wealth_over_time.clone())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

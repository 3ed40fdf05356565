//! Domain models for Ledgerline

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single entity as exchanged with the backend and stored in snapshots.
///
/// Records are kept schemaless: the engine only interprets the fields named
/// in the schema registry and passes everything else through untouched.
pub type EntityRecord = Map<String, Value>;

/// The entity types that take part in export/import/delete runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Bank,
    Account,
    Asset,
    Category,
    RefundGroup,
    Transaction,
    Investment,
    RefundItem,
}

impl EntityType {
    /// Stable endpoint name used in API routes and snapshot documents
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Bank => "banks",
            Self::Account => "accounts",
            Self::Asset => "assets",
            Self::Category => "categories",
            Self::RefundGroup => "refund_groups",
            Self::Transaction => "transactions",
            Self::Investment => "investments",
            Self::RefundItem => "refund_items",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bank => "Bank",
            Self::Account => "Account",
            Self::Asset => "Asset",
            Self::Category => "Category",
            Self::RefundGroup => "RefundGroup",
            Self::Transaction => "Transaction",
            Self::Investment => "Investment",
            Self::RefundItem => "RefundItem",
        }
    }

    /// Get all entity types in declaration order
    pub fn all() -> &'static [EntityType] {
        &[
            Self::Bank,
            Self::Account,
            Self::Asset,
            Self::Category,
            Self::RefundGroup,
            Self::Transaction,
            Self::Investment,
            Self::RefundItem,
        ]
    }

    /// Look up an entity type by its endpoint name
    pub fn from_endpoint(endpoint: &str) -> Option<Self> {
        Self::all().iter().copied().find(|t| t.endpoint() == endpoint)
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        if let Some(t) = Self::from_endpoint(&normalized) {
            return Ok(t);
        }
        match normalized.as_str() {
            "bank" => Ok(Self::Bank),
            "account" => Ok(Self::Account),
            "asset" => Ok(Self::Asset),
            "category" => Ok(Self::Category),
            "refund_group" | "refundgroup" => Ok(Self::RefundGroup),
            "transaction" => Ok(Self::Transaction),
            "investment" => Ok(Self::Investment),
            "refund_item" | "refunditem" => Ok(Self::RefundItem),
            _ => Err(format!("Unknown entity type: {}", s)),
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One page of a listing call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListPage {
    pub items: Vec<EntityRecord>,
    pub total: usize,
}

/// A rejected item in a batch operation.
///
/// Create failures echo the submitted data, delete failures the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub error: String,
}

impl BatchFailure {
    pub fn for_data(data: Value, error: impl Into<String>) -> Self {
        Self {
            data: Some(data),
            id: None,
            error: error.into(),
        }
    }

    pub fn for_id(id: i64, error: impl Into<String>) -> Self {
        Self {
            data: None,
            id: Some(id),
            error: error.into(),
        }
    }

    /// Human-readable label for the failed item (name, description, or id)
    pub fn label(&self) -> String {
        if let Some(Value::Object(data)) = &self.data {
            for key in ["name", "description", "symbol"] {
                if let Some(Value::String(s)) = data.get(key) {
                    return s.clone();
                }
            }
        }
        match (self.id, &self.data) {
            (Some(id), _) => format!("#{}", id),
            (None, Some(data)) => data.to_string(),
            (None, None) => "<unknown>".to_string(),
        }
    }
}

/// Response of a batch-create call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOperationResponse {
    pub successful: Vec<EntityRecord>,
    #[serde(default)]
    pub failed: Vec<BatchFailure>,
    #[serde(default)]
    pub total_successful: usize,
    #[serde(default)]
    pub total_failed: usize,
}

impl BatchOperationResponse {
    pub fn new(successful: Vec<EntityRecord>, failed: Vec<BatchFailure>) -> Self {
        Self {
            total_successful: successful.len(),
            total_failed: failed.len(),
            successful,
            failed,
        }
    }
}

/// Response of a batch-delete call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchDeleteResponse {
    pub successful: Vec<i64>,
    #[serde(default)]
    pub failed: Vec<BatchFailure>,
    #[serde(default)]
    pub total_successful: usize,
    #[serde(default)]
    pub total_failed: usize,
}

impl BatchDeleteResponse {
    pub fn new(successful: Vec<i64>, failed: Vec<BatchFailure>) -> Self {
        Self {
            total_successful: successful.len(),
            total_failed: failed.len(),
            successful,
            failed,
        }
    }
}

/// Read the numeric `id` of a record, if present
pub fn record_id(record: &EntityRecord) -> Option<i64> {
    record.get("id").and_then(Value::as_i64)
}

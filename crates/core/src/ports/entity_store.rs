//! Entity store port.
//!
//! Handlers and the query surface see entities as JSON objects keyed by a
//! string `id`; the PostgreSQL adapter maps them onto the tables the
//! schema compiler generated.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageResult;

/// Comparison operator in an entity filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// Exact equality.
    Eq,
    /// Membership in a list (`value` must be a JSON array).
    In,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// One filter clause; clauses combine with AND.
#[derive(Debug, Clone)]
pub struct EntityFilter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

/// A multi-row entity lookup.
#[derive(Debug, Clone)]
pub struct EntityQuery {
    pub filters: Vec<EntityFilter>,
    /// Page size.
    pub first: u64,
    /// Rows to skip before the page.
    pub skip: u64,
    /// Column to order by.
    pub order_by: String,
    pub descending: bool,
}

/// CRUD over compiled entity tables.
///
/// `entity` is always the entity type name as declared in the schema
/// (e.g. `"Proposal"`); adapters resolve it to a table through the
/// compiled schema and reject names the schema does not declare.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Single row by id.
    async fn get(&self, entity: &str, id: &str) -> StorageResult<Option<Value>>;

    /// Inserts a row, replacing any existing row with the same id.
    async fn upsert(&self, entity: &str, row: &Value) -> StorageResult<()>;

    /// Inserts a row only if the id is not already present.
    async fn insert_ignore(&self, entity: &str, row: &Value) -> StorageResult<()>;

    /// Patches the given fields of an existing row.
    async fn update_fields(&self, entity: &str, id: &str, fields: &Value) -> StorageResult<()>;

    /// Filtered, paged lookup.
    async fn query(&self, entity: &str, query: &EntityQuery) -> StorageResult<Vec<Value>>;
}

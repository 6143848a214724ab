//! Key-value store seam for Kingsroom: the store trait, an in-memory emulation
//! with secondary indexes, index fallback, table naming and retries.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub mod index;
pub mod memory;
pub mod retry;
pub mod tables;

pub use index::IndexResolver;
pub use memory::{IndexSchema, MemoryStore, TableSchema};
pub use retry::{BackoffPolicy, RetryingStore};
pub use tables::{Model, TableNames};

pub const CRATE_NAME: &str = "kr-storage";

/// Every table is keyed by this attribute.
pub const KEY_ATTR: &str = "id";

pub type Item = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conditional check failed for {table}/{key}")]
    ConditionFailed { table: String, key: String },
    #[error("index {index} is not available on {table}")]
    IndexUnavailable { table: String, index: String },
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("request throttled on {0}")]
    Throttled(String),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_condition_failed(&self) -> bool {
        matches!(self, Self::ConditionFailed { .. })
    }

    pub fn is_index_unavailable(&self) -> bool {
        matches!(self, Self::IndexUnavailable { .. })
    }

    /// Throttling is the only transient failure; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled(_))
    }
}

/// Key condition on the sort attribute of a table or index.
#[derive(Debug, Clone, PartialEq)]
pub enum SortCondition {
    Eq(Value),
    Between(Value, Value),
    BeginsWith(String),
    Ge(Value),
    Le(Value),
}

/// Post-key filter; all filters of a request must hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Ne(String, Value),
    Between(String, Value, Value),
    In(String, Vec<Value>),
    Exists(String),
    NotExists(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub table: String,
    pub index: Option<String>,
    pub partition: Value,
    pub sort: Option<SortCondition>,
    pub filters: Vec<Filter>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
    pub scan_forward: bool,
}

impl QueryRequest {
    pub fn new(table: impl Into<String>, partition: impl Into<Value>) -> Self {
        Self {
            table: table.into(),
            index: None,
            partition: partition.into(),
            sort: None,
            filters: Vec::new(),
            limit: None,
            cursor: None,
            scan_forward: true,
        }
    }

    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn sort(mut self, condition: SortCondition) -> Self {
        self.sort = Some(condition);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn descending(mut self) -> Self {
        self.scan_forward = false;
        self
    }

    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPage {
    pub items: Vec<Item>,
    pub cursor: Option<String>,
}

impl QueryPage {
    pub fn empty() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    AttributeExists(String),
    AttributeNotExists(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    pub table: String,
    pub key: String,
    pub set: Item,
    pub remove: Vec<String>,
    pub increment: Vec<(String, i64)>,
    pub condition: Option<Condition>,
}

impl UpdateRequest {
    pub fn new(table: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
            set: Item::new(),
            remove: Vec::new(),
            increment: Vec::new(),
            condition: None,
        }
    }

    pub fn set(mut self, attr: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(attr.into(), value.into());
        self
    }

    pub fn remove(mut self, attr: impl Into<String>) -> Self {
        self.remove.push(attr.into());
        self
    }

    pub fn increment(mut self, attr: impl Into<String>, by: i64) -> Self {
        self.increment.push((attr.into(), by));
        self
    }

    pub fn require_exists(mut self) -> Self {
        self.condition = Some(Condition::AttributeExists(KEY_ATTR.to_string()));
        self
    }

    pub fn require_absent(mut self) -> Self {
        self.condition = Some(Condition::AttributeNotExists(KEY_ATTR.to_string()));
        self
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, table: &str, key: &str) -> Result<Option<Item>, StoreError>;

    async fn query(&self, request: &QueryRequest) -> Result<QueryPage, StoreError>;

    async fn put(&self, table: &str, item: Item) -> Result<(), StoreError>;

    /// Applies the update and returns the item as stored afterwards.
    async fn update(&self, request: &UpdateRequest) -> Result<Item, StoreError>;

    /// Returns the removed item, if any.
    async fn delete(&self, table: &str, key: &str) -> Result<Option<Item>, StoreError>;
}

/// Follows cursors until the query is exhausted.
pub async fn query_all<S>(store: &S, request: &QueryRequest) -> Result<Vec<Item>, StoreError>
where
    S: KeyValueStore + ?Sized,
{
    let mut items = Vec::new();
    let mut request = request.clone();
    loop {
        let page = store.query(&request).await?;
        items.extend(page.items);
        match page.cursor {
            Some(cursor) => request.cursor = Some(cursor),
            None => return Ok(items),
        }
    }
}

pub fn from_item<T: DeserializeOwned>(item: Item) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(item))?)
}

/// Serializes a record into a flat attribute map, dropping nulls.
pub fn to_item<T: Serialize>(record: &T) -> Result<Item, StoreError> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map.into_iter().filter(|(_, v)| !v.is_null()).collect()),
        other => Err(StoreError::InvalidQuery(format!(
            "records must serialize to objects, got {other}"
        ))),
    }
}

pub fn item_str<'a>(item: &'a Item, attr: &str) -> Option<&'a str> {
    item.get(attr).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn to_item_drops_nulls() {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Row {
            id: String,
            venue_name: Option<String>,
        }
        let item = to_item(&Row {
            id: "G1".into(),
            venue_name: None,
        })
        .unwrap();
        assert_eq!(Value::Object(item), json!({ "id": "G1" }));
    }

    #[test]
    fn update_builder_sets_existence_condition() {
        let request = UpdateRequest::new("Game", "G1")
            .set("isStatusDataStale", true)
            .require_exists();
        assert_eq!(
            request.condition,
            Some(Condition::AttributeExists("id".into()))
        );
        assert_eq!(request.set.get("isStatusDataStale"), Some(&json!(true)));
    }
}

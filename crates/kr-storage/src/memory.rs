//! In-memory store emulating the hosted key-value service: sparse secondary
//! indexes, typed sort-key comparison, conditional updates and offset cursors.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::index::names;
use crate::tables::{Model, TableNames};
use crate::{
    Condition, Filter, Item, KeyValueStore, QueryPage, QueryRequest, SortCondition, StoreError,
    UpdateRequest, KEY_ATTR,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    pub name: String,
    pub partition: String,
    pub sort: Option<String>,
}

impl IndexSchema {
    pub fn new(name: &str, partition: &str, sort: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            partition: partition.to_string(),
            sort: sort.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub indexes: Vec<IndexSchema>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexes: Vec::new(),
        }
    }

    pub fn index(mut self, name: &str, partition: &str, sort: Option<&str>) -> Self {
        self.indexes.push(IndexSchema::new(name, partition, sort));
        self
    }

    /// Index layout of the deployed tables for a model.
    pub fn for_model(model: Model, table: impl Into<String>) -> Self {
        let schema = Self::new(table);
        match model {
            Model::SocialPostGameData => schema
                .index(names::BY_TOURNAMENT_ID, "extractedTournamentId", None)
                .index(names::BY_SOCIAL_POST, "socialPostId", None),
            Model::SocialPost => schema
                .index(names::BY_POST_MONTH, "postYearMonth", Some("postedAt"))
                .index(names::BY_SOCIAL_ACCOUNT_POST, "socialAccountId", Some("postedAt"))
                .index(names::BY_PROCESSING_STATUS, "processingStatus", Some("postedAt")),
            Model::SocialAccount => schema.index(names::BY_VENUE, "venueId", None),
            Model::SocialPostGameLink => schema
                .index(names::BY_GAME, "gameId", None)
                .index(names::BY_SOCIAL_POST, "socialPostId", None),
            Model::RecurringGame => schema.index(
                names::BY_VENUE_RECURRING_GAME,
                "venueId",
                Some(kr_core::RecurringGame::COMPOSITE_KEY_ATTR),
            ),
            Model::ActiveGame => schema.index(names::BY_GAME_ID_ACTIVE, "gameId", None),
            Model::UpcomingGame => schema.index(names::BY_GAME_ID_UPCOMING, "gameId", None),
            Model::RecentlyFinishedGame => {
                schema.index(names::BY_GAME_ID_RECENTLY_FINISHED, "gameId", None)
            }
            Model::GameFinancialSnapshot => schema.index(names::BY_GAME, "gameId", None),
            Model::Game | Model::Venue | Model::Entity => schema,
        }
    }
}

#[derive(Debug)]
struct Table {
    schema: TableSchema,
    rows: BTreeMap<String, Item>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store with every model's table registered under `names`.
    pub fn for_tables(names: &TableNames) -> Self {
        Model::ALL.into_iter().fold(Self::new(), |store, model| {
            store.with_table(TableSchema::for_model(model, names.table(model)))
        })
    }

    pub fn with_table(mut self, schema: TableSchema) -> Self {
        self.tables.get_mut().insert(
            schema.name.clone(),
            Table {
                schema,
                rows: BTreeMap::new(),
            },
        );
        self
    }

    /// Drops an index definition so queries against it fail as unavailable.
    pub fn without_index(mut self, table: &str, index: &str) -> Self {
        if let Some(t) = self.tables.get_mut().get_mut(table) {
            t.schema.indexes.retain(|i| i.name != index);
        }
        self
    }

    /// Loads a seed document keyed by model name, e.g. `{"Game": [...]}`.
    pub async fn load_seed(&self, names: &TableNames, doc: &Value) -> Result<usize, StoreError> {
        let Some(models) = doc.as_object() else {
            return Err(StoreError::InvalidQuery(
                "seed document must be an object keyed by model".into(),
            ));
        };
        let mut loaded = 0;
        for (model_name, rows) in models {
            let Some(model) = Model::from_name(model_name) else {
                warn!(model = %model_name, "skipping unknown model in seed");
                continue;
            };
            let table = names.table(model);
            for row in rows.as_array().into_iter().flatten() {
                let Some(item) = row.as_object() else {
                    return Err(StoreError::InvalidQuery(format!(
                        "seed rows for {model_name} must be objects"
                    )));
                };
                self.put(&table, item.clone()).await?;
                loaded += 1;
            }
        }
        debug!(loaded, "seed loaded");
        Ok(loaded)
    }

    pub async fn load_seed_file(&self, names: &TableNames, path: &Path) -> anyhow::Result<usize> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading seed file {}", path.display()))?;
        let doc: Value = serde_json::from_str(&raw)
            .with_context(|| format!("parsing seed file {}", path.display()))?;
        self.load_seed(names, &doc)
            .await
            .with_context(|| format!("loading seed file {}", path.display()))
    }

    /// All rows of a table ordered by key.
    pub async fn items(&self, table: &str) -> Vec<Item> {
        self.tables
            .read()
            .await
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }
}

fn unknown_table(table: &str) -> StoreError {
    StoreError::Backend(format!("table {table} does not exist"))
}

fn as_instant(raw: &str) -> Option<DateTime<chrono::FixedOffset>> {
    DateTime::parse_from_rfc3339(raw).ok()
}

/// Orders numbers numerically, RFC 3339 strings as instants and other
/// strings lexically. Mixed kinds are incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => match (as_instant(x), as_instant(y)) {
            (Some(p), Some(q)) => Some(p.cmp(&q)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) | (Value::String(_), Value::String(_)) => {
            compare_values(a, b) == Some(Ordering::Equal)
        }
        _ => a == b,
    }
}

fn between(value: &Value, low: &Value, high: &Value) -> bool {
    matches!(
        compare_values(value, low),
        Some(Ordering::Greater | Ordering::Equal)
    ) && matches!(
        compare_values(value, high),
        Some(Ordering::Less | Ordering::Equal)
    )
}

fn sort_matches(value: &Value, condition: &SortCondition) -> bool {
    match condition {
        SortCondition::Eq(v) => values_equal(value, v),
        SortCondition::Between(low, high) => between(value, low, high),
        SortCondition::BeginsWith(prefix) => value.as_str().is_some_and(|s| s.starts_with(prefix)),
        SortCondition::Ge(v) => matches!(
            compare_values(value, v),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        SortCondition::Le(v) => matches!(
            compare_values(value, v),
            Some(Ordering::Less | Ordering::Equal)
        ),
    }
}

fn present<'a>(item: &'a Item, attr: &str) -> Option<&'a Value> {
    item.get(attr).filter(|v| !v.is_null())
}

fn filter_matches(item: &Item, filter: &Filter) -> bool {
    match filter {
        Filter::Eq(attr, v) => present(item, attr).is_some_and(|x| values_equal(x, v)),
        Filter::Ne(attr, v) => !present(item, attr).is_some_and(|x| values_equal(x, v)),
        Filter::Between(attr, low, high) => {
            present(item, attr).is_some_and(|x| between(x, low, high))
        }
        Filter::In(attr, options) => {
            present(item, attr).is_some_and(|x| options.iter().any(|o| values_equal(x, o)))
        }
        Filter::Exists(attr) => present(item, attr).is_some(),
        Filter::NotExists(attr) => present(item, attr).is_none(),
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, table: &str, key: &str) -> Result<Option<Item>, StoreError> {
        let tables = self.tables.read().await;
        let t = tables.get(table).ok_or_else(|| unknown_table(table))?;
        Ok(t.rows.get(key).cloned())
    }

    async fn query(&self, request: &QueryRequest) -> Result<QueryPage, StoreError> {
        let tables = self.tables.read().await;
        let table = tables
            .get(&request.table)
            .ok_or_else(|| unknown_table(&request.table))?;

        let (partition_attr, sort_attr) = match &request.index {
            Some(name) => {
                let index = table
                    .schema
                    .indexes
                    .iter()
                    .find(|i| &i.name == name)
                    .ok_or_else(|| StoreError::IndexUnavailable {
                        table: request.table.clone(),
                        index: name.clone(),
                    })?;
                (index.partition.as_str(), index.sort.as_deref())
            }
            None => (KEY_ATTR, None),
        };
        if request.sort.is_some() && sort_attr.is_none() {
            return Err(StoreError::InvalidQuery(format!(
                "{} has no sort key",
                request.index.as_deref().unwrap_or(&request.table)
            )));
        }

        let mut matched: Vec<&Item> = table
            .rows
            .values()
            .filter(|item| {
                present(item, partition_attr).is_some_and(|v| values_equal(v, &request.partition))
            })
            .filter(|item| match sort_attr {
                // Sparse index: rows without the sort attribute are not projected.
                Some(attr) => match (present(item, attr), &request.sort) {
                    (Some(value), Some(condition)) => sort_matches(value, condition),
                    (Some(_), None) => true,
                    (None, _) => false,
                },
                None => true,
            })
            .collect();

        if let Some(attr) = sort_attr {
            matched.sort_by(|a, b| match (a.get(attr), b.get(attr)) {
                (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            });
        }
        if !request.scan_forward {
            matched.reverse();
        }

        let offset = match &request.cursor {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| StoreError::InvalidQuery(format!("bad cursor {raw}")))?,
            None => 0,
        };
        let remaining = matched.len().saturating_sub(offset);
        let take = request.limit.unwrap_or(remaining).min(remaining);
        let next = offset + take;

        let items = matched
            .into_iter()
            .skip(offset)
            .take(take)
            .filter(|item| request.filters.iter().all(|f| filter_matches(item, f)))
            .cloned()
            .collect();
        let cursor = (next < offset + remaining).then(|| next.to_string());
        Ok(QueryPage { items, cursor })
    }

    async fn put(&self, table: &str, item: Item) -> Result<(), StoreError> {
        let Some(key) = item.get(KEY_ATTR).and_then(Value::as_str).map(str::to_string) else {
            return Err(StoreError::InvalidQuery(format!(
                "item for {table} is missing a string {KEY_ATTR}"
            )));
        };
        let mut tables = self.tables.write().await;
        let t = tables.get_mut(table).ok_or_else(|| unknown_table(table))?;
        t.rows.insert(key, item);
        Ok(())
    }

    async fn update(&self, request: &UpdateRequest) -> Result<Item, StoreError> {
        let mut tables = self.tables.write().await;
        let t = tables
            .get_mut(&request.table)
            .ok_or_else(|| unknown_table(&request.table))?;

        let has_attr = |attr: &str| {
            t.rows
                .get(&request.key)
                .is_some_and(|item| item.contains_key(attr))
        };
        let satisfied = match &request.condition {
            Some(Condition::AttributeExists(attr)) => has_attr(attr),
            Some(Condition::AttributeNotExists(attr)) => !has_attr(attr),
            None => true,
        };
        if !satisfied {
            return Err(StoreError::ConditionFailed {
                table: request.table.clone(),
                key: request.key.clone(),
            });
        }

        let item = t.rows.entry(request.key.clone()).or_insert_with(|| {
            let mut fresh = Item::new();
            fresh.insert(KEY_ATTR.to_string(), Value::String(request.key.clone()));
            fresh
        });
        for (attr, value) in &request.set {
            item.insert(attr.clone(), value.clone());
        }
        for attr in &request.remove {
            item.remove(attr);
        }
        for (attr, by) in &request.increment {
            let current = item.get(attr).and_then(Value::as_i64).unwrap_or(0);
            item.insert(attr.clone(), Value::from(current + by));
        }
        Ok(item.clone())
    }

    async fn delete(&self, table: &str, key: &str) -> Result<Option<Item>, StoreError> {
        let mut tables = self.tables.write().await;
        let t = tables.get_mut(table).ok_or_else(|| unknown_table(table))?;
        Ok(t.rows.remove(key))
    }
}

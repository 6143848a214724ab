//! Secondary-index fallback. Deployed tables have carried a few physical
//! names for the same logical index; the resolver probes them once per
//! invocation and remembers the answer.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{Item, KeyValueStore, QueryPage, QueryRequest, StoreError};

pub mod names {
    pub const BY_TOURNAMENT_ID: &str = "byTournamentId";
    pub const BY_SOCIAL_POST: &str = "bySocialPost";
    pub const BY_POST_MONTH: &str = "byPostMonth";
    pub const BY_SOCIAL_ACCOUNT_POST: &str = "bySocialAccountPost";
    pub const BY_PROCESSING_STATUS: &str = "byProcessingStatus";
    pub const BY_VENUE: &str = "byVenue";
    pub const BY_GAME: &str = "byGame";
    pub const BY_VENUE_RECURRING_GAME: &str = "byVenueRecurringGame";
    pub const BY_GAME_ID_ACTIVE: &str = "byGameIdActive";
    pub const BY_GAME_ID_UPCOMING: &str = "byGameIdUpcoming";
    pub const BY_GAME_ID_RECENTLY_FINISHED: &str = "byGameIdRecentlyFinished";
}

const PROBE_PARTITION: &str = "__index_probe__";

/// Physical names to try for a logical index, in order.
pub fn candidate_names(logical: &str) -> Vec<String> {
    let alias = match logical {
        names::BY_TOURNAMENT_ID => Some("byExtractedTournamentId"),
        names::BY_POST_MONTH => Some("byPostYearMonth"),
        names::BY_SOCIAL_ACCOUNT_POST => Some("bySocialAccount"),
        names::BY_VENUE_RECURRING_GAME => Some("byVenueRecurring"),
        names::BY_GAME_ID_ACTIVE | names::BY_GAME_ID_UPCOMING | names::BY_GAME_ID_RECENTLY_FINISHED => {
            Some("byGameId")
        }
        _ => None,
    };
    let mut out = vec![logical.to_string()];
    out.extend(alias.map(str::to_string));
    out.push(format!("{logical}Index"));
    out
}

/// Per-invocation cache of which physical index answers a logical one.
/// `None` entries mark a logical index with no usable physical name.
#[derive(Debug, Default)]
pub struct IndexResolver {
    resolved: Mutex<HashMap<(String, String), Option<String>>>,
}

impl IndexResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn resolve<S>(
        &self,
        store: &S,
        table: &str,
        logical: &str,
    ) -> Result<Option<String>, StoreError>
    where
        S: KeyValueStore + ?Sized,
    {
        let cache_key = (table.to_string(), logical.to_string());
        if let Some(hit) = self.resolved.lock().await.get(&cache_key) {
            return Ok(hit.clone());
        }

        let mut found = None;
        for name in candidate_names(logical) {
            let probe = QueryRequest::new(table, PROBE_PARTITION).index(&name).limit(1);
            match store.query(&probe).await {
                Ok(_) => {
                    found = Some(name);
                    break;
                }
                Err(err) if err.is_index_unavailable() => continue,
                Err(err) => return Err(err),
            }
        }

        match &found {
            Some(name) => debug!(table, logical, physical = %name, "index resolved"),
            None => warn!(table, logical, "no usable index; queries will return empty"),
        }
        self.resolved.lock().await.insert(cache_key, found.clone());
        Ok(found)
    }

    pub async fn is_available<S>(&self, store: &S, table: &str, logical: &str) -> Result<bool, StoreError>
    where
        S: KeyValueStore + ?Sized,
    {
        Ok(self.resolve(store, table, logical).await?.is_some())
    }

    /// Runs a query whose `index` names a logical index. An unusable index
    /// yields an empty page.
    pub async fn query<S>(&self, store: &S, request: &QueryRequest) -> Result<QueryPage, StoreError>
    where
        S: KeyValueStore + ?Sized,
    {
        let Some(logical) = &request.index else {
            return store.query(request).await;
        };
        match self.resolve(store, &request.table, logical).await? {
            Some(physical) => {
                let mut physical_request = request.clone();
                physical_request.index = Some(physical);
                store.query(&physical_request).await
            }
            None => Ok(QueryPage::empty()),
        }
    }

    pub async fn query_all<S>(&self, store: &S, request: &QueryRequest) -> Result<Vec<Item>, StoreError>
    where
        S: KeyValueStore + ?Sized,
    {
        let mut items = Vec::new();
        let mut request = request.clone();
        loop {
            let page = self.query(store, &request).await?;
            items.extend(page.items);
            match page.cursor {
                Some(cursor) => request.cursor = Some(cursor),
                None => return Ok(items),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryStore, TableSchema};
    use serde_json::json;

    #[tokio::test]
    async fn falls_back_to_alias_name() {
        let store = MemoryStore::new().with_table(
            TableSchema::new("posts").index("byPostYearMonth", "postYearMonth", Some("postedAt")),
        );
        store
            .put(
                "posts",
                json!({"id": "P1", "postYearMonth": "2024-06", "postedAt": "2024-06-02T00:00:00Z"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            )
            .await
            .unwrap();

        let resolver = IndexResolver::new();
        let items = resolver
            .query_all(&store, &QueryRequest::new("posts", "2024-06").index(names::BY_POST_MONTH))
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(
            resolver.resolve(&store, "posts", names::BY_POST_MONTH).await.unwrap(),
            Some("byPostYearMonth".to_string())
        );
    }

    #[tokio::test]
    async fn missing_index_caches_sentinel_and_returns_empty() {
        let store = MemoryStore::new().with_table(TableSchema::new("posts"));
        let resolver = IndexResolver::new();
        let page = resolver
            .query(&store, &QueryRequest::new("posts", "2024-06").index(names::BY_POST_MONTH))
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert!(!resolver.is_available(&store, "posts", names::BY_POST_MONTH).await.unwrap());
    }

    #[tokio::test]
    async fn resolvers_do_not_share_state() {
        let store = MemoryStore::new().with_table(TableSchema::new("posts"));
        let first = IndexResolver::new();
        assert!(!first.is_available(&store, "posts", names::BY_POST_MONTH).await.unwrap());

        let store = store.with_table(
            TableSchema::new("posts").index(names::BY_POST_MONTH, "postYearMonth", Some("postedAt")),
        );
        let second = IndexResolver::new();
        assert!(second.is_available(&store, "posts", names::BY_POST_MONTH).await.unwrap());
    }
}

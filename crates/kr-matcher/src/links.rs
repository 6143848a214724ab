//! Link lifecycle: idempotent creation, mention order, primary election and
//! the post status update that follows a new link.

use chrono::{DateTime, Utc};
use kr_core::{Game, LinkType, ProcessingStatus, SocialPostGameLink};
use kr_storage::index::names;
use kr_storage::{
    from_item, to_item, IndexResolver, KeyValueStore, Model, QueryRequest, StoreError, TableNames,
    UpdateRequest,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const AUTO_LINKER: &str = "SYSTEM_AUTO_MATCHER";

/// Deterministic id for the (post, game) pair, so repeated writes land on one row.
pub fn link_id(social_post_id: &str, game_id: &str) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("kingsroom:social-post-game-link:{social_post_id}#{game_id}").as_bytes(),
    )
    .to_string()
}

/// Everything a new link records about the candidate that produced it.
#[derive(Debug, Clone)]
pub struct LinkDraft {
    pub social_post_id: String,
    pub confidence: f64,
    pub match_reason: kr_core::MatchReason,
    pub match_signals: Value,
    pub extracted_snapshot: Value,
    pub reconciliation_preview: Option<Value>,
    pub has_ticket_data: bool,
    pub has_reconciliation_discrepancy: bool,
    pub reconciliation_discrepancy_severity: Option<kr_core::DiscrepancySeverity>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status", rename_all_fields = "camelCase")]
pub enum LinkOutcome {
    #[serde(rename = "CREATED")]
    Created {
        link_id: String,
        is_primary_game: bool,
        mention_order: i64,
    },
    #[serde(rename = "SKIPPED")]
    Skipped { link_id: String, reason: String },
}

pub struct LinkWriter<'a> {
    store: &'a dyn KeyValueStore,
    tables: &'a TableNames,
    indexes: &'a IndexResolver,
    now: DateTime<Utc>,
}

impl<'a> LinkWriter<'a> {
    pub fn new(
        store: &'a dyn KeyValueStore,
        tables: &'a TableNames,
        indexes: &'a IndexResolver,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            store,
            tables,
            indexes,
            now,
        }
    }

    async fn links_by(&self, index: &str, partition: &str) -> Result<Vec<SocialPostGameLink>, StoreError> {
        let items = self
            .indexes
            .query_all(
                self.store,
                &QueryRequest::new(self.tables.table(Model::SocialPostGameLink), partition).index(index),
            )
            .await?;
        items.into_iter().map(from_item).collect()
    }

    pub async fn links_for_game(&self, game_id: &str) -> Result<Vec<SocialPostGameLink>, StoreError> {
        self.links_by(names::BY_GAME, game_id).await
    }

    pub async fn links_for_post(&self, social_post_id: &str) -> Result<Vec<SocialPostGameLink>, StoreError> {
        self.links_by(names::BY_SOCIAL_POST, social_post_id).await
    }

    /// Creates the link unless the pair already has one, rejected or not.
    pub async fn create(&self, game: &Game, draft: &LinkDraft) -> Result<LinkOutcome, StoreError> {
        let id = link_id(&draft.social_post_id, &game.id);
        let existing = self.links_for_post(&draft.social_post_id).await?;

        if let Some(prior) = existing.iter().find(|l| l.game_id == game.id) {
            let reason = if prior.is_rejected() {
                "link previously rejected"
            } else {
                "already linked"
            };
            debug!(social_post_id = %draft.social_post_id, game_id = %game.id, reason, "link skipped");
            return Ok(LinkOutcome::Skipped {
                link_id: prior.id.clone(),
                reason: reason.to_string(),
            });
        }

        let active: Vec<&SocialPostGameLink> = existing.iter().filter(|l| !l.is_rejected()).collect();
        let mention_order = active.len() as i64 + 1;
        let current_primary = active.iter().find(|l| l.is_primary_game).copied();
        let is_primary_game = current_primary.map_or(true, |p| draft.confidence > p.match_confidence);

        let link = SocialPostGameLink {
            id: id.clone(),
            social_post_id: draft.social_post_id.clone(),
            game_id: game.id.clone(),
            entity_id: game.entity_id.clone(),
            link_type: LinkType::AutoMatched,
            match_confidence: draft.confidence,
            match_reason: Some(draft.match_reason),
            match_signals: Some(draft.match_signals.clone()),
            is_primary_game,
            mention_order,
            has_ticket_data: draft.has_ticket_data,
            extracted_snapshot: Some(draft.extracted_snapshot.clone()),
            reconciliation_preview: draft.reconciliation_preview.clone(),
            has_reconciliation_discrepancy: draft.has_reconciliation_discrepancy,
            reconciliation_discrepancy_severity: draft.reconciliation_discrepancy_severity,
            linked_at: Some(self.now),
            linked_by: Some(AUTO_LINKER.to_string()),
            created_at: Some(self.now),
            updated_at: Some(self.now),
        };
        // Post before link so a missing post leaves nothing behind.
        let mut post_update = UpdateRequest::new(self.tables.table(Model::SocialPost), draft.social_post_id.as_str())
            .increment("linkedGameCount", 1)
            .set("hasUnverifiedLinks", true)
            .set("processingStatus", ProcessingStatus::Linked.as_str())
            .set("updatedAt", self.now.to_rfc3339())
            .require_exists();
        if is_primary_game {
            post_update = post_update.set("primaryLinkedGameId", game.id.as_str());
        }
        self.store.update(&post_update).await?;

        let links_table = self.tables.table(Model::SocialPostGameLink);
        self.store.put(&links_table, to_item(&link)?).await?;

        if is_primary_game {
            if let Some(previous) = current_primary {
                let demote = UpdateRequest::new(&links_table, previous.id.as_str())
                    .set("isPrimaryGame", false)
                    .set("updatedAt", self.now.to_rfc3339())
                    .require_exists();
                if let Err(err) = self.store.update(&demote).await {
                    warn!(link_id = %previous.id, error = %err, "failed to demote previous primary link");
                }
            }
        }

        info!(
            social_post_id = %draft.social_post_id,
            game_id = %game.id,
            confidence = draft.confidence,
            is_primary_game,
            mention_order,
            "link created"
        );
        Ok(LinkOutcome::Created {
            link_id: id,
            is_primary_game,
            mention_order,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kr_core::MatchReason;
    use kr_storage::MemoryStore;
    use serde_json::json;

    fn draft(post: &str, confidence: f64) -> LinkDraft {
        LinkDraft {
            social_post_id: post.into(),
            confidence,
            match_reason: MatchReason::TournamentIdMatch,
            match_signals: json!({}),
            extracted_snapshot: json!({}),
            reconciliation_preview: None,
            has_ticket_data: false,
            has_reconciliation_discrepancy: false,
            reconciliation_discrepancy_severity: None,
        }
    }

    fn game(id: &str) -> Game {
        Game {
            id: id.into(),
            entity_id: Some("E1".into()),
            ..Default::default()
        }
    }

    async fn store_with_post() -> (MemoryStore, TableNames) {
        let tables = TableNames::default();
        let store = MemoryStore::for_tables(&tables);
        store
            .load_seed(
                &tables,
                &json!({"SocialPost": [{"id": "P1", "processingStatus": "EXTRACTED"}]}),
            )
            .await
            .unwrap();
        (store, tables)
    }

    #[test]
    fn link_ids_are_deterministic_per_pair() {
        assert_eq!(link_id("P1", "G1"), link_id("P1", "G1"));
        assert_ne!(link_id("P1", "G1"), link_id("P1", "G2"));
    }

    #[tokio::test]
    async fn second_link_gets_next_mention_order_and_steals_primary() {
        let (store, tables) = store_with_post().await;
        let indexes = IndexResolver::new();
        let writer = LinkWriter::new(&store, &tables, &indexes, Utc::now());

        let first = writer.create(&game("G1"), &draft("P1", 85.0)).await.unwrap();
        assert!(matches!(first, LinkOutcome::Created { is_primary_game: true, mention_order: 1, .. }));

        let second = writer.create(&game("G2"), &draft("P1", 95.0)).await.unwrap();
        assert!(matches!(second, LinkOutcome::Created { is_primary_game: true, mention_order: 2, .. }));

        let links = writer.links_for_post("P1").await.unwrap();
        let primaries: Vec<_> = links.iter().filter(|l| l.is_primary_game).map(|l| l.game_id.as_str()).collect();
        assert_eq!(primaries, vec!["G2"]);

        let post = store.get(&tables.table(Model::SocialPost), "P1").await.unwrap().unwrap();
        assert_eq!(post["linkedGameCount"], json!(2));
        assert_eq!(post["processingStatus"], json!("LINKED"));
        assert_eq!(post["primaryLinkedGameId"], json!("G2"));
        assert_eq!(post["hasUnverifiedLinks"], json!(true));
    }

    #[tokio::test]
    async fn weaker_second_link_is_not_primary() {
        let (store, tables) = store_with_post().await;
        let indexes = IndexResolver::new();
        let writer = LinkWriter::new(&store, &tables, &indexes, Utc::now());
        writer.create(&game("G1"), &draft("P1", 95.0)).await.unwrap();
        let second = writer.create(&game("G2"), &draft("P1", 85.0)).await.unwrap();
        assert!(matches!(second, LinkOutcome::Created { is_primary_game: false, .. }));
        let post = store.get(&tables.table(Model::SocialPost), "P1").await.unwrap().unwrap();
        assert_eq!(post["primaryLinkedGameId"], json!("G1"));
    }

    #[tokio::test]
    async fn existing_and_rejected_pairs_are_skipped() {
        let (store, tables) = store_with_post().await;
        let indexes = IndexResolver::new();
        let writer = LinkWriter::new(&store, &tables, &indexes, Utc::now());

        writer.create(&game("G1"), &draft("P1", 90.0)).await.unwrap();
        let again = writer.create(&game("G1"), &draft("P1", 90.0)).await.unwrap();
        assert_eq!(
            again,
            LinkOutcome::Skipped {
                link_id: link_id("P1", "G1"),
                reason: "already linked".into()
            }
        );

        let rejected = SocialPostGameLink {
            id: "L-rejected".into(),
            social_post_id: "P1".into(),
            game_id: "G3".into(),
            link_type: LinkType::Rejected,
            ..Default::default()
        };
        store
            .put(&tables.table(Model::SocialPostGameLink), to_item(&rejected).unwrap())
            .await
            .unwrap();
        let outcome = writer.create(&game("G3"), &draft("P1", 99.0)).await.unwrap();
        assert!(matches!(outcome, LinkOutcome::Skipped { ref reason, .. } if reason == "link previously rejected"));

        // Rejected links do not count towards mention order.
        let fourth = writer.create(&game("G4"), &draft("P1", 50.0)).await.unwrap();
        assert!(matches!(fourth, LinkOutcome::Created { mention_order: 2, .. }));
    }

    #[tokio::test]
    async fn missing_post_surfaces_as_error() {
        let tables = TableNames::default();
        let store = MemoryStore::for_tables(&tables);
        let indexes = IndexResolver::new();
        let writer = LinkWriter::new(&store, &tables, &indexes, Utc::now());
        let err = writer.create(&game("G1"), &draft("P404", 90.0)).await.unwrap_err();
        assert!(err.is_condition_failed());
        assert!(writer.links_for_post("P404").await.unwrap().is_empty());

        // A later run still gets a real attempt once the post exists.
        store
            .put(
                &tables.table(Model::SocialPost),
                json!({"id": "P404", "entityId": "E1"}).as_object().unwrap().clone(),
            )
            .await
            .unwrap();
        let retried = writer.create(&game("G1"), &draft("P404", 90.0)).await.unwrap();
        assert!(matches!(retried, LinkOutcome::Created { mention_order: 1, .. }));
    }
}

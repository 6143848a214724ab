//! One matching run per game: discover, score, rank and auto-link.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use kr_core::time::{format_local_date, post_search_window};
use kr_core::{ContentType, Game, GameStatus, MatchReason, SocialPostGameData};
use kr_storage::{from_item, IndexResolver, KeyValueStore, Model, StoreError, TableNames};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::candidates::{CandidateFinder, DiscoveryPath};
use crate::config::{MatcherConfig, Thresholds};
use crate::links::{LinkDraft, LinkOutcome, LinkWriter};
use crate::reconcile::{reconciliation_preview, ticket_summary, ReconciliationPreview, TicketSummary};
use crate::scoring::{score_candidate, ConfidenceLevel, ScoreOptions, ScoreResult};

pub const MATCHABLE_GAME_STATUSES: [GameStatus; 4] = [
    GameStatus::Finished,
    GameStatus::Completed,
    GameStatus::Running,
    GameStatus::Registering,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchOptions {
    pub auto_link_threshold: Option<f64>,
    pub skip_linking: bool,
    pub max_candidates: Option<usize>,
    pub include_already_linked: bool,
    pub include_ticket_data: bool,
    pub include_reconciliation_preview: bool,
    pub days_before: Option<i64>,
    pub days_after: Option<i64>,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            auto_link_threshold: None,
            skip_linking: false,
            max_candidates: None,
            include_already_linked: false,
            include_ticket_data: true,
            include_reconciliation_preview: true,
            days_before: None,
            days_after: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameIneligible {
    #[error("game has no id")]
    MissingId,
    #[error("game has no entity id")]
    MissingEntity,
    #[error("game status {0} is not matchable")]
    Status(&'static str),
    #[error("game has neither a start time nor a venue")]
    NoAnchor,
}

pub fn check_game(game: &Game) -> Result<(), GameIneligible> {
    if game.id.trim().is_empty() {
        return Err(GameIneligible::MissingId);
    }
    if game.entity_id.as_deref().map_or(true, str::is_empty) {
        return Err(GameIneligible::MissingEntity);
    }
    if !MATCHABLE_GAME_STATUSES.contains(&game.game_status) {
        return Err(GameIneligible::Status(game.game_status.as_str()));
    }
    if game.game_start_date_time.is_none() && game.venue_id.is_none() {
        return Err(GameIneligible::NoAnchor);
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredCandidate {
    pub social_post_id: String,
    pub post_url: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub discovered_by: DiscoveryPath,
    pub content_type: Option<ContentType>,
    pub match_confidence: f64,
    pub match_reason: MatchReason,
    pub confidence_level: ConfidenceLevel,
    pub would_auto_link: bool,
    pub extracted_snapshot: Value,
    pub match_signals: ScoreResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_summary: Option<TicketSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciliation_preview: Option<ReconciliationPreview>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedPost {
    pub social_post_id: String,
    pub match_confidence: f64,
    pub match_reason: MatchReason,
    pub is_primary_game: bool,
    pub mention_order: i64,
    pub has_ticket_data: bool,
    pub has_reconciliation_discrepancy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkStatus {
    Created,
    Skipped,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkDetail {
    pub social_post_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_id: Option<String>,
    pub status: LinkStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_confidence: Option<f64>,
}

impl LinkDetail {
    fn skipped(social_post_id: &str, link_id: Option<String>, reason: impl Into<String>, confidence: Option<f64>) -> Self {
        Self {
            social_post_id: social_post_id.to_string(),
            link_id,
            status: LinkStatus::Skipped,
            reason: Some(reason.into()),
            error: None,
            match_confidence: confidence,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketDataSummary {
    pub posts_with_ticket_data: usize,
    pub total_tickets_from_posts: i64,
    pub posts_with_reconciliation_issues: usize,
}

impl TicketDataSummary {
    pub fn absorb(&mut self, other: &TicketDataSummary) {
        self.posts_with_ticket_data += other.posts_with_ticket_data;
        self.total_tickets_from_posts += other.total_tickets_from_posts;
        self.posts_with_reconciliation_issues += other.posts_with_reconciliation_issues;
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResponse {
    pub success: bool,
    pub game_id: String,
    pub game_name: String,
    pub game_date: Option<String>,
    pub candidates_found: usize,
    pub candidates_scored: usize,
    pub links_created: usize,
    pub links_skipped: usize,
    pub existing_links: usize,
    pub candidates: Vec<ScoredCandidate>,
    pub matched_posts: Vec<MatchedPost>,
    pub link_details: Vec<LinkDetail>,
    pub ticket_data_summary: TicketDataSummary,
    pub processing_time_ms: u64,
    pub error: Option<String>,
}

impl MatchResponse {
    fn for_game(game: &Game) -> Self {
        Self {
            success: true,
            game_id: game.id.clone(),
            game_name: game.name.clone(),
            game_date: game.game_start_date_time.map(format_local_date),
            candidates_found: 0,
            candidates_scored: 0,
            links_created: 0,
            links_skipped: 0,
            existing_links: 0,
            candidates: Vec::new(),
            matched_posts: Vec::new(),
            link_details: Vec::new(),
            ticket_data_summary: TicketDataSummary::default(),
            processing_time_ms: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMatchResponse {
    pub success: bool,
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub links_created: usize,
    pub links_skipped: usize,
    pub ticket_data_summary: TicketDataSummary,
    pub results: Vec<MatchResponse>,
}

impl BatchMatchResponse {
    pub fn record(&mut self, response: MatchResponse) {
        if response.success {
            self.processed += 1;
        } else {
            self.skipped += 1;
        }
        self.links_created += response.links_created;
        self.links_skipped += response.links_skipped;
        self.ticket_data_summary.absorb(&response.ticket_data_summary);
        self.results.push(response);
    }
}

/// Owns the store handle and tuning; hands out per-invocation sessions.
#[derive(Clone)]
pub struct Matcher {
    store: Arc<dyn KeyValueStore>,
    tables: TableNames,
    config: MatcherConfig,
}

impl Matcher {
    pub fn new(store: Arc<dyn KeyValueStore>, tables: TableNames, config: MatcherConfig) -> Self {
        Self { store, tables, config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// A session shares one index cache across the games it matches.
    pub fn session(&self) -> MatchSession<'_> {
        MatchSession {
            matcher: self,
            indexes: IndexResolver::new(),
        }
    }

    pub async fn match_game(&self, game: &Game, options: &MatchOptions) -> Result<MatchResponse, StoreError> {
        self.session().match_game(game, options).await
    }

    pub async fn preview(&self, game: &Game, options: &MatchOptions) -> Result<MatchResponse, StoreError> {
        self.session().preview(game, options).await
    }

    pub async fn match_game_id(&self, game_id: &str, options: &MatchOptions) -> Result<Option<MatchResponse>, StoreError> {
        self.session().match_game_id(game_id, options).await
    }

    pub async fn batch_match(&self, game_ids: &[String], options: &MatchOptions) -> BatchMatchResponse {
        self.session().batch_match(game_ids, options).await
    }
}

pub struct MatchSession<'m> {
    matcher: &'m Matcher,
    indexes: IndexResolver,
}

impl MatchSession<'_> {
    fn store(&self) -> &dyn KeyValueStore {
        self.matcher.store.as_ref()
    }

    pub async fn load_game(&self, game_id: &str) -> Result<Option<Game>, StoreError> {
        let table = self.matcher.tables.table(Model::Game);
        match self.store().get(&table, game_id).await? {
            Some(item) => Ok(Some(from_item(item)?)),
            None => Ok(None),
        }
    }

    /// `None` when the game does not exist.
    pub async fn match_game_id(&self, game_id: &str, options: &MatchOptions) -> Result<Option<MatchResponse>, StoreError> {
        let Some(game) = self.load_game(game_id).await? else {
            debug!(game_id, "game not found");
            return Ok(None);
        };
        self.match_game(&game, options).await.map(Some)
    }

    pub async fn preview(&self, game: &Game, options: &MatchOptions) -> Result<MatchResponse, StoreError> {
        let options = MatchOptions {
            skip_linking: true,
            ..options.clone()
        };
        self.match_game(game, &options).await
    }

    pub async fn batch_match(&self, game_ids: &[String], options: &MatchOptions) -> BatchMatchResponse {
        let mut batch = BatchMatchResponse {
            success: true,
            ..Default::default()
        };
        for game_id in game_ids {
            match self.match_game_id(game_id, options).await {
                Ok(Some(response)) => batch.record(response),
                Ok(None) => batch.skipped += 1,
                Err(err) => {
                    warn!(game_id = %game_id, error = %err, "batch match failed for game");
                    batch.errors += 1;
                }
            }
        }
        batch
    }

    fn thresholds(&self, options: &MatchOptions) -> Thresholds {
        let mut thresholds = self.matcher.config.thresholds();
        if let Some(auto_link) = options.auto_link_threshold {
            thresholds.auto_link = auto_link;
        }
        thresholds
    }

    #[instrument(skip_all, fields(game_id = %game.id))]
    pub async fn match_game(&self, game: &Game, options: &MatchOptions) -> Result<MatchResponse, StoreError> {
        let started = Instant::now();
        let mut response = MatchResponse::for_game(game);

        if let Err(reason) = check_game(game) {
            debug!(%reason, "game not eligible for matching");
            response.success = false;
            response.error = Some(format!("not eligible: {reason}"));
            return Ok(response);
        }

        let config = &self.matcher.config;
        let tables = &self.matcher.tables;
        let thresholds = self.thresholds(options);
        let now = Utc::now();
        let writer = LinkWriter::new(self.store(), tables, &self.indexes, now);
        let finder = CandidateFinder::new(self.store(), tables, &self.indexes);

        let existing: Vec<_> = writer
            .links_for_game(&game.id)
            .await?
            .into_iter()
            .filter(|l| !l.is_rejected())
            .collect();
        response.existing_links = existing.len();
        let exclude: HashSet<String> = if options.include_already_linked {
            HashSet::new()
        } else {
            existing.iter().map(|l| l.social_post_id.clone()).collect()
        };

        let window = game
            .game_start_date_time
            .or(game.game_end_date_time)
            .and_then(|anchor| {
                post_search_window(
                    anchor,
                    options.days_before.unwrap_or(config.window_days_before),
                    options.days_after.unwrap_or(config.window_days_after),
                )
            });
        let max = options.max_candidates.unwrap_or(config.max_candidates);

        let set = finder.find(game, window, &exclude, max).await?;
        for post_id in &set.already_linked {
            response.links_skipped += 1;
            response
                .link_details
                .push(LinkDetail::skipped(post_id, None, "already linked", None));
        }
        response.candidates_found = set.discovered();

        let mut ranked = Vec::new();
        for candidate in set.candidates {
            let Some(extraction) = candidate.extraction else {
                continue;
            };
            let score = score_candidate(
                &extraction,
                game,
                &ScoreOptions {
                    content_type: extraction.content_type.or(candidate.post.content_type),
                    post_date: candidate.post.posted_at,
                    thresholds,
                },
            );
            response.candidates_scored += 1;
            if !score.above_minimum() {
                continue;
            }
            let preview = reconciliation_preview(&extraction, game);
            ranked.push(ScoredCandidate {
                social_post_id: candidate.post.id.clone(),
                post_url: candidate.post.post_url.clone(),
                posted_at: candidate.post.posted_at,
                discovered_by: candidate.path,
                content_type: extraction.content_type,
                match_confidence: score.confidence,
                match_reason: score.match_reason,
                confidence_level: score.confidence_level,
                would_auto_link: score.would_auto_link,
                extracted_snapshot: extracted_snapshot(&extraction, now)?,
                match_signals: score,
                ticket_summary: Some(ticket_summary(&extraction)),
                reconciliation_preview: preview,
            });
        }
        ranked.sort_by(|a, b| b.match_confidence.total_cmp(&a.match_confidence));

        for candidate in &ranked {
            if let Some(summary) = &candidate.ticket_summary {
                if summary.has_ticket_data {
                    response.ticket_data_summary.posts_with_ticket_data += 1;
                    response.ticket_data_summary.total_tickets_from_posts += summary.total_tickets_extracted;
                }
            }
            if candidate.reconciliation_preview.as_ref().is_some_and(|p| p.has_discrepancy) {
                response.ticket_data_summary.posts_with_reconciliation_issues += 1;
            }
        }

        if !options.skip_linking {
            link_ranked(game, &ranked, thresholds.auto_link, &writer, &mut response).await;
        }

        if !options.include_ticket_data || !options.include_reconciliation_preview {
            for candidate in &mut ranked {
                if !options.include_ticket_data {
                    candidate.ticket_summary = None;
                }
                if !options.include_reconciliation_preview {
                    candidate.reconciliation_preview = None;
                }
            }
        }
        response.candidates = ranked;
        response.processing_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        info!(
            candidates_found = response.candidates_found,
            candidates_scored = response.candidates_scored,
            links_created = response.links_created,
            links_skipped = response.links_skipped,
            "match run finished"
        );
        Ok(response)
    }
}

/// Links ranked candidates at or above `auto_link`, strongest first.
async fn link_ranked(
    game: &Game,
    ranked: &[ScoredCandidate],
    auto_link: f64,
    writer: &LinkWriter<'_>,
    response: &mut MatchResponse,
) {
    let mut linked: HashSet<&str> = HashSet::new();
    for candidate in ranked {
        if candidate.match_confidence < auto_link {
            continue;
        }
        if !linked.insert(candidate.social_post_id.as_str()) {
            continue;
        }
        let draft = match link_draft(candidate) {
            Ok(draft) => draft,
            Err(err) => {
                response.link_details.push(link_error(candidate, &err));
                continue;
            }
        };
        match writer.create(game, &draft).await {
            Ok(LinkOutcome::Created {
                link_id,
                is_primary_game,
                mention_order,
            }) => {
                response.links_created += 1;
                response.matched_posts.push(MatchedPost {
                    social_post_id: candidate.social_post_id.clone(),
                    match_confidence: candidate.match_confidence,
                    match_reason: candidate.match_reason,
                    is_primary_game,
                    mention_order,
                    has_ticket_data: draft.has_ticket_data,
                    has_reconciliation_discrepancy: draft.has_reconciliation_discrepancy,
                });
                response.link_details.push(LinkDetail {
                    social_post_id: candidate.social_post_id.clone(),
                    link_id: Some(link_id),
                    status: LinkStatus::Created,
                    reason: None,
                    error: None,
                    match_confidence: Some(candidate.match_confidence),
                });
            }
            Ok(LinkOutcome::Skipped { link_id, reason }) => {
                response.links_skipped += 1;
                response.link_details.push(LinkDetail::skipped(
                    &candidate.social_post_id,
                    Some(link_id),
                    reason,
                    Some(candidate.match_confidence),
                ));
            }
            Err(err) => {
                warn!(social_post_id = %candidate.social_post_id, error = %err, "link creation failed");
                response.link_details.push(link_error(candidate, &err));
            }
        }
    }
}

fn link_error(candidate: &ScoredCandidate, err: &StoreError) -> LinkDetail {
    LinkDetail {
        social_post_id: candidate.social_post_id.clone(),
        link_id: None,
        status: LinkStatus::Error,
        reason: None,
        error: Some(err.to_string()),
        match_confidence: Some(candidate.match_confidence),
    }
}

fn link_draft(candidate: &ScoredCandidate) -> Result<LinkDraft, StoreError> {
    let preview = candidate.reconciliation_preview.as_ref();
    Ok(LinkDraft {
        social_post_id: candidate.social_post_id.clone(),
        confidence: candidate.match_confidence,
        match_reason: candidate.match_reason,
        match_signals: serde_json::to_value(&candidate.match_signals)?,
        extracted_snapshot: candidate.extracted_snapshot.clone(),
        reconciliation_preview: preview.map(serde_json::to_value).transpose()?,
        has_ticket_data: candidate
            .ticket_summary
            .as_ref()
            .is_some_and(|t| t.has_ticket_data),
        has_reconciliation_discrepancy: preview.is_some_and(|p| p.has_discrepancy),
        reconciliation_discrepancy_severity: preview.and_then(|p| p.discrepancy_severity),
    })
}

/// The extraction as seen at scoring time, stamped with the capture instant.
fn extracted_snapshot(extraction: &SocialPostGameData, now: DateTime<Utc>) -> Result<Value, StoreError> {
    let mut snapshot = serde_json::to_value(extraction)?;
    if let Value::Object(map) = &mut snapshot {
        map.retain(|_, v| !v.is_null());
        map.insert(
            "capturedAt".into(),
            Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kr_storage::MemoryStore;
    use serde_json::json;

    fn seed() -> Value {
        json!({
            "Game": [{
                "id": "G1",
                "name": "Sunday Major",
                "entityId": "E1",
                "venueId": "V1",
                "tournamentId": 4242,
                "gameStartDateTime": "2024-06-15T10:00:00.000Z",
                "gameStatus": "FINISHED",
                "buyIn": 100
            }],
            "SocialPost": [
                {"id": "P1", "entityId": "E1", "socialAccountId": "A1", "postedAt": "2024-06-16T02:00:00.000Z",
                 "postYearMonth": "2024-06", "processingStatus": "EXTRACTED"},
                {"id": "P2", "entityId": "E1", "socialAccountId": "A1", "postedAt": "2024-06-14T02:00:00.000Z",
                 "postYearMonth": "2024-06", "processingStatus": "EXTRACTED"},
                {"id": "P3", "entityId": "E2", "socialAccountId": "A1", "postedAt": "2024-06-14T03:00:00.000Z",
                 "postYearMonth": "2024-06", "processingStatus": "EXTRACTED"}
            ],
            "SocialAccount": [{"id": "A1", "venueId": "V1", "entityId": "E1"}],
            "SocialPostGameData": [
                {"id": "X1", "socialPostId": "P1", "extractedTournamentId": 4242, "extractedBuyIn": 100,
                 "extractedDate": "2024-06-15", "contentType": "RESULT"},
                {"id": "X2", "socialPostId": "P2", "extractedBuyIn": 100, "extractedDate": "2024-06-15",
                 "contentType": "PROMOTIONAL"},
                {"id": "X3", "socialPostId": "P3", "extractedTournamentId": 4242, "contentType": "RESULT"}
            ]
        })
    }

    async fn matcher() -> (Matcher, Arc<MemoryStore>, TableNames) {
        let tables = TableNames::default();
        let store = Arc::new(MemoryStore::for_tables(&tables));
        store.load_seed(&tables, &seed()).await.unwrap();
        let matcher = Matcher::new(store.clone(), tables.clone(), MatcherConfig::default());
        (matcher, store, tables)
    }

    #[test]
    fn game_gate_reports_first_failure() {
        let game = Game {
            id: "G1".into(),
            entity_id: Some("E1".into()),
            game_status: GameStatus::Scheduled,
            ..Default::default()
        };
        assert_eq!(check_game(&game), Err(GameIneligible::Status("SCHEDULED")));
        let game = Game {
            game_status: GameStatus::Running,
            ..game
        };
        assert_eq!(check_game(&game), Err(GameIneligible::NoAnchor));
    }

    #[tokio::test]
    async fn ineligible_game_has_no_side_effects() {
        let (matcher, store, tables) = matcher().await;
        let game = Game {
            id: "G9".into(),
            game_status: GameStatus::Finished,
            ..Default::default()
        };
        let response = matcher.match_game(&game, &MatchOptions::default()).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("not eligible: game has no entity id"));
        assert!(store.items(&tables.table(Model::SocialPostGameLink)).await.is_empty());
    }

    #[tokio::test]
    async fn links_best_candidates_and_is_idempotent() {
        let (matcher, store, tables) = matcher().await;

        let first = matcher.match_game_id("G1", &MatchOptions::default()).await.unwrap().unwrap();
        assert!(first.success);
        assert_eq!(first.game_date.as_deref(), Some("2024-06-15"));
        // P3 belongs to another entity and is dropped before scoring.
        assert_eq!(first.candidates_scored, 2);
        assert_eq!(first.candidates[0].social_post_id, "P1");
        assert_eq!(first.candidates[0].match_confidence, 100.0);
        assert_eq!(first.links_created, 1);
        assert_eq!(first.matched_posts[0].social_post_id, "P1");
        assert!(first.matched_posts[0].is_primary_game);

        let post = store.get(&tables.table(Model::SocialPost), "P1").await.unwrap().unwrap();
        assert_eq!(post["processingStatus"], json!("LINKED"));

        let second = matcher.match_game_id("G1", &MatchOptions::default()).await.unwrap().unwrap();
        assert_eq!(second.links_created, 0);
        assert_eq!(second.links_skipped, first.links_created);
        assert_eq!(second.existing_links, 1);
        assert_eq!(store.items(&tables.table(Model::SocialPostGameLink)).await.len(), 1);
    }

    #[tokio::test]
    async fn preview_never_writes() {
        let (matcher, store, tables) = matcher().await;
        let game: Game = from_item(
            store.get(&tables.table(Model::Game), "G1").await.unwrap().unwrap(),
        )
        .unwrap();
        let response = matcher.preview(&game, &MatchOptions::default()).await.unwrap();
        assert_eq!(response.links_created, 0);
        assert!(response.candidates[0].would_auto_link);
        assert!(store.items(&tables.table(Model::SocialPostGameLink)).await.is_empty());
    }

    #[tokio::test]
    async fn lowered_threshold_links_weaker_candidates() {
        let (matcher, _store, _tables) = matcher().await;
        let options = MatchOptions {
            auto_link_threshold: Some(40.0),
            ..Default::default()
        };
        let response = matcher.match_game_id("G1", &options).await.unwrap().unwrap();
        assert_eq!(response.links_created, 2);
        let orders: Vec<_> = response.matched_posts.iter().map(|m| m.social_post_id.as_str()).collect();
        assert_eq!(orders, vec!["P1", "P2"]);
    }

    #[tokio::test]
    async fn batch_counts_missing_games_as_skipped() {
        let (matcher, _store, _tables) = matcher().await;
        let batch = matcher
            .batch_match(&["G1".to_string(), "G404".to_string()], &MatchOptions::default())
            .await;
        assert_eq!((batch.processed, batch.skipped, batch.errors), (1, 1, 0));
        assert_eq!(batch.links_created, 1);
    }
}

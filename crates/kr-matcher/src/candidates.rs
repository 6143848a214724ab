//! Candidate discovery: tournament id, venue accounts within the search
//! window, then a month-partitioned date fallback.

use std::collections::HashSet;

use chrono::{DateTime, SecondsFormat, Utc};
use kr_core::time::{year_months_between, SearchWindow};
use kr_core::{ContentType, Game, ProcessingStatus, SocialAccount, SocialPost, SocialPostGameData};
use kr_storage::index::names;
use kr_storage::{
    from_item, Filter, IndexResolver, Item, KeyValueStore, Model, QueryRequest, SortCondition,
    StoreError, TableNames,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

pub const ELIGIBLE_POST_STATUSES: [ProcessingStatus; 4] = [
    ProcessingStatus::Extracted,
    ProcessingStatus::Matched,
    ProcessingStatus::Linked,
    ProcessingStatus::ManualReview,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscoveryPath {
    TournamentId,
    VenueWindow,
    DateWindow,
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub post: SocialPost,
    pub extraction: Option<SocialPostGameData>,
    pub path: DiscoveryPath,
}

#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    pub candidates: Vec<Candidate>,
    /// Posts found but excluded because they are already linked to the game.
    pub already_linked: Vec<String>,
    /// Posts discovered but dropped by [`check_eligibility`]; never count toward the cap.
    pub ineligible: usize,
}

impl CandidateSet {
    pub fn discovered(&self) -> usize {
        self.candidates.len() + self.ineligible
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Ineligible {
    #[error("post status {0} is not matchable")]
    PostStatus(&'static str),
    #[error("post has no extraction")]
    MissingExtraction,
    #[error("extraction content type {0} is not matchable")]
    ContentType(&'static str),
    #[error("post belongs to another entity")]
    EntityMismatch,
}

pub fn check_eligibility(candidate: &Candidate, game: &Game) -> Result<(), Ineligible> {
    let status = candidate.post.processing_status;
    if !ELIGIBLE_POST_STATUSES.contains(&status) {
        return Err(Ineligible::PostStatus(status.as_str()));
    }
    let Some(extraction) = &candidate.extraction else {
        return Err(Ineligible::MissingExtraction);
    };
    match extraction.content_type {
        Some(ContentType::Result | ContentType::Promotional) => {}
        other => {
            return Err(Ineligible::ContentType(
                other.map(|c| c.as_str()).unwrap_or("NONE"),
            ))
        }
    }
    if let (Some(post_entity), Some(game_entity)) = (&candidate.post.entity_id, &game.entity_id) {
        if post_entity != game_entity {
            return Err(Ineligible::EntityMismatch);
        }
    }
    Ok(())
}

fn decode<T: DeserializeOwned>(item: Item, what: &str) -> Option<T> {
    match from_item(item) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(error = %err, "skipping undecodable {what}");
            None
        }
    }
}

fn stamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

struct Collector<'e> {
    game: &'e Game,
    exclude: &'e HashSet<String>,
    max: usize,
    seen: HashSet<String>,
    set: CandidateSet,
}

impl Collector<'_> {
    fn full(&self) -> bool {
        self.set.candidates.len() >= self.max
    }

    /// True when the post still needs an eligibility check.
    fn claim(&mut self, post: &SocialPost) -> bool {
        if self.exclude.contains(&post.id) {
            if self.seen.insert(post.id.clone()) {
                self.set.already_linked.push(post.id.clone());
            }
            return false;
        }
        !self.full() && self.seen.insert(post.id.clone())
    }

    fn admit(&mut self, candidate: Candidate) {
        match check_eligibility(&candidate, self.game) {
            Ok(()) => self.set.candidates.push(candidate),
            Err(reason) => {
                debug!(social_post_id = %candidate.post.id, %reason, "candidate dropped");
                self.set.ineligible += 1;
            }
        }
    }
}

pub struct CandidateFinder<'a> {
    store: &'a dyn KeyValueStore,
    tables: &'a TableNames,
    indexes: &'a IndexResolver,
}

impl<'a> CandidateFinder<'a> {
    pub fn new(store: &'a dyn KeyValueStore, tables: &'a TableNames, indexes: &'a IndexResolver) -> Self {
        Self {
            store,
            tables,
            indexes,
        }
    }

    /// Union of the three discovery paths, deduplicated by post id. Only
    /// eligible posts are kept and count toward `max`; path 3 only runs
    /// while under the cap.
    pub async fn find(
        &self,
        game: &Game,
        window: Option<SearchWindow>,
        exclude: &HashSet<String>,
        max: usize,
    ) -> Result<CandidateSet, StoreError> {
        let mut collector = Collector {
            game,
            exclude,
            max,
            seen: HashSet::new(),
            set: CandidateSet::default(),
        };

        if let Some(tournament_id) = game.tournament_id {
            self.by_tournament_id(tournament_id, &mut collector).await?;
        }
        if let (Some(venue_id), Some(window)) = (game.venue_id.as_deref(), window) {
            if !collector.full() {
                self.by_venue_window(venue_id, window, &mut collector).await?;
            }
        }
        if let Some(window) = window {
            if !collector.full() {
                self.by_date_window(window, &mut collector).await?;
            }
        }

        debug!(
            game_id = %game.id,
            candidates = collector.set.candidates.len(),
            ineligible = collector.set.ineligible,
            already_linked = collector.set.already_linked.len(),
            "candidate discovery finished"
        );
        Ok(collector.set)
    }

    async fn by_tournament_id(&self, tournament_id: i64, collector: &mut Collector<'_>) -> Result<(), StoreError> {
        let extractions = self
            .indexes
            .query_all(
                self.store,
                &QueryRequest::new(self.tables.table(Model::SocialPostGameData), tournament_id)
                    .index(names::BY_TOURNAMENT_ID),
            )
            .await?;
        let posts_table = self.tables.table(Model::SocialPost);
        for item in extractions {
            let Some(extraction) = decode::<SocialPostGameData>(item, "extraction") else {
                continue;
            };
            if collector.full() {
                break;
            }
            let Some(post_item) = self.store.get(&posts_table, &extraction.social_post_id).await? else {
                debug!(social_post_id = %extraction.social_post_id, "extraction refers to a missing post");
                continue;
            };
            if let Some(post) = decode::<SocialPost>(post_item, "post") {
                self.offer(collector, post, Some(extraction), DiscoveryPath::TournamentId)
                    .await?;
            }
        }
        Ok(())
    }

    async fn by_venue_window(
        &self,
        venue_id: &str,
        window: SearchWindow,
        collector: &mut Collector<'_>,
    ) -> Result<(), StoreError> {
        let accounts = self
            .indexes
            .query_all(
                self.store,
                &QueryRequest::new(self.tables.table(Model::SocialAccount), venue_id).index(names::BY_VENUE),
            )
            .await?;
        let posts_table = self.tables.table(Model::SocialPost);
        for item in accounts {
            let Some(account) = decode::<SocialAccount>(item, "social account") else {
                continue;
            };
            if collector.full() {
                break;
            }
            let posts = self
                .indexes
                .query_all(
                    self.store,
                    &QueryRequest::new(&posts_table, account.id.as_str())
                        .index(names::BY_SOCIAL_ACCOUNT_POST)
                        .sort(SortCondition::Between(
                            stamp(window.start).into(),
                            stamp(window.end).into(),
                        )),
                )
                .await?;
            for post in posts.into_iter().filter_map(|i| decode::<SocialPost>(i, "post")) {
                self.offer(collector, post, None, DiscoveryPath::VenueWindow).await?;
            }
        }
        Ok(())
    }

    async fn by_date_window(&self, window: SearchWindow, collector: &mut Collector<'_>) -> Result<(), StoreError> {
        let posts_table = self.tables.table(Model::SocialPost);
        let (start, end) = (stamp(window.start), stamp(window.end));

        let mut requests = Vec::new();
        if self
            .indexes
            .is_available(self.store, &posts_table, names::BY_POST_MONTH)
            .await?
        {
            for month in year_months_between(window.start, window.end) {
                requests.push(
                    QueryRequest::new(&posts_table, month)
                        .index(names::BY_POST_MONTH)
                        .sort(SortCondition::Between(start.clone().into(), end.clone().into())),
                );
            }
        } else {
            debug!("month index unavailable; scanning by processing status");
            for status in ELIGIBLE_POST_STATUSES {
                requests.push(
                    QueryRequest::new(&posts_table, status.as_str())
                        .index(names::BY_PROCESSING_STATUS)
                        .filter(Filter::Between("postedAt".into(), start.clone().into(), end.clone().into())),
                );
            }
        }

        for request in requests {
            if collector.full() {
                break;
            }
            let posts = self.indexes.query_all(self.store, &request).await?;
            for post in posts.into_iter().filter_map(|i| decode::<SocialPost>(i, "post")) {
                self.offer(collector, post, None, DiscoveryPath::DateWindow).await?;
            }
        }
        Ok(())
    }

    /// Loads the extraction when the path did not supply one, then checks eligibility.
    async fn offer(
        &self,
        collector: &mut Collector<'_>,
        post: SocialPost,
        extraction: Option<SocialPostGameData>,
        path: DiscoveryPath,
    ) -> Result<(), StoreError> {
        if !collector.claim(&post) {
            return Ok(());
        }
        let extraction = match extraction {
            Some(extraction) => Some(extraction),
            None => self.extraction_for_post(&post.id).await?,
        };
        collector.admit(Candidate {
            post,
            extraction,
            path,
        });
        Ok(())
    }

    pub async fn extraction_for_post(&self, post_id: &str) -> Result<Option<SocialPostGameData>, StoreError> {
        let items = self
            .indexes
            .query(
                self.store,
                &QueryRequest::new(self.tables.table(Model::SocialPostGameData), post_id)
                    .index(names::BY_SOCIAL_POST)
                    .limit(1),
            )
            .await?
            .items;
        Ok(items.into_iter().find_map(|i| decode(i, "extraction")))
    }
}

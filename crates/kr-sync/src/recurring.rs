//! Recurring-game resolution: which weekly template (if any) a game belongs to.

use chrono::{DateTime, Utc};
use kr_core::normalize::{display_name, names_contain, normalize_name};
use kr_core::time::{local_clock, local_parts, local_weekday, parse_clock_minutes};
use kr_core::{AssignmentStatus, DayOfWeek, Game, RecurringFrequency, RecurringGame};
use kr_storage::index::names;
use kr_storage::{
    from_item, to_item, Filter, IndexResolver, KeyValueStore, Model, QueryRequest, SortCondition,
    StoreError, TableNames,
};
use serde::Serialize;
use strsim::sorensen_dice;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const AUTO_ASSIGN_SCORE: f64 = 75.0;
pub const PENDING_SCORE: f64 = 50.0;
pub const CREATED_CONFIDENCE: f64 = 0.9;
const MAX_CONFIDENCE: f64 = 0.99;
const NAME_WEIGHT: f64 = 80.0;
const START_TIME_TOLERANCE_MINUTES: u32 = 60;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringResolution {
    pub status: AssignmentStatus,
    pub recurring_game_id: Option<String>,
    pub recurring_game_name: Option<String>,
    pub day_of_week: Option<DayOfWeek>,
    pub confidence: f64,
    pub match_score: Option<f64>,
    pub was_created: bool,
    pub suggested_guarantee: Option<f64>,
}

impl RecurringResolution {
    fn not_recurring(day_of_week: Option<DayOfWeek>) -> Self {
        Self {
            status: AssignmentStatus::NotRecurring,
            recurring_game_id: None,
            recurring_game_name: None,
            day_of_week,
            confidence: 0.0,
            match_score: None,
            was_created: false,
            suggested_guarantee: None,
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.status == AssignmentStatus::AutoAssigned
    }
}

fn same_text(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Template score out of 110, or `None` when a hard filter rejects it.
pub fn score_template(game: &Game, template: &RecurringGame, start_minutes: Option<u32>) -> Option<f64> {
    if let Some(template_type) = template.game_type {
        if game.game_type.is_some_and(|t| t != template_type) {
            return None;
        }
    }
    if let (Some(a), Some(b)) = (game.game_variant.as_deref(), template.game_variant.as_deref()) {
        if !same_text(a, b) {
            return None;
        }
    }

    let game_name = normalize_name(&game.name);
    let template_name = normalize_name(&template.name);
    let containment = if names_contain(&game_name, &template_name) { 1.0 } else { 0.0 };
    let mut score = NAME_WEIGHT * f64::max(containment, sorensen_dice(&game_name, &template_name));

    score += match (game.buy_in, template.typical_buy_in) {
        (_, None) => 10.0,
        (None, Some(_)) => 0.0,
        (Some(g), Some(t)) if g == 0.0 && t == 0.0 => 20.0,
        (Some(_), Some(t)) if t == 0.0 => 0.0,
        (Some(g), Some(t)) => {
            let ratio = (g - t).abs() / t;
            if ratio <= 0.10 {
                20.0
            } else if ratio <= 0.25 {
                10.0
            } else {
                0.0
            }
        }
    };

    let template_minutes = template.start_time.as_deref().and_then(parse_clock_minutes);
    if let (Some(game_minutes), Some(template_minutes)) = (start_minutes, template_minutes) {
        let diff = game_minutes.abs_diff(template_minutes);
        if diff.min(24 * 60 - diff) <= START_TIME_TOLERANCE_MINUTES {
            score += 10.0;
        }
    }
    Some(score)
}

pub struct RecurringResolver<'a> {
    store: &'a dyn KeyValueStore,
    tables: &'a TableNames,
    indexes: &'a IndexResolver,
    now: DateTime<Utc>,
}

impl<'a> RecurringResolver<'a> {
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

    pub async fn templates_for(&self, venue_id: &str, day: DayOfWeek) -> Result<Vec<RecurringGame>, StoreError> {
        let items = self
            .indexes
            .query_all(
                self.store,
                &QueryRequest::new(self.tables.table(Model::RecurringGame), venue_id)
                    .index(names::BY_VENUE_RECURRING_GAME)
                    .sort(SortCondition::BeginsWith(RecurringGame::composite_prefix(day)))
                    .filter(Filter::Eq("isActive".into(), true.into())),
            )
            .await?;
        let mut templates = Vec::with_capacity(items.len());
        for item in items {
            match from_item::<RecurringGame>(item) {
                Ok(template) => templates.push(template),
                Err(err) => warn!(error = %err, "skipping undecodable recurring game"),
            }
        }
        Ok(templates)
    }

    pub async fn get(&self, id: &str) -> Result<Option<RecurringGame>, StoreError> {
        match self.store.get(&self.tables.table(Model::RecurringGame), id).await? {
            Some(item) => Ok(Some(from_item(item)?)),
            None => Ok(None),
        }
    }

    /// `None` when the game lacks a venue, start time or variant.
    pub async fn resolve(&self, game: &Game, auto_create: bool) -> Result<Option<RecurringResolution>, StoreError> {
        let (Some(venue_id), Some(start), Some(_)) = (
            game.venue_id.as_deref(),
            game.game_start_date_time,
            game.game_variant.as_deref(),
        ) else {
            return Ok(None);
        };
        let day = local_weekday(start);
        if game.is_series.unwrap_or(false) {
            return Ok(Some(RecurringResolution::not_recurring(Some(day))));
        }

        let start_minutes = Some(local_parts(start).minutes_since_midnight());
        let templates = self.templates_for(venue_id, day).await?;
        let best = templates
            .iter()
            .filter_map(|t| score_template(game, t, start_minutes).map(|s| (t, s)))
            .fold(None::<(&RecurringGame, f64)>, |best, (t, s)| match best {
                Some((_, top)) if top >= s => best,
                _ => Some((t, s)),
            });

        if let Some((template, score)) = best {
            debug!(game_id = %game.id, recurring_game_id = %template.id, score, "best recurring template");
            let status = if score >= AUTO_ASSIGN_SCORE {
                Some(AssignmentStatus::AutoAssigned)
            } else if score >= PENDING_SCORE {
                Some(AssignmentStatus::PendingAssignment)
            } else {
                None
            };
            if let Some(status) = status {
                let suggested_guarantee = (status == AssignmentStatus::AutoAssigned
                    && game.guarantee_amount.map_or(true, |g| g <= 0.0))
                .then_some(template.typical_guarantee)
                .flatten();
                return Ok(Some(RecurringResolution {
                    status,
                    recurring_game_id: Some(template.id.clone()),
                    recurring_game_name: Some(template.name.clone()),
                    day_of_week: Some(day),
                    confidence: (score / 100.0).min(MAX_CONFIDENCE),
                    match_score: Some(score),
                    was_created: false,
                    suggested_guarantee,
                }));
            }
        }

        let name = display_name(&game.name);
        if auto_create && normalize_name(&name).chars().count() > 3 {
            let template = self.create(game, venue_id, day, start, name).await?;
            return Ok(Some(RecurringResolution {
                status: AssignmentStatus::AutoAssigned,
                recurring_game_id: Some(template.id),
                recurring_game_name: Some(template.name),
                day_of_week: Some(day),
                confidence: CREATED_CONFIDENCE,
                match_score: None,
                was_created: true,
                suggested_guarantee: None,
            }));
        }
        Ok(Some(RecurringResolution::not_recurring(Some(day))))
    }

    async fn create(
        &self,
        game: &Game,
        venue_id: &str,
        day: DayOfWeek,
        start: DateTime<Utc>,
        name: String,
    ) -> Result<RecurringGame, StoreError> {
        let template = RecurringGame {
            id: Uuid::new_v4().to_string(),
            day_of_week_name: Some(RecurringGame::composite_key(day, &name)),
            name,
            venue_id: venue_id.to_string(),
            entity_id: game.entity_id.clone(),
            day_of_week: Some(day),
            frequency: Some(RecurringFrequency::Weekly),
            game_type: game.game_type,
            game_variant: game.game_variant.clone(),
            start_time: Some(local_clock(start)),
            typical_buy_in: game.buy_in,
            typical_guarantee: game.guarantee_amount,
            is_active: Some(true),
            auto_created: Some(true),
            created_at: Some(self.now),
            updated_at: Some(self.now),
        };
        self.store
            .put(&self.tables.table(Model::RecurringGame), to_item(&template)?)
            .await?;
        info!(game_id = %game.id, recurring_game_id = %template.id, name = %template.name, "recurring game created");
        Ok(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kr_storage::MemoryStore;
    use serde_json::json;

    fn utc(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    fn monday_game(name: &str, buy_in: f64) -> Game {
        Game {
            id: "G1".into(),
            name: name.into(),
            venue_id: Some("V1".into()),
            entity_id: Some("E1".into()),
            // 19:00 local on Monday 2024-06-17.
            game_start_date_time: Some(utc("2024-06-17T09:00:00Z")),
            game_variant: Some("NLHE".into()),
            buy_in: Some(buy_in),
            ..Default::default()
        }
    }

    async fn seeded() -> (MemoryStore, TableNames) {
        let tables = TableNames::default();
        let store = MemoryStore::for_tables(&tables);
        store
            .load_seed(
                &tables,
                &json!({"RecurringGame": [
                    {"id": "R1", "name": "Big Monday", "venueId": "V1", "dayOfWeek": "MONDAY",
                     "dayOfWeek#name": "MONDAY#Big Monday", "gameVariant": "NLHE", "typicalBuyIn": 100,
                     "typicalGuarantee": 20000, "startTime": "19:00", "isActive": true},
                    {"id": "R2", "name": "Big Monday Old", "venueId": "V1", "dayOfWeek": "MONDAY",
                     "dayOfWeek#name": "MONDAY#Big Monday Old", "gameVariant": "NLHE", "isActive": false},
                    {"id": "R3", "name": "Tuesday Turbo", "venueId": "V1", "dayOfWeek": "TUESDAY",
                     "dayOfWeek#name": "TUESDAY#Tuesday Turbo", "gameVariant": "NLHE", "isActive": true}
                ]}),
            )
            .await
            .unwrap();
        (store, tables)
    }

    #[test]
    fn variant_mismatch_is_a_hard_filter() {
        let template = RecurringGame {
            name: "Big Monday".into(),
            game_variant: Some("PLO".into()),
            ..Default::default()
        };
        assert_eq!(score_template(&monday_game("Big Monday", 100.0), &template, None), None);
    }

    #[test]
    fn buy_in_bands() {
        let template = RecurringGame {
            name: "Big Monday".into(),
            typical_buy_in: Some(100.0),
            ..Default::default()
        };
        let score = |buy_in| score_template(&monday_game("Big Monday", buy_in), &template, None);
        assert_eq!(score(105.0), Some(100.0));
        assert_eq!(score(120.0), Some(90.0));
        assert_eq!(score(200.0), Some(80.0));
    }

    #[tokio::test]
    async fn matches_active_template_on_local_weekday() {
        let (store, tables) = seeded().await;
        let indexes = IndexResolver::new();
        let resolver = RecurringResolver::new(&store, &tables, &indexes, Utc::now());

        let resolution = resolver
            .resolve(&monday_game("Big Monday $20k Gtd", 100.0), false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolution.status, AssignmentStatus::AutoAssigned);
        assert_eq!(resolution.recurring_game_id.as_deref(), Some("R1"));
        assert_eq!(resolution.match_score, Some(110.0));
        assert_eq!(resolution.confidence, 0.99);
        assert!(!resolution.was_created);
        assert_eq!(resolution.suggested_guarantee, Some(20000.0));
        assert_eq!(resolution.day_of_week, Some(DayOfWeek::Monday));
    }

    #[tokio::test]
    async fn creates_template_when_nothing_fits() {
        let (store, tables) = seeded().await;
        let indexes = IndexResolver::new();
        let resolver = RecurringResolver::new(&store, &tables, &indexes, Utc::now());

        let game = monday_game("Weekly Deepstack Special $5k Gtd", 150.0);
        let resolution = resolver.resolve(&game, true).await.unwrap().unwrap();
        assert!(resolution.was_created);
        assert_eq!(resolution.confidence, CREATED_CONFIDENCE);
        assert_eq!(resolution.recurring_game_name.as_deref(), Some("Deepstack Special"));

        let id = resolution.recurring_game_id.unwrap();
        let created = resolver.get(&id).await.unwrap().unwrap();
        assert_eq!(created.day_of_week, Some(DayOfWeek::Monday));
        assert_eq!(created.day_of_week_name.as_deref(), Some("MONDAY#Deepstack Special"));
        assert_eq!(created.start_time.as_deref(), Some("19:00"));

        let again = resolver.resolve(&game, true).await.unwrap().unwrap();
        assert!(!again.was_created);
        assert_eq!(again.recurring_game_id.as_deref(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn series_and_incomplete_games() {
        let (store, tables) = seeded().await;
        let indexes = IndexResolver::new();
        let resolver = RecurringResolver::new(&store, &tables, &indexes, Utc::now());

        let series = Game {
            is_series: Some(true),
            ..monday_game("Big Monday", 100.0)
        };
        let resolution = resolver.resolve(&series, true).await.unwrap().unwrap();
        assert_eq!(resolution.status, AssignmentStatus::NotRecurring);

        let no_variant = Game {
            game_variant: None,
            ..monday_game("Big Monday", 100.0)
        };
        assert!(resolver.resolve(&no_variant, true).await.unwrap().is_none());

        let stranger = monday_game("Zzz", 100.0);
        let resolution = resolver.resolve(&stranger, true).await.unwrap().unwrap();
        assert_eq!(resolution.status, AssignmentStatus::NotRecurring);
    }
}

//! Keeps the Active / Upcoming / RecentlyFinished read models in step with a
//! game save, and flags games that stopped reporting.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use kr_core::{
    ActiveGame, Entity, Game, GameStatus, ProjectionFields, RecentlyFinishedGame, UpcomingGame, Venue,
    STALE_REASON_NOT_FINISHED,
};
use kr_storage::index::names;
use kr_storage::{
    from_item, to_item, IndexResolver, Item, KeyValueStore, Model, QueryRequest, StoreError, TableNames,
    UpdateRequest,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::recurring::{RecurringResolution, RecurringResolver};

pub const STALE_AFTER_DAYS: i64 = 7;
pub const RECENTLY_FINISHED_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusClass {
    Upcoming,
    Active,
    Finished,
    Inactive,
}

pub fn status_class(status: GameStatus) -> StatusClass {
    match status {
        GameStatus::Scheduled => StatusClass::Upcoming,
        GameStatus::Initiating | GameStatus::Registering | GameStatus::Running | GameStatus::ClockStopped => {
            StatusClass::Active
        }
        GameStatus::Finished | GameStatus::Completed => StatusClass::Finished,
        GameStatus::Cancelled | GameStatus::NotInUse | GameStatus::NotPublished | GameStatus::Unknown => {
            StatusClass::Inactive
        }
    }
}

/// Minutes between live-stat refreshes of an active game.
pub fn refresh_interval_minutes(status: GameStatus) -> i64 {
    match status {
        GameStatus::Running => 15,
        GameStatus::ClockStopped => 30,
        GameStatus::Registering => 60,
        _ => 120,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncAction {
    UpsertedUpcoming,
    SkippedPastUpcoming,
    UpsertedActive,
    MarkedAsStale,
    StaleTargetMissing,
    ClearedStaleFlag,
    CreatedRecentlyFinished,
    UpdatedRecentlyFinished,
    FinishedButTooOldForRecent,
    FinishedUnchanged,
    RemovedFromUpcoming,
    RemovedFromActive,
    RemovedFromRecentlyFinished,
    NoProjection,
}

/// Display values supplied by the caller; they win over stored lookups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectionHints {
    pub venue_name: Option<String>,
    pub venue_logo: Option<String>,
    pub entity_name: Option<String>,
    pub recurring_game_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub game_id: String,
    pub status_class: StatusClass,
    pub actions: Vec<SyncAction>,
    pub recurring: Option<RecurringResolution>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub resolve_recurring: bool,
    pub auto_create_recurring: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            resolve_recurring: true,
            auto_create_recurring: false,
        }
    }
}

impl SyncOptions {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str, default: bool| {
            lookup(key)
                .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(default)
        };
        let defaults = Self::default();
        Self {
            resolve_recurring: flag("KR_RESOLVE_RECURRING", defaults.resolve_recurring),
            auto_create_recurring: flag("KR_RECURRING_AUTO_CREATE", defaults.auto_create_recurring),
        }
    }
}

#[derive(Clone, Copy)]
enum Projection {
    Active,
    Upcoming,
    RecentlyFinished,
}

impl Projection {
    fn model(self) -> Model {
        match self {
            Projection::Active => Model::ActiveGame,
            Projection::Upcoming => Model::UpcomingGame,
            Projection::RecentlyFinished => Model::RecentlyFinishedGame,
        }
    }

    fn index(self) -> &'static str {
        match self {
            Projection::Active => names::BY_GAME_ID_ACTIVE,
            Projection::Upcoming => names::BY_GAME_ID_UPCOMING,
            Projection::RecentlyFinished => names::BY_GAME_ID_RECENTLY_FINISHED,
        }
    }

    fn removed(self) -> SyncAction {
        match self {
            Projection::Active => SyncAction::RemovedFromActive,
            Projection::Upcoming => SyncAction::RemovedFromUpcoming,
            Projection::RecentlyFinished => SyncAction::RemovedFromRecentlyFinished,
        }
    }
}

fn stamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// An explicit flag wins; otherwise a positive guarantee amount implies one.
fn has_guarantee(game: &Game) -> bool {
    game.has_guarantee
        .unwrap_or(game.guarantee_amount.is_some_and(|g| g > 0.0))
}

/// Paid prize pool takes precedence over the calculated one.
fn has_overlay(game: &Game) -> bool {
    let guarantee = game.guarantee_amount.unwrap_or(0.0);
    let pool = game.prizepool_paid.or(game.prizepool_calculated).unwrap_or(0.0);
    has_guarantee(game) && guarantee > 0.0 && pool < guarantee
}

struct DisplayFields {
    venue_name: Option<String>,
    venue_logo: Option<String>,
    entity_name: Option<String>,
    recurring_game_id: Option<String>,
    recurring_game_name: Option<String>,
}

/// One synchronizer per invocation; venue and entity lookups are cached on it.
pub struct ProjectionSync {
    store: Arc<dyn KeyValueStore>,
    tables: TableNames,
    options: SyncOptions,
    indexes: IndexResolver,
    venues: Mutex<HashMap<String, Option<Venue>>>,
    entities: Mutex<HashMap<String, Option<Entity>>>,
    now: DateTime<Utc>,
}

impl ProjectionSync {
    pub fn new(store: Arc<dyn KeyValueStore>, tables: TableNames, options: SyncOptions) -> Self {
        Self {
            store,
            tables,
            options,
            indexes: IndexResolver::new(),
            venues: Mutex::new(HashMap::new()),
            entities: Mutex::new(HashMap::new()),
            now: Utc::now(),
        }
    }

    /// Pins the clock used for staleness, refresh and TTL decisions.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    fn store(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }

    #[instrument(skip_all, fields(game_id = %game.id, status = %game.game_status))]
    pub async fn sync(
        &self,
        game: &Game,
        previous: Option<&Game>,
        hints: &ProjectionHints,
    ) -> Result<SyncOutcome, StoreError> {
        let class = status_class(game.game_status);
        let mut outcome = SyncOutcome {
            game_id: game.id.clone(),
            status_class: class,
            actions: Vec::new(),
            recurring: None,
        };

        match class {
            StatusClass::Upcoming => self.sync_upcoming(game, hints, &mut outcome).await?,
            StatusClass::Active => self.sync_active(game, hints, &mut outcome).await?,
            StatusClass::Finished => self.sync_finished(game, previous, hints, &mut outcome).await?,
            StatusClass::Inactive => {
                self.remove_from(game, &[Projection::Active, Projection::Upcoming, Projection::RecentlyFinished], &mut outcome)
                    .await?;
                self.clear_stale(game, &mut outcome).await;
                if outcome.actions.is_empty() {
                    outcome.actions.push(SyncAction::NoProjection);
                }
            }
        }

        info!(actions = ?outcome.actions, "projections synchronized");
        Ok(outcome)
    }

    /// Removes the game from every projection; used when the game row is deleted.
    pub async fn remove_all(&self, game_id: &str) -> Result<SyncOutcome, StoreError> {
        let game = Game {
            id: game_id.to_string(),
            ..Default::default()
        };
        let mut outcome = SyncOutcome {
            game_id: game_id.to_string(),
            status_class: StatusClass::Inactive,
            actions: Vec::new(),
            recurring: None,
        };
        self.remove_from(&game, &[Projection::Active, Projection::Upcoming, Projection::RecentlyFinished], &mut outcome)
            .await?;
        if outcome.actions.is_empty() {
            outcome.actions.push(SyncAction::NoProjection);
        }
        Ok(outcome)
    }

    async fn sync_upcoming(&self, game: &Game, hints: &ProjectionHints, outcome: &mut SyncOutcome) -> Result<(), StoreError> {
        if !game.game_start_date_time.is_some_and(|start| start > self.now) {
            outcome.actions.push(SyncAction::SkippedPastUpcoming);
            return Ok(());
        }
        self.remove_from(game, &[Projection::Active, Projection::RecentlyFinished], outcome)
            .await?;
        let existing = self.existing(game, Projection::Upcoming).await?;
        let display = self.display(game, hints, outcome).await?;
        let row = UpcomingGame {
            common: self.common(game, display, existing.as_ref()),
            guarantee_amount: game.guarantee_amount,
            has_guarantee: has_guarantee(game),
            game_type: game.game_type,
            game_variant: game.game_variant.clone(),
            tournament_type: game.tournament_type,
            starting_stack: game.starting_stack,
        };
        self.put(Projection::Upcoming, &row).await?;
        outcome.actions.push(SyncAction::UpsertedUpcoming);
        Ok(())
    }

    async fn sync_active(&self, game: &Game, hints: &ProjectionHints, outcome: &mut SyncOutcome) -> Result<(), StoreError> {
        self.remove_from(game, &[Projection::Upcoming, Projection::RecentlyFinished], outcome)
            .await?;

        let stale_cutoff = self.now - Duration::days(STALE_AFTER_DAYS);
        if game.game_start_date_time.is_some_and(|start| start < stale_cutoff) {
            self.remove_from(game, &[Projection::Active], outcome).await?;
            self.mark_stale(game, outcome).await?;
            return Ok(());
        }

        self.clear_stale(game, outcome).await;
        let existing = self.existing(game, Projection::Active).await?;
        let refresh_count = existing
            .as_ref()
            .and_then(|item| item.get("refreshCount"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        let interval = refresh_interval_minutes(game.game_status);
        let display = self.display(game, hints, outcome).await?;
        let row = ActiveGame {
            common: self.common(game, display, existing.as_ref()),
            total_entries: game.total_entries,
            total_unique_players: game.total_unique_players,
            players_remaining: game.players_remaining,
            prizepool_paid: game.prizepool_paid,
            prizepool_calculated: game.prizepool_calculated,
            guarantee_amount: game.guarantee_amount,
            has_guarantee: has_guarantee(game),
            has_overlay: has_overlay(game),
            refresh_interval_minutes: interval,
            next_refresh_at: Some(self.now + Duration::minutes(interval)),
            last_refreshed_at: Some(self.now),
            refresh_count: refresh_count + 1,
            source_url: game.source_url.clone(),
        };
        self.put(Projection::Active, &row).await?;
        outcome.actions.push(SyncAction::UpsertedActive);
        Ok(())
    }

    async fn sync_finished(
        &self,
        game: &Game,
        previous: Option<&Game>,
        hints: &ProjectionHints,
        outcome: &mut SyncOutcome,
    ) -> Result<(), StoreError> {
        let recent_cutoff = self.now - Duration::days(RECENTLY_FINISHED_DAYS);
        let recent = game.game_start_date_time.is_some_and(|start| start > recent_cutoff);
        let already_finished = previous.is_some_and(|p| p.game_status.is_finished());

        if already_finished {
            let existing = self.existing(game, Projection::RecentlyFinished).await?;
            match existing {
                Some(item) if recent => {
                    self.write_recently_finished(game, hints, Some(&item), outcome).await?;
                    outcome.actions.push(SyncAction::UpdatedRecentlyFinished);
                }
                _ => outcome.actions.push(SyncAction::FinishedUnchanged),
            }
            return Ok(());
        }

        self.remove_from(game, &[Projection::Active, Projection::Upcoming], outcome)
            .await?;
        self.clear_stale(game, outcome).await;
        if recent {
            let existing = self.existing(game, Projection::RecentlyFinished).await?;
            self.write_recently_finished(game, hints, existing.as_ref(), outcome).await?;
            outcome.actions.push(SyncAction::CreatedRecentlyFinished);
        } else {
            debug!("finished game started too long ago for the recent list");
            outcome.actions.push(SyncAction::FinishedButTooOldForRecent);
        }
        Ok(())
    }

    async fn write_recently_finished(
        &self,
        game: &Game,
        hints: &ProjectionHints,
        existing: Option<&Item>,
        outcome: &mut SyncOutcome,
    ) -> Result<(), StoreError> {
        let ttl_anchor = game.game_start_date_time.unwrap_or(self.now);
        let display = self.display(game, hints, outcome).await?;
        let row = RecentlyFinishedGame {
            common: self.common(game, display, existing),
            finished_at: Some(game.game_end_date_time.unwrap_or(self.now)),
            total_entries: game.total_entries,
            prizepool_paid: game.prizepool_paid,
            guarantee_amount: game.guarantee_amount,
            has_overlay: has_overlay(game),
            ttl: ttl_anchor.timestamp() + Duration::days(RECENTLY_FINISHED_DAYS).num_seconds(),
        };
        self.put(Projection::RecentlyFinished, &row).await
    }

    async fn mark_stale(&self, game: &Game, outcome: &mut SyncOutcome) -> Result<(), StoreError> {
        let update = UpdateRequest::new(self.tables.table(Model::Game), game.id.as_str())
            .set("isStatusDataStale", true)
            .set("statusDataStaleAt", stamp(self.now))
            .set("statusDataStaleReason", STALE_REASON_NOT_FINISHED)
            .require_exists();
        match self.store().update(&update).await {
            Ok(_) => {
                warn!(reason = STALE_REASON_NOT_FINISHED, "game marked as stale");
                outcome.actions.push(SyncAction::MarkedAsStale);
                Ok(())
            }
            Err(err) if err.is_condition_failed() => {
                warn!("stale flag skipped: game row no longer exists");
                outcome.actions.push(SyncAction::StaleTargetMissing);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn clear_stale(&self, game: &Game, outcome: &mut SyncOutcome) {
        if !game.is_stale_flagged() {
            return;
        }
        let update = UpdateRequest::new(self.tables.table(Model::Game), game.id.as_str())
            .set("isStatusDataStale", false)
            .remove("statusDataStaleAt")
            .remove("statusDataStaleReason")
            .require_exists();
        match self.store().update(&update).await {
            Ok(_) => outcome.actions.push(SyncAction::ClearedStaleFlag),
            Err(err) => warn!(error = %err, "failed to clear stale flag"),
        }
    }

    /// Current projection row, by the game-id index and then by key.
    async fn existing(&self, game: &Game, projection: Projection) -> Result<Option<Item>, StoreError> {
        let table = self.tables.table(projection.model());
        let page = self
            .indexes
            .query(
                self.store(),
                &QueryRequest::new(&table, game.id.as_str())
                    .index(projection.index())
                    .limit(1),
            )
            .await?;
        if let Some(item) = page.items.into_iter().next() {
            return Ok(Some(item));
        }
        self.store().get(&table, &game.id).await
    }

    async fn remove_from(
        &self,
        game: &Game,
        projections: &[Projection],
        outcome: &mut SyncOutcome,
    ) -> Result<(), StoreError> {
        for projection in projections {
            let Some(item) = self.existing(game, *projection).await? else {
                continue;
            };
            let key = item
                .get(kr_storage::KEY_ATTR)
                .and_then(|v| v.as_str())
                .unwrap_or(&game.id)
                .to_string();
            if self
                .store()
                .delete(&self.tables.table(projection.model()), &key)
                .await?
                .is_some()
            {
                outcome.actions.push(projection.removed());
            }
        }
        Ok(())
    }

    async fn put<T: Serialize>(&self, projection: Projection, row: &T) -> Result<(), StoreError> {
        self.store()
            .put(&self.tables.table(projection.model()), to_item(row)?)
            .await
    }

    fn common(&self, game: &Game, display: DisplayFields, existing: Option<&Item>) -> ProjectionFields {
        let previous = existing.and_then(|item| from_item::<ProjectionFields>(item.clone()).ok());
        let is_recurring = display.recurring_game_id.is_some();
        ProjectionFields {
            id: game.id.clone(),
            game_id: game.id.clone(),
            entity_id: game.entity_id.clone(),
            venue_id: game.venue_id.clone(),
            tournament_id: game.tournament_id,
            name: game.name.clone(),
            venue_name: display.venue_name,
            venue_logo_cached: display.venue_logo,
            entity_name: display.entity_name,
            game_start_date_time: game.game_start_date_time,
            game_status: game.game_status,
            buy_in: game.buy_in,
            is_satellite: game.is_satellite.unwrap_or(false),
            is_recurring,
            recurring_game_id: display.recurring_game_id,
            recurring_game_name: display.recurring_game_name,
            is_series: game.is_series.unwrap_or(false),
            series_name: game.series_name.clone(),
            is_main_event: game.is_main_event.unwrap_or(false),
            version: previous.as_ref().map_or(0, |p| p.version) + 1,
            created_at: previous.and_then(|p| p.created_at).or(Some(self.now)),
            updated_at: Some(self.now),
        }
    }

    async fn display(&self, game: &Game, hints: &ProjectionHints, outcome: &mut SyncOutcome) -> Result<DisplayFields, StoreError> {
        let venue = match game.venue_id.as_deref() {
            Some(id) if hints.venue_name.is_none() || hints.venue_logo.is_none() => self.venue(id).await?,
            _ => None,
        };
        let entity = match game.entity_id.as_deref() {
            Some(id) if hints.entity_name.is_none() && game.entity_name.is_none() => self.entity(id).await?,
            _ => None,
        };

        let (recurring_game_id, recurring_game_name) = self.recurring(game, hints, outcome).await?;

        Ok(DisplayFields {
            venue_name: hints
                .venue_name
                .clone()
                .or_else(|| game.venue_name.clone())
                .or_else(|| venue.as_ref().map(|v| v.name.clone())),
            venue_logo: hints
                .venue_logo
                .clone()
                .or_else(|| game.venue_logo_cached.clone())
                .or_else(|| venue.as_ref().and_then(|v| v.logo.clone())),
            entity_name: hints
                .entity_name
                .clone()
                .or_else(|| game.entity_name.clone())
                .or_else(|| entity.map(|e| e.entity_name)),
            recurring_game_id,
            recurring_game_name,
        })
    }

    async fn recurring(
        &self,
        game: &Game,
        hints: &ProjectionHints,
        outcome: &mut SyncOutcome,
    ) -> Result<(Option<String>, Option<String>), StoreError> {
        let resolver = RecurringResolver::new(self.store(), &self.tables, &self.indexes, self.now);
        if let Some(id) = game.recurring_game_id.clone() {
            let name = match hints.recurring_game_name.clone().or_else(|| game.recurring_game_name.clone()) {
                Some(name) => Some(name),
                None => resolver.get(&id).await?.map(|t| t.name),
            };
            return Ok((Some(id), name));
        }
        if !self.options.resolve_recurring {
            return Ok((None, None));
        }
        if outcome.recurring.is_none() {
            outcome.recurring = resolver.resolve(game, self.options.auto_create_recurring).await?;
        }
        Ok(match &outcome.recurring {
            Some(resolution) if resolution.is_assigned() => (
                resolution.recurring_game_id.clone(),
                hints
                    .recurring_game_name
                    .clone()
                    .or_else(|| resolution.recurring_game_name.clone()),
            ),
            _ => (None, None),
        })
    }

    async fn venue(&self, id: &str) -> Result<Option<Venue>, StoreError> {
        if let Some(hit) = self.venues.lock().await.get(id) {
            return Ok(hit.clone());
        }
        let venue = match self.store().get(&self.tables.table(Model::Venue), id).await? {
            Some(item) => from_item::<Venue>(item).ok(),
            None => None,
        };
        self.venues.lock().await.insert(id.to_string(), venue.clone());
        Ok(venue)
    }

    async fn entity(&self, id: &str) -> Result<Option<Entity>, StoreError> {
        if let Some(hit) = self.entities.lock().await.get(id) {
            return Ok(hit.clone());
        }
        let entity = match self.store().get(&self.tables.table(Model::Entity), id).await? {
            Some(item) => from_item::<Entity>(item).ok(),
            None => None,
        };
        self.entities.lock().await.insert(id.to_string(), entity.clone());
        Ok(entity)
    }
}

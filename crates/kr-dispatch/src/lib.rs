//! Entry point for every inbound event: stream batches, typed queries and
//! direct game invocations, routed to the matcher, the recurring resolver and
//! the projection synchronizer.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use kr_core::Game;
use kr_matcher::{BatchMatchResponse, MatchOptions, Matcher, MatcherConfig};
use kr_storage::{from_item, item_str, IndexResolver, KeyValueStore, Model, TableNames};
use kr_sync::{ProjectionHints, ProjectionSync, RecurringResolver, SyncOptions, SyncOutcome};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

pub mod invocation;
pub mod unmarshal;

pub use invocation::{EventName, Invocation, StreamRecord};

pub const CRATE_NAME: &str = "kr-dispatch";

pub mod fields {
    pub const MATCH_GAME: &str = "matchGameToSocialPosts";
    pub const BATCH_MATCH: &str = "batchMatchGamesToSocialPosts";
    pub const PREVIEW_MATCH: &str = "previewGameToSocialMatch";
    pub const RESOLVE_RECURRING: &str = "resolveRecurringGame";
    pub const SYNC_PROJECTIONS: &str = "syncGameProjections";
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct MatchInput {
    game_id: Option<String>,
    game: Option<Game>,
    #[serde(flatten)]
    options: MatchOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct BatchInput {
    game_ids: Vec<String>,
    #[serde(flatten)]
    options: MatchOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RecurringInput {
    game_id: Option<String>,
    game: Option<Game>,
    auto_create: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncRequest {
    pub game_id: Option<String>,
    pub game: Option<Game>,
    pub previous_game: Option<Game>,
    pub hints: ProjectionHints,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStreamSummary {
    pub success: bool,
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub outcomes: Vec<SyncOutcome>,
}

pub fn failure(error: impl std::fmt::Display) -> Value {
    json!({ "success": false, "error": error.to_string() })
}

/// Null input reads as an empty object so every field takes its default.
fn parse_input<T: DeserializeOwned + Default>(input: &Value, what: &str) -> Result<T> {
    if input.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(input.clone()).with_context(|| format!("parsing {what} input"))
}

pub struct Dispatcher {
    store: Arc<dyn KeyValueStore>,
    tables: TableNames,
    matcher: Matcher,
    sync_options: SyncOptions,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        tables: TableNames,
        matcher_config: MatcherConfig,
        sync_options: SyncOptions,
    ) -> Self {
        let matcher = Matcher::new(store.clone(), tables.clone(), matcher_config);
        Self {
            store,
            tables,
            matcher,
            sync_options,
        }
    }

    pub fn from_env(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let config = MatcherConfig::from_env().context("loading matcher config")?;
        Ok(Self::new(store, TableNames::from_env(), config, SyncOptions::from_env()))
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// Never fails: errors come back as `{success: false, error}`.
    #[instrument(skip_all)]
    pub async fn dispatch(&self, event: &Value) -> Value {
        match self.try_dispatch(event).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "dispatch failed");
                failure(format!("{err:#}"))
            }
        }
    }

    async fn try_dispatch(&self, event: &Value) -> Result<Value> {
        match Invocation::classify(event) {
            Invocation::StreamBatch(records) => {
                let summary = self.match_stream(&records).await;
                Ok(serde_json::to_value(summary)?)
            }
            Invocation::TypedQuery { field_name, input } => self.typed_query(&field_name, &input).await,
            Invocation::DirectGame { game, options } => {
                let game: Game = serde_json::from_value(game).context("parsing game")?;
                let options: MatchOptions = parse_input(&options, "options")?;
                let response = self.matcher.match_game(&game, &options).await?;
                Ok(serde_json::to_value(response)?)
            }
            Invocation::DirectGameId { game_id, options } => {
                let options: MatchOptions = parse_input(&options, "options")?;
                self.match_by_id(&game_id, &options, false).await
            }
            Invocation::Invalid(reason) => Ok(failure(reason)),
        }
    }

    async fn typed_query(&self, field_name: &str, input: &Value) -> Result<Value> {
        debug!(field_name, "typed query");
        match field_name {
            fields::MATCH_GAME | fields::PREVIEW_MATCH => {
                let preview = field_name == fields::PREVIEW_MATCH;
                let input: MatchInput = parse_input(input, field_name)?;
                match (input.game, input.game_id) {
                    (Some(game), _) => {
                        let response = if preview {
                            self.matcher.preview(&game, &input.options).await?
                        } else {
                            self.matcher.match_game(&game, &input.options).await?
                        };
                        Ok(serde_json::to_value(response)?)
                    }
                    (None, Some(game_id)) => self.match_by_id(&game_id, &input.options, preview).await,
                    (None, None) => Ok(failure("gameId or game is required")),
                }
            }
            fields::BATCH_MATCH => {
                let input: BatchInput = parse_input(input, field_name)?;
                let batch = self.matcher.batch_match(&input.game_ids, &input.options).await;
                Ok(serde_json::to_value(batch)?)
            }
            fields::RESOLVE_RECURRING => {
                let input: RecurringInput = parse_input(input, field_name)?;
                let Some(game) = self.game_from(input.game, input.game_id).await? else {
                    return Ok(failure("game not found"));
                };
                let indexes = IndexResolver::new();
                let resolver = RecurringResolver::new(self.store.as_ref(), &self.tables, &indexes, chrono::Utc::now());
                let resolution = resolver.resolve(&game, input.auto_create).await?;
                Ok(json!({ "success": true, "gameId": game.id, "resolution": resolution }))
            }
            fields::SYNC_PROJECTIONS => {
                let request: SyncRequest = parse_input(input, field_name)?;
                let outcome = self.sync_request(request).await?;
                Ok(match outcome {
                    Some(outcome) => json!({ "success": true, "outcome": outcome }),
                    None => failure("game not found"),
                })
            }
            other => Ok(failure(format!("unknown field {other}"))),
        }
    }

    async fn match_by_id(&self, game_id: &str, options: &MatchOptions, preview: bool) -> Result<Value> {
        let session = self.matcher.session();
        let Some(game) = session.load_game(game_id).await? else {
            return Ok(failure(format!("game not found: {game_id}")));
        };
        let response = if preview {
            session.preview(&game, options).await?
        } else {
            session.match_game(&game, options).await?
        };
        Ok(serde_json::to_value(response)?)
    }

    async fn load_game(&self, game_id: &str) -> Result<Option<Game>> {
        let item = self
            .store
            .get(&self.tables.table(Model::Game), game_id)
            .await
            .with_context(|| format!("loading game {game_id}"))?;
        Ok(item.map(from_item).transpose()?)
    }

    async fn game_from(&self, game: Option<Game>, game_id: Option<String>) -> Result<Option<Game>> {
        match (game, game_id) {
            (Some(game), _) => Ok(Some(game)),
            (None, Some(id)) => self.load_game(&id).await,
            (None, None) => Err(anyhow!("gameId or game is required")),
        }
    }

    /// Runs the projection synchronizer for one saved game.
    pub async fn sync_request(&self, request: SyncRequest) -> Result<Option<SyncOutcome>> {
        let Some(game) = self.game_from(request.game, request.game_id).await? else {
            return Ok(None);
        };
        let sync = ProjectionSync::new(self.store.clone(), self.tables.clone(), self.sync_options);
        let outcome = sync
            .sync(&game, request.previous_game.as_ref(), &request.hints)
            .await
            .with_context(|| format!("syncing projections for {}", game.id))?;
        Ok(Some(outcome))
    }

    /// Matching for a financial-snapshot stream: INSERT only, one run per game.
    async fn match_stream(&self, records: &[StreamRecord]) -> BatchMatchResponse {
        let session = self.matcher.session();
        let options = MatchOptions::default();
        let mut batch = BatchMatchResponse {
            success: true,
            ..Default::default()
        };
        let mut seen = HashSet::new();

        for record in records {
            if record.malformed().is_some() {
                batch.errors += 1;
                continue;
            }
            if record.event != EventName::Insert {
                debug!(event = ?record.event, "ignoring non-insert record");
                continue;
            }
            let image = match record.new_image() {
                Some(Ok(image)) => image,
                Some(Err(err)) => {
                    warn!(error = %err, "undecodable stream image");
                    batch.errors += 1;
                    continue;
                }
                None => {
                    batch.skipped += 1;
                    continue;
                }
            };
            let Some(game_id) = item_str(&image, "gameId").or_else(|| item_str(&image, "id")) else {
                batch.skipped += 1;
                continue;
            };
            if !seen.insert(game_id.to_string()) {
                continue;
            }
            match session.match_game_id(game_id, &options).await {
                Ok(Some(response)) => batch.record(response),
                Ok(None) => {
                    debug!(game_id, "stream record refers to a missing game");
                    batch.skipped += 1;
                }
                Err(err) => {
                    warn!(game_id, error = %err, "matching failed");
                    batch.errors += 1;
                }
            }
        }
        info!(
            processed = batch.processed,
            skipped = batch.skipped,
            errors = batch.errors,
            links_created = batch.links_created,
            "stream batch matched"
        );
        batch
    }

    /// Game-table stream: saves refresh projections, deletes clear them.
    #[instrument(skip_all)]
    pub async fn dispatch_game_stream(&self, event: &Value) -> Value {
        let Invocation::StreamBatch(records) = Invocation::classify(event) else {
            return failure("expected a stream batch");
        };
        let sync = ProjectionSync::new(self.store.clone(), self.tables.clone(), self.sync_options);
        let mut summary = GameStreamSummary {
            success: true,
            ..Default::default()
        };
        for record in &records {
            match self.sync_record(&sync, record).await {
                Ok(Some(outcome)) => {
                    summary.processed += 1;
                    summary.outcomes.push(outcome);
                }
                Ok(None) => summary.skipped += 1,
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "projection sync failed");
                    summary.errors += 1;
                }
            }
        }
        serde_json::to_value(summary).unwrap_or_else(failure)
    }

    async fn sync_record(&self, sync: &ProjectionSync, record: &StreamRecord) -> Result<Option<SyncOutcome>> {
        if let Some(reason) = record.malformed() {
            return Err(anyhow!("malformed stream record: {reason}"));
        }
        match record.event {
            EventName::Insert | EventName::Modify => {
                let Some(image) = record.new_image().transpose()? else {
                    return Ok(None);
                };
                let game: Game = from_item(image).context("decoding game image")?;
                let previous: Option<Game> = match record.old_image().transpose()? {
                    Some(old) => Some(from_item(old).context("decoding previous game image")?),
                    None => None,
                };
                let outcome = sync.sync(&game, previous.as_ref(), &ProjectionHints::default()).await?;
                Ok(Some(outcome))
            }
            EventName::Remove => {
                let keys = record.keys().or_else(|| record.old_image()).transpose()?;
                let Some(game_id) = keys.as_ref().and_then(|k| item_str(k, "id")) else {
                    return Ok(None);
                };
                Ok(Some(sync.remove_all(game_id).await?))
            }
            EventName::Other => Ok(None),
        }
    }
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, SecondsFormat, Utc};
use kr_core::STALE_REASON_NOT_FINISHED;
use kr_dispatch::Dispatcher;
use kr_matcher::MatcherConfig;
use kr_storage::{KeyValueStore, MemoryStore, Model, TableNames};
use kr_sync::SyncOptions;
use serde_json::{json, Value};

fn fixtures() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures")
}

fn event(name: &str) -> Value {
    let raw = std::fs::read_to_string(fixtures().join("events").join(name)).unwrap();
    serde_json::from_str(&raw).unwrap()
}

async fn seeded() -> (Dispatcher, Arc<MemoryStore>, TableNames) {
    let tables = TableNames::default();
    let store = Arc::new(MemoryStore::for_tables(&tables));
    store
        .load_seed_file(&tables, &fixtures().join("seed.json"))
        .await
        .unwrap();
    let dispatcher = Dispatcher::new(
        store.clone(),
        tables.clone(),
        MatcherConfig::default(),
        SyncOptions::default(),
    );
    (dispatcher, store, tables)
}

fn iso(at: chrono::DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[tokio::test]
async fn financial_stream_links_tournament_id_post() {
    let (dispatcher, store, tables) = seeded().await;
    let response = dispatcher.dispatch(&event("financial-stream.json")).await;

    assert_eq!(response["success"], json!(true));
    // S2 repeats G1, S3 is a MODIFY, S4 names a missing game.
    assert_eq!(response["processed"], json!(1));
    assert_eq!(response["skipped"], json!(1));
    assert_eq!(response["linksCreated"], json!(1));

    let links = store.items(&tables.table(Model::SocialPostGameLink)).await;
    assert_eq!(links.len(), 1);
    let link = &links[0];
    assert_eq!(link["socialPostId"], json!("P1"));
    assert_eq!(link["gameId"], json!("G1"));
    assert_eq!(link["matchConfidence"], json!(100.0));
    assert_eq!(link["matchReason"], json!("tournament_id_match"));
    assert_eq!(link["isPrimaryGame"], json!(true));
    assert_eq!(link["mentionOrder"], json!(1));

    let post = store.get(&tables.table(Model::SocialPost), "P1").await.unwrap().unwrap();
    assert_eq!(post["processingStatus"], json!("LINKED"));
    assert_eq!(post["primaryLinkedGameId"], json!("G1"));

    let again = dispatcher.dispatch(&event("financial-stream.json")).await;
    assert_eq!(again["linksCreated"], json!(0));
    assert_eq!(again["linksSkipped"], json!(1));
}

#[tokio::test]
async fn close_signals_surface_without_linking_and_mismatches_drop() {
    let (dispatcher, store, tables) = seeded().await;
    let response = dispatcher.dispatch(&event("match-game.json")).await;

    assert_eq!(response["success"], json!(true));
    assert_eq!(response["linksCreated"], json!(0));
    let candidates = response["candidates"].as_array().unwrap();
    let promo = candidates
        .iter()
        .find(|c| c["socialPostId"] == json!("P4"))
        .expect("close candidate surfaced");
    assert_eq!(promo["wouldAutoLink"], json!(false));
    assert!(promo["matchConfidence"].as_f64().unwrap() < 80.0);
    assert!(candidates.iter().all(|c| c["socialPostId"] != json!("P5")));
    assert!(store.items(&tables.table(Model::SocialPostGameLink)).await.is_empty());
}

#[tokio::test]
async fn preview_query_reports_without_writing() {
    let (dispatcher, store, tables) = seeded().await;
    let response = dispatcher
        .dispatch(&json!({
            "fieldName": "previewGameToSocialMatch",
            "arguments": {"input": {"gameId": "G1"}}
        }))
        .await;
    assert_eq!(response["success"], json!(true));
    assert_eq!(response["candidates"][0]["socialPostId"], json!("P1"));
    assert!(store.items(&tables.table(Model::SocialPostGameLink)).await.is_empty());
}

#[tokio::test]
async fn batch_query_counts_missing_games() {
    let (dispatcher, _store, _tables) = seeded().await;
    let response = dispatcher
        .dispatch(&json!({
            "fieldName": "batchMatchGamesToSocialPosts",
            "arguments": {"input": {"gameIds": ["G1", "G404"]}}
        }))
        .await;
    assert_eq!(response["processed"], json!(1));
    assert_eq!(response["skipped"], json!(1));
    assert_eq!(response["linksCreated"], json!(1));
}

#[tokio::test]
async fn recurring_query_assigns_weekly_template() {
    let (dispatcher, store, tables) = seeded().await;
    let response = dispatcher.dispatch(&event("resolve-recurring.json")).await;

    assert_eq!(response["success"], json!(true));
    let resolution = &response["resolution"];
    assert_eq!(resolution["status"], json!("AUTO_ASSIGNED"));
    assert_eq!(resolution["recurringGameId"], json!("R1"));
    assert_eq!(resolution["matchScore"], json!(110.0));
    assert_eq!(resolution["confidence"], json!(0.99));
    assert_eq!(resolution["wasCreated"], json!(false));
    assert_eq!(store.items(&tables.table(Model::RecurringGame)).await.len(), 1);
}

#[tokio::test]
async fn game_stream_flags_stale_running_game() {
    let (dispatcher, store, tables) = seeded().await;
    let started = iso(Utc::now() - Duration::days(10));
    store
        .put(
            &tables.table(Model::Game),
            json!({"id": "G7", "name": "Forgotten Friday", "entityId": "E1", "venueId": "V1",
                   "gameStatus": "RUNNING", "gameStartDateTime": started})
            .as_object()
            .unwrap()
            .clone(),
        )
        .await
        .unwrap();

    let response = dispatcher
        .dispatch_game_stream(&json!({"Records": [{
            "eventName": "MODIFY",
            "dynamodb": {"NewImage": {
                "id": {"S": "G7"}, "name": {"S": "Forgotten Friday"}, "entityId": {"S": "E1"},
                "venueId": {"S": "V1"}, "gameStatus": {"S": "RUNNING"},
                "gameStartDateTime": {"S": started}
            }}
        }]}))
        .await;

    assert_eq!(response["processed"], json!(1));
    assert_eq!(response["outcomes"][0]["actions"], json!(["MARKED_AS_STALE"]));
    assert!(store.items(&tables.table(Model::ActiveGame)).await.is_empty());
    let game = store.get(&tables.table(Model::Game), "G7").await.unwrap().unwrap();
    assert_eq!(game["isStatusDataStale"], json!(true));
    assert_eq!(game["statusDataStaleReason"], json!(STALE_REASON_NOT_FINISHED));
}

#[tokio::test]
async fn game_stream_skips_backdated_finished_game_and_clears_on_remove() {
    let (dispatcher, store, tables) = seeded().await;
    let old = iso(Utc::now() - Duration::days(30));
    let upcoming = iso(Utc::now() + Duration::days(2));

    let response = dispatcher
        .dispatch_game_stream(&json!({"Records": [
            {"eventName": "INSERT", "dynamodb": {"NewImage": {
                "id": {"S": "G8"}, "entityId": {"S": "E1"}, "venueId": {"S": "V1"},
                "gameStatus": {"S": "FINISHED"}, "gameStartDateTime": {"S": old}
            }}},
            {"eventName": "INSERT", "dynamodb": {"NewImage": {
                "id": {"S": "G9"}, "name": {"S": "Next Big Thing"}, "entityId": {"S": "E1"},
                "venueId": {"S": "V1"}, "gameStatus": {"S": "SCHEDULED"},
                "gameStartDateTime": {"S": upcoming}
            }}}
        ]}))
        .await;
    assert_eq!(response["processed"], json!(2));
    assert_eq!(
        response["outcomes"][0]["actions"],
        json!(["FINISHED_BUT_TOO_OLD_FOR_RECENT"])
    );
    assert!(store.items(&tables.table(Model::RecentlyFinishedGame)).await.is_empty());

    let upcoming_rows = store.items(&tables.table(Model::UpcomingGame)).await;
    assert_eq!(upcoming_rows.len(), 1);
    assert_eq!(upcoming_rows[0]["venueName"], json!("The Star Poker Room"));

    let removed = dispatcher
        .dispatch_game_stream(&json!({"Records": [{
            "eventName": "REMOVE",
            "dynamodb": {"Keys": {"id": {"S": "G9"}}}
        }]}))
        .await;
    assert_eq!(removed["processed"], json!(1));
    assert!(store.items(&tables.table(Model::UpcomingGame)).await.is_empty());
}

//! Axum HTTP surface over the event dispatcher.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use kr_dispatch::{failure, Dispatcher, SyncRequest};
use kr_storage::{BackoffPolicy, MemoryStore, RetryingStore, TableNames};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "kr-web";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebConfig {
    pub port: u16,
    pub seed: Option<PathBuf>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self { port: 8000, seed: None }
    }
}

impl WebConfig {
    pub const PORT_VAR: &'static str = "KR_WEB_PORT";
    pub const SEED_VAR: &'static str = "KR_SEED_FILE";

    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: lookup(Self::PORT_VAR)
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            seed: lookup(Self::SEED_VAR).filter(|v| !v.is_empty()).map(PathBuf::from),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
        }
    }

    pub async fn from_config(config: &WebConfig) -> anyhow::Result<Self> {
        Ok(Self::new(seeded_dispatcher(config.seed.as_deref()).await?))
    }
}

/// In-memory store behind the throttling retry layer, optionally seeded.
pub async fn seeded_dispatcher(seed: Option<&Path>) -> anyhow::Result<Dispatcher> {
    let tables = TableNames::from_env();
    let store = MemoryStore::for_tables(&tables);
    if let Some(seed) = seed {
        let loaded = store.load_seed_file(&tables, seed).await?;
        info!(loaded, seed = %seed.display(), "seeded store");
    }
    let store = Arc::new(RetryingStore::new(store, BackoffPolicy::default()));
    Dispatcher::from_env(store)
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/invoke", post(invoke_handler))
        .route("/games/sync", post(sync_handler))
        .with_state(state)
}

pub async fn serve(config: WebConfig) -> anyhow::Result<()> {
    let state = AppState::from_config(&config).await?;
    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;
    info!(port = config.port, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    serve(WebConfig::from_env()).await
}

async fn healthz_handler() -> Json<Value> {
    Json(json!({ "status": "ok", "service": CRATE_NAME }))
}

async fn invoke_handler(State(state): State<AppState>, Json(event): Json<Value>) -> Json<Value> {
    Json(state.dispatcher.dispatch(&event).await)
}

async fn sync_handler(State(state): State<AppState>, Json(request): Json<SyncRequest>) -> Response {
    match state.dispatcher.sync_request(request).await {
        Ok(Some(outcome)) => Json(json!({ "success": true, "outcome": outcome })).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(failure("game not found"))).into_response(),
        Err(err) => server_error(err),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    error!(error = %format!("{err:#}"), "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(failure(format!("{err:#}")))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn test_app() -> Router {
        let seed = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            seed.path(),
            r#"{"Game": [{"id": "G1", "entityId": "E1", "venueId": "V1", "gameStatus": "SCHEDULED",
                 "gameStartDateTime": "2999-01-01T09:00:00.000Z"}]}"#,
        )
        .unwrap();
        let config = WebConfig {
            seed: Some(seed.path().to_path_buf()),
            ..Default::default()
        };
        app(AppState::from_config(&config).await.unwrap())
    }

    async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn config_reads_overrides() {
        let config = WebConfig::from_lookup(|var| match var {
            "KR_WEB_PORT" => Some("9100".into()),
            "KR_SEED_FILE" => Some("fixtures/seed.json".into()),
            _ => None,
        });
        assert_eq!(config.port, 9100);
        assert_eq!(config.seed, Some(PathBuf::from("fixtures/seed.json")));
        assert_eq!(WebConfig::from_lookup(|_| Some("nope".into())).port, 8000);
    }

    #[tokio::test]
    async fn healthz_ok() {
        let resp = test_app()
            .await
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn invoke_reports_ineligible_game_as_failure_body() {
        let (status, body) = post_json(test_app().await, "/invoke", json!({"gameId": "G1"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"], json!("not eligible: game status SCHEDULED is not matchable"));
    }

    #[tokio::test]
    async fn sync_projects_upcoming_game() {
        let (status, body) = post_json(test_app().await, "/games/sync", json!({"gameId": "G1"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"]["actions"], json!(["UPSERTED_UPCOMING"]));

        let (status, body) = post_json(test_app().await, "/games/sync", json!({"gameId": "G404"})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], json!(false));
    }
}

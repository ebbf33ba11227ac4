//! Axum route handlers for the request/response surface.
//!
//! # Routes
//!
//! - `GET  /health`: liveness check
//! - `GET  /api/info`: server and registry summary
//! - `GET  /openapi.json`: OpenAPI document for the current generation
//! - `POST /api/:bundle/:capability`: call a capability (direct result or `{"queue_id"}`)
//! - `POST /api/:bundle/:capability/queue`: poll a queued job with `{"queue_id"}`
//! - `GET  /api/jobs`: the caller's jobs, newest first
//! - `POST /mcp`: MCP JSON-RPC endpoint, when enabled

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::auth::ApiKeys;
use super::openapi::SchemaCache;
use crate::error::{ErrorEnvelope, NexusError};
use crate::nexus::Nexus;
use crate::queue::parse_job_id;

/// Title used in the OpenAPI document and `/api/info`.
pub const API_TITLE: &str = "Nexus Capability Server";

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub nexus: Nexus,
    pub keys: ApiKeys,
    /// OpenAPI document of the current generation.
    pub schema_cache: SchemaCache,
}

impl AppState {
    pub fn new(nexus: Nexus) -> Self {
        let keys = ApiKeys::from_config(&nexus.config().security);
        Self {
            nexus,
            keys,
            schema_cache: SchemaCache::new(),
        }
    }

    /// Turn an error into its HTTP response.
    pub fn reject(&self, err: NexusError) -> ApiError {
        if err.code() >= 500 {
            log::error!("Request failed: {}", err);
        } else {
            log::debug!("Request rejected: {}", err);
        }
        ApiError(self.nexus.envelope(&err))
    }
}

/// An error envelope sent with its own code as the HTTP status.
#[derive(Debug)]
pub struct ApiError(pub ErrorEnvelope);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.error).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.to_value())).into_response()
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/api/info", get(info_handler))
        .route("/openapi.json", get(openapi_handler))
        .route("/api/jobs", get(jobs_handler))
        .route("/api/:bundle/:capability", post(invoke_handler))
        .route("/api/:bundle/:capability/queue", post(poll_handler));
    if state.nexus.config().mcp_server.enabled {
        router = router.route("/mcp", post(crate::mcp::server::mcp_handler));
    }
    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /health: liveness check.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "nexus",
    }))
}

/// GET /api/info: generation id, capability keys and queue depth.
async fn info_handler(State(state): State<AppState>) -> impl IntoResponse {
    let generation = state.nexus.registry().current();
    let queue = state.nexus.queue();
    Json(json!({
        "title": API_TITLE,
        "version": crate::VERSION,
        "generation": generation.id(),
        "capabilities": generation.keys(),
        "queue": {
            "depth": queue.depth(),
            "capacity": queue.settings().max_queue_size,
            "workers": queue.settings().max_threads,
        },
        "authentication": state.keys.is_enabled(),
    }))
}

/// GET /openapi.json
async fn openapi_handler(State(state): State<AppState>) -> impl IntoResponse {
    let generation = state.nexus.registry().current();
    let doc = state
        .schema_cache
        .document(&generation, API_TITLE, crate::VERSION);
    Json((*doc).clone())
}

/// GET /api/jobs: the caller's jobs.
async fn jobs_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let owner = state.keys.authenticate(&headers).map_err(|e| state.reject(e))?;
    let jobs = state.nexus.queue().jobs_for_owner(&owner);
    Ok(Json(json!({ "jobs": jobs })))
}

/// POST /api/:bundle/:capability
///
/// Direct-mode capabilities answer with the result object; queued-mode ones
/// answer with `{"queue_id": ...}` immediately.
async fn invoke_handler(
    State(state): State<AppState>,
    Path((bundle, capability)): Path<(String, String)>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let owner = state.keys.authenticate(&headers).map_err(|e| state.reject(e))?;
    let Json(args) = body.map_err(|e| state.reject(NexusError::InvalidInput(e.body_text())))?;
    let key = format!("{}/{}", bundle, capability);
    let outcome = state
        .nexus
        .dispatcher()
        .invoke(&key, args, &owner)
        .await
        .map_err(|e| state.reject(e))?;
    Ok(Json(outcome.to_value()))
}

/// POST /api/:bundle/:capability/queue: poll with `{"queue_id": "<uuid>"}`.
///
/// Pending jobs echo the id; finished jobs return the result object or the
/// stored error envelope with its code as the HTTP status.
async fn poll_handler(
    State(state): State<AppState>,
    Path((bundle, capability)): Path<(String, String)>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let owner = state.keys.authenticate(&headers).map_err(|e| state.reject(e))?;
    let Json(request) = body.map_err(|e| state.reject(NexusError::InvalidInput(e.body_text())))?;
    let raw_id = request
        .get("queue_id")
        .and_then(Value::as_str)
        .ok_or_else(|| state.reject(NexusError::InvalidInput("queue_id is required".to_string())))?;
    let id = parse_job_id(raw_id).map_err(|e| state.reject(e))?;

    let queue = state.nexus.queue();
    let view = queue.poll(id, &owner).map_err(|e| state.reject(e))?;
    let key = format!("{}/{}", bundle, capability);
    if queue.job(id).map(|job| job.capability != key).unwrap_or(true) {
        return Err(state.reject(NexusError::JobNotFound(id.to_string())));
    }

    let status = StatusCode::from_u16(view.status_code()).unwrap_or(StatusCode::OK);
    Ok((status, Json(view.to_value())).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiKey;
    use crate::nexus::tests::{config_for, start};
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    fn post(uri: &str, body: Value, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json");
        if let Some(key) = key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let nexus = start(config_for(dir.path())).await;
        let app = app_router(AppState::new(nexus.clone()));

        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], crate::VERSION);
        nexus.shutdown().await;
    }

    #[tokio::test]
    async fn test_queued_submit_and_poll() {
        let dir = tempfile::tempdir().unwrap();
        let nexus = start(config_for(dir.path())).await;
        let app = app_router(AppState::new(nexus.clone()));

        let (status, json) = send(
            &app,
            post(
                "/api/text/summarize",
                json!({"text": "Alpha. Beta. Gamma.", "summary_length": 1}),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let queue_id = json["queue_id"].as_str().unwrap().to_string();

        let mut last = Value::Null;
        for _ in 0..250 {
            let (status, json) = send(
                &app,
                post("/api/text/summarize/queue", json!({"queue_id": queue_id}), None),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            last = json;
            if last.get("queue_id").is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(last, json!({"summary": "Alpha."}));
        nexus.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_capability_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let nexus = start(config_for(dir.path())).await;
        let app = app_router(AppState::new(nexus.clone()));

        let (status, json) = send(&app, post("/api/foo/bar", json!({}), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], 404);
        assert!(json["description"].as_str().unwrap().contains("foo/bar"));
        assert!(nexus.queue().is_empty());
        nexus.shutdown().await;
    }

    #[tokio::test]
    async fn test_validation_error_is_422() {
        let dir = tempfile::tempdir().unwrap();
        let nexus = start(config_for(dir.path())).await;
        let app = app_router(AppState::new(nexus.clone()));

        let (status, json) = send(
            &app,
            post("/api/text/summarize", json!({"text": "x", "summary_length": 50}), None),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["details"]["field"], "summary_length");
        nexus.shutdown().await;
    }

    #[tokio::test]
    async fn test_poll_requires_queue_id() {
        let dir = tempfile::tempdir().unwrap();
        let nexus = start(config_for(dir.path())).await;
        let app = app_router(AppState::new(nexus.clone()));

        let (status, _) = send(&app, post("/api/text/summarize/queue", json!({}), None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(
            &app,
            post("/api/text/summarize/queue", json!({"queue_id": "not-a-uuid"}), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        nexus.shutdown().await;
    }

    #[tokio::test]
    async fn test_auth_and_owner_isolation() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_for(dir.path());
        config.security.api_keys = vec![
            ApiKey { key: "key-a".into(), description: String::new() },
            ApiKey { key: "key-b".into(), description: String::new() },
        ];
        let nexus = start(config).await;
        let app = app_router(AppState::new(nexus.clone()));

        let (status, _) = send(&app, post("/api/text/summarize", json!({"text": "Hi."}), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (_, json) = send(
            &app,
            post("/api/text/summarize", json!({"text": "Hi."}), Some("key-a")),
        )
        .await;
        let queue_id = json["queue_id"].clone();

        let (status, _) = send(
            &app,
            post("/api/text/summarize/queue", json!({"queue_id": queue_id}), Some("key-b")),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .uri("/api/jobs")
            .header("Authorization", "Bearer key-a")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["jobs"].as_array().unwrap().len(), 1);
        nexus.shutdown().await;
    }

    #[tokio::test]
    async fn test_openapi_tracks_generation() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path());
        let apis = config.apiserver.apis_dirs[0].clone();
        let nexus = start(config).await;
        let state = AppState::new(nexus.clone());
        let app = app_router(state.clone());

        let get = || Request::builder().uri("/openapi.json").body(Body::empty()).unwrap();
        let (_, doc) = send(&app, get()).await;
        assert!(doc["paths"].get("/api/text/summarize").is_some());
        assert!(doc["paths"].get("/api/text/summarize/queue").is_some());

        std::fs::remove_dir_all(apis.join("text")).unwrap();
        nexus.supervisor().reload_now().await.unwrap();
        let (_, doc) = send(&app, get()).await;
        assert!(doc["paths"].get("/api/text/summarize").is_none());
        assert_eq!(
            state.schema_cache.cached_generation(),
            Some(nexus.registry().generation_id())
        );
        nexus.shutdown().await;
    }
}

//! HTTP proxy layer: axum router, route handlers, dispatch, and error
//! mapping.
//!
//! Exposes the upstream Copilot chat service under three wire-compatible
//! surfaces: OpenAI `/v1`, Anthropic `/v1/messages`, and Ollama `/api`.

pub mod chat;
pub mod commands;
pub mod dispatch;
mod error;
pub mod messages;
pub mod models;
pub mod ollama;
pub mod transforms;

pub use error::ApiError;
pub use transforms::{HeaderOverrides, Transform, TransformCtx, TransformRegistry};

use arc_swap::ArcSwap;
use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{Method, header},
    routing::{get, post},
};
use relay_auth::TokenResolver;
use relay_catalog::{MappingOverrides, ModelCatalog};
use relay_config::AppConfig;
use relay_store::ProfileStore;
use relay_upstream::CopilotClient;
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::{Any, CorsLayer}, trace::TraceLayer};

/// Maximum accepted JSON body size (~50 MB).
const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// Shared application state passed to all route handlers.
///
/// Every collaborator is constructed at startup and passed in explicitly;
/// nothing here is a global.
pub struct AppState {
    /// Server configuration, atomically swappable (in-chat `config set`).
    pub config: Arc<ArcSwap<AppConfig>>,
    pub store: Arc<ProfileStore>,
    pub resolver: Arc<TokenResolver>,
    pub catalog: Arc<ModelCatalog>,
    pub client: Arc<CopilotClient>,
    /// Session model mapping overrides; owned by this server instance and
    /// never persisted.
    pub mappings: Arc<MappingOverrides>,
    pub transforms: Arc<TransformRegistry>,
}

impl AppState {
    /// Creates the shared state wrapped in an `Arc`.
    #[must_use]
    pub fn new(
        config: Arc<ArcSwap<AppConfig>>,
        store: Arc<ProfileStore>,
        resolver: Arc<TokenResolver>,
        catalog: Arc<ModelCatalog>,
        client: Arc<CopilotClient>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            resolver,
            catalog,
            client,
            mappings: Arc::new(MappingOverrides::new()),
            transforms: Arc::new(TransformRegistry::new()),
        })
    }
}

/// Builds the full axum router.
///
/// Routes:
/// - `GET  /`                        liveness + endpoint map
/// - `GET  /v1/models`               OpenAI model list
/// - `POST /v1/chat/completions`     primary dispatch
/// - `POST /v1/completions`          legacy prompt-style, rewritten to chat
/// - `POST /v1/messages`             Anthropic-compatible dispatch
/// - `GET  /api/tags`                catalog as Ollama models
/// - `GET  /api/version`, `GET /api/health`  static stubs
/// - `POST /api/pull`                NDJSON three-step stub
/// - `POST /api/chat`, `POST /api/generate`  Ollama dispatch
pub fn make_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/", get(root))
        .route("/v1/models", get(models::list_models))
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/completions", post(chat::legacy_completions))
        .route("/v1/messages", post(messages::anthropic_messages))
        .route("/api/tags", get(ollama::tags))
        .route("/api/version", get(ollama::version))
        .route("/api/health", get(ollama::health))
        .route("/api/pull", post(ollama::pull))
        .route("/api/chat", post(ollama::chat))
        .route("/api/generate", post(ollama::generate))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Liveness and endpoint map.
async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "copilot-relay",
        "endpoints": {
            "openai": ["/v1/models", "/v1/chat/completions", "/v1/completions"],
            "anthropic": ["/v1/messages"],
            "ollama": [
                "/api/tags", "/api/version", "/api/health",
                "/api/pull", "/api/chat", "/api/generate"
            ]
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt as _;
    use serde_json::Value;
    use tower::ServiceExt as _;

    fn make_state(dir: &tempfile::TempDir, fallback: Option<&str>) -> Arc<AppState> {
        let root = dir.path().to_path_buf();
        let store = Arc::new(ProfileStore::new(root.clone()));
        let resolver = Arc::new(TokenResolver::new(
            Arc::clone(&store),
            rquest::Client::new(),
            fallback.map(ToString::to_string),
        ));
        // Dead upstream: routes that reach it fail fast with no retries.
        let client = Arc::new(
            CopilotClient::with_base_url(rquest::Client::new(), "http://127.0.0.1:1")
                .with_max_retries(0),
        );
        let catalog = Arc::new(ModelCatalog::new(root, Arc::clone(&client), 60_000));
        let config = Arc::new(ArcSwap::from_pointee(AppConfig::default()));
        AppState::new(config, store, resolver, catalog, client)
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_root_endpoint_map() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(make_state(&dir, None));
        let resp = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "ok");
        assert!(json["endpoints"]["openai"].is_array());
        assert!(json["endpoints"]["ollama"].is_array());
    }

    #[tokio::test]
    async fn test_models_without_token_is_401() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(make_state(&dir, None));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/v1/models")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(resp).await;
        assert_eq!(json["error"]["code"], "invalid_api_key");
    }

    #[tokio::test]
    async fn test_ollama_version_stub() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(make_state(&dir, None));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/version")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert!(json["version"].is_string());
    }

    #[tokio::test]
    async fn test_ollama_pull_stub_ndjson() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(make_state(&dir, None));
        let resp = app
            .oneshot(post_json("/api/pull", &serde_json::json!({"name": "gpt-4"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let lines: Vec<&str> = std::str::from_utf8(&bytes)
            .unwrap()
            .lines()
            .collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("pulling manifest"));
        assert!(lines[2].contains("success"));
    }

    #[tokio::test]
    async fn test_openai_chat_anonymous_stub() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(make_state(&dir, None));
        let body = serde_json::json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}]
        });
        let resp = app
            .oneshot(post_json("/v1/chat/completions", &body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        let content = json["choices"][0]["message"]["content"].as_str().unwrap();
        assert!(content.contains("No credentials configured"));
    }

    #[tokio::test]
    async fn test_anthropic_without_token_is_401() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(make_state(&dir, None));
        let body = serde_json::json!({
            "model": "claude-3-opus-20240229",
            "max_tokens": 16,
            "messages": [{"role": "user", "content": "hi"}]
        });
        let resp = app.oneshot(post_json("/v1/messages", &body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(resp).await;
        assert_eq!(json["error"]["code"], "invalid_api_key");
    }

    #[tokio::test]
    async fn test_anthropic_streaming_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(make_state(&dir, Some("ghu_token")));
        let body = serde_json::json!({
            "model": "claude-3-opus-20240229",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}]
        });
        let resp = app.oneshot(post_json("/v1/messages", &body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert_eq!(json["error"]["type"], "invalid_request_error");
    }

    #[tokio::test]
    async fn test_openai_chat_missing_messages_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(make_state(&dir, Some("ghu_token")));
        let body = serde_json::json!({"model": "gpt-4"});
        let resp = app
            .oneshot(post_json("/v1/chat/completions", &body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_in_chat_models_command_without_token() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(make_state(&dir, None));
        let body = serde_json::json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "::models"}]
        });
        let resp = app
            .oneshot(post_json("/v1/chat/completions", &body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        let content = json["choices"][0]["message"]["content"].as_str().unwrap();
        assert!(content.starts_with("No token available"));
        assert!(content.contains("login"));
    }

    #[tokio::test]
    async fn test_in_chat_help_command() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(make_state(&dir, None));
        let body = serde_json::json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "::help"}]
        });
        let resp = app
            .oneshot(post_json("/v1/chat/completions", &body))
            .await
            .unwrap();
        let json = body_json(resp).await;
        let content = json["choices"][0]["message"]["content"].as_str().unwrap();
        assert!(content.contains("set-model"));
        assert!(content.contains("reset-models"));
    }

    #[tokio::test]
    async fn test_in_chat_set_model_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let state = make_state(&dir, None);
        let app = make_router(Arc::clone(&state));

        let body = serde_json::json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "::set-model [claude-3-opus-20240229] gpt-5"}]
        });
        let resp = app
            .oneshot(post_json("/v1/chat/completions", &body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.mappings.resolve("claude-3-opus-20240229"), "gpt-5");
    }

    #[tokio::test]
    async fn test_in_chat_config_list() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(make_state(&dir, None));
        let body = serde_json::json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "::config"}]
        });
        let resp = app
            .oneshot(post_json("/v1/chat/completions", &body))
            .await
            .unwrap();
        let json = body_json(resp).await;
        let content = json["choices"][0]["message"]["content"].as_str().unwrap();
        assert!(content.contains("model.default = gpt-4.1"));
        assert!(content.contains("port = 3000"));
    }

    #[tokio::test]
    async fn test_in_chat_config_set_persists() {
        let dir = tempfile::tempdir().unwrap();
        let state = make_state(&dir, None);
        let app = make_router(Arc::clone(&state));
        let body = serde_json::json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "::config set model.default gpt-4o"}]
        });
        let resp = app
            .oneshot(post_json("/v1/chat/completions", &body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.config.load().model.default, "gpt-4o");
        let written = std::fs::read_to_string(dir.path().join("config.json")).unwrap();
        assert!(written.contains("gpt-4o"));
    }

    #[tokio::test]
    async fn test_ollama_generate_anonymous_stub() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(make_state(&dir, None));
        let body = serde_json::json!({"model": "gpt-4", "prompt": "hello"});
        let resp = app.oneshot(post_json("/api/generate", &body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["done"], true);
        assert!(json["response"].as_str().unwrap().contains("No credentials"));
    }

    #[tokio::test]
    async fn test_ollama_tags_without_token_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(make_state(&dir, None));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/tags")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["models"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_unknown_command_hint() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_router(make_state(&dir, None));
        let body = serde_json::json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "::frobnicate"}]
        });
        let resp = app
            .oneshot(post_json("/v1/chat/completions", &body))
            .await
            .unwrap();
        let json = body_json(resp).await;
        let content = json["choices"][0]["message"]["content"].as_str().unwrap();
        assert!(content.contains("Unknown in-chat command"));
    }
}

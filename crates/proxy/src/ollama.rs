//! Ollama-compatible handlers: chat, generate, tags, and static stubs.

use crate::{
    AppState, commands,
    dispatch::{self, DispatchRequest},
    error::ApiError,
};
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use relay_translate::{OllamaMode, ollama as shapes};
use relay_types::{InboundSchema, ModelDescriptor};
use serde_json::{Value, json};
use std::sync::Arc;

/// Handles `POST /api/chat`.
///
/// # Errors
///
/// Returns [`ApiError`] in the Ollama string envelope.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let payload = shapes::normalize_chat(&body)
        .map_err(|e| ApiError::new(InboundSchema::Ollama, e))?;
    run(state, headers, body, payload, OllamaMode::Chat).await
}

/// Handles `POST /api/generate`.
///
/// # Errors
///
/// Returns [`ApiError`] in the Ollama string envelope.
pub async fn generate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let payload = shapes::normalize_generate(&body)
        .map_err(|e| ApiError::new(InboundSchema::Ollama, e))?;
    run(state, headers, body, payload, OllamaMode::Generate).await
}

async fn run(
    state: Arc<AppState>,
    headers: HeaderMap,
    body: Value,
    payload: Value,
    mode: OllamaMode,
) -> Result<Response, ApiError> {
    let requested = body
        .get("model")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let stream = payload.get("stream").and_then(Value::as_bool).unwrap_or(false);

    let config = state.config.load();
    if let Some(text) = commands::extract_command_text(&body)
        && let Some(cmd) = commands::parse_command(&config.triggers, &text)
    {
        let reply = commands::execute(&state, &headers, &cmd).await;
        let model = requested.as_deref().unwrap_or(&config.model.default);
        return Ok(commands::render_reply(
            InboundSchema::Ollama,
            Some(mode),
            stream,
            model,
            &reply,
        ));
    }
    drop(config);

    dispatch::dispatch(
        &state,
        &headers,
        DispatchRequest {
            schema: InboundSchema::Ollama,
            mode: Some(mode),
            client_model: requested.clone(),
            selector_model: requested,
            payload,
            stream,
        },
    )
    .await
}

/// Handles `GET /api/tags`: the catalog translated to Ollama `models[]`.
pub async fn tags(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let header_token = dispatch::bearer_token(&headers);
    let Some(token) = state.resolver.resolve(header_token.as_deref(), false).await else {
        return Json(json!({"models": []})).into_response();
    };

    let models = catalog_descriptors(&state, &token).await;
    Json(shapes::tags_response(&models)).into_response()
}

/// Handles `GET /api/version`.
pub async fn version() -> Json<Value> {
    Json(json!({"version": "0.5.1"}))
}

/// Handles `GET /api/health`.
pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// Handles `POST /api/pull` with the three-event NDJSON stub.
pub async fn pull() -> Response {
    let body = [
        json!({"status": "pulling manifest"}),
        json!({"status": "downloading"}),
        json!({"status": "success"}),
    ]
    .iter()
    .map(|v| format!("{v}\n"))
    .collect::<String>();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Working-model descriptors for the active profile, refreshing a cold
/// catalog without verification.
pub(crate) async fn catalog_descriptors(
    state: &Arc<AppState>,
    token: &str,
) -> Vec<ModelDescriptor> {
    let Ok(Some(profile_id)) = state.store.get_active() else {
        // No profile: fall back to a direct listing.
        return state.client.list_models(token).await.unwrap_or_default();
    };

    let view = match state.catalog.get_entry(&profile_id) {
        Some(view) => view,
        None => {
            state
                .catalog
                .refresh(relay_catalog::RefreshOptions::unverified(&profile_id, token))
                .await
        }
    };

    if view.entry.raw_models.is_empty() {
        view.entry
            .models
            .iter()
            .map(|id| ModelDescriptor::new(id.clone()))
            .collect()
    } else if view.entry.stats.validated {
        view.entry
            .raw_models
            .iter()
            .filter(|m| view.entry.models.contains(&m.id))
            .cloned()
            .collect()
    } else {
        view.entry.raw_models.clone()
    }
}

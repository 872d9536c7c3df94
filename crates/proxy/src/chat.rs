//! OpenAI-compatible chat completion handlers.

use crate::{
    AppState, commands,
    dispatch::{self, DispatchRequest},
    error::ApiError,
};
use axum::{Json, extract::State, http::HeaderMap, response::Response};
use relay_types::InboundSchema;
use serde_json::Value;
use std::sync::Arc;

/// Handles `POST /v1/chat/completions`.
///
/// # Errors
///
/// Returns [`ApiError`] in the OpenAI envelope for invalid bodies, missing
/// credentials, and upstream failures.
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let payload = relay_translate::openai::normalize_chat_request(&body)
        .map_err(ApiError::openai)?;
    run(state, headers, body, payload).await
}

/// Handles `POST /v1/completions` by rewriting the legacy prompt body into
/// chat shape and sharing the chat path.
///
/// # Errors
///
/// Returns [`ApiError`] in the OpenAI envelope.
pub async fn legacy_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let payload = relay_translate::openai::prompt_to_chat(&body).map_err(ApiError::openai)?;
    run(state, headers, body, payload).await
}

async fn run(
    state: Arc<AppState>,
    headers: HeaderMap,
    body: Value,
    payload: Value,
) -> Result<Response, ApiError> {
    let requested = body
        .get("model")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let stream = payload.get("stream").and_then(Value::as_bool).unwrap_or(false);

    // In-chat commands short-circuit before any credential work.
    let config = state.config.load();
    if let Some(text) = commands::extract_command_text(&payload)
        && let Some(cmd) = commands::parse_command(&config.triggers, &text)
    {
        let reply = commands::execute(&state, &headers, &cmd).await;
        let model = requested.as_deref().unwrap_or(&config.model.default);
        return Ok(commands::render_reply(
            InboundSchema::OpenAi,
            None,
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
            schema: InboundSchema::OpenAi,
            mode: None,
            client_model: requested.clone(),
            selector_model: requested,
            payload,
            stream,
        },
    )
    .await
}

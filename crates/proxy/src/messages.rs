//! Anthropic Messages API handler.
//!
//! Accepts the Anthropic `/v1/messages` shape, translates it onto the
//! upstream chat completion payload, and renders the reply back as an
//! Anthropic `message`. The client's model name is mapped to an upstream id
//! through the session/built-in overrides but echoed unchanged in the
//! response.

use crate::{
    AppState, commands,
    dispatch::{self, DispatchRequest},
    error::ApiError,
};
use axum::{Json, extract::State, http::HeaderMap, response::Response};
use relay_types::InboundSchema;
use serde_json::Value;
use std::sync::Arc;

/// Handles `POST /v1/messages`.
///
/// # Errors
///
/// Returns [`ApiError`] in the Anthropic envelope; streaming requests are
/// rejected as `invalid_request_error`.
pub async fn anthropic_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    // Commands are answered locally even when the rest of the body would
    // not normalize (e.g. a streaming flag).
    let config = state.config.load();
    if let Some(text) = commands::extract_command_text(&body)
        && let Some(cmd) = commands::parse_command(&config.triggers, &text)
    {
        let reply = commands::execute(&state, &headers, &cmd).await;
        let model = body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&config.model.default)
            .to_string();
        return Ok(commands::render_reply(
            InboundSchema::Anthropic,
            None,
            false,
            &model,
            &reply,
        ));
    }
    drop(config);

    let request = relay_translate::anthropic::normalize_messages_request(&body)
        .map_err(|e| ApiError::new(InboundSchema::Anthropic, e))?;

    let mapped = state.mappings.resolve(&request.requested_model);
    dispatch::dispatch(
        &state,
        &headers,
        DispatchRequest {
            schema: InboundSchema::Anthropic,
            mode: None,
            client_model: Some(request.requested_model),
            selector_model: Some(mapped),
            payload: request.payload,
            stream: false,
        },
    )
    .await
}

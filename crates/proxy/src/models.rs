//! OpenAI model listing handler.

use crate::{AppState, dispatch, error::ApiError, ollama};
use axum::{Json, extract::State, http::HeaderMap};
use relay_types::{InboundSchema, RelayError};
use serde_json::{Value, json};
use std::sync::Arc;

/// Handles `GET /v1/models`: the active profile's catalog as an OpenAI
/// model list.
///
/// # Errors
///
/// Returns `401` when no credential resolves.
pub async fn list_models(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let header_token = dispatch::bearer_token(&headers);
    let token = state
        .resolver
        .resolve(header_token.as_deref(), false)
        .await
        .ok_or_else(|| ApiError::new(InboundSchema::OpenAi, RelayError::MissingCredentials))?;

    let descriptors = ollama::catalog_descriptors(&state, &token).await;
    let data: Vec<Value> = descriptors
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "object": m.object,
                "created": m.created,
                "owned_by": m.owned_by,
            })
        })
        .collect();
    Ok(Json(json!({"object": "list", "data": data})))
}

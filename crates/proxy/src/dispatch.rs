//! Per-request chat dispatch: credential resolution, model selection,
//! the upstream call with refresh-on-401, and response forwarding.

use crate::{AppState, error::ApiError};
use axum::{
    Json,
    body::Body,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use eventsource_stream::Eventsource as _;
use futures_util::StreamExt as _;
use relay_catalog::select_model;
use relay_translate::{OllamaMode, OllamaStreamState, anthropic, ollama, openai};
use relay_types::{InboundSchema, RelayError, redact};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Fixed reply served on anonymous-allowed routes when no credential
/// resolves.
pub const ANONYMOUS_NOTICE: &str = "No credentials configured. Run `copilot-relay login` to \
     authenticate with GitHub Copilot, or pass a Copilot token in the Authorization header.";

/// One normalized chat request ready for dispatch.
pub struct DispatchRequest {
    pub schema: InboundSchema,
    /// Set for Ollama routes; decides the outbound chunk shape.
    pub mode: Option<OllamaMode>,
    /// The model name as the client sent it, echoed back on derived schemas.
    pub client_model: Option<String>,
    /// The name fed to the selector (mapping overrides already applied).
    pub selector_model: Option<String>,
    /// Upstream payload; `model` is filled here after selection.
    pub payload: Value,
    pub stream: bool,
}

/// Extracts the bearer value of the `Authorization` header, if any.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(|v| v.trim().to_string())
}

/// Runs the full request lifecycle and shapes the response.
///
/// # Errors
///
/// Returns [`ApiError`] in the request's schema envelope for every failure
/// mode described in the error table.
pub async fn dispatch(
    state: &Arc<AppState>,
    headers: &HeaderMap,
    mut req: DispatchRequest,
) -> Result<Response, ApiError> {
    let config = state.config.load();
    let verbosity = config.log.verbosity;
    let started = std::time::Instant::now();

    if verbosity >= 1 {
        tracing::info!(
            schema = %req.schema,
            model = req.client_model.as_deref().unwrap_or("-"),
            stream = req.stream,
            "chat request"
        );
    }
    if verbosity >= 3 {
        let auth = bearer_token(headers).map(|t| redact(&t));
        tracing::debug!(
            body = %req.payload,
            authorization = auth.as_deref().unwrap_or("-"),
            "request body"
        );
    }

    // Credential resolution; anonymous-allowed schemas get a stub instead
    // of a 401.
    let header_token = bearer_token(headers);
    let token = match state.resolver.resolve(header_token.as_deref(), false).await {
        Some(t) => t,
        None => {
            if req.schema.allows_anonymous() {
                return Ok(anonymous_response(&req));
            }
            match state.resolver.resolve(None, true).await {
                Some(t) => t,
                None => return Err(ApiError::new(req.schema, RelayError::MissingCredentials)),
            }
        }
    };

    let profile_id = state.store.get_active().ok().flatten();
    let selection = select_model(
        &state.catalog,
        profile_id.as_deref(),
        Some(&token),
        req.selector_model.as_deref(),
        &config.model.default,
    )
    .await;
    if selection.fallback && verbosity >= 1 {
        tracing::info!(
            requested = req.selector_model.as_deref().unwrap_or("-"),
            selected = %selection.model,
            source = ?selection.source,
            refreshed = selection.refreshed,
            "model fallback"
        );
    }
    req.payload["model"] = Value::String(selection.model.clone());

    // Request-side transforms may rewrite the payload and contribute
    // outbound header overrides, merged after the client's fixed set.
    let header_overrides = if config.transforms.enabled {
        state.transforms.apply_request(
            &config.transforms,
            req.schema.route_key(),
            &mut req.payload,
        )
    } else {
        crate::transforms::HeaderOverrides::new()
    };
    let extra_headers = (!header_overrides.is_empty()).then_some(header_overrides.as_slice());

    // The guard trips the token when the handler future is dropped, which
    // is how an inbound disconnect reaches the in-flight upstream call.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let resp = match state
        .client
        .post_chat_completion(&token, &req.payload, extra_headers, Some(&cancel))
        .await
    {
        Ok(resp) => resp,
        Err(RelayError::Upstream { status: 401, body }) => {
            tracing::info!("upstream 401, attempting token refresh");
            let retried = match state.resolver.refresh().await {
                Some(new_token) if new_token != token => Some(
                    state
                        .client
                        .post_chat_completion(&new_token, &req.payload, extra_headers, Some(&cancel))
                        .await,
                ),
                _ => None,
            };
            match retried {
                Some(Ok(resp)) => resp,
                Some(Err(e)) => return Err(ApiError::new(req.schema, e)),
                None => {
                    return Err(ApiError::new(
                        req.schema,
                        RelayError::Upstream { status: 401, body },
                    ));
                }
            }
        }
        Err(e) => return Err(ApiError::new(req.schema, e)),
    };

    forward_response(state, &req, resp, &selection.model, started).await
}

/// Shapes the upstream response for the inbound schema.
async fn forward_response(
    state: &Arc<AppState>,
    req: &DispatchRequest,
    resp: rquest::Response,
    selected_model: &str,
    started: std::time::Instant,
) -> Result<Response, ApiError> {
    let response_model = req.client_model.clone().unwrap_or_else(|| selected_model.to_string());

    if req.stream {
        return match req.schema {
            InboundSchema::OpenAi => Ok(sse_passthrough(resp)),
            InboundSchema::Ollama => Ok(ollama_stream(
                resp,
                req.mode.unwrap_or(OllamaMode::Chat),
                &response_model,
            )),
            // Streaming Anthropic requests are rejected during
            // normalization and cannot reach this point.
            InboundSchema::Anthropic => Err(ApiError::new(
                req.schema,
                RelayError::InvalidRequest("streaming unsupported".into()),
            )),
        };
    }

    let mut json: Value = resp
        .json()
        .await
        .map_err(|e| ApiError::new(req.schema, RelayError::Parse(e.to_string())))?;

    let config = state.config.load();
    if config.transforms.enabled {
        state
            .transforms
            .apply_response(&config.transforms, req.schema.route_key(), &mut json);
    }

    let shaped = match req.schema {
        InboundSchema::OpenAi => openai::fill_response_defaults(json, selected_model),
        InboundSchema::Anthropic => anthropic::render_message_response(&json, &response_model),
        InboundSchema::Ollama => {
            let text = openai::first_choice_text(&json);
            let finish = json
                .pointer("/choices/0/finish_reason")
                .and_then(Value::as_str);
            let done_reason = if finish == Some("length") { "length" } else { "stop" };
            let elapsed_ns =
                u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
            ollama::done_chunk(
                req.mode.unwrap_or(OllamaMode::Chat),
                &response_model,
                &text,
                done_reason,
                elapsed_ns,
            )
        }
    };
    Ok(Json(shaped).into_response())
}

/// Forwards upstream SSE bytes unchanged.
fn sse_passthrough(resp: rquest::Response) -> Response {
    let stream = resp
        .bytes_stream()
        .map(|r| r.map_err(|e| std::io::Error::other(e.to_string())));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Translates upstream SSE into newline-delimited Ollama JSON chunks.
fn ollama_stream(resp: rquest::Response, mode: OllamaMode, model: &str) -> Response {
    let machine = OllamaStreamState::new(mode, model);
    let ndjson = resp
        .bytes_stream()
        .eventsource()
        .map(Some)
        // Sentinel marking physical end-of-stream so the final chunk flushes
        // even when upstream never sent [DONE].
        .chain(futures_util::stream::once(async { None }))
        .scan(machine, |machine, item| {
            let out = match item {
                Some(Ok(event)) => match machine.push_data(&event.data) {
                    Some(chunk) => Some(chunk),
                    None if machine.is_done() && !machine.is_finished() => Some(machine.finish()),
                    None => None,
                },
                Some(Err(_)) => None,
                None if !machine.is_finished() => Some(machine.finish()),
                None => None,
            };
            futures_util::future::ready(Some(out))
        })
        .filter_map(futures_util::future::ready)
        .map(|chunk| Ok::<_, std::io::Error>(bytes::Bytes::from(format!("{chunk}\n"))));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(ndjson))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Builds the stubbed assistant reply for anonymous-mode routes.
fn anonymous_response(req: &DispatchRequest) -> Response {
    let model = req
        .client_model
        .clone()
        .unwrap_or_else(|| "copilot".to_string());
    match (req.schema, req.stream) {
        (InboundSchema::OpenAi, false) => {
            Json(openai::local_completion(&model, ANONYMOUS_NOTICE)).into_response()
        }
        (InboundSchema::OpenAi, true) => {
            let body = openai::local_completion_sse(&model, ANONYMOUS_NOTICE);
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/event-stream")
                .header(header::CACHE_CONTROL, "no-cache")
                .body(Body::from(body))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        (_, stream) => {
            let mode = req.mode.unwrap_or(OllamaMode::Chat);
            let chunk = ollama::done_chunk(mode, &model, ANONYMOUS_NOTICE, "stop", 0);
            if stream {
                Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "application/x-ndjson")
                    .body(Body::from(format!("{chunk}\n")))
                    .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
            } else {
                Json(chunk).into_response()
            }
        }
    }
}

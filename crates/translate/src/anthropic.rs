//! Anthropic Messages API shape: request normalization into the upstream
//! chat completion payload, and response rendering back into a `message`.

use crate::openai;
use relay_types::{RelayError, Result};
use serde_json::{Value, json};

/// Normalizes `content` to a plain string: strings pass through, arrays of
/// blocks join their text with `\n` (non-text blocks contribute empty
/// strings).
#[must_use]
pub fn content_to_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .map(|b| {
                if b.get("type").and_then(Value::as_str) == Some("text") {
                    b.get("text").and_then(Value::as_str).unwrap_or_default()
                } else {
                    ""
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// The normalized outcome of an Anthropic request.
#[derive(Debug)]
pub struct MessagesRequest {
    /// The Anthropic model name as requested; retained for the response.
    pub requested_model: String,
    /// Upstream payload, `model` not yet decided.
    pub payload: Value,
}

/// Builds the upstream payload from an Anthropic `/v1/messages` body.
///
/// The optional `system` field becomes the leading `system` message; each
/// inbound message keeps its role with content flattened to a string. An
/// absent or empty `messages` promotes `prompt` or `input` to a single
/// `user` message.
///
/// # Errors
///
/// Returns [`RelayError::InvalidRequest`] when streaming is requested, or
/// when neither messages nor a prompt are present.
pub fn normalize_messages_request(body: &Value) -> Result<MessagesRequest> {
    if body.get("stream").and_then(Value::as_bool) == Some(true) {
        return Err(RelayError::InvalidRequest(
            "streaming is not supported on the Anthropic route".into(),
        ));
    }

    let requested_model = body
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    let mut messages: Vec<Value> = Vec::new();
    if let Some(system) = body.get("system")
        && !system.is_null()
    {
        let text = content_to_text(system);
        if !text.is_empty() {
            messages.push(json!({"role": "system", "content": text}));
        }
    }

    let inbound = body.get("messages").and_then(Value::as_array);
    match inbound {
        Some(list) if !list.is_empty() => {
            for m in list {
                let role = m.get("role").and_then(Value::as_str).unwrap_or("user");
                let content = content_to_text(m.get("content").unwrap_or(&Value::Null));
                messages.push(json!({"role": role, "content": content}));
            }
        }
        _ => {
            let prompt = body
                .get("prompt")
                .or_else(|| body.get("input"))
                .and_then(Value::as_str);
            match prompt {
                Some(p) => messages.push(json!({"role": "user", "content": p})),
                None => {
                    return Err(RelayError::InvalidRequest(
                        "messages must not be empty".into(),
                    ));
                }
            }
        }
    }

    let payload = json!({
        "messages": messages,
        "max_tokens": body.get("max_tokens").and_then(Value::as_u64)
            .unwrap_or(openai::DEFAULT_MAX_TOKENS),
        "temperature": body.get("temperature").and_then(Value::as_f64)
            .unwrap_or(openai::DEFAULT_TEMPERATURE),
        "stream": false,
    });

    Ok(MessagesRequest {
        requested_model,
        payload,
    })
}

/// Maps an upstream `finish_reason` to an Anthropic `stop_reason`.
fn stop_reason(finish_reason: Option<&str>) -> Value {
    match finish_reason {
        Some("length") => json!("max_tokens"),
        Some(_) => json!("end_turn"),
        None => Value::Null,
    }
}

/// Renders the upstream chat completion as an Anthropic message. The
/// outbound `model` is the name the client asked for, not the upstream id.
#[must_use]
pub fn render_message_response(upstream: &Value, requested_model: &str) -> Value {
    let text = openai::first_choice_text(upstream);
    let finish = upstream
        .pointer("/choices/0/finish_reason")
        .and_then(Value::as_str);

    let id = upstream
        .get("id")
        .and_then(Value::as_str)
        .map_or_else(
            || format!("msg_{}", uuid::Uuid::new_v4().simple()),
            ToString::to_string,
        );

    let mut out = json!({
        "id": id,
        "type": "message",
        "role": "assistant",
        "model": requested_model,
        "content": [{"type": "text", "text": text}],
        "stop_reason": stop_reason(finish),
    });

    if let Some(usage) = upstream.get("usage") {
        out["usage"] = json!({
            "input_tokens": usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
            "output_tokens": usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0),
        });
    }
    out
}

/// Renders locally produced assistant text as an Anthropic message.
#[must_use]
pub fn wrap_text(requested_model: &str, text: &str) -> Value {
    json!({
        "id": format!("msg_{}", uuid::Uuid::new_v4().simple()),
        "type": "message",
        "role": "assistant",
        "model": requested_model,
        "content": [{"type": "text", "text": text}],
        "stop_reason": "end_turn",
    })
}

//! OpenAI chat completion shape: normalization, legacy prompt rewriting,
//! and local response rendering.

use relay_types::{RelayError, Result};
use serde_json::{Value, json};

/// Default sampling temperature when the request omits one.
pub const DEFAULT_TEMPERATURE: f64 = 0.1;
/// Default completion budget when the request omits one.
pub const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Fields forwarded verbatim to upstream; everything else rides along via
/// the passthrough clone.
const STANDARD_FIELDS: &[&str] = &[
    "messages",
    "model",
    "temperature",
    "max_tokens",
    "stream",
    "top_p",
    "n",
    "stop",
    "presence_penalty",
    "frequency_penalty",
    "logit_bias",
    "user",
];

/// Normalizes an inbound OpenAI chat request into the upstream payload.
///
/// The inbound and upstream shapes are congruent, so the body passes
/// through with defaults filled for `temperature`, `max_tokens`, and
/// `stream`. Unknown fields are preserved.
///
/// # Errors
///
/// Returns [`RelayError::InvalidRequest`] when the body is not an object or
/// `messages` is missing.
pub fn normalize_chat_request(body: &Value) -> Result<Value> {
    let Some(obj) = body.as_object() else {
        return Err(RelayError::InvalidRequest("body must be a JSON object".into()));
    };
    if !obj.get("messages").is_some_and(Value::is_array) {
        return Err(RelayError::InvalidRequest("messages must be an array".into()));
    }

    let mut out = body.clone();
    if out.get("temperature").is_none() {
        out["temperature"] = json!(DEFAULT_TEMPERATURE);
    }
    if out.get("max_tokens").is_none() {
        out["max_tokens"] = json!(DEFAULT_MAX_TOKENS);
    }
    if out.get("stream").is_none() {
        out["stream"] = json!(false);
    }
    Ok(out)
}

/// Whether any non-standard fields survived the passthrough.
#[must_use]
pub fn has_extra_fields(body: &Value) -> bool {
    body.as_object()
        .is_some_and(|obj| obj.keys().any(|k| !STANDARD_FIELDS.contains(&k.as_str())))
}

/// Rewrites a legacy `/v1/completions` body into chat shape: the `prompt`
/// becomes a single `user` message.
///
/// # Errors
///
/// Returns [`RelayError::InvalidRequest`] when the body is not an object or
/// carries no prompt.
pub fn prompt_to_chat(body: &Value) -> Result<Value> {
    let Some(obj) = body.as_object() else {
        return Err(RelayError::InvalidRequest("body must be a JSON object".into()));
    };
    let prompt = match obj.get("prompt") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("\n"),
        _ => return Err(RelayError::InvalidRequest("prompt is required".into())),
    };

    let mut out = body.clone();
    if let Some(map) = out.as_object_mut() {
        map.remove("prompt");
        map.insert(
            "messages".into(),
            json!([{"role": "user", "content": prompt}]),
        );
    }
    normalize_chat_request(&out)
}

/// Fills `{object, model, created}` on an upstream response that omitted
/// them.
#[must_use]
pub fn fill_response_defaults(mut resp: Value, model: &str) -> Value {
    if let Some(obj) = resp.as_object_mut() {
        obj.entry("object").or_insert_with(|| json!("chat.completion"));
        obj.entry("model").or_insert_with(|| json!(model));
        obj.entry("created")
            .or_insert_with(|| json!(chrono::Utc::now().timestamp()));
    }
    resp
}

/// Renders a locally produced assistant message as a full chat completion.
#[must_use]
pub fn local_completion(model: &str, text: &str) -> Value {
    json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0}
    })
}

/// Renders a locally produced assistant message as an SSE body: one content
/// chunk, one finish chunk, then `[DONE]`.
#[must_use]
pub fn local_completion_sse(model: &str, text: &str) -> String {
    let id = format!("chatcmpl-{}", uuid::Uuid::new_v4().simple());
    let created = chrono::Utc::now().timestamp();
    let content_chunk = json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{"index": 0, "delta": {"role": "assistant", "content": text}}]
    });
    let finish_chunk = json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
    });
    format!("data: {content_chunk}\n\ndata: {finish_chunk}\n\ndata: [DONE]\n\n")
}

/// Extracts the assistant text of the first choice of an upstream response.
#[must_use]
pub fn first_choice_text(resp: &Value) -> String {
    let content = resp
        .pointer("/choices/0/message/content")
        .unwrap_or(&Value::Null);
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

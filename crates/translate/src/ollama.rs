//! Ollama `/api/chat` and `/api/generate` shapes.

use crate::openai;
use relay_types::{ModelDescriptor, RelayError, Result};
use serde_json::{Value, json};

/// Which Ollama endpoint the request arrived on; decides whether chunks
/// carry `message` or `response`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OllamaMode {
    Chat,
    Generate,
}

/// Tolerant content extraction: plain strings, arrays of `{text}` blocks,
/// and objects with a `text` or `content` field all yield their text.
#[must_use]
pub fn message_content(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .map(message_content)
            .collect::<Vec<_>>()
            .join(""),
        Value::Object(obj) => obj
            .get("text")
            .or_else(|| obj.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

/// Merges a numeric parameter from the body or its `options` counterpart.
fn merged_u64(body: &Value, key: &str, options_key: &str) -> Option<u64> {
    body.get(key)
        .and_then(Value::as_u64)
        .or_else(|| body.pointer(&format!("/options/{options_key}")).and_then(Value::as_u64))
}

fn merged_f64(body: &Value, key: &str, options_key: &str) -> Option<f64> {
    body.get(key)
        .and_then(Value::as_f64)
        .or_else(|| body.pointer(&format!("/options/{options_key}")).and_then(Value::as_f64))
}

/// Shared parameter block appended to both chat and generate payloads.
fn apply_params(payload: &mut Value, body: &Value) {
    payload["max_tokens"] =
        json!(merged_u64(body, "max_tokens", "num_predict").unwrap_or(openai::DEFAULT_MAX_TOKENS));
    payload["temperature"] =
        json!(merged_f64(body, "temperature", "temperature").unwrap_or(openai::DEFAULT_TEMPERATURE));
    if let Some(v) = merged_f64(body, "top_p", "top_p") {
        payload["top_p"] = json!(v);
    }
    if let Some(v) = merged_f64(body, "presence_penalty", "presence_penalty") {
        payload["presence_penalty"] = json!(v);
    }
    if let Some(v) = merged_f64(body, "frequency_penalty", "frequency_penalty") {
        payload["frequency_penalty"] = json!(v);
    }
}

/// Normalizes an `/api/chat` body into the upstream payload.
///
/// # Errors
///
/// Returns [`RelayError::InvalidRequest`] when `messages` is missing.
pub fn normalize_chat(body: &Value) -> Result<Value> {
    let inbound = body
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| RelayError::InvalidRequest("messages must be an array".into()))?;

    let messages: Vec<Value> = inbound
        .iter()
        .map(|m| {
            let role = m.get("role").and_then(Value::as_str).unwrap_or("user");
            let content = message_content(m.get("content").unwrap_or(&Value::Null));
            json!({"role": role, "content": content})
        })
        .collect();

    let mut payload = json!({
        "messages": messages,
        "stream": body.get("stream").and_then(Value::as_bool).unwrap_or(false),
    });
    apply_params(&mut payload, body);
    Ok(payload)
}

/// Normalizes an `/api/generate` body by synthesizing a chat: optional
/// `system` and `template` lead as `system` messages, then the `prompt` as a
/// single `user` message.
///
/// # Errors
///
/// Returns [`RelayError::InvalidRequest`] when `prompt` is missing.
pub fn normalize_generate(body: &Value) -> Result<Value> {
    let prompt = body
        .get("prompt")
        .map(message_content)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RelayError::InvalidRequest("prompt is required".into()))?;

    let mut messages: Vec<Value> = Vec::new();
    for key in ["system", "template"] {
        if let Some(v) = body.get(key) {
            let text = message_content(v);
            if !text.is_empty() {
                messages.push(json!({"role": "system", "content": text}));
            }
        }
    }
    messages.push(json!({"role": "user", "content": prompt}));

    let mut payload = json!({
        "messages": messages,
        "stream": body.get("stream").and_then(Value::as_bool).unwrap_or(false),
    });
    apply_params(&mut payload, body);
    Ok(payload)
}

/// One non-final NDJSON chunk.
#[must_use]
pub fn stream_chunk(mode: OllamaMode, model: &str, segment: &str) -> Value {
    let mut chunk = json!({
        "model": model,
        "created_at": chrono::Utc::now().to_rfc3339(),
        "done": false,
    });
    match mode {
        OllamaMode::Chat => {
            chunk["message"] = json!({"role": "assistant", "content": segment});
        }
        OllamaMode::Generate => chunk["response"] = json!(segment),
    }
    chunk
}

/// The final `done: true` chunk carrying the aggregated text and timing.
#[must_use]
pub fn done_chunk(
    mode: OllamaMode,
    model: &str,
    text: &str,
    done_reason: &str,
    total_duration_ns: u64,
) -> Value {
    let mut chunk = json!({
        "model": model,
        "created_at": chrono::Utc::now().to_rfc3339(),
        "done": true,
        "done_reason": done_reason,
        "total_duration": total_duration_ns,
        "load_duration": 0,
        "prompt_eval_count": 0,
        "eval_count": 0,
    });
    match mode {
        OllamaMode::Chat => {
            chunk["message"] = json!({"role": "assistant", "content": text});
        }
        OllamaMode::Generate => chunk["response"] = json!(text),
    }
    chunk
}

/// Synthesizes `/api/tags` from catalog model ids.
#[must_use]
pub fn tags_response(models: &[ModelDescriptor]) -> Value {
    let entries: Vec<Value> = models
        .iter()
        .map(|m| {
            json!({
                "name": m.id,
                "model": m.id,
                "modified_at": chrono::Utc::now().to_rfc3339(),
                "size": 0,
                "digest": "",
                "details": {"family": m.owned_by, "format": "copilot"}
            })
        })
        .collect();
    json!({"models": entries})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_content_variants() {
        assert_eq!(message_content(&json!("plain")), "plain");
        assert_eq!(
            message_content(&json!([{"text": "a"}, {"text": "b"}])),
            "ab"
        );
        assert_eq!(message_content(&json!({"text": "t"})), "t");
        assert_eq!(message_content(&json!({"content": "c"})), "c");
        assert_eq!(message_content(&json!(42)), "");
    }

    #[test]
    fn test_normalize_chat_basic() {
        let body = json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "go"}],
            "stream": true
        });
        let out = normalize_chat(&body).unwrap();
        assert_eq!(out["messages"][0]["content"], "go");
        assert_eq!(out["stream"], true);
        assert_eq!(out["max_tokens"], json!(openai::DEFAULT_MAX_TOKENS));
    }

    #[test]
    fn test_normalize_chat_options_merged() {
        let body = json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "go"}],
            "options": {"num_predict": 128, "temperature": 0.7, "top_p": 0.9}
        });
        let out = normalize_chat(&body).unwrap();
        assert_eq!(out["max_tokens"], 128);
        assert_eq!(out["temperature"], 0.7);
        assert_eq!(out["top_p"], 0.9);
    }

    #[test]
    fn test_normalize_chat_body_beats_options() {
        let body = json!({
            "messages": [],
            "max_tokens": 32,
            "options": {"num_predict": 128}
        });
        let out = normalize_chat(&body).unwrap();
        assert_eq!(out["max_tokens"], 32);
    }

    #[test]
    fn test_normalize_chat_missing_messages() {
        assert!(normalize_chat(&json!({"model": "gpt-4"})).is_err());
    }

    #[test]
    fn test_normalize_generate_synthesis() {
        let body = json!({
            "model": "gpt-4",
            "system": "be brief",
            "template": "{{ .Prompt }}",
            "prompt": "hello"
        });
        let out = normalize_generate(&body).unwrap();
        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "be brief");
        assert_eq!(messages[1]["role"], "system");
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"], "hello");
    }

    #[test]
    fn test_normalize_generate_missing_prompt() {
        assert!(normalize_generate(&json!({"model": "gpt-4"})).is_err());
    }

    #[test]
    fn test_stream_chunk_modes() {
        let c = stream_chunk(OllamaMode::Chat, "gpt-4", "he");
        assert_eq!(c["message"]["content"], "he");
        assert_eq!(c["done"], false);

        let g = stream_chunk(OllamaMode::Generate, "gpt-4", "he");
        assert_eq!(g["response"], "he");
        assert!(g.get("message").is_none());
    }

    #[test]
    fn test_done_chunk_fields() {
        let c = done_chunk(OllamaMode::Chat, "gpt-4", "hello", "stop", 123);
        assert_eq!(c["done"], true);
        assert_eq!(c["done_reason"], "stop");
        assert_eq!(c["message"]["content"], "hello");
        assert_eq!(c["total_duration"], 123);
        assert_eq!(c["load_duration"], 0);
        assert_eq!(c["prompt_eval_count"], 0);
        assert_eq!(c["eval_count"], 0);
    }

    #[test]
    fn test_tags_response() {
        let models = vec![ModelDescriptor::new("gpt-4"), ModelDescriptor::new("gpt-4o")];
        let out = tags_response(&models);
        let list = out["models"].as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["name"], "gpt-4");
        assert_eq!(list[0]["model"], "gpt-4");
    }
}

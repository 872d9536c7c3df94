//! Upstream SSE to Ollama NDJSON translation.
//!
//! A synchronous state machine fed one SSE `data:` payload at a time. The
//! caller owns the byte-level SSE parsing and the output writer; this type
//! only decides what each event becomes and aggregates the final chunk.

use crate::ollama::{self, OllamaMode};
use serde_json::Value;
use std::time::Instant;

/// Per-stream translation state.
pub struct OllamaStreamState {
    mode: OllamaMode,
    model: String,
    started: Instant,
    aggregated: String,
    finish_reason: Option<String>,
    done: bool,
    finished: bool,
}

impl OllamaStreamState {
    #[must_use]
    pub fn new(mode: OllamaMode, model: impl Into<String>) -> Self {
        Self {
            mode,
            model: model.into(),
            started: Instant::now(),
            aggregated: String::new(),
            finish_reason: None,
            done: false,
            finished: false,
        }
    }

    /// Feeds one SSE `data:` payload. Returns the NDJSON chunk to emit, if
    /// the event carried a non-empty content delta. `[DONE]` and unparsable
    /// events produce nothing.
    pub fn push_data(&mut self, data: &str) -> Option<Value> {
        if self.done {
            return None;
        }
        let data = data.trim();
        if data == "[DONE]" {
            self.done = true;
            return None;
        }
        let event: Value = serde_json::from_str(data).ok()?;

        if let Some(reason) = event
            .pointer("/choices/0/finish_reason")
            .and_then(Value::as_str)
        {
            self.finish_reason = Some(reason.to_string());
        }

        let segment = extract_delta_content(&event)?;
        if segment.is_empty() {
            return None;
        }
        self.aggregated.push_str(&segment);
        Some(ollama::stream_chunk(self.mode, &self.model, &segment))
    }

    /// Whether `[DONE]` has been observed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Whether the final chunk has already been emitted.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Emits the final `done: true` chunk with the aggregated text. Call
    /// exactly once, at end-of-stream, `[DONE]`, or cancellation.
    #[must_use]
    pub fn finish(&mut self) -> Value {
        self.done = true;
        self.finished = true;
        let reason = self.finish_reason.as_deref().unwrap_or("stop");
        let elapsed_ns = u64::try_from(self.started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        ollama::done_chunk(self.mode, &self.model, &self.aggregated, reason, elapsed_ns)
    }
}

/// Pulls `choices[0].delta.content` out of an upstream SSE event; tolerates
/// strings and arrays of parts.
fn extract_delta_content(event: &Value) -> Option<String> {
    let content = event.pointer("/choices/0/delta/content")?;
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => Some(
            parts
                .iter()
                .filter_map(|p| {
                    p.as_str()
                        .or_else(|| p.get("text").and_then(Value::as_str))
                })
                .collect::<String>(),
        ),
        _ => None,
    }
}

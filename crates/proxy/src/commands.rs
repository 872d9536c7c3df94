//! In-chat command interpreter.
//!
//! Commands are embedded in the user content of a chat request, prefixed by
//! a configurable trigger (default `::`), and answered locally without
//! calling upstream.

use crate::{AppState, dispatch};
use axum::{
    Json,
    body::Body,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use relay_catalog::RefreshOptions;
use relay_translate::{OllamaMode, anthropic, ollama, openai};
use relay_types::{EntryStatus, InboundSchema};
use serde_json::Value;
use std::sync::Arc;

/// A detected command with its bracket-stripped arguments.
#[derive(Debug, PartialEq, Eq)]
pub struct ParsedCommand {
    pub name: String,
    pub args: Vec<String>,
}

/// Pulls the candidate command text out of a request body: the last
/// message's content, falling back to `prompt` / `input`.
#[must_use]
pub fn extract_command_text(body: &Value) -> Option<String> {
    if let Some(messages) = body.get("messages").and_then(Value::as_array)
        && let Some(last) = messages.last()
    {
        let text = ollama::message_content(last.get("content").unwrap_or(&Value::Null));
        if !text.trim().is_empty() {
            return Some(text);
        }
    }
    body.get("prompt")
        .or_else(|| body.get("input"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

/// Strips one pair of surrounding `[...]` brackets.
fn strip_brackets(arg: &str) -> &str {
    arg.strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(arg)
}

/// Parses trigger-prefixed text into a command. Leading dashes on the
/// command name are ignored, so `::--models` and `::models` are the same.
#[must_use]
pub fn parse_command(triggers: &[String], text: &str) -> Option<ParsedCommand> {
    let text = text.trim();
    let trigger = triggers.iter().find(|t| text.starts_with(t.as_str()))?;
    let rest = text[trigger.len()..].trim();
    let mut parts = rest.split_whitespace();
    let name = parts.next()?.trim_start_matches('-').to_string();
    let args = parts.map(|a| strip_brackets(a).to_string()).collect();
    Some(ParsedCommand { name, args })
}

/// Executes a command and returns the reply text.
pub async fn execute(state: &Arc<AppState>, headers: &HeaderMap, cmd: &ParsedCommand) -> String {
    match cmd.name.as_str() {
        "help" => help_text(state),
        "models" => models_text(state, headers).await,
        "set-model" => set_model(state, &cmd.args),
        "reset-models" => {
            state.mappings.reset();
            "Session model mapping overrides cleared.".to_string()
        }
        "config" => config_command(state, &cmd.args),
        other => format!("Unknown in-chat command: {other}. Try help."),
    }
}

/// Wraps the reply text in the outbound shape of the requesting route.
#[must_use]
pub fn render_reply(
    schema: InboundSchema,
    mode: Option<OllamaMode>,
    stream: bool,
    model: &str,
    text: &str,
) -> Response {
    match schema {
        InboundSchema::OpenAi => {
            if stream {
                let body = openai::local_completion_sse(model, text);
                Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "text/event-stream")
                    .header(header::CACHE_CONTROL, "no-cache")
                    .body(Body::from(body))
                    .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
            } else {
                Json(openai::local_completion(model, text)).into_response()
            }
        }
        InboundSchema::Anthropic => Json(anthropic::wrap_text(model, text)).into_response(),
        InboundSchema::Ollama => {
            let chunk = ollama::done_chunk(
                mode.unwrap_or(OllamaMode::Chat),
                model,
                text,
                "stop",
                0,
            );
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

// ── Individual commands ──────────────────────────────────────────────────

fn help_text(state: &Arc<AppState>) -> String {
    let config = state.config.load();
    let trigger = config.triggers.first().cloned().unwrap_or_else(|| "::".into());
    format!(
        "In-chat commands (triggers: {}):\n\
         \x20 {t}help                      show this help\n\
         \x20 {t}models                    list the active profile's models\n\
         \x20 {t}set-model <from> <to>     add a session model mapping override\n\
         \x20 {t}reset-models              clear session mapping overrides\n\
         \x20 {t}config                    list configuration\n\
         \x20 {t}config <key>              show one value\n\
         \x20 {t}config set <key> <value>  update and persist a value",
        config.triggers.join(", "),
        t = trigger,
    )
}

async fn models_text(state: &Arc<AppState>, headers: &HeaderMap) -> String {
    let header_token = dispatch::bearer_token(headers);
    let Some(token) = state.resolver.resolve(header_token.as_deref(), false).await else {
        return "No token available. Run `copilot-relay login` to authenticate with GitHub \
                Copilot."
            .to_string();
    };

    let Ok(Some(profile_id)) = state.store.get_active() else {
        return "No active profile. Run `copilot-relay login` first.".to_string();
    };

    let view = match state.catalog.get_entry(&profile_id) {
        Some(view) => view,
        None => {
            state
                .catalog
                .refresh(RefreshOptions::unverified(&profile_id, &token))
                .await
        }
    };

    if view.status == EntryStatus::Error {
        let reason = view.entry.error.as_deref().unwrap_or("unknown error");
        return format!("Model catalog for {profile_id} is unavailable: {reason}");
    }

    let config = state.config.load();
    let default_model = &config.model.default;
    let mut lines = vec![format!(
        "Models for {profile_id} ({} total, status {:?}):",
        view.entry.models.len(),
        view.status
    )];
    for model in &view.entry.models {
        if model.eq_ignore_ascii_case(default_model) {
            lines.push(format!("\u{25b6} {model} (default)"));
        } else {
            lines.push(format!("  {model}"));
        }
    }
    lines.join("\n")
}

fn set_model(state: &Arc<AppState>, args: &[String]) -> String {
    let [from, to] = args else {
        return "Usage: set-model <from> <to>".to_string();
    };
    state.mappings.set_override(from.clone(), to.clone());
    format!("Session mapping added: {from} -> {to}")
}

fn config_command(state: &Arc<AppState>, args: &[String]) -> String {
    let config = state.config.load();
    match args {
        [] => config
            .list_entries()
            .into_iter()
            .map(|(k, v)| format!("{k} = {v}"))
            .collect::<Vec<_>>()
            .join("\n"),
        [key] if key.as_str() != "set" => match config.get_key(key) {
            Ok(value) => format!("{key} = {value}"),
            Err(e) => e.to_string(),
        },
        [set, key, value] if set.as_str() == "set" => {
            let mut updated = (**config).clone();
            if let Err(e) = updated.set_key(key, value) {
                return e.to_string();
            }
            if let Err(e) = updated.save(state.store.root()) {
                return format!("failed to persist configuration: {e}");
            }
            state.config.store(Arc::new(updated));
            format!("config updated: {key} = {value}")
        }
        _ => "Usage: config | config <key> | config set <key> <value>".to_string(),
    }
}

//! Anthropic-to-Copilot model name mapping with session overrides.
//!
//! Two layers: an immutable built-in table and a session override map
//! writable through in-chat commands. The session layer is per server
//! instance and never persisted.

use std::collections::HashMap;
use std::sync::RwLock;

/// Built-in exact-name defaults.
const BUILTIN_DEFAULTS: &[(&str, &str)] = &[
    ("claude-3-5-sonnet-20240620", "claude-3.5-sonnet"),
    ("claude-3-5-sonnet-20241022", "claude-3.5-sonnet"),
    ("claude-3-5-haiku-20241022", "gpt-4o-mini"),
    ("claude-3-opus-20240229", "gpt-4"),
    ("claude-3-sonnet-20240229", "claude-3.5-sonnet"),
    ("claude-3-haiku-20240307", "gpt-4o-mini"),
];

const SONNET_DEFAULT: &str = "claude-3.5-sonnet";
const HAIKU_DEFAULT: &str = "gpt-4o-mini";
const OPUS_DEFAULT: &str = "gpt-4";
/// Family used for Anthropic names nothing else recognizes.
const UNKNOWN_ANTHROPIC_DEFAULT: &str = "gpt-5";

/// Resolves a name through the built-in table and prefix rules only.
///
/// Returns `None` for names that are not Anthropic-shaped; those pass
/// through to the selector untouched.
#[must_use]
pub fn builtin_resolve(name: &str) -> Option<String> {
    if let Some((_, to)) = BUILTIN_DEFAULTS.iter().find(|(from, _)| *from == name) {
        return Some((*to).to_string());
    }
    if name.starts_with("claude-3-5-") {
        return Some(SONNET_DEFAULT.to_string());
    }
    if name.starts_with("claude-3-haiku") {
        return Some(HAIKU_DEFAULT.to_string());
    }
    if name.starts_with("claude-3-") || name.starts_with("claude-2") {
        return Some(OPUS_DEFAULT.to_string());
    }
    if name.starts_with("claude") {
        return Some(UNKNOWN_ANTHROPIC_DEFAULT.to_string());
    }
    None
}

/// Mutable, process-local mapping from Anthropic model names to upstream
/// Copilot model ids.
#[derive(Default)]
pub struct MappingOverrides {
    session: RwLock<HashMap<String, String>>,
}

impl MappingOverrides {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Translates `name`: session override first, then built-in defaults and
    /// prefix rules. Non-Anthropic names pass through unchanged.
    #[must_use]
    pub fn resolve(&self, name: &str) -> String {
        if let Ok(session) = self.session.read()
            && let Some(mapped) = session.get(name)
        {
            return mapped.clone();
        }
        builtin_resolve(name).unwrap_or_else(|| name.to_string())
    }

    /// Inserts or overwrites one session mapping.
    pub fn set_override(&self, from: impl Into<String>, to: impl Into<String>) {
        if let Ok(mut session) = self.session.write() {
            session.insert(from.into(), to.into());
        }
    }

    /// Clears all session mappings.
    pub fn reset(&self) {
        if let Ok(mut session) = self.session.write() {
            session.clear();
        }
    }

    /// Snapshot of the session layer, sorted by source name.
    #[must_use]
    pub fn session_snapshot(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<_> = self
            .session
            .read()
            .map(|s| s.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        pairs.sort();
        pairs
    }
}

//! Inbound wire-schema identifier.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which wire contract an inbound request speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboundSchema {
    OpenAi,
    Anthropic,
    Ollama,
}

impl InboundSchema {
    /// Route key used by the transforms pipeline configuration.
    #[must_use]
    pub fn route_key(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
        }
    }

    /// Whether the schema serves a stubbed assistant reply instead of a 401
    /// when no credential resolves.
    #[must_use]
    pub fn allows_anonymous(self) -> bool {
        matches!(self, Self::OpenAi | Self::Ollama)
    }
}

impl fmt::Display for InboundSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.route_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_keys() {
        assert_eq!(InboundSchema::OpenAi.route_key(), "openai");
        assert_eq!(InboundSchema::Anthropic.route_key(), "anthropic");
        assert_eq!(InboundSchema::Ollama.route_key(), "ollama");
    }

    #[test]
    fn test_anonymous_policy() {
        assert!(InboundSchema::OpenAi.allows_anonymous());
        assert!(InboundSchema::Ollama.allows_anonymous());
        assert!(!InboundSchema::Anthropic.allows_anonymous());
    }

    #[test]
    fn test_display() {
        assert_eq!(InboundSchema::Anthropic.to_string(), "anthropic");
    }
}

//! Profile data model: one credential bundle per upstream user.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}

/// Builds the stable profile id `<provider>-<login>`.
#[must_use]
pub fn generate_profile_id(provider: &str, login: &str) -> String {
    format!("{provider}-{login}")
}

/// Descriptor of the upstream account owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub login: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl UserInfo {
    /// Creates a descriptor carrying only a login.
    #[must_use]
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            name: None,
            email: None,
        }
    }
}

/// A credential bundle identifying one upstream user.
///
/// `token` is the short-lived Copilot token attached to upstream requests;
/// `refresh_token` is the long-lived GitHub token used to mint a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Stable id: `<provider>-<login>`.
    pub id: String,
    /// Provider tag (currently always `"github"`).
    pub provider: String,
    /// Short-lived Copilot token used on requests.
    pub token: String,
    /// Long-lived GitHub token used to refresh `token`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Milliseconds since epoch of the last mutation.
    pub updated_at: u64,
    /// Last-known working model ids for this account.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub last_models: Vec<String>,
    pub user: UserInfo,
}

impl Profile {
    /// Creates a profile for `login` with the given tokens.
    #[must_use]
    pub fn new(provider: &str, user: UserInfo, token: impl Into<String>) -> Self {
        Self {
            id: generate_profile_id(provider, &user.login),
            provider: provider.to_string(),
            token: token.into(),
            refresh_token: None,
            updated_at: now_millis(),
            last_models: Vec::new(),
            user,
        }
    }

    /// Attaches the long-lived refresh token.
    #[must_use]
    pub fn with_refresh(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Replaces the primary token and bumps `updated_at`.
    pub fn rotate_token(&mut self, token: impl Into<String>) {
        self.token = token.into();
        self.updated_at = now_millis();
    }
}

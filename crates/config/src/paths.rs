//! On-disk layout of the per-user configuration directory.

use std::path::PathBuf;

/// Profile map, keyed by profile id.
pub const PROFILES_FILE: &str = "profiles.json";
/// Single line holding the active profile id.
pub const ACTIVE_PROFILE_FILE: &str = "active-profile";
/// Versioned per-profile model catalog.
pub const CATALOG_FILE: &str = "model-catalog.json";
/// Serialized [`crate::AppConfig`], defaults stripped.
pub const CONFIG_FILE: &str = "config.json";
/// Legacy single-credential record, kept as a mirror for old clients.
pub const LEGACY_AUTH_FILE: &str = "auth.json";
/// Legacy bare-token file, one line.
pub const LEGACY_TOKEN_FILE: &str = "token";

/// Default per-user configuration root: `~/.config/copilot-relay`.
#[must_use]
pub fn config_root() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config").join("copilot-relay")
}

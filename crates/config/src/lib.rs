//! Configuration loading and persistence for the copilot-relay proxy.
//!
//! Uses figment for JSON-based configuration with sensible defaults, plus
//! explicit `COPILOT_*` environment overrides. Saving strips values equal to
//! the defaults; a fully-default configuration removes the file entirely.

pub mod paths;
pub mod schema;

pub use paths::{
    ACTIVE_PROFILE_FILE, CATALOG_FILE, CONFIG_FILE, LEGACY_AUTH_FILE, LEGACY_TOKEN_FILE,
    PROFILES_FILE, config_root,
};
pub use schema::{AppConfig, CatalogConfig, LogConfig, ModelConfig, TransformsConfig};

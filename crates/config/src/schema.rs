//! Application configuration schema, loading, and default-stripped saving.

use figment::{
    Figment,
    providers::{Format as _, Json, Serialized},
};
use relay_types::{RelayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_model() -> String {
    "gpt-4.1".to_string()
}
fn default_refresh_minutes() -> u64 {
    30
}
fn default_ttl_minutes() -> u64 {
    60
}
fn default_stale_minutes() -> u64 {
    30
}
fn default_verbosity() -> u8 {
    1
}
fn default_triggers() -> Vec<String> {
    vec!["::".to_string()]
}
fn default_registry() -> Vec<String> {
    vec!["model-router".to_string(), "claude-code".to_string()]
}

/// Model selection defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelConfig {
    /// Fallback model id when none is requested and none is canonical.
    #[serde(default = "default_model")]
    pub default: String,
    /// Background catalog refresh period.
    #[serde(default = "default_refresh_minutes")]
    pub refresh_interval_minutes: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default: default_model(),
            refresh_interval_minutes: default_refresh_minutes(),
        }
    }
}

/// Catalog freshness windows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogConfig {
    /// Fresh window for an entry.
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u64,
    /// Age beyond which a scheduled refresh should pre-empt.
    #[serde(default = "default_stale_minutes")]
    pub stale_minutes: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_ttl_minutes(),
            stale_minutes: default_stale_minutes(),
        }
    }
}

/// Logging density and destination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    /// 0 = warnings only, 1 = request metadata, 2 = debug, 3 = redacted bodies.
    #[serde(default = "default_verbosity")]
    pub verbosity: u8,
    /// Log file path; stderr when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            verbosity: default_verbosity(),
            file: None,
        }
    }
}

/// Optional request/response interceptor chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransformsConfig {
    /// Global kill-switch; pipelines run only when `true`.
    #[serde(default)]
    pub enabled: bool,
    /// Ordered module names per route key (`openai` / `anthropic` / `ollama`).
    #[serde(default)]
    pub pipelines: HashMap<String, Vec<String>>,
    /// Allow-list of module names permitted to run.
    #[serde(default = "default_registry")]
    pub registry: Vec<String>,
    /// Extra kill-switch for file-loaded modules (not supported; kept for
    /// config compatibility and always treated as off).
    #[serde(default)]
    pub allow_scripts: bool,
}

impl Default for TransformsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pipelines: HashMap::new(),
            registry: default_registry(),
            allow_scripts: false,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub log: LogConfig,
    /// In-chat command trigger prefixes.
    #[serde(default = "default_triggers")]
    pub triggers: Vec<String>,
    #[serde(default)]
    pub transforms: TransformsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            model: ModelConfig::default(),
            catalog: CatalogConfig::default(),
            log: LogConfig::default(),
            triggers: default_triggers(),
            transforms: TransformsConfig::default(),
        }
    }
}

/// Keys accepted by `config set` (and the in-chat `config` command).
pub const SETTABLE_KEYS: &[&str] = &[
    "host",
    "port",
    "model.default",
    "model.refresh_interval_minutes",
    "catalog.ttl_minutes",
    "catalog.stale_minutes",
    "log.verbosity",
];

impl AppConfig {
    /// Loads configuration from `<root>/config.json`, merged with defaults,
    /// then applies `COPILOT_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if the file exists but cannot be parsed.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(crate::paths::CONFIG_FILE);
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        }
        let mut config: Self = figment
            .extract()
            .map_err(|e| RelayError::Config(e.to_string()))?;
        config.apply_env();
        Ok(config)
    }

    /// Parses configuration from a JSON string, merged with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if the JSON is invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Json::string(json))
            .extract()
            .map_err(|e| RelayError::Config(e.to_string()))
    }

    /// Applies `COPILOT_*` environment overrides in place.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("COPILOT_API_HOST") {
            self.host = v;
        }
        if let Ok(v) = std::env::var("COPILOT_API_PORT")
            && let Ok(port) = v.parse()
        {
            self.port = port;
        }
        if let Ok(v) = std::env::var("COPILOT_MODEL_DEFAULT") {
            self.model.default = v;
        }
        if let Ok(v) = std::env::var("COPILOT_MODEL_REFRESH_MINUTES")
            && let Ok(n) = v.parse()
        {
            self.model.refresh_interval_minutes = n;
        }
        if let Ok(v) = std::env::var("COPILOT_CATALOG_TTL_MINUTES")
            && let Ok(n) = v.parse()
        {
            self.catalog.ttl_minutes = n;
        }
        if let Ok(v) = std::env::var("COPILOT_CATALOG_STALE_MINUTES")
            && let Ok(n) = v.parse()
        {
            self.catalog.stale_minutes = n;
        }
        if let Ok(v) = std::env::var("COPILOT_VERBOSE")
            && let Ok(n) = v.parse()
        {
            self.log.verbosity = n;
        }
        if std::env::var("COPILOT_DEBUG").is_ok_and(|v| v == "1" || v == "true") {
            self.log.verbosity = self.log.verbosity.max(2);
        }
        if let Ok(v) = std::env::var("COPILOT_LOG_FILE") {
            self.log.file = Some(v);
        }
        if let Ok(v) = std::env::var("COPILOT_CMD_TRIGGERS") {
            let triggers: Vec<String> = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect();
            if !triggers.is_empty() {
                self.triggers = triggers;
            }
        }
    }

    /// Saves the configuration to `<root>/config.json` with defaults
    /// stripped. A configuration equal to the defaults removes the file.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on I/O failure.
    pub fn save(&self, root: &Path) -> Result<()> {
        let path = root.join(crate::paths::CONFIG_FILE);
        let stripped = strip_defaults(
            serde_json::to_value(self)?,
            serde_json::to_value(Self::default())?,
        );
        match stripped {
            Some(value) => {
                std::fs::create_dir_all(root).map_err(|e| RelayError::Storage(e.to_string()))?;
                let json = serde_json::to_string_pretty(&value)?;
                std::fs::write(&path, format!("{json}\n"))
                    .map_err(|e| RelayError::Storage(e.to_string()))?;
            }
            None => {
                if path.exists() {
                    std::fs::remove_file(&path).map_err(|e| RelayError::Storage(e.to_string()))?;
                }
            }
        }
        Ok(())
    }

    /// Reads one settable key as a display string.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] for unknown keys.
    pub fn get_key(&self, key: &str) -> Result<String> {
        let value = match key {
            "host" => self.host.clone(),
            "port" => self.port.to_string(),
            "model.default" => self.model.default.clone(),
            "model.refresh_interval_minutes" => self.model.refresh_interval_minutes.to_string(),
            "catalog.ttl_minutes" => self.catalog.ttl_minutes.to_string(),
            "catalog.stale_minutes" => self.catalog.stale_minutes.to_string(),
            "log.verbosity" => self.log.verbosity.to_string(),
            _ => return Err(RelayError::Config(format!("unknown config key: {key}"))),
        };
        Ok(value)
    }

    /// Sets one settable key from a string value, validating both.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] for unknown keys or unparsable values.
    pub fn set_key(&mut self, key: &str, value: &str) -> Result<()> {
        let bad = |key: &str, value: &str| {
            RelayError::Config(format!("invalid value for {key}: {value}"))
        };
        match key {
            "host" => self.host = value.to_string(),
            "port" => self.port = value.parse().map_err(|_| bad(key, value))?,
            "model.default" => self.model.default = value.to_string(),
            "model.refresh_interval_minutes" => {
                self.model.refresh_interval_minutes = value.parse().map_err(|_| bad(key, value))?;
            }
            "catalog.ttl_minutes" => {
                self.catalog.ttl_minutes = value.parse().map_err(|_| bad(key, value))?;
            }
            "catalog.stale_minutes" => {
                self.catalog.stale_minutes = value.parse().map_err(|_| bad(key, value))?;
            }
            "log.verbosity" => {
                let v: u8 = value.parse().map_err(|_| bad(key, value))?;
                if v > 3 {
                    return Err(bad(key, value));
                }
                self.log.verbosity = v;
            }
            _ => return Err(RelayError::Config(format!("unknown config key: {key}"))),
        }
        Ok(())
    }

    /// All settable keys with their current values, in declaration order.
    #[must_use]
    pub fn list_entries(&self) -> Vec<(String, String)> {
        SETTABLE_KEYS
            .iter()
            .filter_map(|k| self.get_key(k).ok().map(|v| ((*k).to_string(), v)))
            .collect()
    }
}

/// Removes every field equal to its default. Returns `None` when nothing
/// remains, i.e. the whole value equals the defaults.
fn strip_defaults(value: Value, defaults: Value) -> Option<Value> {
    match (value, defaults) {
        (Value::Object(map), Value::Object(def)) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                match def.get(&k) {
                    Some(d) if *d == v => {}
                    Some(d) => {
                        if let Some(kept) = strip_defaults(v, d.clone()) {
                            out.insert(k, kept);
                        }
                    }
                    None => {
                        out.insert(k, v);
                    }
                }
            }
            if out.is_empty() { None } else { Some(Value::Object(out)) }
        }
        (v, d) if v == d => None,
        (v, _) => Some(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_JSON: &str = r#"{
        "port": 9000,
        "host": "0.0.0.0",
        "model": { "default": "gpt-4o" },
        "catalog": { "ttl_minutes": 5 }
    }"#;

    #[test]
    fn test_default_config() {
        let c = AppConfig::default();
        assert_eq!(c.port, 3000);
        assert_eq!(c.host, "localhost");
        assert_eq!(c.model.default, "gpt-4.1");
        assert_eq!(c.triggers, vec!["::"]);
        assert!(!c.transforms.enabled);
    }

    #[test]
    fn test_from_json_overrides() {
        let c = AppConfig::from_json(SAMPLE_JSON).unwrap();
        assert_eq!(c.port, 9000);
        assert_eq!(c.host, "0.0.0.0");
        assert_eq!(c.model.default, "gpt-4o");
        assert_eq!(c.catalog.ttl_minutes, 5);
        // Defaults preserved for untouched fields.
        assert_eq!(c.model.refresh_interval_minutes, 30);
        assert_eq!(c.catalog.stale_minutes, 30);
    }

    #[test]
    fn test_save_strips_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = AppConfig::default();
        c.port = 9000;
        c.save(dir.path()).unwrap();
        let written = std::fs::read_to_string(dir.path().join("config.json")).unwrap();
        let value: Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value, serde_json::json!({"port": 9000}));
    }

    #[test]
    fn test_save_all_defaults_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut c = AppConfig::default();
        c.port = 9000;
        c.save(dir.path()).unwrap();
        assert!(path.exists());

        c.port = 3000;
        c.save(dir.path()).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = AppConfig::default();
        c.model.default = "gpt-4o-mini".to_string();
        c.save(dir.path()).unwrap();
        let loaded = AppConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.model.default, "gpt-4o-mini");
        assert_eq!(loaded.port, 3000);
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let c = AppConfig::load(dir.path()).unwrap();
        assert_eq!(c, AppConfig::default());
    }

    #[test]
    fn test_set_key_valid() {
        let mut c = AppConfig::default();
        c.set_key("model.default", "gpt-4o").unwrap();
        c.set_key("catalog.ttl_minutes", "15").unwrap();
        c.set_key("log.verbosity", "3").unwrap();
        assert_eq!(c.model.default, "gpt-4o");
        assert_eq!(c.catalog.ttl_minutes, 15);
        assert_eq!(c.log.verbosity, 3);
    }

    #[test]
    fn test_set_key_unknown_rejected() {
        let mut c = AppConfig::default();
        assert!(c.set_key("nonsense.key", "x").is_err());
    }

    #[test]
    fn test_set_key_invalid_value_rejected() {
        let mut c = AppConfig::default();
        assert!(c.set_key("port", "not-a-port").is_err());
        assert!(c.set_key("log.verbosity", "9").is_err());
    }

    #[test]
    fn test_list_entries_covers_settable_keys() {
        let c = AppConfig::default();
        let entries = c.list_entries();
        assert_eq!(entries.len(), SETTABLE_KEYS.len());
        assert!(entries.iter().any(|(k, v)| k == "port" && v == "3000"));
    }

    #[test]
    fn test_trigger_parsing_from_env_format() {
        let mut c = AppConfig::default();
        // Same code path apply_env uses, exercised directly.
        let triggers: Vec<String> = "::, !!".split(',').map(|s| s.trim().to_string()).collect();
        c.triggers = triggers;
        assert_eq!(c.triggers, vec!["::", "!!"]);
    }
}

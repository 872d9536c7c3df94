//! Model selection: decide the upstream model id to send and classify the
//! decision.

use crate::catalog::{ModelCatalog, RefreshOptions};
use relay_types::CatalogView;
use serde::Serialize;

/// Which rule produced the selected model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionSource {
    Requested,
    Default,
    Catalog,
    Configured,
}

/// The selected upstream model and how it was chosen.
#[derive(Debug, Clone, Serialize)]
pub struct Selection {
    pub model: String,
    /// `true` when the returned id differs from what the caller asked for.
    pub fallback: bool,
    pub source: SelectionSource,
    /// `true` when the decision triggered a catalog refresh.
    pub refreshed: bool,
}

/// Chooses the upstream model id for a request.
///
/// With no token or no profile, the decision is pure configuration: the
/// requested model passes through (the configured default stands in when
/// none was requested). Otherwise the profile's catalog is consulted:
/// requested id first, then the configured default, then the first catalog
/// model, each matched case-insensitively against the catalog's canonical
/// forms. An empty or missing catalog triggers one unverified refresh before
/// giving up on catalog-backed selection.
pub async fn select_model(
    catalog: &ModelCatalog,
    profile_id: Option<&str>,
    token: Option<&str>,
    requested: Option<&str>,
    default_model: &str,
) -> Selection {
    let requested = requested.map(str::trim).filter(|s| !s.is_empty());

    let (Some(profile_id), Some(token)) = (profile_id, token) else {
        return configured(requested, default_model, false);
    };

    if let Some(selection) =
        pick(catalog.get_entry(profile_id).as_ref(), requested, default_model, false)
    {
        return selection;
    }

    // Cold or empty catalog: refresh once (unverified) and retry.
    let view = catalog
        .refresh(RefreshOptions::unverified(profile_id, token))
        .await;
    if let Some(selection) = pick(Some(&view), requested, default_model, true) {
        return selection;
    }
    configured(requested, default_model, true)
}

fn pick(
    view: Option<&CatalogView>,
    requested: Option<&str>,
    default_model: &str,
    refreshed: bool,
) -> Option<Selection> {
    let models = &view?.entry.models;

    if let Some(req) = requested
        && let Some(hit) = models.iter().find(|m| m.eq_ignore_ascii_case(req))
    {
        return Some(Selection {
            model: hit.clone(),
            fallback: false,
            source: SelectionSource::Requested,
            refreshed,
        });
    }

    if let Some(hit) = models.iter().find(|m| m.eq_ignore_ascii_case(default_model)) {
        return Some(Selection {
            model: hit.clone(),
            fallback: requested.is_some(),
            source: SelectionSource::Default,
            refreshed,
        });
    }

    models.first().map(|first| Selection {
        model: first.clone(),
        fallback: true,
        source: SelectionSource::Catalog,
        refreshed,
    })
}

/// Pure-config passthrough used when no catalog can be consulted.
fn configured(requested: Option<&str>, default_model: &str, refreshed: bool) -> Selection {
    let model = requested.unwrap_or(default_model).to_string();
    Selection {
        fallback: requested.is_some_and(|r| !r.eq_ignore_ascii_case(default_model)),
        model,
        source: SelectionSource::Configured,
        refreshed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_upstream::CopilotClient;
    use std::sync::Arc;

    /// Catalog over a dead endpoint: refreshes fail, entries stay as seeded.
    fn dead_catalog(dir: &tempfile::TempDir) -> ModelCatalog {
        let client = Arc::new(
            CopilotClient::with_base_url(rquest::Client::new(), "http://127.0.0.1:1")
                .with_max_retries(0),
        );
        ModelCatalog::new(dir.path().to_path_buf(), client, 60_000)
    }

    fn seed_catalog_file(dir: &tempfile::TempDir, models: &[&str]) {
        let raw: Vec<_> = models
            .iter()
            .map(|id| serde_json::json!({"id": id}))
            .collect();
        let entry = serde_json::json!({
            "version": 1,
            "updated_at": relay_types::now_millis(),
            "entries": {
                "github-octocat": {
                    "profile_id": "github-octocat",
                    "updated_at": relay_types::now_millis(),
                    "last_attempt_at": relay_types::now_millis(),
                    "ttl_ms": 60_000,
                    "models": models,
                    "raw_models": raw,
                    "status": "ready",
                    "source": "manual",
                    "stats": {"total": models.len(), "working": models.len(), "failed": 0,
                              "duration_ms": 1, "validated": false}
                }
            }
        });
        std::fs::write(
            dir.path().join("model-catalog.json"),
            serde_json::to_string(&entry).unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_requested_model_in_catalog() {
        let dir = tempfile::tempdir().unwrap();
        seed_catalog_file(&dir, &["gpt-4", "gpt-4o-mini"]);
        let catalog = dead_catalog(&dir);
        let s = select_model(
            &catalog,
            Some("github-octocat"),
            Some("ghu_t"),
            Some("gpt-4o-mini"),
            "gpt-4",
        )
        .await;
        assert_eq!(s.model, "gpt-4o-mini");
        assert!(!s.fallback);
        assert_eq!(s.source, SelectionSource::Requested);
        assert!(!s.refreshed);
    }

    #[tokio::test]
    async fn test_case_insensitive_hit_returns_canonical_form() {
        let dir = tempfile::tempdir().unwrap();
        seed_catalog_file(&dir, &["GPT-4"]);
        let catalog = dead_catalog(&dir);
        let s = select_model(
            &catalog,
            Some("github-octocat"),
            Some("ghu_t"),
            Some("gpt-4"),
            "gpt-4",
        )
        .await;
        assert_eq!(s.model, "GPT-4");
        assert!(!s.fallback);
    }

    #[tokio::test]
    async fn test_unknown_model_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        seed_catalog_file(&dir, &["gpt-4", "gpt-4o-mini"]);
        let catalog = dead_catalog(&dir);
        let s = select_model(
            &catalog,
            Some("github-octocat"),
            Some("ghu_t"),
            Some("ghost"),
            "gpt-4",
        )
        .await;
        assert_eq!(s.model, "gpt-4");
        assert!(s.fallback);
        assert_eq!(s.source, SelectionSource::Default);
    }

    #[tokio::test]
    async fn test_no_request_takes_default_without_fallback() {
        let dir = tempfile::tempdir().unwrap();
        seed_catalog_file(&dir, &["gpt-4"]);
        let catalog = dead_catalog(&dir);
        let s = select_model(&catalog, Some("github-octocat"), Some("ghu_t"), None, "gpt-4").await;
        assert_eq!(s.model, "gpt-4");
        assert!(!s.fallback);
        assert_eq!(s.source, SelectionSource::Default);
    }

    #[tokio::test]
    async fn test_default_missing_takes_first_catalog_model() {
        let dir = tempfile::tempdir().unwrap();
        seed_catalog_file(&dir, &["o3-mini", "gemini-2.0-flash"]);
        let catalog = dead_catalog(&dir);
        let s = select_model(
            &catalog,
            Some("github-octocat"),
            Some("ghu_t"),
            Some("ghost"),
            "gpt-4",
        )
        .await;
        assert_eq!(s.model, "o3-mini");
        assert!(s.fallback);
        assert_eq!(s.source, SelectionSource::Catalog);
    }

    #[tokio::test]
    async fn test_no_token_is_pure_passthrough() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = dead_catalog(&dir);
        let s = select_model(&catalog, None, None, Some("gpt-4o"), "gpt-4").await;
        assert_eq!(s.model, "gpt-4o");
        assert!(s.fallback);
        assert_eq!(s.source, SelectionSource::Configured);

        let s = select_model(&catalog, None, None, None, "gpt-4").await;
        assert_eq!(s.model, "gpt-4");
        assert!(!s.fallback);
    }

    #[tokio::test]
    async fn test_cold_catalog_refresh_failure_falls_back_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = dead_catalog(&dir);
        let s = select_model(
            &catalog,
            Some("github-octocat"),
            Some("ghu_t"),
            Some("gpt-4o"),
            "gpt-4",
        )
        .await;
        assert_eq!(s.model, "gpt-4o");
        assert_eq!(s.source, SelectionSource::Configured);
        assert!(s.refreshed);
    }

    #[tokio::test]
    async fn test_requested_whitespace_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        seed_catalog_file(&dir, &["gpt-4"]);
        let catalog = dead_catalog(&dir);
        let s = select_model(
            &catalog,
            Some("github-octocat"),
            Some("ghu_t"),
            Some("  gpt-4  "),
            "gpt-4",
        )
        .await;
        assert_eq!(s.model, "gpt-4");
        assert!(!s.fallback);
    }
}

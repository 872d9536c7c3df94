//! Scheduled background catalog refresh.

use crate::catalog::ModelCatalog;
use relay_auth::TokenResolver;
use relay_store::ProfileStore;
use relay_types::RefreshSource;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Single-instance background task refreshing the active profile's catalog.
///
/// Ticks immediately at start and then every `interval`. Ticks run
/// sequentially; a tick in progress when the next would fire simply delays
/// it. Failures are logged, never raised.
pub struct CatalogService {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl CatalogService {
    /// Spawns the refresher task.
    #[must_use]
    pub fn start(
        catalog: Arc<ModelCatalog>,
        resolver: Arc<TokenResolver>,
        store: Arc<ProfileStore>,
        interval: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            run(catalog, resolver, store, interval, task_cancel).await;
        });
        Self { cancel, handle }
    }

    /// Stops the timer and waits for the task to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

async fn run(
    catalog: Arc<ModelCatalog>,
    resolver: Arc<TokenResolver>,
    store: Arc<ProfileStore>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tick(&catalog, &resolver, &store, interval).await;
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }
    tracing::debug!("catalog refresh service stopped");
}

async fn tick(
    catalog: &ModelCatalog,
    resolver: &TokenResolver,
    store: &ProfileStore,
    interval: Duration,
) {
    let profile_id = match store.get_active() {
        Ok(Some(id)) => id,
        Ok(None) => {
            tracing::debug!("scheduled refresh: no active profile");
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "scheduled refresh: profile store unreadable");
            return;
        }
    };

    let Some(token) = resolver.resolve(None, true).await else {
        tracing::warn!(profile = %profile_id, "scheduled refresh: no token available");
        return;
    };

    let stale_after_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    let view = catalog
        .ensure_fresh(&profile_id, &token, stale_after_ms, true, RefreshSource::Scheduled)
        .await;
    match &view.entry.error {
        Some(err) => {
            tracing::warn!(profile = %profile_id, error = %err, "scheduled refresh failed");
        }
        None => {
            tracing::debug!(
                profile = %profile_id,
                models = view.entry.models.len(),
                age_ms = view.age_ms,
                "scheduled refresh tick complete"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, extract::State, routing::get, routing::post};
    use relay_types::{Profile, UserInfo};
    use relay_upstream::CopilotClient;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn spawn_upstream(hits: Arc<AtomicUsize>) -> String {
        let router = Router::new()
            .route(
                "/models",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"data": [{"id": "gpt-4"}]}))
                }),
            )
            .route(
                "/chat/completions",
                post(|| async { Json(json!({"choices": []})) }),
            )
            .with_state(hits);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_immediate_tick_refreshes_active_profile() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_upstream(hits.clone()).await;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ProfileStore::new(dir.path().to_path_buf()));
        store
            .save_profile(&Profile::new("github", UserInfo::new("octocat"), "ghu_tok"))
            .unwrap();

        let client = Arc::new(CopilotClient::with_base_url(rquest::Client::new(), base));
        let catalog = Arc::new(ModelCatalog::new(dir.path().to_path_buf(), client, 60_000));
        let resolver = Arc::new(TokenResolver::new(
            Arc::clone(&store),
            rquest::Client::new(),
            Some("ghu_tok".into()),
        ));

        let service = CatalogService::start(
            Arc::clone(&catalog),
            resolver,
            store,
            Duration::from_secs(3600),
        );

        // Wait for the immediate first tick to land.
        for _ in 0..100 {
            if catalog.get_entry("github-octocat").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let view = catalog.get_entry("github-octocat").expect("entry written");
        assert_eq!(view.entry.models, vec!["gpt-4"]);
        assert_eq!(view.entry.source, relay_types::RefreshSource::Scheduled);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        service.stop().await;
    }

    #[tokio::test]
    async fn test_tick_without_profile_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ProfileStore::new(dir.path().to_path_buf()));
        let client = Arc::new(CopilotClient::with_base_url(
            rquest::Client::new(),
            "http://127.0.0.1:1",
        ));
        let catalog = Arc::new(ModelCatalog::new(dir.path().to_path_buf(), client, 60_000));
        let resolver = Arc::new(TokenResolver::new(
            Arc::clone(&store),
            rquest::Client::new(),
            None,
        ));

        let service = CatalogService::start(catalog, resolver, store, Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_millis(50)).await;
        service.stop().await;
    }
}

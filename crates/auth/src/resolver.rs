//! Per-request credential selection and cooperative refresh.

use crate::github;
use relay_store::ProfileStore;
use relay_types::{is_copilot_token, now_millis, redact};
use std::sync::{
    Arc, RwLock,
    atomic::{AtomicU64, Ordering},
};

/// Result of the most recent refresh, shared by all waiters of the flight.
#[derive(Default)]
struct RefreshSlot {
    last: Option<String>,
}

/// Picks the credential for an inbound request and exposes a single-flight
/// refresh entry point.
///
/// Sources, in order: the inbound `Authorization` bearer (when it classifies
/// as a Copilot-ecosystem credential), the launch-time fallback, the
/// process-local cache primed by earlier requests, the legacy on-disk
/// credential, and finally (opt-in only) a refresh through the active
/// profile's refresh token.
pub struct TokenResolver {
    store: Arc<ProfileStore>,
    http: rquest::Client,
    fallback: Option<String>,
    token_endpoint: String,
    cached: RwLock<Option<String>>,
    refresh_slot: tokio::sync::Mutex<RefreshSlot>,
    /// Bumped after every completed refresh, success or failure.
    generation: AtomicU64,
}

impl TokenResolver {
    /// Creates a resolver. `fallback` is the token the server was launched
    /// with, if any; it is ignored unless it classifies.
    #[must_use]
    pub fn new(store: Arc<ProfileStore>, http: rquest::Client, fallback: Option<String>) -> Self {
        let fallback = fallback.filter(|t| is_copilot_token(t));
        Self {
            store,
            http,
            fallback,
            token_endpoint: github::COPILOT_TOKEN_URL.to_string(),
            cached: RwLock::new(None),
            refresh_slot: tokio::sync::Mutex::new(RefreshSlot::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// Overrides the token exchange endpoint (GitHub Enterprise, tests).
    #[must_use]
    pub fn with_token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = endpoint.into();
        self
    }

    /// Whether any non-refresh source could produce a token right now.
    #[must_use]
    pub fn has_local_source(&self) -> bool {
        self.fallback.is_some()
            || self.cached.read().is_ok_and(|c| c.is_some())
            || self.store.load_legacy_token().is_some()
    }

    /// Resolves the credential to use for a request.
    ///
    /// `header_token` is the inbound bearer value, already stripped of the
    /// `Bearer ` prefix. With `refresh_if_missing`, a failed lookup falls
    /// through to a single-flight refresh via the active profile.
    pub async fn resolve(
        &self,
        header_token: Option<&str>,
        refresh_if_missing: bool,
    ) -> Option<String> {
        if let Some(t) = header_token
            && is_copilot_token(t)
        {
            let t = t.trim().to_string();
            self.prime_cache(&t);
            return Some(t);
        }

        if let Some(t) = &self.fallback {
            self.prime_cache(t);
            return Some(t.clone());
        }

        if let Ok(cached) = self.cached.read()
            && let Some(t) = cached.as_ref()
        {
            return Some(t.clone());
        }

        if let Some(t) = self.store.load_legacy_token() {
            self.prime_cache(&t);
            return Some(t);
        }

        if refresh_if_missing {
            return self.refresh().await;
        }
        None
    }

    /// Refreshes the active profile's Copilot token, single-flight
    /// process-wide: concurrent callers block on the in-flight exchange and
    /// observe its outcome instead of starting their own.
    ///
    /// Returns the new token, or `None` when no profile can refresh or the
    /// exchange fails; prior state is left intact on failure.
    pub async fn refresh(&self) -> Option<String> {
        let before = self.generation.load(Ordering::Acquire);
        let mut slot = self.refresh_slot.lock().await;
        if self.generation.load(Ordering::Acquire) != before {
            // A refresh completed while we waited for the lock.
            return slot.last.clone();
        }

        let outcome = self.exchange().await;
        if let Some(token) = &outcome {
            self.prime_cache(token);
        }
        slot.last.clone_from(&outcome);
        self.generation.fetch_add(1, Ordering::Release);
        outcome
    }

    /// The process-local cached token, if any.
    #[must_use]
    pub fn cached_token(&self) -> Option<String> {
        self.cached.read().ok().and_then(|c| c.clone())
    }

    // ── Private helpers ──────────────────────────────────────────────────

    fn prime_cache(&self, token: &str) {
        if let Ok(mut cached) = self.cached.write() {
            *cached = Some(token.to_string());
        }
    }

    /// Performs the actual upstream exchange and persists the result.
    async fn exchange(&self) -> Option<String> {
        let mut profile = match self.store.active_profile() {
            Ok(Some(p)) => p,
            Ok(None) => {
                tracing::debug!("no active profile, cannot refresh");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "profile store unreadable during refresh");
                return None;
            }
        };
        let refresh_token = profile.refresh_token.clone()?;

        match github::mint_copilot_token(&self.http, &self.token_endpoint, &refresh_token).await {
            Ok(minted) => {
                tracing::info!(
                    profile = %profile.id,
                    token = %redact(&minted.token),
                    "refreshed copilot token"
                );
                profile.token = minted.token.clone();
                profile.updated_at = now_millis();
                if let Err(e) = self.store.save_profile(&profile) {
                    tracing::warn!(error = %e, "failed to persist refreshed token");
                }
                Some(minted.token)
            }
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_types::{Profile, UserInfo};

    fn make_resolver(fallback: Option<&str>) -> (tempfile::TempDir, Arc<TokenResolver>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ProfileStore::new(dir.path().to_path_buf()));
        let resolver = Arc::new(TokenResolver::new(
            store,
            rquest::Client::new(),
            fallback.map(ToString::to_string),
        ));
        (dir, resolver)
    }

    #[tokio::test]
    async fn test_header_token_wins() {
        let (_dir, r) = make_resolver(Some("ghu_fallback"));
        let got = r.resolve(Some("ghu_header"), false).await;
        assert_eq!(got.as_deref(), Some("ghu_header"));
    }

    #[tokio::test]
    async fn test_foreign_header_token_ignored() {
        let (_dir, r) = make_resolver(Some("ghu_fallback"));
        let got = r.resolve(Some("sk-ant-foreign"), false).await;
        assert_eq!(got.as_deref(), Some("ghu_fallback"));
    }

    #[tokio::test]
    async fn test_foreign_fallback_rejected_at_construction() {
        let (_dir, r) = make_resolver(Some("sk-ant-foreign"));
        assert!(r.resolve(None, false).await.is_none());
    }

    #[tokio::test]
    async fn test_header_primes_cache() {
        let (_dir, r) = make_resolver(None);
        let _ = r.resolve(Some("ghu_once"), false).await;
        // Later request without a header sees the cached token.
        let got = r.resolve(None, false).await;
        assert_eq!(got.as_deref(), Some("ghu_once"));
        assert_eq!(r.cached_token().as_deref(), Some("ghu_once"));
    }

    #[tokio::test]
    async fn test_disk_legacy_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("auth.json"), r#"{"token":"ghu_disk"}"#).unwrap();
        let store = Arc::new(ProfileStore::new(dir.path().to_path_buf()));
        let r = TokenResolver::new(store, rquest::Client::new(), None);
        let got = r.resolve(None, false).await;
        assert_eq!(got.as_deref(), Some("ghu_disk"));
    }

    #[tokio::test]
    async fn test_no_source_yields_none() {
        let (_dir, r) = make_resolver(None);
        assert!(r.resolve(None, false).await.is_none());
    }

    #[tokio::test]
    async fn test_refresh_without_profile_returns_none() {
        let (_dir, r) = make_resolver(None);
        assert!(r.refresh().await.is_none());
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ProfileStore::new(dir.path().to_path_buf()));
        store
            .save_profile(&Profile::new("github", UserInfo::new("octocat"), "ghu_t"))
            .unwrap();
        let r = TokenResolver::new(store, rquest::Client::new(), None);
        assert!(r.refresh().await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_outcome() {
        // No refreshable profile, so every flight resolves to None; the point
        // is that concurrent callers complete without deadlock and agree.
        let (_dir, r) = make_resolver(None);
        let (a, b, c) = tokio::join!(r.refresh(), r.refresh(), r.refresh());
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[tokio::test]
    async fn test_single_flight_performs_one_exchange() {
        use axum::{Json, Router, extract::State, routing::get};
        use std::sync::atomic::{AtomicUsize, Ordering};

        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/copilot_token",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    // Slow enough that concurrent callers pile up behind the
                    // in-flight exchange.
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    Json(serde_json::json!({"token": "ghu_minted"}))
                }),
            )
            .with_state(Arc::clone(&hits));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ProfileStore::new(dir.path().to_path_buf()));
        store
            .save_profile(
                &Profile::new("github", UserInfo::new("octocat"), "ghu_old")
                    .with_refresh("gho_refresh"),
            )
            .unwrap();
        let r = Arc::new(
            TokenResolver::new(store, rquest::Client::new(), None)
                .with_token_endpoint(format!("http://{addr}/copilot_token")),
        );

        let (a, b, c, d) = tokio::join!(r.refresh(), r.refresh(), r.refresh(), r.refresh());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        for outcome in [a, b, c, d] {
            assert_eq!(outcome.as_deref(), Some("ghu_minted"));
        }
        assert_eq!(r.cached_token().as_deref(), Some("ghu_minted"));
    }

    #[tokio::test]
    async fn test_has_local_source() {
        let (_dir, r) = make_resolver(Some("ghu_fallback"));
        assert!(r.has_local_source());
        let (_dir2, r2) = make_resolver(None);
        assert!(!r2.has_local_source());
    }
}

//! The model catalog: in-memory map plus `model-catalog.json` persistence,
//! with single-flight refresh per profile.

use futures_util::StreamExt as _;
use relay_types::{
    CatalogView, EntryStatus, ModelDescriptor, RefreshSource, RefreshStats, RelayError, Result,
    StoredEntry, now_millis,
};
use relay_upstream::CopilotClient;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Schema version of the persisted catalog file.
const CATALOG_VERSION: u32 = 1;

/// Default bound on concurrent `verify_model` probes.
const DEFAULT_VERIFY_CONCURRENCY: usize = 3;

/// Persisted shape of `model-catalog.json`.
#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    version: u32,
    updated_at: u64,
    entries: BTreeMap<String, StoredEntry>,
}

/// Parameters for one catalog refresh.
#[derive(Debug, Clone)]
pub struct RefreshOptions {
    pub profile_id: String,
    pub token: String,
    /// When `true`, each listed model is probed and only callable ids enter
    /// the working set.
    pub verify: bool,
    pub source: RefreshSource,
    /// Per-entry TTL override; the catalog default applies when absent.
    pub ttl_ms: Option<u64>,
    /// Verification fan-out bound; defaults to 3, capped at the list length.
    pub concurrency: Option<usize>,
    pub cancel: Option<CancellationToken>,
}

impl RefreshOptions {
    /// Minimal options for an unverified manual refresh.
    #[must_use]
    pub fn unverified(profile_id: &str, token: &str) -> Self {
        Self {
            profile_id: profile_id.to_string(),
            token: token.to_string(),
            verify: false,
            source: RefreshSource::Manual,
            ttl_ms: None,
            concurrency: None,
            cancel: None,
        }
    }
}

/// Per-profile view of upstream-available models.
///
/// The in-memory map is authoritative; every mutation rewrites the on-disk
/// file in full. Malformed or version-mismatched disk state is discarded and
/// the catalog starts empty.
pub struct ModelCatalog {
    root: PathBuf,
    client: Arc<CopilotClient>,
    default_ttl_ms: u64,
    entries: Mutex<BTreeMap<String, StoredEntry>>,
    /// Single-flight locks keyed by profile id; entries are removed when the
    /// refresh holding them completes.
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ModelCatalog {
    /// Opens the catalog rooted at `root`, loading any persisted state.
    #[must_use]
    pub fn new(root: PathBuf, client: Arc<CopilotClient>, default_ttl_ms: u64) -> Self {
        let entries = load_entries(&root.join(CATALOG_FILE));
        Self {
            root,
            client,
            default_ttl_ms,
            entries: Mutex::new(entries),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Pure read of one profile's entry with derived freshness fields.
    #[must_use]
    pub fn get_entry(&self, profile_id: &str) -> Option<CatalogView> {
        let entries = self.entries.lock().ok()?;
        entries.get(profile_id).map(|e| e.materialize(now_millis()))
    }

    /// Fully recomputes a profile's entry.
    ///
    /// Single-flight per profile id: a refresh already in flight for the same
    /// id absorbs concurrent calls, which observe its result instead of
    /// starting their own listing.
    pub async fn refresh(&self, opts: RefreshOptions) -> CatalogView {
        let lock = self.inflight_lock(&opts.profile_id);
        let attempt_before = self.last_attempt(&opts.profile_id);
        let guard = lock.lock().await;

        // Someone else refreshed while we waited for the lock.
        if self.last_attempt(&opts.profile_id) > attempt_before
            && let Some(view) = self.get_entry(&opts.profile_id)
        {
            drop(guard);
            self.release_inflight(&opts.profile_id);
            return view;
        }

        let entry = self.recompute(&opts).await;
        let view = entry.materialize(now_millis());
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(opts.profile_id.clone(), entry);
            if let Err(e) = persist_entries(&self.root, &entries) {
                tracing::warn!(error = %e, "failed to persist model catalog");
            }
        }

        drop(guard);
        self.release_inflight(&opts.profile_id);
        view
    }

    /// Returns the current entry unless it is absent, errored, or older than
    /// `stale_after_ms`, in which case a refresh runs first.
    pub async fn ensure_fresh(
        &self,
        profile_id: &str,
        token: &str,
        stale_after_ms: u64,
        verify: bool,
        source: RefreshSource,
    ) -> CatalogView {
        if let Some(view) = self.get_entry(profile_id)
            && view.entry.status != EntryStatus::Error
            && view.age_ms <= stale_after_ms
        {
            return view;
        }
        self.refresh(RefreshOptions {
            profile_id: profile_id.to_string(),
            token: token.to_string(),
            verify,
            source,
            ttl_ms: None,
            concurrency: None,
            cancel: None,
        })
        .await
    }

    /// Evicts one entry, or all of them.
    pub fn clear(&self, profile_id: Option<&str>) {
        if let Ok(mut entries) = self.entries.lock() {
            match profile_id {
                Some(id) => {
                    entries.remove(id);
                }
                None => entries.clear(),
            }
            if let Err(e) = persist_entries(&self.root, &entries) {
                tracing::warn!(error = %e, "failed to persist model catalog");
            }
        }
    }

    // ── Private helpers ──────────────────────────────────────────────────

    fn inflight_lock(&self, profile_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inflight.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        map.entry(profile_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn release_inflight(&self, profile_id: &str) {
        let mut map = self.inflight.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        map.remove(profile_id);
    }

    fn last_attempt(&self, profile_id: &str) -> u64 {
        self.entries
            .lock()
            .ok()
            .and_then(|e| e.get(profile_id).map(|e| e.last_attempt_at))
            .unwrap_or(0)
    }

    /// Runs the list + optional verify pass and assembles the new entry.
    async fn recompute(&self, opts: &RefreshOptions) -> StoredEntry {
        let started = now_millis();
        let ttl_ms = opts.ttl_ms.unwrap_or(self.default_ttl_ms);

        let raw = match self.client.list_models(&opts.token).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(profile = %opts.profile_id, error = %e, "model listing failed");
                return self.error_entry(opts, ttl_ms, started, e.to_string());
            }
        };
        let ids: Vec<String> = raw.iter().map(|m| m.id.clone()).collect();

        if !opts.verify || ids.is_empty() {
            let stats = RefreshStats {
                total: ids.len(),
                working: ids.len(),
                failed: 0,
                duration_ms: now_millis().saturating_sub(started),
                validated: false,
            };
            return self.ready_entry(opts, ttl_ms, raw, ids, None, stats);
        }

        let limit = opts
            .concurrency
            .unwrap_or(DEFAULT_VERIFY_CONCURRENCY)
            .clamp(1, ids.len());
        let verify_all = futures_util::stream::iter(ids.clone())
            .map(|id| {
                let client = Arc::clone(&self.client);
                let token = opts.token.clone();
                let cancel = opts.cancel.clone();
                async move {
                    let ok = client.verify_model(&token, &id, cancel.as_ref()).await;
                    (id, ok)
                }
            })
            .buffer_unordered(limit)
            .collect::<Vec<_>>();

        let results = match &opts.cancel {
            Some(c) => tokio::select! {
                () = c.cancelled() => None,
                r = verify_all => Some(r),
            },
            None => Some(verify_all.await),
        };
        let Some(results) = results else {
            return self.error_entry(opts, ttl_ms, started, "refresh cancelled".to_string());
        };

        let working_set: HashSet<String> = results
            .into_iter()
            .filter_map(|(id, ok)| ok.then_some(id))
            .collect();
        // Preserve upstream order; verification completion order is noise.
        let models: Vec<String> = ids
            .iter()
            .filter(|id| working_set.contains(*id))
            .cloned()
            .collect();
        let failed: Vec<String> = ids
            .iter()
            .filter(|id| !working_set.contains(*id))
            .cloned()
            .collect();

        let stats = RefreshStats {
            total: ids.len(),
            working: models.len(),
            failed: failed.len(),
            duration_ms: now_millis().saturating_sub(started),
            validated: true,
        };
        let failed_models = (!failed.is_empty()).then_some(failed);
        self.ready_entry(opts, ttl_ms, raw, models, failed_models, stats)
    }

    fn ready_entry(
        &self,
        opts: &RefreshOptions,
        ttl_ms: u64,
        raw_models: Vec<ModelDescriptor>,
        models: Vec<String>,
        failed_models: Option<Vec<String>>,
        stats: RefreshStats,
    ) -> StoredEntry {
        let now = now_millis();
        tracing::info!(
            profile = %opts.profile_id,
            total = stats.total,
            working = stats.working,
            validated = stats.validated,
            duration_ms = stats.duration_ms,
            "catalog refreshed"
        );
        StoredEntry {
            profile_id: opts.profile_id.clone(),
            updated_at: now,
            last_attempt_at: now,
            ttl_ms,
            models,
            raw_models,
            status: EntryStatus::Ready,
            source: opts.source,
            stats,
            failed_models,
            error: None,
        }
    }

    fn error_entry(
        &self,
        opts: &RefreshOptions,
        ttl_ms: u64,
        started: u64,
        message: String,
    ) -> StoredEntry {
        let now = now_millis();
        StoredEntry {
            profile_id: opts.profile_id.clone(),
            updated_at: now,
            last_attempt_at: now,
            ttl_ms,
            models: Vec::new(),
            raw_models: Vec::new(),
            status: EntryStatus::Error,
            source: opts.source,
            stats: RefreshStats {
                total: 0,
                working: 0,
                failed: 0,
                duration_ms: now.saturating_sub(started),
                validated: false,
            },
            failed_models: None,
            error: Some(message),
        }
    }
}

/// Persisted catalog file name under the config root.
const CATALOG_FILE: &str = "model-catalog.json";

fn load_entries(path: &Path) -> BTreeMap<String, StoredEntry> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return BTreeMap::new();
    };
    match serde_json::from_str::<CatalogFile>(&raw) {
        Ok(file) if file.version == CATALOG_VERSION => file.entries,
        Ok(file) => {
            tracing::warn!(version = file.version, "unknown catalog version, starting empty");
            BTreeMap::new()
        }
        Err(e) => {
            tracing::warn!(error = %e, "model-catalog.json is malformed, starting empty");
            BTreeMap::new()
        }
    }
}

fn persist_entries(root: &Path, entries: &BTreeMap<String, StoredEntry>) -> Result<()> {
    std::fs::create_dir_all(root).map_err(|e| RelayError::Storage(e.to_string()))?;
    let file = CatalogFile {
        version: CATALOG_VERSION,
        updated_at: now_millis(),
        entries: entries.clone(),
    };
    let path = root.join(CATALOG_FILE);
    let json = serde_json::to_string_pretty(&file)?;
    std::fs::write(&path, format!("{json}\n")).map_err(|e| RelayError::Storage(e.to_string()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600));
    }
    Ok(())
}

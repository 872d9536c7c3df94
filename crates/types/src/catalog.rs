//! Model catalog data model: per-profile entries of usable upstream models.

use serde::{Deserialize, Serialize};

/// One model as returned by the upstream `/models` listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub id: String,
    #[serde(default = "default_object")]
    pub object: String,
    #[serde(default)]
    pub created: u64,
    #[serde(default = "default_owned_by")]
    pub owned_by: String,
}

fn default_object() -> String {
    "model".to_string()
}

fn default_owned_by() -> String {
    "github-copilot".to_string()
}

impl ModelDescriptor {
    /// Creates a descriptor with defaults for everything but the id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object: default_object(),
            created: 0,
            owned_by: default_owned_by(),
        }
    }
}

/// Which path last wrote a catalog entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RefreshSource {
    Manual,
    Scheduled,
}

/// Stored entry status; the derived view adds `Stale`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Ready,
    Stale,
    Error,
}

/// Outcome counters of one refresh pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshStats {
    pub total: usize,
    pub working: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub validated: bool,
}

/// Per-profile catalog entry as persisted in `model-catalog.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    pub profile_id: String,
    /// Milliseconds since epoch of the last successful or failed refresh write.
    pub updated_at: u64,
    /// Milliseconds since epoch of the last refresh attempt.
    pub last_attempt_at: u64,
    /// Freshness window.
    pub ttl_ms: u64,
    /// Model ids that passed validation (or the raw id list when skipped).
    pub models: Vec<String>,
    /// Everything upstream reported, in upstream order.
    pub raw_models: Vec<ModelDescriptor>,
    /// `Ready` or `Error`; never `Stale` on disk.
    pub status: EntryStatus,
    pub source: RefreshSource,
    pub stats: RefreshStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_models: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StoredEntry {
    /// Effective status at `now`: stored errors dominate, then TTL expiry.
    #[must_use]
    pub fn effective_status(&self, now: u64) -> EntryStatus {
        if self.status == EntryStatus::Error {
            EntryStatus::Error
        } else if now > self.updated_at + self.ttl_ms {
            EntryStatus::Stale
        } else {
            EntryStatus::Ready
        }
    }

    /// Materializes the derived read-side view.
    #[must_use]
    pub fn materialize(&self, now: u64) -> CatalogView {
        CatalogView {
            status: self.effective_status(now),
            age_ms: now.saturating_sub(self.updated_at),
            expires_at: self.updated_at + self.ttl_ms,
            entry: self.clone(),
        }
    }
}

/// Read-side view of a catalog entry with derived freshness fields.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogView {
    /// Effective status (`error` beats `stale` beats `ready`).
    pub status: EntryStatus,
    pub age_ms: u64,
    pub expires_at: u64,
    pub entry: StoredEntry,
}

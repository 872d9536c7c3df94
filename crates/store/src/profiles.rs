//! Profile store: profiles.json, the active-profile marker, and legacy
//! single-credential mirrors.

use relay_config::paths;
use relay_types::{Profile, RelayError, Result, UserInfo, is_copilot_token};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Legacy `auth.json` shape, read for migration and written as a mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LegacyAuth {
    #[serde(alias = "access_token")]
    token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

/// Persists profiles and the active-profile marker under one directory.
pub struct ProfileStore {
    root: PathBuf,
}

impl ProfileStore {
    /// Creates a store rooted at `root`. The directory is created lazily on
    /// first write.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Creates a store rooted at the default per-user config directory.
    #[must_use]
    pub fn open_default() -> Self {
        Self::new(paths::config_root())
    }

    /// The directory this store writes into.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    // ── Profiles ─────────────────────────────────────────────────────────

    /// Loads all profiles, migrating a legacy single-credential record into
    /// a synthetic profile on first read.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on unreadable (but present) state.
    pub fn load_profiles(&self) -> Result<BTreeMap<String, Profile>> {
        let mut profiles = self.read_profiles_file()?;
        if profiles.is_empty()
            && let Some(migrated) = self.migrate_legacy()
        {
            profiles.insert(migrated.id.clone(), migrated);
            self.write_profiles(&profiles)?;
            tracing::info!("migrated legacy credentials into profile store");
        }
        Ok(profiles)
    }

    /// Looks up one profile by id.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on unreadable state.
    pub fn get(&self, id: &str) -> Result<Option<Profile>> {
        Ok(self.load_profiles()?.remove(id))
    }

    /// Inserts or overwrites a profile. When the profile is the active one,
    /// the legacy single-credential mirror is updated as well.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on write failure.
    pub fn save_profile(&self, profile: &Profile) -> Result<()> {
        let mut profiles = self.load_profiles()?;
        profiles.insert(profile.id.clone(), profile.clone());
        self.write_profiles(&profiles)?;

        if self.read_active_marker().as_deref() == Some(profile.id.as_str()) {
            self.write_legacy_mirror(profile)?;
        }
        Ok(())
    }

    /// Deletes a profile. Deleting the active profile clears the marker and
    /// promotes an arbitrary remaining profile, if any.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on write failure.
    pub fn delete_profile(&self, id: &str) -> Result<()> {
        let mut profiles = self.load_profiles()?;
        profiles.remove(id);
        self.write_profiles(&profiles)?;

        if self.read_active_marker().as_deref() == Some(id) {
            let _ = std::fs::remove_file(self.root.join(paths::ACTIVE_PROFILE_FILE));
            if let Some(next) = profiles.keys().next() {
                self.set_active(next)?;
            }
        }
        Ok(())
    }

    // ── Active profile ───────────────────────────────────────────────────

    /// Returns the active profile id. When no marker is set and exactly one
    /// profile exists, that profile is selected and persisted.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on unreadable state.
    pub fn get_active(&self) -> Result<Option<String>> {
        if let Some(id) = self.read_active_marker() {
            return Ok(Some(id));
        }
        let profiles = self.load_profiles()?;
        if profiles.len() == 1 {
            let id = profiles.keys().next().cloned().unwrap_or_default();
            self.set_active(&id)?;
            return Ok(Some(id));
        }
        Ok(None)
    }

    /// Persists `id` as the active profile.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on write failure.
    pub fn set_active(&self, id: &str) -> Result<()> {
        self.ensure_root()?;
        let path = self.root.join(paths::ACTIVE_PROFILE_FILE);
        std::fs::write(&path, format!("{id}\n")).map_err(|e| RelayError::Storage(e.to_string()))?;
        restrict_permissions(&path);
        Ok(())
    }

    /// Loads the active profile, if a marker (or sole profile) resolves.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Storage`] on unreadable state.
    pub fn active_profile(&self) -> Result<Option<Profile>> {
        match self.get_active()? {
            Some(id) => self.get(&id),
            None => Ok(None),
        }
    }

    // ── Legacy credential files ──────────────────────────────────────────

    /// Reads the legacy `auth.json` / `token` credential, if it classifies
    /// as a Copilot-ecosystem token.
    #[must_use]
    pub fn load_legacy_token(&self) -> Option<String> {
        if let Some(auth) = self.read_legacy_auth()
            && is_copilot_token(&auth.token)
        {
            return Some(auth.token);
        }
        let raw = std::fs::read_to_string(self.root.join(paths::LEGACY_TOKEN_FILE)).ok()?;
        let token = raw.trim().to_string();
        is_copilot_token(&token).then_some(token)
    }

    // ── Private helpers ──────────────────────────────────────────────────

    fn ensure_root(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| RelayError::Storage(e.to_string()))?;
        restrict_dir_permissions(&self.root);
        Ok(())
    }

    fn read_profiles_file(&self) -> Result<BTreeMap<String, Profile>> {
        let path = self.root.join(paths::PROFILES_FILE);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| RelayError::Storage(e.to_string()))?;
        match serde_json::from_str(&raw) {
            Ok(map) => Ok(map),
            Err(e) => {
                // Malformed state is discarded, never fatal.
                tracing::warn!(error = %e, "profiles.json is malformed, starting empty");
                Ok(BTreeMap::new())
            }
        }
    }

    fn write_profiles(&self, profiles: &BTreeMap<String, Profile>) -> Result<()> {
        self.ensure_root()?;
        let path = self.root.join(paths::PROFILES_FILE);
        let json = serde_json::to_string_pretty(profiles)?;
        std::fs::write(&path, format!("{json}\n")).map_err(|e| RelayError::Storage(e.to_string()))?;
        restrict_permissions(&path);
        Ok(())
    }

    fn read_active_marker(&self) -> Option<String> {
        let raw = std::fs::read_to_string(self.root.join(paths::ACTIVE_PROFILE_FILE)).ok()?;
        let id = raw.trim().to_string();
        (!id.is_empty()).then_some(id)
    }

    fn read_legacy_auth(&self) -> Option<LegacyAuth> {
        let raw = std::fs::read_to_string(self.root.join(paths::LEGACY_AUTH_FILE)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Synthesizes a profile from legacy credential files, if any exist.
    fn migrate_legacy(&self) -> Option<Profile> {
        if let Some(auth) = self.read_legacy_auth() {
            let mut profile = Profile::new("github", UserInfo::new("unknown"), auth.token);
            if let Some(refresh) = auth.refresh_token {
                profile = profile.with_refresh(refresh);
            }
            return Some(profile);
        }
        let raw = std::fs::read_to_string(self.root.join(paths::LEGACY_TOKEN_FILE)).ok()?;
        let token = raw.trim().to_string();
        (!token.is_empty())
            .then(|| Profile::new("github", UserInfo::new("unknown"), token))
    }

    fn write_legacy_mirror(&self, profile: &Profile) -> Result<()> {
        self.ensure_root()?;
        let auth = LegacyAuth {
            token: profile.token.clone(),
            refresh_token: profile.refresh_token.clone(),
        };
        let auth_path = self.root.join(paths::LEGACY_AUTH_FILE);
        let json = serde_json::to_string_pretty(&auth)?;
        std::fs::write(&auth_path, format!("{json}\n"))
            .map_err(|e| RelayError::Storage(e.to_string()))?;
        restrict_permissions(&auth_path);

        let token_path = self.root.join(paths::LEGACY_TOKEN_FILE);
        std::fs::write(&token_path, format!("{}\n", profile.token))
            .map_err(|e| RelayError::Storage(e.to_string()))?;
        restrict_permissions(&token_path);
        Ok(())
    }
}

/// Best-effort chmod 600 on credential-bearing files.
fn restrict_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    let _ = path;
}

/// Best-effort chmod 700 on the config directory.
fn restrict_dir_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700));
    }
    #[cfg(not(unix))]
    let _ = path;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, ProfileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    fn make_profile(login: &str) -> Profile {
        Profile::new("github", UserInfo::new(login), format!("ghu_{login}"))
            .with_refresh(format!("gho_{login}"))
    }

    #[test]
    fn test_save_and_load() {
        let (_dir, store) = make_store();
        store.save_profile(&make_profile("octocat")).unwrap();
        let profiles = store.load_profiles().unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles["github-octocat"].token, "ghu_octocat");
    }

    #[test]
    fn test_get_missing() {
        let (_dir, store) = make_store();
        assert!(store.get("github-nobody").unwrap().is_none());
    }

    #[test]
    fn test_active_auto_selects_single_profile() {
        let (_dir, store) = make_store();
        store.save_profile(&make_profile("octocat")).unwrap();
        assert_eq!(store.get_active().unwrap().as_deref(), Some("github-octocat"));
        // Marker is now persisted.
        let marker =
            std::fs::read_to_string(store.root().join(paths::ACTIVE_PROFILE_FILE)).unwrap();
        assert_eq!(marker.trim(), "github-octocat");
    }

    #[test]
    fn test_active_not_selected_with_two_profiles() {
        let (_dir, store) = make_store();
        store.save_profile(&make_profile("alice")).unwrap();
        store.save_profile(&make_profile("bob")).unwrap();
        assert!(store.get_active().unwrap().is_none());
    }

    #[test]
    fn test_set_active_explicit() {
        let (_dir, store) = make_store();
        store.save_profile(&make_profile("alice")).unwrap();
        store.save_profile(&make_profile("bob")).unwrap();
        store.set_active("github-bob").unwrap();
        assert_eq!(store.get_active().unwrap().as_deref(), Some("github-bob"));
    }

    #[test]
    fn test_delete_active_promotes_survivor() {
        let (_dir, store) = make_store();
        store.save_profile(&make_profile("alice")).unwrap();
        store.save_profile(&make_profile("bob")).unwrap();
        store.set_active("github-alice").unwrap();
        store.delete_profile("github-alice").unwrap();
        assert_eq!(store.get_active().unwrap().as_deref(), Some("github-bob"));
    }

    #[test]
    fn test_delete_last_profile_clears_marker() {
        let (_dir, store) = make_store();
        store.save_profile(&make_profile("alice")).unwrap();
        store.set_active("github-alice").unwrap();
        store.delete_profile("github-alice").unwrap();
        assert!(store.get_active().unwrap().is_none());
        assert!(store.load_profiles().unwrap().is_empty());
    }

    #[test]
    fn test_active_profile_mirror_written() {
        let (_dir, store) = make_store();
        let mut p = make_profile("octocat");
        store.save_profile(&p).unwrap();
        store.set_active("github-octocat").unwrap();
        p.rotate_token("ghu_rotated");
        store.save_profile(&p).unwrap();

        let auth = std::fs::read_to_string(store.root().join(paths::LEGACY_AUTH_FILE)).unwrap();
        assert!(auth.contains("ghu_rotated"));
        let token = std::fs::read_to_string(store.root().join(paths::LEGACY_TOKEN_FILE)).unwrap();
        assert_eq!(token.trim(), "ghu_rotated");
    }

    #[test]
    fn test_legacy_migration_from_auth_json() {
        let (_dir, store) = make_store();
        std::fs::create_dir_all(store.root()).unwrap();
        std::fs::write(
            store.root().join(paths::LEGACY_AUTH_FILE),
            r#"{"token":"ghu_legacy","refresh_token":"gho_legacy"}"#,
        )
        .unwrap();

        let profiles = store.load_profiles().unwrap();
        assert_eq!(profiles.len(), 1);
        let p = &profiles["github-unknown"];
        assert_eq!(p.user.login, "unknown");
        assert_eq!(p.token, "ghu_legacy");
        assert_eq!(p.refresh_token.as_deref(), Some("gho_legacy"));
    }

    #[test]
    fn test_legacy_migration_from_token_file() {
        let (_dir, store) = make_store();
        std::fs::create_dir_all(store.root()).unwrap();
        std::fs::write(store.root().join(paths::LEGACY_TOKEN_FILE), "ghu_bare\n").unwrap();
        let profiles = store.load_profiles().unwrap();
        assert_eq!(profiles["github-unknown"].token, "ghu_bare");
    }

    #[test]
    fn test_no_migration_when_profiles_exist() {
        let (_dir, store) = make_store();
        store.save_profile(&make_profile("octocat")).unwrap();
        std::fs::write(
            store.root().join(paths::LEGACY_AUTH_FILE),
            r#"{"token":"ghu_legacy"}"#,
        )
        .unwrap();
        let profiles = store.load_profiles().unwrap();
        assert_eq!(profiles.len(), 1);
        assert!(profiles.contains_key("github-octocat"));
    }

    #[test]
    fn test_malformed_profiles_file_starts_empty() {
        let (_dir, store) = make_store();
        std::fs::create_dir_all(store.root()).unwrap();
        std::fs::write(store.root().join(paths::PROFILES_FILE), "not json {{{").unwrap();
        assert!(store.load_profiles().unwrap().is_empty());
    }

    #[test]
    fn test_load_legacy_token_rejects_foreign_values() {
        let (_dir, store) = make_store();
        std::fs::create_dir_all(store.root()).unwrap();
        std::fs::write(
            store.root().join(paths::LEGACY_AUTH_FILE),
            r#"{"token":"sk-ant-not-ours"}"#,
        )
        .unwrap();
        assert!(store.load_legacy_token().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt as _;
        let (_dir, store) = make_store();
        store.save_profile(&make_profile("octocat")).unwrap();
        let mode = std::fs::metadata(store.root().join(paths::PROFILES_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

// Runtime settings for devdash.
// Loaded once from settings.json in the platform config directory; every field has a default.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::backend::DEFAULT_SYNC_QUOTA;
use crate::cache::compress::COMPRESSION_THRESHOLD;
use crate::cache::memory::MAX_MEMORY_ITEMS;
use crate::cache::paths::{self, local_tier_dir, persistent_tier_dir};
use crate::cache::{
    DEFAULT_PREFIX, FileAsyncBackend, FileSyncBackend, MemoryAsyncBackend, MemorySyncBackend,
    StoreOptions, TieredStore,
};
use crate::error::{DashError, Result};

/// Where the persistent cache tiers live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Process-lifetime storage; nothing survives a restart.
    Memory,
    /// One file per key under the cache directory.
    #[default]
    Filesystem,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub storage: StorageKind,
    /// Overrides the platform cache directory.
    pub cache_dir: Option<PathBuf>,
    pub prefix: String,
    pub max_memory_items: usize,
    pub compression_threshold: usize,
    pub local_quota_bytes: usize,
    pub snapshot_max_age_secs: u64,
    pub snapshot_save_delay_ms: u64,
    pub widget_ttl_secs: u64,
    /// Directory containing `registry.json` and one folder per theme.
    pub themes_dir: PathBuf,
    /// Optional token for GitHub API requests.
    pub github_token: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage: StorageKind::default(),
            cache_dir: None,
            prefix: DEFAULT_PREFIX.to_string(),
            max_memory_items: MAX_MEMORY_ITEMS,
            compression_threshold: COMPRESSION_THRESHOLD,
            local_quota_bytes: DEFAULT_SYNC_QUOTA,
            snapshot_max_age_secs: 24 * 60 * 60,
            snapshot_save_delay_ms: 3000,
            widget_ttl_secs: 5 * 60,
            themes_dir: PathBuf::from("themes"),
            github_token: None,
        }
    }
}

impl Settings {
    /// Load from the platform settings file, falling back to defaults.
    pub fn load() -> Result<Self> {
        match paths::settings_path() {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("no config directory, using default settings");
                Ok(Self::default())
            }
        }
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let settings = serde_json::from_str(&contents)?;
                info!(path = %path.display(), "loaded settings");
                Ok(settings)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn snapshot_max_age(&self) -> Duration {
        Duration::from_secs(self.snapshot_max_age_secs)
    }

    pub fn snapshot_save_delay(&self) -> Duration {
        Duration::from_millis(self.snapshot_save_delay_ms)
    }

    pub fn widget_ttl(&self) -> Duration {
        Duration::from_secs(self.widget_ttl_secs)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            prefix: self.prefix.clone(),
            max_memory_items: self.max_memory_items,
            compression_threshold: self.compression_threshold,
        }
    }

    fn cache_root(&self) -> Result<PathBuf> {
        self.cache_dir
            .clone()
            .or_else(paths::cache_dir)
            .ok_or_else(|| DashError::Other("could not determine cache directory".to_string()))
    }

    /// Build the tiered store with the configured backends.
    pub fn build_store(&self) -> Result<TieredStore> {
        let store = TieredStore::new(self.store_options());

        let store = match self.storage {
            StorageKind::Memory => store
                .with_local(Arc::new(MemorySyncBackend::with_quota(self.local_quota_bytes)))
                .with_persistent(Arc::new(MemoryAsyncBackend::new())),
            StorageKind::Filesystem => {
                let root = self.cache_root()?;
                debug!(root = %root.display(), "using filesystem cache tiers");
                store
                    .with_local(Arc::new(FileSyncBackend::with_quota(
                        local_tier_dir(&root),
                        self.local_quota_bytes,
                    )))
                    .with_persistent(Arc::new(FileAsyncBackend::new(persistent_tier_dir(&root))))
            }
        };

        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load_from(&temp_dir.path().join("settings.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.snapshot_save_delay(), Duration::from_secs(3));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");
        std::fs::write(&path, r#"{"storage": "memory", "widget_ttl_secs": 60}"#).unwrap();

        let settings = Settings::load_from(&path).unwrap();

        assert_eq!(settings.storage, StorageKind::Memory);
        assert_eq!(settings.widget_ttl(), Duration::from_secs(60));
        assert_eq!(settings.prefix, DEFAULT_PREFIX);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");
        std::fs::write(&path, "{ nope").unwrap();

        assert!(matches!(Settings::load_from(&path), Err(DashError::Json(_))));
    }

    #[tokio::test]
    async fn test_filesystem_store_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings {
            cache_dir: Some(temp_dir.path().to_path_buf()),
            ..Settings::default()
        };

        let store = settings.build_store().unwrap();
        store.set("selectedTheme", json!("matrix")).await;
        store.flush().await;

        let reopened = settings.build_store().unwrap();
        assert_eq!(reopened.get_sync("selectedTheme"), Some(json!("matrix")));
        assert!(local_tier_dir(temp_dir.path()).join("devdash_selectedTheme.txt").exists());
        assert!(
            persistent_tier_dir(temp_dir.path())
                .join("devdash_selectedTheme.json")
                .exists()
        );
    }
}

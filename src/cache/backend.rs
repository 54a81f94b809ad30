// Persistent storage backends behind the memory tier.
// A synchronous capped string store and an asynchronous JSON store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{DashError, Result};

/// Default capacity of the synchronous tier, in bytes of keys plus values.
pub const DEFAULT_SYNC_QUOTA: usize = 5 * 1024 * 1024;

/// Synchronous key/value string store with a capacity limit.
///
/// `set` fails with [`DashError::QuotaExceeded`] when the write would not
/// fit. Reads never block on I/O the caller would notice.
pub trait SyncBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    /// All stored keys, least recently written first.
    fn keys(&self) -> Result<Vec<String>>;
}

/// Asynchronous key/value store for arbitrary JSON values.
#[async_trait]
pub trait AsyncBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    async fn remove(&self, keys: &[String]) -> Result<()>;

    async fn keys(&self) -> Result<Vec<String>>;
}

/// In-memory synchronous backend with a byte quota.
#[derive(Debug)]
pub struct MemorySyncBackend {
    /// Entries ordered by last write, oldest first.
    entries: Mutex<Vec<(String, String)>>,
    quota: usize,
}

impl Default for MemorySyncBackend {
    fn default() -> Self {
        Self::with_quota(DEFAULT_SYNC_QUOTA)
    }
}

impl MemorySyncBackend {
    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            quota,
        }
    }

    /// Bytes currently used by keys and values.
    pub fn used(&self) -> usize {
        self.lock()
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, String)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SyncBackend for MemorySyncBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .lock()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.lock();
        let used: usize = entries
            .iter()
            .filter(|(k, _)| k != key)
            .map(|(k, v)| k.len() + v.len())
            .sum();
        let needed = key.len() + value.len();

        if used + needed > self.quota {
            return Err(DashError::QuotaExceeded {
                key: key.to_string(),
                needed,
                available: self.quota.saturating_sub(used),
            });
        }

        entries.retain(|(k, _)| k != key);
        entries.push((key.to_string(), value.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock().retain(|(k, _)| k != key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.lock().iter().map(|(k, _)| k.clone()).collect())
    }
}

/// In-memory asynchronous backend.
#[derive(Debug, Default)]
pub struct MemoryAsyncBackend {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryAsyncBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AsyncBackend for MemoryAsyncBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> Result<()> {
        let mut entries = self.entries.write().await;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sync_quota_rejects_overflow() {
        let backend = MemorySyncBackend::with_quota(16);
        backend.set("a", "12345").unwrap();

        let err = backend.set("b", "0123456789abc").unwrap_err();
        assert!(matches!(err, DashError::QuotaExceeded { .. }));
        assert_eq!(backend.get("b").unwrap(), None);
    }

    #[test]
    fn test_sync_overwrite_does_not_double_count() {
        let backend = MemorySyncBackend::with_quota(10);
        backend.set("k", "123456789").unwrap();
        backend.set("k", "987654321").unwrap();

        assert_eq!(backend.used(), 10);
        assert_eq!(backend.get("k").unwrap().as_deref(), Some("987654321"));
    }

    #[test]
    fn test_sync_keys_ordered_by_last_write() {
        let backend = MemorySyncBackend::default();
        backend.set("a", "1").unwrap();
        backend.set("b", "2").unwrap();
        backend.set("a", "3").unwrap();

        assert_eq!(backend.keys().unwrap(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_async_backend_round_trip() {
        let backend = MemoryAsyncBackend::new();
        backend.set("k", json!({"stars": 5})).await.unwrap();

        assert_eq!(backend.get("k").await.unwrap(), Some(json!({"stars": 5})));

        backend.remove(&["k".to_string()]).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
    }
}

// Three-tier cache: memory, synchronous local store, asynchronous persistent store.
// Reads promote upward; writes go to every tier; persistent failures degrade to a miss.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::clock::{Clock, SystemClock};

use super::backend::{AsyncBackend, MemoryAsyncBackend, MemorySyncBackend, SyncBackend};
use super::compress::{COMPRESSION_THRESHOLD, compress_with_threshold, decompress};
use super::entry::{CacheEntry, Lookup};
use super::memory::{MAX_MEMORY_ITEMS, MemoryTier};

/// Namespace prefix for keys in the persistent tiers.
pub const DEFAULT_PREFIX: &str = "devdash_";

/// Tunables for a [`TieredStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub prefix: String,
    pub max_memory_items: usize,
    pub compression_threshold: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            max_memory_items: MAX_MEMORY_ITEMS,
            compression_threshold: COMPRESSION_THRESHOLD,
        }
    }
}

/// Item counts per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub memory_items: usize,
    pub local_items: usize,
}

/// Layered key/value cache.
///
/// The cache is advisory: every persistent-tier failure is logged and
/// treated as "no cached value". Keys passed to the public API are
/// unprefixed; the namespace prefix is applied only in the persistent tiers.
pub struct TieredStore {
    memory: Mutex<MemoryTier>,
    local: Option<Arc<dyn SyncBackend>>,
    persistent: Option<Arc<dyn AsyncBackend>>,
    options: StoreOptions,
    clock: Arc<dyn Clock>,
    /// Fire-and-forget persistent writes not yet known to be finished.
    pending_writes: Mutex<Vec<JoinHandle<()>>>,
}

impl TieredStore {
    /// Memory-only store; attach persistent tiers with the `with_*` methods.
    pub fn new(options: StoreOptions) -> Self {
        Self {
            memory: Mutex::new(MemoryTier::new(options.max_memory_items)),
            local: None,
            persistent: None,
            options,
            clock: Arc::new(SystemClock),
            pending_writes: Mutex::new(Vec::new()),
        }
    }

    /// Store with in-memory backends for both persistent tiers.
    pub fn in_memory() -> Self {
        Self::new(StoreOptions::default())
            .with_local(Arc::new(MemorySyncBackend::default()))
            .with_persistent(Arc::new(MemoryAsyncBackend::new()))
    }

    pub fn with_local(mut self, backend: Arc<dyn SyncBackend>) -> Self {
        self.local = Some(backend);
        self
    }

    pub fn with_persistent(mut self, backend: Arc<dyn AsyncBackend>) -> Self {
        self.persistent = Some(backend);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}", self.options.prefix, key)
    }

    fn memory(&self) -> MutexGuard<'_, MemoryTier> {
        self.memory.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read from memory, then the synchronous tier. Never awaits.
    pub fn get_sync(&self, key: &str) -> Option<Value> {
        let cached = self.memory().get(key).cloned();
        if cached.is_some() {
            trace!(key, "memory hit");
            return cached;
        }

        let local = self.local.as_ref()?;
        let raw = match local.get(&self.namespaced(key)) {
            Ok(Some(raw)) if !raw.is_empty() => raw,
            Ok(_) => return None,
            Err(e) => {
                debug!(key, error = %e, "local tier read failed");
                return None;
            }
        };

        match serde_json::from_str::<Value>(&decompress(&raw)) {
            Ok(Value::Null) => None,
            Ok(value) => {
                trace!(key, "local hit, promoting to memory");
                self.insert_memory(key, value.clone());
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "discarding unreadable local entry");
                None
            }
        }
    }

    /// Read through all tiers, promoting a persistent hit into both faster tiers.
    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.get_sync(key) {
            return Some(value);
        }

        let persistent = self.persistent.as_ref()?;
        match persistent.get(&self.namespaced(key)).await {
            Ok(Some(Value::Null)) | Ok(None) => None,
            Ok(Some(value)) => {
                debug!(key, "persistent hit, promoting");
                self.insert_memory(key, value.clone());
                self.write_local(key, &value);
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "persistent tier read failed");
                None
            }
        }
    }

    /// Write to every tier. The persistent write runs in the background.
    pub async fn set(&self, key: &str, value: Value) {
        self.insert_memory(key, value.clone());
        self.write_local(key, &value);

        if let Some(persistent) = &self.persistent {
            let persistent = Arc::clone(persistent);
            let namespaced = self.namespaced(key);
            let handle = tokio::spawn(async move {
                if let Err(e) = persistent.set(&namespaced, value).await {
                    warn!(key = %namespaced, error = %e, "persistent tier write failed");
                }
            });
            self.track(handle);
        }
    }

    /// Remove a key from every tier.
    pub async fn remove(&self, key: &str) {
        // A queued write must not resurrect the key afterwards.
        self.flush().await;

        self.memory().remove(key);
        let namespaced = self.namespaced(key);

        if let Some(local) = &self.local {
            if let Err(e) = local.remove(&namespaced) {
                warn!(key, error = %e, "local tier remove failed");
            }
        }

        if let Some(persistent) = &self.persistent {
            if let Err(e) = persistent.remove(&[namespaced]).await {
                warn!(key, error = %e, "persistent tier remove failed");
            }
        }
    }

    /// Remove every key under this store's prefix. Other keys are untouched.
    pub async fn clear(&self) {
        self.flush().await;
        self.memory().clear();

        if let Some(local) = &self.local {
            match local.keys() {
                Ok(keys) => {
                    for key in keys.iter().filter(|k| k.starts_with(&self.options.prefix)) {
                        if let Err(e) = local.remove(key) {
                            warn!(key = %key, error = %e, "local tier remove failed");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "local tier listing failed"),
            }
        }

        if let Some(persistent) = &self.persistent {
            match persistent.keys().await {
                Ok(keys) => {
                    let own: Vec<String> = keys
                        .into_iter()
                        .filter(|k| k.starts_with(&self.options.prefix))
                        .collect();
                    if !own.is_empty() {
                        if let Err(e) = persistent.remove(&own).await {
                            warn!(error = %e, "persistent tier clear failed");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "persistent tier listing failed"),
            }
        }
    }

    /// Warm the memory tier from the synchronous tier.
    pub fn preload<S: AsRef<str>>(&self, keys: &[S]) {
        for key in keys {
            self.get_sync(key.as_ref());
        }
    }

    pub fn stats(&self) -> CacheStats {
        let local_items = self
            .local
            .as_ref()
            .and_then(|local| local.keys().ok())
            .map(|keys| {
                keys.iter()
                    .filter(|k| k.starts_with(&self.options.prefix))
                    .count()
            })
            .unwrap_or(0);

        CacheStats {
            memory_items: self.memory().len(),
            local_items,
        }
    }

    /// Wait for outstanding background writes to finish.
    pub async fn flush(&self) {
        let pending: Vec<JoinHandle<()>> = {
            let mut guard = self.pending_writes.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for handle in pending {
            if let Err(e) = handle.await {
                warn!(error = %e, "background write task failed");
            }
        }
    }

    /// Store `value` wrapped with a fetch time and TTL.
    pub async fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) {
        let entry = CacheEntry::new(value, self.now(), ttl);
        match serde_json::to_value(&entry) {
            Ok(encoded) => self.set(key, encoded).await,
            Err(e) => warn!(key, error = %e, "failed to encode cache entry"),
        }
    }

    /// Synchronous freshness-aware read of a TTL entry.
    pub fn lookup_sync(&self, key: &str) -> Option<Lookup> {
        let raw = self.get_sync(key)?;
        self.to_lookup(key, raw)
    }

    /// Freshness-aware read of a TTL entry through every tier.
    pub async fn lookup(&self, key: &str) -> Option<Lookup> {
        let raw = self.get(key).await?;
        self.to_lookup(key, raw)
    }

    fn to_lookup(&self, key: &str, raw: Value) -> Option<Lookup> {
        match serde_json::from_value::<CacheEntry>(raw) {
            Ok(entry) => Some(Lookup {
                is_stale: entry.is_stale(self.now()),
                fetched_at: entry.fetched_at,
                value: entry.value,
            }),
            Err(e) => {
                debug!(key, error = %e, "value is not a TTL entry");
                None
            }
        }
    }

    /// Typed synchronous read.
    pub fn get_sync_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        decode(key, self.get_sync(key)?)
    }

    /// Typed read through every tier.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        decode(key, self.get(key).await?)
    }

    /// Typed write.
    pub async fn set_as<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(encoded) => self.set(key, encoded).await,
            Err(e) => warn!(key, error = %e, "failed to encode value"),
        }
    }

    fn insert_memory(&self, key: &str, value: Value) {
        if let Some(evicted) = self.memory().insert(key, value) {
            trace!(evicted = %evicted, "memory tier full, evicted oldest");
        }
    }

    fn write_local(&self, key: &str, value: &Value) {
        let Some(local) = &self.local else {
            return;
        };

        let serialized = match serde_json::to_string(value) {
            Ok(serialized) => serialized,
            Err(e) => {
                warn!(key, error = %e, "failed to serialize for local tier");
                return;
            }
        };
        let payload = compress_with_threshold(&serialized, self.options.compression_threshold);

        if let Err(e) = local.set(&self.namespaced(key), &payload) {
            // Best effort: free space for later writes, drop this one.
            warn!(key, error = %e, "local tier write failed, evicting oldest entries");
            self.cleanup_local(local.as_ref());
        }
    }

    /// Remove the oldest half of this store's keys from the synchronous tier.
    fn cleanup_local(&self, local: &dyn SyncBackend) {
        let keys = match local.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "local tier listing failed");
                return;
            }
        };

        let own: Vec<String> = keys
            .into_iter()
            .filter(|k| k.starts_with(&self.options.prefix))
            .collect();
        let doomed = own.len() / 2;

        for key in own.iter().take(doomed) {
            if let Err(e) = local.remove(key) {
                warn!(key = %key, error = %e, "local tier cleanup failed");
            }
        }
        debug!(removed = doomed, "local tier cleanup finished");
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut pending = self.pending_writes.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!(key, error = %e, "cached value has unexpected shape");
            None
        }
    }
}

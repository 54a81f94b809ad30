// Widget data cache with stale-while-revalidate fetching.
// Serves cached payloads immediately and refreshes stale ones in the background.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::elapsed_between;
use crate::error::{DashError, Result};

use super::entry::{DEFAULT_TTL, timestamp_millis, ttl_millis};
use super::tiered::TieredStore;

/// Persisted record for one widget's payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetCacheEntry {
    pub data: Value,
    #[serde(with = "timestamp_millis")]
    pub timestamp: DateTime<Utc>,
    #[serde(with = "ttl_millis", default = "default_ttl")]
    pub ttl: Duration,
}

fn default_ttl() -> Duration {
    DEFAULT_TTL
}

/// A cached payload with its freshness at read time.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedWidgetData {
    pub data: Value,
    pub is_stale: bool,
    pub timestamp: DateTime<Utc>,
}

/// Where a delivered payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataSource {
    pub from_cache: bool,
    pub is_stale: bool,
}

impl DataSource {
    pub const FRESH: DataSource = DataSource {
        from_cache: false,
        is_stale: false,
    };
}

pub type DataCallback = Arc<dyn Fn(&Value, DataSource) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&DashError) + Send + Sync>;

/// Options for [`WidgetCache::fetch_with_cache`].
#[derive(Clone)]
pub struct FetchOptions {
    pub ttl: Duration,
    pub on_data: Option<DataCallback>,
    pub on_error: Option<ErrorCallback>,
    /// Skip the cache read and fetch immediately.
    pub force_refresh: bool,
    /// Stops a background refresh and suppresses its callbacks once cancelled.
    pub cancel: Option<CancellationToken>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            on_data: None,
            on_error: None,
            force_refresh: false,
            cancel: None,
        }
    }
}

impl FetchOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn on_data(mut self, callback: impl Fn(&Value, DataSource) + Send + Sync + 'static) -> Self {
        self.on_data = Some(Arc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&DashError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Cache key for a widget's payload.
pub fn widget_key(widget_id: &str) -> String {
    format!("widget_{}", widget_id)
}

/// Per-widget view over a [`TieredStore`].
#[derive(Clone)]
pub struct WidgetCache {
    store: Arc<TieredStore>,
}

impl WidgetCache {
    pub fn new(store: Arc<TieredStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<TieredStore> {
        &self.store
    }

    /// Cached payload from the synchronous tiers.
    pub fn get_sync(&self, widget_id: &str) -> Option<CachedWidgetData> {
        let entry = self
            .store
            .get_sync_as::<WidgetCacheEntry>(&widget_key(widget_id))?;
        Some(self.freshness(entry))
    }

    /// Cached payload from any tier.
    pub async fn get(&self, widget_id: &str) -> Option<CachedWidgetData> {
        let entry = self
            .store
            .get_as::<WidgetCacheEntry>(&widget_key(widget_id))
            .await?;
        Some(self.freshness(entry))
    }

    pub async fn set(&self, widget_id: &str, data: Value, ttl: Duration) {
        store_payload(&self.store, widget_id, data, ttl).await;
    }

    pub async fn remove(&self, widget_id: &str) {
        self.store.remove(&widget_key(widget_id)).await;
    }

    fn freshness(&self, entry: WidgetCacheEntry) -> CachedWidgetData {
        let age = elapsed_between(entry.timestamp, self.store.now());
        CachedWidgetData {
            is_stale: age > entry.ttl,
            data: entry.data,
            timestamp: entry.timestamp,
        }
    }

    /// Stale-while-revalidate fetch.
    ///
    /// A cached payload is delivered to `on_data` before this returns. A fresh
    /// one ends the call without fetching; a stale one also starts a single
    /// background refresh whose result goes to `on_data` or `on_error`. With
    /// nothing cached, `fetch` runs now and its error is returned to the
    /// caller after `on_error` sees it.
    pub async fn fetch_with_cache<F, Fut>(
        &self,
        widget_id: &str,
        fetch: F,
        options: FetchOptions,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        if !options.force_refresh {
            if let Some(cached) = self.get_sync(widget_id) {
                if let Some(on_data) = &options.on_data {
                    on_data(
                        &cached.data,
                        DataSource {
                            from_cache: true,
                            is_stale: cached.is_stale,
                        },
                    );
                }

                if cached.is_stale {
                    debug!(widget = widget_id, "serving stale data, refreshing");
                    self.refresh_in_background(widget_id, fetch, options);
                }
                return Ok(cached.data);
            }
        }

        match fetch().await {
            Ok(data) => {
                store_payload(&self.store, widget_id, data.clone(), options.ttl).await;
                if let Some(on_data) = &options.on_data {
                    on_data(&data, DataSource::FRESH);
                }
                Ok(data)
            }
            Err(e) => {
                if let Some(on_error) = &options.on_error {
                    on_error(&e);
                }
                Err(e)
            }
        }
    }

    fn refresh_in_background<F, Fut>(&self, widget_id: &str, fetch: F, options: FetchOptions)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let widget_id = widget_id.to_string();
        let cancel = options.cancel.clone().unwrap_or_default();

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(widget = %widget_id, "background refresh cancelled");
                    return;
                }
                result = fetch() => result,
            };

            match result {
                Ok(data) => {
                    store_payload(&store, &widget_id, data.clone(), options.ttl).await;
                    if let Some(on_data) = &options.on_data {
                        on_data(&data, DataSource::FRESH);
                    }
                }
                Err(e) => {
                    warn!(widget = %widget_id, error = %e, "background refresh failed");
                    if let Some(on_error) = &options.on_error {
                        on_error(&e);
                    }
                }
            }
        });
    }
}

async fn store_payload(store: &TieredStore, widget_id: &str, data: Value, ttl: Duration) {
    let entry = WidgetCacheEntry {
        data,
        timestamp: store.now(),
        ttl,
    };
    store.set_as(&widget_key(widget_id), &entry).await;
}

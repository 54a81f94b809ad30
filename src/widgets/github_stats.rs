// GitHub stats widget.
// Shows repo, star and fork totals, served from the widget cache and refreshed in the background.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{DEFAULT_TTL, FetchOptions, WidgetCache};
use crate::config::{DashboardConfig, GITHUB_CREDENTIAL};
use crate::document::Document;
use crate::error::Result;
use crate::github::{GitHubClient, GitHubStats};

use super::Widget;

pub const GITHUB_STATS_WIDGET_ID: &str = "github-stats";

/// How often a mounted widget refetches.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Shortest refresh interval a widget accepts.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

const PLACEHOLDER: &str = "--";

/// Where the widget gets its numbers from.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn fetch_stats(&self, username: &str) -> Result<GitHubStats>;
}

#[async_trait]
impl StatsSource for GitHubClient {
    async fn fetch_stats(&self, username: &str) -> Result<GitHubStats> {
        self.get_stats(username).await
    }
}

/// Background work started by one `init`.
struct Refresher {
    interval: JoinHandle<()>,
    cancel: CancellationToken,
}

impl Refresher {
    fn stop(self) {
        self.cancel.cancel();
        self.interval.abort();
    }
}

pub struct GitHubStatsWidget {
    source: Arc<dyn StatsSource>,
    cache: WidgetCache,
    ttl: Duration,
    refresh_interval: Duration,
    refresher: Mutex<Option<Refresher>>,
}

impl GitHubStatsWidget {
    pub fn new(source: Arc<dyn StatsSource>, cache: WidgetCache) -> Self {
        Self {
            source,
            cache,
            ttl: DEFAULT_TTL,
            refresh_interval: REFRESH_INTERVAL,
            refresher: Mutex::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Clamped to [`MIN_REFRESH_INTERVAL`].
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval.max(MIN_REFRESH_INTERVAL);
        self
    }

    fn fetch_options(&self, document: &Arc<dyn Document>, cancel: &CancellationToken) -> FetchOptions {
        let on_data_doc = Arc::clone(document);
        FetchOptions::default()
            .with_ttl(self.ttl)
            .with_cancellation(cancel.clone())
            .on_data(move |data, source| {
                debug!(from_cache = source.from_cache, stale = source.is_stale, "GitHub stats delivered");
                show_stats(on_data_doc.as_ref(), data);
            })
            .on_error(|e| warn!(error = %e, "GitHub stats fetch failed"))
    }
}

/// Cache id for a user's stats; switching accounts misses the cache.
pub fn stats_cache_id(username: &str) -> String {
    format!("{}-{}", GITHUB_STATS_WIDGET_ID, username)
}

fn fetcher(
    source: Arc<dyn StatsSource>,
    username: String,
) -> impl FnOnce() -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + 'static {
    move || {
        Box::pin(async move {
            let stats = source.fetch_stats(&username).await?;
            Ok(serde_json::to_value(stats)?)
        })
    }
}

fn show_stats(document: &dyn Document, data: &Value) {
    match serde_json::from_value::<GitHubStats>(data.clone()) {
        Ok(stats) => {
            set_fields(
                document,
                &[
                    stats.public_repos.to_string(),
                    stats.total_stars.to_string(),
                    stats.total_forks.to_string(),
                    stats.top_language,
                ],
            );
        }
        Err(e) => {
            warn!(error = %e, "cached GitHub stats have unexpected shape");
            show_placeholders(document);
        }
    }
}

fn show_placeholders(document: &dyn Document) {
    set_fields(document, &std::array::from_fn(|_| PLACEHOLDER.to_string()));
}

fn set_fields(document: &dyn Document, values: &[String; 4]) {
    for (field, value) in ["repos", "stars", "forks", "top-language"].iter().zip(values) {
        document.set_text(GITHUB_STATS_WIDGET_ID, field, value);
    }
}

#[async_trait]
impl Widget for GitHubStatsWidget {
    fn id(&self) -> &str {
        GITHUB_STATS_WIDGET_ID
    }

    fn name(&self) -> &str {
        "GitHub Stats"
    }

    fn requires(&self) -> &[&'static str] {
        &[GITHUB_CREDENTIAL]
    }

    fn render(&self, _config: &DashboardConfig) -> String {
        let stat = |field: &str, label: &str| {
            format!(
                r#"<div class="stat-item"><span class="stat-label">{}</span><span class="stat-value" data-field="{}">{}</span></div>"#,
                label, field, PLACEHOLDER
            )
        };
        format!(
            r#"<div class="box" data-widget="github-stats"><div class="section-title">GitHub Stats</div><div class="stats-container">{}{}{}{}</div></div>"#,
            stat("repos", "Public Repos"),
            stat("stars", "Total Stars"),
            stat("forks", "Total Forks"),
            stat("top-language", "Top Language"),
        )
    }

    async fn init(&self, document: Arc<dyn Document>, config: &DashboardConfig) -> Result<()> {
        let Some(username) = config.profile.credential(GITHUB_CREDENTIAL) else {
            return Ok(());
        };
        let cache_id = stats_cache_id(username);
        let cancel = CancellationToken::new();

        let loaded = self
            .cache
            .fetch_with_cache(
                &cache_id,
                fetcher(Arc::clone(&self.source), username.to_string()),
                self.fetch_options(&document, &cancel),
            )
            .await;
        if loaded.is_err() {
            show_placeholders(document.as_ref());
        }

        let cache = self.cache.clone();
        let source = Arc::clone(&self.source);
        let username = username.to_string();
        let options = self.fetch_options(&document, &cancel).force_refresh(true);
        let every = self.refresh_interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                // Failures were already reported through on_error.
                let _ = cache
                    .fetch_with_cache(
                        &cache_id,
                        fetcher(Arc::clone(&source), username.clone()),
                        options.clone(),
                    )
                    .await;
            }
        });

        let mut refresher = self.refresher.lock().unwrap_or_else(|e| e.into_inner());
        let started = Refresher {
            interval: handle,
            cancel,
        };
        if let Some(previous) = refresher.replace(started) {
            previous.stop();
        }
        Ok(())
    }

    fn destroy(&self) {
        let mut refresher = self.refresher.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(running) = refresher.take() {
            running.stop();
        }
    }
}

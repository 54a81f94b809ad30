// Dashboard snapshots for instant hydration.
// Saves sanitized dashboard markup plus theme CSS variables and restores them before first paint.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::TieredStore;
use crate::cache::entry::timestamp_millis;
use crate::clock::elapsed_between;
use crate::document::Document;

/// Store key holding the snapshot record.
pub const SNAPSHOT_KEY: &str = "snapshot";

/// Snapshots older than this are discarded.
pub const SNAPSHOT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Default debounce window for [`SnapshotManager::schedule_save`].
pub const DEFAULT_SAVE_DELAY: Duration = Duration::from_secs(2);

/// CSS custom properties captured with every snapshot.
pub const TRACKED_CSS_VARIABLES: &[&str] = &[
    "--bg-primary",
    "--bg-secondary",
    "--bg-tertiary",
    "--text-primary",
    "--text-secondary",
    "--primary-color",
    "--accent-color",
    "--border-color",
    "--box-shadow",
    "--font-primary",
    "--font-secondary",
    "--success-color",
    "--warning-color",
    "--danger-color",
];

/// An opening or self-closing tag, quoted attribute values included.
static START_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<[A-Za-z](?:"[^"]*"|'[^']*'|[^"'>])*>"#).expect("start tag regex compiles")
});

static EVENT_HANDLER_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\s+on[a-z]+\s*=\s*(?:"[^"]*"|'[^']*'|[^\s<>"']+)"#)
        .expect("event handler regex compiles")
});

static SCRIPT_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<script\b[^>]*/?>")
        .expect("script element regex compiles")
});

/// A saved copy of the rendered dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub css_variables: BTreeMap<String, String>,
    #[serde(default)]
    pub theme_id: String,
    #[serde(with = "timestamp_millis")]
    pub timestamp: DateTime<Utc>,
}

impl Snapshot {
    /// Usable for `current_theme_id` at `now`.
    ///
    /// A snapshot exactly `max_age` old is still valid.
    pub fn is_valid(&self, current_theme_id: &str, max_age: Duration, now: DateTime<Utc>) -> bool {
        !self.html.is_empty()
            && !self.theme_id.is_empty()
            && self.theme_id == current_theme_id
            && elapsed_between(self.timestamp, now) <= max_age
    }
}

/// Summary of the stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub theme_id: String,
    pub timestamp: DateTime<Utc>,
    pub age: Duration,
    pub html_size: usize,
}

/// Result of [`SnapshotManager::load_snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SnapshotLoad {
    pub success: bool,
    pub theme_id: Option<String>,
}

/// Strip inline event handlers and script elements from markup.
pub fn sanitize_html(html: &str) -> String {
    let without_scripts = SCRIPT_ELEMENT.replace_all(html, "");
    START_TAG
        .replace_all(&without_scripts, |tag: &regex::Captures<'_>| {
            EVENT_HANDLER_ATTR.replace_all(&tag[0], "").into_owned()
        })
        .into_owned()
}

/// Saves and restores the dashboard snapshot through a [`TieredStore`].
pub struct SnapshotManager {
    store: Arc<TieredStore>,
    max_age: Duration,
    pending_save: Mutex<Option<JoinHandle<()>>>,
}

impl SnapshotManager {
    pub fn new(store: Arc<TieredStore>) -> Self {
        Self::with_max_age(store, SNAPSHOT_MAX_AGE)
    }

    pub fn with_max_age(store: Arc<TieredStore>, max_age: Duration) -> Self {
        Self {
            store,
            max_age,
            pending_save: Mutex::new(None),
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    fn pending(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending_save.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stored snapshot from the synchronous tiers.
    pub fn get_sync(&self) -> Option<Snapshot> {
        self.store.get_sync_as(SNAPSHOT_KEY)
    }

    /// Stored snapshot from any tier.
    pub async fn get(&self) -> Option<Snapshot> {
        self.store.get_as(SNAPSHOT_KEY).await
    }

    /// Check a snapshot against the active theme and this manager's max age.
    pub fn is_valid(&self, snapshot: &Snapshot, current_theme_id: &str) -> bool {
        snapshot.is_valid(current_theme_id, self.max_age, self.store.now())
    }

    /// Sanitize and store a snapshot, replacing any previous one.
    pub async fn save(
        &self,
        html: &str,
        css_variables: BTreeMap<String, String>,
        theme_id: &str,
    ) -> Snapshot {
        let snapshot = Snapshot {
            html: sanitize_html(html),
            css_variables,
            theme_id: theme_id.to_string(),
            timestamp: self.store.now(),
        };
        self.store.set_as(SNAPSHOT_KEY, &snapshot).await;

        debug!(
            theme = theme_id,
            bytes = snapshot.html.len(),
            "snapshot saved"
        );
        snapshot
    }

    /// Snapshot the visible dashboard of `document`.
    ///
    /// Returns `None` without saving when the dashboard is hidden.
    pub async fn capture(&self, document: &dyn Document, theme_id: &str) -> Option<Snapshot> {
        let Some(html) = document.dashboard_html() else {
            debug!("dashboard not visible, skipping snapshot");
            return None;
        };

        let css_variables: BTreeMap<String, String> = TRACKED_CSS_VARIABLES
            .iter()
            .filter_map(|name| {
                document
                    .css_variable(name)
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
                    .map(|value| (name.to_string(), value))
            })
            .collect();

        Some(self.save(&html, css_variables, theme_id).await)
    }

    /// Inject a valid snapshot into `document` before first paint.
    ///
    /// Never awaits. An expired snapshot is discarded in the background.
    pub fn load_snapshot(&self, document: &dyn Document, current_theme_id: &str) -> SnapshotLoad {
        let Some(snapshot) = self.get_sync() else {
            return SnapshotLoad::default();
        };

        if !self.is_valid(&snapshot, current_theme_id) {
            let age = elapsed_between(snapshot.timestamp, self.store.now());
            if age > self.max_age {
                info!(age_secs = age.as_secs(), "snapshot expired, discarding");
                self.discard_in_background();
            }
            return SnapshotLoad::default();
        }

        for (name, value) in &snapshot.css_variables {
            document.set_css_variable(name, value);
        }
        document.set_dashboard_html(&snapshot.html);

        debug!(theme = %snapshot.theme_id, "snapshot injected");
        SnapshotLoad {
            success: true,
            theme_id: Some(snapshot.theme_id),
        }
    }

    fn discard_in_background(&self) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let store = Arc::clone(&self.store);
                runtime.spawn(async move { store.remove(SNAPSHOT_KEY).await });
            }
            Err(_) => warn!("no runtime to discard expired snapshot"),
        }
    }

    /// Whether a snapshot with markup and a theme is stored.
    pub async fn has_snapshot(&self) -> bool {
        self.get()
            .await
            .is_some_and(|s| !s.html.is_empty() && !s.theme_id.is_empty())
    }

    pub async fn info(&self) -> Option<SnapshotInfo> {
        let snapshot = self.get().await?;
        Some(SnapshotInfo {
            age: elapsed_between(snapshot.timestamp, self.store.now()),
            html_size: snapshot.html.len(),
            theme_id: snapshot.theme_id,
            timestamp: snapshot.timestamp,
        })
    }

    /// Remove the stored snapshot and cancel any scheduled save.
    pub async fn clear(&self) {
        self.cancel_scheduled_save();
        self.store.remove(SNAPSHOT_KEY).await;
        debug!("snapshot cleared");
    }

    /// Capture `document` once `delay` passes without another call.
    pub fn schedule_save(
        self: &Arc<Self>,
        document: Arc<dyn Document>,
        theme_id: &str,
        delay: Duration,
    ) {
        let manager = Arc::clone(self);
        let theme_id = theme_id.to_string();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager.capture(document.as_ref(), &theme_id).await;
        });

        if let Some(previous) = self.pending().replace(handle) {
            previous.abort();
        }
    }

    pub fn cancel_scheduled_save(&self) {
        if let Some(previous) = self.pending().take() {
            previous.abort();
        }
    }

    /// Wait for the scheduled save, if any, to run.
    pub async fn wait_for_scheduled_save(&self) {
        let handle = self.pending().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "snapshot save task failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::document::{MemoryDocument, Screen};

    fn manager_with_clock() -> (Arc<SnapshotManager>, ManualClock) {
        let clock = ManualClock::default();
        let store = TieredStore::in_memory().with_clock(Arc::new(clock.clone()));
        (Arc::new(SnapshotManager::new(Arc::new(store))), clock)
    }

    fn visible_document(html: &str) -> Arc<MemoryDocument> {
        let doc = Arc::new(MemoryDocument::new());
        doc.set_dashboard_html(html);
        doc.show(Screen::Dashboard);
        doc
    }

    fn snapshot_at(timestamp: DateTime<Utc>) -> Snapshot {
        Snapshot {
            html: "<div></div>".into(),
            css_variables: BTreeMap::new(),
            theme_id: "matrix".into(),
            timestamp,
        }
    }

    #[test]
    fn test_validity_boundaries() {
        let now = Utc::now();
        let max_age = SNAPSHOT_MAX_AGE;

        let exact = snapshot_at(now - chrono::Duration::milliseconds(max_age.as_millis() as i64));
        assert!(exact.is_valid("matrix", max_age, now));

        let over = snapshot_at(
            now - chrono::Duration::milliseconds(max_age.as_millis() as i64 + 1),
        );
        assert!(!over.is_valid("matrix", max_age, now));

        assert!(!snapshot_at(now).is_valid("nord", max_age, now));

        let mut empty = snapshot_at(now);
        empty.html.clear();
        assert!(!empty.is_valid("matrix", max_age, now));
    }

    #[test]
    fn test_sanitize_strips_handlers_and_scripts() {
        let html = concat!(
            r#"<div onclick="go()" class="a"><button OnMouseOver='x()'>b</button>"#,
            r#"<img src="a.png" onerror=boom()><script type="text/javascript">alert(1)</script>"#,
            r#"<SCRIPT src="x.js"></SCRIPT></div>"#
        );

        assert_eq!(
            sanitize_html(html),
            r#"<div class="a"><button>b</button><img src="a.png"></div>"#
        );
        assert_eq!(sanitize_html("<p data-on=\"1\">ok</p>"), "<p data-on=\"1\">ok</p>");
    }

    #[test]
    fn test_sanitize_leaves_text_content_alone() {
        let html = r#"<p class="quote">Keep moving onward = progress</p><div id="x">y</div>"#;
        assert_eq!(sanitize_html(html), html);

        let mixed = r#"<span title="a > b" onclick="go()">say onload=now</span>"#;
        assert_eq!(
            sanitize_html(mixed),
            r#"<span title="a > b">say onload=now</span>"#
        );
    }

    #[tokio::test]
    async fn test_saved_snapshot_restores_verbatim() {
        let (manager, _clock) = manager_with_clock();
        let source = visible_document(
            r#"<section id="widgets"><div data-widget="clock" onclick="tick()">12:00</div></section>"#,
        );
        source.set_css_variable("--bg-primary", "#000");
        source.set_css_variable("--unrelated", "1");

        let saved = manager.capture(source.as_ref(), "matrix").await.unwrap();
        assert!(!saved.html.contains("onclick"));
        assert_eq!(saved.css_variables.len(), 1);

        let target = MemoryDocument::new();
        let outcome = manager.load_snapshot(&target, "matrix");

        assert_eq!(
            outcome,
            SnapshotLoad {
                success: true,
                theme_id: Some("matrix".into())
            }
        );
        assert_eq!(target.render_dashboard(), saved.html);
        assert_eq!(target.css_variable("--bg-primary").as_deref(), Some("#000"));
    }

    #[tokio::test]
    async fn test_load_rejects_other_theme_and_hidden_capture() {
        let (manager, _clock) = manager_with_clock();
        let hidden = MemoryDocument::new();
        hidden.set_dashboard_html("<div></div>");

        assert!(manager.capture(&hidden, "matrix").await.is_none());
        assert!(!manager.has_snapshot().await);

        manager.save("<div></div>", BTreeMap::new(), "matrix").await;
        let target = MemoryDocument::new();
        assert!(!manager.load_snapshot(&target, "nord").success);
        assert_eq!(target.render_dashboard(), "");
        assert!(manager.has_snapshot().await);
    }

    #[tokio::test]
    async fn test_expired_snapshot_is_discarded() {
        let (manager, clock) = manager_with_clock();
        manager.save("<div></div>", BTreeMap::new(), "matrix").await;
        clock.advance(SNAPSHOT_MAX_AGE + Duration::from_secs(1));

        let outcome = manager.load_snapshot(&MemoryDocument::new(), "matrix");
        assert!(!outcome.success);

        // Let the background removal run.
        for _ in 0..10 {
            tokio::task::yield_now().await;
            if manager.get_sync().is_none() {
                break;
            }
        }
        assert!(manager.get_sync().is_none());
    }

    #[tokio::test]
    async fn test_info_reports_size_and_age() {
        let (manager, clock) = manager_with_clock();
        manager.save("<p>hello</p>", BTreeMap::new(), "nord").await;
        clock.advance(Duration::from_secs(90));

        let info = manager.info().await.unwrap();
        assert_eq!(info.theme_id, "nord");
        assert_eq!(info.html_size, "<p>hello</p>".len());
        assert_eq!(info.age, Duration::from_secs(90));

        manager.clear().await;
        assert!(manager.info().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_saves_coalesce() {
        let (manager, _clock) = manager_with_clock();
        let doc = visible_document("<p>v1</p>");
        let delay = Duration::from_secs(2);

        manager.schedule_save(doc.clone(), "matrix", delay);
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(1)).await;
        doc.set_dashboard_html("<p>v2</p>");
        manager.schedule_save(doc.clone(), "matrix", delay);
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(1500)).await;
        tokio::task::yield_now().await;

        // The first timer would have fired by now.
        assert!(manager.get_sync().is_none());

        doc.set_dashboard_html("<p>v3</p>");
        manager.schedule_save(doc.clone(), "matrix", delay);
        manager.wait_for_scheduled_save().await;

        let saved = manager.get_sync().unwrap();
        assert_eq!(saved.html, "<p>v3</p>");
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cancels_scheduled_save() {
        let (manager, _clock) = manager_with_clock();
        let doc = visible_document("<p>v1</p>");

        manager.schedule_save(doc, "matrix", Duration::from_secs(2));
        manager.clear().await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(manager.get_sync().is_none());
    }
}

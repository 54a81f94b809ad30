// Dashboard widgets and their registry.
// Widgets render markup, attach behavior to it, and release their timers on destroy.

pub mod clock;
pub mod github_stats;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{DashboardConfig, Requirements};
use crate::document::{Document, tag_root_element};
use crate::error::Result;

pub use clock::ClockWidget;
pub use github_stats::GitHubStatsWidget;

/// A dashboard building block.
///
/// `render` produces markup carrying `data-widget="<id>"`; `init` attaches
/// behavior to markup that is already in the document, whether freshly
/// mounted or restored from a snapshot.
#[async_trait]
pub trait Widget: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str {
        self.id()
    }

    /// Credentials (see [`crate::config::Profile::credential`]) this widget needs.
    fn requires(&self) -> &[&'static str] {
        &[]
    }

    fn render(&self, config: &DashboardConfig) -> String;

    async fn init(&self, _document: Arc<dyn Document>, _config: &DashboardConfig) -> Result<()> {
        Ok(())
    }

    /// Stop timers and background work.
    fn destroy(&self) {}
}

/// Outcome of [`WidgetRegistry::check_requirements`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementCheck {
    pub met: bool,
    pub missing: Vec<String>,
}

#[derive(Clone)]
struct Instance {
    widget: Arc<dyn Widget>,
    /// `None` for widgets hydrated in place from a snapshot.
    container_id: Option<String>,
}

/// Registered widgets and the ones currently live in the document.
#[derive(Default)]
pub struct WidgetRegistry {
    widgets: RwLock<BTreeMap<String, Arc<dyn Widget>>>,
    instances: Mutex<BTreeMap<String, Instance>>,
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn instances(&self) -> MutexGuard<'_, BTreeMap<String, Instance>> {
        self.instances.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a widget, replacing any with the same id.
    ///
    /// Returns false for a widget without an id.
    pub fn register(&self, widget: Arc<dyn Widget>) -> bool {
        let id = widget.id().to_string();
        if id.is_empty() {
            warn!("widget registration failed: missing id");
            return false;
        }
        self.widgets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, widget);
        true
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Widget>> {
        self.widgets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn all(&self) -> Vec<Arc<dyn Widget>> {
        self.widgets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn check_requirements(&self, widget: &dyn Widget, config: &DashboardConfig) -> RequirementCheck {
        let missing: Vec<String> = widget
            .requires()
            .iter()
            .filter(|name| config.profile.credential(name).is_none())
            .map(|name| name.to_string())
            .collect();

        RequirementCheck {
            met: missing.is_empty(),
            missing,
        }
    }

    /// Union of the credentials needed by the given widgets.
    ///
    /// Unregistered ids contribute nothing.
    pub fn requirements_for<S: AsRef<str>>(&self, widget_ids: &[S]) -> Requirements {
        let widgets = self.widgets.read().unwrap_or_else(|e| e.into_inner());
        Requirements::new(
            widget_ids
                .iter()
                .filter_map(|id| widgets.get(id.as_ref()))
                .flat_map(|widget| widget.requires().iter().copied()),
        )
    }

    /// Render a widget into a container and initialize it.
    ///
    /// Returns false when the widget, its container or its markup is
    /// missing, when it is already mounted, or when `init` fails.
    pub async fn mount(
        &self,
        document: Arc<dyn Document>,
        widget_id: &str,
        container_id: &str,
        config: &DashboardConfig,
    ) -> bool {
        let Some(widget) = self.get(widget_id) else {
            warn!(widget = widget_id, "widget not found");
            return false;
        };
        if self.instances().contains_key(widget_id) {
            warn!(widget = widget_id, "widget already mounted");
            return false;
        }
        if !document.has_container(container_id) {
            warn!(widget = widget_id, container = container_id, "container not found");
            return false;
        }

        let check = self.check_requirements(widget.as_ref(), config);
        if !check.met {
            warn!(widget = widget_id, missing = ?check.missing, "widget missing config");
        }

        let html = widget.render(config);
        let Some(element) = tag_root_element(&html, "data-widget-id", widget_id) else {
            warn!(widget = widget_id, "widget returned empty markup");
            return false;
        };
        if !document.append_widget(container_id, widget_id, &element) {
            return false;
        }

        if let Err(e) = widget.init(Arc::clone(&document), config).await {
            warn!(widget = widget_id, error = %e, "widget init failed");
            widget.destroy();
            document.remove_widget(widget_id);
            return false;
        }

        self.instances().insert(
            widget_id.to_string(),
            Instance {
                widget,
                container_id: Some(container_id.to_string()),
            },
        );
        debug!(widget = widget_id, container = container_id, "widget mounted");
        true
    }

    /// Initialize a widget whose markup is already in the document.
    pub async fn hydrate(
        &self,
        document: Arc<dyn Document>,
        widget_id: &str,
        config: &DashboardConfig,
    ) -> bool {
        let Some(widget) = self.get(widget_id) else {
            return false;
        };
        if !document.has_widget(widget_id) || self.instances().contains_key(widget_id) {
            return false;
        }

        if let Err(e) = widget.init(document, config).await {
            warn!(widget = widget_id, error = %e, "widget hydration failed");
            widget.destroy();
            return false;
        }

        self.instances().insert(
            widget_id.to_string(),
            Instance {
                widget,
                container_id: None,
            },
        );
        debug!(widget = widget_id, "widget hydrated");
        true
    }

    /// Destroy a live widget and remove its mounted markup.
    pub fn unmount(&self, document: &dyn Document, widget_id: &str) -> bool {
        let Some(instance) = self.instances().remove(widget_id) else {
            return false;
        };

        instance.widget.destroy();
        if instance.container_id.is_some() {
            document.remove_widget(widget_id);
        }
        debug!(widget = widget_id, "widget unmounted");
        true
    }

    pub fn unmount_all(&self, document: &dyn Document) {
        let ids: Vec<String> = self.instances().keys().cloned().collect();
        for id in ids {
            self.unmount(document, &id);
        }
    }

    /// Unmount and remount a widget in its original container.
    pub async fn refresh(
        &self,
        document: Arc<dyn Document>,
        widget_id: &str,
        config: &DashboardConfig,
    ) -> bool {
        let container_id = match self.instances().get(widget_id) {
            Some(instance) => instance.container_id.clone(),
            None => return false,
        };
        let Some(container_id) = container_id else {
            // Hydrated in place: nothing to re-render, just re-initialize.
            self.unmount(document.as_ref(), widget_id);
            return self.hydrate(document, widget_id, config).await;
        };

        self.unmount(document.as_ref(), widget_id);
        self.mount(document, widget_id, &container_id, config).await
    }

    /// Ids of live widgets.
    pub fn mounted(&self) -> Vec<String> {
        self.instances().keys().cloned().collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{GITHUB_CREDENTIAL, Profile, VisualDefaults};
    use crate::document::{MemoryDocument, Screen};
    use crate::error::DashError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Widget that counts lifecycle calls.
    pub(crate) struct StubWidget {
        pub id: &'static str,
        pub requires: &'static [&'static str],
        pub fail_init: bool,
        pub inits: AtomicUsize,
        pub destroys: AtomicUsize,
    }

    impl StubWidget {
        pub fn new(id: &'static str) -> Self {
            Self {
                id,
                requires: &[],
                fail_init: false,
                inits: AtomicUsize::new(0),
                destroys: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Widget for StubWidget {
        fn id(&self) -> &str {
            self.id
        }

        fn requires(&self) -> &[&'static str] {
            self.requires
        }

        fn render(&self, _config: &DashboardConfig) -> String {
            format!(r#"<div data-widget="{}">stub</div>"#, self.id)
        }

        async fn init(&self, _document: Arc<dyn Document>, _config: &DashboardConfig) -> Result<()> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            if self.fail_init {
                return Err(DashError::widget(self.id, "init failed"));
            }
            Ok(())
        }

        fn destroy(&self) {
            self.destroys.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn dashboard(html: &str) -> Arc<MemoryDocument> {
        let doc = Arc::new(MemoryDocument::new());
        doc.set_dashboard_html(html);
        doc.show(Screen::Dashboard);
        doc
    }

    #[test]
    fn test_register_rejects_missing_id() {
        let registry = WidgetRegistry::new();
        assert!(!registry.register(Arc::new(StubWidget::new(""))));
        assert!(registry.register(Arc::new(StubWidget::new("clock"))));
        assert!(registry.get("clock").is_some());
        assert_eq!(registry.all().len(), 1);
    }

    #[test]
    fn test_requirements() {
        let registry = WidgetRegistry::new();
        let mut gh = StubWidget::new("github-stats");
        gh.requires = &[GITHUB_CREDENTIAL];
        registry.register(Arc::new(gh));
        registry.register(Arc::new(StubWidget::new("clock")));

        let config = DashboardConfig::default();
        let check = registry.check_requirements(registry.get("github-stats").unwrap().as_ref(), &config);
        assert!(!check.met);
        assert_eq!(check.missing, vec!["github"]);

        assert!(registry.requirements_for(&["clock"]).credentials.is_empty());
        assert!(
            registry
                .requirements_for(&["clock", "github-stats", "unknown"])
                .requires(GITHUB_CREDENTIAL)
        );

        let configured = DashboardConfig::merge(
            &VisualDefaults::default(),
            Some(Profile {
                github_username: "octocat".into(),
                ..Profile::default()
            }),
            None,
        );
        assert!(
            registry
                .check_requirements(registry.get("github-stats").unwrap().as_ref(), &configured)
                .met
        );
    }

    #[tokio::test]
    async fn test_mount_unmount_lifecycle() {
        let registry = WidgetRegistry::new();
        let stub = Arc::new(StubWidget::new("clock"));
        registry.register(stub.clone());
        let doc = dashboard(r#"<div id="top"></div>"#);
        let config = DashboardConfig::default();

        assert!(registry.mount(doc.clone(), "clock", "top", &config).await);
        assert!(!registry.mount(doc.clone(), "clock", "top", &config).await);
        assert!(!registry.mount(doc.clone(), "missing", "top", &config).await);
        assert!(doc.dashboard_html().unwrap().contains(r#"data-widget-id="clock""#));
        assert_eq!(registry.mounted(), vec!["clock"]);

        assert!(registry.refresh(doc.clone(), "clock", &config).await);
        assert_eq!(stub.inits.load(Ordering::SeqCst), 2);
        assert_eq!(stub.destroys.load(Ordering::SeqCst), 1);

        registry.unmount_all(doc.as_ref());
        assert!(registry.mounted().is_empty());
        assert!(!doc.has_widget("clock"));
        assert_eq!(stub.destroys.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_init_leaves_nothing_mounted() {
        let registry = WidgetRegistry::new();
        let mut stub = StubWidget::new("todo");
        stub.fail_init = true;
        registry.register(Arc::new(stub));
        let doc = dashboard(r#"<div id="side"></div>"#);

        assert!(!registry.mount(doc.clone(), "todo", "side", &DashboardConfig::default()).await);
        assert!(!doc.has_widget("todo"));
        assert!(registry.mounted().is_empty());
    }

    #[tokio::test]
    async fn test_hydrate_requires_existing_markup() {
        let registry = WidgetRegistry::new();
        let stub = Arc::new(StubWidget::new("clock"));
        registry.register(stub.clone());
        let config = DashboardConfig::default();

        let empty = dashboard("<main></main>");
        assert!(!registry.hydrate(empty, "clock", &config).await);

        let restored = dashboard(r#"<main><div data-widget="clock">09:00</div></main>"#);
        assert!(registry.hydrate(restored.clone(), "clock", &config).await);
        assert_eq!(stub.inits.load(Ordering::SeqCst), 1);

        // Unmounting a hydrated widget stops it but leaves the restored markup.
        assert!(registry.unmount(restored.as_ref(), "clock"));
        assert!(restored.has_widget("clock"));
        assert_eq!(stub.destroys.load(Ordering::SeqCst), 1);
    }
}

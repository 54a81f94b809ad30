// Theme loading and selection.
// Reads the theme registry, caches theme configs and templates, and mounts a theme's widgets.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::TieredStore;
use crate::cache::paths::sanitize_name;
use crate::config::DashboardConfig;
use crate::document::Document;
use crate::error::{DashError, Result};
use crate::widgets::WidgetRegistry;

pub const SELECTED_THEME_KEY: &str = "selectedTheme";
pub const WIDGET_PREFS_KEY: &str = "enabledWidgets";
pub const THEME_CACHE_KEY: &str = "themeCache";

/// One entry of `registry.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub preview: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeRegistry {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub themes: Vec<ThemeSummary>,
}

/// Widget layout declared by a theme.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeWidgets {
    /// Widgets enabled until the user picks their own.
    #[serde(rename = "default", default)]
    pub defaults: Vec<String>,
    #[serde(default)]
    pub supported: Vec<String>,
    /// Widget id to container element id.
    #[serde(default)]
    pub positions: BTreeMap<String, String>,
}

/// A theme's `theme.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default)]
    pub styles: Option<String>,
    #[serde(default)]
    pub scripts: Vec<String>,
    #[serde(default)]
    pub css_variables: BTreeMap<String, String>,
    #[serde(default)]
    pub widgets: ThemeWidgets,
}

fn default_template() -> String {
    "template.html".to_string()
}

/// Where themes come from.
#[async_trait]
pub trait ThemeSource: Send + Sync {
    async fn registry(&self) -> Result<ThemeRegistry>;

    /// `None` when the theme does not exist.
    async fn theme_config(&self, theme_id: &str) -> Result<Option<ThemeConfig>>;

    /// `None` when the template does not exist.
    async fn template(&self, theme_id: &str, file: &str) -> Result<Option<String>>;

    /// Reference to a theme file usable from the rendered page.
    fn asset_href(&self, theme_id: &str, file: &str) -> String;
}

/// Themes laid out as `registry.json` plus one directory per theme.
#[derive(Debug, Clone)]
pub struct DirThemeSource {
    root: PathBuf,
}

impl DirThemeSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn theme_file(&self, theme_id: &str, file: &str) -> PathBuf {
        self.root
            .join(sanitize_name(theme_id))
            .join(file.trim_start_matches('/'))
    }
}

async fn read_optional(path: PathBuf) -> Result<Option<String>> {
    match tokio::fs::read_to_string(&path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ThemeSource for DirThemeSource {
    async fn registry(&self) -> Result<ThemeRegistry> {
        match read_optional(self.root.join("registry.json")).await? {
            Some(contents) => Ok(serde_json::from_str(&contents)?),
            None => Err(DashError::NotFound(format!(
                "{}/registry.json",
                self.root.display()
            ))),
        }
    }

    async fn theme_config(&self, theme_id: &str) -> Result<Option<ThemeConfig>> {
        match read_optional(self.theme_file(theme_id, "theme.json")).await? {
            Some(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            None => Ok(None),
        }
    }

    async fn template(&self, theme_id: &str, file: &str) -> Result<Option<String>> {
        read_optional(self.theme_file(theme_id, file)).await
    }

    fn asset_href(&self, theme_id: &str, file: &str) -> String {
        self.theme_file(theme_id, file).display().to_string()
    }
}

/// What the dashboard should do after [`ThemeLoader::init`].
#[derive(Debug, Clone, PartialEq)]
pub enum ThemeInit {
    /// No usable theme is selected; offer these.
    NeedsSelection { themes: Vec<ThemeSummary> },
    Selected {
        theme_id: String,
        config: ThemeConfig,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CachedTheme {
    #[serde(default)]
    config: Option<ThemeConfig>,
    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    cached_at: Option<DateTime<Utc>>,
}

type ThemeCache = BTreeMap<String, CachedTheme>;

/// Loads, caches and applies themes.
pub struct ThemeLoader {
    source: Arc<dyn ThemeSource>,
    store: Arc<TieredStore>,
    registry: RwLock<ThemeRegistry>,
    current: RwLock<Option<(String, ThemeConfig)>>,
}

impl ThemeLoader {
    pub fn new(source: Arc<dyn ThemeSource>, store: Arc<TieredStore>) -> Self {
        Self {
            source,
            store,
            registry: RwLock::new(ThemeRegistry::default()),
            current: RwLock::new(None),
        }
    }

    /// Load the registry and the selected theme's config.
    ///
    /// A selected theme that no longer exists falls back to the first
    /// registry theme.
    pub async fn init(&self) -> Result<ThemeInit> {
        let registry = match self.source.registry().await {
            Ok(registry) => registry,
            Err(e) => {
                warn!(error = %e, "failed to load theme registry");
                ThemeRegistry::default()
            }
        };
        *self.registry.write().unwrap_or_else(|e| e.into_inner()) = registry.clone();

        let Some(selected) = self.selected_theme_id().await else {
            return Ok(ThemeInit::NeedsSelection {
                themes: registry.themes,
            });
        };

        let (theme_id, config) = match self.load_theme_config(&selected).await? {
            Some(config) => (selected, config),
            None => {
                warn!(theme = %selected, "selected theme not found");
                let fallback = match registry.themes.first() {
                    Some(first) => self.load_theme_config(&first.id).await?.map(|c| (first.id.clone(), c)),
                    None => None,
                };
                match fallback {
                    Some(found) => found,
                    None => {
                        return Ok(ThemeInit::NeedsSelection {
                            themes: registry.themes,
                        });
                    }
                }
            }
        };

        self.set_current(&theme_id, &config);
        Ok(ThemeInit::Selected { theme_id, config })
    }

    fn set_current(&self, theme_id: &str, config: &ThemeConfig) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) =
            Some((theme_id.to_string(), config.clone()));
    }

    async fn theme_cache(&self) -> ThemeCache {
        self.store.get_as(THEME_CACHE_KEY).await.unwrap_or_default()
    }

    async fn update_theme_cache(&self, theme_id: &str, update: impl FnOnce(&mut CachedTheme)) {
        let mut cache = self.theme_cache().await;
        let entry = cache.entry(theme_id.to_string()).or_default();
        update(entry);
        entry.cached_at = Some(self.store.now());
        self.store.set_as(THEME_CACHE_KEY, &cache).await;
    }

    /// A theme's config, from the cache when present.
    pub async fn load_theme_config(&self, theme_id: &str) -> Result<Option<ThemeConfig>> {
        if let Some(config) = self
            .theme_cache()
            .await
            .get(theme_id)
            .and_then(|cached| cached.config.clone())
        {
            debug!(theme = theme_id, "theme config loaded from cache");
            return Ok(Some(config));
        }

        let Some(config) = self.source.theme_config(theme_id).await? else {
            return Ok(None);
        };
        let cached = config.clone();
        self.update_theme_cache(theme_id, |entry| entry.config = Some(cached))
            .await;
        Ok(Some(config))
    }

    /// A theme's template markup, from the cache when present.
    pub async fn load_template(&self, theme_id: &str, file: &str) -> Result<Option<String>> {
        if let Some(template) = self
            .theme_cache()
            .await
            .get(theme_id)
            .and_then(|cached| cached.template.clone())
        {
            debug!(theme = theme_id, "theme template loaded from cache");
            return Ok(Some(template));
        }

        let Some(template) = self.source.template(theme_id, file).await? else {
            return Ok(None);
        };
        let cached = template.clone();
        self.update_theme_cache(theme_id, |entry| entry.template = Some(cached))
            .await;
        Ok(Some(template))
    }

    /// Apply a theme to the document and remember it as selected.
    pub async fn apply_theme(&self, document: &dyn Document, theme_id: &str) -> Result<ThemeConfig> {
        let config = self
            .load_theme_config(theme_id)
            .await?
            .ok_or_else(|| DashError::ThemeNotFound(theme_id.to_string()))?;

        self.apply_styles(document, theme_id, &config);
        for (name, value) in &config.css_variables {
            document.set_css_variable(name, value);
        }

        let template = self
            .load_template(theme_id, &config.template)
            .await?
            .ok_or_else(|| DashError::TemplateMissing {
                theme: theme_id.to_string(),
                template: config.template.clone(),
            })?;
        document.set_dashboard_html(&template);

        self.set_current(theme_id, &config);
        self.store
            .set(SELECTED_THEME_KEY, serde_json::Value::String(theme_id.to_string()))
            .await;

        info!(theme = theme_id, "theme applied");
        Ok(config)
    }

    /// Link the theme stylesheet, or remove the previous one.
    pub fn apply_styles(&self, document: &dyn Document, theme_id: &str, config: &ThemeConfig) {
        let href = config
            .styles
            .as_deref()
            .map(|file| self.source.asset_href(theme_id, file));
        document.set_stylesheet(href.as_deref());
    }

    /// Mount the enabled widgets that have a position in the current theme.
    pub async fn mount_widgets(
        &self,
        document: Arc<dyn Document>,
        registry: &WidgetRegistry,
        config: &DashboardConfig,
    ) -> Vec<String> {
        let Some((_, theme)) = self.current() else {
            warn!("cannot mount widgets: no theme applied");
            return Vec::new();
        };

        let mut mounted = Vec::new();
        for widget_id in self.enabled_widgets(&theme).await {
            let Some(container_id) = theme.widgets.positions.get(&widget_id) else {
                continue;
            };
            if registry
                .mount(Arc::clone(&document), &widget_id, container_id, config)
                .await
            {
                mounted.push(widget_id);
            }
        }
        mounted
    }

    /// The user's widget selection, or the theme defaults when unset.
    pub async fn enabled_widgets(&self, theme: &ThemeConfig) -> Vec<String> {
        match self.store.get_as::<Vec<String>>(WIDGET_PREFS_KEY).await {
            Some(stored) if !stored.is_empty() => stored,
            _ => theme.widgets.defaults.clone(),
        }
    }

    pub async fn save_enabled_widgets(&self, widget_ids: &[String]) {
        self.store.set_as(WIDGET_PREFS_KEY, &widget_ids).await;
    }

    /// Selected theme id from the synchronous tiers.
    pub fn selected_theme_id_sync(&self) -> Option<String> {
        self.store
            .get_sync_as::<String>(SELECTED_THEME_KEY)
            .filter(|id| !id.is_empty())
    }

    pub async fn selected_theme_id(&self) -> Option<String> {
        self.store
            .get_as::<String>(SELECTED_THEME_KEY)
            .await
            .filter(|id| !id.is_empty())
    }

    /// Currently applied theme id and config.
    pub fn current(&self) -> Option<(String, ThemeConfig)> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn current_theme_id(&self) -> Option<String> {
        self.current().map(|(id, _)| id)
    }

    pub fn supported_widgets(&self) -> Vec<String> {
        self.current()
            .map(|(_, theme)| theme.widgets.supported)
            .unwrap_or_default()
    }

    pub fn available_themes(&self) -> Vec<ThemeSummary> {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .themes
            .clone()
    }

    pub async fn clear_theme_cache(&self) {
        self.store.remove(THEME_CACHE_KEY).await;
    }

    pub async fn clear_selection(&self) {
        self.store.remove(SELECTED_THEME_KEY).await;
    }
}

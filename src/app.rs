// Dashboard bootstrap and screen state.
// Chooses between hydrating a saved snapshot and a cold theme render, then keeps the snapshot current.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::cache::TieredStore;
use crate::config::{ASSETS_KEY, ConfigManager, DashboardConfig, PROFILE_KEY, Profile, Requirements};
use crate::document::{Document, Screen, escape_html};
use crate::error::Result;
use crate::snapshot::{SNAPSHOT_KEY, SnapshotManager};
use crate::theme::{
    SELECTED_THEME_KEY, ThemeConfig, ThemeInit, ThemeLoader, ThemeSource, ThemeSummary,
    WIDGET_PREFS_KEY,
};
use crate::widgets::WidgetRegistry;

/// Delay between the last change and the snapshot save.
pub const SNAPSHOT_SAVE_DELAY: Duration = Duration::from_secs(3);

/// Keys warmed into memory before the first synchronous read.
const PRELOAD_KEYS: [&str; 5] = [
    SNAPSHOT_KEY,
    SELECTED_THEME_KEY,
    WIDGET_PREFS_KEY,
    PROFILE_KEY,
    ASSETS_KEY,
];

const INIT_FAILED_MESSAGE: &str = "Failed to initialize. Please refresh the page.";

/// `data-action` of the error screen's reload button; handled by [`Bootstrap::reload`].
pub const RELOAD_ACTION: &str = "reload";

/// Which screen the dashboard is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppState {
    #[default]
    Loading,
    ThemePicker,
    Setup,
    Dashboard,
    Error,
}

impl AppState {
    pub fn title(&self) -> &'static str {
        match self {
            AppState::Loading => "Loading",
            AppState::ThemePicker => "Theme Picker",
            AppState::Setup => "Setup",
            AppState::Dashboard => "Dashboard",
            AppState::Error => "Error",
        }
    }

    pub fn screen(&self) -> Screen {
        match self {
            AppState::Loading => Screen::Loading,
            AppState::ThemePicker => Screen::ThemePicker,
            AppState::Setup => Screen::Setup,
            AppState::Dashboard => Screen::Dashboard,
            AppState::Error => Screen::Error,
        }
    }
}

/// Startup orchestrator for one page.
pub struct Bootstrap {
    document: Arc<dyn Document>,
    store: Arc<TieredStore>,
    snapshots: Arc<SnapshotManager>,
    themes: ThemeLoader,
    config: Arc<ConfigManager>,
    widgets: Arc<WidgetRegistry>,
    save_delay: Duration,
    state: Mutex<AppState>,
    current_theme_id: Mutex<Option<String>>,
    instant_loaded: AtomicBool,
}

impl Bootstrap {
    pub fn new(
        document: Arc<dyn Document>,
        store: Arc<TieredStore>,
        theme_source: Arc<dyn ThemeSource>,
    ) -> Self {
        Self {
            snapshots: Arc::new(SnapshotManager::new(Arc::clone(&store))),
            themes: ThemeLoader::new(theme_source, Arc::clone(&store)),
            config: Arc::new(ConfigManager::new(Arc::clone(&store))),
            widgets: Arc::new(WidgetRegistry::new()),
            save_delay: SNAPSHOT_SAVE_DELAY,
            state: Mutex::new(AppState::Loading),
            current_theme_id: Mutex::new(None),
            instant_loaded: AtomicBool::new(false),
            document,
            store,
        }
    }

    pub fn with_widgets(mut self, widgets: Arc<WidgetRegistry>) -> Self {
        self.widgets = widgets;
        self
    }

    pub fn with_config(mut self, config: Arc<ConfigManager>) -> Self {
        self.config = config;
        self
    }

    pub fn with_snapshot_max_age(mut self, max_age: Duration) -> Self {
        self.snapshots = Arc::new(SnapshotManager::with_max_age(Arc::clone(&self.store), max_age));
        self
    }

    pub fn with_save_delay(mut self, delay: Duration) -> Self {
        self.save_delay = delay;
        self
    }

    pub fn state(&self) -> AppState {
        *self.state_guard()
    }

    fn state_guard(&self) -> MutexGuard<'_, AppState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: AppState) {
        let previous = std::mem::replace(&mut *self.state_guard(), state);
        if previous != state {
            info!(from = previous.title(), to = state.title(), "state changed");
        }
    }

    pub fn current_theme_id(&self) -> Option<String> {
        self.current_theme_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_current_theme(&self, theme_id: &str) {
        *self.current_theme_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(theme_id.to_string());
    }

    /// Whether [`Bootstrap::instant_load`] injected a snapshot.
    pub fn instant_loaded(&self) -> bool {
        self.instant_loaded.load(Ordering::SeqCst)
    }

    pub fn snapshots(&self) -> &Arc<SnapshotManager> {
        &self.snapshots
    }

    pub fn theme_loader(&self) -> &ThemeLoader {
        &self.themes
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config
    }

    pub fn widgets(&self) -> &Arc<WidgetRegistry> {
        &self.widgets
    }

    /// Inject the saved snapshot before anything else runs.
    ///
    /// Reads only the synchronous tiers.
    pub fn instant_load(&self) -> bool {
        self.store.preload(&PRELOAD_KEYS);

        let Some(theme_id) = self.themes.selected_theme_id_sync() else {
            return false;
        };

        let outcome = self.snapshots.load_snapshot(self.document.as_ref(), &theme_id);
        if outcome.success {
            self.document.show(Screen::Dashboard);
            self.instant_loaded.store(true, Ordering::SeqCst);
            info!(theme = %theme_id, "snapshot restored before first paint");
        }
        outcome.success
    }

    /// Pick the hot or cold path. Failures end on the error screen.
    pub async fn init(&self) {
        if let Err(e) = self.try_init().await {
            error!(error = %e, "initialization failed");
            self.show_error(INIT_FAILED_MESSAGE);
        }
    }

    async fn try_init(&self) -> Result<()> {
        match self.themes.init().await? {
            ThemeInit::NeedsSelection { themes } => {
                self.snapshots.clear().await;
                self.show_theme_picker(&themes);
            }
            ThemeInit::Selected { theme_id, config } => {
                let snapshot_matches = self
                    .snapshots
                    .get_sync()
                    .is_some_and(|s| s.theme_id == theme_id);
                self.set_current_theme(&theme_id);

                if self.instant_loaded() && snapshot_matches {
                    self.hydrate_from_snapshot(&theme_id, &config).await;
                } else {
                    debug!(theme = %theme_id, "cold start");
                    self.themes.apply_theme(self.document.as_ref(), &theme_id).await?;
                    self.check_profile_and_proceed(&config).await;
                }
            }
        }
        Ok(())
    }

    fn requirements(&self, theme: &ThemeConfig) -> Requirements {
        self.widgets.requirements_for(&theme.widgets.defaults)
    }

    /// Hot path: attach behavior to the injected markup.
    async fn hydrate_from_snapshot(&self, theme_id: &str, theme: &ThemeConfig) {
        let config = self.config.get_config().await;
        let requirements = self.requirements(theme);

        if requirements.needs_setup() && !config.is_configured(Some(&requirements)) {
            self.snapshots.clear().await;
            self.show_setup(&requirements);
            return;
        }

        self.set_state(AppState::Dashboard);
        self.themes.apply_styles(self.document.as_ref(), theme_id, theme);
        self.hydrate_widgets(theme, &config).await;
        self.apply_user_config(&config);
        self.schedule_snapshot_save();
    }

    /// Initialize every enabled widget whose markup is present, concurrently.
    async fn hydrate_widgets(&self, theme: &ThemeConfig, config: &DashboardConfig) {
        let mut tasks = JoinSet::new();

        for widget_id in self.themes.enabled_widgets(theme).await {
            let Some(widget) = self.widgets.get(&widget_id) else {
                continue;
            };
            if !self.document.has_widget(&widget_id) {
                continue;
            }
            let check = self.widgets.check_requirements(widget.as_ref(), config);
            if !check.met {
                debug!(widget = %widget_id, missing = ?check.missing, "skipping hydration");
                continue;
            }

            let widgets = Arc::clone(&self.widgets);
            let document = Arc::clone(&self.document);
            let config = config.clone();
            tasks.spawn(async move { widgets.hydrate(document, &widget_id, &config).await });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "widget hydration task failed");
            }
        }
    }

    /// Show setup when required credentials are missing, else the dashboard.
    async fn check_profile_and_proceed(&self, theme: &ThemeConfig) {
        let config = self.config.get_config().await;
        let requirements = self.requirements(theme);

        if requirements.needs_setup() && !config.is_configured(Some(&requirements)) {
            self.show_setup(&requirements);
        } else {
            self.show_dashboard(&config).await;
        }
    }

    pub fn show_theme_picker(&self, themes: &[ThemeSummary]) {
        self.set_state(AppState::ThemePicker);
        self.document
            .set_screen_html(Screen::ThemePicker, &render_theme_picker(themes));
        self.document.show(Screen::ThemePicker);
    }

    /// Switch themes from the picker or settings.
    pub async fn select_theme(&self, theme_id: &str) -> Result<()> {
        self.snapshots.clear().await;
        self.widgets.unmount_all(self.document.as_ref());

        let theme = self.themes.apply_theme(self.document.as_ref(), theme_id).await?;
        self.set_current_theme(theme_id);
        self.check_profile_and_proceed(&theme).await;
        Ok(())
    }

    pub fn show_setup(&self, requirements: &Requirements) {
        self.set_state(AppState::Setup);
        self.document
            .set_screen_html(Screen::Setup, &render_setup(requirements));
        self.document.show(Screen::Setup);
    }

    /// Save the setup form and continue to the dashboard.
    pub async fn complete_setup(&self, profile: Profile) {
        self.config.set_profile(profile).await;
        match self.themes.current() {
            Some((_, theme)) => self.check_profile_and_proceed(&theme).await,
            None => warn!("setup completed without a theme"),
        }
    }

    async fn show_dashboard(&self, config: &DashboardConfig) {
        self.set_state(AppState::Dashboard);
        self.document.show(Screen::Dashboard);

        let mounted = self
            .themes
            .mount_widgets(Arc::clone(&self.document), &self.widgets, config)
            .await;
        debug!(widgets = ?mounted, "widgets mounted");

        self.apply_user_config(config);
        self.schedule_snapshot_save();
    }

    /// Push user colors, images and quote into the document.
    pub fn apply_user_config(&self, config: &DashboardConfig) {
        let colors = [
            ("--primary-color", &config.theme.primary_color),
            ("--secondary-color", &config.theme.secondary_color),
            ("--accent-color", &config.theme.accent_color),
        ];
        for (name, value) in colors {
            if !value.is_empty() {
                self.document.set_css_variable(name, value);
            }
        }

        if !config.banner_image.is_empty() {
            self.document
                .set_css_variable("--banner-image", &format!("url({})", config.banner_image));
        }
        if !config.avatar_image.is_empty() {
            self.document
                .set_css_variable("--avatar-image", &format!("url({})", config.avatar_image));
        }
        if !config.custom_quote.is_empty() {
            self.document.set_text("profile", "quote", &config.custom_quote);
        }
    }

    pub fn schedule_snapshot_save(&self) {
        match self.current_theme_id() {
            Some(theme_id) => {
                self.snapshots
                    .schedule_save(Arc::clone(&self.document), &theme_id, self.save_delay)
            }
            None => debug!("no theme selected, not scheduling snapshot"),
        }
    }

    pub fn on_config_changed(&self, config: &DashboardConfig) {
        if self.state() == AppState::Dashboard {
            self.apply_user_config(config);
            self.schedule_snapshot_save();
        }
    }

    /// Apply config changes as they are published.
    pub fn watch_config(self: &Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.config.subscribe();
        let bootstrap = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(config) => bootstrap.on_config_changed(&config),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "config watcher lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Re-render the dashboard from the theme template.
    pub async fn refresh(&self) -> Result<()> {
        if self.state() != AppState::Dashboard {
            return Ok(());
        }
        let Some(theme_id) = self.current_theme_id() else {
            return Ok(());
        };

        let config = self.config.get_config().await;
        self.widgets.unmount_all(self.document.as_ref());
        self.themes.apply_theme(self.document.as_ref(), &theme_id).await?;
        self.themes
            .mount_widgets(Arc::clone(&self.document), &self.widgets, &config)
            .await;
        self.apply_user_config(&config);
        self.schedule_snapshot_save();
        Ok(())
    }

    /// Fixed error screen with a reload button.
    pub fn show_error(&self, message: &str) {
        self.set_state(AppState::Error);
        self.document
            .set_screen_html(Screen::Error, &render_error(message));
        self.document.show(Screen::Error);
    }

    /// Start over from the loading screen, as the reload button does.
    pub async fn reload(&self) {
        self.snapshots.cancel_scheduled_save();
        self.widgets.unmount_all(self.document.as_ref());
        self.instant_loaded.store(false, Ordering::SeqCst);
        self.set_state(AppState::Loading);
        self.document.show(Screen::Loading);

        self.instant_load();
        self.init().await;
    }

    /// Run the pending snapshot save and finish background writes.
    pub async fn settle(&self) {
        self.snapshots.wait_for_scheduled_save().await;
        self.store.flush().await;
    }

    /// Stop widget timers.
    pub fn shutdown(&self) {
        for widget_id in self.widgets.mounted() {
            if let Some(widget) = self.widgets.get(&widget_id) {
                widget.destroy();
            }
        }
    }
}

fn render_theme_picker(themes: &[ThemeSummary]) -> String {
    let cards: String = themes
        .iter()
        .map(|theme| {
            let name = if theme.name.is_empty() { theme.id.as_str() } else { theme.name.as_str() };
            let author = if theme.author.is_empty() { "Unknown" } else { theme.author.as_str() };
            format!(
                r#"<div class="theme-card" data-theme-id="{}"><div class="theme-info"><h3>{}</h3><p>{}</p><span class="theme-author">by {}</span></div></div>"#,
                escape_html(&theme.id),
                escape_html(name),
                escape_html(&theme.description),
                escape_html(author)
            )
        })
        .collect();
    format!(
        r#"<div id="themePickerRoot"><h2>Choose a theme</h2><div id="themeGrid">{}</div></div>"#,
        cards
    )
}

fn render_setup(requirements: &Requirements) -> String {
    let fields: String = requirements
        .credentials
        .iter()
        .map(|credential| {
            format!(
                r#"<label>{} username <input name="{}Username" required></label>"#,
                escape_html(credential),
                escape_html(credential)
            )
        })
        .collect();
    format!(
        r#"<div id="setupRoot"><h2>Set up your dashboard</h2><form id="setupForm">{}</form></div>"#,
        fields
    )
}

fn render_error(message: &str) -> String {
    format!(
        r#"<div id="errorRoot"><h2>Something went wrong</h2><p>{}</p><button type="button" id="reloadButton" data-action="{}">Refresh</button></div>"#,
        escape_html(message),
        RELOAD_ACTION
    )
}

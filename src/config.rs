// User profile, assets and visual defaults.
// Merged into one DashboardConfig; every change is broadcast to subscribers.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::cache::TieredStore;

pub const PROFILE_KEY: &str = "userProfile";
pub const ASSETS_KEY: &str = "userAssets";

/// Credential needed by the GitHub widgets.
pub const GITHUB_CREDENTIAL: &str = "github";

/// Credential needed by the LeetCode widgets.
pub const LEETCODE_CREDENTIAL: &str = "leetcode";

const EVENT_CAPACITY: usize = 16;

/// Personal details entered in the setup form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub github_username: String,
    pub leetcode_username: String,
    pub linkedin_url: String,
    pub name: String,
    pub title: String,
    pub location: String,
    pub avatar_image: String,
    pub custom_quote: String,
}

impl Profile {
    /// The profile value backing a named credential, if set.
    pub fn credential(&self, name: &str) -> Option<&str> {
        let value = match name {
            GITHUB_CREDENTIAL => &self.github_username,
            LEETCODE_CREDENTIAL => &self.leetcode_username,
            _ => return None,
        };
        let value = value.trim();
        (!value.is_empty()).then_some(value)
    }
}

/// Large user uploads kept apart from the profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Assets {
    pub banner_image: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeColors {
    pub primary_color: String,
    pub secondary_color: String,
    pub accent_color: String,
}

impl Default for ThemeColors {
    fn default() -> Self {
        Self {
            primary_color: "#4d90fe".to_string(),
            secondary_color: "#1a1a1a".to_string(),
            accent_color: "#ffffff".to_string(),
        }
    }
}

/// Values used when the user has not set their own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualDefaults {
    pub banner_image: String,
    pub avatar_image: String,
    pub custom_quote: String,
    pub theme: ThemeColors,
}

/// Everything a widget or theme reads about the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardConfig {
    pub profile: Profile,
    pub assets: Assets,
    pub theme: ThemeColors,
    pub banner_image: String,
    pub avatar_image: String,
    pub custom_quote: String,
}

impl DashboardConfig {
    /// Overlay stored profile and assets on the visual defaults.
    ///
    /// Empty profile or asset fields never override a default.
    pub fn merge(defaults: &VisualDefaults, profile: Option<Profile>, assets: Option<Assets>) -> Self {
        let profile = profile.unwrap_or_default();
        let assets = assets.unwrap_or_default();

        let pick = |own: &str, fallback: &str| {
            if own.is_empty() {
                fallback.to_string()
            } else {
                own.to_string()
            }
        };

        Self {
            banner_image: pick(&assets.banner_image, &defaults.banner_image),
            avatar_image: pick(&profile.avatar_image, &defaults.avatar_image),
            custom_quote: pick(&profile.custom_quote, &defaults.custom_quote),
            theme: defaults.theme.clone(),
            profile,
            assets,
        }
    }

    /// Whether the credentials in `requirements` are all present.
    ///
    /// Without explicit requirements both GitHub and LeetCode are needed.
    pub fn is_configured(&self, requirements: Option<&Requirements>) -> bool {
        match requirements {
            Some(requirements) => requirements
                .credentials
                .iter()
                .all(|name| self.profile.credential(name).is_some()),
            None => {
                self.profile.credential(GITHUB_CREDENTIAL).is_some()
                    && self.profile.credential(LEETCODE_CREDENTIAL).is_some()
            }
        }
    }
}

/// Credentials a theme's widgets need before the dashboard can show.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirements {
    pub credentials: BTreeSet<String>,
}

impl Requirements {
    pub fn new<I, S>(credentials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            credentials: credentials.into_iter().map(Into::into).collect(),
        }
    }

    pub fn needs_setup(&self) -> bool {
        !self.credentials.is_empty()
    }

    pub fn requires(&self, credential: &str) -> bool {
        self.credentials.contains(credential)
    }
}

/// Reads and writes the user's configuration through the store.
pub struct ConfigManager {
    store: Arc<TieredStore>,
    defaults: VisualDefaults,
    events: broadcast::Sender<DashboardConfig>,
}

impl ConfigManager {
    pub fn new(store: Arc<TieredStore>) -> Self {
        Self::with_defaults(store, VisualDefaults::default())
    }

    pub fn with_defaults(store: Arc<TieredStore>, defaults: VisualDefaults) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            defaults,
            events,
        }
    }

    /// Receive the merged config after every change.
    pub fn subscribe(&self) -> broadcast::Receiver<DashboardConfig> {
        self.events.subscribe()
    }

    pub async fn get_profile(&self) -> Option<Profile> {
        self.store.get_as(PROFILE_KEY).await
    }

    pub async fn get_assets(&self) -> Option<Assets> {
        self.store.get_as(ASSETS_KEY).await
    }

    pub async fn get_config(&self) -> DashboardConfig {
        let profile = self.get_profile().await;
        let assets = self.get_assets().await;
        DashboardConfig::merge(&self.defaults, profile, assets)
    }

    pub async fn set_profile(&self, profile: Profile) {
        self.store.set_as(PROFILE_KEY, &profile).await;
        self.notify().await;
    }

    pub async fn set_assets(&self, assets: Assets) {
        self.store.set_as(ASSETS_KEY, &assets).await;
        self.notify().await;
    }

    pub async fn clear_profile(&self) {
        self.store.remove(PROFILE_KEY).await;
        self.notify().await;
    }

    pub async fn clear_assets(&self) {
        self.store.remove(ASSETS_KEY).await;
        self.notify().await;
    }

    async fn notify(&self) {
        let config = self.get_config().await;
        match self.events.send(config) {
            Ok(receivers) => debug!(receivers, "config change published"),
            Err(_) => trace!("config changed with no subscribers"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_with(github: &str, leetcode: &str) -> Profile {
        Profile {
            github_username: github.into(),
            leetcode_username: leetcode.into(),
            ..Profile::default()
        }
    }

    #[test]
    fn test_merge_prefers_user_values_over_defaults() {
        let defaults = VisualDefaults {
            banner_image: "default-banner.png".into(),
            custom_quote: "Ship it".into(),
            ..VisualDefaults::default()
        };
        let profile = Profile {
            custom_quote: "Stay curious".into(),
            ..Profile::default()
        };

        let config = DashboardConfig::merge(&defaults, Some(profile), None);

        assert_eq!(config.custom_quote, "Stay curious");
        assert_eq!(config.banner_image, "default-banner.png");
        assert_eq!(config.theme.primary_color, "#4d90fe");

        let with_banner = DashboardConfig::merge(
            &defaults,
            None,
            Some(Assets {
                banner_image: "mine.png".into(),
            }),
        );
        assert_eq!(with_banner.banner_image, "mine.png");
        assert_eq!(with_banner.custom_quote, "Ship it");
    }

    #[test]
    fn test_is_configured() {
        let github_only = DashboardConfig::merge(
            &VisualDefaults::default(),
            Some(profile_with("octocat", "  ")),
            None,
        );

        assert!(github_only.is_configured(Some(&Requirements::new([GITHUB_CREDENTIAL]))));
        assert!(!github_only.is_configured(Some(&Requirements::new([
            GITHUB_CREDENTIAL,
            LEETCODE_CREDENTIAL
        ]))));
        assert!(github_only.is_configured(Some(&Requirements::default())));
        assert!(!github_only.is_configured(None));
    }

    #[test]
    fn test_profile_deserializes_with_missing_fields() {
        let profile: Profile = serde_json::from_str(r#"{"github_username":"octocat"}"#).unwrap();
        assert_eq!(profile.github_username, "octocat");
        assert_eq!(profile.name, "");
    }

    #[tokio::test]
    async fn test_changes_are_broadcast() {
        let manager = ConfigManager::new(Arc::new(TieredStore::in_memory()));
        let mut events = manager.subscribe();

        manager.set_profile(profile_with("octocat", "")).await;
        let config = events.recv().await.unwrap();
        assert_eq!(config.profile.github_username, "octocat");

        manager.clear_profile().await;
        let config = events.recv().await.unwrap();
        assert_eq!(config.profile, Profile::default());
        assert_eq!(manager.get_profile().await, None);
    }
}

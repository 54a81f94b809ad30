// devdash: a new-tab dashboard that paints from a saved snapshot and revalidates in the background.

pub mod app;
pub mod cache;
pub mod clock;
pub mod config;
pub mod document;
pub mod error;
pub mod github;
pub mod settings;
pub mod snapshot;
pub mod theme;
pub mod widgets;

pub use app::{AppState, Bootstrap};
pub use cache::{TieredStore, WidgetCache};
pub use config::{ConfigManager, DashboardConfig};
pub use document::{Document, MemoryDocument, Screen};
pub use error::{DashError, Result};
pub use settings::Settings;
pub use snapshot::SnapshotManager;
pub use theme::{DirThemeSource, ThemeLoader};
pub use widgets::{Widget, WidgetRegistry};

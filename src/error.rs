// Error types for devdash.
// Covers storage tiers, widget fetches, theme loading, and bootstrap failures.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded, resets at {reset_at}")]
    RateLimited { reset_at: String },

    #[error("Storage quota exceeded writing {key} ({needed} bytes, {available} available)")]
    QuotaExceeded {
        key: String,
        needed: usize,
        available: usize,
    },

    #[error("Theme not found: {0}")]
    ThemeNotFound(String),

    #[error("Template {template} missing for theme {theme}")]
    TemplateMissing { theme: String, template: String },

    #[error("Widget {widget} failed: {message}")]
    Widget { widget: String, message: String },

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl DashError {
    /// Build a widget failure from any displayable cause.
    pub fn widget(widget: impl Into<String>, message: impl ToString) -> Self {
        Self::Widget {
            widget: widget.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DashError>;

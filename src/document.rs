// Render surface the dashboard is drawn into.
// The trait stands in for the page; MemoryDocument keeps it as markup strings.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use regex::Regex;
use tracing::trace;

/// Top-level screens; exactly one is visible at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Screen {
    #[default]
    Loading,
    ThemePicker,
    Setup,
    Dashboard,
    Error,
}

/// The page a dashboard renders into.
///
/// Widgets are found by their `data-widget="<id>"` marker and carry
/// `data-field="<name>"` markers on elements whose text they update.
pub trait Document: Send + Sync {
    /// Dashboard root markup, `None` while the dashboard is hidden.
    fn dashboard_html(&self) -> Option<String>;

    /// Replace the dashboard root markup, dropping mounted widgets.
    fn set_dashboard_html(&self, html: &str);

    /// Show one screen and hide the others.
    fn show(&self, screen: Screen);

    fn visible_screen(&self) -> Screen;

    /// Markup of a non-dashboard screen (picker grid, setup form, error).
    fn set_screen_html(&self, screen: Screen, html: &str);

    fn css_variable(&self, name: &str) -> Option<String>;

    fn set_css_variable(&self, name: &str, value: &str);

    /// Theme stylesheet link; `None` removes it.
    fn set_stylesheet(&self, href: Option<&str>);

    fn has_container(&self, container_id: &str) -> bool;

    /// Append widget markup as the last child of a container.
    fn append_widget(&self, container_id: &str, widget_id: &str, html: &str) -> bool;

    fn remove_widget(&self, widget_id: &str) -> bool;

    /// Whether markup for `widget_id` is present, mounted or injected.
    fn has_widget(&self, widget_id: &str) -> bool;

    /// Set the text of a widget field.
    fn set_text(&self, widget_id: &str, field: &str, text: &str);
}

#[derive(Debug, Clone)]
struct Mount {
    container_id: String,
    widget_id: String,
    html: String,
}

#[derive(Debug, Default)]
struct Inner {
    screen: Screen,
    dashboard: String,
    mounts: Vec<Mount>,
    screens: HashMap<Screen, String>,
    css: BTreeMap<String, String>,
    stylesheet: Option<String>,
}

/// Markup-string document used by the CLI renderer and in tests.
#[derive(Debug, Default)]
pub struct MemoryDocument {
    inner: Mutex<Inner>,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Markup of a non-dashboard screen.
    pub fn screen_html(&self, screen: Screen) -> Option<String> {
        self.lock().screens.get(&screen).cloned()
    }

    pub fn stylesheet(&self) -> Option<String> {
        self.lock().stylesheet.clone()
    }

    pub fn css_variables(&self) -> BTreeMap<String, String> {
        self.lock().css.clone()
    }

    /// Dashboard markup regardless of which screen is visible.
    pub fn render_dashboard(&self) -> String {
        compose(&self.lock())
    }

    /// Complete standalone page with CSS variables and stylesheet applied.
    pub fn render_page(&self) -> String {
        let inner = self.lock();
        let vars: String = inner
            .css
            .iter()
            .map(|(name, value)| format!("{}: {};", name, value))
            .collect::<Vec<_>>()
            .join(" ");
        let link = inner
            .stylesheet
            .as_deref()
            .map(|href| format!("<link id=\"theme-styles\" rel=\"stylesheet\" href=\"{}\">", href))
            .unwrap_or_default();
        let body = match inner.screen {
            Screen::Dashboard => format!("<div id=\"dashboardRoot\">{}</div>", compose(&inner)),
            screen => inner.screens.get(&screen).cloned().unwrap_or_default(),
        };
        format!(
            "<!DOCTYPE html>\n<html style=\"{}\">\n<head>{}</head>\n<body>{}</body>\n</html>\n",
            vars, link, body
        )
    }
}

/// Dashboard markup with mounted widgets spliced into their containers.
fn compose(inner: &Inner) -> String {
    let mut html = inner.dashboard.clone();
    let mut containers: Vec<&str> = Vec::new();
    for mount in &inner.mounts {
        if !containers.contains(&mount.container_id.as_str()) {
            containers.push(&mount.container_id);
        }
    }

    for container in containers {
        let children: String = inner
            .mounts
            .iter()
            .filter(|m| m.container_id == container)
            .map(|m| m.html.as_str())
            .collect();
        if let Some(at) = container_close(&html, container) {
            html.insert_str(at, &children);
        }
    }
    html
}

/// Offset of an `id="container_id"` attribute, not a suffix like `data-id`.
fn find_id_attr(html: &str, container_id: &str) -> Option<usize> {
    let needle = format!("id=\"{}\"", container_id);
    html.match_indices(&needle)
        .map(|(at, _)| at)
        .find(|&at| html[..at].ends_with(|c: char| c.is_ascii_whitespace()))
}

/// Offset of the next `<tag` start tag at or after `from`, skipping longer
/// names that share the prefix.
fn find_start_tag(html: &str, from: usize, tag: &str) -> Option<usize> {
    let pattern = format!("<{}", tag);
    html[from..]
        .match_indices(&pattern)
        .map(|(at, _)| from + at)
        .find(|&at| {
            html[at + pattern.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_whitespace() || c == '>' || c == '/')
        })
}

/// Byte offset just inside the closing tag of the element with `id`.
///
/// Falls back to just after the opening tag when the element has no
/// matching close tag.
fn container_close(html: &str, container_id: &str) -> Option<usize> {
    let attr = find_id_attr(html, container_id)?;
    let open_start = html[..attr].rfind('<')?;
    let open_end = attr + html[attr..].find('>')? + 1;

    let tag: String = html[open_start + 1..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    if tag.is_empty() || html[..open_end].ends_with("/>") {
        return None;
    }

    let open_len = tag.len() + 1;
    let close_pat = format!("</{}>", tag);
    let mut depth = 1usize;
    let mut cursor = open_end;

    while depth > 0 {
        let next_open = find_start_tag(html, cursor, &tag);
        let next_close = html[cursor..].find(&close_pat).map(|i| cursor + i);
        match (next_open, next_close) {
            (Some(o), Some(c)) if o < c => {
                depth += 1;
                cursor = o + open_len;
            }
            (_, Some(c)) => {
                depth -= 1;
                if depth == 0 {
                    return Some(c);
                }
                cursor = c + close_pat.len();
            }
            (_, None) => return Some(open_end),
        }
    }
    Some(open_end)
}

/// Add `name="value"` to the first element of `html`.
///
/// Returns `None` when the markup contains no element.
pub fn tag_root_element(html: &str, name: &str, value: &str) -> Option<String> {
    let start = html.find('<')?;
    let after = &html[start + 1..];
    let tag_len = after
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
        .map(char::len_utf8)
        .sum::<usize>();
    if tag_len == 0 {
        return None;
    }

    let at = start + 1 + tag_len;
    let mut tagged = String::with_capacity(html.len() + name.len() + value.len() + 4);
    tagged.push_str(&html[..at]);
    tagged.push_str(&format!(" {}=\"{}\"", name, escape_html(value)));
    tagged.push_str(&html[at..]);
    Some(tagged)
}

/// Escape text for inclusion in markup.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn replace_field(html: &str, widget_id: &str, field: &str, text: &str) -> Option<String> {
    let pattern = format!(
        r#"(data-widget="{}"[^>]*>(?s:.*?)data-field="{}"[^>]*>)[^<]*"#,
        regex::escape(widget_id),
        regex::escape(field)
    );
    let re = Regex::new(&pattern).ok()?;
    if !re.is_match(html) {
        return None;
    }
    let escaped = escape_html(text).replace('$', "$$");
    Some(re.replace(html, format!("${{1}}{}", escaped)).into_owned())
}

impl Document for MemoryDocument {
    fn dashboard_html(&self) -> Option<String> {
        let inner = self.lock();
        (inner.screen == Screen::Dashboard).then(|| compose(&inner))
    }

    fn set_dashboard_html(&self, html: &str) {
        let mut inner = self.lock();
        inner.dashboard = html.to_string();
        inner.mounts.clear();
    }

    fn show(&self, screen: Screen) {
        trace!(?screen, "showing screen");
        self.lock().screen = screen;
    }

    fn visible_screen(&self) -> Screen {
        self.lock().screen
    }

    fn set_screen_html(&self, screen: Screen, html: &str) {
        self.lock().screens.insert(screen, html.to_string());
    }

    fn css_variable(&self, name: &str) -> Option<String> {
        self.lock().css.get(name).cloned()
    }

    fn set_css_variable(&self, name: &str, value: &str) {
        self.lock().css.insert(name.to_string(), value.to_string());
    }

    fn set_stylesheet(&self, href: Option<&str>) {
        self.lock().stylesheet = href.map(str::to_string);
    }

    fn has_container(&self, container_id: &str) -> bool {
        find_id_attr(&self.lock().dashboard, container_id).is_some()
    }

    fn append_widget(&self, container_id: &str, widget_id: &str, html: &str) -> bool {
        if !self.has_container(container_id) {
            return false;
        }
        self.lock().mounts.push(Mount {
            container_id: container_id.to_string(),
            widget_id: widget_id.to_string(),
            html: html.to_string(),
        });
        true
    }

    fn remove_widget(&self, widget_id: &str) -> bool {
        let mut inner = self.lock();
        let before = inner.mounts.len();
        inner.mounts.retain(|m| m.widget_id != widget_id);
        inner.mounts.len() != before
    }

    fn has_widget(&self, widget_id: &str) -> bool {
        let inner = self.lock();
        let marker = format!("data-widget=\"{}\"", widget_id);
        inner.mounts.iter().any(|m| m.widget_id == widget_id) || inner.dashboard.contains(&marker)
    }

    fn set_text(&self, widget_id: &str, field: &str, text: &str) {
        let mut inner = self.lock();
        for mount in inner.mounts.iter_mut().filter(|m| m.widget_id == widget_id) {
            if let Some(updated) = replace_field(&mount.html, widget_id, field, text) {
                mount.html = updated;
                return;
            }
        }
        if let Some(updated) = replace_field(&inner.dashboard, widget_id, field, text) {
            inner.dashboard = updated;
        }
    }
}

// devdash CLI.
// Boots the dashboard once against the configured store and prints the rendered page.
//
// Usage: devdash [THEME_ID] [OUTPUT_PATH]

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use devdash::cache::WidgetCache;
use devdash::github::GitHubClient;
use devdash::widgets::{ClockWidget, GitHubStatsWidget};
use devdash::{Bootstrap, DirThemeSource, MemoryDocument, Result, Settings, WidgetRegistry};

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("devdash=info"));

    // Ignore a second init; stdout carries the page.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

async fn run(theme: Option<String>, output: Option<String>) -> Result<()> {
    let settings = Settings::load()?;
    let store = Arc::new(settings.build_store()?);

    let github = GitHubClient::new(settings.github_token.as_deref())?;
    let widgets = Arc::new(WidgetRegistry::new());
    widgets.register(Arc::new(ClockWidget::default()));
    widgets.register(Arc::new(
        GitHubStatsWidget::new(Arc::new(github), WidgetCache::new(Arc::clone(&store)))
            .with_ttl(settings.widget_ttl()),
    ));

    let document = Arc::new(MemoryDocument::new());
    let bootstrap = Bootstrap::new(
        document.clone(),
        Arc::clone(&store),
        Arc::new(DirThemeSource::new(settings.themes_dir.clone())),
    )
    .with_widgets(widgets)
    .with_snapshot_max_age(settings.snapshot_max_age())
    .with_save_delay(settings.snapshot_save_delay());

    let instant = bootstrap.instant_load();
    info!(instant, "first paint");
    bootstrap.init().await;

    if let Some(theme_id) = theme {
        bootstrap.select_theme(&theme_id).await?;
    }

    let page = document.render_page();
    match output {
        Some(path) => tokio::fs::write(&path, page).await?,
        None => println!("{}", page),
    }

    bootstrap.settle().await;
    bootstrap.shutdown();
    info!(state = bootstrap.state().title(), "done");
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();

    let mut args = std::env::args().skip(1);
    let theme = args.next();
    let output = args.next();

    if let Err(e) = run(theme, output).await {
        error!(error = %e, "devdash failed");
        std::process::exit(1);
    }
}

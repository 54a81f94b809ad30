// Clock widget.
// Shows the local date and time, ticking once per second while mounted.

use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::config::DashboardConfig;
use crate::document::Document;
use crate::error::Result;

use super::Widget;

pub const CLOCK_WIDGET_ID: &str = "clock";

const TICK: Duration = Duration::from_secs(1);

pub struct ClockWidget {
    clock: Arc<dyn Clock>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Default for ClockWidget {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl ClockWidget {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            ticker: Mutex::new(None),
        }
    }

    fn update(clock: &dyn Clock, document: &dyn Document) {
        let (date, time) = format_fields(&clock.now().with_timezone(&Local));
        document.set_text(CLOCK_WIDGET_ID, "date", &date);
        document.set_text(CLOCK_WIDGET_ID, "time", &time);
    }
}

/// Day-first date and 12-hour time.
pub fn format_fields<Tz: TimeZone>(at: &DateTime<Tz>) -> (String, String)
where
    Tz::Offset: Display,
{
    (
        at.format("%d/%m/%Y").to_string(),
        at.format("%-I:%M:%S %p").to_string(),
    )
}

#[async_trait]
impl Widget for ClockWidget {
    fn id(&self) -> &str {
        CLOCK_WIDGET_ID
    }

    fn name(&self) -> &str {
        "Clock"
    }

    fn render(&self, _config: &DashboardConfig) -> String {
        concat!(
            r#"<div class="datetime" data-widget="clock">"#,
            r#"<div class="date" data-field="date"></div>"#,
            r#"<div class="time" data-field="time"></div>"#,
            "</div>"
        )
        .to_string()
    }

    async fn init(&self, document: Arc<dyn Document>, _config: &DashboardConfig) -> Result<()> {
        Self::update(self.clock.as_ref(), document.as_ref());

        let clock = Arc::clone(&self.clock);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                Self::update(clock.as_ref(), document.as_ref());
            }
        });

        let mut ticker = self.ticker.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = ticker.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    fn destroy(&self) {
        let mut ticker = self.ticker.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = ticker.take() {
            handle.abort();
        }
    }
}

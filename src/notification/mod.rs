//! Foreground notification content and the sink that presents it.

use anyhow::Result;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::settings::NotificationSettings;

pub const NOTIFICATION_ID: u32 = 1001;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationContent {
    pub id: u32,
    pub channel_name: String,
    pub title: String,
    pub body: String,
    pub steps: u64,
    pub goal_percent: Option<u8>,
    pub ongoing: bool,
}

impl NotificationContent {
    pub fn render(steps: u64, daily_goal: u64, settings: &NotificationSettings) -> Self {
        let goal_percent = (settings.show_goal && daily_goal > 0)
            .then(|| (steps.saturating_mul(100) / daily_goal).min(100) as u8);

        let body = match goal_percent {
            Some(percent) => format!(
                "{} / {} steps today ({}%)",
                group_thousands(steps),
                group_thousands(daily_goal),
                percent
            ),
            None => format!("{} steps today", group_thousands(steps)),
        };

        Self {
            id: NOTIFICATION_ID,
            channel_name: settings.channel_name.clone(),
            title: settings.title.clone(),
            body,
            steps,
            goal_percent,
            ongoing: true,
        }
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

/// Presentation side of the foreground notification. Errors are logged by the
/// publisher and never stop tracking.
pub trait NotificationSink: Send + Sync {
    fn show(&self, content: &NotificationContent) -> Result<()>;

    fn update(&self, content: &NotificationContent) -> Result<()>;

    fn cancel(&self) -> Result<()>;
}

/// Sink for headless hosts: the "notification" is a log line.
pub struct LogNotificationSink {
    verbose: bool,
}

impl LogNotificationSink {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl NotificationSink for LogNotificationSink {
    fn show(&self, content: &NotificationContent) -> Result<()> {
        info!("[notification {}] {} | {}", content.id, content.title, content.body);
        Ok(())
    }

    fn update(&self, content: &NotificationContent) -> Result<()> {
        if self.verbose {
            info!("[notification {}] {}", content.id, content.body);
        } else {
            debug!("[notification {}] {}", content.id, content.body);
        }
        Ok(())
    }

    fn cancel(&self) -> Result<()> {
        info!("[notification {}] removed", NOTIFICATION_ID);
        Ok(())
    }
}

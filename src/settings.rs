use anyhow::{bail, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::models::DayBoundary;

pub const DEFAULT_DAILY_GOAL: u64 = 10_000;
pub const DEFAULT_PERSIST_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSettings {
    pub title: String,
    pub channel_name: String,
    pub show_goal: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            title: "Step counter active".into(),
            channel_name: "Step counter service".into(),
            show_goal: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerSettings {
    pub daily_goal: u64,
    /// Total tries for a baseline write, first attempt included.
    pub persist_attempts: u32,
    pub day_boundary: DayBoundary,
    pub notification: NotificationSettings,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            daily_goal: DEFAULT_DAILY_GOAL,
            persist_attempts: DEFAULT_PERSIST_ATTEMPTS,
            day_boundary: DayBoundary::default(),
            notification: NotificationSettings::default(),
        }
    }
}

impl TrackerSettings {
    pub fn validate(&self) -> Result<()> {
        if self.persist_attempts < 2 {
            bail!(
                "persist_attempts must allow at least one retry (got {})",
                self.persist_attempts
            );
        }
        if self.notification.title.trim().is_empty() {
            bail!("notification title must not be empty");
        }
        Ok(())
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<TrackerSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str::<TrackerSettings>(&contents) {
                Ok(parsed) if parsed.validate().is_ok() => parsed,
                Ok(_) | Err(_) => {
                    warn!(
                        "Ignoring unusable settings in {}; using defaults",
                        path.display()
                    );
                    TrackerSettings::default()
                }
            }
        } else {
            TrackerSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn tracker(&self) -> TrackerSettings {
        self.read().clone()
    }

    pub fn update_tracker(&self, settings: TrackerSettings) -> Result<()> {
        settings.validate()?;
        let mut guard = self.write();
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    pub fn set_daily_goal(&self, daily_goal: u64) -> Result<()> {
        let mut updated = self.tracker();
        updated.daily_goal = daily_goal;
        self.update_tracker(updated)
    }

    fn persist(&self, data: &TrackerSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, TrackerSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TrackerSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

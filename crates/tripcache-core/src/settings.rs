//! Durable live-mode settings.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::lock;

pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 30_000;
pub const MIN_POLLING_INTERVAL_MS: u64 = 5_000;

/// Clamp a requested interval: non-finite or missing falls back to the
/// default, anything else is floored and raised to the minimum.
pub fn normalize_polling_interval(ms: f64) -> u64 {
    if !ms.is_finite() {
        return DEFAULT_POLLING_INTERVAL_MS;
    }
    (ms.floor().max(MIN_POLLING_INTERVAL_MS as f64)) as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSettings {
    pub live_mode_enabled: bool,
    pub live_polling_interval_ms: u64,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            live_mode_enabled: false,
            live_polling_interval_ms: DEFAULT_POLLING_INTERVAL_MS,
        }
    }
}

impl LiveSettings {
    /// Lenient parse: bad or missing fields take their defaults.
    pub fn from_value(value: &Value) -> Self {
        let live_mode_enabled = value
            .get("liveModeEnabled")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let live_polling_interval_ms = value
            .get("livePollingIntervalMs")
            .and_then(Value::as_f64)
            .map(normalize_polling_interval)
            .unwrap_or(DEFAULT_POLLING_INTERVAL_MS);
        Self {
            live_mode_enabled,
            live_polling_interval_ms,
        }
    }
}

pub trait SettingsStore: Send + Sync {
    fn load(&self) -> LiveSettings;
    fn save(&self, settings: &LiveSettings) -> Result<()>;
}

/// Settings kept as a small JSON file next to the config.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self) -> LiveSettings {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "No live settings, using defaults");
                return LiveSettings::default();
            }
        };
        match serde_json::from_str::<Value>(&contents) {
            Ok(value) => LiveSettings::from_value(&value),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Unreadable live settings, using defaults");
                LiveSettings::default()
            }
        }
    }

    fn save(&self, settings: &LiveSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemorySettingsStore {
    settings: Arc<Mutex<LiveSettings>>,
}

impl MemorySettingsStore {
    pub fn new(settings: LiveSettings) -> Self {
        Self {
            settings: Arc::new(Mutex::new(settings)),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> LiveSettings {
        *lock(&self.settings)
    }

    fn save(&self, settings: &LiveSettings) -> Result<()> {
        *lock(&self.settings) = *settings;
        Ok(())
    }
}

//! Application configuration management.
//!
//! Holds the backend URL, the default device and date range used when no
//! trip is selected, and optional cache location overrides.
//!
//! Configuration is stored at `~/.config/tripcache/config.json`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::to_iso_millis;
use crate::models::{QueryDefaults, DEFAULT_MAX_POINTS};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "tripcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Live settings file name, stored next to the config
const SETTINGS_FILE: &str = "live-settings.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:3000";
const DEFAULT_FROM: &str = "2019-03-01T00:00:00.000Z";
const DEFAULT_QUERY_NAME: &str = "route";

/// Environment variables that override file values.
pub const ENV_API_URL: &str = "TRIPCACHE_API_URL";
pub const ENV_TOKEN: &str = "TRIPCACHE_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub default_device_id: i64,
    pub default_from: String,
    /// `None` means "now" at query time.
    pub default_to: Option<String>,
    pub max_points: String,
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_token: None,
            default_device_id: 0,
            default_from: DEFAULT_FROM.to_string(),
            default_to: None,
            max_points: DEFAULT_MAX_POINTS.to_string(),
            cache_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    pub fn settings_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(SETTINGS_FILE))
    }

    fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join("snapshots"))
    }

    /// Apply values from the environment (after `.env` has been loaded).
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.is_empty()) {
            self.api_base_url = url;
        }
        if let Some(token) = lookup(ENV_TOKEN).filter(|v| !v.is_empty()) {
            self.api_token = Some(token);
        }
    }

    /// Query defaults for `now`. An open-ended range runs to the end of the
    /// current UTC day, so its cache key stays the same for the whole day.
    pub fn query_defaults(&self, now: DateTime<Utc>) -> QueryDefaults {
        QueryDefaults {
            device_id: self.default_device_id,
            from: self.default_from.clone(),
            to: self
                .default_to
                .clone()
                .unwrap_or_else(|| end_of_day(now)),
            name: DEFAULT_QUERY_NAME.to_string(),
            max_points: self.max_points.clone(),
        }
    }
}

fn end_of_day(now: DateTime<Utc>) -> String {
    now.date_naive()
        .and_hms_milli_opt(23, 59, 59, 999)
        .map(|end| to_iso_millis(end.and_utc()))
        .unwrap_or_else(|| to_iso_millis(now))
}

//! User settings for the mobile-agent CLI.
//! Persisted in the platform-specific config directory via `directories::ProjectDirs`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::agent::AgentConfig;
use crate::device::{Platform, SessionOptions};
use crate::model::ModelConfig;

/// Settings errors.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Cannot determine config directory")]
    NoConfigDir,
    #[error("Settings file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Application settings that can be saved and loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Model API base URL
    pub base_url: String,
    /// Model API key
    pub api_key: String,
    /// Model name
    pub model_name: String,
    /// Backend: "adb", "hdc" or "ios"
    pub device_type: String,
    /// Device ID (optional)
    pub device_id: String,
    /// WebDriverAgent URL (iOS only)
    pub wda_url: String,
    /// Language code ("cn" or "en")
    pub lang: String,
    /// Maximum retries for model requests
    pub max_retries: u32,
    /// Retry delay in seconds
    pub retry_delay: u64,
    /// Maximum steps for agent
    pub max_steps: u32,
    /// Remove the scratch capture file around each run
    pub cleanup_enabled: bool,
    /// Age in hours after which a leftover scratch file is swept
    pub stale_threshold_hours: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/v1".to_string(),
            api_key: "EMPTY".to_string(),
            model_name: "autoglm-phone-9b".to_string(),
            device_type: "adb".to_string(),
            device_id: String::new(),
            wda_url: crate::xctest::DEFAULT_WDA_URL.to_string(),
            lang: "cn".to_string(),
            max_retries: 3,
            retry_delay: 2,
            max_steps: 100,
            cleanup_enabled: true,
            stale_threshold_hours: 24,
        }
    }
}

impl AppSettings {
    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "moderras", "mobile-agent")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the settings file path.
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("settings.json"))
    }

    /// Load settings from the config file, falling back to defaults.
    pub fn load() -> Self {
        Self::settings_path()
            .and_then(|path| fs::read_to_string(&path).ok())
            .map(|content| Self::from_json(&content))
            .unwrap_or_default()
    }

    /// Parse a settings file, backfilling fields older files left empty.
    pub fn from_json(content: &str) -> Self {
        let defaults = Self::default();
        let mut loaded: Self = match serde_json::from_str(content) {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!("Ignoring unreadable settings file: {}", e);
                return defaults;
            }
        };

        if loaded.base_url.is_empty() {
            loaded.base_url = defaults.base_url;
        }
        if loaded.model_name.is_empty() {
            loaded.model_name = defaults.model_name;
        }
        if loaded.device_type.is_empty() {
            loaded.device_type = defaults.device_type;
        }
        if loaded.wda_url.is_empty() {
            loaded.wda_url = defaults.wda_url;
        }
        if loaded.lang.is_empty() {
            loaded.lang = defaults.lang;
        }
        if loaded.max_steps == 0 {
            loaded.max_steps = defaults.max_steps;
        }
        if loaded.stale_threshold_hours == 0 {
            loaded.stale_threshold_hours = defaults.stale_threshold_hours;
        }

        loaded
    }

    /// Save settings to the config file.
    pub fn save(&self) -> Result<(), SettingsError> {
        let dir = Self::config_dir().ok_or(SettingsError::NoConfigDir)?;
        fs::create_dir_all(&dir)?;

        let content = serde_json::to_string_pretty(self)?;
        fs::write(dir.join("settings.json"), content)?;
        Ok(())
    }

    /// Apply `PHONE_AGENT_*` and `MODEL_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), SettingsError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. `PHONE_AGENT_*` keys win over `MODEL_*`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| lookup(k))
                .filter(|v| !v.trim().is_empty())
        };

        if let Some(v) = get(&["PHONE_AGENT_BASE_URL", "MODEL_BASE_URL"]) {
            self.base_url = v;
        }
        if let Some(v) = get(&["PHONE_AGENT_API_KEY", "MODEL_API_KEY"]) {
            self.api_key = v;
        }
        if let Some(v) = get(&["PHONE_AGENT_MODEL", "MODEL_NAME"]) {
            self.model_name = v;
        }
        if let Some(v) = get(&["PHONE_AGENT_DEVICE_TYPE"]) {
            v.parse::<Platform>().map_err(|_| SettingsError::Invalid {
                key: "PHONE_AGENT_DEVICE_TYPE",
                value: v.clone(),
            })?;
            self.device_type = v;
        }
        if let Some(v) = get(&["PHONE_AGENT_DEVICE_ID"]) {
            self.device_id = v;
        }
        if let Some(v) = get(&["PHONE_AGENT_WDA_URL"]) {
            self.wda_url = v;
        }
        if let Some(v) = get(&["PHONE_AGENT_LANG"]) {
            self.lang = v;
        }
        if let Some(v) = get(&["PHONE_AGENT_MAX_STEPS"]) {
            self.max_steps = parse_number("PHONE_AGENT_MAX_STEPS", &v)?;
        }
        if let Some(v) = get(&["MODEL_MAX_RETRIES"]) {
            self.max_retries = parse_number("MODEL_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get(&["MODEL_RETRY_DELAY"]) {
            self.retry_delay = parse_number("MODEL_RETRY_DELAY", &v)?;
        }

        Ok(())
    }

    /// Backend selected by `device_type`.
    pub fn platform(&self) -> Result<Platform, SettingsError> {
        self.device_type.parse().map_err(|_| SettingsError::Invalid {
            key: "device_type",
            value: self.device_type.clone(),
        })
    }

    fn device_id(&self) -> Option<String> {
        Some(self.device_id.trim())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }

    pub fn model_config(&self) -> ModelConfig {
        ModelConfig::default()
            .with_base_url(&self.base_url)
            .with_api_key(&self.api_key)
            .with_model_name(&self.model_name)
            .with_max_retries(self.max_retries)
            .with_retry_delay(self.retry_delay)
    }

    pub fn agent_config(&self) -> AgentConfig {
        let mut config = AgentConfig::default()
            .with_lang(&self.lang)
            .with_max_steps(self.max_steps)
            .with_cleanup(self.cleanup_enabled)
            .with_stale_threshold(Duration::from_secs(self.stale_threshold_hours * 3600));
        config.device_id = self.device_id();
        config
    }

    pub fn session_options(&self) -> SessionOptions {
        let mut options = SessionOptions::default().with_wda_url(&self.wda_url);
        options.device_id = self.device_id();
        options
    }

    /// Get logs directory path.
    pub fn logs_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "moderras", "mobile-agent")
            .map(|dirs| dirs.data_dir().join("logs"))
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, SettingsError> {
    value.trim().parse().map_err(|_| SettingsError::Invalid {
        key,
        value: value.to_string(),
    })
}

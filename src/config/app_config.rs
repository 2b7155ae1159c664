use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bluetooth::{
    CoordinatorConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IDLE_TIMEOUT, SERVICE_UUID,
};
use crate::error::ConfigError;

/// Longest accepted discovery idle timeout, in seconds
const MAX_IDLE_TIMEOUT_SECS: u64 = 300;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Seconds discovery may stay idle after the last scan request
    pub idle_timeout_secs: u64,

    /// Upper bound on a connect call in seconds
    /// None waits for the transport to give up
    pub connect_timeout_secs: Option<u64>,

    /// Service identifier connections are bound to
    pub service_uuid: Uuid,

    pub log_level: LogLevel,

    /// Optional log file; console only when unset
    pub log_file: Option<PathBuf>,
}

/// Log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        f.write_str(name)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT.as_secs(),
            connect_timeout_secs: Some(DEFAULT_CONNECT_TIMEOUT.as_secs()),
            service_uuid: SERVICE_UUID,
            log_level: LogLevel::Info,
            log_file: None,
        }
    }
}

impl AppConfig {
    /// Convert to the coordinator configuration
    pub fn to_coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig::new()
            .with_idle_timeout(Duration::from_secs(self.idle_timeout_secs))
            .with_service_uuid(self.service_uuid)
            .with_connect_timeout(self.connect_timeout_secs.map(Duration::from_secs))
    }

    /// Load configuration from the default settings path
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(&default_settings_path())
    }

    /// Load configuration from `path`, falling back to defaults when the file is missing
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        info!("Loaded settings from {}", path.display());
        Ok(config)
    }

    /// Save configuration to the default settings path
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to_path(&default_settings_path())
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("Saved settings to {}", path.display());
        Ok(())
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::Validation {
                field: "idle_timeout_secs".to_string(),
                reason: "must be at least one second".to_string(),
            });
        }
        if self.idle_timeout_secs > MAX_IDLE_TIMEOUT_SECS {
            return Err(ConfigError::Validation {
                field: "idle_timeout_secs".to_string(),
                reason: format!("must not exceed {} seconds", MAX_IDLE_TIMEOUT_SECS),
            });
        }
        if self.connect_timeout_secs == Some(0) {
            return Err(ConfigError::Validation {
                field: "connect_timeout_secs".to_string(),
                reason: "must be at least one second when set".to_string(),
            });
        }
        Ok(())
    }
}

/// Get the default settings path
pub fn default_settings_path() -> PathBuf {
    dirs_next::config_dir()
        .map(|config_dir| config_dir.join("bluelink").join("settings.json"))
        .unwrap_or_else(|| PathBuf::from("settings.json")) // Fallback to current directory
}

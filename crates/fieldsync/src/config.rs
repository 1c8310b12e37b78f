//! Configuration management for fieldsync.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "fieldsync";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "fieldsync.db";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `FIELDSYNC_`, sections split by `__`)
/// 2. TOML config file at `~/.config/fieldsync/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local store configuration.
    pub store: StoreConfig,
    /// Remote API configuration.
    pub remote: RemoteConfig,
    /// Sync engine configuration.
    pub sync: SyncConfig,
    /// Network interceptor configuration.
    pub intercept: InterceptConfig,
}

/// Local store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/fieldsync/fieldsync.db`
    pub database_path: Option<PathBuf>,
    /// How long synced records are kept before the cleanup pass removes them.
    /// Set to 0 to remove them on the next pass.
    pub synced_retention_hours: u32,
}

/// Remote API configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the records platform.
    pub base_url: String,
    /// CSRF token echoed on every write.
    pub csrf_token: Option<String>,
    /// Header carrying the CSRF token.
    pub csrf_header: String,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Whole-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Identifier of this device, sent with bulk syncs.
    pub device_id: Option<String>,
    /// Path probed to decide reachability.
    pub health_path: String,
}

/// Sync engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between periodic sync triggers. 0 disables the timer.
    pub interval_secs: u64,
    /// Seconds between reachability probes. 0 disables probing.
    pub probe_interval_secs: u64,
    /// Delete records as soon as they are acknowledged.
    pub delete_on_sync: bool,
    /// Send pending assessment results through the bulk endpoint.
    pub bulk_assessments: bool,
    /// Permanent rejections tolerated before a record is quarantined.
    pub max_rejections: u32,
}

/// Network interceptor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptConfig {
    /// Version tag of the response caches.
    pub cache_version: String,
    /// Page served for failed navigations.
    pub offline_page_path: String,
    /// Path of the attendance write endpoint.
    pub attendance_write_path: String,
    /// Path prefixes treated as API/data requests.
    pub api_prefixes: Vec<String>,
    /// Regex matching static asset paths.
    pub static_asset_pattern: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Will be resolved to default at runtime
            synced_retention_hours: 24,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            csrf_token: None,
            csrf_header: "X-CSRFToken".to_string(),
            connect_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            device_id: None,
            health_path: "/".to_string(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            probe_interval_secs: 30,
            delete_on_sync: false,
            bulk_assessments: true,
            max_rejections: 5,
        }
    }
}

impl Default for InterceptConfig {
    fn default() -> Self {
        Self {
            cache_version: "v1".to_string(),
            offline_page_path: "/offline/".to_string(),
            attendance_write_path: "/attendance/submit".to_string(),
            api_prefixes: vec![
                "/api/".to_string(),
                "/attendance/".to_string(),
                "/logbook/".to_string(),
                "/assessments/".to_string(),
            ],
            static_asset_pattern: r"(?i)\.(css|js|png|jpe?g|svg|gif|webp|ico|woff2?)$".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file).nested())
            .merge(Env::prefixed("FIELDSYNC_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.remote.base_url.trim().is_empty() {
            return Err(Error::ConfigValidation {
                message: "remote.base_url must not be empty".to_string(),
            });
        }

        if self.remote.connect_timeout_ms == 0 || self.remote.request_timeout_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "remote timeouts must be greater than 0".to_string(),
            });
        }

        if self.sync.max_rejections == 0 {
            return Err(Error::ConfigValidation {
                message: "sync.max_rejections must be greater than 0".to_string(),
            });
        }

        if regex::Regex::new(&self.intercept.static_asset_pattern).is_err() {
            return Err(Error::ConfigValidation {
                message: format!(
                    "invalid regex pattern: {}",
                    self.intercept.static_asset_pattern
                ),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.store
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the synced-record retention as a Duration.
    #[must_use]
    pub fn synced_retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.store.synced_retention_hours) * 60 * 60)
    }

    /// Get the periodic sync interval, if enabled.
    #[must_use]
    pub fn sync_interval(&self) -> Option<Duration> {
        (self.sync.interval_secs > 0).then(|| Duration::from_secs(self.sync.interval_secs))
    }

    /// Get the reachability probe interval, if enabled.
    #[must_use]
    pub fn probe_interval(&self) -> Option<Duration> {
        (self.sync.probe_interval_secs > 0)
            .then(|| Duration::from_secs(self.sync.probe_interval_secs))
    }

    /// Get the connect timeout as a Duration.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.remote.connect_timeout_ms)
    }

    /// Get the request timeout as a Duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.remote.request_timeout_ms)
    }
}

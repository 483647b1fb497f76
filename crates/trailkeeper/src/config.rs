//! Configuration management for trailkeeper.
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
const DATA_DIR_NAME: &str = "trailkeeper";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "trailkeeper.db";

/// Longest accepted staleness window for shared locations (one week).
const MAX_STALE_AFTER_SECS: u64 = 7 * 24 * 60 * 60;

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `TRAILKEEPER_`, `__` between levels)
/// 2. TOML config file at `~/.config/trailkeeper/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Location provider configuration.
    pub location: LocationConfig,
    /// Breadcrumb trail configuration.
    pub trail: TrailConfig,
    /// GPX track recording configuration.
    pub track: TrackConfig,
    /// Live location sharing configuration.
    pub sharing: SharingConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/trailkeeper/trailkeeper.db`
    pub database_path: Option<PathBuf>,
    /// Directory GPX files are saved into.
    /// Defaults to `~/.local/share/trailkeeper/gpx`
    pub export_dir: Option<PathBuf>,
    /// Directory shared files are handed off to.
    /// Defaults to `~/.local/share/trailkeeper/outbox`
    pub outbox_dir: Option<PathBuf>,
}

/// Location provider configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Timeout for one-shot position reads and permission prompts in
    /// milliseconds. Set to 0 to wait indefinitely.
    pub request_timeout_ms: u64,
}

/// Breadcrumb trail configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailConfig {
    /// Interval between automatic breadcrumb checks in milliseconds.
    pub auto_drop_interval_ms: u64,
    /// Minimum movement in meters before another automatic breadcrumb drops.
    pub min_auto_drop_distance_m: f64,
}

/// GPX track recording configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    /// Minimum time between position updates in milliseconds.
    pub min_interval_ms: u64,
    /// Minimum movement in meters between position updates.
    pub min_distance_m: f64,
}

/// Live location sharing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharingConfig {
    /// Identity published with every shared location.
    pub user_id: String,
    /// Default interval between published updates in milliseconds.
    pub default_update_interval_ms: u64,
    /// Minimum movement in meters between published updates.
    pub min_distance_m: f64,
    /// Shared locations older than this many seconds are ignored.
    pub stale_after_secs: u64,
    /// Maximum number of shared locations retained.
    pub max_shared_locations: usize,
    /// Default radius for nearby queries, in miles.
    pub default_radius_miles: f64,
    /// Default speed used for arrival estimates, in miles per hour.
    pub default_eta_speed_mph: f64,
}

impl Default for TrailConfig {
    fn default() -> Self {
        Self {
            auto_drop_interval_ms: 30_000,
            min_auto_drop_distance_m: 50.0,
        }
    }
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 1_000,
            min_distance_m: 5.0,
        }
    }
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            user_id: "local-user".to_string(),
            default_update_interval_ms: 10_000,
            min_distance_m: 10.0,
            stale_after_secs: 5 * 60,
            max_shared_locations: 100,
            default_radius_miles: 10.0,
            default_eta_speed_mph: 15.0,
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
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("TRAILKEEPER_").split("__"));

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
        if self.trail.auto_drop_interval_ms == 0 {
            return Err(invalid("trail.auto_drop_interval_ms must be greater than 0"));
        }
        if self.track.min_interval_ms == 0 {
            return Err(invalid("track.min_interval_ms must be greater than 0"));
        }
        if self.sharing.default_update_interval_ms == 0 {
            return Err(invalid(
                "sharing.default_update_interval_ms must be greater than 0",
            ));
        }

        for (name, value) in [
            ("trail.min_auto_drop_distance_m", self.trail.min_auto_drop_distance_m),
            ("track.min_distance_m", self.track.min_distance_m),
            ("sharing.min_distance_m", self.sharing.min_distance_m),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(format!(
                    "{name} must be a non-negative number (got {value})"
                )));
            }
        }

        if self.sharing.max_shared_locations == 0 {
            return Err(invalid("sharing.max_shared_locations must be greater than 0"));
        }
        for (name, value) in [
            ("sharing.default_radius_miles", self.sharing.default_radius_miles),
            ("sharing.default_eta_speed_mph", self.sharing.default_eta_speed_mph),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(invalid(format!("{name} must be a positive number (got {value})")));
            }
        }
        if self.sharing.stale_after_secs > MAX_STALE_AFTER_SECS {
            return Err(invalid(format!(
                "sharing.stale_after_secs must be at most {MAX_STALE_AFTER_SECS}"
            )));
        }
        if self.sharing.user_id.trim().is_empty() {
            return Err(invalid("sharing.user_id must not be empty"));
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the GPX export directory, resolving defaults if not set.
    #[must_use]
    pub fn export_dir(&self) -> PathBuf {
        self.storage
            .export_dir
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join("gpx"))
    }

    /// Get the share outbox directory, resolving defaults if not set.
    #[must_use]
    pub fn outbox_dir(&self) -> PathBuf {
        self.storage
            .outbox_dir
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join("outbox"))
    }

    /// Get the location request timeout, or `None` when disabled.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.location.request_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Get the automatic breadcrumb interval as a Duration.
    #[must_use]
    pub fn auto_drop_interval(&self) -> Duration {
        Duration::from_millis(self.trail.auto_drop_interval_ms)
    }

    /// Get the track subscription interval as a Duration.
    #[must_use]
    pub fn track_interval(&self) -> Duration {
        Duration::from_millis(self.track.min_interval_ms)
    }

    /// Get the default sharing update interval as a Duration.
    #[must_use]
    pub fn sharing_interval(&self) -> Duration {
        Duration::from_millis(self.sharing.default_update_interval_ms)
    }

    /// Get the shared location staleness window as a chrono Duration.
    ///
    /// Values beyond the accepted maximum are clamped to it.
    #[must_use]
    pub fn stale_after(&self) -> chrono::Duration {
        let secs = self.sharing.stale_after_secs.min(MAX_STALE_AFTER_SECS);
        chrono::Duration::seconds(i64::try_from(secs).unwrap_or_default())
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}

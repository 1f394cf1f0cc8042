//! Configuration management for Vigil
//!
//! Loads configuration from TOML files and `VIGIL_*` environment variables,
//! validates it at startup, and exposes the parsed duration settings the
//! collector runs on. Invalid duration strings or thresholds are rejected
//! up front rather than silently defaulted mid-run.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Main configuration for a monitored service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    /// Service identity settings
    pub service: ServiceSettings,

    /// Periodic collector settings
    pub collector: CollectorSettings,

    /// Health evaluation thresholds
    pub health: HealthThresholds,
}

/// Identity and storage location of the monitored service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Name identifying this service; required, no usable default
    pub name: String,

    /// Base directory for persisted artifacts
    pub base_path: PathBuf,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_path: default_base_path(),
        }
    }
}

/// Timing settings for the periodic collector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSettings {
    /// Interval between snapshot-and-sweep ticks, as a duration string
    /// such as "5m"
    pub sync_frequency: String,

    /// Retention horizon for stored series, as a duration string such
    /// as "7d"
    pub retention_period: String,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            sync_frequency: "5m".to_string(),
            retention_period: "7d".to_string(),
        }
    }
}

/// Thresholds a snapshot is compared against to derive its `healthy` flag
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    /// Maximum process CPU utilization considered healthy, in percent
    pub max_cpu_percent: f32,

    /// Maximum memory utilization considered healthy, in percent
    pub max_memory_percent: f32,

    /// Maximum live thread count considered healthy
    pub max_thread_count: i64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_cpu_percent: 95.0,
            max_memory_percent: 95.0,
            max_thread_count: 100,
        }
    }
}

impl VigilConfig {
    /// Load configuration from a TOML file and validate it
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::ParseFailed {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

        let config: VigilConfig = toml::from_str(&content).map_err(|e| ConfigError::ParseFailed {
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Build configuration from `VIGIL_*` environment variables on top of
    /// the defaults. Not validated here; `validate` runs at service init.
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Ok(name) = env::var("VIGIL_SERVICE_NAME") {
            config.service.name = name;
        }
        if let Ok(path) = env::var("VIGIL_BASE_PATH") {
            config.service.base_path = PathBuf::from(path);
        }
        if let Ok(frequency) = env::var("VIGIL_SYNC_FREQUENCY") {
            config.collector.sync_frequency = frequency;
        }
        if let Ok(retention) = env::var("VIGIL_RETENTION_PERIOD") {
            config.collector.retention_period = retention;
        }
        if let Ok(value) = env::var("VIGIL_MAX_CPU_PERCENT") {
            config.health.max_cpu_percent =
                value.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "VIGIL_MAX_CPU_PERCENT".to_string(),
                    value,
                })?;
        }
        if let Ok(value) = env::var("VIGIL_MAX_MEMORY_PERCENT") {
            config.health.max_memory_percent =
                value.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "VIGIL_MAX_MEMORY_PERCENT".to_string(),
                    value,
                })?;
        }
        if let Ok(value) = env::var("VIGIL_MAX_THREAD_COUNT") {
            config.health.max_thread_count =
                value.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "VIGIL_MAX_THREAD_COUNT".to_string(),
                    value,
                })?;
        }

        Ok(config)
    }

    /// Load from the default config file when present, falling back to
    /// environment variables and then to plain defaults
    pub fn load_with_fallback() -> Self {
        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                match Self::from_file(&path) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Ignoring config file {}: {}", path.display(), e);
                    }
                }
            }
        }

        match Self::from_env() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring environment overrides: {}", e);
                Self::default()
            }
        }
    }

    /// Parsed collector tick interval
    pub fn sync_frequency(&self) -> ConfigResult<Duration> {
        parse_duration_field("collector.sync_frequency", &self.collector.sync_frequency)
    }

    /// Parsed retention horizon
    pub fn retention_period(&self) -> ConfigResult<Duration> {
        parse_duration_field("collector.retention_period", &self.collector.retention_period)
    }

    /// Validate every field, returning the first offending one
    pub fn validate(&self) -> ConfigResult<()> {
        if self.service.name.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "service.name",
            });
        }

        if self.service.base_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingField {
                field: "service.base_path",
            });
        }

        self.sync_frequency()?;
        self.retention_period()?;

        if !(self.health.max_cpu_percent > 0.0 && self.health.max_cpu_percent <= 100.0) {
            return Err(ConfigError::InvalidValue {
                field: "health.max_cpu_percent".to_string(),
                value: self.health.max_cpu_percent.to_string(),
            });
        }

        if !(self.health.max_memory_percent > 0.0 && self.health.max_memory_percent <= 100.0) {
            return Err(ConfigError::InvalidValue {
                field: "health.max_memory_percent".to_string(),
                value: self.health.max_memory_percent.to_string(),
            });
        }

        if self.health.max_thread_count <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "health.max_thread_count".to_string(),
                value: self.health.max_thread_count.to_string(),
            });
        }

        Ok(())
    }

    /// Write the configuration to a TOML file, creating parent directories
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::WriteFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        fs::write(path, content).map_err(|e| ConfigError::WriteFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(())
    }

    /// Default location of the config file
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("vigil").join("config.toml"))
    }

    /// Path of the persisted service-identity cache under the base directory
    pub fn identity_cache_path(&self) -> PathBuf {
        self.service.base_path.join("identity.json")
    }

    /// Path of the metrics store's on-disk representation
    pub fn metrics_path(&self) -> PathBuf {
        self.service.base_path.join("metrics.json")
    }
}

fn default_base_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vigil")
}

fn parse_duration_field(field: &'static str, value: &str) -> ConfigResult<Duration> {
    let parsed =
        humantime::parse_duration(value.trim()).map_err(|e| ConfigError::InvalidDuration {
            field,
            value: value.to_string(),
            reason: e.to_string(),
        })?;

    if parsed.is_zero() {
        return Err(ConfigError::InvalidDuration {
            field,
            value: value.to_string(),
            reason: "duration must be positive".to_string(),
        });
    }

    Ok(parsed)
}

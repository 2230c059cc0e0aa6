//! Configuration loading for courier-client.
//!
//! Configuration is loaded from a TOML file. Every section and field is
//! optional; an empty file yields [`ClientConfig::default`].

use courier_core::{QueueSettings, RetryPolicy};
use courier_types::DeviceContext;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for courier-client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    /// Flush cadence configuration.
    #[serde(default)]
    pub flush: FlushConfig,
    /// Queue configuration.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Retry policy configuration.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Archive configuration.
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,
    /// Device and app metadata for push-token registrations.
    #[serde(default)]
    pub device: DeviceConfig,
}

/// Flush cadence configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FlushConfig {
    /// Flush interval on Wi-Fi in seconds (default: 10).
    #[serde(default = "default_wifi_interval")]
    pub wifi_interval_secs: u64,
    /// Flush interval on cellular in seconds (default: 30).
    #[serde(default = "default_cellular_interval")]
    pub cellular_interval_secs: u64,
}

/// Queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueueConfig {
    /// Maximum queued plus in-flight requests (default: 200).
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RetryConfig {
    /// Failures before exponential backoff starts (default: 3).
    #[serde(default = "default_backoff_threshold")]
    pub backoff_threshold: u32,
    /// Failures after which a request is dropped (default: 50).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff cap in seconds (default: 180).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
    /// Maximum random jitter added to a backoff, in seconds (default: 10).
    #[serde(default = "default_jitter")]
    pub jitter_secs: u64,
}

/// Archive configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArchiveConfig {
    /// Archive file path (optional, archives in memory if missing).
    pub path: Option<PathBuf>,
    /// Timeout for a single load or save in milliseconds (default: 2000).
    #[serde(default = "default_archive_timeout")]
    pub timeout_ms: u64,
}

/// Transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransportConfig {
    /// Timeout for a single send in milliseconds (default: 10000).
    #[serde(default = "default_transport_timeout")]
    pub timeout_ms: u64,
}

/// Device and app metadata.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceConfig {
    /// Vendor-scoped device identifier (optional, generated if missing).
    pub device_id: Option<String>,
    /// Hardware model (default: "unknown").
    #[serde(default = "default_unknown")]
    pub device_model: String,
    /// Bundle identifier of the host app (default: "unknown").
    #[serde(default = "default_unknown")]
    pub app_id: String,
    /// Display name of the host app (default: "unknown").
    #[serde(default = "default_unknown")]
    pub app_name: String,
    /// Marketing version of the host app (default: "0.0.0").
    #[serde(default = "default_app_version")]
    pub app_version: String,
    /// Build number of the host app (default: "0").
    #[serde(default = "default_app_build")]
    pub app_build: String,
}

// Default value functions
fn default_wifi_interval() -> u64 {
    10
}

fn default_cellular_interval() -> u64 {
    30
}

fn default_max_queue_size() -> usize {
    200
}

fn default_backoff_threshold() -> u32 {
    3
}

fn default_max_retries() -> u32 {
    50
}

fn default_max_backoff() -> u64 {
    180 // 3 minutes
}

fn default_jitter() -> u64 {
    10
}

fn default_archive_timeout() -> u64 {
    2000
}

fn default_transport_timeout() -> u64 {
    10_000
}

fn default_unknown() -> String {
    "unknown".to_string()
}

fn default_app_version() -> String {
    "0.0.0".to_string()
}

fn default_app_build() -> String {
    "0".to_string()
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            wifi_interval_secs: default_wifi_interval(),
            cellular_interval_secs: default_cellular_interval(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_threshold: default_backoff_threshold(),
            max_retries: default_max_retries(),
            max_backoff_secs: default_max_backoff(),
            jitter_secs: default_jitter(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            path: None,
            timeout_ms: default_archive_timeout(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_transport_timeout(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            device_model: default_unknown(),
            app_id: default_unknown(),
            app_name: default_unknown(),
            app_version: default_app_version(),
            app_build: default_app_build(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush.wifi_interval_secs == 0 || self.flush.cellular_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "flush intervals must be at least one second".into(),
            ));
        }
        if self.queue.max_queue_size == 0 {
            return Err(ConfigError::Invalid("max_queue_size must be positive".into()));
        }
        if self.archive.timeout_ms == 0 || self.transport.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }
        Ok(())
    }

    /// Queue and retry tunables for the reducer.
    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            wifi_flush_interval: Duration::from_secs(self.flush.wifi_interval_secs),
            cellular_flush_interval: Duration::from_secs(self.flush.cellular_interval_secs),
            max_queue_size: self.queue.max_queue_size,
            retry: RetryPolicy {
                backoff_threshold: self.retry.backoff_threshold,
                max_retries: self.retry.max_retries,
                max_backoff: self.retry.max_backoff_secs,
                max_jitter: self.retry.jitter_secs,
            },
        }
    }

    /// Timeout applied to each archive load or save.
    pub fn archive_timeout(&self) -> Duration {
        Duration::from_millis(self.archive.timeout_ms)
    }

    /// Timeout applied to each send.
    pub fn transport_timeout(&self) -> Duration {
        Duration::from_millis(self.transport.timeout_ms)
    }
}

impl DeviceConfig {
    /// Device context reported with push-token registrations.
    ///
    /// `device_id` is used when no id is configured.
    pub fn context(&self, device_id: impl Into<String>) -> DeviceContext {
        DeviceContext {
            device_id: self.device_id.clone().unwrap_or_else(|| device_id.into()),
            device_model: self.device_model.clone(),
            os_name: std::env::consts::OS.to_string(),
            os_version: "unknown".to_string(),
            app_id: self.app_id.clone(),
            app_name: self.app_name.clone(),
            app_version: self.app_version.clone(),
            app_build: self.app_build.clone(),
            sdk_name: env!("CARGO_PKG_NAME").to_string(),
            sdk_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

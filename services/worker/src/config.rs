use serde::Deserialize;
use shutter_storage::{BlobConfig, DatabaseConfig};
use std::time::Duration;

/// Main configuration for the thumbnail worker
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Thumbnail rendering configuration
    #[serde(default)]
    pub thumbnail: ThumbnailConfig,
    /// Blob store configuration
    #[serde(default)]
    pub blob: BlobConfig,
    /// Metadata store configuration
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Thumbnail rendering configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailConfig {
    /// Target width in pixels
    #[serde(default = "default_dimension")]
    pub width: u32,
    /// Target height in pixels
    #[serde(default = "default_dimension")]
    pub height: u32,
    /// Fit within the target box instead of resizing to it exactly.
    /// Off by default: thumbnails are a uniform grid size.
    #[serde(default)]
    pub preserve_aspect: bool,
    /// Per-job processing deadline in seconds
    #[serde(default = "default_processing_timeout_secs")]
    pub processing_timeout_secs: u64,
}

fn default_service_name() -> String {
    "thumbnail-worker".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9092
}

fn default_dimension() -> u32 {
    100
}

fn default_processing_timeout_secs() -> u64 {
    60
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            width: default_dimension(),
            height: default_dimension(),
            preserve_aspect: false,
            processing_timeout_secs: default_processing_timeout_secs(),
        }
    }
}

impl ThumbnailConfig {
    /// Per-job deadline as a Duration
    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }
}

impl Config {
    /// Load configuration from config files and environment variables.
    /// Environment variables use the `WORKER` prefix with `__`
    /// separators, e.g. `WORKER__THUMBNAIL__WIDTH`.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/worker").required(false))
            .add_source(config::File::with_name("/etc/shutter/worker").required(false))
            .add_source(
                config::Environment::with_prefix("WORKER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let thumbnail = ThumbnailConfig::default();
        assert_eq!(thumbnail.width, 100);
        assert_eq!(thumbnail.height, 100);
        assert!(!thumbnail.preserve_aspect);

        let service = ServiceConfig::default();
        assert_eq!(service.name, "thumbnail-worker");
    }
}

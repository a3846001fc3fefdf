//! Endpoint configuration
//!
//! ## Configuration Sources (in precedence order)
//!
//! 1. An explicit path passed to [`EndpointConfig::load_from_path`]
//! 2. `endpoint.yaml` in the platform config directory
//!    (e.g. `~/.config/catfed/endpoint.yaml`)
//! 3. Built-in defaults
//!
//! Every field has a default, so a partial file is fine:
//!
//! ```yaml
//! sink:
//!   base_url: http://localhost:8993/catfed/file
//! delivery:
//!   max_attempts: 5
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::managers::PackageFormat;

/// Default delivery sink location
pub const DEFAULT_SINK_URL: &str = "http://localhost:8993/catfed/file";

/// Top-level endpoint configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub sink: SinkConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub standing_query: StandingQueryConfig,

    #[serde(default)]
    pub order: OrderConfig,
}

/// Where derived files are PUT
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Base URL; files land at `<base_url>/<filename>`
    #[serde(default = "default_sink_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_sink_timeout")]
    pub timeout_seconds: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            base_url: default_sink_url(),
            timeout_seconds: default_sink_timeout(),
        }
    }
}

fn default_sink_url() -> String {
    DEFAULT_SINK_URL.to_string()
}

fn default_sink_timeout() -> u64 {
    30
}

/// Retry policy for uploads to the sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Total attempts per upload, including the first
    #[serde(default = "default_delivery_attempts")]
    pub max_attempts: u32,

    /// Backoff before the second attempt; doubles for each further attempt
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_delivery_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl DeliveryConfig {
    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

fn default_delivery_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Bound used when a caller does not supply one
    #[serde(default = "default_bound")]
    pub default_bound: usize,

    /// Bounds above this are clamped
    #[serde(default = "default_max_bound")]
    pub max_bound: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_bound: default_bound(),
            max_bound: default_max_bound(),
        }
    }
}

fn default_bound() -> usize {
    100
}

fn default_max_bound() -> usize {
    10_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandingQueryConfig {
    /// Timeout for one callback invocation
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_seconds: u64,

    /// Attempts per matched event before the subscription is marked degraded
    #[serde(default = "default_callback_attempts")]
    pub max_attempts: u32,

    /// Pause between callback attempts
    #[serde(default = "default_callback_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Capacity of the failure report channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for StandingQueryConfig {
    fn default() -> Self {
        Self {
            callback_timeout_seconds: default_callback_timeout(),
            max_attempts: default_callback_attempts(),
            retry_backoff_ms: default_callback_backoff_ms(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl StandingQueryConfig {
    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_seconds)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn default_callback_timeout() -> u64 {
    10
}

fn default_callback_attempts() -> u32 {
    3
}

fn default_callback_backoff_ms() -> u64 {
    100
}

fn default_event_buffer() -> usize {
    1024
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderConfig {
    #[serde(default)]
    pub default_format: PackageFormat,

    /// Bundle related files (thumbnails) into order packages
    #[serde(default = "default_include_related")]
    pub include_related_files: bool,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            default_format: PackageFormat::default(),
            include_related_files: default_include_related(),
        }
    }
}

fn default_include_related() -> bool {
    true
}

impl EndpointConfig {
    /// Load from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            tracing::debug!("No endpoint config at {}; using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load from a YAML or JSON file (chosen by extension)
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read endpoint config: {}", path.display()))?;

        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse endpoint config: {}", path.display()))?,
            _ => serde_yaml_ng::from_str(&content)
                .with_context(|| format!("Failed to parse endpoint config: {}", path.display()))?,
        };

        config.validate()?;
        tracing::debug!(
            "Loaded endpoint config from {}: sink={}, delivery attempts={}",
            path.display(),
            config.sink.base_url,
            config.delivery.max_attempts
        );
        Ok(config)
    }

    /// Reject settings that would make the endpoint unusable
    pub fn validate(&self) -> Result<()> {
        let url = &self.sink.base_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            anyhow::bail!("Sink base_url must start with http:// or https://, got '{}'", url);
        }
        if self.delivery.max_attempts == 0 {
            anyhow::bail!("delivery.max_attempts must be at least 1");
        }
        if self.standing_query.max_attempts == 0 {
            anyhow::bail!("standing_query.max_attempts must be at least 1");
        }
        if self.query.default_bound == 0 {
            anyhow::bail!("query.default_bound must be at least 1");
        }
        if self.query.max_bound < self.query.default_bound {
            anyhow::bail!(
                "query.max_bound ({}) is below query.default_bound ({})",
                self.query.max_bound,
                self.query.default_bound
            );
        }
        Ok(())
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml_ng::to_string(self).context("Failed to serialize endpoint config")
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = directories::ProjectDirs::from("io", "catfed", "catfed")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .or_else(|| dirs::config_dir().map(|d| d.join("catfed")))
            .context("Could not determine config directory")?;
        Ok(config_dir.join("endpoint.yaml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = EndpointConfig::default();
        assert_eq!(config.sink.base_url, DEFAULT_SINK_URL);
        assert_eq!(config.delivery.max_attempts, 3);
        assert_eq!(config.query.default_bound, 100);
        assert_eq!(config.order.default_format, PackageFormat::Tar);
        assert!(config.order.include_related_files);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("endpoint.yaml");
        std::fs::write(
            &path,
            "sink:\n  base_url: http://sink.local/files\ndelivery:\n  max_attempts: 5\norder:\n  default_format: tar-gz\n",
        )
        .unwrap();

        let config = EndpointConfig::load_from_path(&path).unwrap();
        assert_eq!(config.sink.base_url, "http://sink.local/files");
        assert_eq!(config.sink.timeout_seconds, 30);
        assert_eq!(config.delivery.max_attempts, 5);
        assert_eq!(config.delivery.initial_backoff_ms, 200);
        assert_eq!(config.order.default_format, PackageFormat::TarGz);
    }

    #[test]
    fn test_json_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("endpoint.json");
        std::fs::write(&path, r#"{"query": {"default_bound": 10, "max_bound": 50}}"#).unwrap();

        let config = EndpointConfig::load_from_path(&path).unwrap();
        assert_eq!(config.query.default_bound, 10);
        assert_eq!(config.query.max_bound, 50);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = EndpointConfig::default();
        config.sink.base_url = "ftp://sink".to_string();
        assert!(config.validate().is_err());

        let mut config = EndpointConfig::default();
        config.delivery.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = EndpointConfig::default();
        config.query.max_bound = 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_bound"));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let delivery = DeliveryConfig {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 500,
        };
        assert_eq!(delivery.backoff(1), Duration::from_millis(100));
        assert_eq!(delivery.backoff(2), Duration::from_millis(200));
        assert_eq!(delivery.backoff(3), Duration::from_millis(400));
        assert_eq!(delivery.backoff(4), Duration::from_millis(500));
        assert_eq!(delivery.backoff(60), Duration::from_millis(500));
    }
}

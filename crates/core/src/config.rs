use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CampaignError, CampaignResult};

/// Root engine configuration. Loaded from environment variables with the
/// prefix `INAPP__` and an optional TOML config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Backoff parameters shared by the campaign list and configuration loops.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_too_many_requests_delay_ms")]
    pub too_many_requests_delay_ms: u64,
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
    #[serde(default = "default_max_server_error_retries")]
    pub max_server_error_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_display_delay_ms")]
    pub default_display_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_wall_clock_check_interval_ms")]
    pub wall_clock_check_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_min_ping_interval_ms")]
    pub min_ping_interval_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// Default functions
fn default_initial_delay_ms() -> u64 {
    10_000
}
fn default_too_many_requests_delay_ms() -> u64 {
    60_000
}
fn default_max_jitter_ms() -> u64 {
    60_000
}
fn default_max_server_error_retries() -> u32 {
    3
}
fn default_display_delay_ms() -> u64 {
    3_000
}
fn default_wall_clock_check_interval_ms() -> u64 {
    1_000
}
fn default_min_ping_interval_ms() -> u64 {
    1_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            too_many_requests_delay_ms: default_too_many_requests_delay_ms(),
            max_jitter_ms: default_max_jitter_ms(),
            max_server_error_retries: default_max_server_error_retries(),
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn too_many_requests_delay(&self) -> Duration {
        Duration::from_millis(self.too_many_requests_delay_ms)
    }

    pub fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.max_jitter_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_display_delay_ms: default_display_delay_ms(),
        }
    }
}

impl DispatchConfig {
    pub fn default_display_delay(&self) -> Duration {
        Duration::from_millis(self.default_display_delay_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            wall_clock_check_interval_ms: default_wall_clock_check_interval_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn wall_clock_check_interval(&self) -> Duration {
        Duration::from_millis(self.wall_clock_check_interval_ms.max(1))
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            min_ping_interval_ms: default_min_ping_interval_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> CampaignResult<Self> {
        Self::load_with_file(None)
    }

    /// Load configuration from an optional TOML file, overridden by
    /// environment variables.
    pub fn load_with_file(path: Option<&Path>) -> CampaignResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Toml),
            );
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("INAPP")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| CampaignError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.retry.initial_delay_ms, 10_000);
        assert_eq!(config.retry.too_many_requests_delay_ms, 60_000);
        assert_eq!(config.retry.max_server_error_retries, 3);
        assert_eq!(config.dispatch.default_display_delay(), Duration::from_secs(3));
        assert!(config.cache.path.is_none());
    }

    #[test]
    fn test_invalid_value_is_config_error() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[retry]\ninitial_delay_ms = \"soon\"").unwrap();

        let err = AppConfig::load_with_file(Some(file.path())).unwrap_err();
        assert!(matches!(err, CampaignError::Config(_)));
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[retry]\ninitial_delay_ms = 500\n\n[dispatch]\ndefault_display_delay_ms = 250"
        )
        .unwrap();

        let config = AppConfig::load_with_file(Some(file.path())).unwrap();
        assert_eq!(config.retry.initial_delay_ms, 500);
        assert_eq!(config.retry.too_many_requests_delay_ms, 60_000);
        assert_eq!(config.dispatch.default_display_delay_ms, 250);
        assert_eq!(config.scheduler.wall_clock_check_interval_ms, 1_000);
    }
}

/*!
 * Configuration types for Halo
 */

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use halo_core_cache::CacheConfig;
use halo_core_resilience::{BreakerConfig, ConnectionConfig, RetryConfig};
use halo_core_telemetry::TelemetryConfig;

use crate::error::{HaloError, Result};

/// Log verbosity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Cache manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: usize,

    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_warm_limit")]
    pub warm_limit: usize,

    /// Directory for the durable tier; a temp-dir default is used if unset
    #[serde(default)]
    pub durable_dir: Option<PathBuf>,

    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_memory_bytes: default_max_memory_bytes(),
            default_ttl_secs: default_cache_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            warm_limit: default_warm_limit(),
            durable_dir: None,
            namespace: default_namespace(),
        }
    }
}

/// Connection manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Concurrent in-flight request ceiling (mirrors typical browser
    /// per-origin limits)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Consecutive failures before an origin's breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,

    #[serde(default = "default_retry_jitter_ms")]
    pub retry_jitter_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            tick_interval_ms: default_tick_interval_ms(),
            default_timeout_secs: default_timeout_secs(),
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
            retry_jitter_ms: default_retry_jitter_ms(),
        }
    }
}

/// Error handler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySettings {
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    #[serde(default = "default_impact_alpha")]
    pub impact_alpha: f64,

    #[serde(default = "default_connectivity_wait_secs")]
    pub connectivity_wait_secs: u64,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            flush_interval_secs: default_flush_interval_secs(),
            impact_alpha: default_impact_alpha(),
            connectivity_wait_secs: default_connectivity_wait_secs(),
        }
    }
}

/// Main configuration for the query service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Query endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// TTL for cached answers
    #[serde(default = "default_answer_ttl_secs")]
    pub answer_ttl_secs: u64,

    #[serde(default)]
    pub log_level: LogLevel,

    /// Log to this file instead of stdout
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Emit JSON-formatted log lines
    #[serde(default)]
    pub log_json: bool,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub connection: ConnectionSettings,

    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            answer_ttl_secs: default_answer_ttl_secs(),
            log_level: LogLevel::default(),
            log_file: None,
            log_json: false,
            cache: CacheSettings::default(),
            connection: ConnectionSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

fn default_endpoint() -> String {
    "http://localhost:8080/query".to_string()
}
fn default_answer_ttl_secs() -> u64 {
    600
}
fn default_max_entries() -> usize {
    500
}
fn default_max_memory_bytes() -> usize {
    5 * 1024 * 1024
}
fn default_cache_ttl_secs() -> u64 {
    3600
}
fn default_sweep_interval_secs() -> u64 {
    300
}
fn default_warm_limit() -> usize {
    50
}
fn default_namespace() -> String {
    "halo".to_string()
}
fn default_max_concurrency() -> usize {
    6
}
fn default_tick_interval_ms() -> u64 {
    50
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown_secs() -> u64 {
    30
}
fn default_retry_base_ms() -> u64 {
    1000
}
fn default_retry_max_ms() -> u64 {
    30_000
}
fn default_retry_jitter_ms() -> u64 {
    1000
}
fn default_buffer_capacity() -> usize {
    100
}
fn default_flush_interval_secs() -> u64 {
    5
}
fn default_impact_alpha() -> f64 {
    0.2
}
fn default_connectivity_wait_secs() -> u64 {
    10
}

impl ServiceConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ServiceConfig = toml::from_str(&contents)
            .map_err(|e| HaloError::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &PathBuf) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| HaloError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Preset tuned for interactive use: short timeouts, quick retries
    pub fn interactive_preset() -> Self {
        let mut config = Self::default();
        config.connection.default_timeout_secs = 10;
        config.connection.retry_base_ms = 250;
        config.connection.retry_max_ms = 5_000;
        config.connection.cooldown_secs = 15;
        config.answer_ttl_secs = 300;
        config
    }

    /// Preset tuned for flaky networks: patient timeouts, long cooldowns
    pub fn patient_preset() -> Self {
        let mut config = Self::default();
        config.connection.default_timeout_secs = 60;
        config.connection.retry_max_ms = 60_000;
        config.connection.cooldown_secs = 120;
        config.telemetry.connectivity_wait_secs = 60;
        config
    }

    pub fn cache_config(&self) -> CacheConfig {
        let defaults = CacheConfig::default();
        CacheConfig {
            max_entries: self.cache.max_entries,
            max_memory_bytes: self.cache.max_memory_bytes,
            default_ttl: Duration::from_secs(self.cache.default_ttl_secs),
            sweep_interval: Duration::from_secs(self.cache.sweep_interval_secs),
            warm_limit: self.cache.warm_limit,
            durable_dir: self
                .cache
                .durable_dir
                .clone()
                .unwrap_or(defaults.durable_dir),
            namespace: self.cache.namespace.clone(),
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            max_concurrency: self.connection.max_concurrency,
            tick_interval: Duration::from_millis(self.connection.tick_interval_ms),
            default_timeout: Duration::from_secs(self.connection.default_timeout_secs),
            breaker: BreakerConfig {
                failure_threshold: self.connection.failure_threshold,
                cooldown: Duration::from_secs(self.connection.cooldown_secs),
            },
            retry: RetryConfig {
                base_delay: Duration::from_millis(self.connection.retry_base_ms),
                max_delay: Duration::from_millis(self.connection.retry_max_ms),
                jitter: Duration::from_millis(self.connection.retry_jitter_ms),
            },
        }
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            buffer_capacity: self.telemetry.buffer_capacity,
            flush_interval: Duration::from_secs(self.telemetry.flush_interval_secs),
            impact_alpha: self.telemetry.impact_alpha,
            connectivity_wait: Duration::from_secs(self.telemetry.connectivity_wait_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.connection.max_concurrency, 6);
        assert_eq!(config.connection.failure_threshold, 5);
        assert_eq!(config.connection.default_timeout_secs, 30);
        assert_eq!(config.cache.max_entries, 500);
        assert_eq!(config.telemetry.flush_interval_secs, 5);
    }

    #[test]
    fn test_serialization_round_trip() {
        let config = ServiceConfig::default();
        let toml = toml::to_string(&config).unwrap();
        let deserialized: ServiceConfig = toml::from_str(&toml).unwrap();
        assert_eq!(deserialized.endpoint, config.endpoint);
        assert_eq!(deserialized.cache.max_entries, config.cache.max_entries);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
            endpoint = "https://ask.example.com/v1/query"

            [connection]
            failure_threshold = 3
        "#;
        let config: ServiceConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.endpoint, "https://ask.example.com/v1/query");
        assert_eq!(config.connection.failure_threshold, 3);
        assert_eq!(config.connection.max_concurrency, 6);
        assert_eq!(config.cache.max_entries, 500);
    }

    #[test]
    fn test_presets() {
        let interactive = ServiceConfig::interactive_preset();
        assert_eq!(interactive.connection.default_timeout_secs, 10);
        assert!(interactive.connection.retry_base_ms < 1000);

        let patient = ServiceConfig::patient_preset();
        assert_eq!(patient.connection.cooldown_secs, 120);
    }

    #[test]
    fn test_config_conversion() {
        let config = ServiceConfig::default();
        let connection = config.connection_config();
        assert_eq!(connection.breaker.failure_threshold, 5);
        assert_eq!(connection.retry.max_delay, Duration::from_secs(30));
        let cache = config.cache_config();
        assert_eq!(cache.default_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("halo.toml");
        let config = ServiceConfig::patient_preset();
        config.to_file(&path).unwrap();
        let loaded = ServiceConfig::from_file(&path).unwrap();
        assert_eq!(loaded.connection.cooldown_secs, 120);
    }
}

/*!
 * Configuration management for StationLink.
 *
 * Every setting has a default matching the fixed behaviour of the station
 * (daemon on `localhost:4223`, one second retry delay, one second reading
 * period). An optional TOML file and `STATIONLINK__SECTION__KEY` environment
 * variables can override them.
 */
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::Endpoint;

/// Default configuration file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "stationlink.toml";

/// Default environment variable prefix
pub const DEFAULT_ENV_PREFIX: &str = "STATIONLINK";

/// Core configuration for StationLink
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Daemon connection settings
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Retry policy for connect and enumerate
    #[serde(default)]
    pub retry: RetryConfig,

    /// Device registry settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which daemon implementation the station talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// A Tinkerforge Brick Daemon reached over TCP
    #[default]
    Tinkerforge,
    /// The in-process simulated daemon
    Simulated,
}

/// Daemon connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Daemon host
    #[serde(default = "default_host")]
    pub host: String,

    /// Daemon port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Backend selection
    #[serde(default)]
    pub backend: Backend,
}

/// Retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Fixed delay between attempts, in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

/// Device registry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Period of the sensor's reading push, in milliseconds
    #[serde(default = "default_reading_period_ms")]
    pub reading_period_ms: u64,

    /// Title written to the first display row
    #[serde(default = "default_title")]
    pub title: String,

    /// Drop a handle when the daemon reports its device as disconnected
    #[serde(default = "default_true")]
    pub invalidate_on_disconnect: bool,

    /// Fetch and render one reading as soon as a sensor is attached
    #[serde(default = "default_true")]
    pub initial_read: bool,

    /// Minimum spacing of readings kept in the history, in milliseconds
    #[serde(default = "default_logging_period_ms")]
    pub logging_period_ms: u64,

    /// Number of readings kept in the history
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl DaemonConfig {
    /// The configured daemon address
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }
}

impl RetryConfig {
    /// The retry delay as a [`Duration`]
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl RegistryConfig {
    /// The reading period as a [`Duration`]
    pub fn reading_period(&self) -> Duration {
        Duration::from_millis(self.reading_period_ms)
    }

    /// The history logging period as a [`Duration`]
    pub fn logging_period(&self) -> Duration {
        Duration::from_millis(self.logging_period_ms)
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backend: Backend::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            reading_period_ms: default_reading_period_ms(),
            title: default_title(),
            invalidate_on_disconnect: true,
            initial_read: true,
            logging_period_ms: default_logging_period_ms(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    4223
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_reading_period_ms() -> u64 {
    1000
}

fn default_logging_period_ms() -> u64 {
    1000
}

fn default_history_capacity() -> usize {
    3600
}

fn default_title() -> String {
    "   Weather Station".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path; a missing file is not an error
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Set the environment variable prefix for configuration
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<Config> {
        let mut config_builder = ConfigLib::builder();

        let default_config = Config::default();
        config_builder = config_builder.add_source(
            ConfigLib::try_from(&default_config)
                .map_err(|e| Error::config(format!("Failed to create default config: {}", e)))?,
        );

        if let Some(config_file) = self.config_file {
            let path = Path::new(&config_file);
            if path.exists() {
                debug!("Loading configuration from {}", config_file);
                config_builder = config_builder.add_source(File::with_name(&config_file));
            } else {
                debug!("Configuration file {} does not exist, using defaults", config_file);
            }
        }

        if let Some(prefix) = self.environment_prefix {
            debug!("Loading configuration from environment variables with prefix {}", prefix);
            config_builder = config_builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config_lib = config_builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?;

        let config: Config = config_lib
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        info!(
            "Configuration loaded (daemon {}:{}, backend {:?})",
            config.daemon.host, config.daemon.port, config.daemon.backend
        );
        Ok(config)
    }
}

/// A thread-safe reference to a configuration
#[derive(Debug, Clone)]
pub struct SharedConfig(Arc<Config>);

impl SharedConfig {
    /// Create a new SharedConfig
    pub fn new(config: Config) -> Self {
        Self(Arc::new(config))
    }

    /// Get a reference to the config
    pub fn get(&self) -> &Config {
        &self.0
    }
}

impl From<Config> for SharedConfig {
    fn from(config: Config) -> Self {
        Self::new(config)
    }
}

impl AsRef<Config> for SharedConfig {
    fn as_ref(&self) -> &Config {
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.daemon.host, "localhost");
        assert_eq!(config.daemon.port, 4223);
        assert_eq!(config.daemon.backend, Backend::Tinkerforge);
        assert_eq!(config.retry.delay(), Duration::from_secs(1));
        assert_eq!(config.registry.reading_period(), Duration::from_millis(1000));
        assert_eq!(config.registry.title, "   Weather Station");
        assert!(config.registry.invalidate_on_disconnect);
        assert!(config.registry.initial_read);
        assert_eq!(config.registry.logging_period(), Duration::from_secs(1));
        assert_eq!(config.registry.history_capacity, 3600);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_builder_defaults() {
        let config = ConfigBuilder::new().build().unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_builder_missing_file() {
        let config = ConfigBuilder::new()
            .with_config_file("/nonexistent/stationlink.toml")
            .build()
            .unwrap();
        assert_eq!(config.daemon.endpoint(), Endpoint::new("localhost", 4223));
    }

    #[test]
    fn test_config_builder_with_file() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("stationlink.toml");

        {
            let mut file = File::create(&file_path)?;
            file.write_all(
                br#"
                [daemon]
                host = "weather-pi"
                backend = "simulated"

                [registry]
                invalidate_on_disconnect = false
                logging_period_ms = 300000

                [logging]
                level = "debug"
            "#,
            )?;
        }

        let config = ConfigBuilder::new().with_config_file(file_path).build()?;

        assert_eq!(config.daemon.host, "weather-pi");
        assert_eq!(config.daemon.port, 4223);
        assert_eq!(config.daemon.backend, Backend::Simulated);
        assert!(!config.registry.invalidate_on_disconnect);
        assert!(config.registry.initial_read);
        assert_eq!(config.registry.logging_period(), Duration::from_secs(300));
        assert_eq!(config.logging.level, "debug");

        Ok(())
    }

    #[test]
    fn test_config_builder_with_env() -> Result<()> {
        env::set_var("STATIONLINK_TEST__DAEMON__PORT", "4280");
        env::set_var("STATIONLINK_TEST__RETRY__DELAY_MS", "250");

        let config = ConfigBuilder::new()
            .with_environment_prefix("STATIONLINK_TEST")
            .build()?;

        assert_eq!(config.daemon.port, 4280);
        assert_eq!(config.retry.delay(), Duration::from_millis(250));

        env::remove_var("STATIONLINK_TEST__DAEMON__PORT");
        env::remove_var("STATIONLINK_TEST__RETRY__DELAY_MS");

        Ok(())
    }

    #[test]
    fn test_shared_config() {
        let shared = SharedConfig::new(Config::default());
        let shared2 = shared.clone();
        assert_eq!(shared2.get().daemon.port, 4223);
        assert_eq!(shared.as_ref().daemon.host, "localhost");
    }
}

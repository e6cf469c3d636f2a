/*!
 * Configuration management for Breezer.
 *
 * This module provides functionality to load, validate, and access the
 * driver configuration: logging, session retry policy, and frame sizes.
 */
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::utils::RetryPolicy;

/// Core configuration for Breezer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Frame segmentation configuration
    #[serde(default)]
    pub framing: FramingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (trace, debug, info, warn, error or a full EnvFilter directive)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to print the event target
    #[serde(default = "default_with_target")]
    pub with_target: bool,
}

/// Session configuration
///
/// Connect retries less aggressively than writes: a failed connect is
/// expensive and usually means the device is out of range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Retries after a failed transport connect
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// Delay between connect attempts in milliseconds
    #[serde(default = "default_connect_delay_ms")]
    pub connect_delay_ms: u64,

    /// Retries after a failed frame write
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,

    /// Delay between write attempts in milliseconds
    #[serde(default)]
    pub write_delay_ms: u64,

    /// Number of empty polls tolerated while waiting for a response
    #[serde(default = "default_response_polls")]
    pub response_polls: u32,

    /// Length of one poll in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Capacity of the notification channel between transport and session
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
}

/// Frame segmentation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramingConfig {
    /// Largest frame the transport carries in one characteristic write
    #[serde(default = "default_mtu")]
    pub mtu: usize,

    /// Messages up to this length (leading byte included) go out as one frame
    #[serde(default = "default_single_frame_limit")]
    pub single_frame_limit: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: default_with_target(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_retries: default_connect_retries(),
            connect_delay_ms: default_connect_delay_ms(),
            write_retries: default_write_retries(),
            write_delay_ms: 0,
            response_polls: default_response_polls(),
            poll_interval_ms: default_poll_interval_ms(),
            notification_capacity: default_notification_capacity(),
        }
    }
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            mtu: default_mtu(),
            single_frame_limit: default_single_frame_limit(),
        }
    }
}

impl SessionConfig {
    /// Retry policy for transport connects
    pub fn connect_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.connect_retries, Duration::from_millis(self.connect_delay_ms))
    }

    /// Retry policy for frame writes
    pub fn write_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.write_retries, Duration::from_millis(self.write_delay_ms))
    }

    /// Length of one response poll
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    /// Check the configuration for values the driver cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.framing.mtu < 2 {
            return Err(Error::config(format!(
                "framing.mtu must leave room for a marker and payload, got {}",
                self.framing.mtu
            )));
        }
        if self.framing.single_frame_limit == 0 {
            return Err(Error::config("framing.single_frame_limit must be at least 1"));
        }
        if self.framing.single_frame_limit > self.framing.mtu {
            return Err(Error::config(format!(
                "framing.single_frame_limit ({}) exceeds framing.mtu ({})",
                self.framing.single_frame_limit, self.framing.mtu
            )));
        }
        if self.session.response_polls == 0 {
            return Err(Error::config("session.response_polls must be at least 1"));
        }
        if self.session.notification_capacity == 0 {
            return Err(Error::config("session.notification_capacity must be at least 1"));
        }
        if self.session.connect_retries >= self.session.write_retries {
            return Err(Error::config(format!(
                "session.connect_retries ({}) must stay below session.write_retries ({})",
                self.session.connect_retries, self.session.write_retries
            )));
        }
        Ok(())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_with_target() -> bool {
    true
}

fn default_connect_retries() -> u32 {
    1
}

fn default_connect_delay_ms() -> u64 {
    2000
}

fn default_write_retries() -> u32 {
    3
}

fn default_response_polls() -> u32 {
    10
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_notification_capacity() -> usize {
    64
}

fn default_mtu() -> usize {
    20
}

fn default_single_frame_limit() -> usize {
    20
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
    override_with: Option<Config>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Set the environment variable prefix for configuration
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Override with an existing config
    pub fn override_with(mut self, config: Config) -> Self {
        self.override_with = Some(config);
        self
    }

    /// Build and validate the configuration
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

        let mut config: Config = config_lib
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        if let Some(override_config) = self.override_with {
            config = override_config;
        }

        config.validate()?;

        info!("Configuration loaded successfully");
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
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.session.connect_retries, 1);
        assert_eq!(config.session.connect_delay_ms, 2000);
        assert_eq!(config.session.write_retries, 3);
        assert_eq!(config.session.response_polls, 10);
        assert_eq!(config.framing.mtu, 20);
        assert_eq!(config.framing.single_frame_limit, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_policies_from_session_config() {
        let session = SessionConfig::default();

        let connect = session.connect_policy();
        assert_eq!(connect.retries, 1);
        assert_eq!(connect.delay, Duration::from_secs(2));

        let write = session.write_policy();
        assert_eq!(write.retries, 3);
        assert_eq!(write.delay, Duration::ZERO);
    }

    #[test]
    fn test_config_builder_defaults() {
        let config = ConfigBuilder::new().build().unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.session.write_retries, 3);
    }

    #[test]
    fn test_config_builder_with_file() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("breezer.toml");

        {
            let mut file = File::create(&file_path)?;
            file.write_all(
                br#"
                [logging]
                level = "debug"

                [session]
                write_retries = 5
                poll_interval_ms = 250

                [framing]
                single_frame_limit = 19
            "#,
            )?;
        }

        let config = ConfigBuilder::new().with_config_file(file_path).build()?;

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.session.write_retries, 5);
        assert_eq!(config.session.poll_interval_ms, 250);
        assert_eq!(config.session.connect_retries, 1);
        assert_eq!(config.framing.single_frame_limit, 19);

        Ok(())
    }

    #[test]
    fn test_config_builder_missing_file_uses_defaults() -> Result<()> {
        let config = ConfigBuilder::new()
            .with_config_file("/definitely/not/here/breezer.toml")
            .build()?;
        assert_eq!(config.framing.mtu, 20);
        Ok(())
    }

    #[test]
    fn test_config_builder_with_env() -> Result<()> {
        env::set_var("BREEZERTEST__SESSION__WRITE_RETRIES", "6");
        env::set_var("BREEZERTEST__LOGGING__LEVEL", "trace");

        let config = ConfigBuilder::new()
            .with_environment_prefix("breezertest")
            .build();

        env::remove_var("BREEZERTEST__SESSION__WRITE_RETRIES");
        env::remove_var("BREEZERTEST__LOGGING__LEVEL");

        let config = config?;
        assert_eq!(config.session.write_retries, 6);
        assert_eq!(config.logging.level, "trace");

        Ok(())
    }

    #[test]
    fn test_validate_rejects_inverted_retry_budgets() {
        let mut config = Config::default();
        config.session.connect_retries = 3;
        config.session.write_retries = 3;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_single_limit_above_mtu() {
        let mut config = Config::default();
        config.framing.single_frame_limit = 21;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_single_limit() {
        let mut config = Config::default();
        config.framing.single_frame_limit = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_polls() {
        let mut config = Config::default();
        config.session.response_polls = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shared_config() {
        let shared = SharedConfig::new(Config::default());
        assert_eq!(shared.get().framing.mtu, 20);

        let shared2 = shared.clone();
        assert_eq!(shared2.as_ref().session.write_retries, 3);
    }
}

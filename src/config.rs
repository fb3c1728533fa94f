//! Configuration loading using Figment
//!
//! Configuration is merged from:
//! 1. a TOML file (`sigdata.toml` unless another path is given)
//! 2. environment variables prefixed with `SIGDATA_`, nested keys separated by `__`
//!
//! Every field has a default, so a missing file yields a usable configuration.
//!
//! # Example
//! ```no_run
//! use sigdata::config::SigdataConfig;
//!
//! let config = SigdataConfig::load()?;
//! config.validate()?;
//! println!("Pipe capacity: {} bytes", config.pipe.capacity_bytes);
//! # Ok::<(), sigdata::config::ConfigError>(())
//! ```

use crate::logging::OutputFormat;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use sigdata_core::limits::MAX_PIPE_BYTES;
use sigdata_storage::{CapacityPolicy, PipeConfig};
use std::path::Path;
use thiserror::Error;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "sigdata.toml";

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file or environment could not be merged into a configuration
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SigdataConfig {
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Default pipe settings
    #[serde(default)]
    pub pipe: PipeSettings,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format
    #[serde(default)]
    pub format: OutputFormat,
    /// Whether to include file and line numbers
    #[serde(default)]
    pub file_and_line: bool,
}

/// Default pipe configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeSettings {
    /// Pipe capacity in bytes
    #[serde(default = "default_capacity_bytes")]
    pub capacity_bytes: u64,
    /// Treatment of capacities that are not a whole number of elements
    #[serde(default)]
    pub policy: CapacityPolicy,
    /// Frames buffered per tap
    #[serde(default = "default_tap_channel_size")]
    pub tap_channel_size: usize,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_capacity_bytes() -> u64 {
    1024 * 1024
}

fn default_tap_channel_size() -> usize {
    16
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: OutputFormat::default(),
            file_and_line: false,
        }
    }
}

impl Default for PipeSettings {
    fn default() -> Self {
        Self {
            capacity_bytes: default_capacity_bytes(),
            policy: CapacityPolicy::default(),
            tap_channel_size: default_tap_channel_size(),
        }
    }
}

impl PipeSettings {
    /// Pipe construction parameters
    pub fn to_pipe_config(&self) -> PipeConfig {
        PipeConfig::new(self.capacity_bytes)
            .with_policy(self.policy)
            .with_tap_channel_size(self.tap_channel_size)
    }
}

impl SigdataConfig {
    /// Load configuration from `sigdata.toml` and environment variables
    ///
    /// Environment variables override the file, e.g.
    /// `SIGDATA_PIPE__CAPACITY_BYTES=65536` or `SIGDATA_LOGGING__LEVEL=debug`.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SIGDATA_").split("__"))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        crate::logging::parse_log_level(&self.logging.level).map_err(ConfigError::Invalid)?;

        if self.pipe.capacity_bytes == 0 {
            return Err(ConfigError::Invalid(
                "pipe.capacity_bytes must be greater than 0".to_string(),
            ));
        }
        if self.pipe.capacity_bytes > MAX_PIPE_BYTES {
            return Err(ConfigError::Invalid(format!(
                "pipe.capacity_bytes {} exceeds maximum {}",
                self.pipe.capacity_bytes, MAX_PIPE_BYTES
            )));
        }
        if self.pipe.tap_channel_size == 0 {
            return Err(ConfigError::Invalid(
                "pipe.tap_channel_size must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = SigdataConfig::load_from(temp_dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.pipe.capacity_bytes, 1024 * 1024);
        assert_eq!(config.pipe.policy, CapacityPolicy::Strict);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[logging]
level = "debug"
format = "json"

[pipe]
capacity_bytes = 80
policy = "odd_remainder"
"#
        )
        .unwrap();

        let config = SigdataConfig::load_from(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, OutputFormat::Json);
        assert_eq!(config.pipe.capacity_bytes, 80);
        assert_eq!(config.pipe.tap_channel_size, 16);

        let pipe = config.pipe.to_pipe_config();
        assert_eq!(pipe.policy, CapacityPolicy::OddRemainder);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = SigdataConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_capacity() {
        let mut config = SigdataConfig::default();
        config.pipe.capacity_bytes = 0;
        assert!(config.validate().is_err());

        config.pipe.capacity_bytes = MAX_PIPE_BYTES + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml_is_load_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pipe]\ncapacity_bytes = \"lots\"").unwrap();
        assert!(matches!(
            SigdataConfig::load_from(file.path()),
            Err(ConfigError::Load(_))
        ));
    }
}

//! Configuration parsing and management.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Domain configuration
///
/// ```yaml
/// name: billing
/// retry:
///   max_attempts: 4
///   initial_delay_ms: 20
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    #[serde(default = "default_domain_name")]
    pub name: String,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_domain_name() -> String {
    "default".to_string()
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            name: default_domain_name(),
            retry: RetryConfig::default(),
        }
    }
}

impl DomainConfig {
    /// A default configuration with the given domain name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: DomainConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "name",
                reason: "domain name must not be empty".to_string(),
            });
        }
        self.retry.validate()
    }
}

/// Retry policy configuration
///
/// Attempt 1 runs immediately. Attempt `n` waits
/// `initial_delay * 2^(n - 2)`, capped at `max_delay`, then scaled down by a
/// random factor in `[1 - jitter_factor, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per call, including the first; `None` retries forever
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<u32>,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Down-jitter factor (0.25 = up to 25% reduction)
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_max_attempts() -> Option<u32> {
    Some(5)
}

fn default_initial_delay_ms() -> u64 {
    10
}

fn default_max_delay_ms() -> u64 {
    1_000
}

fn default_jitter_factor() -> f64 {
    0.25
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RetryConfig {
    /// Retry forever without waiting between attempts
    pub fn immediate() -> Self {
        Self {
            max_attempts: None,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            jitter_factor: 0.0,
        }
    }

    /// Bounded attempts without waiting between them
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..Self::immediate()
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == Some(0) {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts",
                reason: "at least one attempt is required".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::Invalid {
                field: "retry.jitter_factor",
                reason: format!("{} is outside [0, 1]", self.jitter_factor),
            });
        }
        Ok(())
    }
}

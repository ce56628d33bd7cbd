//! Configuration module for Mizuchi Stream
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation. Every section is optional;
//! a missing file means defaults throughout.
//!
//! ```yaml
//! s3:
//!   region: us-east-1
//!   endpoint: http://localhost:9000
//!   access_key: ${AWS_ACCESS_KEY_ID}
//!   secret_key: ${AWS_SECRET_ACCESS_KEY}
//! upload:
//!   max_in_flight: 6
//!   checksum: sha256
//! metrics:
//!   enabled: true
//! ```

use crate::s3::S3ClientConfig;
use crate::upload::{
    ChecksumAlgorithm, Destination, PartLimits, SessionConfig, UploadOptions,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::{expand_env_vars, ConfigLoader};

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub s3: S3Config,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.s3.region.trim().is_empty() {
            return Err(ConfigError::ValidationError("s3.region cannot be empty".into()));
        }

        if let Some(ref endpoint) = self.s3.endpoint {
            if !is_valid_http_url(endpoint) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid s3.endpoint '{}': must start with http:// or https://",
                    endpoint
                )));
            }
        }

        if self.s3.access_key.is_some() != self.s3.secret_key.is_some() {
            return Err(ConfigError::ValidationError(
                "s3.access_key and s3.secret_key must be set together".into(),
            ));
        }

        if self.s3.timeout_secs == Some(0) {
            return Err(ConfigError::ValidationError(
                "s3.timeout_secs must be greater than zero".into(),
            ));
        }

        self.upload
            .limits()
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        if self.upload.max_in_flight == 0 {
            return Err(ConfigError::ValidationError(
                "upload.max_in_flight must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

/// S3 backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub path_style: bool,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint: None,
            path_style: false,
            access_key: None,
            secret_key: None,
            session_token: None,
            timeout_secs: None,
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl S3Config {
    /// Client configuration without credentials; those are resolved separately
    pub fn client_config(&self) -> S3ClientConfig {
        S3ClientConfig {
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            access_key: None,
            secret_key: None,
            session_token: None,
            path_style: self.path_style,
            timeout: self.timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Upload session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_min_part_size")]
    pub min_part_size: u64,
    #[serde(default = "default_max_part_size")]
    pub max_part_size: u64,
    #[serde(default = "default_max_part_count")]
    pub max_part_count: u32,
    #[serde(default)]
    pub initial_part_size: Option<u64>,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub checksum: Option<ChecksumAlgorithm>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            min_part_size: default_min_part_size(),
            max_part_size: default_max_part_size(),
            max_part_count: default_max_part_count(),
            initial_part_size: None,
            max_in_flight: default_max_in_flight(),
            content_type: None,
            metadata: BTreeMap::new(),
            checksum: None,
        }
    }
}

fn default_min_part_size() -> u64 {
    crate::upload::policy::MIN_PART_SIZE
}

fn default_max_part_size() -> u64 {
    crate::upload::policy::MAX_PART_SIZE
}

fn default_max_part_count() -> u32 {
    crate::upload::policy::MAX_PARTS
}

fn default_max_in_flight() -> usize {
    crate::upload::policy::DEFAULT_MAX_IN_FLIGHT
}

impl UploadConfig {
    pub fn limits(&self) -> PartLimits {
        PartLimits::new(self.min_part_size, self.max_part_size, self.max_part_count)
    }

    pub fn options(&self) -> UploadOptions {
        UploadOptions {
            content_type: self.content_type.clone(),
            metadata: self.metadata.clone(),
            checksum: self.checksum,
        }
    }

    /// Session configuration for uploading to `destination`
    pub fn session_config(&self, destination: Destination) -> SessionConfig {
        let mut config = SessionConfig::new(destination)
            .with_limits(self.limits())
            .with_max_in_flight(self.max_in_flight)
            .with_options(self.options());
        if let Some(size) = self.initial_part_size {
            config = config.with_initial_part_size(size);
        }
        config
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

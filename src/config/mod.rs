//! Configuration module for Chunkyard
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Smallest accepted merge buffer
pub const MIN_MERGE_BUFFER_SIZE: usize = 512;

/// Largest accepted merge buffer (64MB)
pub const MAX_MERGE_BUFFER_SIZE: usize = 64 * 1024 * 1024;

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
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
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
        if self.server.address.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::ValidationError(format!(
                "Invalid server address '{}'",
                self.server.address
            )));
        }

        if self.storage.root_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "storage.root_dir cannot be empty".into(),
            ));
        }

        let buffer = self.storage.merge_buffer_size;
        if !(MIN_MERGE_BUFFER_SIZE..=MAX_MERGE_BUFFER_SIZE).contains(&buffer) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid merge_buffer_size {}: must be between {} and {}",
                buffer, MIN_MERGE_BUFFER_SIZE, MAX_MERGE_BUFFER_SIZE
            )));
        }

        if self.sweep.interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "sweep.interval_secs must be greater than zero".into(),
            ));
        }

        if self.sweep.max_idle_secs == 0 || self.sweep.max_temp_age_secs == 0 {
            return Err(ConfigError::ValidationError(
                "sweep.max_idle_secs and sweep.max_temp_age_secs must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
}

/// Storage layout configuration
///
/// Chunk slots, staging files and published artifacts all live flat under
/// `root_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    /// Buffer used when streaming slots into the artifact
    #[serde(default = "default_merge_buffer_size")]
    pub merge_buffer_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            merge_buffer_size: default_merge_buffer_size(),
        }
    }
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("nas_files")
}

fn default_merge_buffer_size() -> usize {
    65536 // 64KB
}

/// Temp-slot sweeper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_on_startup")]
    pub on_startup: bool,
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
    /// Incomplete assemblies idle for longer than this are abandoned
    #[serde(default = "default_max_idle")]
    pub max_idle_secs: u64,
    /// Temp files older than this are removed
    #[serde(default = "default_max_temp_age")]
    pub max_temp_age_secs: u64,
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    pub fn max_temp_age(&self) -> Duration {
        Duration::from_secs(self.max_temp_age_secs)
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            on_startup: default_sweep_on_startup(),
            interval_secs: default_sweep_interval(),
            max_idle_secs: default_max_idle(),
            max_temp_age_secs: default_max_temp_age(),
        }
    }
}

fn default_sweep_on_startup() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_max_idle() -> u64 {
    3600
}

fn default_max_temp_age() -> u64 {
    86400 // 1 day
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

//! Configuration management for mediahound
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use mediahound::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `MEDIAHOUND__<section>__<key>`
//!
//! Examples:
//! - `MEDIAHOUND__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `MEDIAHOUND__BROWSER__ENABLED=false`
//! - `MEDIAHOUND__RETRIEVAL__CHUNK_SIZE=64KB`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/mediahound.toml`.
//! This can be overridden using the `MEDIAHOUND_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{
    BrowserConfig, Config, DiscoveryConfig, DiscoveryMode, RegistryConfig, RetrievalConfig,
    ServerConfig, StimulationConfig, TelemetryConfig, TranscodeConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or a value
    /// fails validation (zero timeouts, unknown default extension, ...).
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[transcode]\nenabled = false\n").unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert!(!config.transcode.enabled);
        assert!(config.browser.enabled);
    }

    #[test]
    fn test_validation_runs_after_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[retrieval]\nchunk_size = 0\n").unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::ZeroChunkSize)
        ));
    }

    #[test]
    fn test_shipped_config_loads() {
        let path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/mediahound.toml");

        let config = Config::load_from_path(path).unwrap();
        assert_eq!(config.discovery.mode, DiscoveryMode::Auto);
        assert_eq!(config.server.max_payload_bytes, ByteSize::mib(1));
        assert_eq!(config.stimulation.click_point, Some([500.0, 300.0]));
    }

    #[test]
    fn test_malformed_file_is_load_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[server]\nbind_addr = \"not an address\"\n").unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(result.unwrap_err(), ConfigError::LoadError(_)));
    }
}

//! Error types for the configuration system

use std::path::PathBuf;

use thiserror::Error;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Explicitly requested configuration file is missing
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// File exists but could not be read while sniffing its format
    #[error("Cannot read configuration file {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A loaded value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unknown risk profile: {0} (expected conservative, moderate or aggressive)")]
    UnknownProfile(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Merging or deserializing the layered sources failed
    #[error("Configuration source error: {0}")]
    Source(#[from] config::ConfigError),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

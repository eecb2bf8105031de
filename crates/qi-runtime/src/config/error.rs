//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File not found at the specified path.
    #[error("configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Failed to read the configuration file.
    #[error("failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    /// TOML/environment parsing or merge error surfaced by `figment`.
    #[error("configuration parse error: {0}")]
    ParseError(#[from] figment::Error),

    /// A validated field held a semantically invalid value.
    #[error("invalid configuration: {message}")]
    ValidationError {
        /// Human-readable reason.
        message: String,
    },

    /// A required field was absent from every layer.
    #[error("missing required configuration field: {field}")]
    MissingField {
        /// The field's name.
        field: String,
    },

    /// `bind_addr`'s port was out of the valid range or malformed.
    #[error("invalid port number: {0}")]
    InvalidPort(u16),
}

impl ConfigError {
    /// Builds a [`ConfigError::ValidationError`] from any displayable reason.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

//! Error types shared by the uascout crates.
//!
//! Configuration loading and the parsing of user supplied values (address ranges,
//! port ranges, enumerated values) report through these types. All variants are
//! serializable so they can be attached to progress events and API responses.

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Result type alias using CoreError as the error type.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Top-level error type for core operations.
#[derive(Debug, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum CoreError {
    /// Parsing of a user supplied value failed
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },
}

impl From<io::Error> for CoreError {
    fn from(err: io::Error) -> Self {
        CoreError::Io {
            message: err.to_string(),
        }
    }
}

/// Errors raised while parsing scan specifications and URLs.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ParseError {
    /// Invalid IP address, CIDR block or address range
    #[error("Invalid address range '{value}': {reason}")]
    InvalidAddressRange { value: String, reason: String },

    /// Invalid port or port range
    #[error("Invalid port range '{value}': {reason}")]
    InvalidPortRange { value: String, reason: String },

    /// Value not in the set of accepted values
    #[error("Invalid value '{value}' for '{field}'")]
    InvalidValue { field: String, value: String },

    /// Empty input where a value was required
    #[error("Missing value for '{field}'")]
    Empty { field: String },
}

impl ParseError {
    /// Creates an invalid address range error.
    pub fn address(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddressRange {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid port range error.
    pub fn port(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPortRange {
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Errors related to configuration loading and validation.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {reason}")]
    InvalidFormat { reason: String },

    /// Missing required configuration field
    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    /// Creates a file not found error.
    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

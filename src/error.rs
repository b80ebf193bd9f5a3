//! Configuration errors.
//!
//! Bridge and tool failures are reported through
//! [`BridgeError`](crate::bridge::BridgeError); this module covers only what
//! can go wrong before the server starts.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid JSON for [`Config`](crate::config::Config).
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// An explicitly named configuration file does not exist.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// An environment variable override has an unusable value.
    #[error("invalid value for {variable}: '{value}'")]
    InvalidOverride {
        /// Variable name.
        variable: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A setting is out of range.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

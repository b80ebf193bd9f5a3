//! Configuration file loading and parsing.
//!
//! This module handles loading the configuration file from disk and parsing
//! it into validated, type-safe structures.
//!
//! # Configuration File Locations
//!
//! The configuration file is searched in the following order:
//!
//! 1. Path specified via `--config` CLI flag
//! 2. Default location:
//!    - **Linux/macOS:** `~/.cad-bridge-mcp/config.json`
//!    - **Windows:** `%USERPROFILE%\.cad-bridge-mcp\config.json`
//!
//! An explicit path must exist. A missing default file is not an error: the
//! built-in defaults are used. `CAD_BRIDGE_HOST` and `CAD_BRIDGE_PORT` are
//! applied on top of whatever was loaded.

mod settings;

pub use settings::{
    BridgeSettings, Config, LoggingConfig, SessionSettings, ENV_HOST, ENV_PORT,
};

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Returns the default configuration directory.
///
/// - **Linux/macOS:** `~/.cad-bridge-mcp/`
/// - **Windows:** `%USERPROFILE%\.cad-bridge-mcp\`
#[must_use]
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|p| p.join(".cad-bridge-mcp"))
}

/// Returns the platform-specific default configuration file path.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join("config.json"))
}

/// Returns the default session file path.
#[must_use]
pub fn default_session_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join("session.json"))
}

/// Loads and parses the configuration file, then applies environment
/// overrides and validates the result.
///
/// If `path` is `None`, uses the platform-specific default location, falling
/// back to built-in defaults when no file exists there.
///
/// # Errors
///
/// Returns an error if:
/// - An explicit configuration file cannot be found
/// - The file cannot be read
/// - The JSON is malformed
/// - An override or setting is invalid
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => read_config(p)?,
        None => match default_config_path() {
            Some(p) if p.exists() => read_config(&p)?,
            _ => {
                tracing::debug!("No configuration file found, using defaults");
                Config::default()
            }
        },
    };

    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

fn read_config(config_path: &Path) -> Result<Config, ConfigError> {
    if !config_path.exists() {
        return Err(ConfigError::NotFound {
            path: config_path.to_path_buf(),
        });
    }

    let contents = std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
        path: config_path.to_path_buf(),
        source: e,
    })?;

    serde_json::from_str(&contents).map_err(|e| ConfigError::ParseError {
        path: config_path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_dir_exists() {
        assert!(default_config_dir().is_some());
    }

    #[test]
    fn default_config_path_exists() {
        let path = default_config_path();
        assert!(path.is_some());
        assert!(path.unwrap().to_string_lossy().contains("config.json"));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(Some(&dir.path().join("absent.json")));
        assert!(matches!(result, Err(ConfigError::NotFound { .. })));
    }

    #[test]
    fn explicit_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"bridge": {"request_timeout_ms": 1234}}"#).unwrap();
        let config = read_config(&path).unwrap();
        assert_eq!(config.bridge.request_timeout_ms, 1234);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(
            read_config(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }
}

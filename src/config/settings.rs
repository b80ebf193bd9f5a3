//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::bridge::{Framing, ModePolicy};
use crate::error::ConfigError;

/// Environment variable overriding the CAD host name.
pub const ENV_HOST: &str = "CAD_BRIDGE_HOST";

/// Environment variable overriding the CAD host port.
pub const ENV_PORT: &str = "CAD_BRIDGE_PORT";

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// CAD host link and mode policy.
    #[serde(default)]
    pub bridge: BridgeSettings,

    /// Design intent session settings.
    #[serde(default)]
    pub session: SessionSettings,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bridge = &self.bridge;
        let problem = if bridge.host.trim().is_empty() {
            Some("bridge.host cannot be empty".to_string())
        } else if bridge.port == 0 {
            Some("bridge.port must be between 1 and 65535".to_string())
        } else if bridge.connect_timeout_ms == 0 || bridge.request_timeout_ms == 0 {
            Some("bridge timeouts must be greater than zero".to_string())
        } else if bridge.failure_threshold == 0 {
            Some("bridge.failure_threshold must be at least 1".to_string())
        } else if bridge.reprobe_interval_secs == 0 {
            Some("bridge.reprobe_interval_secs must be at least 1".to_string())
        } else if bridge.health_check_interval_secs == Some(0) {
            Some("bridge.health_check_interval_secs must be at least 1, or null".to_string())
        } else if bridge.health_check_command.trim().is_empty() {
            Some("bridge.health_check_command cannot be empty".to_string())
        } else if self.session.history_limit == 0 {
            Some("session.history_limit must be at least 1".to_string())
        } else {
            None
        };

        match problem {
            Some(message) => Err(ConfigError::ValidationError { message }),
            None => Ok(()),
        }
    }

    /// Applies `CAD_BRIDGE_HOST` / `CAD_BRIDGE_PORT` from the process
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the port override is not a valid port number.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies host/port overrides from an arbitrary lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the port override is not a valid port number.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST).filter(|h| !h.trim().is_empty()) {
            self.bridge.host = host.trim().to_string();
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.bridge.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidOverride {
                    variable: ENV_PORT,
                    value: port.clone(),
                })?;
        }
        Ok(())
    }
}

/// CAD host link settings and mode policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeSettings {
    /// Host running the CAD plugin.
    #[serde(default = "default_host")]
    pub host: String,

    /// Plugin TCP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Socket framing: "lines" or "length_prefixed".
    #[serde(default)]
    pub framing: Framing,

    /// Connection attempt timeout.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-request response timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Retries after a timeout or protocol violation.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Consecutive failures that take the bridge out of Live.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Fall back to Simulated rather than Degraded.
    #[serde(default)]
    pub simulation_fallback: bool,

    /// Always run Simulated, never touching the network.
    #[serde(default)]
    pub force_simulation: bool,

    /// Interval for health checks while Live; `null` disables them.
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: Option<u64>,

    /// Minimum interval between re-probes while not Live.
    #[serde(default = "default_reprobe_interval")]
    pub reprobe_interval_secs: u64,

    /// Lightweight command used as the health check.
    #[serde(default = "default_health_check_command")]
    pub health_check_command: String,

    /// Whether failed health checks count toward the failure threshold.
    #[serde(default = "default_true")]
    pub count_health_check_failures: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            framing: Framing::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            failure_threshold: default_failure_threshold(),
            simulation_fallback: false,
            force_simulation: false,
            health_check_interval_secs: default_health_check_interval(),
            reprobe_interval_secs: default_reprobe_interval(),
            health_check_command: default_health_check_command(),
            count_health_check_failures: true,
        }
    }
}

impl BridgeSettings {
    /// Connection attempt timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Health check interval while Live.
    #[must_use]
    pub fn health_check_interval(&self) -> Option<Duration> {
        self.health_check_interval_secs.map(Duration::from_secs)
    }

    /// Mode transition policy.
    #[must_use]
    pub const fn mode_policy(&self) -> ModePolicy {
        ModePolicy {
            failure_threshold: self.failure_threshold,
            simulation_fallback: self.simulation_fallback,
            reprobe_interval: Duration::from_secs(self.reprobe_interval_secs),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

const fn default_port() -> u16 {
    8765
}

const fn default_connect_timeout_ms() -> u64 {
    5_000
}

const fn default_request_timeout_ms() -> u64 {
    10_000
}

const fn default_retry_attempts() -> u32 {
    1
}

const fn default_failure_threshold() -> u32 {
    3
}

#[allow(clippy::unnecessary_wraps)]
const fn default_health_check_interval() -> Option<u64> {
    Some(60)
}

const fn default_reprobe_interval() -> u64 {
    5
}

fn default_health_check_command() -> String {
    "get_design_info".to_string()
}

const fn default_true() -> bool {
    true
}

/// Design intent session settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionSettings {
    /// Session file; `null` keeps the design intent in memory only.
    #[serde(default)]
    pub persistence_path: Option<PathBuf>,

    /// Save the session file after every mutating command.
    #[serde(default = "default_true")]
    pub autosave: bool,

    /// Load the session file at startup.
    #[serde(default = "default_true")]
    pub resume: bool,

    /// Command history entries kept in memory and in the session file.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            persistence_path: None,
            autosave: true,
            resume: true,
            history_limit: default_history_limit(),
        }
    }
}

const fn default_history_limit() -> usize {
    crate::intent::DEFAULT_HISTORY_LIMIT
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

//! Bridge error taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::intent::{Category, IntentError};

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Machine-readable error kind carried in result envelopes and tool payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The link to the host dropped while a request was in flight.
    ConnectionLost,
    /// No response arrived within the request timeout.
    Timeout,
    /// The bridge is in Degraded mode or could not reach the host.
    ServiceUnavailable,
    /// A referenced name is not in the design intent store.
    UnknownEntity,
    /// A created name already exists in the design intent store.
    DuplicateEntity,
    /// The host sent a malformed or out-of-order frame.
    ProtocolViolation,
    /// The host executed the command and reported an application error.
    HostRejected,
    /// Tool parameters failed validation.
    InvalidParams,
    /// The caller abandoned the request.
    Cancelled,
    /// The session file could not be read or written.
    SessionError,
}

impl ErrorKind {
    /// Taxonomy name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionLost => "ConnectionLost",
            Self::Timeout => "Timeout",
            Self::ServiceUnavailable => "ServiceUnavailable",
            Self::UnknownEntity => "UnknownEntity",
            Self::DuplicateEntity => "DuplicateEntity",
            Self::ProtocolViolation => "ProtocolViolation",
            Self::HostRejected => "HostRejected",
            Self::InvalidParams => "InvalidParams",
            Self::Cancelled => "Cancelled",
            Self::SessionError => "SessionError",
        }
    }

    /// Returns `true` for failures of the link itself, which count toward
    /// the mode selector's consecutive-failure threshold.
    #[must_use]
    pub const fn is_connection_failure(self) -> bool {
        matches!(
            self,
            Self::ConnectionLost | Self::Timeout | Self::ProtocolViolation | Self::ServiceUnavailable
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the bridge.
///
/// None of these terminate a session: the dispatcher folds every variant into
/// a failed [`ResultEnvelope`](super::ResultEnvelope).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BridgeError {
    /// The link dropped after the request was written.
    #[error("connection to CAD host lost: {message}")]
    ConnectionLost {
        /// What happened.
        message: String,
    },

    /// The host did not answer in time.
    #[error("CAD host did not respond within {timeout_ms} ms")]
    Timeout {
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// Nothing was attempted or the host could not be reached.
    #[error("CAD host unavailable: {reason}")]
    ServiceUnavailable {
        /// Why the service is unavailable.
        reason: String,
    },

    /// A referenced name is unknown.
    #[error("unknown {category}: '{name}'")]
    UnknownEntity {
        /// Category searched.
        category: Category,
        /// Missing name.
        name: String,
    },

    /// A created name is already taken.
    #[error("{category} '{name}' already exists")]
    DuplicateEntity {
        /// Category of the clash.
        category: Category,
        /// Clashing name.
        name: String,
    },

    /// The host violated the wire protocol.
    #[error("protocol violation: {message}")]
    ProtocolViolation {
        /// What was wrong with the frame.
        message: String,
    },

    /// The host reported an application error.
    #[error("{message}")]
    HostRejected {
        /// Host diagnostic, verbatim.
        message: String,
    },

    /// Parameters failed validation.
    #[error("invalid parameters: {message}")]
    InvalidParams {
        /// Which parameter and why.
        message: String,
    },

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// The session file could not be used.
    #[error("session error: {message}")]
    Session {
        /// Underlying failure.
        message: String,
    },
}

impl BridgeError {
    /// Taxonomy kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionLost { .. } => ErrorKind::ConnectionLost,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            Self::UnknownEntity { .. } => ErrorKind::UnknownEntity,
            Self::DuplicateEntity { .. } => ErrorKind::DuplicateEntity,
            Self::ProtocolViolation { .. } => ErrorKind::ProtocolViolation,
            Self::HostRejected { .. } => ErrorKind::HostRejected,
            Self::InvalidParams { .. } => ErrorKind::InvalidParams,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Session { .. } => ErrorKind::SessionError,
        }
    }

    /// Shorthand for a `ServiceUnavailable` error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            reason: reason.into(),
        }
    }

    /// Shorthand for a `ProtocolViolation` error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Shorthand for an `InvalidParams` error.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }
}

impl From<IntentError> for BridgeError {
    fn from(err: IntentError) -> Self {
        match err {
            IntentError::UnknownEntity { category, name } => Self::UnknownEntity { category, name },
            IntentError::DuplicateEntity { category, name } => {
                Self::DuplicateEntity { category, name }
            }
            IntentError::InvalidName { name, reason } => Self::InvalidParams {
                message: format!("invalid entity name '{name}': {reason}"),
            },
            other => Self::Session {
                message: error_chain(&other),
            },
        }
    }
}

/// Renders an error and its sources as one line.
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serialises_as_taxonomy_name() {
        let json = serde_json::to_value(ErrorKind::ServiceUnavailable).unwrap();
        assert_eq!(json, "ServiceUnavailable");
        let back: ErrorKind = serde_json::from_value(json).unwrap();
        assert_eq!(back, ErrorKind::ServiceUnavailable);
    }

    #[test]
    fn host_rejected_is_verbatim() {
        let err = BridgeError::HostRejected {
            message: "No active design".to_string(),
        };
        assert_eq!(err.to_string(), "No active design");
        assert_eq!(err.kind(), ErrorKind::HostRejected);
    }

    #[test]
    fn intent_errors_map_to_store_kinds() {
        let err: BridgeError = IntentError::DuplicateEntity {
            category: Category::Sketch,
            name: "S1".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::DuplicateEntity);

        let err: BridgeError = IntentError::UnsupportedVersion { version: 9 }.into();
        assert_eq!(err.kind(), ErrorKind::SessionError);
    }

    #[test]
    fn connection_failures_are_classified() {
        assert!(ErrorKind::Timeout.is_connection_failure());
        assert!(ErrorKind::ConnectionLost.is_connection_failure());
        assert!(!ErrorKind::HostRejected.is_connection_failure());
        assert!(!ErrorKind::UnknownEntity.is_connection_failure());
    }
}

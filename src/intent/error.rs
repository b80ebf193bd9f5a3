//! Error types for the design intent store.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::Category;

/// Result type for design intent operations.
pub type IntentResult<T> = Result<T, IntentError>;

/// Errors raised by the design intent store and its session file.
#[derive(Debug, Error)]
pub enum IntentError {
    /// No entity with this name exists in the category.
    #[error("unknown {category}: '{name}'")]
    UnknownEntity {
        /// Category that was searched.
        category: Category,
        /// Name that was not found.
        name: String,
    },

    /// An entity with this name already exists in the category.
    #[error("{category} '{name}' already exists")]
    DuplicateEntity {
        /// Category of the clashing entity.
        category: Category,
        /// The clashing name.
        name: String,
    },

    /// The name cannot be used as an entity name.
    #[error("invalid entity name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The session file could not be read.
    #[error("failed to read session file: {path}")]
    SessionRead {
        /// Path to the session file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The session file could not be written.
    #[error("failed to write session file: {path}")]
    SessionWrite {
        /// Path to the session file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The session file is not valid JSON for a snapshot.
    #[error("failed to parse session file: {path}")]
    SessionFormat {
        /// Path to the session file.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The snapshot was written by an incompatible version.
    #[error("unsupported session file version: {version}")]
    UnsupportedVersion {
        /// Version found in the snapshot.
        version: u32,
    },

    /// History export failed.
    #[error("failed to export history: {message}")]
    Export {
        /// Description of the failure.
        message: String,
    },
}

impl IntentError {
    /// Short machine-readable label used in tool error payloads.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::UnknownEntity { .. } => "UnknownEntity",
            Self::DuplicateEntity { .. } => "DuplicateEntity",
            Self::InvalidName { .. } => "InvalidParams",
            Self::SessionRead { .. }
            | Self::SessionWrite { .. }
            | Self::SessionFormat { .. }
            | Self::UnsupportedVersion { .. }
            | Self::Export { .. } => "SessionError",
        }
    }
}

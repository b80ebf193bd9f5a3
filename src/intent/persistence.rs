//! Session file persistence and history export.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::error::{IntentError, IntentResult};
use super::record::{HistoryEntry, StoreSnapshot};

/// Output format for the command history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryFormat {
    /// Pretty-printed JSON array.
    #[default]
    Json,
    /// CSV with a header row.
    Csv,
}

/// A JSON session file holding one store snapshot.
#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    /// Creates a handle for the session file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the session file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` if the file exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Loads the snapshot from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid snapshot.
    pub fn load(&self) -> IntentResult<StoreSnapshot> {
        let content = fs::read_to_string(&self.path).map_err(|source| IntentError::SessionRead {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| IntentError::SessionFormat {
            path: self.path.clone(),
            source,
        })
    }

    /// Loads the snapshot if the file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be loaded.
    pub fn load_if_exists(&self) -> IntentResult<Option<StoreSnapshot>> {
        if self.exists() {
            self.load().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Writes the snapshot atomically.
    ///
    /// The snapshot is written to a temporary file in the same directory and
    /// renamed over the target, so readers never see a partial file.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self, snapshot: &StoreSnapshot) -> IntentResult<()> {
        let write_error = |source: io::Error| IntentError::SessionWrite {
            path: self.path.clone(),
            source,
        };

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(write_error)?;

        let json = serde_json::to_vec_pretty(snapshot).map_err(|source| {
            IntentError::SessionFormat {
                path: self.path.clone(),
                source,
            }
        })?;

        let mut file = NamedTempFile::new_in(&parent).map_err(write_error)?;
        file.write_all(&json).map_err(write_error)?;
        file.as_file().sync_all().map_err(write_error)?;
        file.persist(&self.path)
            .map_err(|err| write_error(err.error))?;

        tracing::debug!(path = %self.path.display(), entities = snapshot.entities.len(), "Session saved");
        Ok(())
    }

    /// Deletes the session file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn remove(&self) -> IntentResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(IntentError::SessionWrite {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Flat row used for CSV export.
#[derive(Serialize)]
struct HistoryRow<'a> {
    recorded_at: String,
    command_id: &'a str,
    command: &'a str,
    mode: &'a str,
    outcome: &'a str,
    parameters: String,
}

/// Renders history entries in the requested format.
///
/// # Errors
///
/// Returns `Export` if serialisation fails.
pub fn export_history(entries: &[&HistoryEntry], format: HistoryFormat) -> IntentResult<String> {
    match format {
        HistoryFormat::Json => {
            serde_json::to_string_pretty(entries).map_err(|e| IntentError::Export {
                message: e.to_string(),
            })
        }
        HistoryFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            for entry in entries {
                let parameters =
                    serde_json::to_string(&entry.parameters).map_err(|e| IntentError::Export {
                        message: e.to_string(),
                    })?;
                writer
                    .serialize(HistoryRow {
                        recorded_at: entry.recorded_at.to_rfc3339(),
                        command_id: &entry.command_id,
                        command: &entry.command,
                        mode: &entry.mode,
                        outcome: &entry.outcome,
                        parameters,
                    })
                    .map_err(|e| IntentError::Export {
                        message: e.to_string(),
                    })?;
            }
            let bytes = writer.into_inner().map_err(|e| IntentError::Export {
                message: e.to_string(),
            })?;
            String::from_utf8(bytes).map_err(|e| IntentError::Export {
                message: e.to_string(),
            })
        }
    }
}

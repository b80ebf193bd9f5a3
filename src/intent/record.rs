//! Records held by the design intent store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Current session file format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Kind of named entity tracked across a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// A 2D sketch.
    Sketch,
    /// A solid or surface body.
    Body,
    /// An assembly component.
    Component,
    /// A user parameter.
    Parameter,
}

impl Category {
    /// All categories, in snapshot order.
    pub const ALL: [Self; 4] = [Self::Sketch, Self::Body, Self::Component, Self::Parameter];

    /// Lowercase name used on the wire and in tool arguments.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sketch => "sketch",
            Self::Body => "body",
            Self::Component => "component",
            Self::Parameter => "parameter",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sketch" => Ok(Self::Sketch),
            "body" => Ok(Self::Body),
            "component" => Ok(Self::Component),
            "parameter" => Ok(Self::Parameter),
            other => Err(format!(
                "unknown category '{other}'. Expected one of: sketch, body, component, parameter"
            )),
        }
    }
}

/// A named entity created by a successful command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    /// Name, unique within the category.
    pub name: String,
    /// Entity category.
    pub category: Category,
    /// Correlation id of the command that created the entity.
    pub created_at: String,
    /// Free-form attributes reported by the command.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl EntityRecord {
    /// Creates a record with no attributes.
    #[must_use]
    pub fn new(name: impl Into<String>, category: Category, created_at: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category,
            created_at: created_at.into(),
            attributes: Map::new(),
        }
    }

    /// Adds attributes to the record.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes = attributes;
        self
    }
}

/// One recorded value of a user parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterChange {
    /// Command that set the value.
    pub command_id: String,
    /// The value as reported.
    pub value: Value,
    /// When the change was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// High-level statement of what the session is designing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesignStatement {
    /// Project name.
    pub project_name: String,
    /// Free-form description.
    pub description: String,
    /// Functional requirements.
    #[serde(default)]
    pub requirements: Vec<String>,
    /// Design constraints.
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Description of the finished assembly.
    #[serde(default)]
    pub final_assembly_description: String,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// When the statement was first stored.
    pub created_at: DateTime<Utc>,
    /// When the statement was last replaced.
    pub updated_at: DateTime<Utc>,
}

/// One executed command, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Correlation id of the final attempt.
    pub command_id: String,
    /// Command name.
    pub command: String,
    /// Parameters as sent.
    pub parameters: Map<String, Value>,
    /// `"success"` or the error kind.
    pub outcome: String,
    /// Mode the command was dispatched in.
    pub mode: String,
    /// When the command completed.
    pub recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Returns `true` if the command succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcome == "success"
    }
}

/// Serialisable state of a design intent store.
///
/// Entities are an ordered list grouped by category so the session file reads
/// naturally and restores in creation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Format version.
    pub version: u32,
    /// When the snapshot was taken.
    pub saved_at: DateTime<Utc>,
    /// Entities, grouped by category.
    pub entities: Vec<EntityRecord>,
    /// Value history per parameter name.
    #[serde(default)]
    pub parameter_history: IndexMap<String, Vec<ParameterChange>>,
    /// Design statement, if one was stored.
    #[serde(default)]
    pub design_statement: Option<DesignStatement>,
    /// Command history, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

//! Design intent: the name-keyed record of what a session has built.
//!
//! The store maps user-facing names (`"Base Plate"`, `"Sketch1"`) to entity
//! records so tools can refer to geometry by name across turns, reconnects
//! and restarts. It also keeps parameter value history, the command history
//! and an optional design statement, and can be persisted to a session file.

mod error;
mod persistence;
mod record;
mod store;

pub use error::{IntentError, IntentResult};
pub use persistence::{export_history, HistoryFormat, SessionFile};
pub use record::{
    Category, DesignStatement, EntityRecord, HistoryEntry, ParameterChange, StoreSnapshot,
    SNAPSHOT_VERSION,
};
pub use store::{DesignIntentStore, DEFAULT_HISTORY_LIMIT};

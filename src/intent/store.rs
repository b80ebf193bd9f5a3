//! The design intent store: name to entity mapping for one design session.

use std::collections::VecDeque;

use chrono::Utc;
use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::error::{IntentError, IntentResult};
use super::record::{
    Category, DesignStatement, EntityRecord, HistoryEntry, ParameterChange, StoreSnapshot,
    SNAPSHOT_VERSION,
};

/// Default number of history entries kept in memory.
pub const DEFAULT_HISTORY_LIMIT: usize = 256;

/// Maximum entity name length in bytes.
const MAX_NAME_LEN: usize = 255;

/// Keyed record of the named entities created during a session.
///
/// Names are unique per category. The store is the only source of truth for
/// name resolution: host object identities do not survive a reconnect, so
/// they are never cached here.
#[derive(Debug, Clone)]
pub struct DesignIntentStore {
    entities: IndexMap<Category, IndexMap<String, EntityRecord>>,
    parameter_history: IndexMap<String, Vec<ParameterChange>>,
    statement: Option<DesignStatement>,
    history: VecDeque<HistoryEntry>,
    history_limit: usize,
}

impl Default for DesignIntentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DesignIntentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Creates an empty store keeping at most `limit` history entries.
    #[must_use]
    pub fn with_history_limit(limit: usize) -> Self {
        let entities = Category::ALL
            .iter()
            .map(|category| (*category, IndexMap::new()))
            .collect();
        Self {
            entities,
            parameter_history: IndexMap::new(),
            statement: None,
            history: VecDeque::new(),
            history_limit: limit.max(1),
        }
    }

    fn bucket(&self, category: Category) -> Option<&IndexMap<String, EntityRecord>> {
        self.entities.get(&category)
    }

    fn bucket_mut(&mut self, category: Category) -> &mut IndexMap<String, EntityRecord> {
        self.entities.entry(category).or_default()
    }

    /// Validates that `name` can be used as an entity name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` for empty, over-long or control-character names.
    pub fn validate_name(name: &str) -> IntentResult<()> {
        let reason = if name.trim().is_empty() {
            Some("name cannot be empty")
        } else if name.len() > MAX_NAME_LEN {
            Some("name exceeds 255 bytes")
        } else if name.chars().any(char::is_control) {
            Some("name contains control characters")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(IntentError::InvalidName {
                name: name.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }

    /// Inserts a new record.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateEntity` if the name is already used in the category.
    pub fn put(&mut self, record: EntityRecord) -> IntentResult<()> {
        Self::validate_name(&record.name)?;
        let bucket = self.bucket_mut(record.category);
        if bucket.contains_key(&record.name) {
            return Err(IntentError::DuplicateEntity {
                category: record.category,
                name: record.name,
            });
        }
        bucket.insert(record.name.clone(), record);
        Ok(())
    }

    /// Inserts or overwrites a record, returning the previous one.
    ///
    /// This is the explicit overwrite path; `put` never replaces.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` if the name is not usable.
    pub fn replace(&mut self, record: EntityRecord) -> IntentResult<Option<EntityRecord>> {
        Self::validate_name(&record.name)?;
        Ok(self
            .bucket_mut(record.category)
            .insert(record.name.clone(), record))
    }

    /// Looks up a record by name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntity` if no such record exists.
    pub fn get(&self, name: &str, category: Category) -> IntentResult<&EntityRecord> {
        self.bucket(category)
            .and_then(|bucket| bucket.get(name))
            .ok_or_else(|| IntentError::UnknownEntity {
                category,
                name: name.to_string(),
            })
    }

    /// Returns `true` if the name exists in the category.
    #[must_use]
    pub fn contains(&self, name: &str, category: Category) -> bool {
        self.bucket(category)
            .is_some_and(|bucket| bucket.contains_key(name))
    }

    /// Renames a record, keeping its position in creation order.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntity` if `from` does not exist, or `DuplicateEntity`
    /// if `to` is already taken by another record.
    pub fn rename(&mut self, category: Category, from: &str, to: &str) -> IntentResult<()> {
        Self::validate_name(to)?;
        if from == to {
            return self.get(from, category).map(|_| ());
        }
        if self.contains(to, category) {
            return Err(IntentError::DuplicateEntity {
                category,
                name: to.to_string(),
            });
        }

        let bucket = self.bucket_mut(category);
        let Some((index, _, mut record)) = bucket.shift_remove_full(from) else {
            return Err(IntentError::UnknownEntity {
                category,
                name: from.to_string(),
            });
        };
        record.name = to.to_string();
        bucket.shift_insert(index, to.to_string(), record);

        if category == Category::Parameter {
            if let Some((index, _, changes)) = self.parameter_history.shift_remove_full(from) {
                self.parameter_history
                    .shift_insert(index, to.to_string(), changes);
            }
        }
        Ok(())
    }

    /// Removes a record and returns it.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntity` if no such record exists.
    pub fn remove(&mut self, category: Category, name: &str) -> IntentResult<EntityRecord> {
        let record = self
            .bucket_mut(category)
            .shift_remove(name)
            .ok_or_else(|| IntentError::UnknownEntity {
                category,
                name: name.to_string(),
            })?;
        if category == Category::Parameter {
            self.parameter_history.shift_remove(name);
        }
        Ok(record)
    }

    /// Appends a value to a parameter's history.
    pub fn record_parameter_value(&mut self, name: &str, command_id: &str, value: Value) {
        self.parameter_history
            .entry(name.to_string())
            .or_default()
            .push(ParameterChange {
                command_id: command_id.to_string(),
                value,
                recorded_at: Utc::now(),
            });
    }

    /// Returns the recorded values of a parameter, oldest first.
    #[must_use]
    pub fn parameter_history(&self, name: &str) -> &[ParameterChange] {
        self.parameter_history
            .get(name)
            .map_or(&[], Vec::as_slice)
    }

    /// Lists records, optionally restricted to one category, in creation order.
    #[must_use]
    pub fn list(&self, category: Option<Category>) -> Vec<&EntityRecord> {
        self.entities
            .iter()
            .filter(|(c, _)| category.map_or(true, |wanted| **c == wanted))
            .flat_map(|(_, bucket)| bucket.values())
            .collect()
    }

    /// Number of records in a category.
    #[must_use]
    pub fn count(&self, category: Category) -> usize {
        self.bucket(category).map_or(0, IndexMap::len)
    }

    /// Total number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.values().map(IndexMap::len).sum()
    }

    /// Returns `true` if no entities are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores the design statement, keeping the original creation time.
    pub fn set_statement(&mut self, mut statement: DesignStatement) -> &DesignStatement {
        if let Some(previous) = &self.statement {
            statement.created_at = previous.created_at;
        }
        self.statement.insert(statement)
    }

    /// Returns the design statement, if any.
    #[must_use]
    pub const fn statement(&self) -> Option<&DesignStatement> {
        self.statement.as_ref()
    }

    /// Appends a command to the bounded history.
    pub fn record_history(&mut self, entry: HistoryEntry) {
        while self.history.len() >= self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(entry);
    }

    /// Returns history entries, newest first, optionally filtered by command.
    #[must_use]
    pub fn history(&self, limit: Option<usize>, command: Option<&str>) -> Vec<&HistoryEntry> {
        self.history
            .iter()
            .rev()
            .filter(|entry| command.map_or(true, |c| entry.command == c))
            .take(limit.unwrap_or(usize::MAX))
            .collect()
    }

    /// Clears all entities, parameter history and command history.
    ///
    /// The design statement describes the project, not the open document, so
    /// it survives a reset.
    pub fn clear(&mut self) {
        for bucket in self.entities.values_mut() {
            bucket.clear();
        }
        self.parameter_history.clear();
        self.history.clear();
    }

    /// Captures the current state as a serialisable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            entities: self.list(None).into_iter().cloned().collect(),
            parameter_history: self.parameter_history.clone(),
            design_statement: self.statement.clone(),
            history: self.history.iter().cloned().collect(),
        }
    }

    /// Replaces the state of this store with a snapshot.
    ///
    /// The snapshot is fully validated before anything is replaced, so a
    /// failed restore leaves the store untouched.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedVersion` for a newer format, or `DuplicateEntity` /
    /// `InvalidName` if the snapshot's entities violate the store invariants.
    pub fn restore(&mut self, snapshot: StoreSnapshot) -> IntentResult<()> {
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(IntentError::UnsupportedVersion {
                version: snapshot.version,
            });
        }

        let mut staged = Self::with_history_limit(self.history_limit);
        for record in snapshot.entities {
            staged.put(record)?;
        }
        staged.parameter_history = snapshot.parameter_history;
        staged.statement = snapshot.design_statement;
        for entry in snapshot.history {
            staged.record_history(entry);
        }

        *self = staged;
        Ok(())
    }

    /// Summary counts per category, for status reporting.
    #[must_use]
    pub fn summary(&self) -> Map<String, Value> {
        Category::ALL
            .iter()
            .map(|c| (c.as_str().to_string(), Value::from(self.count(*c))))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sketch(name: &str) -> EntityRecord {
        EntityRecord::new(name, Category::Sketch, format!("cmd-{name}"))
    }

    #[test]
    fn put_then_get() {
        let mut store = DesignIntentStore::new();
        store.put(sketch("S1")).unwrap();
        let record = store.get("S1", Category::Sketch).unwrap();
        assert_eq!(record.created_at, "cmd-S1");
        assert!(store.get("S1", Category::Body).is_err());
    }

    #[test]
    fn duplicate_put_is_rejected() {
        let mut store = DesignIntentStore::new();
        store.put(sketch("S1")).unwrap();
        let err = store.put(sketch("S1")).unwrap_err();
        assert!(matches!(err, IntentError::DuplicateEntity { .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn same_name_in_other_category_is_allowed() {
        let mut store = DesignIntentStore::new();
        store.put(sketch("Base")).unwrap();
        store
            .put(EntityRecord::new("Base", Category::Body, "cmd-2"))
            .unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn replace_overwrites() {
        let mut store = DesignIntentStore::new();
        store.put(sketch("S1")).unwrap();
        let mut attributes = Map::new();
        attributes.insert("plane".to_string(), json!("XZ"));
        let previous = store
            .replace(sketch("S1").with_attributes(attributes))
            .unwrap();
        assert!(previous.is_some());
        assert_eq!(
            store.get("S1", Category::Sketch).unwrap().attributes["plane"],
            "XZ"
        );
    }

    #[test]
    fn rename_keeps_order() {
        let mut store = DesignIntentStore::new();
        for name in ["A", "B", "C"] {
            store.put(sketch(name)).unwrap();
        }
        store.rename(Category::Sketch, "B", "Middle").unwrap();
        let names: Vec<_> = store
            .list(Some(Category::Sketch))
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, ["A", "Middle", "C"]);
        assert!(!store.contains("B", Category::Sketch));
    }

    #[test]
    fn rename_onto_existing_name_fails() {
        let mut store = DesignIntentStore::new();
        store.put(sketch("A")).unwrap();
        store.put(sketch("B")).unwrap();
        let err = store.rename(Category::Sketch, "A", "B").unwrap_err();
        assert!(matches!(err, IntentError::DuplicateEntity { .. }));
        assert!(store.contains("A", Category::Sketch));
    }

    #[test]
    fn remove_unknown_fails() {
        let mut store = DesignIntentStore::new();
        let err = store.remove(Category::Component, "Arm").unwrap_err();
        assert!(matches!(err, IntentError::UnknownEntity { .. }));
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert!(DesignIntentStore::validate_name("").is_err());
        assert!(DesignIntentStore::validate_name("   ").is_err());
        assert!(DesignIntentStore::validate_name("bad\nname").is_err());
        assert!(DesignIntentStore::validate_name(&"x".repeat(256)).is_err());
        assert!(DesignIntentStore::validate_name("Sketch 1").is_ok());
    }

    #[test]
    fn parameter_history_follows_rename_and_remove() {
        let mut store = DesignIntentStore::new();
        store
            .put(EntityRecord::new("width", Category::Parameter, "c1"))
            .unwrap();
        store.record_parameter_value("width", "c1", json!(10.0));
        store.record_parameter_value("width", "c2", json!(12.5));
        assert_eq!(store.parameter_history("width").len(), 2);

        store.rename(Category::Parameter, "width", "plate_width").unwrap();
        assert!(store.parameter_history("width").is_empty());
        assert_eq!(store.parameter_history("plate_width").len(), 2);

        store.remove(Category::Parameter, "plate_width").unwrap();
        assert!(store.parameter_history("plate_width").is_empty());
    }

    #[test]
    fn history_is_bounded() {
        let mut store = DesignIntentStore::with_history_limit(2);
        for i in 0..5 {
            store.record_history(HistoryEntry {
                command_id: format!("c{i}"),
                command: "ping".to_string(),
                parameters: Map::new(),
                outcome: "success".to_string(),
                mode: "Live".to_string(),
                recorded_at: Utc::now(),
            });
        }
        let newest: Vec<_> = store
            .history(None, None)
            .iter()
            .map(|e| e.command_id.as_str())
            .collect();
        assert_eq!(newest, ["c4", "c3"]);
    }

    #[test]
    fn failed_restore_leaves_store_untouched() {
        let mut store = DesignIntentStore::new();
        store.put(sketch("Keep")).unwrap();

        let mut snapshot = DesignIntentStore::new().snapshot();
        snapshot.entities = vec![sketch("Dup"), sketch("Dup")];
        assert!(store.restore(snapshot).is_err());
        assert!(store.contains("Keep", Category::Sketch));
    }

    #[test]
    fn restore_rejects_newer_version() {
        let mut store = DesignIntentStore::new();
        let mut snapshot = store.snapshot();
        snapshot.version = SNAPSHOT_VERSION + 1;
        assert!(matches!(
            store.restore(snapshot),
            Err(IntentError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn clear_keeps_statement() {
        let mut store = DesignIntentStore::new();
        store.put(sketch("S1")).unwrap();
        let now = Utc::now();
        store.set_statement(DesignStatement {
            project_name: "Arm".to_string(),
            description: "Robot arm base".to_string(),
            requirements: vec![],
            constraints: vec![],
            final_assembly_description: String::new(),
            tags: vec![],
            created_at: now,
            updated_at: now,
        });
        store.clear();
        assert!(store.is_empty());
        assert!(store.statement().is_some());
    }
}

//! Design intent persistence across the public API.

use std::sync::Arc;

use cad_bridge_mcp::bridge::Session;
use cad_bridge_mcp::config::Config;
use cad_bridge_mcp::intent::{
    Category, DesignIntentStore, EntityRecord, IntentError, SessionFile,
};
use serde_json::{json, Map, Value};

fn attributes(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn populated() -> DesignIntentStore {
    let mut store = DesignIntentStore::new();
    store
        .put(
            EntityRecord::new("Base", Category::Sketch, "c1")
                .with_attributes(attributes(json!({"plane": "XY", "profiles": 2}))),
        )
        .unwrap();
    store
        .put(
            EntityRecord::new("Extrude1", Category::Body, "c2").with_attributes(attributes(
                json!({"distance": 12.5, "operation": "new", "faces": ["top", "side"]}),
            )),
        )
        .unwrap();
    store
        .put(EntityRecord::new("Arm", Category::Component, "c3"))
        .unwrap();
    store
        .put(EntityRecord::new("Top", Category::Sketch, "c4"))
        .unwrap();
    store
        .put(EntityRecord::new("thickness", Category::Parameter, "c5"))
        .unwrap();
    store.record_parameter_value("thickness", "c5", json!(3));
    store.record_parameter_value("thickness", "c6", json!(4));
    store
}

#[test]
fn snapshot_file_restores_order_and_parameter_history() {
    let dir = tempfile::tempdir().unwrap();
    let file = SessionFile::new(dir.path().join("nested").join("session.json"));
    file.save(&populated().snapshot()).unwrap();

    let mut restored = DesignIntentStore::new();
    restored.restore(file.load().unwrap()).unwrap();

    let sketches: Vec<&str> = restored
        .list(Some(Category::Sketch))
        .iter()
        .map(|r| r.name.as_str())
        .collect();
    assert_eq!(sketches, vec!["Base", "Top"]);
    assert_eq!(restored.len(), 5);
    assert_eq!(restored.parameter_history("thickness").len(), 2);
    assert_eq!(restored.parameter_history("thickness")[1].value, json!(4));
}

#[test]
fn restore_reproduces_every_record() {
    let original = populated();
    let mut restored = DesignIntentStore::new();
    restored.restore(original.snapshot()).unwrap();

    assert_eq!(restored.list(None), original.list(None));
    let base = restored.get("Base", Category::Sketch).unwrap();
    assert_eq!(base.created_at, "c1");
    assert_eq!(base.attributes["plane"], "XY");
    let body = restored.get("Extrude1", Category::Body).unwrap();
    assert_eq!(body.attributes["faces"], json!(["top", "side"]));
}

#[test]
fn missing_file_loads_as_none() {
    let dir = tempfile::tempdir().unwrap();
    let file = SessionFile::new(dir.path().join("absent.json"));
    assert!(file.load_if_exists().unwrap().is_none());
    assert!(matches!(file.load(), Err(IntentError::SessionRead { .. })));
}

#[tokio::test]
async fn corrupt_session_file_starts_empty_and_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    std::fs::write(&path, "{ this is not a snapshot").unwrap();

    let mut config = Config::default();
    config.bridge.force_simulation = true;
    config.session.persistence_path = Some(path.clone());
    let session = Arc::new(Session::new(&config));
    session.start().await;

    assert!(session.store().read().await.is_empty());
    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.starts_with("{ this is not"));
}

#[tokio::test]
async fn resume_can_be_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    SessionFile::new(&path).save(&populated().snapshot()).unwrap();

    let mut config = Config::default();
    config.bridge.force_simulation = true;
    config.session.persistence_path = Some(path);
    config.session.resume = false;
    let session = Session::new(&config);
    session.start().await;

    assert!(session.store().read().await.is_empty());
}

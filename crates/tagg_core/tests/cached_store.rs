use serde_json::json;
use std::fs;
use tagg_core::{CachedStore, MetaStorage, MetaStore, Metadata};
use tempfile::TempDir;

fn cached(dir: &TempDir) -> CachedStore {
    let base = MetaStore::new("tags", dir.path().join("tags"), Vec::new()).unwrap();
    CachedStore::new(base).unwrap()
}

fn plant_tag(dir: &TempDir, key: &str) {
    let tag_dir = dir.path().join("tags").join(key);
    fs::create_dir_all(&tag_dir).unwrap();
    fs::write(
        tag_dir.join("__meta__.json"),
        r#"{"created_at": "2016-01-01T00:00:00", "updated_at": "2016-01-01T00:00:00"}"#,
    )
    .unwrap();
}

#[test]
fn construction_scans_the_existing_tree() {
    let dir = TempDir::new().unwrap();
    plant_tag(&dir, "language/python");
    plant_tag(&dir, "general/cli");

    let tags = cached(&dir);
    assert_eq!(tags.keys().unwrap(), vec!["general/cli", "language/python"]);
}

#[test]
fn mutations_keep_the_cache_current() {
    let dir = TempDir::new().unwrap();
    let mut tags = cached(&dir);

    tags.add_key("language/python", Metadata::new()).unwrap();
    assert_eq!(tags.keys().unwrap(), vec!["language/python"]);

    tags.rename_key("language/python", "language/python3", &mut [])
        .unwrap();
    // Both keys are refreshed by the rename itself; no lookup in between.
    assert_eq!(tags.keys().unwrap(), vec!["language/python3"]);
    assert!(tags.get("language/python3").unwrap().exists);
    assert!(!tags.get("language/python").unwrap().exists);

    tags.remove_key("language/python3", &mut []).unwrap();
    assert!(tags.keys().unwrap().is_empty());
}

#[test]
fn loads_are_served_from_the_cache() {
    let dir = TempDir::new().unwrap();
    let mut tags = cached(&dir);
    let mut metadata = Metadata::new();
    metadata.insert("description".to_string(), json!("snakes"));
    tags.add_key("language/python", metadata).unwrap();

    // An out-of-band edit is invisible until the cache is rebuilt.
    let meta_file = dir.path().join("tags/language/python/__meta__.json");
    fs::write(&meta_file, r#"{"description": "changed on disk"}"#).unwrap();
    let handle = tags.get("language/python").unwrap();
    assert_eq!(handle.metadata["description"], json!("snakes"));
}

#[test]
fn out_of_band_keys_appear_after_validate() {
    let dir = TempDir::new().unwrap();
    let mut tags = cached(&dir);
    tags.add_key("language/python", Metadata::new()).unwrap();

    plant_tag(&dir, "general/cli");
    assert_eq!(tags.keys().unwrap(), vec!["language/python"]);

    let stats = tags.validate().unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(tags.keys().unwrap(), vec!["general/cli", "language/python"]);
}

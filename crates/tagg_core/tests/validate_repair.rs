use serde_json::Value;
use std::fs;
use tagg_core::{LinkTarget, MetaStorage, MetaStore, Metadata, StoreError};
use tempfile::TempDir;

fn tag_store(dir: &TempDir) -> MetaStore {
    MetaStore::new("tags", dir.path().join("tags"), Vec::new()).unwrap()
}

fn plant(dir: &TempDir, key: &str, body: &str) {
    let entity_dir = dir.path().join("tags").join(key);
    fs::create_dir_all(&entity_dir).unwrap();
    fs::write(entity_dir.join("__meta__.json"), body).unwrap();
}

#[test]
fn clean_tree_validates_with_plain_counts() {
    let dir = TempDir::new().unwrap();
    let mut tags = tag_store(&dir);
    tags.add_key("language/python", Metadata::new()).unwrap();
    tags.add_key("general/cli", Metadata::new()).unwrap();

    let stats = tags.validate().unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.links, 0);
    assert_eq!(stats.fixed, 0);
    assert_eq!(stats.renamed, 0);
}

#[test]
fn missing_timestamps_are_synthesized() {
    let dir = TempDir::new().unwrap();
    plant(&dir, "language/python", r#"{"description": "snakes"}"#);
    let mut tags = tag_store(&dir);

    let stats = tags.validate().unwrap();
    assert_eq!(stats.fixed, 1);

    let handle = tags.get("language/python").unwrap();
    assert!(matches!(
        handle.metadata.get("created_at"),
        Some(Value::String(_))
    ));
    assert!(matches!(
        handle.metadata.get("updated_at"),
        Some(Value::String(_))
    ));
    assert_eq!(handle.metadata["description"], Value::String("snakes".into()));
}

#[test]
fn miscased_directories_are_renamed_to_lowercase() {
    let dir = TempDir::new().unwrap();
    plant(
        &dir,
        "Language/Python",
        r#"{"created_at": "2016-01-01T00:00:00", "updated_at": "2016-01-01T00:00:00"}"#,
    );
    let mut tags = tag_store(&dir);

    let stats = tags.validate().unwrap();
    // Both miscased levels were scheduled.
    assert_eq!(stats.renamed, 2);
    assert!(dir.path().join("tags/language/python/__meta__.json").is_file());
    assert!(!dir.path().join("tags/Language").exists());
}

#[test]
fn repairs_are_not_repeated_on_a_second_sweep() {
    let dir = TempDir::new().unwrap();
    plant(&dir, "Language/Python", r#"{"description": "snakes"}"#);
    let mut tags = tag_store(&dir);

    let first = tags.validate().unwrap();
    assert_eq!(first.fixed, 1);
    assert_eq!(first.renamed, 2);

    let second = tags.validate().unwrap();
    assert_eq!(second.total, 1);
    assert_eq!(second.fixed, 0);
    assert_eq!(second.renamed, 0);
}

#[test]
fn miscased_rename_refuses_to_clobber_an_existing_key() {
    let dir = TempDir::new().unwrap();
    plant(
        &dir,
        "language/python",
        r#"{"created_at": "2016-01-01T00:00:00", "updated_at": "2016-01-01T00:00:00"}"#,
    );
    plant(
        &dir,
        "topic/Python",
        r#"{"created_at": "2016-01-01T00:00:00", "updated_at": "2016-01-01T00:00:00"}"#,
    );
    // The lowercase destination already exists.
    plant(
        &dir,
        "topic/python",
        r#"{"created_at": "2016-01-01T00:00:00", "updated_at": "2016-01-01T00:00:00"}"#,
    );
    let mut tags = tag_store(&dir);

    let err = tags.validate().unwrap_err();
    match err {
        StoreError::ValidationFailed { problems } => {
            assert!(problems
                .iter()
                .any(|problem| problem.contains("already exists")));
        }
        other => panic!("unexpected error: {other}"),
    }
    // The original stayed in place.
    assert!(dir.path().join("tags/topic/Python").is_dir());
}

#[test]
fn dangling_links_are_reported() {
    let dir = TempDir::new().unwrap();
    let mut tags = tag_store(&dir);
    let mut repos = MetaStore::new(
        "repos",
        dir.path().join("repos"),
        vec![tags.store_ref().clone()],
    )
    .unwrap();
    tags.add_key("language/python", Metadata::new()).unwrap();
    repos.add_key("acme/widget", Metadata::new()).unwrap();
    let tag = tags.get("language/python").unwrap();
    repos
        .add_link("acme/widget", LinkTarget::Handle(&tag), None, false)
        .unwrap();

    // Deleting the tag directly leaves the repo symlink dangling.
    fs::remove_dir_all(dir.path().join("tags/language/python")).unwrap();

    let err = repos.validate().unwrap_err();
    match err {
        StoreError::ValidationFailed { problems } => {
            assert!(problems
                .iter()
                .any(|problem| problem.contains("acme/widget")));
        }
        other => panic!("unexpected error: {other}"),
    }
}

use serde_json::json;
use tagg_core::{LinkTarget, MetaStorage, MetaStore, Metadata, StoreError};
use tempfile::TempDir;

fn fixture(dir: &TempDir) -> (MetaStore, MetaStore) {
    let tags = MetaStore::new("tags", dir.path().join("tags"), Vec::new()).unwrap();
    let repos = MetaStore::new(
        "repos",
        dir.path().join("repos"),
        vec![tags.store_ref().clone()],
    )
    .unwrap();
    (tags, repos)
}

fn link(repos: &mut MetaStore, repo: &str, tag: &tagg_core::MetaHandle) {
    assert!(repos
        .add_link(repo, LinkTarget::Handle(tag), None, false)
        .unwrap());
}

#[test]
fn rename_moves_the_directory_and_keeps_metadata() {
    let dir = TempDir::new().unwrap();
    let (mut tags, _) = fixture(&dir);
    let mut metadata = Metadata::new();
    metadata.insert("description".to_string(), json!("the snake one"));
    tags.add_key("language/python", metadata).unwrap();

    tags.rename_key("language/python", "language/python3", &mut [])
        .unwrap();

    assert!(!dir.path().join("tags/language/python").exists());
    let renamed = tags.get("language/python3").unwrap();
    assert!(renamed.exists);
    assert_eq!(renamed.metadata["description"], json!("the snake one"));
}

#[test]
fn rename_of_missing_key_fails() {
    let dir = TempDir::new().unwrap();
    let (mut tags, _) = fixture(&dir);

    let err = tags
        .rename_key("language/python", "language/python3", &mut [])
        .unwrap_err();
    assert!(matches!(err, StoreError::KeyNotFound { .. }));
}

#[test]
fn rename_retargets_inbound_links() {
    let dir = TempDir::new().unwrap();
    let (mut tags, mut repos) = fixture(&dir);
    tags.add_key("language/python", Metadata::new()).unwrap();
    repos.add_key("acme/widget", Metadata::new()).unwrap();
    repos.add_key("acme/gadget", Metadata::new()).unwrap();
    let python = tags.get("language/python").unwrap();
    link(&mut repos, "acme/widget", &python);
    link(&mut repos, "acme/gadget", &python);

    tags.rename_key(
        "language/python",
        "language/python3",
        &mut [&mut repos as &mut dyn MetaStorage],
    )
    .unwrap();

    for repo in ["acme/widget", "acme/gadget"] {
        let handle = repos.get(repo).unwrap();
        assert_eq!(handle.links.len(), 1);
        assert_eq!(handle.links[0].key(), "language/python3");
    }
    assert!(!dir.path().join("repos/acme/widget/python").exists());
    assert!(dir
        .path()
        .join("repos/acme/widget/python3")
        .symlink_metadata()
        .is_ok());
}

#[test]
fn remove_detaches_inbound_links_first() {
    let dir = TempDir::new().unwrap();
    let (mut tags, mut repos) = fixture(&dir);
    tags.add_key("language/python", Metadata::new()).unwrap();
    repos.add_key("acme/widget", Metadata::new()).unwrap();
    let python = tags.get("language/python").unwrap();
    link(&mut repos, "acme/widget", &python);

    assert!(tags
        .remove_key("language/python", &mut [&mut repos as &mut dyn MetaStorage])
        .unwrap());

    let handle = repos.get("acme/widget").unwrap();
    assert!(handle.links.is_empty());
    assert!(!dir.path().join("repos/acme/widget/python").exists());
    assert!(!dir.path().join("tags/language/python").exists());
}

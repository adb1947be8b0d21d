use std::fs;
use tagg_core::{LinkTarget, MetaStorage, MetaStore, Metadata};
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

#[test]
fn add_link_creates_a_relative_symlink() {
    let dir = TempDir::new().unwrap();
    let (mut tags, mut repos) = fixture(&dir);
    tags.add_key("language/python", Metadata::new()).unwrap();
    repos.add_key("acme/widget", Metadata::new()).unwrap();
    let tag = tags.get("language/python").unwrap();

    assert!(repos
        .add_link("acme/widget", LinkTarget::Handle(&tag), None, false)
        .unwrap());

    let link = dir.path().join("repos/acme/widget/python");
    let target = fs::read_link(&link).unwrap();
    assert!(target.is_relative());

    let repo = repos.get("acme/widget").unwrap();
    assert_eq!(repo.links.len(), 1);
    assert_eq!(repo.links[0].key(), "language/python");
}

#[test]
fn add_link_is_rejected_when_already_present() {
    let dir = TempDir::new().unwrap();
    let (mut tags, mut repos) = fixture(&dir);
    tags.add_key("language/python", Metadata::new()).unwrap();
    repos.add_key("acme/widget", Metadata::new()).unwrap();
    let tag = tags.get("language/python").unwrap();

    assert!(repos
        .add_link("acme/widget", LinkTarget::Handle(&tag), None, false)
        .unwrap());
    assert!(!repos
        .add_link("acme/widget", LinkTarget::Handle(&tag), None, false)
        .unwrap());
}

#[test]
fn add_link_to_missing_owner_requires_create() {
    let dir = TempDir::new().unwrap();
    let (mut tags, mut repos) = fixture(&dir);
    tags.add_key("language/python", Metadata::new()).unwrap();
    let tag = tags.get("language/python").unwrap();

    assert!(!repos
        .add_link("acme/widget", LinkTarget::Handle(&tag), None, false)
        .unwrap());
    assert!(repos
        .add_link("acme/widget", LinkTarget::Handle(&tag), None, true)
        .unwrap());

    let repo = repos.get("acme/widget").unwrap();
    assert!(repo.exists);
    assert_eq!(repo.links.len(), 1);
}

#[test]
fn remove_link_is_idempotent_but_refuses_non_links() {
    let dir = TempDir::new().unwrap();
    let (mut tags, mut repos) = fixture(&dir);
    tags.add_key("language/python", Metadata::new()).unwrap();
    repos.add_key("acme/widget", Metadata::new()).unwrap();
    let tag = tags.get("language/python").unwrap();
    repos
        .add_link("acme/widget", LinkTarget::Handle(&tag), None, false)
        .unwrap();

    assert!(repos
        .remove_link("acme/widget", LinkTarget::Handle(&tag))
        .unwrap());
    // Absent now, but removal still reports success.
    assert!(repos
        .remove_link("acme/widget", LinkTarget::Handle(&tag))
        .unwrap());

    // A plain directory under the link name is not a link.
    fs::create_dir(dir.path().join("repos/acme/widget/python")).unwrap();
    assert!(!repos
        .remove_link("acme/widget", LinkTarget::Handle(&tag))
        .unwrap());
}

#[test]
fn find_links_requires_every_target() {
    let dir = TempDir::new().unwrap();
    let (mut tags, mut repos) = fixture(&dir);
    tags.add_key("language/python", Metadata::new()).unwrap();
    tags.add_key("general/cli", Metadata::new()).unwrap();
    repos.add_key("acme/widget", Metadata::new()).unwrap();
    repos.add_key("acme/gadget", Metadata::new()).unwrap();

    let python = tags.get("language/python").unwrap();
    let cli = tags.get("general/cli").unwrap();
    repos
        .add_link("acme/widget", LinkTarget::Handle(&python), None, false)
        .unwrap();
    repos
        .add_link("acme/widget", LinkTarget::Handle(&cli), None, false)
        .unwrap();
    repos
        .add_link("acme/gadget", LinkTarget::Handle(&python), None, false)
        .unwrap();

    let both = repos.find_links(&[&python, &cli]).unwrap();
    assert_eq!(both, vec!["acme/widget"]);

    let mut python_only = repos.find_links(&[&python]).unwrap();
    python_only.sort();
    assert_eq!(python_only, vec!["acme/gadget", "acme/widget"]);
}

#[test]
fn find_links_skips_plain_entries_sharing_a_target_name() {
    let dir = TempDir::new().unwrap();
    let (mut tags, mut repos) = fixture(&dir);
    tags.add_key("language/python", Metadata::new()).unwrap();
    repos.add_key("acme/widget", Metadata::new()).unwrap();
    repos.add_key("acme/gadget", Metadata::new()).unwrap();

    let python = tags.get("language/python").unwrap();
    repos
        .add_link("acme/gadget", LinkTarget::Handle(&python), None, false)
        .unwrap();
    // A plain directory named like the tag is not a link to it.
    fs::create_dir(dir.path().join("repos/acme/widget/python")).unwrap();

    let found = repos.find_links(&[&python]).unwrap();
    assert_eq!(found, vec!["acme/gadget"]);
}

#[test]
fn link_stats_sorts_by_count_then_key() {
    let dir = TempDir::new().unwrap();
    let (mut tags, mut repos) = fixture(&dir);
    tags.add_key("language/python", Metadata::new()).unwrap();
    tags.add_key("general/cli", Metadata::new()).unwrap();
    tags.add_key("general/web", Metadata::new()).unwrap();
    repos.add_key("acme/widget", Metadata::new()).unwrap();
    repos.add_key("acme/gadget", Metadata::new()).unwrap();

    let python = tags.get("language/python").unwrap();
    let cli = tags.get("general/cli").unwrap();
    let web = tags.get("general/web").unwrap();
    for repo in ["acme/widget", "acme/gadget"] {
        repos
            .add_link(repo, LinkTarget::Handle(&python), None, false)
            .unwrap();
    }
    repos
        .add_link("acme/widget", LinkTarget::Handle(&web), None, false)
        .unwrap();
    repos
        .add_link("acme/widget", LinkTarget::Handle(&cli), None, false)
        .unwrap();

    assert_eq!(
        repos.link_stats().unwrap(),
        vec![
            ("language/python".to_string(), 2),
            ("general/cli".to_string(), 1),
            ("general/web".to_string(), 1),
        ]
    );
}

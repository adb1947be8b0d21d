use serde_json::json;
use tagg_core::{
    AlwaysYes, ApplyActions, AutoTagger, Definitions, GithubError, MetaStorage, Metadata,
    RepoMetadataSource, RepoRecord, SuggestActions, TagGraph,
};
use tempfile::TempDir;

struct NoSource;

impl RepoMetadataSource for NoSource {
    fn fetch_repo(&self, full_name: &str) -> Result<RepoRecord, GithubError> {
        Err(GithubError::Status {
            url: full_name.to_string(),
            status: 404,
        })
    }
}

fn graph(dir: &TempDir) -> TagGraph<NoSource> {
    TagGraph::open(dir.path(), NoSource).unwrap()
}

fn add_repo(graph: &mut TagGraph<NoSource>, key: &str, language: &str, description: &str) {
    let mut metadata = Metadata::new();
    metadata.insert("full_name".to_string(), json!(key));
    metadata.insert("fork".to_string(), json!(false));
    metadata.insert("language".to_string(), json!(language));
    metadata.insert("description".to_string(), json!(description));
    graph.repos_mut().add_key(key, metadata).unwrap();
}

fn defs() -> Definitions {
    serde_json::from_value(json!({
        "keywords": {
            "crawler": ["crawler", "/scra.*/"]
        },
        "brands": {
            "acme": ["acme"]
        }
    }))
    .unwrap()
}

#[test]
fn apply_mode_creates_tags_and_links() {
    let dir = TempDir::new().unwrap();
    let mut graph = graph(&dir);
    add_repo(&mut graph, "acme/widget", "Python", "A tiny web crawler");

    let mut tagger = AutoTagger::new(&mut graph, ApplyActions::new(false, AlwaysYes));
    let stats = tagger
        .run(&defs(), &["acme/widget".to_string()])
        .unwrap();

    assert_eq!(stats.repos_tagged, 1);
    assert_eq!(stats.repos_skipped, 0);
    assert_eq!(stats.new_tags, 5);
    assert_eq!(stats.new_links, 5);

    let mut tag_keys = graph.tags_mut().keys().unwrap();
    tag_keys.sort();
    assert_eq!(
        tag_keys,
        vec![
            "brand/acme",
            "general/crawler",
            "general/official",
            "general/original",
            "language/python",
        ]
    );

    let repo = graph.repos_mut().get("acme/widget").unwrap();
    let mut linked: Vec<&str> = repo.links.iter().map(|link| link.key()).collect();
    linked.sort();
    assert_eq!(
        linked,
        vec![
            "brand/acme",
            "general/crawler",
            "general/official",
            "general/original",
            "language/python",
        ]
    );
}

#[test]
fn language_rule_prefers_an_existing_short_name() {
    let dir = TempDir::new().unwrap();
    let mut graph = graph(&dir);
    graph
        .tags_mut()
        .add_key("topic/python", Metadata::new())
        .unwrap();
    add_repo(&mut graph, "acme/widget", "Python", "");

    let empty = Definitions::default();
    let mut tagger = AutoTagger::new(&mut graph, ApplyActions::new(false, AlwaysYes));
    tagger.tag_original = false;
    tagger.run(&empty, &["acme/widget".to_string()]).unwrap();

    let repo = graph.repos_mut().get("acme/widget").unwrap();
    assert_eq!(repo.links.len(), 1);
    assert_eq!(repo.links[0].key(), "topic/python");
    assert!(!graph.tags_mut().get("language/python").unwrap().exists);
}

#[test]
fn language_names_are_normalized() {
    let dir = TempDir::new().unwrap();
    let mut graph = graph(&dir);
    add_repo(&mut graph, "acme/config", "Emacs Lisp", "");

    let empty = Definitions::default();
    let mut tagger = AutoTagger::new(&mut graph, ApplyActions::new(false, AlwaysYes));
    tagger.tag_original = false;
    tagger.run(&empty, &["acme/config".to_string()]).unwrap();

    assert!(graph.tags_mut().get("language/emacs-lisp").unwrap().exists);
}

#[test]
fn suggest_mode_collects_lines_without_mutating() {
    let dir = TempDir::new().unwrap();
    let mut graph = graph(&dir);
    add_repo(&mut graph, "acme/widget", "Python", "A tiny web crawler");

    let mut tagger = AutoTagger::new(&mut graph, SuggestActions::new());
    let stats = tagger
        .run(&defs(), &["acme/widget".to_string()])
        .unwrap();
    assert_eq!(stats.repos_tagged, 1);

    let sink = tagger.into_actions();
    let lines: Vec<&str> = sink.lines().collect();
    assert!(lines.contains(&"tags\tadd\tgeneral/crawler\t{}"));
    assert!(lines.contains(&"tags\tadd\tgeneral/original\t{}"));
    assert!(lines.contains(&"repos\ttag\tacme/widget\tgeneral/crawler"));
    assert!(lines.contains(&"repos\ttag\tacme/widget\tbrand/acme"));
    // Tag creations come before any linking.
    let first_link = lines
        .iter()
        .position(|line| line.starts_with("repos\ttag"))
        .unwrap();
    let last_add = lines
        .iter()
        .rposition(|line| line.starts_with("tags\tadd"))
        .unwrap();
    assert!(last_add < first_link);

    // Nothing hit the stores.
    assert!(graph.tags_mut().keys().unwrap().is_empty());
}

#[test]
fn untagged_repos_are_counted_and_reported() {
    let dir = TempDir::new().unwrap();
    let mut graph = graph(&dir);
    // A fork with no language and no matching rules.
    let mut metadata = Metadata::new();
    metadata.insert("full_name".to_string(), json!("acme/mystery"));
    metadata.insert("fork".to_string(), json!(true));
    graph.repos_mut().add_key("acme/mystery", metadata).unwrap();

    let empty = Definitions::default();
    let mut tagger = AutoTagger::new(&mut graph, SuggestActions::new());
    let stats = tagger.run(&empty, &["acme/mystery".to_string()]).unwrap();

    assert_eq!(stats.repos_tagged, 0);
    assert_eq!(stats.repos_skipped, 1);
    let sink = tagger.into_actions();
    assert!(sink
        .lines()
        .any(|line| line.starts_with("# No tag detected for repo acme/mystery")));
}

#[test]
fn import_records_deduplicates_by_full_name() {
    let dir = TempDir::new().unwrap();
    let mut graph = graph(&dir);

    let record = |name: &str| RepoRecord {
        full_name: name.to_string(),
        fork: false,
        language: Some("Rust".to_string()),
        description: None,
    };

    let mut tagger = AutoTagger::new(&mut graph, ApplyActions::new(false, AlwaysYes));
    let keys = tagger
        .import_records(vec![
            record("Acme/Widget"),
            record("acme/widget"),
            record("acme/gadget"),
        ])
        .unwrap();
    assert_eq!(keys, vec!["acme/widget", "acme/gadget"]);

    let repo_keys: Vec<String> = graph.repos_mut().keys().unwrap();
    assert_eq!(repo_keys, vec!["acme/gadget", "acme/widget"]);

    // Existing repos are left alone on re-import.
    let mut tagger = AutoTagger::new(&mut graph, ApplyActions::new(false, AlwaysYes));
    let keys = tagger.import_records(vec![record("acme/widget")]).unwrap();
    assert_eq!(keys, vec!["acme/widget"]);
}

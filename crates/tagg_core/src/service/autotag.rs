//! Rule-driven automatic tagging.
//!
//! # Responsibility
//! - Compile a JSON rule file (keywords, patterns, brand accounts) into
//!   matchers against repo metadata.
//! - Run the rule pass over repos, either applying links directly or
//!   collecting a replayable suggestion script.
//!
//! # Invariants
//! - Suggestion mode never mutates either store; created entities live in
//!   a local overlay so later rules still see them.
//! - A tag is linked at most once per repo per pass.

use crate::github::{RepoMetadataSource, RepoRecord};
use crate::model::{MetaHandle, Metadata};
use crate::service::TagGraph;
use crate::store::{MetaStorage, StoreError};
use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

pub type AutotagResult<T> = Result<T, AutotagError>;

#[derive(Debug)]
pub enum AutotagError {
    Store(StoreError),
    /// Rule file could not be read.
    DefsIo { path: PathBuf, source: io::Error },
    /// Rule file is not valid definitions JSON.
    DefsFormat {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// A `/.../ ` rule entry is not a valid regex.
    Pattern {
        tag: String,
        pattern: String,
        source: regex::Error,
    },
}

impl Display for AutotagError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(source) => write!(f, "{source}"),
            Self::DefsIo { path, source } => {
                write!(f, "cannot read definitions {}: {source}", path.display())
            }
            Self::DefsFormat { path, source } => {
                write!(f, "invalid definitions {}: {source}", path.display())
            }
            Self::Pattern {
                tag,
                pattern,
                source,
            } => write!(f, "bad pattern `{pattern}` for tag `{tag}`: {source}"),
        }
    }
}

impl Error for AutotagError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(source) => Some(source),
            Self::DefsIo { source, .. } => Some(source),
            Self::DefsFormat { source, .. } => Some(source),
            Self::Pattern { source, .. } => Some(source),
        }
    }
}

impl From<StoreError> for AutotagError {
    fn from(source: StoreError) -> Self {
        Self::Store(source)
    }
}

fn default_type() -> String {
    "general".to_string()
}

/// Parsed rule file.
///
/// `keywords` maps a tag name to a list of plain words and `/regex/`
/// patterns; `brands` maps a tag name to GitHub account names. Tag names
/// without a `/` are namespaced under `default_type`.
#[derive(Debug, Clone, Deserialize)]
pub struct Definitions {
    #[serde(default = "default_type")]
    pub default_type: String,
    #[serde(default)]
    pub keywords: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub brands: BTreeMap<String, Vec<String>>,
}

impl Default for Definitions {
    fn default() -> Self {
        Self {
            default_type: default_type(),
            keywords: BTreeMap::new(),
            brands: BTreeMap::new(),
        }
    }
}

impl Definitions {
    pub fn from_file(path: &Path) -> AutotagResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| AutotagError::DefsIo {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| AutotagError::DefsFormat {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn rule_count(&self) -> usize {
        self.keywords.len() + self.brands.len()
    }
}

/// One keyword rule with its matchers resolved.
struct CompiledRule {
    tag: MetaHandle,
    plainwords: HashSet<String>,
    patterns: Vec<Regex>,
}

struct CompiledDefinitions {
    keywords: Vec<CompiledRule>,
    brands: Vec<(String, Vec<String>)>,
}

/// Pass counters, reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutotagStats {
    pub new_tags: usize,
    pub new_links: usize,
    pub repos_tagged: usize,
    pub repos_skipped: usize,
}

impl Display for AutotagStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "new_tags={} new_links={} repos_tagged={} repos_skipped={}",
            self.new_tags, self.new_links, self.repos_tagged, self.repos_skipped
        )
    }
}

/// Yes/no gate for interactive runs.
pub trait ConfirmPrompt {
    fn confirm(&mut self, message: &str) -> bool;
}

/// Prompt that approves everything, for non-interactive runs.
pub struct AlwaysYes;

impl ConfirmPrompt for AlwaysYes {
    fn confirm(&mut self, _message: &str) -> bool {
        true
    }
}

/// Where rule outcomes go: applied to the graph, or collected as
/// suggestions. The lookup methods are part of the seam because
/// suggestion mode must overlay its own not-yet-created entities.
pub trait ActionSink<S: RepoMetadataSource> {
    fn get_tag(&mut self, graph: &mut TagGraph<S>, key: &str) -> AutotagResult<MetaHandle>;

    fn get_repo(&mut self, graph: &mut TagGraph<S>, key: &str) -> AutotagResult<MetaHandle>;

    /// Creates a tag; `None` means declined or already present.
    fn new_tag(
        &mut self,
        graph: &mut TagGraph<S>,
        key: &str,
        metadata: Metadata,
    ) -> AutotagResult<Option<MetaHandle>>;

    /// Creates a repo; `None` means declined or already present.
    fn new_repo(
        &mut self,
        graph: &mut TagGraph<S>,
        key: &str,
        metadata: Metadata,
    ) -> AutotagResult<Option<MetaHandle>>;

    /// Links a repo to a tag; `false` means declined.
    fn tag_repo(
        &mut self,
        graph: &mut TagGraph<S>,
        repo: &MetaHandle,
        tag: &MetaHandle,
    ) -> AutotagResult<bool>;

    fn comment(&mut self, message: &str);

    fn repo_not_tagged(&mut self, repo: &MetaHandle) {
        let _ = repo;
    }
}

/// Sink that mutates the graph immediately, optionally gated behind a
/// confirmation prompt.
pub struct ApplyActions<C: ConfirmPrompt> {
    interactive: bool,
    prompt: C,
}

impl<C: ConfirmPrompt> ApplyActions<C> {
    pub fn new(interactive: bool, prompt: C) -> Self {
        Self {
            interactive,
            prompt,
        }
    }

    fn approved(&mut self, message: &str) -> bool {
        !self.interactive || self.prompt.confirm(message)
    }
}

impl<S: RepoMetadataSource, C: ConfirmPrompt> ActionSink<S> for ApplyActions<C> {
    fn get_tag(&mut self, graph: &mut TagGraph<S>, key: &str) -> AutotagResult<MetaHandle> {
        Ok(graph.tags_mut().get(key)?)
    }

    fn get_repo(&mut self, graph: &mut TagGraph<S>, key: &str) -> AutotagResult<MetaHandle> {
        Ok(graph.repos_mut().get(key)?)
    }

    fn new_tag(
        &mut self,
        graph: &mut TagGraph<S>,
        key: &str,
        metadata: Metadata,
    ) -> AutotagResult<Option<MetaHandle>> {
        if !self.approved(&format!("Create tag {key}")) {
            return Ok(None);
        }
        Ok(graph.tags_mut().add_key(key, metadata)?)
    }

    fn new_repo(
        &mut self,
        graph: &mut TagGraph<S>,
        key: &str,
        metadata: Metadata,
    ) -> AutotagResult<Option<MetaHandle>> {
        if !self.approved(&format!("Create repo {key}")) {
            return Ok(None);
        }
        Ok(graph.repos_mut().add_key(key, metadata)?)
    }

    fn tag_repo(
        &mut self,
        graph: &mut TagGraph<S>,
        repo: &MetaHandle,
        tag: &MetaHandle,
    ) -> AutotagResult<bool> {
        if !self.approved(&format!("Tag {repo} as {tag}")) {
            return Ok(false);
        }
        graph.tag_repo(repo.key(), tag, false)?;
        Ok(true)
    }

    fn comment(&mut self, message: &str) {
        info!("event=autotag_note module=autotag note={message}");
    }
}

/// Sink that collects tab-separated command lines replayable through the
/// CLI's piped-command mode, without touching either store.
pub struct SuggestActions {
    pub show_skipped: bool,
    tag_lines: Vec<String>,
    repo_lines: Vec<String>,
    fake_tags: HashMap<String, MetaHandle>,
    fake_repos: HashMap<String, MetaHandle>,
}

impl SuggestActions {
    pub fn new() -> Self {
        Self {
            show_skipped: true,
            tag_lines: Vec::new(),
            repo_lines: Vec::new(),
            fake_tags: HashMap::new(),
            fake_repos: HashMap::new(),
        }
    }

    /// Every collected line, tag commands first so replays create tags
    /// before linking them.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.tag_lines
            .iter()
            .chain(self.repo_lines.iter())
            .map(String::as_str)
    }

    fn note(&mut self, message: &str) {
        self.repo_lines.push(format!("# {message}"));
    }
}

impl Default for SuggestActions {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: RepoMetadataSource> ActionSink<S> for SuggestActions {
    fn get_tag(&mut self, graph: &mut TagGraph<S>, key: &str) -> AutotagResult<MetaHandle> {
        let handle = graph.tags_mut().get(key)?;
        if handle.exists {
            return Ok(handle);
        }
        Ok(self.fake_tags.get(key).cloned().unwrap_or(handle))
    }

    fn get_repo(&mut self, graph: &mut TagGraph<S>, key: &str) -> AutotagResult<MetaHandle> {
        let handle = graph.repos_mut().get(key)?;
        if handle.exists {
            return Ok(handle);
        }
        Ok(self.fake_repos.get(key).cloned().unwrap_or(handle))
    }

    fn new_tag(
        &mut self,
        graph: &mut TagGraph<S>,
        key: &str,
        metadata: Metadata,
    ) -> AutotagResult<Option<MetaHandle>> {
        let json = serde_json::to_string(&metadata).unwrap_or_else(|_| "{}".to_string());
        self.tag_lines.push(format!("tags\tadd\t{key}\t{json}"));
        let mut fake =
            MetaHandle::with_metadata(graph.tags().store_ref().clone(), key, metadata);
        fake.exists = true;
        self.fake_tags.insert(key.to_string(), fake.clone());
        Ok(Some(fake))
    }

    fn new_repo(
        &mut self,
        graph: &mut TagGraph<S>,
        key: &str,
        metadata: Metadata,
    ) -> AutotagResult<Option<MetaHandle>> {
        let json = serde_json::to_string(&metadata).unwrap_or_else(|_| "{}".to_string());
        self.repo_lines.push(format!("repos\tadd\t{key}\t{json}"));
        let mut fake =
            MetaHandle::with_metadata(graph.repos().store_ref().clone(), key, metadata);
        fake.exists = true;
        self.fake_repos.insert(key.to_string(), fake.clone());
        Ok(Some(fake))
    }

    fn tag_repo(
        &mut self,
        _graph: &mut TagGraph<S>,
        repo: &MetaHandle,
        tag: &MetaHandle,
    ) -> AutotagResult<bool> {
        self.repo_lines
            .push(format!("repos\ttag\t{}\t{}", repo.key(), tag.key()));
        Ok(true)
    }

    fn comment(&mut self, message: &str) {
        self.note(message);
    }

    fn repo_not_tagged(&mut self, repo: &MetaHandle) {
        if !self.show_skipped {
            return;
        }
        let tags: Vec<&str> = repo.links.iter().map(MetaHandle::short_name).collect();
        self.note(&format!(
            "No tag detected for repo {}. Already have tags {}",
            repo.key(),
            tags.join(",")
        ));
        self.note(&format!("repos\ttag\t{}\t\t\t", repo.key()));
    }
}

/// Collapses whitespace runs to `-` and lowercases, so `Emacs Lisp`
/// becomes the tag name `emacs-lisp`.
pub fn normalize_tag_name(name: &str) -> String {
    WHITESPACE_RE
        .replace_all(name.trim(), "-")
        .to_lowercase()
}

/// The rule engine. Rules run per repo in a fixed order: original, then
/// language, then keywords, then brands.
pub struct AutoTagger<'a, S: RepoMetadataSource, A: ActionSink<S>> {
    graph: &'a mut TagGraph<S>,
    actions: A,
    pub tag_language: bool,
    pub tag_original: bool,
}

impl<'a, S: RepoMetadataSource, A: ActionSink<S>> AutoTagger<'a, S, A> {
    pub fn new(graph: &'a mut TagGraph<S>, actions: A) -> Self {
        Self {
            graph,
            actions,
            tag_language: true,
            tag_original: true,
        }
    }

    pub fn into_actions(self) -> A {
        self.actions
    }

    /// Bulk-registers fetched records as repos, deduplicating by
    /// lowercased full name. Returns the keys to run the rule pass over.
    pub fn import_records(
        &mut self,
        records: impl IntoIterator<Item = RepoRecord>,
    ) -> AutotagResult<Vec<String>> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for record in records {
            let key = record.full_name.to_lowercase();
            if !seen.insert(key.clone()) {
                continue;
            }
            let repo = self.actions.get_repo(self.graph, &key)?;
            if repo.exists {
                self.actions.comment(&format!("Repo already exists: {key}"));
            } else {
                self.actions
                    .new_repo(self.graph, &key, record.into_metadata())?;
            }
            keys.push(key);
        }
        Ok(keys)
    }

    /// Compiles the rule file and runs the pass over the given repo keys.
    pub fn run(&mut self, defs: &Definitions, keys: &[String]) -> AutotagResult<AutotagStats> {
        let mut stats = AutotagStats::default();
        let compiled = self.compile(defs, &mut stats)?;
        info!(
            "event=autotag_run module=autotag rules={} repos={}",
            defs.rule_count(),
            keys.len()
        );
        for key in keys {
            let repo = self.actions.get_repo(self.graph, key)?;
            self.autotag_repo(&repo, &compiled, &mut stats)?;
        }
        Ok(stats)
    }

    fn compile(
        &mut self,
        defs: &Definitions,
        stats: &mut AutotagStats,
    ) -> AutotagResult<CompiledDefinitions> {
        let mut keywords = Vec::new();
        for (name, entries) in &defs.keywords {
            let tag_key = qualify(name, &defs.default_type);
            let mut tag = self.actions.get_tag(self.graph, &tag_key)?;
            if !tag.exists {
                match self.actions.new_tag(self.graph, &tag_key, Metadata::new())? {
                    Some(created) => {
                        stats.new_tags += 1;
                        tag = created;
                    }
                    None => continue,
                }
            }

            let mut plainwords = HashSet::new();
            let mut patterns = Vec::new();
            for entry in entries {
                if entry.len() > 1 && entry.starts_with('/') && entry.ends_with('/') {
                    let pattern = &entry[1..entry.len() - 1];
                    let regex = Regex::new(pattern).map_err(|source| AutotagError::Pattern {
                        tag: tag_key.clone(),
                        pattern: pattern.to_string(),
                        source,
                    })?;
                    patterns.push(regex);
                } else {
                    plainwords.insert(entry.to_lowercase());
                }
            }
            keywords.push(CompiledRule {
                tag,
                plainwords,
                patterns,
            });
        }
        Ok(CompiledDefinitions {
            keywords,
            brands: defs
                .brands
                .iter()
                .map(|(name, accounts)| (name.clone(), accounts.clone()))
                .collect(),
        })
    }

    fn autotag_repo(
        &mut self,
        repo: &MetaHandle,
        defs: &CompiledDefinitions,
        stats: &mut AutotagStats,
    ) -> AutotagResult<()> {
        let mut tagged = false;
        let mut tagged_tags: HashSet<String> = HashSet::new();
        let account = repo
            .key()
            .rsplit('/')
            .nth(1)
            .unwrap_or_default()
            .to_string();

        if self.tag_original && repo.metadata.get("fork") == Some(&Value::Bool(false)) {
            tagged |= self.apply_tag(repo, "general/original", false, &mut tagged_tags, stats)?;
        }

        if self.tag_language {
            if let Some(language) = repo.metadata.get("language").and_then(Value::as_str) {
                if !language.is_empty() {
                    let tag_key = format!("language/{}", normalize_tag_name(language));
                    tagged |= self.apply_tag(repo, &tag_key, true, &mut tagged_tags, stats)?;
                }
            }
        }

        for rule in &defs.keywords {
            if tagged_tags.contains(rule.tag.key()) || repo.has_link(&rule.tag) {
                continue;
            }
            let hit = (!rule.plainwords.is_empty() && repo.match_keywords(&rule.plainwords))
                || (!rule.patterns.is_empty() && repo.match_patterns(&rule.patterns));
            if hit && self.actions.tag_repo(self.graph, repo, &rule.tag)? {
                tagged_tags.insert(rule.tag.key().to_string());
                stats.new_links += 1;
                tagged = true;
            }
        }

        for (brand, accounts) in &defs.brands {
            if !accounts.iter().any(|candidate| candidate == &account) {
                continue;
            }
            let tag_key = if brand.contains('/') {
                brand.clone()
            } else {
                format!("brand/{brand}")
            };
            tagged |= self.apply_tag(repo, &tag_key, false, &mut tagged_tags, stats)?;
            tagged |= self.apply_tag(repo, "general/official", false, &mut tagged_tags, stats)?;
        }

        if tagged {
            stats.repos_tagged += 1;
        } else {
            self.actions.repo_not_tagged(repo);
            stats.repos_skipped += 1;
        }
        Ok(())
    }

    /// Resolves (or creates) a tag and links the repo to it once.
    fn apply_tag(
        &mut self,
        repo: &MetaHandle,
        tag_key: &str,
        allow_alternative: bool,
        tagged_tags: &mut HashSet<String>,
        stats: &mut AutotagStats,
    ) -> AutotagResult<bool> {
        let mut tag_key = tag_key.to_string();
        if tagged_tags.contains(&tag_key) {
            return Ok(true);
        }

        // An existing tag elsewhere in the namespace with the same short
        // name wins over creating a parallel one (for example an existing
        // `topic/go` claims `language/go`).
        if allow_alternative {
            let short = tag_key.rsplit('/').next().unwrap_or(&tag_key).to_string();
            if let Some(existing) = self.graph.tags().resolve_short(&short) {
                tag_key = existing.to_string();
            }
        }

        let mut tag = self.actions.get_tag(self.graph, &tag_key)?;
        if !tag.exists {
            match self
                .actions
                .new_tag(self.graph, &tag_key, Metadata::new())?
            {
                Some(created) => {
                    stats.new_tags += 1;
                    tag = created;
                }
                None => return Ok(false),
            }
        }

        if !repo.has_link(&tag) && self.actions.tag_repo(self.graph, repo, &tag)? {
            tagged_tags.insert(tag_key);
            stats.new_links += 1;
            return Ok(true);
        }
        Ok(false)
    }
}

fn qualify(name: &str, default_type: &str) -> String {
    if name.contains('/') {
        name.to_string()
    } else {
        format!("{default_type}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_names_normalized() {
        assert_eq!(normalize_tag_name("Emacs Lisp"), "emacs-lisp");
        assert_eq!(normalize_tag_name("  C++  "), "c++");
        assert_eq!(normalize_tag_name("Jupyter\tNotebook"), "jupyter-notebook");
    }

    #[test]
    fn unqualified_rule_names_gain_default_type() {
        assert_eq!(qualify("webdev", "general"), "general/webdev");
        assert_eq!(qualify("topic/webdev", "general"), "topic/webdev");
    }

    #[test]
    fn definitions_parse_with_defaults() {
        let defs: Definitions = serde_json::from_str(
            r#"{"keywords": {"webdev": ["http", "/fla.*sk/"]}, "brands": {"google": ["google", "golang"]}}"#,
        )
        .unwrap();
        assert_eq!(defs.default_type, "general");
        assert_eq!(defs.rule_count(), 2);
        assert_eq!(defs.keywords["webdev"].len(), 2);
    }
}

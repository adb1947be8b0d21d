//! The composed tag/repo graph.
//!
//! # Responsibility
//! - Wire the two stores together: a unique cached tag store and a
//!   remote-backed repo store whose links point into the tag store.
//! - Route every cross-store cascade so the backlink set is always
//!   supplied (tag mutations must never strand repo symlinks).
//!
//! # Invariants
//! - Only repo entities hold links; tag mutations pass the repo store as
//!   the backlink set, repo mutations pass an empty one.
//! - `export` output is deterministic for a given tree (keys sorted).

use crate::github::RepoMetadataSource;
use crate::model::MetaHandle;
use crate::store::{
    CachedStore, LinkTarget, MetaStorage, MetaStore, RemoteStore, StoreResult, UniqueStore,
    ValidateStats,
};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

/// Both stores of one data directory, plus the operations that span them.
pub struct TagGraph<S: RepoMetadataSource> {
    data_dir: PathBuf,
    tags: UniqueStore,
    repos: RemoteStore<S>,
}

impl<S: RepoMetadataSource> TagGraph<S> {
    /// Opens (or prepares to create) the graph under `data_dir`.
    ///
    /// Store directories are created lazily by the first `add_key`; an
    /// absent data dir is not an error here so callers can apply their
    /// own empty-dir policy.
    pub fn open(data_dir: impl Into<PathBuf>, source: S) -> StoreResult<Self> {
        let data_dir = data_dir.into();
        let tags_base = MetaStore::new("tags", data_dir.join("tags"), Vec::new())?;
        let tags_ref = tags_base.store_ref().clone();
        let tags = UniqueStore::new(CachedStore::new(tags_base)?);
        let repos_base = MetaStore::new("repos", data_dir.join("repos"), vec![tags_ref])?;
        let repos = RemoteStore::new(repos_base, source);
        Ok(Self {
            data_dir,
            tags,
            repos,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Whether either store root already exists on disk.
    pub fn has_data(&self) -> bool {
        self.tags.store_ref().root().is_dir() || self.repos.store_ref().root().is_dir()
    }

    pub fn tags(&self) -> &UniqueStore {
        &self.tags
    }

    pub fn tags_mut(&mut self) -> &mut UniqueStore {
        &mut self.tags
    }

    pub fn repos(&self) -> &RemoteStore<S> {
        &self.repos
    }

    pub fn repos_mut(&mut self) -> &mut RemoteStore<S> {
        &mut self.repos
    }

    /// Removes a tag, detaching it from every repo that links to it.
    pub fn remove_tag(&mut self, key: &str) -> StoreResult<bool> {
        let Self { tags, repos, .. } = self;
        tags.remove_key(key, &mut [repos as &mut dyn MetaStorage])
    }

    /// Renames a tag, retargeting every repo symlink that points at it.
    pub fn rename_tag(&mut self, key: &str, new_key: &str) -> StoreResult<()> {
        let Self { tags, repos, .. } = self;
        tags.rename_key(key, new_key, &mut [repos as &mut dyn MetaStorage])
    }

    pub fn remove_repo(&mut self, key: &str) -> StoreResult<bool> {
        self.repos.remove_key(key, &mut [])
    }

    pub fn rename_repo(&mut self, key: &str, new_key: &str) -> StoreResult<()> {
        self.repos.rename_key(key, new_key, &mut [])
    }

    /// Links a repo to an existing tag. With `create_repo` set, a missing
    /// repo is created first (fetching metadata when the store is
    /// remote-backed).
    pub fn tag_repo(&mut self, repo_key: &str, tag: &MetaHandle, create_repo: bool) -> StoreResult<bool> {
        self.repos
            .add_link(repo_key, LinkTarget::Handle(tag), None, create_repo)
    }

    /// Detaches a tag, addressed by short name, from a repo.
    pub fn untag_repo(&mut self, repo_key: &str, tag_name: &str) -> StoreResult<bool> {
        let name = tag_name.rsplit('/').next().unwrap_or(tag_name);
        self.repos
            .remove_link(repo_key, LinkTarget::Path(Path::new(name)))
    }

    /// Repo keys linked to every one of the given tags.
    pub fn repos_linked_to(&mut self, tags: &[&MetaHandle]) -> StoreResult<Vec<String>> {
        self.repos.find_links(tags)
    }

    /// Validates both stores; tag problems are reported first.
    pub fn validate_all(&mut self) -> StoreResult<(ValidateStats, ValidateStats)> {
        let tag_stats = self.tags.validate()?;
        let repo_stats = self.repos.validate()?;
        Ok((tag_stats, repo_stats))
    }

    /// The whole graph as one JSON document: every repo's metadata with an
    /// inline `tags` array, and every tag's metadata.
    pub fn export(&mut self) -> StoreResult<Value> {
        let mut repos = Map::new();
        for key in self.repos.keys()? {
            let handle = self.repos.get(&key)?;
            let mut record = Map::new();
            for (field, value) in &handle.metadata {
                record.insert(field.clone(), value.clone());
            }
            let tags: Vec<Value> = handle
                .links
                .iter()
                .map(|link| Value::String(link.key().to_string()))
                .collect();
            record.insert("tags".to_string(), Value::Array(tags));
            repos.insert(key, Value::Object(record));
        }

        let mut tags = Map::new();
        for key in self.tags.keys()? {
            let handle = self.tags.get(&key)?;
            let mut record = Map::new();
            for (field, value) in &handle.metadata {
                record.insert(field.clone(), value.clone());
            }
            tags.insert(key, Value::Object(record));
        }

        Ok(json!({ "repos": repos, "tags": tags }))
    }
}

//! Metadata store hierarchy over a filesystem tree.
//!
//! # Responsibility
//! - Define the storage interface shared by every store layer.
//! - Define store identity, events, and the store error taxonomy.
//!
//! # Invariants
//! - Every persisted entity is a directory under the store root holding a
//!   `__meta__.json` file; symlink entries inside it are outgoing links.
//! - Mutating operations broadcast an event only after they succeed.
//! - Per-entity problems during `validate` are accumulated and reported
//!   together; every other operation fails fast.

use crate::github::GithubError;
use crate::model::{MetaHandle, Metadata};
use chrono::Utc;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};

pub mod base;
pub mod cached;
mod ops;
pub mod remote;
pub mod unique;
mod validate;

pub use base::MetaStore;
pub use cached::CachedStore;
pub use remote::RemoteStore;
pub use unique::UniqueStore;

/// Fixed name of the per-entity metadata file.
pub const META_FILE_NAME: &str = "__meta__.json";

/// Current UTC time as ISO-8601 without timezone suffix.
pub(crate) fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Lightweight store identity carried by entity handles and used to
/// declare linked stores.
///
/// Equality is by root path: two refs with the same root address the same
/// store regardless of which layer produced them.
#[derive(Debug, Clone)]
pub struct StoreRef {
    name: String,
    root: PathBuf,
}

impl StoreRef {
    pub fn new(name: &str, root: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            root,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl PartialEq for StoreRef {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl Eq for StoreRef {}

impl Display for StoreRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Mutation events broadcast to subscribers.
///
/// Carried without payload: consumers use them purely as a
/// cache-invalidation signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    AddKey,
    RemoveKey,
    RenameKey,
    AddLink,
    RemoveLink,
}

/// Subscriber callback invoked on every successful mutation.
pub type Listener = Box<dyn FnMut(EventKind)>;

/// Link operand: either a resolved handle or a raw path/name.
#[derive(Debug, Clone, Copy)]
pub enum LinkTarget<'a> {
    Handle(&'a MetaHandle),
    Path(&'a Path),
}

impl LinkTarget<'_> {
    /// Absolute path of the target entity directory.
    pub(crate) fn to_path(self) -> PathBuf {
        match self {
            LinkTarget::Handle(handle) => handle.path(),
            LinkTarget::Path(path) => path.to_path_buf(),
        }
    }

    /// Display name: the last path component.
    pub(crate) fn name(self) -> String {
        match self {
            LinkTarget::Handle(handle) => handle.short_name().to_string(),
            LinkTarget::Path(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

/// Tally returned by a successful validation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidateStats {
    /// Entities visited.
    pub total: usize,
    /// Links visited.
    pub links: usize,
    /// Entities whose missing timestamps were synthesized.
    pub fixed: usize,
    /// Miscased path prefixes scheduled for rename.
    pub renamed: usize,
}

impl Display for ValidateStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "total={} links={} fixed={} renamed={}",
            self.total, self.links, self.fixed, self.renamed
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Error taxonomy for the store hierarchy.
#[derive(Debug)]
pub enum StoreError {
    /// Attempted to save a handle that was never loaded.
    NotLoaded { store: String, key: String },
    /// Operation on a nonexistent key (for example a rename source).
    KeyNotFound { store: String, key: String },
    /// Short-name uniqueness violated on create.
    DuplicateKey { key: String, existing: String },
    /// A bare short name cannot be created directly; keys are namespaced.
    BareKey { key: String },
    /// A cascading relink during rename could not complete.
    LinkOperationFailed {
        key: String,
        new_key: String,
        dependent: String,
    },
    /// Aggregate report of every problem found during a tree sweep.
    ValidationFailed { problems: Vec<String> },
    /// Remote metadata fetch failed while creating a key by reference.
    Fetch { key: String, source: GithubError },
    Io { path: PathBuf, source: io::Error },
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotLoaded { store, key } => {
                write!(f, "entity must be loaded before saving: {store} - {key}")
            }
            Self::KeyNotFound { store, key } => {
                write!(f, "key `{key}` does not exist in store `{store}`")
            }
            Self::DuplicateKey { key, existing } => write!(
                f,
                "cannot add key `{key}` because its short name is not unique; `{existing}` already holds it"
            ),
            Self::BareKey { key } => write!(
                f,
                "cannot add bare key `{key}`; use a namespaced name such as `domain/{key}`"
            ),
            Self::LinkOperationFailed {
                key,
                new_key,
                dependent,
            } => write!(
                f,
                "unable to change link from `{key}` to `{new_key}` for key `{dependent}`"
            ),
            Self::ValidationFailed { problems } => {
                write!(f, "validation failed:\n{}", problems.join("\n"))
            }
            Self::Fetch { key, source } => {
                write!(f, "failed to fetch metadata for `{key}`: {source}")
            }
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Json { path, source } => {
                write!(f, "invalid metadata JSON in {}: {source}", path.display())
            }
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Fetch { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// The layered storage interface.
///
/// Implemented once against the filesystem by [`MetaStore`]; caching,
/// uniqueness and remote-backed behavior are wrappers implementing the
/// same interface, composed explicitly at construction. Cross-store
/// cascade operations receive the live backlinked stores as an explicit
/// argument; link *resolution* only needs the declared [`StoreRef`]s.
pub trait MetaStorage {
    /// Identity of this store (name + root).
    fn store_ref(&self) -> &StoreRef;

    /// Stores this store's links may point into.
    fn linked_stores(&self) -> &[StoreRef];

    /// Default metadata fields applied when creating new entities.
    fn template(&self) -> &Metadata;

    /// Registers a mutation subscriber.
    fn subscribe(&mut self, listener: Listener);

    /// Notifies every subscriber. Called by mutating operations on success.
    fn broadcast(&mut self, event: EventKind);

    /// Loads one entity directly from disk, bypassing any cache.
    fn scan(&self, handle: &mut MetaHandle) -> StoreResult<bool>;

    /// Enumerates every key by walking the directory tree, bypassing any
    /// cache. Keys are returned as found on disk (case preserved).
    fn walk_keys(&self) -> StoreResult<Vec<String>>;

    /// Populates the handle's metadata, links and existence flags.
    fn load(&mut self, handle: &mut MetaHandle) -> StoreResult<bool>;

    /// Persists the handle's metadata, creating the directory if absent.
    ///
    /// # Errors
    /// [`StoreError::NotLoaded`] when the handle was never loaded.
    fn save(&self, handle: &mut MetaHandle) -> StoreResult<()>;

    /// Loads and returns a handle; never fails for an absent key.
    fn get(&mut self, key: &str) -> StoreResult<MetaHandle>;

    /// Every key whose directory holds a metadata file.
    fn keys(&self) -> StoreResult<Vec<String>>;

    /// Creates a new entity; returns `None` when it already exists.
    fn add_key(&mut self, key: &str, metadata: Metadata) -> StoreResult<Option<MetaHandle>>;

    /// Removes an entity after detaching every inbound link held by the
    /// given backlinked stores. Returns `false` for a nonexistent key.
    fn remove_key(
        &mut self,
        key: &str,
        backlinks: &mut [&mut dyn MetaStorage],
    ) -> StoreResult<bool>;

    /// Moves an entity to a new key and retargets every inbound link held
    /// by the given backlinked stores.
    ///
    /// # Errors
    /// [`StoreError::KeyNotFound`] when the source key does not exist;
    /// [`StoreError::LinkOperationFailed`] when a dependent relink fails.
    fn rename_key(
        &mut self,
        key: &str,
        new_key: &str,
        backlinks: &mut [&mut dyn MetaStorage],
    ) -> StoreResult<()>;

    /// Creates a relative symlink from `key`'s directory to the target.
    /// Returns `false` when the owner is missing (and `create` is off) or
    /// a link with that name already exists.
    fn add_link(
        &mut self,
        key: &str,
        target: LinkTarget<'_>,
        name: Option<&str>,
        create: bool,
    ) -> StoreResult<bool>;

    /// Removes the named symlink. An already-absent link is success; a
    /// path that exists but is not a symlink is failure.
    fn remove_link(&mut self, key: &str, target: LinkTarget<'_>) -> StoreResult<bool>;

    /// Keys whose directories link to every entity in `targets`.
    fn find_links(&mut self, targets: &[&MetaHandle]) -> StoreResult<Vec<String>>;

    /// Keys whose handles match the keyword set.
    fn find_keywords(&mut self, keywords: &HashSet<String>) -> StoreResult<Vec<String>>;

    /// Immediate child names under `prefix`, for completion.
    fn key_hints(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// How often each distinct target key is linked to, descending.
    fn link_stats(&mut self) -> StoreResult<Vec<(String, usize)>>;

    /// Refreshes `updated_at` if the entity exists.
    fn update_timestamp(&mut self, key: &str) -> StoreResult<bool>;

    /// Full-tree integrity sweep and auto-repair.
    fn validate(&mut self) -> StoreResult<ValidateStats>;
}

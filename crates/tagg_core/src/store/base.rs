//! Base store: raw filesystem operations.
//!
//! # Responsibility
//! - Resolve keys to directories and load/save `__meta__.json` files.
//! - Resolve symlink entries to handles in declared linked stores.
//! - Enumerate keys through a recursive directory walk.
//!
//! # Invariants
//! - The store root is held as a normalized absolute path, so link
//!   targets can be classified with a plain prefix check.
//! - Symlink targets are resolved lexically (not via `canonicalize`), so
//!   dangling links still resolve to a key and can be reported by the
//!   validation sweep instead of silently disappearing.

use crate::model::{MetaHandle, Metadata};
use crate::store::{
    ops, validate, EventKind, LinkTarget, Listener, MetaStorage, StoreError, StoreRef, StoreResult,
    ValidateStats, META_FILE_NAME,
};
use log::warn;
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Filesystem-backed metadata store.
pub struct MetaStore {
    store: StoreRef,
    linked: Vec<StoreRef>,
    template: Metadata,
    listeners: Vec<Listener>,
}

impl MetaStore {
    /// Creates a store rooted at `root`, permitted to link into `linked`.
    ///
    /// The root does not have to exist yet; it is created lazily by the
    /// first `add_key`.
    pub fn new(name: &str, root: PathBuf, linked: Vec<StoreRef>) -> StoreResult<Self> {
        let root = absolutize(root)?;
        Ok(Self {
            store: StoreRef::new(name, root),
            linked,
            template: Metadata::new(),
            listeners: Vec::new(),
        })
    }

    /// Replaces the default metadata fields applied on create.
    pub fn set_template(&mut self, template: Metadata) {
        self.template = template;
    }

    /// Absolute directory for a key.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.store.root().join(key)
    }
}

impl MetaStorage for MetaStore {
    fn store_ref(&self) -> &StoreRef {
        &self.store
    }

    fn linked_stores(&self) -> &[StoreRef] {
        &self.linked
    }

    fn template(&self) -> &Metadata {
        &self.template
    }

    fn subscribe(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    fn broadcast(&mut self, event: EventKind) {
        for listener in &mut self.listeners {
            listener(event);
        }
    }

    fn scan(&self, handle: &mut MetaHandle) -> StoreResult<bool> {
        handle.loaded = true;
        let dir = self.path_for(handle.key());
        if !dir.is_dir() {
            return Ok(false);
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))? {
            entries.push(entry.map_err(|e| StoreError::io(&dir, e))?);
        }
        entries.sort_by_key(|entry| entry.file_name());

        let mut metadata = Metadata::new();
        let mut links = Vec::new();
        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            if name == META_FILE_NAME {
                let text = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
                let parsed: Metadata =
                    serde_json::from_str(&text).map_err(|e| StoreError::json(&path, e))?;
                metadata.extend(parsed);
                handle.exists = true;
                continue;
            }
            let file_type = entry
                .file_type()
                .map_err(|e| StoreError::io(&path, e))?;
            if file_type.is_symlink() {
                match resolve_link(&self.linked, &path)? {
                    Some(link) => links.push(link),
                    None => warn!(
                        "event=unresolved_link module=store store={} path={} status=skipped",
                        self.store.name(),
                        path.display()
                    ),
                }
            }
        }
        handle.metadata = metadata;
        handle.links = links;
        Ok(true)
    }

    fn walk_keys(&self) -> StoreResult<Vec<String>> {
        let root = self.store.root();
        let mut keys = Vec::new();
        if !root.is_dir() {
            return Ok(keys);
        }
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(root).to_path_buf();
                StoreError::Io {
                    path,
                    source: e.into(),
                }
            })?;
            if entry.file_type().is_dir() && entry.path().join(META_FILE_NAME).is_file() {
                if let Ok(rel) = entry.path().strip_prefix(root) {
                    keys.push(rel.to_string_lossy().into_owned());
                }
            }
        }
        Ok(keys)
    }

    fn load(&mut self, handle: &mut MetaHandle) -> StoreResult<bool> {
        self.scan(handle)
    }

    fn save(&self, handle: &mut MetaHandle) -> StoreResult<()> {
        if !handle.loaded {
            return Err(StoreError::NotLoaded {
                store: self.store.name().to_string(),
                key: handle.key().to_string(),
            });
        }
        let dir = self.path_for(handle.key());
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        let path = dir.join(META_FILE_NAME);
        let text = serde_json::to_string_pretty(&handle.metadata)
            .map_err(|e| StoreError::json(&path, e))?;
        fs::write(&path, text).map_err(|e| StoreError::io(&path, e))?;
        handle.exists = true;
        Ok(())
    }

    fn get(&mut self, key: &str) -> StoreResult<MetaHandle> {
        ops::get(self, key)
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        self.walk_keys()
    }

    fn add_key(&mut self, key: &str, metadata: Metadata) -> StoreResult<Option<MetaHandle>> {
        ops::add_key(self, key, metadata)
    }

    fn remove_key(
        &mut self,
        key: &str,
        backlinks: &mut [&mut dyn MetaStorage],
    ) -> StoreResult<bool> {
        ops::remove_key(self, key, backlinks)
    }

    fn rename_key(
        &mut self,
        key: &str,
        new_key: &str,
        backlinks: &mut [&mut dyn MetaStorage],
    ) -> StoreResult<()> {
        ops::rename_key(self, key, new_key, backlinks)
    }

    fn add_link(
        &mut self,
        key: &str,
        target: LinkTarget<'_>,
        name: Option<&str>,
        create: bool,
    ) -> StoreResult<bool> {
        ops::add_link(self, key, target, name, create)
    }

    fn remove_link(&mut self, key: &str, target: LinkTarget<'_>) -> StoreResult<bool> {
        ops::remove_link(self, key, target)
    }

    fn find_links(&mut self, targets: &[&MetaHandle]) -> StoreResult<Vec<String>> {
        ops::find_links(self, targets)
    }

    fn find_keywords(&mut self, keywords: &HashSet<String>) -> StoreResult<Vec<String>> {
        ops::find_keywords(self, keywords)
    }

    fn key_hints(&self, prefix: &str) -> StoreResult<Vec<String>> {
        ops::key_hints(self, prefix)
    }

    fn link_stats(&mut self) -> StoreResult<Vec<(String, usize)>> {
        ops::link_stats(self)
    }

    fn update_timestamp(&mut self, key: &str) -> StoreResult<bool> {
        ops::update_timestamp(self, key)
    }

    fn validate(&mut self) -> StoreResult<ValidateStats> {
        validate::validate(self)
    }
}

/// Resolves a symlink entry to a handle in one of the declared linked
/// stores, or `None` when its target lies outside all of them.
pub(crate) fn resolve_link(
    linked: &[StoreRef],
    link_path: &Path,
) -> StoreResult<Option<MetaHandle>> {
    let target = fs::read_link(link_path).map_err(|e| StoreError::io(link_path, e))?;
    let absolute = if target.is_absolute() {
        target
    } else {
        match link_path.parent() {
            Some(parent) => parent.join(target),
            None => target,
        }
    };
    let normalized = normalize(&absolute);
    for store in linked {
        if let Ok(rel) = normalized.strip_prefix(store.root()) {
            let key = rel.to_string_lossy().to_lowercase();
            return Ok(Some(MetaHandle::new(store.clone(), &key)));
        }
    }
    Ok(None)
}

/// Lexically normalizes a path, resolving `.` and `..` components.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Computes the relative path from `from_dir` to `to`, the form persisted
/// inside link symlinks.
pub(crate) fn relative_path(from_dir: &Path, to: &Path) -> PathBuf {
    let from: Vec<Component<'_>> = from_dir.components().collect();
    let to: Vec<Component<'_>> = to.components().collect();
    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut out = PathBuf::new();
    for _ in common..from.len() {
        out.push("..");
    }
    for component in &to[common..] {
        out.push(component);
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

fn absolutize(root: PathBuf) -> StoreResult<PathBuf> {
    let absolute = if root.is_absolute() {
        root
    } else {
        let cwd = std::env::current_dir().map_err(|e| StoreError::io(&root, e))?;
        cwd.join(root)
    };
    Ok(normalize(&absolute))
}

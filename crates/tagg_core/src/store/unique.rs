//! Uniqueness layer for the tag namespace.
//!
//! # Responsibility
//! - Index cached entities by their short name (last path segment).
//! - Enforce global short-name uniqueness on create.
//! - Resolve bare short-name lookups when unambiguous.
//!
//! # Invariants
//! - At most one existing key maps to a given short name.
//! - The short-name index moves in lockstep with the primary cache: an
//!   index entry is only dropped when it still points at the exact key
//!   being evicted.
//! - Bare (separator-less) keys cannot be created; every tag is
//!   namespaced as `domain/name`.

use crate::model::{MetaHandle, Metadata};
use crate::store::{
    ops, CachedStore, EventKind, LinkTarget, Listener, MetaStorage, StoreError, StoreRef,
    StoreResult, ValidateStats,
};
use std::collections::{BTreeMap, HashMap, HashSet};

fn short_key(key: &str) -> String {
    key.rsplit('/').next().unwrap_or(key).to_lowercase()
}

/// Caching store wrapper with a secondary short-name index.
pub struct UniqueStore {
    inner: CachedStore,
    by_short: HashMap<String, MetaHandle>,
}

impl UniqueStore {
    pub fn new(inner: CachedStore) -> Self {
        let mut store = Self {
            inner,
            by_short: HashMap::new(),
        };
        store.rebuild_index();
        store
    }

    fn rebuild_index(&mut self) {
        self.by_short.clear();
        for handle in self.inner.cached_handles() {
            self.by_short
                .insert(short_key(handle.key()), handle.clone());
        }
    }

    /// Brings the short-name index in line with the primary cache for one
    /// key, after the inner layer re-read it from disk.
    fn sync_short(&mut self, key: &str) {
        let key = key.to_lowercase();
        let short = short_key(&key);
        match self.inner.cached(&key) {
            Some(handle) => {
                self.by_short.insert(short, handle.clone());
            }
            None => {
                if self
                    .by_short
                    .get(&short)
                    .map(|occupant| occupant.key() == key)
                    .unwrap_or(false)
                {
                    self.by_short.remove(&short);
                }
            }
        }
    }

    /// The full key currently holding a short name, if any.
    pub fn resolve_short(&self, short: &str) -> Option<&str> {
        self.by_short.get(short).map(MetaHandle::key)
    }
}

impl MetaStorage for UniqueStore {
    fn store_ref(&self) -> &StoreRef {
        self.inner.store_ref()
    }

    fn linked_stores(&self) -> &[StoreRef] {
        self.inner.linked_stores()
    }

    fn template(&self) -> &Metadata {
        self.inner.template()
    }

    fn subscribe(&mut self, listener: Listener) {
        self.inner.subscribe(listener);
    }

    fn broadcast(&mut self, event: EventKind) {
        self.inner.broadcast(event);
    }

    fn scan(&self, handle: &mut MetaHandle) -> StoreResult<bool> {
        self.inner.scan(handle)
    }

    fn walk_keys(&self) -> StoreResult<Vec<String>> {
        self.inner.walk_keys()
    }

    fn load(&mut self, handle: &mut MetaHandle) -> StoreResult<bool> {
        if self.inner.cached(handle.key()).is_some() {
            return self.inner.load(handle);
        }
        // A bare short name may resolve through the secondary index.
        if short_key(handle.key()) == handle.key() {
            if let Some(hit) = self.by_short.get(handle.key()) {
                let hit = hit.clone();
                handle.copy_from(&hit);
                return Ok(true);
            }
        }
        let loaded = self.inner.load(handle)?;
        self.sync_short(handle.key());
        Ok(loaded)
    }

    fn save(&self, handle: &mut MetaHandle) -> StoreResult<()> {
        self.inner.save(handle)
    }

    fn get(&mut self, key: &str) -> StoreResult<MetaHandle> {
        ops::get(self, key)
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        self.inner.keys()
    }

    fn add_key(&mut self, key: &str, metadata: Metadata) -> StoreResult<Option<MetaHandle>> {
        let key = key.to_lowercase();
        let short = short_key(&key);
        if let Some(occupant) = self.by_short.get(&short) {
            if occupant.key() != key {
                return Err(StoreError::DuplicateKey {
                    key,
                    existing: occupant.key().to_string(),
                });
            }
        }
        if short == key {
            return Err(StoreError::BareKey { key });
        }
        let created = ops::add_key(self, &key, metadata)?;
        if created.is_some() {
            self.inner.recache(&key)?;
            self.sync_short(&key);
        }
        Ok(created)
    }

    fn remove_key(
        &mut self,
        key: &str,
        backlinks: &mut [&mut dyn MetaStorage],
    ) -> StoreResult<bool> {
        let removed = ops::remove_key(self, key, backlinks)?;
        if removed {
            self.inner.recache(key)?;
            self.sync_short(key);
        }
        Ok(removed)
    }

    fn rename_key(
        &mut self,
        key: &str,
        new_key: &str,
        backlinks: &mut [&mut dyn MetaStorage],
    ) -> StoreResult<()> {
        ops::rename_key(self, key, new_key, backlinks)?;
        self.inner.recache(key)?;
        self.sync_short(key);
        self.inner.recache(new_key)?;
        self.sync_short(new_key);
        Ok(())
    }

    fn add_link(
        &mut self,
        key: &str,
        target: LinkTarget<'_>,
        name: Option<&str>,
        create: bool,
    ) -> StoreResult<bool> {
        let added = ops::add_link(self, key, target, name, create)?;
        if added {
            self.inner.recache(key)?;
            self.sync_short(key);
        }
        Ok(added)
    }

    fn remove_link(&mut self, key: &str, target: LinkTarget<'_>) -> StoreResult<bool> {
        let removed = ops::remove_link(self, key, target)?;
        if removed {
            self.inner.recache(key)?;
            self.sync_short(key);
        }
        Ok(removed)
    }

    fn find_links(&mut self, targets: &[&MetaHandle]) -> StoreResult<Vec<String>> {
        ops::find_links(self, targets)
    }

    fn find_keywords(&mut self, keywords: &HashSet<String>) -> StoreResult<Vec<String>> {
        ops::find_keywords(self, keywords)
    }

    fn key_hints(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut hints = Vec::new();
        if prefix.is_empty() {
            hints.extend(self.by_short.keys().cloned());
        }
        hints.extend(self.inner.key_hints(prefix)?);
        hints.sort();
        Ok(hints)
    }

    fn link_stats(&mut self) -> StoreResult<Vec<(String, usize)>> {
        self.inner.link_stats()
    }

    fn update_timestamp(&mut self, key: &str) -> StoreResult<bool> {
        self.inner.update_timestamp(key)
    }

    fn validate(&mut self) -> StoreResult<ValidateStats> {
        // Short-name collisions should be impossible if the add_key guard
        // held; this catches direct filesystem edits.
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for key in self.inner.walk_keys()? {
            groups.entry(short_key(&key)).or_default().push(key);
        }
        let problems: Vec<String> = groups
            .into_iter()
            .filter(|(_, keys)| keys.len() > 1)
            .map(|(short, keys)| format!("duplicate short name {short}: {}", keys.join(", ")))
            .collect();
        if !problems.is_empty() {
            return Err(StoreError::ValidationFailed { problems });
        }

        let outcome = self.inner.validate();
        self.rebuild_index();
        outcome
    }
}

//! Caching layer over the base store.
//!
//! # Responsibility
//! - Keep an in-memory index of every existing entity, keyed by full key.
//! - Serve `keys` and `load` from the index instead of directory scans.
//!
//! # Invariants
//! - After a successful mutation the affected key is re-read from disk;
//!   the cache never trusts a mutation's return value to predict content.
//! - The cache assumes this process is the sole writer; out-of-band
//!   filesystem changes are only picked up by `validate` or reconstruction.

use crate::model::{MetaHandle, Metadata};
use crate::store::{
    ops, EventKind, LinkTarget, Listener, MetaStorage, MetaStore, StoreRef, StoreResult,
    ValidateStats,
};
use std::collections::{HashMap, HashSet};

/// Base store wrapper with a full-key cache.
pub struct CachedStore {
    inner: MetaStore,
    cache: HashMap<String, MetaHandle>,
}

impl CachedStore {
    /// Wraps the base store, eagerly scanning the whole tree once.
    pub fn new(inner: MetaStore) -> StoreResult<Self> {
        let mut store = Self {
            inner,
            cache: HashMap::new(),
        };
        store.rebuild()?;
        Ok(store)
    }

    /// Cached handle for a key, if the entity exists.
    pub(crate) fn cached(&self, key: &str) -> Option<&MetaHandle> {
        self.cache.get(key)
    }

    /// Every cached handle.
    pub(crate) fn cached_handles(&self) -> impl Iterator<Item = &MetaHandle> {
        self.cache.values()
    }

    /// Re-reads one key from disk and patches the cache accordingly.
    pub(crate) fn recache(&mut self, key: &str) -> StoreResult<MetaHandle> {
        let key = key.to_lowercase();
        let mut handle = MetaHandle::new(self.inner.store_ref().clone(), &key);
        self.inner.scan(&mut handle)?;
        if handle.exists {
            self.cache.insert(key, handle.clone());
        } else {
            self.cache.remove(&key);
        }
        Ok(handle)
    }

    /// Drops and rebuilds the whole cache from a fresh tree walk.
    pub(crate) fn rebuild(&mut self) -> StoreResult<()> {
        self.cache.clear();
        for key in self.inner.walk_keys()? {
            self.recache(&key)?;
        }
        Ok(())
    }
}

impl MetaStorage for CachedStore {
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
        if let Some(cached) = self.cache.get(handle.key()) {
            handle.copy_from(cached);
            return Ok(true);
        }
        let fresh = self.recache(handle.key())?;
        handle.copy_from(&fresh);
        Ok(true)
    }

    fn save(&self, handle: &mut MetaHandle) -> StoreResult<()> {
        self.inner.save(handle)
    }

    fn get(&mut self, key: &str) -> StoreResult<MetaHandle> {
        ops::get(self, key)
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let mut keys: Vec<String> = self.cache.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn add_key(&mut self, key: &str, metadata: Metadata) -> StoreResult<Option<MetaHandle>> {
        let created = ops::add_key(self, key, metadata)?;
        if created.is_some() {
            self.recache(key)?;
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
            self.recache(key)?;
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
        // A rename touches both keys: the old one is evicted, the new one
        // cached, so `keys` stays current without a lookup in between.
        self.recache(key)?;
        self.recache(new_key)?;
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
            self.recache(key)?;
        }
        Ok(added)
    }

    fn remove_link(&mut self, key: &str, target: LinkTarget<'_>) -> StoreResult<bool> {
        let removed = ops::remove_link(self, key, target)?;
        if removed {
            self.recache(key)?;
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
        ops::key_hints(self, prefix)
    }

    fn link_stats(&mut self) -> StoreResult<Vec<(String, usize)>> {
        ops::link_stats(self)
    }

    fn update_timestamp(&mut self, key: &str) -> StoreResult<bool> {
        ops::update_timestamp(self, key)
    }

    fn validate(&mut self) -> StoreResult<ValidateStats> {
        // Repairs may have moved directories even when the sweep reports
        // problems, so the cache is rebuilt on both paths.
        let outcome = self.inner.validate();
        self.rebuild()?;
        outcome
    }
}

//! Remote-backed store layer.
//!
//! # Responsibility
//! - Fill in entity metadata from a remote source when a key is created
//!   without any.
//!
//! # Invariants
//! - A create that supplies metadata never touches the network.
//! - A failed fetch creates nothing.

use crate::github::RepoMetadataSource;
use crate::model::{MetaHandle, Metadata};
use crate::store::{
    ops, EventKind, LinkTarget, Listener, MetaStore, MetaStorage, StoreError, StoreRef,
    StoreResult, ValidateStats,
};
use log::info;
use std::collections::HashSet;

/// Base store wrapper that fetches metadata by key from a remote source.
///
/// The key doubles as the remote identifier (`owner/name` for a
/// repository), so `add repos acme/widget` needs nothing but the key.
pub struct RemoteStore<S: RepoMetadataSource> {
    inner: MetaStore,
    source: S,
}

impl<S: RepoMetadataSource> RemoteStore<S> {
    pub fn new(inner: MetaStore, source: S) -> Self {
        Self { inner, source }
    }
}

impl<S: RepoMetadataSource> MetaStorage for RemoteStore<S> {
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
        self.inner.load(handle)
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
        let metadata = if metadata.is_empty() {
            info!(
                "event=remote_fetch module=store store={} key={}",
                self.inner.store_ref(),
                key
            );
            let record = self.source.fetch_repo(key).map_err(|source| {
                StoreError::Fetch {
                    key: key.to_string(),
                    source,
                }
            })?;
            record.into_metadata()
        } else {
            metadata
        };
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

    // Routed through the wrapper so that link creation with `create` set
    // goes through the fetching `add_key`.
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
        self.inner.validate()
    }
}

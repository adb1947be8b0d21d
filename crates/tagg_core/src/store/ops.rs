//! Shared operation logic over the storage interface.
//!
//! Every operation here dispatches back through `&mut dyn MetaStorage`,
//! so wrapper stores (caching, uniqueness, remote-backed) participate in
//! lookups exactly as the invoking layer sees them. Wrappers call into
//! these functions and add their own bookkeeping around them.

use crate::model::{MetaHandle, Metadata};
use crate::store::base::{relative_path, resolve_link};
use crate::store::{
    timestamp, EventKind, LinkTarget, MetaStorage, StoreError, StoreResult, META_FILE_NAME,
};
use log::info;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::os::unix::fs::symlink;

pub(crate) fn get(store: &mut dyn MetaStorage, key: &str) -> StoreResult<MetaHandle> {
    let mut handle = MetaHandle::new(store.store_ref().clone(), key);
    store.load(&mut handle)?;
    Ok(handle)
}

pub(crate) fn add_key(
    store: &mut dyn MetaStorage,
    key: &str,
    metadata: Metadata,
) -> StoreResult<Option<MetaHandle>> {
    let key = key.to_lowercase();
    let meta_path = store.store_ref().root().join(&key).join(META_FILE_NAME);
    if meta_path.is_file() {
        return Ok(None);
    }

    let mut merged = store.template().clone();
    merged.extend(metadata);
    let now = timestamp();
    merged.insert("created_at".to_string(), Value::String(now.clone()));
    merged.insert("updated_at".to_string(), Value::String(now));

    let mut handle = MetaHandle::with_metadata(store.store_ref().clone(), &key, merged);
    store.save(&mut handle)?;
    info!(
        "event=add_key module=store store={} key={} status=ok",
        store.store_ref().name(),
        key
    );
    store.broadcast(EventKind::AddKey);
    Ok(Some(handle))
}

pub(crate) fn remove_key(
    store: &mut dyn MetaStorage,
    key: &str,
    backlinks: &mut [&mut dyn MetaStorage],
) -> StoreResult<bool> {
    let key = key.to_lowercase();
    let handle = store.get(&key)?;
    if !handle.exists {
        return Ok(false);
    }

    // Referential integrity: no dangling inbound link survives deletion.
    for backlink in backlinks.iter_mut() {
        for dependent in backlink.find_links(&[&handle])? {
            backlink.remove_link(&dependent, LinkTarget::Handle(&handle))?;
        }
    }

    let dir = handle.path();
    if dir.is_dir() {
        fs::remove_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
    }
    info!(
        "event=remove_key module=store store={} key={} status=ok",
        store.store_ref().name(),
        key
    );
    store.broadcast(EventKind::RemoveKey);
    Ok(true)
}

pub(crate) fn rename_key(
    store: &mut dyn MetaStorage,
    key: &str,
    new_key: &str,
    backlinks: &mut [&mut dyn MetaStorage],
) -> StoreResult<()> {
    let key = key.to_lowercase();
    let new_key = new_key.to_lowercase();

    let old = store.get(&key)?;
    if !old.exists {
        return Err(StoreError::KeyNotFound {
            store: store.store_ref().name().to_string(),
            key,
        });
    }

    // A lookup under the new key may fuzzily resolve (short-name alias in
    // the unique-keyed store). Reuse it only when it is this exact key;
    // an alias hit on a different entity falls through to the copy path.
    let mut new = store.get(&new_key)?;
    if !new.exists || new.key() != new_key {
        new = MetaHandle::new(store.store_ref().clone(), &new_key);
        new.copy_from(&old);
        new.rename(&new_key);
        new.metadata
            .insert("updated_at".to_string(), Value::String(timestamp()));
        store.save(&mut new)?;
    }

    for backlink in backlinks.iter_mut() {
        for dependent in backlink.find_links(&[&old])? {
            let mut ok = backlink.remove_link(&dependent, LinkTarget::Handle(&old))?;
            let holder = backlink.get(&dependent)?;
            if !holder.has_link(&new) {
                ok = backlink.add_link(&dependent, LinkTarget::Handle(&new), None, false)? && ok;
            }
            if !ok {
                return Err(StoreError::LinkOperationFailed {
                    key,
                    new_key,
                    dependent,
                });
            }
        }
    }

    let old_dir = old.path();
    fs::remove_dir_all(&old_dir).map_err(|e| StoreError::io(&old_dir, e))?;
    info!(
        "event=rename_key module=store store={} key={} new_key={} status=ok",
        store.store_ref().name(),
        key,
        new_key
    );
    store.broadcast(EventKind::RenameKey);
    Ok(())
}

pub(crate) fn add_link(
    store: &mut dyn MetaStorage,
    key: &str,
    target: LinkTarget<'_>,
    name: Option<&str>,
    create: bool,
) -> StoreResult<bool> {
    let key = key.to_lowercase();
    let target_path = target.to_path();
    let name = match name {
        Some(name) => name.to_string(),
        None => target.name(),
    };

    let dir = store.store_ref().root().join(&key);
    if !dir.is_dir() {
        if !create {
            return Ok(false);
        }
        store.add_key(&key, Metadata::new())?;
    }

    let link_path = dir.join(&name);
    if link_path.symlink_metadata().is_ok() {
        return Ok(false);
    }
    let relative = relative_path(&dir, &target_path);
    symlink(&relative, &link_path).map_err(|e| StoreError::io(&link_path, e))?;
    store.update_timestamp(&key)?;
    store.broadcast(EventKind::AddLink);
    Ok(true)
}

pub(crate) fn remove_link(
    store: &mut dyn MetaStorage,
    key: &str,
    target: LinkTarget<'_>,
) -> StoreResult<bool> {
    let key = key.to_lowercase();
    let name = target.name();
    let link_path = store.store_ref().root().join(&key).join(&name);

    match link_path.symlink_metadata() {
        Ok(meta) if meta.file_type().is_symlink() => {
            fs::remove_file(&link_path).map_err(|e| StoreError::io(&link_path, e))?;
            store.update_timestamp(&key)?;
            store.broadcast(EventKind::RemoveLink);
            Ok(true)
        }
        // An already-absent link is success, so retries stay idempotent.
        Err(_) => Ok(true),
        // Present but not a symlink: unexpected state, report failure.
        Ok(_) => Ok(false),
    }
}

pub(crate) fn find_links(
    store: &mut dyn MetaStorage,
    targets: &[&MetaHandle],
) -> StoreResult<Vec<String>> {
    let names: HashSet<String> = targets
        .iter()
        .map(|target| target.short_name().to_string())
        .collect();

    let mut matches = Vec::new();
    for key in store.walk_keys()? {
        let dir = store.store_ref().root().join(&key);
        let mut entries = HashSet::new();
        for entry in fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))? {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            entries.insert(entry.file_name().to_string_lossy().into_owned());
        }
        // Short-name intersection is a fast pre-filter; the exact handle
        // comparison below decides.
        if !names.iter().all(|name| entries.contains(name)) {
            continue;
        }
        let mut all_match = true;
        for target in targets {
            let link_path = dir.join(target.short_name());
            // A plain file or directory can share a target's short name;
            // only a symlink that resolves to the target counts.
            match resolve_link(store.linked_stores(), &link_path) {
                Ok(Some(link)) if link == **target => {}
                _ => {
                    all_match = false;
                    break;
                }
            }
        }
        if all_match {
            matches.push(key);
        }
    }
    Ok(matches)
}

pub(crate) fn find_keywords(
    store: &mut dyn MetaStorage,
    keywords: &HashSet<String>,
) -> StoreResult<Vec<String>> {
    let mut matches = Vec::new();
    for key in store.keys()? {
        let handle = store.get(&key)?;
        if handle.match_keywords(keywords) {
            matches.push(key);
        }
    }
    Ok(matches)
}

pub(crate) fn key_hints(store: &dyn MetaStorage, prefix: &str) -> StoreResult<Vec<String>> {
    let dir = store.store_ref().root().join(prefix);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut hints = Vec::new();
    for entry in fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))? {
        let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name != META_FILE_NAME {
            hints.push(name);
        }
    }
    hints.sort();
    Ok(hints)
}

pub(crate) fn link_stats(store: &mut dyn MetaStorage) -> StoreResult<Vec<(String, usize)>> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for key in store.keys()? {
        let handle = store.get(&key)?;
        for link in &handle.links {
            *counts.entry(link.key().to_string()).or_insert(0) += 1;
        }
    }
    let mut stats: Vec<(String, usize)> = counts.into_iter().collect();
    stats.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(stats)
}

pub(crate) fn update_timestamp(store: &mut dyn MetaStorage, key: &str) -> StoreResult<bool> {
    let mut handle = store.get(key)?;
    if !handle.exists {
        return Ok(false);
    }
    handle
        .metadata
        .insert("updated_at".to_string(), Value::String(timestamp()));
    store.save(&mut handle)?;
    Ok(true)
}

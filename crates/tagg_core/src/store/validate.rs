//! Full-tree integrity sweep and auto-repair.
//!
//! # Responsibility
//! - Detect missing entities, dangling links, missing timestamps and
//!   miscased directory names across the whole tree.
//! - Repair what can be repaired (timestamps, case) and report the rest.
//!
//! # Invariants
//! - The sweep always runs against the on-disk tree (`walk_keys`/`scan`),
//!   never against a cache, so every layer validates the same reality.
//! - Repairs complete before the aggregate error is raised.
//! - Error accumulation stops after 50 problems.

use crate::model::MetaHandle;
use crate::store::{timestamp, MetaStorage, StoreError, StoreResult, ValidateStats, META_FILE_NAME};
use log::warn;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::fs;

const MAX_PROBLEMS: usize = 50;

pub(crate) fn validate(store: &mut dyn MetaStorage) -> StoreResult<ValidateStats> {
    let mut stats = ValidateStats::default();
    let mut problems = Vec::new();
    let mut to_rename: BTreeSet<String> = BTreeSet::new();

    for key in store.walk_keys()? {
        stats.total += 1;

        let mut handle;
        if key.chars().any(|c| c.is_uppercase()) {
            // Record every miscased path-prefix level for the batch rename
            // below, and reload the entity under its literal key.
            let levels: Vec<&str> = key.split('/').collect();
            for depth in 1..=levels.len() {
                if levels[depth - 1].chars().any(|c| c.is_uppercase()) {
                    to_rename.insert(levels[..depth].join("/"));
                }
            }
            warn!(
                "event=validate_case module=store store={} key={} status=scheduled",
                store.store_ref().name(),
                key
            );
            handle = MetaHandle::with_raw_key(store.store_ref().clone(), &key);
        } else {
            handle = MetaHandle::new(store.store_ref().clone(), &key);
        }
        store.scan(&mut handle)?;

        if !handle.exists {
            problems.push(format!("key does not exist or failed to load: {key}"));
        }

        for link in &handle.links {
            stats.links += 1;
            let link_meta = link.store().root().join(link.key()).join(META_FILE_NAME);
            if !link_meta.is_file() {
                problems.push(format!(
                    "link does not exist or failed to load for key {key}: {link}"
                ));
            }
        }

        let mut changed = false;
        for field in ["created_at", "updated_at"] {
            if !handle.metadata.contains_key(field) {
                handle
                    .metadata
                    .insert(field.to_string(), Value::String(timestamp()));
                changed = true;
                warn!(
                    "event=validate_fix module=store store={} key={} field={} status=created",
                    store.store_ref().name(),
                    key,
                    field
                );
            }
        }
        if changed {
            stats.fixed += 1;
            store.save(&mut handle)?;
        }

        if problems.len() > MAX_PROBLEMS {
            problems.push("too many errors".to_string());
            break;
        }
    }

    if !to_rename.is_empty() {
        rename_miscased(store, &to_rename, &mut stats, &mut problems)?;
    }

    if !problems.is_empty() {
        return Err(StoreError::ValidationFailed { problems });
    }
    Ok(stats)
}

/// Renames every collected miscased path prefix to its lowercase form.
///
/// Prefixes are processed in sorted order so parents move before their
/// children; a rename that fails because the destination already exists
/// invalidates every pending child rename under it.
fn rename_miscased(
    store: &mut dyn MetaStorage,
    to_rename: &BTreeSet<String>,
    stats: &mut ValidateStats,
    problems: &mut Vec<String>,
) -> StoreResult<()> {
    let mut skipped: HashSet<String> = HashSet::new();
    stats.renamed += to_rename.len();

    for prefix in to_rename {
        let (parent, name) = match prefix.rsplit_once('/') {
            Some((parent, name)) => (parent.to_lowercase(), name),
            None => (String::new(), prefix.as_str()),
        };
        let old_key = if parent.is_empty() {
            name.to_string()
        } else {
            format!("{parent}/{name}")
        };
        let new_key = old_key.to_lowercase();

        if !parent.is_empty() && skipped.contains(&parent) {
            problems.push(format!(
                "unable to rename {old_key} to {new_key} due to the failure above"
            ));
            continue;
        }

        let old_path = store.store_ref().root().join(&old_key);
        let new_path = store.store_ref().root().join(&new_key);
        if new_path.exists() {
            skipped.insert(new_key.clone());
            problems.push(format!(
                "unable to rename {old_key} to {new_key}: the latter already exists"
            ));
            continue;
        }

        fs::rename(&old_path, &new_path).map_err(|e| StoreError::io(&old_path, e))?;
        warn!(
            "event=validate_rename module=store store={} old={} new={} status=ok",
            store.store_ref().name(),
            old_key,
            new_key
        );
    }
    Ok(())
}

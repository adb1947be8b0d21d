//! Entity handle: the transient in-memory view of one stored entity.
//!
//! # Responsibility
//! - Carry key, metadata mapping, resolved links and load state.
//! - Provide keyword/pattern matching used by search and autotagging.
//!
//! # Invariants
//! - `key` is lowercase; the only exception is a raw-key handle built by
//!   the validation sweep to inspect a miscased directory.
//! - Two handles are equal iff they reference the same store root and the
//!   same key. Metadata and links never participate in equality.
//! - A handle is never persisted itself; `loaded`/`exists` describe what
//!   was (or would be) found on disk at load time.

use crate::store::StoreRef;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// String-keyed JSON metadata mapping.
///
/// A `BTreeMap` keeps keys sorted, so pretty-printed output is key-sorted
/// by construction.
pub type Metadata = BTreeMap<String, Value>;

static TOKEN_SPLIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W+").expect("valid token regex"));

/// In-memory representation of one stored entity.
#[derive(Debug, Clone)]
pub struct MetaHandle {
    store: StoreRef,
    key: String,
    /// Metadata mapping, including reserved `created_at` / `updated_at`.
    pub metadata: Metadata,
    /// Links resolved from symlinks in this entity's directory, keyed into
    /// one of the owning store's declared linked stores.
    pub links: Vec<MetaHandle>,
    /// Whether metadata has been read from disk or supplied directly.
    pub loaded: bool,
    /// Whether a persisted directory with a metadata file was found.
    pub exists: bool,
}

impl MetaHandle {
    /// Creates an unloaded handle; the key is normalized to lowercase.
    pub fn new(store: StoreRef, key: &str) -> Self {
        Self {
            store,
            key: key.to_lowercase(),
            metadata: Metadata::new(),
            links: Vec::new(),
            loaded: false,
            exists: false,
        }
    }

    /// Creates a loaded handle with pre-supplied metadata.
    pub fn with_metadata(store: StoreRef, key: &str, metadata: Metadata) -> Self {
        Self {
            store,
            key: key.to_lowercase(),
            metadata,
            links: Vec::new(),
            loaded: true,
            exists: false,
        }
    }

    /// Creates a handle without lowercasing the key.
    ///
    /// Only the validation sweep uses this, to address a directory whose
    /// on-disk name still contains uppercase characters.
    pub(crate) fn with_raw_key(store: StoreRef, key: &str) -> Self {
        Self {
            store,
            key: key.to_string(),
            metadata: Metadata::new(),
            links: Vec::new(),
            loaded: false,
            exists: false,
        }
    }

    /// The owning store reference.
    pub fn store(&self) -> &StoreRef {
        &self.store
    }

    /// The full hierarchical key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Last path segment of the key.
    pub fn short_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    /// Absolute directory of this entity under the store root.
    pub fn path(&self) -> PathBuf {
        self.store.root().join(&self.key)
    }

    /// Rebinds the handle to another key without touching metadata.
    pub fn rename(&mut self, key: &str) {
        self.key = key.to_lowercase();
    }

    /// Copies another handle's full state into this one.
    ///
    /// Metadata and links become independent copies; used when renaming
    /// in place while preserving cache identity.
    pub fn copy_from(&mut self, other: &MetaHandle) {
        self.store = other.store.clone();
        self.key = other.key.clone();
        self.metadata = other.metadata.clone();
        self.links = other.links.clone();
        self.loaded = other.loaded;
        self.exists = other.exists;
    }

    /// Whether `other` equals any entry in `links`.
    pub fn has_link(&self, other: &MetaHandle) -> bool {
        self.links.iter().any(|link| link == other)
    }

    /// Tokenizes the short name plus the `description` metadata field on
    /// non-word boundaries, case-folds, and tests for a non-empty
    /// intersection with `keywords`.
    pub fn match_keywords(&self, keywords: &HashSet<String>) -> bool {
        let description = self
            .metadata
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("");
        let haystack = format!("{} {}", self.short_name(), description);
        TOKEN_SPLIT_RE
            .split(&haystack)
            .filter(|token| !token.is_empty())
            .any(|token| keywords.contains(&token.to_lowercase()))
    }

    /// Whether any pattern matches the short name in full (not substring).
    pub fn match_patterns(&self, patterns: &[Regex]) -> bool {
        let name = self.short_name();
        patterns.iter().any(|pattern| {
            pattern
                .find(name)
                .map(|m| m.start() == 0 && m.end() == name.len())
                .unwrap_or(false)
        })
    }
}

impl PartialEq for MetaHandle {
    fn eq(&self, other: &Self) -> bool {
        self.store == other.store && self.key == other.key
    }
}

impl Eq for MetaHandle {}

impl Display for MetaHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.store, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::{MetaHandle, Metadata};
    use crate::store::StoreRef;
    use regex::Regex;
    use serde_json::json;
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn store() -> StoreRef {
        StoreRef::new("tags", PathBuf::from("/data/tags"))
    }

    fn keyword_set(words: &[&str]) -> HashSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn key_is_normalized_to_lowercase() {
        let handle = MetaHandle::new(store(), "Language/Python");
        assert_eq!(handle.key(), "language/python");
        assert_eq!(handle.short_name(), "python");
    }

    #[test]
    fn equality_ignores_metadata_and_links() {
        let mut a = MetaHandle::new(store(), "language/python");
        let b = MetaHandle::new(store(), "language/python");
        a.metadata.insert("description".into(), json!("x"));
        assert_eq!(a, b);

        let other_store = StoreRef::new("repos", PathBuf::from("/data/repos"));
        let c = MetaHandle::new(other_store, "language/python");
        assert_ne!(a, c);
    }

    #[test]
    fn match_keywords_tokenizes_name_and_description() {
        let mut metadata = Metadata::new();
        metadata.insert("description".into(), json!("A fancy Web-Crawler."));
        let handle = MetaHandle::with_metadata(store(), "tools/scrapy", metadata);

        assert!(handle.match_keywords(&keyword_set(&["crawler"])));
        assert!(handle.match_keywords(&keyword_set(&["scrapy"])));
        assert!(!handle.match_keywords(&keyword_set(&["web-crawler"])));
        assert!(!handle.match_keywords(&keyword_set(&["spider"])));
    }

    #[test]
    fn match_patterns_requires_a_full_match() {
        let handle = MetaHandle::new(store(), "language/python");
        let full = Regex::new(r"pyth.n").unwrap();
        let partial = Regex::new(r"pyth").unwrap();
        assert!(handle.match_patterns(&[full]));
        assert!(!handle.match_patterns(&[partial]));
    }

    #[test]
    fn copy_from_takes_independent_state() {
        let mut source = MetaHandle::new(store(), "language/python");
        source.metadata.insert("language".into(), json!("Python"));
        source.loaded = true;
        source.exists = true;

        let mut target = MetaHandle::new(store(), "language/py");
        target.copy_from(&source);
        assert_eq!(target.key(), "language/python");
        assert!(target.loaded);
        assert!(target.exists);

        target.metadata.insert("extra".into(), json!(true));
        assert!(!source.metadata.contains_key("extra"));
    }
}

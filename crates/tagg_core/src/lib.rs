//! Core domain logic for tagg: a filesystem-backed tag graph for GitHub
//! repositories. Entities are directories with a JSON metadata file;
//! tag assignments are relative symlinks between them.

pub mod github;
pub mod logging;
pub mod model;
pub mod service;
pub mod store;

pub use github::{GithubClient, GithubError, Paginated, RepoMetadataSource, RepoRecord};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::{MetaHandle, Metadata};
pub use service::{
    ActionSink, AlwaysYes, ApplyActions, AutoTagger, AutotagError, AutotagStats, ConfirmPrompt,
    Definitions, SuggestActions, TagGraph,
};
pub use store::{
    CachedStore, EventKind, LinkTarget, MetaStorage, MetaStore, RemoteStore, StoreError, StoreRef,
    StoreResult, UniqueStore, ValidateStats, META_FILE_NAME,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}

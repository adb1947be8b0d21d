//! Application services composed on top of the store hierarchy.

pub mod autotag;
pub mod graph;

pub use autotag::{
    ActionSink, AlwaysYes, ApplyActions, AutoTagger, AutotagError, AutotagStats, ConfirmPrompt,
    Definitions, SuggestActions,
};
pub use graph::TagGraph;

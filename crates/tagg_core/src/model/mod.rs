//! Domain model for stored entities.
//!
//! # Responsibility
//! - Define the in-memory handle for one persisted entity.
//! - Keep key normalization and matching rules in one place.
//!
//! # Invariants
//! - Entity keys are lowercase hierarchical paths (`domain/name`).
//! - Handles compare equal iff they reference the same store and key.

pub mod handle;

pub use handle::{MetaHandle, Metadata};

//! Versioned response cache for offline use.
//!
//! This module provides the `CacheManager`, which owns one named cache
//! generation (e.g. `pinmap-v1`) stored in its own SQLite file. A generation
//! is populated from the asset manifest at install time and becomes the only
//! serving generation at activation; every other generation is deleted then.
//!
//! Generation lifecycle:
//! - `installing`: manifest population in progress
//! - `installed`: populated, not yet serving
//! - `active`: the exclusive serving generation
//! - superseded: deleted by a newer generation's activation

pub mod manager;

pub use manager::{CacheManager, GenerationInfo, GenerationState};

//! Data models for the Pinmap application.
//!
//! These models match the frontend location objects field for field (camelCase JSON).

mod location;
mod stats;

pub use location::*;
pub use stats::*;

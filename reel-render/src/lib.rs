//! Reel Render Library
//!
//! This library is the handoff to rendering: it only accepts sequences that
//! satisfy every timeline invariant, maps them to whole output frames and
//! writes a plan an external encoder can consume.

pub mod compositor;
pub mod finalized;
pub mod plan;

use reel_core::InvariantViolation;

pub use compositor::{Compositor, PlanWriter};
pub use finalized::FinalizedSequence;
pub use plan::{RenderItem, RenderPlan, RenderSource};

/// Result type for reel-render operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for reel-render operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Reel core error: {0}")]
    Core(#[from] reel_core::Error),

    #[error("Assembly error: {0}")]
    Assembly(#[from] reel_assembly::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Sequence is not renderable: {}", describe(.0))]
    Invariant(Vec<InvariantViolation>),

    #[error("Sequence has no entries")]
    EmptySequence,
}

fn describe(violations: &[InvariantViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

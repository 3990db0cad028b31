//! Reel Assembly Library
//!
//! This library resolves visual assets for narration segments, reconciles
//! segment durations against the narration, turns stills into motion clips,
//! and builds and repairs timelines.

pub mod builder;
pub mod command;
pub mod normalizer;
pub mod probe;
pub mod reconciler;
pub mod repairer;
pub mod resolver;

use std::path::PathBuf;

pub use builder::{
    BuildOutcome, BuildReport, EntryReport, Fallback, ProjectBuild, SequenceBuilder,
};
pub use normalizer::{ImageNormalizer, MotionClip, PanDirection};
pub use probe::{FfprobeProbe, MediaProbe, NoProbe, ProbeError};
pub use reconciler::{DurationReconciler, DurationTier, ReconciledDuration};
pub use repairer::{AnalysisReport, RepairReport, SequenceRepairer};
pub use resolver::{AssetResolver, NarrationLocator};

#[cfg(feature = "ffmpeg")]
pub use probe::FfmpegProbe;

/// Result type for reel-assembly operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for reel-assembly operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Reel core error: {0}")]
    Core(#[from] reel_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("Image error in {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl Error {
    /// Whether the underlying failure was a backup or atomic write
    pub fn is_persistence(&self) -> bool {
        matches!(self, Error::Core(e) if e.is_persistence())
    }
}

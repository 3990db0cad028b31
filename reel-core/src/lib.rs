//! Reel Core Library
//!
//! This library provides the data model, timeline invariants and the
//! versioned project store for narration-paced timeline assembly.

pub mod asset;
pub mod config;
pub mod segment;
pub mod status;
pub mod store;
pub mod timeline;

use std::path::PathBuf;

pub use asset::{ContentKind, VisualAsset};
pub use config::AssemblyConfig;
pub use segment::{NarrationSegment, SegmentCatalog, SegmentKind};
pub use status::{ContentStatusRecord, ProgressStatus, SegmentStatus};
pub use store::{ProjectStore, StaleReason};
pub use timeline::{EntryKind, InvariantViolation, Sequence, TimelineEntry};

/// Result type for reel-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for reel-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config {path}: {message}")]
    InvalidConfig { path: PathBuf, message: String },

    /// Backup, temporary write, rename or removal failed. The original
    /// file is left untouched.
    #[error("Persistence error at {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported sequence file version: {0}")]
    UnsupportedVersion(u32),

    #[error("Missing project file: {0}")]
    MissingFile(PathBuf),
}

impl Error {
    /// Convenience constructor for [`Error::Persistence`].
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Whether this error came from a failed write, backup or removal.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Error::Persistence { .. })
    }
}

/// Tolerance for comparing timeline instants, in seconds.
pub const TIME_EPSILON: f64 = 1e-6;

/// Extracts the numeric suffix of a segment id (`segment_12` -> 12).
///
/// Ids without an underscore are parsed whole, so a bare `"7"` also works.
pub fn segment_number(segment_id: &str) -> Option<u32> {
    let tail = segment_id.rsplit('_').next().unwrap_or(segment_id);
    tail.parse().ok()
}

//! Visual asset data structures

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Recognized video extensions, lowercase.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "webm"];

/// Recognized still image extensions, lowercase.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// What a visual asset file contains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Video,
    Image,
}

impl ContentKind {
    /// Classifies a path by its extension (case-insensitive)
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(ContentKind::Video)
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(ContentKind::Image)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Video => "video",
            ContentKind::Image => "image",
        }
    }
}

/// A generated visual discovered on disk for one segment.
///
/// Assets are never owned by this crate: they are found, ranked and
/// referenced, but never moved or deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualAsset {
    /// Location of the file
    pub path: PathBuf,
    /// Video or still image
    pub kind: ContentKind,
    /// Last modification time of the file
    pub modified: SystemTime,
    /// Segment this asset was matched to
    pub segment_id: String,
}

impl VisualAsset {
    /// Creates a new asset
    pub fn new(
        path: impl Into<PathBuf>,
        kind: ContentKind,
        modified: SystemTime,
        segment_id: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            kind,
            modified,
            segment_id: segment_id.into(),
        }
    }

    pub fn is_video(&self) -> bool {
        self.kind == ContentKind::Video
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_extensions() {
        assert_eq!(
            ContentKind::from_path(Path::new("a/broll_segment_1.MP4")),
            Some(ContentKind::Video)
        );
        assert_eq!(
            ContentKind::from_path(Path::new("clip.webm")),
            Some(ContentKind::Video)
        );
        assert_eq!(
            ContentKind::from_path(Path::new("still.jpeg")),
            Some(ContentKind::Image)
        );
        assert_eq!(ContentKind::from_path(Path::new("notes.txt")), None);
        assert_eq!(ContentKind::from_path(Path::new("noext")), None);
    }
}

//! Finding files on disk for a segment: generated visuals and narration
//! sub-clips

use reel_core::asset::VIDEO_EXTENSIONS;
use reel_core::config::AssemblyConfig;
use reel_core::{segment_number, ContentKind, NarrationSegment, VisualAsset};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// File name prefixes a generated visual may carry, followed by the
/// segment number
const NAME_PATTERNS: &[&str] = &[
    "broll_segment_",
    "fetched_broll_segment_",
    "broll_video_segment_",
    "segment_",
    "image_",
    "broll_",
    "video_",
];

/// Picks the best generated visual for a segment.
///
/// Newest video wins; without any video, newest image. Never writes.
#[derive(Debug, Clone)]
pub struct AssetResolver {
    root: PathBuf,
    dirs: Vec<PathBuf>,
}

impl AssetResolver {
    /// `dirs` are searched relative to `root`, in priority order
    pub fn new(root: impl Into<PathBuf>, dirs: Vec<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dirs,
        }
    }

    pub fn from_config(root: impl Into<PathBuf>, config: &AssemblyConfig) -> Self {
        Self::new(root, config.assets.broll_dirs.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Best asset for a segment, if any file matches
    pub fn resolve(&self, segment_id: &str) -> Option<VisualAsset> {
        let (videos, images): (Vec<_>, Vec<_>) = self
            .candidates(segment_id)
            .into_iter()
            .partition(VisualAsset::is_video);

        let picked = newest(videos).or_else(|| newest(images));
        match &picked {
            Some(asset) => tracing::debug!(
                segment_id,
                path = %asset.path.display(),
                kind = asset.kind.as_str(),
                "asset resolved"
            ),
            None => tracing::debug!(segment_id, "no asset found"),
        }
        picked
    }

    /// Resolves many segments; unresolved ids are absent from the map
    pub fn resolve_all<'a>(
        &self,
        segment_ids: impl IntoIterator<Item = &'a str>,
    ) -> BTreeMap<String, VisualAsset> {
        segment_ids
            .into_iter()
            .filter_map(|id| self.resolve(id).map(|asset| (id.to_string(), asset)))
            .collect()
    }

    /// Every file in the asset directories that matches the segment
    pub fn candidates(&self, segment_id: &str) -> Vec<VisualAsset> {
        let pattern = match name_pattern(segment_id) {
            Ok(pattern) => pattern,
            Err(e) => {
                tracing::warn!(segment_id, "cannot match asset names: {e}");
                return Vec::new();
            }
        };
        let mut found = Vec::new();

        for dir in &self.dirs {
            let dir = self.root.join(dir);
            // Missing directories are normal: not every project has all of them
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(kind) = ContentKind::from_path(&path) else {
                    continue;
                };
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                if !pattern.is_match(stem) {
                    continue;
                }
                let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                    continue;
                };
                found.push(VisualAsset::new(path, kind, modified, segment_id));
            }
        }
        found
    }
}

/// Case-insensitive file stem pattern for a segment's files.
///
/// The segment number must not be followed by another digit, so
/// `segment_1` never matches `segment_12`.
fn name_pattern(segment_id: &str) -> Result<Regex, regex::Error> {
    let needle = match segment_number(segment_id) {
        Some(n) => {
            let prefixes: Vec<_> = NAME_PATTERNS.iter().map(|p| regex::escape(p)).collect();
            format!("(?:{}){n}", prefixes.join("|"))
        }
        None => regex::escape(segment_id),
    };
    Regex::new(&format!(r"(?i){needle}(?:\D|$)"))
}

/// Newest by modification time; ties go to the smaller path
fn newest(assets: Vec<VisualAsset>) -> Option<VisualAsset> {
    assets.into_iter().max_by(|a, b| {
        a.modified
            .cmp(&b.modified)
            .then_with(|| b.path.cmp(&a.path))
    })
}

/// Finds the narration sub-clip for a segment
#[derive(Debug, Clone)]
pub struct NarrationLocator {
    root: PathBuf,
    dirs: Vec<PathBuf>,
}

impl NarrationLocator {
    pub fn new(root: impl Into<PathBuf>, dirs: Vec<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dirs,
        }
    }

    pub fn from_config(root: impl Into<PathBuf>, config: &AssemblyConfig) -> Self {
        Self::new(root, config.assets.narration_dirs.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path as it should be stored in project files: relative to the
    /// project root when it lies inside it
    pub fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }

    /// Resolves a stored path against the project root
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// The segment's recorded file if it exists, otherwise the first
    /// conventionally named clip in the narration directories
    pub fn locate(&self, segment: &NarrationSegment) -> Option<PathBuf> {
        if let Some(recorded) = &segment.file_path {
            let path = self.resolve_path(recorded);
            if path.is_file() {
                return Some(path);
            }
        }

        let mut stems = vec![segment.id.clone()];
        if let Some(n) = segment.number() {
            stems.push(format!("segment_{n}"));
            stems.push(format!("main_aroll_segment_{n}"));
        }

        for dir in &self.dirs {
            let dir = self.root.join(dir);
            if !dir.is_dir() {
                continue;
            }
            for stem in &stems {
                for ext in VIDEO_EXTENSIONS {
                    let candidate = dir.join(format!("{stem}.{ext}"));
                    if candidate.is_file() {
                        return Some(candidate);
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_core::SegmentKind;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    fn touch(path: &Path, age_secs: u64) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
        let time = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 - age_secs);
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    fn resolver(root: &Path) -> AssetResolver {
        AssetResolver::from_config(root, &AssemblyConfig::default())
    }

    #[test]
    fn video_outranks_newer_image() {
        let dir = tempdir().unwrap();
        let broll = dir.path().join("media/broll");
        touch(&broll.join("broll_segment_2.mp4"), 3600);
        touch(&broll.join("broll_segment_2.png"), 10);

        let asset = resolver(dir.path()).resolve("segment_2").unwrap();
        assert_eq!(asset.kind, ContentKind::Video);
        assert_eq!(asset.path, broll.join("broll_segment_2.mp4"));
    }

    #[test]
    fn newest_image_wins_without_video() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("media/broll/image_3.jpg"), 600);
        touch(&dir.path().join("broll/fetched_broll_segment_3.png"), 60);

        let asset = resolver(dir.path()).resolve("segment_3").unwrap();
        assert_eq!(asset.path, dir.path().join("broll/fetched_broll_segment_3.png"));
        assert_eq!(asset.segment_id, "segment_3");
    }

    #[test]
    fn number_must_not_continue() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("media/broll/broll_segment_12.mp4"), 10);
        touch(&dir.path().join("media/broll/broll_segment_1_v2.png"), 10);

        let resolver = resolver(dir.path());
        let asset = resolver.resolve("segment_1").unwrap();
        assert_eq!(asset.kind, ContentKind::Image);
        assert_eq!(resolver.candidates("segment_1").len(), 1);
    }

    #[test]
    fn names_match_regardless_of_case() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("media/broll/Fetched_BROLL_Segment_7.mp4"), 10);
        touch(&dir.path().join("media/broll/IMAGE_70.png"), 10);

        let candidates = resolver(dir.path()).candidates("segment_7");
        assert_eq!(candidates.len(), 1);
        assert_eq!(
            candidates[0].path,
            dir.path().join("media/broll/Fetched_BROLL_Segment_7.mp4")
        );
    }

    #[test]
    fn ignores_unknown_extensions_and_missing_dirs() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("media/broll/broll_segment_4.txt"), 10);

        assert!(resolver(dir.path()).resolve("segment_4").is_none());
        assert!(resolver(dir.path()).resolve("segment_5").is_none());
    }

    #[test]
    fn equal_mtimes_resolve_deterministically() {
        let dir = tempdir().unwrap();
        let broll = dir.path().join("media/broll");
        touch(&broll.join("video_6.mp4"), 100);
        touch(&broll.join("broll_segment_6.mp4"), 100);

        let asset = resolver(dir.path()).resolve("segment_6").unwrap();
        assert_eq!(asset.path, broll.join("broll_segment_6.mp4"));
    }

    #[test]
    fn resolve_all_skips_unresolved() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("media/broll/broll_segment_1.png"), 10);

        let resolved = resolver(dir.path()).resolve_all(["segment_1", "segment_2"]);
        assert_eq!(resolved.len(), 1);
        assert!(resolved.contains_key("segment_1"));
    }

    #[test]
    fn locator_prefers_recorded_path() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("clips/intro.mov"), 10);
        touch(&dir.path().join("media/a-roll/segments/segment_0.mp4"), 10);

        let locator = NarrationLocator::from_config(dir.path(), &AssemblyConfig::default());
        let mut segment = NarrationSegment::new("segment_0", 0, SegmentKind::Narration, 0.0, 5.0);
        assert_eq!(
            locator.locate(&segment),
            Some(dir.path().join("media/a-roll/segments/segment_0.mp4"))
        );

        segment.file_path = Some(PathBuf::from("clips/intro.mov"));
        assert_eq!(locator.locate(&segment), Some(dir.path().join("clips/intro.mov")));
    }

    #[test]
    fn locator_finds_legacy_names() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("aroll/main_aroll_segment_2.webm"), 10);

        let locator = NarrationLocator::from_config(dir.path(), &AssemblyConfig::default());
        let segment = NarrationSegment::new("segment_2", 2, SegmentKind::Narration, 0.0, 5.0);
        assert_eq!(
            locator.locate(&segment),
            Some(dir.path().join("aroll/main_aroll_segment_2.webm"))
        );
    }
}

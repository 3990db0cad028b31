//! Frame-accurate render plans
//!
//! Entry boundaries are converted to frames from their cumulative time, not
//! from per-entry durations, so rounding never opens a gap or an overlap and
//! the frame total always matches the sequence length.

use crate::{FinalizedSequence, Result};
use reel_assembly::{ImageNormalizer, MotionClip};
use reel_core::config::RenderSettings;
use reel_core::{ContentKind, EntryKind};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// What fills the picture for one item
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderSource {
    /// The narration clip's own video
    Narration,
    /// A generated clip, trimmed or looped to fit
    Video { path: PathBuf },
    /// A still with motion
    Still { clip: MotionClip },
}

/// One timeline entry in output frames
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderItem {
    pub segment_id: String,
    pub source: RenderSource,
    /// Narration clip supplying the audio
    pub narration: Option<PathBuf>,
    pub start_frame: u64,
    /// Exclusive
    pub end_frame: u64,
}

impl RenderItem {
    pub fn frame_count(&self) -> u64 {
        self.end_frame - self.start_frame
    }
}

/// Everything an encoder needs to produce the final video
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderPlan {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub total_frames: u64,
    pub items: Vec<RenderItem>,
}

impl RenderPlan {
    /// Maps a finalized sequence to frames.
    ///
    /// Relative asset paths are resolved against `media_root`.
    pub fn build(
        finalized: &FinalizedSequence,
        media_root: &Path,
        settings: &RenderSettings,
        normalizer: &ImageNormalizer,
    ) -> Result<Self> {
        let fps = f64::from(settings.fps);
        let entries = finalized.sequence().entries();
        let origin = entries.first().map(|e| e.start_time).unwrap_or(0.0);
        let to_frame = |t: f64| ((t - origin) * fps).round().max(0.0) as u64;

        let mut items = Vec::with_capacity(entries.len());
        for entry in entries {
            let start_frame = to_frame(entry.start_time);
            let end_frame = to_frame(entry.end_time).max(start_frame);

            let source = match (entry.kind, entry.broll_path.as_deref()) {
                (EntryKind::PairedVisualWithNarrationAudio, Some(visual)) => {
                    let path = resolve(media_root, visual);
                    match ContentKind::from_path(&path) {
                        Some(ContentKind::Image) => RenderSource::Still {
                            clip: normalizer.to_clip(&path, entry.duration)?,
                        },
                        _ => RenderSource::Video { path },
                    }
                }
                _ => RenderSource::Narration,
            };

            items.push(RenderItem {
                segment_id: entry.segment_id.clone(),
                source,
                narration: entry.aroll_path.as_deref().map(|p| resolve(media_root, p)),
                start_frame,
                end_frame,
            });
        }

        let total_frames = items.last().map(|i| i.end_frame).unwrap_or(0);
        tracing::debug!(items = items.len(), total_frames, "render plan built");

        Ok(Self {
            fps: settings.fps,
            width: settings.width,
            height: settings.height,
            total_frames,
            items,
        })
    }

    pub fn duration_secs(&self) -> f64 {
        self.total_frames as f64 / f64::from(self.fps)
    }

    /// ffmpeg concat demuxer script listing each item's picture source.
    ///
    /// Items with nothing to show get a comment instead of a file line.
    pub fn to_concat_list(&self) -> String {
        let mut out = String::from("ffconcat version 1.0\n");
        for item in &self.items {
            let file = match &item.source {
                RenderSource::Narration => item.narration.as_deref(),
                RenderSource::Video { path } => Some(path.as_path()),
                RenderSource::Still { clip } => Some(clip.source.as_path()),
            };
            let seconds = item.frame_count() as f64 / f64::from(self.fps);
            match file {
                Some(path) => {
                    let _ = writeln!(out, "file '{}'", escape(path));
                    let _ = writeln!(out, "duration {seconds:.6}");
                }
                None => {
                    let _ = writeln!(out, "# {}: no source for {seconds:.6}s", item.segment_id);
                }
            }
        }
        out
    }

    pub fn write_concat_list(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_concat_list())?;
        Ok(())
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Quotes a path for a single-quoted concat line
fn escape(path: &Path) -> String {
    path.to_string_lossy().replace('\'', r"'\''")
}

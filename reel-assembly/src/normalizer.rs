//! Still images to fixed-duration motion clips
//!
//! A clip is a whole number of frames at the output rate, never shorter
//! than requested and at most one frame longer. Zoom and pan make stills
//! feel less static; they are derived from the file name so the same image
//! always moves the same way.

use crate::{Error, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageBuffer, Rgba, RgbaImage};
use reel_core::config::RenderSettings;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Slack for float noise when rounding durations up to whole frames
const FRAME_EPSILON: f64 = 1e-9;

/// Direction the crop window drifts over the clip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PanDirection {
    Center,
    Left,
    Right,
    Up,
    Down,
}

impl PanDirection {
    const ALL: [PanDirection; 5] = [
        PanDirection::Center,
        PanDirection::Left,
        PanDirection::Right,
        PanDirection::Up,
        PanDirection::Down,
    ];

    /// Horizontal and vertical position of the crop window within the free
    /// space, at progress `t` in `[0, 1]`
    fn offsets(&self, t: f64) -> (f64, f64) {
        match self {
            PanDirection::Center => (0.5, 0.5),
            PanDirection::Left => (1.0 - t, 0.5),
            PanDirection::Right => (t, 0.5),
            PanDirection::Up => (0.5, 1.0 - t),
            PanDirection::Down => (0.5, t),
        }
    }
}

/// A still image stretched over a number of frames
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MotionClip {
    pub source: PathBuf,
    pub source_width: u32,
    pub source_height: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub frame_count: u64,
    /// Clip length, `frame_count / fps`
    pub duration: f64,
    /// Duration that was asked for, before clamping and frame rounding
    pub requested: f64,
    pub zoom_start: f64,
    pub zoom_end: f64,
    pub pan: PanDirection,
}

impl MotionClip {
    fn progress(&self, frame: u64) -> f64 {
        if self.frame_count <= 1 {
            0.0
        } else {
            frame.min(self.frame_count - 1) as f64 / (self.frame_count - 1) as f64
        }
    }

    /// Source rectangle `(x, y, w, h)` shown at `frame`.
    ///
    /// The base rectangle is the largest one with the output aspect ratio
    /// that fits the source; zoom shrinks it and pan moves it around.
    pub fn crop_rect(&self, frame: u64) -> (u32, u32, u32, u32) {
        let t = self.progress(frame);
        let zoom = self.zoom_start + (self.zoom_end - self.zoom_start) * t;

        let (src_w, src_h) = (f64::from(self.source_width), f64::from(self.source_height));
        let target_aspect = f64::from(self.width) / f64::from(self.height);
        let (base_w, base_h) = if src_w / src_h > target_aspect {
            (src_h * target_aspect, src_h)
        } else {
            (src_w, src_w / target_aspect)
        };

        let crop_w = (base_w / zoom).max(1.0);
        let crop_h = (base_h / zoom).max(1.0);
        let (fx, fy) = self.pan.offsets(t);
        let x = (src_w - base_w) / 2.0 + fx * (base_w - crop_w);
        let y = (src_h - base_h) / 2.0 + fy * (base_h - crop_h);

        let w = (crop_w.round() as u32).clamp(1, self.source_width);
        let h = (crop_h.round() as u32).clamp(1, self.source_height);
        let x = (x.round().max(0.0) as u32).min(self.source_width - w);
        let y = (y.round().max(0.0) as u32).min(self.source_height - h);
        (x, y, w, h)
    }

    /// Renders one output frame from the decoded source image
    pub fn render_frame(&self, source: &DynamicImage, frame: u64) -> RgbaImage {
        let (x, y, w, h) = self.crop_rect(frame);
        let cropped = source.crop_imm(x, y, w, h).to_rgba8();
        let scaled = imageops::resize(&cropped, self.width, self.height, FilterType::Triangle);

        let mut canvas = ImageBuffer::from_pixel(self.width, self.height, Rgba([0, 0, 0, 255]));
        imageops::overlay(&mut canvas, &scaled, 0, 0);
        canvas
    }

    /// Writes every frame as `frame_NNNNNN.png` into `dir`
    pub fn write_frames(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;
        let source = image::open(&self.source).map_err(|source| Error::Image {
            path: self.source.clone(),
            source,
        })?;

        let mut written = Vec::with_capacity(self.frame_count as usize);
        for frame in 0..self.frame_count {
            let path = dir.join(format!("frame_{frame:06}.png"));
            self.render_frame(&source, frame)
                .save(&path)
                .map_err(|source| Error::Image {
                    path: path.clone(),
                    source,
                })?;
            written.push(path);
        }
        tracing::debug!(
            source = %self.source.display(),
            frames = written.len(),
            "motion clip frames written"
        );
        Ok(written)
    }
}

/// Turns stills into [`MotionClip`]s at the configured output format
#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    settings: RenderSettings,
}

impl ImageNormalizer {
    pub fn new(settings: RenderSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Shortest clip a still can become: the configured minimum, but never
    /// less than one frame
    pub fn floor(&self) -> f64 {
        self.settings.min_clip_secs.max(self.settings.frame_secs())
    }

    /// Number of frames covering `duration` once clamped to the floor
    pub fn frame_count(&self, duration: f64) -> u64 {
        let clamped = if duration.is_finite() {
            duration.max(self.floor())
        } else {
            self.floor()
        };
        let frames = (clamped * f64::from(self.settings.fps) - FRAME_EPSILON).ceil();
        (frames as u64).max(1)
    }

    /// Output duration for a request, without touching any file
    pub fn clip_duration(&self, duration: f64) -> f64 {
        self.frame_count(duration) as f64 / f64::from(self.settings.fps)
    }

    /// Builds a motion clip for `image_path` lasting at least `duration`
    pub fn to_clip(&self, image_path: &Path, duration: f64) -> Result<MotionClip> {
        let (source_width, source_height) =
            image::image_dimensions(image_path).map_err(|source| Error::Image {
                path: image_path.to_path_buf(),
                source,
            })?;

        if !(duration.is_finite() && duration > 0.0) {
            tracing::warn!(
                path = %image_path.display(),
                duration,
                floor = self.floor(),
                "clamping degenerate still duration"
            );
        }

        let frame_count = self.frame_count(duration);
        let seed = name_seed(image_path);
        let pan = PanDirection::ALL[(seed % PanDirection::ALL.len() as u64) as usize];
        // Alternate zooming in and out
        let (zoom_start, zoom_end) = if (seed >> 8) % 2 == 0 {
            (1.0, 1.0 + self.settings.zoom)
        } else {
            (1.0 + self.settings.zoom, 1.0)
        };

        Ok(MotionClip {
            source: image_path.to_path_buf(),
            source_width,
            source_height,
            width: self.settings.width,
            height: self.settings.height,
            fps: self.settings.fps,
            frame_count,
            duration: frame_count as f64 / f64::from(self.settings.fps),
            requested: duration,
            zoom_start,
            zoom_end,
            pan,
        })
    }
}

/// FNV-1a over the file name
fn name_seed(path: &Path) -> u64 {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

//! Compositor boundary
//!
//! A compositor turns a [`RenderPlan`] into output on disk. The crate ships
//! [`PlanWriter`], which hands the plan to an external encoder as files.

use crate::{RenderPlan, RenderSource, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Consumes render plans
pub trait Compositor {
    fn name(&self) -> &'static str;

    /// Renders `plan` into `output`, returning the main artifact
    fn render(&self, plan: &RenderPlan, output: &Path) -> Result<PathBuf>;
}

/// Writes `render_plan.json` and `concat.txt`, and optionally the frames of
/// every still under `frames/<segment_id>/`
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanWriter {
    write_frames: bool,
}

impl PlanWriter {
    pub const PLAN_FILE: &'static str = "render_plan.json";
    pub const CONCAT_FILE: &'static str = "concat.txt";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frames(mut self, write_frames: bool) -> Self {
        self.write_frames = write_frames;
        self
    }
}

impl Compositor for PlanWriter {
    fn name(&self) -> &'static str {
        "plan-writer"
    }

    fn render(&self, plan: &RenderPlan, output: &Path) -> Result<PathBuf> {
        fs::create_dir_all(output)?;

        let plan_path = output.join(Self::PLAN_FILE);
        fs::write(&plan_path, serde_json::to_string_pretty(plan)?)?;
        plan.write_concat_list(&output.join(Self::CONCAT_FILE))?;

        if self.write_frames {
            for item in &plan.items {
                if let RenderSource::Still { clip } = &item.source {
                    // The encoder stops at the item's frame count
                    clip.write_frames(&output.join("frames").join(&item.segment_id))?;
                }
            }
        }

        tracing::info!(
            output = %output.display(),
            items = plan.items.len(),
            frames = plan.total_frames,
            "render plan written"
        );
        Ok(plan_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FinalizedSequence;
    use image::{ImageBuffer, Rgba};
    use reel_assembly::ImageNormalizer;
    use reel_core::config::RenderSettings;
    use reel_core::{Sequence, TimelineEntry};
    use tempfile::tempdir;

    fn small_settings() -> RenderSettings {
        RenderSettings {
            fps: 10,
            width: 8,
            height: 16,
            ..RenderSettings::default()
        }
    }

    fn plan_with_still(root: &Path) -> RenderPlan {
        let still = root.join("still.png");
        ImageBuffer::from_pixel(32, 32, Rgba([200u8, 10, 10, 255]))
            .save(&still)
            .unwrap();

        let sequence = Sequence::new(vec![
            TimelineEntry::paired("segment_1", "still.png", 0.0, 0.5),
            TimelineEntry::narration("segment_2", 0.5, 1.0).with_narration_path("segment_2.mp4"),
        ]);
        let finalized = FinalizedSequence::new(sequence, Some(1.5), 0.5).unwrap();
        let settings = small_settings();
        RenderPlan::build(&finalized, root, &settings, &ImageNormalizer::new(settings.clone()))
            .unwrap()
    }

    #[test]
    fn writes_plan_and_concat_list() {
        let dir = tempdir().unwrap();
        let plan = plan_with_still(dir.path());
        let output = dir.path().join("out");

        let written = PlanWriter::new().render(&plan, &output).unwrap();

        assert_eq!(written, output.join(PlanWriter::PLAN_FILE));
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&written).unwrap()).unwrap();
        assert_eq!(json["total_frames"], 15);
        assert_eq!(json["items"][0]["source"]["kind"], "still");
        assert_eq!(json["items"][1]["source"]["kind"], "narration");

        let concat = fs::read_to_string(output.join(PlanWriter::CONCAT_FILE)).unwrap();
        assert!(concat.contains("segment_2.mp4"));
        assert!(!output.join("frames").exists());
    }

    #[test]
    fn writes_still_frames_on_request() {
        let dir = tempdir().unwrap();
        let plan = plan_with_still(dir.path());
        let output = dir.path().join("out");

        PlanWriter::new()
            .with_frames(true)
            .render(&plan, &output)
            .unwrap();

        let frames: Vec<_> = fs::read_dir(output.join("frames/segment_1"))
            .unwrap()
            .collect();
        assert_eq!(frames.len(), 5);
        let first = image::open(output.join("frames/segment_1/frame_000000.png")).unwrap();
        assert_eq!((first.width(), first.height()), (8, 16));
    }
}

//! Assembly configuration, read from `reel.toml`
//!
//! Every field has a default, so a missing file or a partial file is fine.
//! Values are validated after parsing.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name looked up in the project root
pub const CONFIG_FILE_NAME: &str = "reel.toml";

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    pub timeline: TimelineSettings,
    pub probe: ProbeSettings,
    pub assets: AssetSettings,
    pub render: RenderSettings,
}

/// Duration bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineSettings {
    /// Allowed drift between the timeline total and the narration total
    pub tolerance_secs: f64,
    /// Last-resort duration for a segment nothing else can measure
    pub default_segment_secs: f64,
}

impl Default for TimelineSettings {
    fn default() -> Self {
        Self {
            tolerance_secs: 0.5,
            default_segment_secs: 5.0,
        }
    }
}

/// External duration probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Explicit ffprobe binary; looked up on `PATH` when unset
    pub ffprobe_path: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            ffprobe_path: None,
            timeout_secs: 10,
        }
    }
}

/// Where generated visuals and narration sub-clips live, relative to the
/// project root, in priority order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetSettings {
    pub broll_dirs: Vec<PathBuf>,
    pub narration_dirs: Vec<PathBuf>,
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            broll_dirs: ["media/broll", "media/b-roll", "broll"]
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            narration_dirs: ["media/a-roll/segments", "media/a-roll", "media/aroll", "aroll"]
                .into_iter()
                .map(PathBuf::from)
                .collect(),
        }
    }
}

/// Output geometry and still-image motion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    /// Shortest clip a still may become
    pub min_clip_secs: f64,
    /// Extra zoom applied over a still's duration (0.08 = 8%)
    pub zoom: f64,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            fps: 30,
            width: 1080,
            height: 1920,
            min_clip_secs: 0.1,
            zoom: 0.08,
        }
    }
}

impl RenderSettings {
    /// Duration of one frame in seconds
    pub fn frame_secs(&self) -> f64 {
        1.0 / f64::from(self.fps)
    }
}

impl AssemblyConfig {
    /// Loads and validates a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| Error::InvalidConfig {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate(path)?;
        Ok(config)
    }

    /// Loads `reel.toml` from the project root, or defaults when absent
    pub fn load_or_default(project_root: &Path) -> Result<Self> {
        let path = project_root.join(CONFIG_FILE_NAME);
        if path.exists() {
            tracing::debug!(path = %path.display(), "loading config");
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let invalid = |message: &str| Error::InvalidConfig {
            path: path.to_path_buf(),
            message: message.to_string(),
        };

        if self.render.fps == 0 {
            return Err(invalid("render.fps must be positive"));
        }
        if self.render.width == 0 || self.render.height == 0 {
            return Err(invalid("render.width and render.height must be positive"));
        }
        if !(self.render.min_clip_secs > 0.0) {
            return Err(invalid("render.min_clip_secs must be positive"));
        }
        if !(self.timeline.tolerance_secs >= 0.0) {
            return Err(invalid("timeline.tolerance_secs must not be negative"));
        }
        if !(self.timeline.default_segment_secs > 0.0) {
            return Err(invalid("timeline.default_segment_secs must be positive"));
        }
        if self.probe.timeout_secs == 0 {
            return Err(invalid("probe.timeout_secs must be positive"));
        }
        Ok(())
    }
}

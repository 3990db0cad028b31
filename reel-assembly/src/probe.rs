//! Media duration probes
//!
//! [`FfprobeProbe`] shells out to `ffprobe`; with the `ffmpeg` feature,
//! [`FfmpegProbe`] reads the container in-process instead.

use crate::command::ToolCommand;
use reel_core::config::ProbeSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Why a duration could not be measured
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("media file not found: {0}")]
    NotFound(PathBuf),

    #[error("{tool}: {message}")]
    Tool { tool: String, message: String },

    #[error("{tool} timed out after {timeout:?}")]
    Timeout { tool: String, timeout: Duration },

    #[error("unreadable probe output for {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Something that can measure how long a media file plays
pub trait MediaProbe {
    /// Short name for diagnostics
    fn name(&self) -> &'static str;

    /// Duration of the file in seconds
    fn probe_duration(&self, path: &Path) -> Result<f64, ProbeError>;
}

/// Probe backed by the `ffprobe` CLI
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    ffprobe_path: PathBuf,
    timeout: Duration,
}

impl FfprobeProbe {
    pub fn new(ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Finds `ffprobe` on `PATH`
    pub fn from_path() -> Option<Self> {
        which::which("ffprobe").ok().map(Self::new)
    }

    /// Uses the configured binary, falling back to `PATH`
    pub fn from_settings(settings: &ProbeSettings) -> Option<Self> {
        let probe = match &settings.ffprobe_path {
            Some(path) => Some(Self::new(path)),
            None => Self::from_path(),
        };
        probe.map(|p| p.with_timeout(Duration::from_secs(settings.timeout_secs)))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Extracts `format.duration` from `ffprobe -print_format json` output
fn parse_ffprobe_duration(path: &Path, stdout: &str) -> Result<f64, ProbeError> {
    let parse_error = |message: String| ProbeError::Parse {
        path: path.to_path_buf(),
        message,
    };
    let output: FfprobeOutput =
        serde_json::from_str(stdout).map_err(|e| parse_error(e.to_string()))?;
    let raw = output
        .format
        .and_then(|f| f.duration)
        .ok_or_else(|| parse_error("no format duration".into()))?;
    raw.trim()
        .parse::<f64>()
        .map_err(|e| parse_error(format!("bad duration {raw:?}: {e}")))
}

impl MediaProbe for FfprobeProbe {
    fn name(&self) -> &'static str {
        "ffprobe"
    }

    fn probe_duration(&self, path: &Path) -> Result<f64, ProbeError> {
        if !path.is_file() {
            return Err(ProbeError::NotFound(path.to_path_buf()));
        }
        let output = ToolCommand::new(self.ffprobe_path.clone())
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(path.to_string_lossy())
            .timeout(self.timeout)
            .execute_blocking()?;
        parse_ffprobe_duration(path, &output.stdout)
    }
}

/// Probe used when no tool is available; every call fails, so duration
/// reconciliation falls through to the catalog tiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProbe;

impl MediaProbe for NoProbe {
    fn name(&self) -> &'static str {
        "none"
    }

    fn probe_duration(&self, path: &Path) -> Result<f64, ProbeError> {
        if !path.is_file() {
            return Err(ProbeError::NotFound(path.to_path_buf()));
        }
        Err(ProbeError::Tool {
            tool: self.name().into(),
            message: "no media probe available".into(),
        })
    }
}

#[cfg(feature = "ffmpeg")]
mod in_process {
    use super::{MediaProbe, ProbeError};
    use ffmpeg_next as ffmpeg;
    use std::path::Path;
    use std::sync::Once;

    static FFMPEG_INIT: Once = Once::new();

    /// Probe that opens the container with libavformat
    #[derive(Debug, Clone, Copy, Default)]
    pub struct FfmpegProbe;

    impl MediaProbe for FfmpegProbe {
        fn name(&self) -> &'static str {
            "ffmpeg"
        }

        fn probe_duration(&self, path: &Path) -> Result<f64, ProbeError> {
            if !path.is_file() {
                return Err(ProbeError::NotFound(path.to_path_buf()));
            }
            FFMPEG_INIT.call_once(|| {
                if let Err(e) = ffmpeg::init() {
                    tracing::error!("failed to initialize FFmpeg: {e}");
                }
            });

            let tool_error = |message: String| ProbeError::Tool {
                tool: "ffmpeg".into(),
                message,
            };
            let input = ffmpeg::format::input(&path).map_err(|e| tool_error(e.to_string()))?;

            // Prefer the best video stream's own duration
            if let Some(stream) = input.streams().best(ffmpeg::media::Type::Video) {
                let time_base = stream.time_base();
                if stream.duration() > 0 && time_base.denominator() != 0 {
                    return Ok(stream.duration() as f64 * f64::from(time_base.numerator())
                        / f64::from(time_base.denominator()));
                }
            }

            if input.duration() > 0 {
                Ok(input.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE))
            } else {
                Err(ProbeError::Parse {
                    path: path.to_path_buf(),
                    message: "container reports no duration".into(),
                })
            }
        }
    }
}

#[cfg(feature = "ffmpeg")]
pub use in_process::FfmpegProbe;

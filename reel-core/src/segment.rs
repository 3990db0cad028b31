//! Narration segments and the segment catalog

use crate::{segment_number, Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Whether a narration segment also carries a paired visual
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    #[serde(alias = "A-Roll", alias = "aroll")]
    Narration,
    #[serde(alias = "B-Roll", alias = "broll")]
    PairedVisual,
}

/// One chunk of narration, as produced by the segmentation step.
///
/// Times are seconds into the source narration audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrationSegment {
    #[serde(alias = "segment_id")]
    pub id: String,
    /// Ordinal position; defaults to the position in the catalog file
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(alias = "type")]
    pub kind: SegmentKind,
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub end_time: f64,
    #[serde(default, alias = "content", skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Duration recorded by an earlier run or by the segmentation step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Narration sub-clip for this segment, relative to the project root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
}

impl NarrationSegment {
    /// Creates a segment with the given bounds
    pub fn new(
        id: impl Into<String>,
        index: usize,
        kind: SegmentKind,
        start_time: f64,
        end_time: f64,
    ) -> Self {
        Self {
            id: id.into(),
            index: Some(index),
            kind,
            start_time,
            end_time,
            text: None,
            duration: None,
            file_path: None,
        }
    }

    /// Length of the segment's slice of the source narration
    pub fn span(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Numeric suffix of the id, used to match asset file names
    pub fn number(&self) -> Option<u32> {
        segment_number(&self.id)
    }

    pub fn ordinal(&self) -> usize {
        self.index.unwrap_or(0)
    }

    pub fn is_paired_visual(&self) -> bool {
        self.kind == SegmentKind::PairedVisual
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    segments: Vec<NarrationSegment>,
    #[serde(default)]
    total_duration: Option<f64>,
}

/// Ordered list of narration segments for one project
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentCatalog {
    segments: Vec<NarrationSegment>,
    total_duration: Option<f64>,
}

impl SegmentCatalog {
    /// Builds a catalog, filling missing ordinals from position and sorting.
    pub fn new(mut segments: Vec<NarrationSegment>) -> Self {
        for (position, segment) in segments.iter_mut().enumerate() {
            if segment.index.is_none() {
                segment.index = Some(position);
            }
        }
        // Stable, so equal ordinals keep file order
        segments.sort_by_key(|s| s.ordinal());
        Self {
            segments,
            total_duration: None,
        }
    }

    /// Sets the known narration total, overriding the value derived from
    /// segment bounds.
    pub fn with_total_duration(mut self, total: f64) -> Self {
        self.total_duration = Some(total);
        self
    }

    /// Loads a catalog from a `script.json` style file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::MissingFile(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        Self::parse(path, &content)
    }

    /// Parses catalog JSON; `path` is only used for error reporting
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(content).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })?;
        let mut catalog = Self::new(file.segments);
        catalog.total_duration = file.total_duration.filter(|t| t.is_finite() && *t > 0.0);
        Ok(catalog)
    }

    pub fn segments(&self) -> &[NarrationSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, segment_id: &str) -> Option<&NarrationSegment> {
        self.segments.iter().find(|s| s.id == segment_id)
    }

    pub fn paired_visual_segments(&self) -> impl Iterator<Item = &NarrationSegment> {
        self.segments.iter().filter(|s| s.is_paired_visual())
    }

    pub fn paired_visual_count(&self) -> usize {
        self.paired_visual_segments().count()
    }

    pub fn paired_visual_ids(&self) -> Vec<String> {
        self.paired_visual_segments().map(|s| s.id.clone()).collect()
    }

    /// Known total narration duration.
    ///
    /// Uses the explicit total when the catalog carries one, otherwise the
    /// distance from the first segment start to the last segment end, and
    /// finally the sum of positive spans.
    pub fn narration_total(&self) -> Option<f64> {
        if let Some(total) = self.total_duration {
            return Some(total);
        }
        let first = self.segments.first()?;
        let last = self.segments.last()?;
        let bounds = last.end_time - first.start_time;
        if bounds.is_finite() && bounds > 0.0 {
            return Some(bounds);
        }
        let summed: f64 = self
            .segments
            .iter()
            .map(NarrationSegment::span)
            .filter(|s| s.is_finite() && *s > 0.0)
            .sum();
        (summed > 0.0).then_some(summed)
    }
}

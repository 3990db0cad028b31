//! Timeline data structures: entries, sequences and their invariants

use crate::{ContentKind, TIME_EPSILON};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How a timeline entry is rendered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Narration video and audio as-is
    #[default]
    #[serde(rename = "aroll_full")]
    NarrationOnly,
    /// Paired visual on screen, narration audio underneath
    #[serde(rename = "broll_with_aroll_audio")]
    PairedVisualWithNarrationAudio,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::NarrationOnly => "aroll_full",
            EntryKind::PairedVisualWithNarrationAudio => "broll_with_aroll_audio",
        }
    }
}

/// One slot of the output timeline, bound to exactly one narration segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    #[serde(default)]
    pub segment_id: String,
    #[serde(rename = "type", default)]
    pub kind: EntryKind,
    /// Narration sub-clip providing the audio
    #[serde(default)]
    pub aroll_path: Option<PathBuf>,
    /// Paired visual shown over the narration audio
    #[serde(default)]
    pub broll_path: Option<PathBuf>,
    /// Start time on the output timeline in seconds
    #[serde(default)]
    pub start_time: f64,
    /// End time on the output timeline in seconds
    #[serde(default)]
    pub end_time: f64,
    #[serde(default)]
    pub duration: f64,
    /// Ordinal position; implied by array order when persisted
    #[serde(skip)]
    pub position: usize,
    /// Keys written by other tools, carried through untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TimelineEntry {
    /// Creates a narration-only entry
    pub fn narration(segment_id: impl Into<String>, start_time: f64, duration: f64) -> Self {
        Self {
            segment_id: segment_id.into(),
            kind: EntryKind::NarrationOnly,
            aroll_path: None,
            broll_path: None,
            start_time,
            end_time: start_time + duration,
            duration,
            position: 0,
            extra: serde_json::Map::new(),
        }
    }

    /// Creates an entry showing `visual` over the segment's narration audio
    pub fn paired(
        segment_id: impl Into<String>,
        visual: impl Into<PathBuf>,
        start_time: f64,
        duration: f64,
    ) -> Self {
        Self {
            kind: EntryKind::PairedVisualWithNarrationAudio,
            broll_path: Some(visual.into()),
            ..Self::narration(segment_id, start_time, duration)
        }
    }

    pub fn with_narration_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.aroll_path = Some(path.into());
        self
    }

    /// Checks if this entry is active at the given timestamp
    pub fn is_active(&self, timestamp: f64) -> bool {
        timestamp >= self.start_time && timestamp < self.end_time
    }

    /// Returns `end_time - start_time`
    pub fn span(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Kind of the paired visual, judged by its extension
    pub fn asset_kind(&self) -> Option<ContentKind> {
        self.broll_path.as_deref().and_then(ContentKind::from_path)
    }

    pub fn has_valid_duration(&self) -> bool {
        self.duration.is_finite() && self.duration > TIME_EPSILON
    }
}

/// A broken timeline invariant
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("entry {index} starts at {start:.3}s, before the previous entry")]
    Unsorted { index: usize, start: f64 },

    #[error("gap of {gap:.3}s before entry {index}")]
    Gap { index: usize, gap: f64 },

    #[error("entry {index} overlaps the previous entry by {overlap:.3}s")]
    Overlap { index: usize, overlap: f64 },

    #[error("entry {index} ({segment_id}) has non-positive duration {duration}")]
    NonPositiveDuration {
        index: usize,
        segment_id: String,
        duration: f64,
    },

    #[error("entry {index} duration {duration:.3}s does not match its span {span:.3}s")]
    DurationMismatch {
        index: usize,
        duration: f64,
        span: f64,
    },

    #[error("entry {index} starts before zero ({start:.3}s)")]
    NegativeStart { index: usize, start: f64 },

    #[error("entry {index} ({segment_id}) is paired but has no visual")]
    MissingVisual { index: usize, segment_id: String },

    #[error("first segment {segment_id} is repeated at the end")]
    DuplicateBoundary { segment_id: String },

    #[error("total duration {total:.3}s differs from narration {expected:.3}s")]
    TotalDrift { total: f64, expected: f64 },
}

impl InvariantViolation {
    /// Everything but total drift makes a sequence unfit for rendering.
    pub fn is_structural(&self) -> bool {
        !matches!(self, InvariantViolation::TotalDrift { .. })
    }
}

/// Ordered, duration-consistent list of timeline entries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sequence {
    entries: Vec<TimelineEntry>,
}

impl Sequence {
    /// Creates a sequence from entries in timeline order
    pub fn new(entries: Vec<TimelineEntry>) -> Self {
        let mut sequence = Self { entries };
        sequence.renumber();
        sequence
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut Vec<TimelineEntry> {
        &mut self.entries
    }

    pub fn into_entries(self) -> Vec<TimelineEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self) -> Option<&TimelineEntry> {
        self.entries.first()
    }

    pub fn last(&self) -> Option<&TimelineEntry> {
        self.entries.last()
    }

    /// Appends an entry, assigning its ordinal position
    pub fn push(&mut self, mut entry: TimelineEntry) {
        entry.position = self.entries.len();
        self.entries.push(entry);
    }

    pub fn contains_segment(&self, segment_id: &str) -> bool {
        self.entries.iter().any(|e| e.segment_id == segment_id)
    }

    /// Sum of entry durations
    pub fn total_duration(&self) -> f64 {
        self.entries.iter().map(|e| e.duration).sum()
    }

    /// Timeline end, i.e. the last entry's end time
    pub fn end_time(&self) -> f64 {
        self.entries.last().map(|e| e.end_time).unwrap_or(0.0)
    }

    /// Gets all entries active at a given timestamp
    pub fn active_at(&self, timestamp: f64) -> Vec<&TimelineEntry> {
        self.entries.iter().filter(|e| e.is_active(timestamp)).collect()
    }

    /// Rewrites ordinal positions to match the current order
    pub fn renumber(&mut self) {
        for (position, entry) in self.entries.iter_mut().enumerate() {
            entry.position = position;
        }
    }

    /// Whether the first segment id reappears as the last entry
    pub fn has_duplicate_boundary(&self) -> bool {
        match (self.entries.first(), self.entries.last()) {
            (Some(first), Some(last)) if self.entries.len() > 1 => {
                first.segment_id == last.segment_id
            }
            _ => false,
        }
    }

    /// Chains entries end to start beginning at `origin`, keeping durations.
    ///
    /// Returns how many entries had their start or end moved.
    pub fn retime(&mut self, origin: f64) -> usize {
        let mut cursor = origin;
        let mut moved = 0;
        for entry in &mut self.entries {
            let end = cursor + entry.duration;
            if (entry.start_time - cursor).abs() > TIME_EPSILON
                || (entry.end_time - end).abs() > TIME_EPSILON
            {
                moved += 1;
            }
            entry.start_time = cursor;
            entry.end_time = end;
            cursor = end;
        }
        moved
    }

    /// Collects every broken invariant.
    ///
    /// `expected_total` enables the drift check against the narration length.
    pub fn violations(
        &self,
        expected_total: Option<f64>,
        tolerance: f64,
    ) -> Vec<InvariantViolation> {
        let mut found = Vec::new();

        for (index, entry) in self.entries.iter().enumerate() {
            if entry.start_time < -TIME_EPSILON {
                found.push(InvariantViolation::NegativeStart {
                    index,
                    start: entry.start_time,
                });
            }
            if !entry.has_valid_duration() {
                found.push(InvariantViolation::NonPositiveDuration {
                    index,
                    segment_id: entry.segment_id.clone(),
                    duration: entry.duration,
                });
            } else if (entry.duration - entry.span()).abs() > TIME_EPSILON {
                found.push(InvariantViolation::DurationMismatch {
                    index,
                    duration: entry.duration,
                    span: entry.span(),
                });
            }
            if entry.kind == EntryKind::PairedVisualWithNarrationAudio
                && entry.broll_path.is_none()
            {
                found.push(InvariantViolation::MissingVisual {
                    index,
                    segment_id: entry.segment_id.clone(),
                });
            }
        }

        for (offset, pair) in self.entries.windows(2).enumerate() {
            let (prev, next) = (&pair[0], &pair[1]);
            let index = offset + 1;
            if next.start_time < prev.start_time - TIME_EPSILON {
                found.push(InvariantViolation::Unsorted {
                    index,
                    start: next.start_time,
                });
            }
            let delta = next.start_time - prev.end_time;
            if delta > TIME_EPSILON {
                found.push(InvariantViolation::Gap { index, gap: delta });
            } else if delta < -TIME_EPSILON {
                found.push(InvariantViolation::Overlap {
                    index,
                    overlap: -delta,
                });
            }
        }

        if self.has_duplicate_boundary() {
            found.push(InvariantViolation::DuplicateBoundary {
                segment_id: self.entries[0].segment_id.clone(),
            });
        }

        if let Some(expected) = expected_total {
            let total = self.total_duration();
            if (total - expected).abs() > tolerance {
                found.push(InvariantViolation::TotalDrift { total, expected });
            }
        }

        found
    }

    /// True when nothing but total drift is wrong
    pub fn is_structurally_valid(&self) -> bool {
        self.violations(None, 0.0).is_empty()
    }
}

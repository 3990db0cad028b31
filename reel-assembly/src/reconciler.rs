//! Authoritative segment durations
//!
//! Narration paces the output, so every duration comes from the narration
//! side. Tiers are tried in order and the first usable value wins:
//!
//! 1. the located narration sub-clip, probed
//! 2. the segment's bounds in the catalog
//! 3. a previously recorded duration
//! 4. the configured default
//!
//! Values that are not finite or not positive are never used.

use crate::probe::MediaProbe;
use crate::resolver::NarrationLocator;
use reel_core::config::TimelineSettings;
use reel_core::{NarrationSegment, TimelineEntry, TIME_EPSILON};
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Which source a duration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationTier {
    Probed,
    SegmentSpan,
    Recorded,
    Default,
}

impl DurationTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            DurationTier::Probed => "probed",
            DurationTier::SegmentSpan => "segment_span",
            DurationTier::Recorded => "recorded",
            DurationTier::Default => "default",
        }
    }
}

impl fmt::Display for DurationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A duration and the tier that produced it
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReconciledDuration {
    pub seconds: f64,
    pub tier: DurationTier,
}

fn usable(value: f64) -> Option<f64> {
    (value.is_finite() && value > TIME_EPSILON).then_some(value)
}

/// Computes target durations for segments and persisted entries
pub struct DurationReconciler {
    probe: Box<dyn MediaProbe>,
    locator: NarrationLocator,
    default_secs: f64,
    tolerance: f64,
}

impl DurationReconciler {
    pub fn new(
        probe: Box<dyn MediaProbe>,
        locator: NarrationLocator,
        settings: &TimelineSettings,
    ) -> Self {
        Self {
            probe,
            locator,
            default_secs: settings.default_segment_secs,
            tolerance: settings.tolerance_secs,
        }
    }

    /// Allowed difference between a stored and a reconciled duration
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn locator(&self) -> &NarrationLocator {
        &self.locator
    }

    pub fn probe_name(&self) -> &'static str {
        self.probe.name()
    }

    /// Duration for a catalog segment
    pub fn target_duration(&self, segment: &NarrationSegment) -> ReconciledDuration {
        let probed = self
            .locator
            .locate(segment)
            .and_then(|path| self.probe_file(&segment.id, &path));
        let reconciled = self.pick(
            &segment.id,
            probed,
            usable(segment.span()),
            segment.duration.and_then(usable),
        );
        tracing::debug!(
            segment_id = %segment.id,
            tier = %reconciled.tier,
            seconds = reconciled.seconds,
            "duration reconciled"
        );
        reconciled
    }

    /// Duration for an already persisted entry.
    ///
    /// The entry's own narration path is probed first, then the catalog
    /// segment's clip. The entry's stored duration (or its span) counts as
    /// the recorded value.
    pub fn duration_for_entry(
        &self,
        entry: &TimelineEntry,
        segment: Option<&NarrationSegment>,
    ) -> ReconciledDuration {
        let probed = entry
            .aroll_path
            .as_deref()
            .map(|p| self.locator.resolve_path(p))
            .filter(|p| p.is_file())
            .or_else(|| segment.and_then(|s| self.locator.locate(s)))
            .and_then(|path| self.probe_file(&entry.segment_id, &path));

        let span = segment.and_then(|s| usable(s.span()));
        let recorded = usable(entry.duration)
            .or_else(|| usable(entry.span()))
            .or_else(|| segment.and_then(|s| s.duration).and_then(usable));

        let reconciled = self.pick(&entry.segment_id, probed, span, recorded);
        tracing::debug!(
            segment_id = %entry.segment_id,
            tier = %reconciled.tier,
            seconds = reconciled.seconds,
            "entry duration reconciled"
        );
        reconciled
    }

    fn probe_file(&self, segment_id: &str, path: &Path) -> Option<f64> {
        match self.probe.probe_duration(path) {
            Ok(seconds) => {
                let value = usable(seconds);
                if value.is_none() {
                    tracing::warn!(
                        segment_id,
                        path = %path.display(),
                        seconds,
                        "probe returned a degenerate duration"
                    );
                }
                value
            }
            Err(e) => {
                tracing::warn!(
                    segment_id,
                    path = %path.display(),
                    probe = self.probe.name(),
                    "probe failed: {e}"
                );
                None
            }
        }
    }

    fn pick(
        &self,
        segment_id: &str,
        probed: Option<f64>,
        span: Option<f64>,
        recorded: Option<f64>,
    ) -> ReconciledDuration {
        let tiers = [
            (probed, DurationTier::Probed),
            (span, DurationTier::SegmentSpan),
            (recorded, DurationTier::Recorded),
        ];
        for (value, tier) in tiers {
            if let Some(seconds) = value {
                return ReconciledDuration { seconds, tier };
            }
        }
        tracing::warn!(
            segment_id,
            seconds = self.default_secs,
            "no usable duration, using default"
        );
        ReconciledDuration {
            seconds: self.default_secs,
            tier: DurationTier::Default,
        }
    }
}

impl fmt::Debug for DurationReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurationReconciler")
            .field("probe", &self.probe.name())
            .field("locator", &self.locator)
            .field("default_secs", &self.default_secs)
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

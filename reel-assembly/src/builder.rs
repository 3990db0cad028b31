//! Sequence builder: catalog plus resolved assets to a contiguous timeline

use crate::normalizer::ImageNormalizer;
use crate::reconciler::{DurationReconciler, DurationTier};
use crate::repairer::{RepairReport, SequenceRepairer};
use crate::resolver::AssetResolver;
use crate::Result;
use reel_core::{
    ContentKind, EntryKind, NarrationSegment, ProjectStore, SegmentCatalog, Sequence,
    TimelineEntry, VisualAsset,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Why a paired segment ended up narration-only
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Fallback {
    /// No visual matched the segment
    MissingAsset,
    /// A still matched but could not be read
    UnreadableImage { path: PathBuf, message: String },
}

/// Diagnostics for one built entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryReport {
    pub segment_id: String,
    pub kind: EntryKind,
    pub duration: f64,
    pub tier: DurationTier,
    pub fallback: Option<Fallback>,
}

/// Diagnostics for a whole build
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildReport {
    pub entries: Vec<EntryReport>,
    /// Entries carried over from a seed sequence
    pub seeded: usize,
    /// Trailing entries removed because they repeated the first segment
    pub dropped_duplicates: usize,
    pub total_duration: f64,
    /// Known narration length, when the catalog has one
    pub expected_total: Option<f64>,
    /// `total_duration - expected_total`
    pub drift: Option<f64>,
}

impl BuildReport {
    pub fn fallbacks(&self) -> impl Iterator<Item = &EntryReport> {
        self.entries.iter().filter(|e| e.fallback.is_some())
    }

    pub fn within_tolerance(&self, tolerance: f64) -> bool {
        self.drift.map_or(true, |d| d.abs() <= tolerance)
    }
}

/// A built sequence and how it came to be
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub sequence: Sequence,
    pub report: BuildReport,
}

/// A project's main sequence after [`SequenceBuilder::build_project`]
#[derive(Debug, Clone)]
pub struct ProjectBuild {
    pub sequence: Sequence,
    /// Present when the sequence was built rather than read from the cache
    pub build: Option<BuildReport>,
    /// Stale caches removed, fixes applied and backups written
    pub repair: RepairReport,
    /// Whether the main cache was written
    pub saved: bool,
}

impl ProjectBuild {
    pub fn reused(&self) -> bool {
        self.build.is_none()
    }
}

/// Builds sequences one narration segment at a time
#[derive(Debug)]
pub struct SequenceBuilder<'a> {
    reconciler: &'a DurationReconciler,
    normalizer: &'a ImageNormalizer,
}

impl<'a> SequenceBuilder<'a> {
    pub fn new(reconciler: &'a DurationReconciler, normalizer: &'a ImageNormalizer) -> Self {
        Self {
            reconciler,
            normalizer,
        }
    }

    /// Builds a fresh sequence starting at zero
    pub fn build(
        &self,
        catalog: &SegmentCatalog,
        assets: &BTreeMap<String, VisualAsset>,
    ) -> BuildOutcome {
        self.build_seeded(&Sequence::default(), catalog, assets)
    }

    /// Builds on top of an existing partial sequence.
    ///
    /// Trailing seed entries that repeat the first segment are dropped, the
    /// rest are kept in order as a prefix and re-timed end to end. Only
    /// catalog segments the seed does not already contain are appended.
    pub fn build_seeded(
        &self,
        seed: &Sequence,
        catalog: &SegmentCatalog,
        assets: &BTreeMap<String, VisualAsset>,
    ) -> BuildOutcome {
        let mut seed_entries = seed.entries();
        let mut dropped_duplicates = 0;
        while let [first, .., last] = seed_entries {
            if first.segment_id != last.segment_id {
                break;
            }
            tracing::info!(segment_id = %last.segment_id, "dropped trailing duplicate of first segment");
            seed_entries = &seed_entries[..seed_entries.len() - 1];
            dropped_duplicates += 1;
        }

        let mut sequence = Sequence::default();
        let mut reports = Vec::with_capacity(catalog.len().max(seed_entries.len()));
        let mut cursor = 0.0;

        for seeded in seed_entries {
            let (entry, report) = self.carry_over(seeded, catalog, cursor);
            cursor = entry.end_time;
            reports.push(report);
            sequence.push(entry);
        }
        let seeded = sequence.len();

        for segment in catalog.segments() {
            if sequence.contains_segment(&segment.id) {
                continue;
            }
            let (entry, report) = self.entry_for(segment, assets.get(&segment.id), cursor);
            cursor = entry.end_time;
            reports.push(report);
            sequence.push(entry);
        }

        let total_duration = sequence.total_duration();
        let expected_total = catalog.narration_total();
        let drift = expected_total.map(|expected| total_duration - expected);
        if let (Some(expected), Some(drift)) = (expected_total, drift) {
            if drift.abs() > self.reconciler.tolerance() {
                tracing::warn!(
                    total = total_duration,
                    expected,
                    drift,
                    "sequence length drifts from narration"
                );
            }
        }

        tracing::info!(
            entries = sequence.len(),
            seeded,
            total = total_duration,
            fallbacks = reports.iter().filter(|r: &&EntryReport| r.fallback.is_some()).count(),
            "sequence built"
        );

        BuildOutcome {
            sequence,
            report: BuildReport {
                entries: reports,
                seeded,
                dropped_duplicates,
                total_duration,
                expected_total,
                drift,
            },
        }
    }

    /// Builds or reuses the project's main sequence cache.
    ///
    /// Stale caches are invalidated first. A fresh cache is reused unless
    /// `force` is set, and is only rewritten when validation changed it.
    pub fn build_project(
        &self,
        store: &ProjectStore,
        resolver: &AssetResolver,
        force: bool,
    ) -> Result<ProjectBuild> {
        let repairer = SequenceRepairer::new(self.reconciler);
        let mut repair = repairer.invalidate_stale_cache(store)?;
        let catalog = store.load_catalog()?;

        let cached = if force {
            None
        } else {
            match store.load_sequence() {
                Ok(cached) => cached,
                Err(e) if e.is_persistence() => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(path = %store.sequence_path().display(), "unreadable cache, rebuilding: {e}");
                    None
                }
            }
        };

        let (sequence, build) = match cached {
            Some(sequence) => {
                tracing::info!(entries = sequence.len(), "reusing cached sequence");
                (sequence, None)
            }
            None => {
                let ids = catalog.paired_visual_ids();
                let assets = resolver.resolve_all(ids.iter().map(String::as_str));
                let outcome = self.build(&catalog, &assets);
                (outcome.sequence, Some(outcome.report))
            }
        };

        let (sequence, fixes) = repairer.validate_and_fix_sequence(sequence, Some(&catalog));
        let saved = build.is_some() || !fixes.is_clean();
        repair.absorb(fixes);
        if saved {
            if let Some(backup) = store.save_sequence(&sequence)? {
                repair.backups.push(backup);
            }
        } else {
            tracing::debug!("cached sequence unchanged, not rewritten");
        }

        Ok(ProjectBuild {
            sequence,
            build,
            repair,
            saved,
        })
    }

    /// Re-times a seed entry at `start`, fixing what cannot be kept as is.
    ///
    /// A stored duration survives only while it stays within tolerance of
    /// the narration.
    fn carry_over(
        &self,
        seeded: &TimelineEntry,
        catalog: &SegmentCatalog,
        start: f64,
    ) -> (TimelineEntry, EntryReport) {
        let mut entry = seeded.clone();
        let reconciled = self
            .reconciler
            .duration_for_entry(&entry, catalog.get(&entry.segment_id));
        let tier = if entry.has_valid_duration()
            && (entry.duration - reconciled.seconds).abs() <= self.reconciler.tolerance()
        {
            DurationTier::Recorded
        } else {
            if entry.has_valid_duration() {
                tracing::info!(
                    segment_id = %entry.segment_id,
                    from = entry.duration,
                    to = reconciled.seconds,
                    tier = %reconciled.tier,
                    "seed duration replaced"
                );
            }
            entry.duration = reconciled.seconds;
            reconciled.tier
        };

        let mut fallback = None;
        if entry.kind == EntryKind::PairedVisualWithNarrationAudio && entry.broll_path.is_none() {
            entry.kind = EntryKind::NarrationOnly;
            fallback = Some(Fallback::MissingAsset);
        }

        entry.start_time = start;
        entry.end_time = start + entry.duration;
        let report = EntryReport {
            segment_id: entry.segment_id.clone(),
            kind: entry.kind,
            duration: entry.duration,
            tier,
            fallback,
        };
        (entry, report)
    }

    fn entry_for(
        &self,
        segment: &NarrationSegment,
        asset: Option<&VisualAsset>,
        start: f64,
    ) -> (TimelineEntry, EntryReport) {
        let reconciled = self.reconciler.target_duration(segment);
        let locator = self.reconciler.locator();

        let mut fallback = None;
        let visual = if segment.is_paired_visual() {
            match asset {
                None => {
                    tracing::warn!(segment_id = %segment.id, "no visual found, using narration only");
                    fallback = Some(Fallback::MissingAsset);
                    None
                }
                Some(asset) if asset.kind == ContentKind::Image => {
                    match self.normalizer.to_clip(&asset.path, reconciled.seconds) {
                        Ok(_) => Some(asset.path.clone()),
                        Err(e) => {
                            tracing::warn!(
                                segment_id = %segment.id,
                                path = %asset.path.display(),
                                "unreadable still, using narration only: {e}"
                            );
                            fallback = Some(Fallback::UnreadableImage {
                                path: locator.relative(&asset.path),
                                message: e.to_string(),
                            });
                            None
                        }
                    }
                }
                Some(asset) => Some(asset.path.clone()),
            }
        } else {
            None
        };

        let mut entry = match visual {
            Some(path) => {
                TimelineEntry::paired(&segment.id, locator.relative(&path), start, reconciled.seconds)
            }
            None => TimelineEntry::narration(&segment.id, start, reconciled.seconds),
        };
        if let Some(narration) = locator.locate(segment) {
            entry.aroll_path = Some(locator.relative(&narration));
        }

        let report = EntryReport {
            segment_id: segment.id.clone(),
            kind: entry.kind,
            duration: entry.duration,
            tier: reconciled.tier,
            fallback,
        };
        (entry, report)
    }
}

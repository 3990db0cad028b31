//! Validation and repair of persisted timelines and status records
//!
//! Every check is idempotent: running it on its own output changes nothing.
//! Checks only count and apply fixes in memory; [`SequenceRepairer::repair_project`]
//! is the one place that writes, always through the project store so each
//! overwrite or removal is backed up first.

use crate::reconciler::{DurationReconciler, DurationTier};
use crate::resolver::AssetResolver;
use crate::Result;
use reel_core::{
    ContentKind, ContentStatusRecord, EntryKind, ProgressStatus, ProjectStore, SegmentCatalog,
    SegmentStatus, Sequence, TIME_EPSILON,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// What a repair pass changed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RepairReport {
    /// Status entries added, removed or re-keyed, plus header fields fixed
    pub status_changes: usize,
    /// Trailing repeats of the first segment removed
    pub duplicates_dropped: usize,
    /// Entries whose duration was replaced
    pub durations_fixed: usize,
    /// Entries moved by sorting or re-timing
    pub entries_retimed: usize,
    /// Paired entries without a visual turned narration-only
    pub entries_downgraded: usize,
    /// Cached sequences backed up and removed
    pub caches_invalidated: Vec<PathBuf>,
    /// Backups written while persisting fixes
    pub backups: Vec<PathBuf>,
    /// Segment ids used by more than one entry; reported, never removed
    pub duplicate_interior: Vec<String>,
}

impl RepairReport {
    /// Number of changes made
    pub fn total_changes(&self) -> usize {
        self.status_changes
            + self.duplicates_dropped
            + self.durations_fixed
            + self.entries_retimed
            + self.entries_downgraded
            + self.caches_invalidated.len()
    }

    pub fn is_clean(&self) -> bool {
        self.total_changes() == 0
    }

    pub(crate) fn absorb(&mut self, other: RepairReport) {
        self.status_changes += other.status_changes;
        self.duplicates_dropped += other.duplicates_dropped;
        self.durations_fixed += other.durations_fixed;
        self.entries_retimed += other.entries_retimed;
        self.entries_downgraded += other.entries_downgraded;
        self.caches_invalidated.extend(other.caches_invalidated);
        self.backups.extend(other.backups);
        for id in other.duplicate_interior {
            if !self.duplicate_interior.contains(&id) {
                self.duplicate_interior.push(id);
            }
        }
    }
}

/// A stored duration that disagrees with the narration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DurationIssue {
    pub segment_id: String,
    pub recorded: f64,
    pub reconciled: f64,
    pub tier: DurationTier,
}

/// Read-only findings about a sequence
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub entries: usize,
    pub narration_only: usize,
    pub paired: usize,
    /// Paired entries whose visual is a still image
    pub stills: usize,
    pub violations: Vec<String>,
    pub duration_issues: Vec<DurationIssue>,
    /// Segment ids whose narration audio plays more than once
    pub reused_narration: Vec<String>,
    pub total_duration: f64,
    pub expected_total: Option<f64>,
    pub drift: Option<f64>,
}

impl AnalysisReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
            && self.duration_issues.is_empty()
            && self.reused_narration.is_empty()
    }
}

/// Checks and fixes sequences and status records
#[derive(Debug)]
pub struct SequenceRepairer<'a> {
    reconciler: &'a DurationReconciler,
}

impl<'a> SequenceRepairer<'a> {
    pub fn new(reconciler: &'a DurationReconciler) -> Self {
        Self { reconciler }
    }

    /// Rebuilds the status record to the catalog's paired segments.
    ///
    /// When the record is keyed by different ids, existing entries are kept
    /// by position (in numeric id order) and new positions start out
    /// not started. Returns the number of changes.
    pub fn repair_status(&self, catalog: &SegmentCatalog, record: &mut ContentStatusRecord) -> usize {
        let ids = catalog.paired_visual_ids();
        let mut changes = 0;

        let same_keys = record.len() == ids.len() && ids.iter().all(|id| record.broll.contains_key(id));
        if !same_keys {
            let existing: Vec<SegmentStatus> =
                record.ordered().into_iter().map(|(_, s)| s.clone()).collect();
            let mut rebuilt = BTreeMap::new();
            for (index, id) in ids.iter().enumerate() {
                let status = existing
                    .get(index)
                    .cloned()
                    .unwrap_or_else(SegmentStatus::not_started);
                if record.broll.get(id) != Some(&status) {
                    changes += 1;
                }
                rebuilt.insert(id.clone(), status);
            }
            changes += record
                .broll
                .keys()
                .filter(|key| !rebuilt.contains_key(*key))
                .count();
            tracing::info!(
                previous = record.len(),
                expected = ids.len(),
                changes,
                "status record rebuilt to match catalog"
            );
            record.broll = rebuilt;
        }

        if record.broll_segment_count != ids.len() {
            record.broll_segment_count = ids.len();
            changes += 1;
        }
        if !record.synced_with_script {
            record.synced_with_script = true;
            changes += 1;
        }
        if changes > 0 {
            record.touch();
        }
        changes
    }

    /// Pops trailing entries while the last repeats the first segment
    pub fn drop_duplicate_boundary(&self, sequence: &mut Sequence) -> usize {
        let mut dropped = 0;
        while sequence.has_duplicate_boundary() {
            if let Some(entry) = sequence.entries_mut().pop() {
                tracing::info!(segment_id = %entry.segment_id, "removed trailing duplicate segment");
            }
            dropped += 1;
        }
        dropped
    }

    /// Replaces stale durations with reconciled ones, then sorts and
    /// re-times entries end to end from the first start.
    pub fn repair_durations(
        &self,
        sequence: &mut Sequence,
        catalog: Option<&SegmentCatalog>,
    ) -> RepairReport {
        let mut report = RepairReport::default();
        let tolerance = self.reconciler.tolerance();

        for entry in sequence.entries_mut().iter_mut() {
            if entry.kind == EntryKind::PairedVisualWithNarrationAudio && entry.broll_path.is_none() {
                tracing::warn!(segment_id = %entry.segment_id, "paired entry has no visual, using narration only");
                entry.kind = EntryKind::NarrationOnly;
                report.entries_downgraded += 1;
            }

            let segment = catalog.and_then(|c| c.get(&entry.segment_id));
            let reconciled = self.reconciler.duration_for_entry(entry, segment);
            let stale = !entry.has_valid_duration()
                || (entry.duration - entry.span()).abs() > TIME_EPSILON
                || (entry.duration - reconciled.seconds).abs() > tolerance;
            if stale && (entry.duration - reconciled.seconds).abs() > TIME_EPSILON {
                tracing::info!(
                    segment_id = %entry.segment_id,
                    from = entry.duration,
                    to = reconciled.seconds,
                    tier = %reconciled.tier,
                    "duration fixed"
                );
                entry.duration = reconciled.seconds;
                report.durations_fixed += 1;
            }
        }

        let before: Vec<usize> = sequence.entries().iter().map(|e| e.position).collect();
        sequence
            .entries_mut()
            .sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        let reordered = sequence
            .entries()
            .iter()
            .zip(&before)
            .filter(|(entry, position)| entry.position != **position)
            .count();
        sequence.renumber();

        let origin = sequence
            .first()
            .map(|e| e.start_time)
            .filter(|t| t.is_finite())
            .unwrap_or(0.0)
            .max(0.0);
        let moved = sequence.retime(origin);
        report.entries_retimed = reordered.max(moved);
        report
    }

    /// Backs up and removes every cached sequence older than its inputs
    pub fn invalidate_stale_cache(&self, store: &ProjectStore) -> Result<RepairReport> {
        let mut report = RepairReport::default();
        for cache in store.existing_caches() {
            let Some(reason) = store.staleness(&cache) else {
                continue;
            };
            tracing::info!(path = %cache.display(), %reason, "invalidating stale cache");
            if let Some(backup) = store.remove_with_backup(&cache)? {
                report.backups.push(backup);
            }
            report.caches_invalidated.push(cache);
        }
        Ok(report)
    }

    /// Runs every sequence check and returns the fixed sequence
    pub fn validate_and_fix_sequence(
        &self,
        mut sequence: Sequence,
        catalog: Option<&SegmentCatalog>,
    ) -> (Sequence, RepairReport) {
        let mut report = self.repair_durations(&mut sequence, catalog);
        report.duplicates_dropped = self.drop_duplicate_boundary(&mut sequence);
        report.duplicate_interior = reused_segments(&sequence);
        if !report.duplicate_interior.is_empty() {
            tracing::warn!(
                segments = ?report.duplicate_interior,
                "segments appear more than once; left in place"
            );
        }
        (sequence, report)
    }

    /// Runs the status check and returns the fixed record
    pub fn validate_and_fix_status(
        &self,
        mut record: ContentStatusRecord,
        catalog: &SegmentCatalog,
    ) -> (ContentStatusRecord, RepairReport) {
        let status_changes = self.repair_status(catalog, &mut record);
        let report = RepairReport {
            status_changes,
            ..RepairReport::default()
        };
        (record, report)
    }

    /// Repairs a whole project on disk.
    ///
    /// The status record is fixed first, so a rewritten record invalidates
    /// caches built from the old one. Surviving caches are then repaired in
    /// place. Only persistence failures are errors.
    pub fn repair_project(&self, store: &ProjectStore) -> Result<RepairReport> {
        let mut report = RepairReport::default();

        let catalog = match store.load_catalog() {
            Ok(catalog) => Some(catalog),
            Err(reel_core::Error::MissingFile(path)) => {
                tracing::warn!(path = %path.display(), "no segment catalog; skipping status repair");
                None
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(catalog) = &catalog {
            let record = store.load_status()?;
            let (record, mut status_report) = self.validate_and_fix_status(record, catalog);
            if !status_report.is_clean() {
                status_report.backups.extend(store.save_status(&record)?);
            }
            report.absorb(status_report);
        }

        report.absorb(self.invalidate_stale_cache(store)?);

        for cache in store.existing_caches() {
            let sequence = match store.load_sequence_from(&cache) {
                Ok(sequence) => sequence,
                Err(e) => {
                    tracing::warn!(path = %cache.display(), "unreadable cache: {e}");
                    if let Some(backup) = store.remove_with_backup(&cache)? {
                        report.backups.push(backup);
                    }
                    report.caches_invalidated.push(cache);
                    continue;
                }
            };
            let (sequence, mut sequence_report) =
                self.validate_and_fix_sequence(sequence, catalog.as_ref());
            if !sequence_report.is_clean() {
                sequence_report
                    .backups
                    .extend(store.save_sequence_to(&cache, &sequence)?);
            }
            report.absorb(sequence_report);
        }

        tracing::info!(changes = report.total_changes(), "project repair finished");
        Ok(report)
    }

    /// Points each status entry at the resolver's current best asset.
    ///
    /// An entry changes only when the best asset differs from its selection
    /// or it is not yet marked ready.
    pub fn refresh_status(&self, record: &mut ContentStatusRecord, resolver: &AssetResolver) -> usize {
        let mut changes = 0;
        for (segment_id, status) in record.broll.iter_mut() {
            let Some(asset) = resolver.resolve(segment_id) else {
                continue;
            };
            let path = relative_to(resolver.root(), &asset.path);
            let mut changed = false;
            if status.selected_asset.as_deref() != Some(path.as_path()) {
                status.selected_asset = Some(path.clone());
                changed = true;
            }
            if !status.asset_paths.contains(&path) {
                status.asset_paths.push(path.clone());
                changed = true;
            }
            if status.status != ProgressStatus::Ready {
                status.status = ProgressStatus::Ready;
                changed = true;
            }
            if changed {
                tracing::info!(segment_id = %segment_id, path = %path.display(), "status points at new asset");
                changes += 1;
            }
        }
        if changes > 0 {
            record.touch();
        }
        changes
    }

    /// Reports problems without changing anything
    pub fn analyze(&self, sequence: &Sequence, catalog: Option<&SegmentCatalog>) -> AnalysisReport {
        let tolerance = self.reconciler.tolerance();
        let expected_total = catalog.and_then(SegmentCatalog::narration_total);
        let total_duration = sequence.total_duration();

        let mut report = AnalysisReport {
            entries: sequence.len(),
            violations: sequence
                .violations(expected_total, tolerance)
                .iter()
                .map(ToString::to_string)
                .collect(),
            reused_narration: reused_segments(sequence),
            total_duration,
            expected_total,
            drift: expected_total.map(|expected| total_duration - expected),
            ..AnalysisReport::default()
        };

        for entry in sequence.entries() {
            match entry.kind {
                EntryKind::NarrationOnly => report.narration_only += 1,
                EntryKind::PairedVisualWithNarrationAudio => {
                    report.paired += 1;
                    if entry.asset_kind() == Some(ContentKind::Image) {
                        report.stills += 1;
                    }
                }
            }
            let segment = catalog.and_then(|c| c.get(&entry.segment_id));
            let reconciled = self.reconciler.duration_for_entry(entry, segment);
            if (entry.duration - reconciled.seconds).abs() > tolerance {
                report.duration_issues.push(DurationIssue {
                    segment_id: entry.segment_id.clone(),
                    recorded: entry.duration,
                    reconciled: reconciled.seconds,
                    tier: reconciled.tier,
                });
            }
        }
        report
    }
}

/// Ids used by more than one entry, in first-use order
fn reused_segments(sequence: &Sequence) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for entry in sequence.entries() {
        *counts.entry(entry.segment_id.as_str()).or_default() += 1;
    }
    let mut seen = BTreeSet::new();
    sequence
        .entries()
        .iter()
        .map(|e| e.segment_id.as_str())
        .filter(|id| counts[id] > 1 && seen.insert(*id))
        .map(str::to_string)
        .collect()
}

fn relative_to(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}

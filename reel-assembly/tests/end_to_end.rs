use image::{ImageBuffer, Rgba};
use reel_assembly::{
    AssetResolver, DurationReconciler, DurationTier, ImageNormalizer, MediaProbe,
    NarrationLocator, NoProbe, ProbeError, SequenceBuilder, SequenceRepairer,
};
use reel_core::config::AssemblyConfig;
use reel_core::{
    ContentStatusRecord, EntryKind, ProgressStatus, ProjectStore, SegmentStatus, Sequence,
    TimelineEntry,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::{tempdir, TempDir};

/// Every narration clip plays for exactly seven seconds
struct SevenSeconds;

impl MediaProbe for SevenSeconds {
    fn name(&self) -> &'static str {
        "seven"
    }

    fn probe_duration(&self, path: &Path) -> Result<f64, ProbeError> {
        if path.is_file() {
            Ok(7.0)
        } else {
            Err(ProbeError::NotFound(path.to_path_buf()))
        }
    }
}

fn write_png(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let img = ImageBuffer::from_pixel(32, 24, Rgba([200u8, 100, 50, 255]));
    img.save(path).unwrap();
}

fn write_file(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"clip").unwrap();
}

/// Six seven-second segments; 1 to 4 expect a visual, 5 and 6 are narration
fn project() -> TempDir {
    let dir = tempdir().unwrap();
    let segments: Vec<_> = (1..=6)
        .map(|i| {
            let kind = if i <= 4 { "B-Roll" } else { "A-Roll" };
            format!(
                r#"{{"id": "segment_{i}", "index": {i}, "type": "{kind}", "start_time": {start}, "end_time": {end}}}"#,
                start = (i - 1) as f64 * 7.0,
                end = i as f64 * 7.0,
            )
        })
        .collect();
    fs::write(
        dir.path().join("script.json"),
        format!(r#"{{"segments": [{}]}}"#, segments.join(",")),
    )
    .unwrap();

    let broll = dir.path().join("media/broll");
    write_png(&broll.join("broll_segment_1.png"));
    write_file(&broll.join("fetched_broll_segment_2.mp4"));
    write_png(&broll.join("image_4.png"));
    // Must not be taken for segment 1
    write_file(&broll.join("broll_segment_12.mp4"));
    dir
}

fn reconciler(root: &Path, probe: Box<dyn MediaProbe>) -> DurationReconciler {
    let config = AssemblyConfig::default();
    DurationReconciler::new(
        probe,
        NarrationLocator::from_config(root, &config),
        &config.timeline,
    )
}

#[test]
fn builds_six_segment_timeline_with_missing_visual() {
    let dir = project();
    let config = AssemblyConfig::default();
    let store = ProjectStore::from_config(dir.path(), &config);
    let catalog = store.load_catalog().unwrap();
    let resolver = AssetResolver::from_config(dir.path(), &config);
    let assets = resolver.resolve_all(catalog.paired_visual_ids().iter().map(String::as_str));
    let reconciler = reconciler(dir.path(), Box::new(NoProbe));
    let normalizer = ImageNormalizer::new(config.render.clone());

    let outcome = SequenceBuilder::new(&reconciler, &normalizer).build(&catalog, &assets);
    let entries = outcome.sequence.entries();

    assert_eq!(entries.len(), 6);
    let kinds: Vec<_> = entries.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EntryKind::PairedVisualWithNarrationAudio,
            EntryKind::PairedVisualWithNarrationAudio,
            EntryKind::NarrationOnly,
            EntryKind::PairedVisualWithNarrationAudio,
            EntryKind::NarrationOnly,
            EntryKind::NarrationOnly,
        ]
    );
    assert_eq!(entries[2].segment_id, "segment_3");
    assert!((entries[5].end_time - 42.0).abs() <= 0.5);
    for pair in entries.windows(2) {
        assert!(pair[0].start_time <= pair[1].start_time);
        assert_eq!(pair[0].end_time, pair[1].start_time);
    }
    assert_ne!(entries[0].segment_id, entries[5].segment_id);
    assert!(outcome.report.within_tolerance(config.timeline.tolerance_secs));
    assert_eq!(outcome.report.fallbacks().count(), 1);
}

#[test]
fn probed_narration_paces_the_timeline() {
    let dir = project();
    for i in 1..=6 {
        write_file(&dir.path().join(format!("media/a-roll/segments/segment_{i}.mp4")));
    }
    let config = AssemblyConfig::default();
    let store = ProjectStore::new(dir.path());
    let catalog = store.load_catalog().unwrap();
    let assets = AssetResolver::from_config(dir.path(), &config)
        .resolve_all(catalog.paired_visual_ids().iter().map(String::as_str));
    let reconciler = reconciler(dir.path(), Box::new(SevenSeconds));
    let normalizer = ImageNormalizer::new(config.render.clone());

    let outcome = SequenceBuilder::new(&reconciler, &normalizer).build(&catalog, &assets);

    assert!(outcome
        .report
        .entries
        .iter()
        .all(|e| e.tier == DurationTier::Probed));
    assert_eq!(
        outcome.sequence.entries()[0].aroll_path.as_deref(),
        Some(Path::new("media/a-roll/segments/segment_1.mp4"))
    );
    assert_eq!(outcome.sequence.end_time(), 42.0);
}

fn set_mtime(path: &Path, time: SystemTime) {
    fs::File::open(path).unwrap().set_modified(time).unwrap();
}

fn status_for(count: usize) -> ContentStatusRecord {
    let mut record = ContentStatusRecord::default();
    for i in 1..=count {
        record.broll.insert(
            format!("segment_{i}"),
            SegmentStatus {
                status: ProgressStatus::Ready,
                selected_asset: Some(PathBuf::from(format!("media/broll/broll_segment_{i}.png"))),
                ..SegmentStatus::default()
            },
        );
    }
    record.broll_segment_count = count;
    record.synced_with_script = true;
    record
}

/// A legacy cache with a zero duration and the first segment repeated last
fn write_broken_legacy_cache(path: &Path) {
    let mut zeroed = TimelineEntry::narration("segment_2", 7.0, 0.0);
    zeroed.end_time = 7.0;
    let legacy = Sequence::new(vec![
        TimelineEntry::narration("segment_1", 0.0, 7.0),
        zeroed,
        TimelineEntry::narration("segment_3", 7.0, 7.0),
        TimelineEntry::narration("segment_1", 14.0, 7.0),
    ]);
    fs::write(path, serde_json::to_vec(legacy.entries()).unwrap()).unwrap();
}

#[test]
fn repair_project_is_idempotent() {
    let dir = project();
    let store = ProjectStore::new(dir.path());
    fs::write(store.status_path(), serde_json::to_vec(&status_for(4)).unwrap()).unwrap();
    let legacy_path = dir.path().join("assembly_data.json");
    write_broken_legacy_cache(&legacy_path);
    // Newer than every input, so it is repaired rather than invalidated
    set_mtime(&legacy_path, SystemTime::now() + Duration::from_secs(3600));

    let reconciler = reconciler(dir.path(), Box::new(NoProbe));
    let repairer = SequenceRepairer::new(&reconciler);

    let report = repairer.repair_project(&store).unwrap();
    assert_eq!(report.status_changes, 0);
    assert_eq!(report.durations_fixed, 1);
    assert_eq!(report.duplicates_dropped, 1);
    assert!(report.caches_invalidated.is_empty());
    assert_eq!(report.backups.len(), 1);

    let repaired = store.load_sequence_from(&legacy_path).unwrap();
    let ids: Vec<_> = repaired.entries().iter().map(|e| e.segment_id.as_str()).collect();
    assert_eq!(ids, vec!["segment_1", "segment_2", "segment_3"]);
    assert!(repaired.is_structurally_valid());
    assert_eq!(repaired.end_time(), 21.0);

    let again = repairer.repair_project(&store).unwrap();
    assert_eq!(again.total_changes(), 0, "{again:?}");
}

#[test]
fn status_count_mismatch_rebuilds_record_and_drops_cache() {
    let dir = project();
    let store = ProjectStore::new(dir.path());
    fs::write(store.status_path(), serde_json::to_vec(&status_for(3)).unwrap()).unwrap();
    let cache = store.sequence_path();
    write_broken_legacy_cache(&cache);
    set_mtime(&cache, SystemTime::now() - Duration::from_secs(3600));

    let reconciler = reconciler(dir.path(), Box::new(NoProbe));
    let repairer = SequenceRepairer::new(&reconciler);
    let report = repairer.repair_project(&store).unwrap();

    let repaired = store.load_status().unwrap();
    assert_eq!(repaired.len(), 4);
    assert_eq!(repaired.broll_segment_count, 4);
    assert_eq!(
        repaired.broll["segment_3"].selected_asset.as_deref(),
        Some(Path::new("media/broll/broll_segment_3.png"))
    );
    assert_eq!(repaired.broll["segment_4"].status, ProgressStatus::NotStarted);
    assert_eq!(report.caches_invalidated, vec![cache.clone()]);
    assert!(!cache.exists());
    // One backup of the status record, one of the removed cache
    assert_eq!(report.backups.len(), 2);

    let again = repairer.repair_project(&store).unwrap();
    assert_eq!(again.total_changes(), 0, "{again:?}");
}

#[test]
fn refresh_status_tracks_best_asset() {
    let dir = project();
    let config = AssemblyConfig::default();
    let reconciler = reconciler(dir.path(), Box::new(NoProbe));
    let repairer = SequenceRepairer::new(&reconciler);
    let resolver = AssetResolver::from_config(dir.path(), &config);

    let mut record = ContentStatusRecord::default();
    for i in 1..=4 {
        record
            .broll
            .insert(format!("segment_{i}"), SegmentStatus::not_started());
    }

    assert_eq!(repairer.refresh_status(&mut record, &resolver), 3);
    assert_eq!(
        record.broll["segment_2"].selected_asset.as_deref(),
        Some(Path::new("media/broll/fetched_broll_segment_2.mp4"))
    );
    assert_eq!(record.broll["segment_2"].status, ProgressStatus::Ready);
    assert_eq!(record.broll["segment_3"].status, ProgressStatus::NotStarted);
    assert_eq!(repairer.refresh_status(&mut record, &resolver), 0);
}

fn backups_in(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .flatten()
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "bak"))
        .count()
}

#[test]
fn repeated_builds_reuse_cache_without_new_backups() {
    let dir = project();
    let config = AssemblyConfig::default();
    let store = ProjectStore::from_config(dir.path(), &config);
    let resolver = AssetResolver::from_config(dir.path(), &config);
    let reconciler = reconciler(dir.path(), Box::new(NoProbe));
    let normalizer = ImageNormalizer::new(config.render.clone());
    let builder = SequenceBuilder::new(&reconciler, &normalizer);

    let first = builder.build_project(&store, &resolver, false).unwrap();
    assert!(!first.reused());
    assert!(first.saved);
    assert!(first.repair.backups.is_empty());

    let second = builder.build_project(&store, &resolver, false).unwrap();
    assert!(second.reused());
    assert!(!second.saved, "{:?}", second.repair);
    assert_eq!(second.sequence.len(), 6);
    assert_eq!(second.sequence.end_time(), first.sequence.end_time());
    assert_eq!(backups_in(dir.path()), 0);

    let forced = builder.build_project(&store, &resolver, true).unwrap();
    assert!(forced.saved);
    assert_eq!(forced.repair.backups.len(), 1);

    let after = builder.build_project(&store, &resolver, false).unwrap();
    assert!(!after.saved);
    assert_eq!(backups_in(dir.path()), 1);
}

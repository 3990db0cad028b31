//! Project store: the single owner of every read-modify-write on project files
//!
//! All writes go through a temporary file in the target directory followed
//! by a rename, and every overwrite or removal of an existing file is
//! preceded by a timestamped backup next to it.

use crate::config::{AssemblyConfig, AssetSettings};
use crate::{ContentStatusRecord, Error, Result, SegmentCatalog, Sequence, TimelineEntry};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;

/// Segment catalog
pub const SCRIPT_FILE: &str = "script.json";

/// Content status record
pub const STATUS_FILE: &str = "content_status.json";

/// Cached sequence written by this crate
pub const SEQUENCE_FILE: &str = "assembly_sequence.json";

/// Sequence caches left by older tools; read, repaired and cleared
pub const LEGACY_SEQUENCE_FILES: &[&str] = &[
    "no_overlap_assembly.json",
    "assembly_data.json",
    "fixed_no_overlap_assembly.json",
    "fixed_exact_segments.json",
];

/// Current sequence file version
pub const SEQUENCE_VERSION: u32 = 1;

/// On-disk sequence file
#[derive(Debug, Serialize)]
struct SequenceFile<'a> {
    version: u32,
    created_at: String,
    total_duration: f64,
    sequence: &'a [TimelineEntry],
}

/// Every sequence layout seen in the wild
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredSequence {
    Bare(Vec<TimelineEntry>),
    Wrapped {
        #[serde(default)]
        version: Option<u32>,
        sequence: Vec<TimelineEntry>,
    },
}

/// Why a cached sequence no longer reflects its inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    StatusNewer,
    CatalogNewer,
    AssetsNewer,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            StaleReason::StatusNewer => "content status changed after the cache was written",
            StaleReason::CatalogNewer => "segment catalog changed after the cache was written",
            StaleReason::AssetsNewer => "visual assets changed after the cache was written",
        };
        f.write_str(reason)
    }
}

/// File access for one project directory
#[derive(Debug, Clone)]
pub struct ProjectStore {
    root: PathBuf,
    broll_dirs: Vec<PathBuf>,
}

impl ProjectStore {
    /// Opens a project with the default asset directories
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            broll_dirs: AssetSettings::default().broll_dirs,
        }
    }

    /// Opens a project using the configured asset directories
    pub fn from_config(root: impl Into<PathBuf>, config: &AssemblyConfig) -> Self {
        Self {
            root: root.into(),
            broll_dirs: config.assets.broll_dirs.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn script_path(&self) -> PathBuf {
        self.root.join(SCRIPT_FILE)
    }

    pub fn status_path(&self) -> PathBuf {
        self.root.join(STATUS_FILE)
    }

    pub fn sequence_path(&self) -> PathBuf {
        self.root.join(SEQUENCE_FILE)
    }

    /// Resolves a path stored in a project file against the project root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Sequence caches that currently exist, the main cache first
    pub fn existing_caches(&self) -> Vec<PathBuf> {
        std::iter::once(SEQUENCE_FILE)
            .chain(LEGACY_SEQUENCE_FILES.iter().copied())
            .map(|name| self.root.join(name))
            .filter(|path| path.is_file())
            .collect()
    }

    pub fn load_catalog(&self) -> Result<SegmentCatalog> {
        SegmentCatalog::load(&self.script_path())
    }

    pub fn load_status(&self) -> Result<ContentStatusRecord> {
        ContentStatusRecord::load(&self.status_path())
    }

    /// Writes the status record, backing up the previous one.
    ///
    /// Returns the backup path when there was a previous record.
    pub fn save_status(&self, record: &ContentStatusRecord) -> Result<Option<PathBuf>> {
        let path = self.status_path();
        let bytes = to_json(&path, record)?;
        let ((), backup) = self.with_backup(&path, || self.write_atomic(&path, &bytes))?;
        Ok(backup)
    }

    /// Loads the cached sequence, if one was written
    pub fn load_sequence(&self) -> Result<Option<Sequence>> {
        let path = self.sequence_path();
        if !path.is_file() {
            return Ok(None);
        }
        self.load_sequence_from(&path).map(Some)
    }

    /// Loads a sequence file in the current or any legacy layout
    pub fn load_sequence_from(&self, path: &Path) -> Result<Sequence> {
        let content = fs::read_to_string(path)?;
        parse_sequence(path, &content)
    }

    /// Writes the main sequence cache
    pub fn save_sequence(&self, sequence: &Sequence) -> Result<Option<PathBuf>> {
        self.save_sequence_to(&self.sequence_path(), sequence)
    }

    /// Writes a sequence in the current layout, backing up any existing file
    pub fn save_sequence_to(&self, path: &Path, sequence: &Sequence) -> Result<Option<PathBuf>> {
        let file = SequenceFile {
            version: SEQUENCE_VERSION,
            created_at: chrono::Utc::now().to_rfc3339(),
            total_duration: sequence.total_duration(),
            sequence: sequence.entries(),
        };
        let bytes = to_json(path, &file)?;
        let ((), backup) = self.with_backup(path, || self.write_atomic(path, &bytes))?;
        tracing::debug!(path = %path.display(), entries = sequence.len(), "sequence saved");
        Ok(backup)
    }

    /// Replaces `path` with `bytes` in one rename.
    ///
    /// On failure the original file is left as it was.
    pub fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut temp = NamedTempFile::new_in(dir).map_err(|e| Error::persistence(path, e))?;
        temp.write_all(bytes)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| Error::persistence(path, e))?;
        temp.persist(path)
            .map_err(|e| Error::persistence(path, e.error))?;
        Ok(())
    }

    /// Copies `path` to `<name>.<YYYYmmdd_HHMMSS_mmm>.bak` next to it.
    pub fn create_backup(&self, path: &Path) -> Result<PathBuf> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::persistence(path, ErrorKind::InvalidInput.into()))?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");

        let mut backup = path.with_file_name(format!("{name}.{stamp}.bak"));
        let mut attempt = 1;
        while backup.exists() {
            backup = path.with_file_name(format!("{name}.{stamp}-{attempt}.bak"));
            attempt += 1;
        }

        fs::copy(path, &backup).map_err(|e| Error::persistence(&backup, e))?;
        tracing::info!(path = %path.display(), backup = %backup.display(), "backup created");
        Ok(backup)
    }

    /// Runs `mutate` only after `path` was backed up, returning its result
    /// together with the backup path.
    ///
    /// A path that does not exist yet needs no backup.
    pub fn with_backup<T>(
        &self,
        path: &Path,
        mutate: impl FnOnce() -> Result<T>,
    ) -> Result<(T, Option<PathBuf>)> {
        let backup = if path.exists() {
            Some(self.create_backup(path)?)
        } else {
            None
        };
        Ok((mutate()?, backup))
    }

    /// Backs up and deletes a file. Returns the backup path, or `None` when
    /// there was nothing to remove.
    pub fn remove_with_backup(&self, path: &Path) -> Result<Option<PathBuf>> {
        if !path.exists() {
            return Ok(None);
        }
        let backup = self.create_backup(path)?;
        fs::remove_file(path).map_err(|e| Error::persistence(path, e))?;
        tracing::info!(path = %path.display(), "file removed");
        Ok(Some(backup))
    }

    /// Most recent change in any asset directory or its direct children
    pub fn newest_asset_change(&self) -> Option<SystemTime> {
        let mut newest: Option<SystemTime> = None;
        for dir in &self.broll_dirs {
            let dir = self.root.join(dir);
            newest = newest.max(modified(&dir));
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let changed = entry.metadata().ok().and_then(|m| m.modified().ok());
                newest = newest.max(changed);
            }
        }
        newest
    }

    /// Whether the main sequence cache is out of date
    pub fn cache_is_stale(&self) -> Option<StaleReason> {
        self.staleness(&self.sequence_path())
    }

    /// Compares a cache file against the inputs it was built from.
    ///
    /// A missing cache is never stale.
    pub fn staleness(&self, cache: &Path) -> Option<StaleReason> {
        let written = modified(cache)?;
        if modified(&self.status_path()).is_some_and(|t| t > written) {
            return Some(StaleReason::StatusNewer);
        }
        if modified(&self.script_path()).is_some_and(|t| t > written) {
            return Some(StaleReason::CatalogNewer);
        }
        if self.newest_asset_change().is_some_and(|t| t > written) {
            return Some(StaleReason::AssetsNewer);
        }
        None
    }
}

/// Parses any known sequence layout; `path` is used for error reporting.
///
/// Entries without a segment id are named `segment_{i}` after their position.
pub fn parse_sequence(path: &Path, content: &str) -> Result<Sequence> {
    let stored: StoredSequence = serde_json::from_str(content).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let mut entries = match stored {
        StoredSequence::Bare(entries) => entries,
        StoredSequence::Wrapped { version, sequence } => {
            if let Some(version) = version.filter(|v| *v != SEQUENCE_VERSION) {
                return Err(Error::UnsupportedVersion(version));
            }
            sequence
        }
    };
    for (i, entry) in entries.iter_mut().enumerate() {
        if entry.segment_id.is_empty() {
            entry.segment_id = format!("segment_{i}");
        }
    }
    Ok(Sequence::new(entries))
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).ok()?.modified().ok()
}

fn to_json<T: Serialize>(path: &Path, value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntryKind;
    use std::time::Duration;
    use tempfile::tempdir;

    fn set_mtime(path: &Path, time: SystemTime) {
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    fn backups_in(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "bak"))
            .collect()
    }

    #[test]
    fn sequence_roundtrip_uses_versioned_layout() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::new(dir.path());
        let sequence = Sequence::new(vec![
            TimelineEntry::narration("segment_0", 0.0, 7.0),
            TimelineEntry::paired("segment_1", "media/broll/broll_segment_1.mp4", 7.0, 7.0),
        ]);

        store.save_sequence(&sequence).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.sequence_path()).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["total_duration"], 14.0);
        assert!(raw["created_at"].is_string());

        let loaded = store.load_sequence().unwrap().unwrap();
        assert_eq!(loaded, sequence);
    }

    #[test]
    fn reads_legacy_bare_array_with_defaults() {
        let json = r#"[
            {"type": "aroll_full", "start_time": 0.0, "end_time": 5.0, "duration": 5.0},
            {"segment_id": "segment_4", "type": "broll_with_aroll_audio", "broll_path": "b.png", "clip_note": "x"}
        ]"#;
        let sequence = parse_sequence(Path::new("assembly_data.json"), json).unwrap();

        assert_eq!(sequence.entries()[0].segment_id, "segment_0");
        let second = &sequence.entries()[1];
        assert_eq!(second.kind, EntryKind::PairedVisualWithNarrationAudio);
        assert_eq!(second.duration, 0.0);
        assert_eq!(second.position, 1);
        assert_eq!(second.extra["clip_note"], "x");
    }

    #[test]
    fn rejects_future_version() {
        let json = r#"{"version": 7, "sequence": []}"#;
        let err = parse_sequence(Path::new("s.json"), json).unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion(7)));
    }

    #[test]
    fn overwrite_leaves_backup_of_previous_content() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::new(dir.path());
        let path = store.status_path();
        fs::write(&path, r#"{"broll": {}, "marker": true}"#).unwrap();

        let backup = store.save_status(&ContentStatusRecord::default()).unwrap();

        let backups = backups_in(dir.path());
        assert_eq!(backups.len(), 1);
        assert_eq!(backup.as_ref(), Some(&backups[0]));
        assert!(fs::read_to_string(&backups[0]).unwrap().contains("marker"));
        assert!(!fs::read_to_string(&path).unwrap().contains("marker"));
    }

    #[test]
    fn backups_never_collide() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::new(dir.path());
        let path = dir.path().join(SEQUENCE_FILE);
        fs::write(&path, "[]").unwrap();

        let first = store.create_backup(&path).unwrap();
        let second = store.create_backup(&path).unwrap();
        let third = store.create_backup(&path).unwrap();
        assert_ne!(first, second);
        assert_ne!(second, third);
        assert_eq!(backups_in(dir.path()).len(), 3);
    }

    #[test]
    fn failed_backup_skips_mutation() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::new(dir.path());
        // A directory cannot be copied as a file, so the backup fails
        let path = dir.path().join("not_a_file.json");
        fs::create_dir(&path).unwrap();

        let mut ran = false;
        let result = store.with_backup(&path, || {
            ran = true;
            Ok(())
        });
        assert!(result.unwrap_err().is_persistence());
        assert!(!ran);
    }

    #[test]
    fn failed_rename_leaves_target_untouched() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::new(dir.path());
        // A non-empty directory cannot be replaced by a file
        let target = dir.path().join(SEQUENCE_FILE);
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep.json"), "original").unwrap();

        let err = store.write_atomic(&target, b"[]").unwrap_err();

        assert!(matches!(&err, Error::Persistence { path, .. } if path == &target));
        assert_eq!(fs::read_to_string(target.join("keep.json")).unwrap(), "original");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.path())
            .filter(|p| p != &target)
            .collect();
        assert!(leftovers.is_empty(), "temporary file left behind: {leftovers:?}");
    }

    #[test]
    fn failed_temp_write_leaves_original_untouched() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::new(dir.path());
        let original = dir.path().join(STATUS_FILE);
        fs::write(&original, r#"{"broll": {}}"#).unwrap();
        // The temporary file would have to live inside a regular file
        let target = original.join("nested.json");

        let err = store.write_atomic(&target, b"{}").unwrap_err();

        assert!(err.is_persistence());
        assert_eq!(fs::read_to_string(&original).unwrap(), r#"{"broll": {}}"#);
    }

    #[test]
    fn remove_with_backup_keeps_a_copy() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::new(dir.path());
        let path = dir.path().join("assembly_data.json");
        fs::write(&path, "[]").unwrap();

        assert_eq!(store.existing_caches(), vec![path.clone()]);
        let backup = store.remove_with_backup(&path).unwrap().unwrap();
        assert!(!path.exists());
        assert!(backup.exists());
        assert_eq!(store.remove_with_backup(&path).unwrap(), None);
    }

    #[test]
    fn detects_stale_cache() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::new(dir.path());
        let base = SystemTime::now() - Duration::from_secs(3600);

        fs::write(store.script_path(), r#"{"segments": []}"#).unwrap();
        fs::write(store.sequence_path(), "[]").unwrap();
        set_mtime(&store.script_path(), base);
        set_mtime(&store.sequence_path(), base + Duration::from_secs(60));
        assert_eq!(store.cache_is_stale(), None);

        fs::write(store.status_path(), "{}").unwrap();
        set_mtime(&store.status_path(), base + Duration::from_secs(120));
        assert_eq!(store.cache_is_stale(), Some(StaleReason::StatusNewer));
    }

    #[test]
    fn new_asset_makes_cache_stale() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::new(dir.path());
        let base = SystemTime::now() - Duration::from_secs(3600);
        let broll = dir.path().join("media/broll");
        fs::create_dir_all(&broll).unwrap();

        fs::write(store.sequence_path(), "[]").unwrap();
        set_mtime(&store.sequence_path(), base);
        let asset = broll.join("broll_segment_1.png");
        fs::write(&asset, b"png").unwrap();

        assert_eq!(store.cache_is_stale(), Some(StaleReason::AssetsNewer));
    }

    #[test]
    fn missing_cache_is_not_stale() {
        let dir = tempdir().unwrap();
        let store = ProjectStore::new(dir.path());
        assert_eq!(store.cache_is_stale(), None);
        assert!(store.load_sequence().unwrap().is_none());
    }
}

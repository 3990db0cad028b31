//! Content status record: which visual currently satisfies each segment

use crate::{segment_number, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Generation progress of a segment's visual
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    #[default]
    #[serde(alias = "error", alias = "failed")]
    NotStarted,
    #[serde(alias = "processing", alias = "waiting", alias = "fetching")]
    Pending,
    #[serde(alias = "complete", alias = "completed")]
    Ready,
}

/// Status of one segment's visual
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentStatus {
    #[serde(default)]
    pub status: ProgressStatus,
    #[serde(default)]
    pub asset_paths: Vec<PathBuf>,
    #[serde(default)]
    pub selected_asset: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SegmentStatus {
    /// A fresh entry: not started, nothing generated
    pub fn not_started() -> Self {
        Self::default()
    }
}

/// Persisted record of visual generation per paired segment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentStatusRecord {
    #[serde(default)]
    pub broll: BTreeMap<String, SegmentStatus>,
    #[serde(default)]
    pub broll_segment_count: usize,
    #[serde(default)]
    pub synced_with_script: bool,
    /// Unix timestamp in seconds
    #[serde(default)]
    pub last_updated: f64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ContentStatusRecord {
    /// Loads a record; a missing file yields an empty record
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn len(&self) -> usize {
        self.broll.len()
    }

    pub fn is_empty(&self) -> bool {
        self.broll.is_empty()
    }

    pub fn get(&self, segment_id: &str) -> Option<&SegmentStatus> {
        self.broll.get(segment_id)
    }

    /// Entries ordered by numeric id suffix, then by id.
    ///
    /// The map itself sorts lexically, which would put `segment_10`
    /// before `segment_2`.
    pub fn ordered(&self) -> Vec<(&String, &SegmentStatus)> {
        let mut entries: Vec<_> = self.broll.iter().collect();
        entries.sort_by(|(a, _), (b, _)| {
            let key_a = segment_number(a).unwrap_or(u32::MAX);
            let key_b = segment_number(b).unwrap_or(u32::MAX);
            key_a.cmp(&key_b).then_with(|| a.cmp(b))
        });
        entries
    }

    /// Ids in numeric order
    pub fn ordered_ids(&self) -> Vec<String> {
        self.ordered().into_iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn touch(&mut self) {
        self.last_updated = unix_now();
    }
}

/// Current time as fractional unix seconds
pub fn unix_now() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_legacy_status_values() {
        let json = r#"{
            "broll": {
                "segment_0": {"status": "complete", "asset_paths": ["a.mp4"], "selected_asset": "a.mp4", "prompt_id": "p1"},
                "segment_1": {"status": "waiting"},
                "segment_2": {"status": "error", "asset_paths": []}
            },
            "broll_segment_count": 3,
            "aroll": {"segment_0": {}}
        }"#;
        let record: ContentStatusRecord = serde_json::from_str(json).unwrap();

        assert_eq!(record.broll["segment_0"].status, ProgressStatus::Ready);
        assert_eq!(record.broll["segment_1"].status, ProgressStatus::Pending);
        assert_eq!(record.broll["segment_2"].status, ProgressStatus::NotStarted);
        assert_eq!(record.broll["segment_0"].extra["prompt_id"], "p1");
        assert!(record.extra.contains_key("aroll"));
        assert!(!record.synced_with_script);
    }

    #[test]
    fn orders_numerically() {
        let mut record = ContentStatusRecord::default();
        for id in ["segment_10", "segment_2", "segment_1"] {
            record.broll.insert(id.into(), SegmentStatus::not_started());
        }
        assert_eq!(
            record.ordered_ids(),
            vec!["segment_1", "segment_2", "segment_10"]
        );
    }

    #[test]
    fn serializes_spec_keys() {
        let mut record = ContentStatusRecord::default();
        record.broll.insert("segment_0".into(), SegmentStatus::not_started());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["broll"]["segment_0"]["status"], "not_started");
        assert_eq!(json["broll"]["segment_0"]["selected_asset"], serde_json::Value::Null);
        assert_eq!(json["broll_segment_count"], 0);
    }

    #[test]
    fn missing_file_loads_empty() {
        let record = ContentStatusRecord::load(Path::new("/nonexistent/content_status.json")).unwrap();
        assert!(record.is_empty());
    }
}

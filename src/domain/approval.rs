//! Approval Persistence
//!
//! The approved set is the only state shared between the approval batch and
//! the live loop. The batch fully replaces the file each run; the live loop
//! re-reads it on a timer. Writes go through a temp file in the same
//! directory followed by a rename, so a reader never sees a torn file.
//!
//! File shape:
//!
//! ```json
//! {
//!   "XYZ": { "dev": 1.5, "exit": "MEDIAN", "trail": false, "trail_ticks": 0,
//!            "stop_loss_pct": 0.05, "entry_rule": "CLOSE", "score": 0.42 }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::FailureKind;
use crate::strategy::StrategyConfig;

/// Default approval file name
pub const DEFAULT_APPROVAL_FILE: &str = "titan_approved.json";

#[derive(Error, Debug, Clone)]
pub enum ApprovalError {
    #[error("Failed to serialize approval set: {0}")]
    SerializationError(String),

    #[error("Approval file is corrupted: {0}")]
    CorruptedFile(String),

    #[error("Failed to read approval file: {0}")]
    ReadError(String),

    #[error("Failed to write approval file: {0}")]
    WriteError(String),

    #[error("Failed to create directory: {0}")]
    DirectoryError(String),
}

impl ApprovalError {
    pub fn kind(&self) -> FailureKind {
        FailureKind::ConfigMissing
    }
}

/// One approved asset: its strategy parameters plus the score that cleared the gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    #[serde(flatten)]
    pub config: StrategyConfig,
    /// Win-probability at approval time; hand-written files may omit it
    #[serde(default)]
    pub score: f64,
}

impl ApprovalRecord {
    pub fn new(config: StrategyConfig, score: f64) -> Self {
        Self { config, score }
    }
}

/// Ticker -> approval record, ordered by ticker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApprovalSet {
    records: BTreeMap<String, ApprovalRecord>,
}

impl ApprovalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, ticker: impl Into<String>, record: ApprovalRecord) {
        self.records.insert(ticker.into(), record);
    }

    pub fn get(&self, ticker: &str) -> Option<&ApprovalRecord> {
        self.records.get(ticker)
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.records.contains_key(ticker)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ApprovalRecord)> {
        self.records.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Keep only the records for which `keep` returns true
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &ApprovalRecord) -> bool) {
        self.records.retain(|k, v| keep(k, v));
    }

    /// Parse a file body, dropping entries that fail to decode or validate.
    /// Only a body that is not a JSON object at all is an error.
    pub fn from_json(content: &str) -> Result<Self, ApprovalError> {
        let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(content)
            .map_err(|e| ApprovalError::CorruptedFile(e.to_string()))?;

        let mut set = Self::new();
        for (ticker, value) in raw {
            let record: ApprovalRecord = match serde_json::from_value(value) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!("Dropping approval entry {}: {}", ticker, e);
                    continue;
                }
            };
            if let Err(e) = record.config.validate() {
                tracing::warn!("Dropping approval entry {}: {}", ticker, e);
                continue;
            }
            set.insert(ticker, record);
        }
        Ok(set)
    }
}

/// Outcome of reading the approval file
#[derive(Debug, Clone)]
pub enum LoadStatus {
    /// File absent or empty
    Missing,
    Loaded(ApprovalSet),
    /// File present but unreadable as an approval set
    Corrupted(String),
}

/// Reads and writes the approval file at a fixed path
#[derive(Debug, Clone)]
pub struct ApprovalStore {
    path: PathBuf,
}

impl ApprovalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file with exactly `set`
    pub fn save(&self, set: &ApprovalSet) -> Result<(), ApprovalError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| ApprovalError::DirectoryError(e.to_string()))?;

        let content = serde_json::to_string_pretty(set)
            .map_err(|e| ApprovalError::SerializationError(e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| ApprovalError::WriteError(e.to_string()))?;
        tmp.write_all(content.as_bytes())
            .map_err(|e| ApprovalError::WriteError(e.to_string()))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| ApprovalError::WriteError(e.to_string()))?;
        tmp.persist(&self.path)
            .map_err(|e| ApprovalError::WriteError(e.to_string()))?;

        tracing::info!(
            "Approval set saved: {} ticker(s) -> {}",
            set.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Read the file. `Ok(None)` when it does not exist or is blank.
    pub fn load(&self) -> Result<Option<ApprovalSet>, ApprovalError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content =
            fs::read_to_string(&self.path).map_err(|e| ApprovalError::ReadError(e.to_string()))?;

        if content.trim().is_empty() {
            return Ok(None);
        }

        ApprovalSet::from_json(&content).map(Some)
    }

    pub fn try_load(&self) -> LoadStatus {
        match self.load() {
            Ok(Some(set)) => LoadStatus::Loaded(set),
            Ok(None) => LoadStatus::Missing,
            Err(e) => LoadStatus::Corrupted(e.to_string()),
        }
    }

    /// Load for the live loop: any failure yields an empty set and a warning
    pub fn load_or_empty(&self) -> ApprovalSet {
        match self.try_load() {
            LoadStatus::Loaded(set) => set,
            LoadStatus::Missing => {
                tracing::warn!(
                    "[{}] Approval file {} not found; no tickers approved",
                    FailureKind::ConfigMissing,
                    self.path.display()
                );
                ApprovalSet::new()
            }
            LoadStatus::Corrupted(reason) => {
                tracing::warn!(
                    "[{}] Approval file {} unreadable ({}); no tickers approved",
                    FailureKind::ConfigMissing,
                    self.path.display(),
                    reason
                );
                ApprovalSet::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{EntryRule, ExitPolicy};
    use tempfile::tempdir;

    fn sample_set() -> ApprovalSet {
        let mut set = ApprovalSet::new();
        set.insert("XYZ", ApprovalRecord::new(StrategyConfig::with_dev(1.5), 0.42));
        set.insert(
            "ABC",
            ApprovalRecord::new(
                StrategyConfig::with_dev(2.0)
                    .with_exit(ExitPolicy::Upper)
                    .with_trailing(5)
                    .with_entry_rule(EntryRule::Touch),
                0.61,
            ),
        );
        set
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let store = ApprovalStore::new(dir.path().join("approved.json"));

        store.save(&sample_set()).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, sample_set());
        assert_eq!(loaded.tickers().collect::<Vec<_>>(), vec!["ABC", "XYZ"]);
    }

    #[test]
    fn test_save_replaces_previous() {
        let dir = tempdir().unwrap();
        let store = ApprovalStore::new(dir.path().join("approved.json"));
        store.save(&sample_set()).unwrap();

        let mut next = ApprovalSet::new();
        next.insert("QQQ", ApprovalRecord::new(StrategyConfig::default(), 0.5));
        store.save(&next).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains("QQQ"));
        assert!(!loaded.contains("XYZ"));
    }

    #[test]
    fn test_save_creates_directory() {
        let dir = tempdir().unwrap();
        let store = ApprovalStore::new(dir.path().join("nested/deeper/approved.json"));
        store.save(&ApprovalSet::new()).unwrap();
        assert!(store.path().exists());
        assert!(store.load().unwrap().unwrap().is_empty());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = ApprovalStore::new(dir.path().join("absent.json"));
        assert!(store.load().unwrap().is_none());
        assert!(matches!(store.try_load(), LoadStatus::Missing));
        assert!(store.load_or_empty().is_empty());
    }

    #[test]
    fn test_corrupted_file_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("approved.json");
        fs::write(&path, "{ not json").unwrap();

        let store = ApprovalStore::new(&path);
        assert!(matches!(store.try_load(), LoadStatus::Corrupted(_)));
        assert!(store.load_or_empty().is_empty());
    }

    #[test]
    fn test_blank_file_is_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("approved.json");
        fs::write(&path, "  \n").unwrap();
        assert!(matches!(ApprovalStore::new(&path).try_load(), LoadStatus::Missing));
    }

    #[test]
    fn test_legacy_keys_accepted() {
        let set = ApprovalSet::from_json(
            r#"{"XYZ": {"dev": 1.5, "exit": "MEDIAN", "trail_pct": 0.05, "score": 0.4}}"#,
        )
        .unwrap();
        let record = set.get("XYZ").unwrap();
        assert_eq!(record.config.dev, 1.5);
        assert_eq!(record.config.exit, ExitPolicy::Median);
        assert_eq!(record.config.stop_loss_pct, 0.05);
        assert_eq!(record.config.entry_rule, EntryRule::Close);
        assert!(!record.config.trail);

        let unscored = ApprovalSet::from_json(r#"{"XYZ": {"dev": 1.5}}"#).unwrap();
        assert_eq!(unscored.get("XYZ").unwrap().score, 0.0);
    }

    #[test]
    fn test_invalid_entries_dropped() {
        let set = ApprovalSet::from_json(
            r#"{
                "GOOD": {"dev": 2.0, "score": 0.5},
                "NODEV": {"exit": "MEDIAN", "score": 0.5},
                "BADDEV": {"dev": -1.0, "score": 0.5},
                "BADEXIT": {"dev": 2.0, "exit": "SIDEWAYS", "score": 0.5}
            }"#,
        )
        .unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains("GOOD"));
    }

    #[test]
    fn test_non_object_is_corrupted() {
        assert!(ApprovalSet::from_json("[1, 2, 3]").is_err());
    }
}

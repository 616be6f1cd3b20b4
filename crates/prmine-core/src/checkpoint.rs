//! Per-language crawl checkpoints, persisted atomically as JSON.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use prmine_semantic::Language;

/// Last known outcome for a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoStatus {
    Completed,
    SkippedNoPrs,
    SkippedTooManyPrs,
    /// Merged PRs existed but none produced a processed commit.
    Incomplete,
    Failed,
}

/// Per-language crawl progress, keyed by repository full name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub language: Language,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub repos: BTreeMap<String, RepoStatus>,
}

impl Checkpoint {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            updated_at: Utc::now(),
            repos: BTreeMap::new(),
        }
    }

    /// Checkpoint rebuilt from repository names found in existing shards.
    /// Every such repository is treated as completed.
    pub fn seeded(language: Language, names: HashSet<String>) -> Self {
        let mut checkpoint = Self::new(language);
        checkpoint.repos = names
            .into_iter()
            .map(|name| (name, RepoStatus::Completed))
            .collect();
        checkpoint
    }

    pub fn completed_count(&self) -> usize {
        self.repos
            .values()
            .filter(|s| **s == RepoStatus::Completed)
            .count()
    }

    /// Only completed repositories are excluded from later runs.
    pub fn is_completed(&self, full_name: &str) -> bool {
        self.repos.get(full_name) == Some(&RepoStatus::Completed)
    }

    pub fn record(&mut self, full_name: &str, status: RepoStatus) {
        self.repos.insert(full_name.to_string(), status);
        self.updated_at = Utc::now();
    }

    pub fn count(&self, status: RepoStatus) -> usize {
        self.repos.values().filter(|s| **s == status).count()
    }
}

/// Stores one JSON checkpoint per language in the output directory.
pub struct CheckpointStore {
    base_dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn path_for(&self, language: Language) -> PathBuf {
        self.base_dir
            .join(format!("{}_checkpoint.json", language.as_str()))
    }

    pub fn load(&self, language: Language) -> Result<Option<Checkpoint>> {
        let path = self.path_for(language);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read checkpoint: {:?}", path))?;
        let checkpoint = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse checkpoint: {:?}", path))?;
        Ok(Some(checkpoint))
    }

    /// Write the checkpoint to a temp file, then rename it into place.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<PathBuf> {
        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!("failed to create checkpoint directory: {:?}", self.base_dir)
        })?;

        let path = self.path_for(checkpoint.language);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(checkpoint)?;
        fs::write(&tmp, content)
            .with_context(|| format!("failed to write checkpoint: {:?}", tmp))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("failed to replace checkpoint: {:?}", path))?;

        debug!("Saved checkpoint: {:?}", path);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(tmp.path().join("out"));
        assert!(store.load(Language::Java).unwrap().is_none());

        let mut checkpoint = Checkpoint::new(Language::Java);
        checkpoint.record("a/done", RepoStatus::Completed);
        checkpoint.record("b/huge", RepoStatus::SkippedTooManyPrs);
        let path = store.save(&checkpoint).unwrap();
        assert!(path.ends_with("java_checkpoint.json"));
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = store.load(Language::Java).unwrap().unwrap();
        assert_eq!(loaded, checkpoint);
        assert_eq!(loaded.completed_count(), 1);
        assert!(loaded.is_completed("a/done"));
        assert!(!loaded.is_completed("b/huge"));
        assert_eq!(loaded.count(RepoStatus::SkippedTooManyPrs), 1);
    }

    #[test]
    fn test_seeded_marks_completed() {
        let names: HashSet<String> = ["x/a", "y/b"].iter().map(|s| s.to_string()).collect();
        let checkpoint = Checkpoint::seeded(Language::Python, names);
        assert_eq!(checkpoint.completed_count(), 2);
        assert!(checkpoint.is_completed("y/b"));
    }

    #[test]
    fn test_status_overwrites() {
        let mut checkpoint = Checkpoint::new(Language::Golang);
        checkpoint.record("a/b", RepoStatus::Failed);
        checkpoint.record("a/b", RepoStatus::Completed);
        assert_eq!(checkpoint.repos.len(), 1);
        assert_eq!(checkpoint.completed_count(), 1);
    }

    #[test]
    fn test_corrupt_checkpoint_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(tmp.path());
        fs::write(store.path_for(Language::Cpp), "{").unwrap();
        assert!(store.load(Language::Cpp).is_err());
    }
}

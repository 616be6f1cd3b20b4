//! JSON-lines fact shards.
//!
//! The crawler appends one JSON object per line to one file per
//! (language, kind), e.g. `python_commits.jsonl`. Shards are never
//! rewritten; the materializer reads them in [`ShardKind::ALL`] order.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use prmine_semantic::Language;

/// The eight shard kinds, in parent-before-child order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShardKind {
    PrData,
    Commits,
    FileChanges,
    FunctionChanges,
    ClassChanges,
    DiffHunks,
    Imports,
    ReviewComments,
}

impl ShardKind {
    pub const ALL: [ShardKind; 8] = [
        ShardKind::PrData,
        ShardKind::Commits,
        ShardKind::FileChanges,
        ShardKind::FunctionChanges,
        ShardKind::ClassChanges,
        ShardKind::DiffHunks,
        ShardKind::Imports,
        ShardKind::ReviewComments,
    ];

    pub fn stem(&self) -> &'static str {
        match self {
            ShardKind::PrData => "pr_data",
            ShardKind::Commits => "commits",
            ShardKind::FileChanges => "file_changes",
            ShardKind::FunctionChanges => "function_changes",
            ShardKind::ClassChanges => "class_changes",
            ShardKind::DiffHunks => "diff_hunks",
            ShardKind::Imports => "imports",
            ShardKind::ReviewComments => "review_comments",
        }
    }

    pub fn file_name(&self, language: Language) -> String {
        format!("{}_{}.jsonl", language.as_str(), self.stem())
    }

    pub fn path(&self, dir: &Path, language: Language) -> PathBuf {
        dir.join(self.file_name(language))
    }

    /// Decode one shard line into the record type of this kind.
    pub fn decode(&self, line: &str) -> Result<ShardRecord, ShardError> {
        let record = match self {
            ShardKind::PrData => ShardRecord::Pr(decode_line(line)?),
            ShardKind::Commits => ShardRecord::Commit(decode_line(line)?),
            ShardKind::FileChanges => ShardRecord::FileChange(decode_line(line)?),
            ShardKind::FunctionChanges => ShardRecord::FunctionChange(decode_line(line)?),
            ShardKind::ClassChanges => ShardRecord::ClassChange(decode_line(line)?),
            ShardKind::DiffHunks => ShardRecord::DiffHunk(decode_line(line)?),
            ShardKind::Imports => ShardRecord::Import(decode_line(line)?),
            ShardKind::ReviewComments => ShardRecord::ReviewComment(decode_line(line)?),
        };
        Ok(record)
    }
}

/// Why a shard line could not be decoded.
#[derive(Debug, Error)]
pub enum ShardError {
    #[error("malformed JSON: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("invalid record: {0}")]
    Invalid(#[source] serde_json::Error),
}

fn decode_line<T: for<'de> Deserialize<'de>>(line: &str) -> Result<T, ShardError> {
    serde_json::from_str(line).map_err(|e| match e.classify() {
        serde_json::error::Category::Data => ShardError::Invalid(e),
        _ => ShardError::Malformed(e),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrStats {
    pub additions: i64,
    pub deletions: i64,
    pub changed_files: i64,
    pub commits_count: i64,
    pub reviews_count: i64,
    pub review_comments_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrRecord {
    pub repo_full_name: String,
    pub repo_language: String,
    pub repo_stars: i64,
    pub pr_number: i64,
    pub pr_title: String,
    pub pr_body: Option<String>,
    pub pr_author: Option<String>,
    pub pr_created_at: Option<DateTime<Utc>>,
    pub pr_merged_at: Option<DateTime<Utc>>,
    pub pr_stats: PrStats,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStats {
    pub additions: i64,
    pub deletions: i64,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub repo_full_name: String,
    pub pr_number: i64,
    pub commit_hash: String,
    pub commit_message: String,
    pub commit_author: Option<String>,
    pub commit_author_email: Option<String>,
    pub committed_at: Option<DateTime<Utc>>,
    pub commit_stats: CommitStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangeRecord {
    pub repo_full_name: String,
    pub pr_number: i64,
    pub commit_hash: String,
    pub file_path: String,
    /// Registry language id, or null for unrecognized extensions.
    pub file_language: Option<String>,
    /// GitHub file status (`added`, `modified`, `removed`, `renamed`, ...).
    pub change_type: String,
    pub additions: i64,
    pub deletions: i64,
    pub changes: i64,
    pub patch_content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionChangeRecord {
    pub repo_full_name: String,
    pub pr_number: i64,
    pub commit_hash: String,
    pub file_path: String,
    pub file_language: String,
    pub function_name: String,
    pub change_type: String,
    pub line_content: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassChangeRecord {
    pub repo_full_name: String,
    pub pr_number: i64,
    pub commit_hash: String,
    pub file_path: String,
    pub file_language: String,
    pub class_name: String,
    pub change_type: String,
    pub line_content: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffHunkRecord {
    pub repo_full_name: String,
    pub pr_number: i64,
    pub commit_hash: String,
    pub file_path: String,
    pub file_language: String,
    pub hunk_index: i64,
    pub old_start: i64,
    pub old_count: i64,
    pub new_start: i64,
    pub new_count: i64,
    pub context: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRecord {
    pub repo_full_name: String,
    pub pr_number: i64,
    pub commit_hash: String,
    pub file_path: String,
    pub file_language: String,
    pub import_statement: String,
    pub import_type: String,
    pub module_name: String,
    pub imported_items: Option<Vec<String>>,
    pub line_number: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewCommentRecord {
    pub repo_full_name: String,
    pub pr_number: i64,
    /// `review` or `review_comment`
    pub comment_type: String,
    pub reviewer: Option<String>,
    pub comment_text: String,
    pub file_path: Option<String>,
    pub line_number: Option<i64>,
    pub state: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// A decoded shard line.
#[derive(Debug, Clone, PartialEq)]
pub enum ShardRecord {
    Pr(PrRecord),
    Commit(CommitRecord),
    FileChange(FileChangeRecord),
    FunctionChange(FunctionChangeRecord),
    ClassChange(ClassChangeRecord),
    DiffHunk(DiffHunkRecord),
    Import(ImportRecord),
    ReviewComment(ReviewCommentRecord),
}

/// A record type that lives in exactly one shard kind.
pub trait ShardLine: Serialize {
    const KIND: ShardKind;
}

impl ShardLine for PrRecord {
    const KIND: ShardKind = ShardKind::PrData;
}
impl ShardLine for CommitRecord {
    const KIND: ShardKind = ShardKind::Commits;
}
impl ShardLine for FileChangeRecord {
    const KIND: ShardKind = ShardKind::FileChanges;
}
impl ShardLine for FunctionChangeRecord {
    const KIND: ShardKind = ShardKind::FunctionChanges;
}
impl ShardLine for ClassChangeRecord {
    const KIND: ShardKind = ShardKind::ClassChanges;
}
impl ShardLine for DiffHunkRecord {
    const KIND: ShardKind = ShardKind::DiffHunks;
}
impl ShardLine for ImportRecord {
    const KIND: ShardKind = ShardKind::Imports;
}
impl ShardLine for ReviewCommentRecord {
    const KIND: ShardKind = ShardKind::ReviewComments;
}

/// Append-only writer for the shards of one language.
pub struct ShardWriter {
    dir: PathBuf,
    language: Language,
    files: HashMap<ShardKind, File>,
}

impl ShardWriter {
    pub fn new(dir: impl Into<PathBuf>, language: Language) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create shard directory {}", dir.display()))?;
        Ok(Self {
            dir,
            language,
            files: HashMap::new(),
        })
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Append one record as a single line to its shard.
    pub fn append<R: ShardLine>(&mut self, record: &R) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let path = R::KIND.path(&self.dir, self.language);
        let file = match self.files.entry(R::KIND) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .with_context(|| format!("failed to open shard {}", path.display()))?,
            ),
        };
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append to shard {}", path.display()))?;
        Ok(())
    }
}

/// Open a shard for line-by-line reading. `None` if it does not exist.
pub fn open_shard(dir: &Path, language: Language, kind: ShardKind) -> Result<Option<BufReader<File>>> {
    let path = kind.path(dir, language);
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(&path).with_context(|| format!("failed to open shard {}", path.display()))?;
    Ok(Some(BufReader::new(file)))
}

/// Number of lines in a shard (0 if absent).
pub fn count_lines(dir: &Path, language: Language, kind: ShardKind) -> Result<usize> {
    let Some(reader) = open_shard(dir, language, kind)? else {
        return Ok(0);
    };
    let mut count = 0;
    for line in reader.lines() {
        line?;
        count += 1;
    }
    Ok(count)
}

#[derive(Deserialize)]
struct RepoRef {
    repo_full_name: String,
}

/// Every `repo_full_name` mentioned in any shard of a language.
///
/// Lines that do not carry the field are ignored.
pub fn scan_repo_names(dir: &Path, language: Language) -> Result<HashSet<String>> {
    let mut names = HashSet::new();
    for kind in ShardKind::ALL {
        let Some(reader) = open_shard(dir, language, kind)? else {
            continue;
        };
        for line in reader.lines() {
            let line = line?;
            if let Ok(r) = serde_json::from_str::<RepoRef>(&line) {
                names.insert(r.repo_full_name);
            }
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(repo: &str, hash: &str) -> CommitRecord {
        CommitRecord {
            repo_full_name: repo.to_string(),
            pr_number: 7,
            commit_hash: hash.to_string(),
            commit_message: "fix".to_string(),
            commit_author: Some("dev".to_string()),
            commit_author_email: None,
            committed_at: None,
            commit_stats: CommitStats::default(),
        }
    }

    #[test]
    fn test_file_names() {
        assert_eq!(ShardKind::PrData.file_name(Language::Python), "python_pr_data.jsonl");
        assert_eq!(
            ShardKind::ReviewComments.file_name(Language::Cpp),
            "cpp_review_comments.jsonl"
        );
    }

    #[test]
    fn test_append_and_scan() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = ShardWriter::new(tmp.path(), Language::Golang).unwrap();
        writer.append(&commit("a/one", "abc")).unwrap();
        writer.append(&commit("b/two", "def")).unwrap();
        drop(writer);

        let mut writer = ShardWriter::new(tmp.path(), Language::Golang).unwrap();
        writer.append(&commit("a/one", "123")).unwrap();

        assert_eq!(count_lines(tmp.path(), Language::Golang, ShardKind::Commits).unwrap(), 3);
        assert_eq!(count_lines(tmp.path(), Language::Golang, ShardKind::PrData).unwrap(), 0);

        let names = scan_repo_names(tmp.path(), Language::Golang).unwrap();
        assert_eq!(names.len(), 2);
        assert!(names.contains("b/two"));
        assert!(scan_repo_names(tmp.path(), Language::Java).unwrap().is_empty());
    }

    #[test]
    fn test_decode_classifies_errors() {
        let line = serde_json::to_string(&commit("a/b", "h")).unwrap();
        match ShardKind::Commits.decode(&line).unwrap() {
            ShardRecord::Commit(c) => assert_eq!(c.commit_hash, "h"),
            other => panic!("unexpected record {other:?}"),
        }

        assert!(matches!(
            ShardKind::Commits.decode("{not json"),
            Err(ShardError::Malformed(_))
        ));
        assert!(matches!(
            ShardKind::Commits.decode(r#"{"repo_full_name":"a/b"}"#),
            Err(ShardError::Invalid(_))
        ));
    }

    #[test]
    fn test_optional_fields_may_be_absent() {
        let line = r#"{"repo_full_name":"a/b","pr_number":3,"comment_type":"review","comment_text":"lgtm"}"#;
        match ShardKind::ReviewComments.decode(line).unwrap() {
            ShardRecord::ReviewComment(c) => {
                assert_eq!(c.reviewer, None);
                assert_eq!(c.line_number, None);
            }
            other => panic!("unexpected record {other:?}"),
        }
    }
}

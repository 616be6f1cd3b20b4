//! Ranked repository listings.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use prmine_semantic::Language;

use crate::remote::RepoRef;

/// One repository from a ranked listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoDescriptor {
    pub repo: RepoRef,
    pub language: Option<String>,
    pub stars: i64,
    pub pushed_at: Option<String>,
}

impl RepoDescriptor {
    pub fn full_name(&self) -> String {
        self.repo.full_name()
    }

    pub fn url(&self) -> String {
        format!("https://github.com/{}", self.full_name())
    }
}

/// Source of repositories to crawl, most starred first.
pub trait RepoListing: Send + Sync {
    /// Up to `batch_size` repositories with at least `min_stars` stars,
    /// starting at the `start_index`-th qualifying entry.
    fn load_batch(
        &self,
        language: Language,
        start_index: usize,
        batch_size: usize,
        min_stars: i64,
    ) -> Result<Vec<RepoDescriptor>>;
}

#[derive(Debug, Deserialize)]
struct ListingLine {
    repo_name: String,
    #[serde(default)]
    star_count: i64,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    latest_pushed_time: Option<String>,
}

/// Reads `top_<lang>_stars_this_year.jsonl` files from a directory.
pub struct JsonlRepoListing {
    dir: PathBuf,
}

impl JsonlRepoListing {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Listing files use `c++` and `go` where the registry says `cpp` and `golang`.
    pub fn file_label(language: Language) -> &'static str {
        match language {
            Language::Cpp => "c++",
            Language::Golang => "go",
            other => other.as_str(),
        }
    }

    pub fn path_for(&self, language: Language) -> PathBuf {
        self.dir
            .join(format!("top_{}_stars_this_year.jsonl", Self::file_label(language)))
    }
}

impl RepoListing for JsonlRepoListing {
    fn load_batch(
        &self,
        language: Language,
        start_index: usize,
        batch_size: usize,
        min_stars: i64,
    ) -> Result<Vec<RepoDescriptor>> {
        let path = self.path_for(language);
        if !path.exists() {
            error!("Repository file not found: {}", path.display());
            return Ok(Vec::new());
        }
        info!(
            "Loading repositories from {} (start {}, batch {})",
            path.display(),
            start_index,
            batch_size
        );

        let file = File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
        let mut repos = Vec::new();
        let mut index = 0usize;

        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: ListingLine = match serde_json::from_str(&line) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("{}:{}: skipping bad listing entry: {}", path.display(), line_no + 1, e);
                    continue;
                }
            };
            if entry.star_count < min_stars {
                continue;
            }
            // Unusable names take no slot, so consecutive windows never overlap.
            let Some(repo) = RepoRef::parse(&entry.repo_name) else {
                warn!(
                    "{}:{}: skipping repository name {:?}",
                    path.display(),
                    line_no + 1,
                    entry.repo_name
                );
                continue;
            };
            if index >= start_index {
                repos.push(RepoDescriptor {
                    repo,
                    language: entry.language,
                    stars: entry.star_count,
                    pushed_at: entry.latest_pushed_time,
                });
                if repos.len() >= batch_size {
                    break;
                }
            }
            index += 1;
        }

        info!("Loaded {} repositories for {}", repos.len(), language);
        Ok(repos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_listing(dir: &std::path::Path, label: &str, entries: &[(&str, i64)]) {
        let lines: Vec<String> = entries
            .iter()
            .map(|(name, stars)| {
                serde_json::json!({
                    "repo_name": name,
                    "star_count": stars,
                    "language": "Go",
                    "latest_pushed_time": "2024-06-01T00:00:00Z"
                })
                .to_string()
            })
            .collect();
        std::fs::write(
            dir.join(format!("top_{label}_stars_this_year.jsonl")),
            lines.join("\n"),
        )
        .unwrap();
    }

    #[test]
    fn test_language_aliases() {
        let listing = JsonlRepoListing::new("/data");
        assert!(listing
            .path_for(Language::Golang)
            .ends_with("top_go_stars_this_year.jsonl"));
        assert!(listing
            .path_for(Language::Cpp)
            .ends_with("top_c++_stars_this_year.jsonl"));
        assert!(listing
            .path_for(Language::Python)
            .ends_with("top_python_stars_this_year.jsonl"));
    }

    #[test]
    fn test_windows_skip_low_star_entries() {
        let tmp = tempfile::tempdir().unwrap();
        write_listing(
            tmp.path(),
            "go",
            &[
                ("a/one", 5000),
                ("b/low", 10),
                ("c/two", 3000),
                ("d/three", 2000),
                ("e/four", 1500),
            ],
        );
        let listing = JsonlRepoListing::new(tmp.path());

        let first = listing.load_batch(Language::Golang, 0, 2, 1000).unwrap();
        let names: Vec<_> = first.iter().map(|r| r.full_name()).collect();
        assert_eq!(names, vec!["a/one", "c/two"]);

        let second = listing.load_batch(Language::Golang, 2, 2, 1000).unwrap();
        let names: Vec<_> = second.iter().map(|r| r.full_name()).collect();
        assert_eq!(names, vec!["d/three", "e/four"]);

        assert!(listing.load_batch(Language::Golang, 4, 2, 1000).unwrap().is_empty());
        assert_eq!(first[0].url(), "https://github.com/a/one");
    }

    #[test]
    fn test_bad_names_do_not_shift_windows() {
        let tmp = tempfile::tempdir().unwrap();
        write_listing(
            tmp.path(),
            "go",
            &[
                ("a/one", 5000),
                ("no-slash", 4000),
                ("c/two", 3000),
                ("d/three", 2000),
            ],
        );
        let listing = JsonlRepoListing::new(tmp.path());

        let mut seen = Vec::new();
        for start in [0, 2] {
            let batch = listing.load_batch(Language::Golang, start, 2, 1000).unwrap();
            seen.extend(batch.iter().map(|r| r.full_name()));
        }
        assert_eq!(seen, vec!["a/one", "c/two", "d/three"]);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let listing = JsonlRepoListing::new(tmp.path());
        assert!(listing.load_batch(Language::Java, 0, 50, 1000).unwrap().is_empty());
    }
}

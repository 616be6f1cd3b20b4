//! Crawl configuration loading.
//!
//! Configuration lives in a TOML file (`prmine.toml` by default) with three
//! sections:
//!
//! ```toml
//! [crawl]
//! languages = ["python", "golang"]
//! target_repos = 100
//! min_stars = 1000
//!
//! [retry]
//! max_attempts = 3
//!
//! [pacing]
//! commit_ms = 300
//! ```
//!
//! Every key is optional. A missing file yields the defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use prmine_semantic::Language;

pub const DEFAULT_CONFIG_FILE: &str = "prmine.toml";

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub crawl: CrawlSettings,
    pub retry: RetrySettings,
    pub pacing: PacingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlSettings {
    /// Languages crawled in order.
    pub languages: Vec<Language>,
    /// Successfully processed repositories wanted per language.
    pub target_repos: usize,
    /// Keep at most this many merged PRs per repository.
    pub max_prs_per_repo: Option<usize>,
    pub min_stars: i64,
    /// Listing window size.
    pub batch_size: usize,
    /// Repositories with more merged PRs than this are skipped.
    pub pr_ceiling: usize,
    /// Directory holding `top_<lang>_stars_this_year.jsonl` listings.
    pub repos_dir: PathBuf,
    /// Directory receiving shards and checkpoints.
    pub output_dir: PathBuf,
    pub api_base_url: String,
    pub user_agent: String,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            languages: vec![Language::Python],
            target_repos: 100,
            max_prs_per_repo: None,
            min_stars: 1000,
            batch_size: 50,
            pr_ceiling: 200,
            repos_dir: PathBuf::from("top_2000_star_repos_this_year"),
            output_dir: PathBuf::from("github_pr_data"),
            api_base_url: "https://api.github.com".to_string(),
            user_agent: "prmine".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    /// Below this many remaining calls, pause before each request.
    pub low_water_mark: u64,
    pub cooldown_secs: u64,
    /// Minimum sleep after a quota rejection.
    pub quota_floor_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            low_water_mark: 50,
            cooldown_secs: 60,
            quota_floor_secs: 3600,
            request_timeout_secs: 30,
        }
    }
}

impl RetrySettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Delays between remote calls, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingSettings {
    pub pr_page_ms: u64,
    pub page_ms: u64,
    pub commit_ms: u64,
    pub pr_ms: u64,
    pub language_ms: u64,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            pr_page_ms: 500,
            page_ms: 200,
            commit_ms: 300,
            pr_ms: 1000,
            language_ms: 5000,
        }
    }
}

impl PacingSettings {
    /// No pauses at all.
    pub fn none() -> Self {
        Self {
            pr_page_ms: 0,
            page_ms: 0,
            commit_ms: 0,
            pr_ms: 0,
            language_ms: 0,
        }
    }

    pub fn pr_page(&self) -> Duration {
        Duration::from_millis(self.pr_page_ms)
    }

    pub fn page(&self) -> Duration {
        Duration::from_millis(self.page_ms)
    }

    pub fn commit(&self) -> Duration {
        Duration::from_millis(self.commit_ms)
    }

    pub fn pr(&self) -> Duration {
        Duration::from_millis(self.pr_ms)
    }

    pub fn language(&self) -> Duration {
        Duration::from_millis(self.language_ms)
    }
}

impl CrawlConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Apply `PRMINE_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(n) = lookup("PRMINE_TARGET_REPOS").and_then(|v| v.parse().ok()) {
            self.crawl.target_repos = n;
        }
        if let Some(n) = lookup("PRMINE_MAX_PRS").and_then(|v| v.parse().ok()) {
            self.crawl.max_prs_per_repo = Some(n);
        }
        if let Some(n) = lookup("PRMINE_PR_CEILING").and_then(|v| v.parse().ok()) {
            self.crawl.pr_ceiling = n;
        }
    }
}

/// Parse `KEY=VALUE` lines, ignoring blanks and `#` comments.
pub fn parse_env_file(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            (key.trim().to_string(), value.to_string())
        })
        .collect()
}

/// Resolve the GitHub token from `GITHUB_TOKEN` or a `.env` file.
pub fn load_github_token(env_file: &Path) -> Result<String> {
    if let Some(token) = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()) {
        return Ok(token);
    }
    token_from_env_file(env_file)
}

fn token_from_env_file(env_file: &Path) -> Result<String> {
    if env_file.exists() {
        let contents = std::fs::read_to_string(env_file)
            .with_context(|| format!("Failed to read {}", env_file.display()))?;
        if let Some(token) = parse_env_file(&contents)
            .remove("GITHUB_TOKEN")
            .filter(|t| !t.is_empty())
        {
            return Ok(token);
        }
    }
    bail!("GITHUB_TOKEN is not set (export it or add it to {})", env_file.display())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = CrawlConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config, CrawlConfig::default());
        assert_eq!(config.crawl.batch_size, 50);
        assert_eq!(config.crawl.pr_ceiling, 200);
        assert_eq!(config.retry.quota_floor_secs, 3600);
        assert_eq!(config.pacing.commit_ms, 300);
    }

    #[test]
    fn test_partial_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("prmine.toml");
        std::fs::write(
            &path,
            "[crawl]\nlanguages = [\"golang\", \"cpp\"]\nmax_prs_per_repo = 20\n\n[pacing]\npr_ms = 0\n",
        )
        .unwrap();

        let config = CrawlConfig::load(&path).unwrap();
        assert_eq!(config.crawl.languages, vec![Language::Golang, Language::Cpp]);
        assert_eq!(config.crawl.max_prs_per_repo, Some(20));
        assert_eq!(config.crawl.min_stars, 1000);
        assert_eq!(config.pacing.pr_ms, 0);
        assert_eq!(config.pacing.page_ms, 200);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("prmine.toml");
        std::fs::write(&path, "[crawl]\nlanguages = [\"cobol\"]\n").unwrap();
        assert!(CrawlConfig::load(&path).is_err());
    }

    #[test]
    fn test_overrides() {
        let mut config = CrawlConfig::default();
        let vars: HashMap<&str, &str> = [
            ("PRMINE_TARGET_REPOS", "7"),
            ("PRMINE_MAX_PRS", "15"),
            ("PRMINE_PR_CEILING", "not-a-number"),
        ]
        .into_iter()
        .collect();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.crawl.target_repos, 7);
        assert_eq!(config.crawl.max_prs_per_repo, Some(15));
        assert_eq!(config.crawl.pr_ceiling, 200);
    }

    #[test]
    fn test_env_file_parsing() {
        let vars = parse_env_file("# comment\n\nGITHUB_TOKEN=\"ghp_abc\"\nOTHER = x\nnoequals\n");
        assert_eq!(vars.get("GITHUB_TOKEN").map(String::as_str), Some("ghp_abc"));
        assert_eq!(vars.get("OTHER").map(String::as_str), Some("x"));
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn test_token_from_env_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".env");
        assert!(token_from_env_file(&path).is_err());
        std::fs::write(&path, "GITHUB_TOKEN=ghp_123\n").unwrap();
        assert_eq!(token_from_env_file(&path).unwrap(), "ghp_123");
    }
}

//! The remote pull request source.
//!
//! [`RemoteSource`] is the seam between the crawler and GitHub. Every
//! method returns `None` when the resource is absent or could not be
//! fetched after retries; the crawler treats absence as "skip", never as
//! an error.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Page size for every list endpoint.
pub const PER_PAGE: usize = 100;

/// `owner/name` of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Split `owner/name`. `None` if there is no slash.
    pub fn parse(full_name: &str) -> Option<Self> {
        let (owner, name) = full_name.split_once('/')?;
        if owner.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(owner, name))
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Filter and ordering for the pull request list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullQuery {
    pub state: &'static str,
    pub sort: &'static str,
    pub direction: &'static str,
}

impl Default for PullQuery {
    /// Closed PRs, most recently updated first.
    fn default() -> Self {
        Self {
            state: "closed",
            sort: "updated",
            direction: "desc",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitActor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitInfo {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: Option<GitActor>,
    #[serde(default)]
    pub committer: Option<GitActor>,
}

/// A commit as listed on a pull request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrCommit {
    pub sha: String,
    #[serde(default)]
    pub commit: CommitInfo,
}

/// A changed file, from either the PR file list or a commit detail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub filename: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub additions: i64,
    #[serde(default)]
    pub deletions: i64,
    #[serde(default)]
    pub changes: i64,
    #[serde(default)]
    pub patch: Option<String>,
}

fn default_status() -> String {
    "modified".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewComment {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub line: Option<i64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStats {
    #[serde(default)]
    pub additions: i64,
    #[serde(default)]
    pub deletions: i64,
    #[serde(default)]
    pub total: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitDetail {
    pub sha: String,
    #[serde(default)]
    pub stats: CommitStats,
    #[serde(default)]
    pub files: Vec<ChangedFile>,
}

/// API calls made so far and the last reported remaining quota.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiUsage {
    pub calls: u64,
    pub remaining: u64,
}

#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn list_pulls(&self, repo: &RepoRef, query: &PullQuery, page: u32) -> Option<Vec<PullRequest>>;

    async fn list_pr_commits(&self, repo: &RepoRef, pr_number: i64, page: u32) -> Option<Vec<PrCommit>>;

    async fn list_pr_files(&self, repo: &RepoRef, pr_number: i64, page: u32) -> Option<Vec<ChangedFile>>;

    async fn list_pr_reviews(&self, repo: &RepoRef, pr_number: i64, page: u32) -> Option<Vec<Review>>;

    async fn list_pr_review_comments(
        &self,
        repo: &RepoRef,
        pr_number: i64,
        page: u32,
    ) -> Option<Vec<ReviewComment>>;

    async fn commit_detail(&self, repo: &RepoRef, sha: &str) -> Option<CommitDetail>;

    /// File content at a ref, decoded to text (invalid UTF-8 replaced).
    async fn file_content(&self, repo: &RepoRef, path: &str, git_ref: &str) -> Option<String>;

    fn usage(&self) -> ApiUsage;
}

/// Fetch pages 1, 2, ... until a page is absent, empty or short.
pub async fn collect_pages<T, F, Fut>(mut fetch: F, pause: Duration) -> Vec<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<Vec<T>>>,
{
    let mut items = Vec::new();
    let mut page = 1;
    loop {
        let Some(batch) = fetch(page).await else {
            break;
        };
        if batch.is_empty() {
            break;
        }
        let short = batch.len() < PER_PAGE;
        items.extend(batch);
        if short {
            break;
        }
        page += 1;
        tokio::time::sleep(pause).await;
    }
    items
}

//! GitHub REST implementation of [`RemoteSource`].

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use tracing::warn;

use crate::backoff::{RawResponse, RetryingClient, Transport};
use crate::config::{CrawlSettings, RetrySettings};
use crate::remote::{
    ApiUsage, ChangedFile, CommitDetail, PrCommit, PullQuery, PullRequest, RemoteSource, RepoRef,
    Review, ReviewComment, PER_PAGE,
};

/// reqwest-backed [`Transport`] carrying the token and GitHub headers.
pub struct ReqwestTransport {
    client: reqwest::Client,
    token: String,
}

impl ReqwestTransport {
    pub fn new(token: impl Into<String>, user_agent: &str, retry: &RetrySettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(retry.request_timeout())
            .build()?;
        Ok(Self {
            client,
            token: token.into(),
        })
    }
}

/// Percent-encode each segment of a repository path, keeping the separators.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn header<T: std::str::FromStr>(response: &reqwest::Response, name: &str) -> Option<T> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<RawResponse> {
        let response = self
            .client
            .get(url)
            .query(query)
            .header("Authorization", format!("token {}", self.token))
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await?;

        let status = response.status().as_u16();
        let rate_remaining = header(&response, "X-RateLimit-Remaining");
        let rate_reset = header(&response, "X-RateLimit-Reset");
        let body = response.text().await?;

        Ok(RawResponse {
            status,
            rate_remaining,
            rate_reset,
            body,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ContentPayload {
    #[serde(default)]
    encoding: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// Decode a contents-API payload. Only base64 payloads carry text.
fn decode_content(payload: ContentPayload) -> Option<String> {
    if payload.encoding.as_deref() != Some("base64") {
        return None;
    }
    let packed: String = payload.content?.chars().filter(|c| !c.is_whitespace()).collect();
    match base64::engine::general_purpose::STANDARD.decode(packed) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            warn!("Undecodable file content: {}", e);
            None
        }
    }
}

/// GitHub REST client.
pub struct GithubClient<T = ReqwestTransport> {
    http: RetryingClient<T>,
    base_url: String,
}

impl GithubClient<ReqwestTransport> {
    /// Client for api.github.com (or the configured base URL).
    pub fn from_settings(token: &str, crawl: &CrawlSettings, retry: &RetrySettings) -> Result<Self> {
        let transport = ReqwestTransport::new(token, &crawl.user_agent, retry)?;
        Ok(Self::with_transport(transport, retry.clone(), &crawl.api_base_url))
    }
}

impl<T: Transport> GithubClient<T> {
    pub fn with_transport(transport: T, retry: RetrySettings, base_url: &str) -> Self {
        Self {
            http: RetryingClient::new(transport, retry),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn repo_url(&self, repo: &RepoRef, tail: &str) -> String {
        format!("{}/repos/{}/{}/{}", self.base_url, repo.owner, repo.name, tail)
    }

    fn page_query(page: u32) -> Vec<(&'static str, String)> {
        vec![("per_page", PER_PAGE.to_string()), ("page", page.to_string())]
    }
}

#[async_trait]
impl<T: Transport> RemoteSource for GithubClient<T> {
    async fn list_pulls(&self, repo: &RepoRef, query: &PullQuery, page: u32) -> Option<Vec<PullRequest>> {
        let mut params = vec![
            ("state", query.state.to_string()),
            ("sort", query.sort.to_string()),
            ("direction", query.direction.to_string()),
        ];
        params.extend(Self::page_query(page));
        self.http.get_json(&self.repo_url(repo, "pulls"), &params).await
    }

    async fn list_pr_commits(&self, repo: &RepoRef, pr_number: i64, page: u32) -> Option<Vec<PrCommit>> {
        let url = self.repo_url(repo, &format!("pulls/{pr_number}/commits"));
        self.http.get_json(&url, &Self::page_query(page)).await
    }

    async fn list_pr_files(&self, repo: &RepoRef, pr_number: i64, page: u32) -> Option<Vec<ChangedFile>> {
        let url = self.repo_url(repo, &format!("pulls/{pr_number}/files"));
        self.http.get_json(&url, &Self::page_query(page)).await
    }

    async fn list_pr_reviews(&self, repo: &RepoRef, pr_number: i64, page: u32) -> Option<Vec<Review>> {
        let url = self.repo_url(repo, &format!("pulls/{pr_number}/reviews"));
        self.http.get_json(&url, &Self::page_query(page)).await
    }

    async fn list_pr_review_comments(
        &self,
        repo: &RepoRef,
        pr_number: i64,
        page: u32,
    ) -> Option<Vec<ReviewComment>> {
        let url = self.repo_url(repo, &format!("pulls/{pr_number}/comments"));
        self.http.get_json(&url, &Self::page_query(page)).await
    }

    async fn commit_detail(&self, repo: &RepoRef, sha: &str) -> Option<CommitDetail> {
        let url = self.repo_url(repo, &format!("commits/{sha}"));
        self.http.get_json(&url, &[]).await
    }

    async fn file_content(&self, repo: &RepoRef, path: &str, git_ref: &str) -> Option<String> {
        let url = self.repo_url(repo, &format!("contents/{}", encode_path(path)));
        let payload: ContentPayload = self.http.get_json(&url, &[("ref", git_ref.to_string())]).await?;
        decode_content(payload)
    }

    fn usage(&self) -> ApiUsage {
        ApiUsage {
            calls: self.http.tracker().calls(),
            remaining: self.http.tracker().remaining(),
        }
    }
}

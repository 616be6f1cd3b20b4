//! prmine-core: the resumable pull request crawler.

pub mod backoff;
pub mod checkpoint;
pub mod config;
pub mod crawler;
pub mod github;
pub mod listing;
pub mod remote;
pub mod report;

pub use backoff::{RateLimitTracker, RawResponse, RetryingClient, Transport};
pub use checkpoint::{Checkpoint, CheckpointStore, RepoStatus};
pub use config::{
    load_github_token, parse_env_file, CrawlConfig, CrawlSettings, PacingSettings, RetrySettings,
    DEFAULT_CONFIG_FILE,
};
pub use crawler::{CrawlController, CrawlPhase, MergedPrs};
pub use github::{GithubClient, ReqwestTransport};
pub use listing::{JsonlRepoListing, RepoDescriptor, RepoListing};
pub use remote::{ApiUsage, PullQuery, RemoteSource, RepoRef};
pub use report::{CrawlReport, LanguageReport, PrOutcome, RepoOutcome};

//! The resumable crawl controller.
//!
//! Per language the controller walks
//! `Idle → Resuming → FetchingRepoBatch → ProcessingRepo → ProcessingPr →
//! ProcessingCommit → Done`, appending facts to the language's shards and
//! recording every repository outcome in the checkpoint. All remote calls
//! are awaited one at a time.

use std::fmt;

use anyhow::Result;
use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use prmine_ingest::shard::CommitStats as ShardCommitStats;
use prmine_ingest::{
    scan_repo_names, ClassChangeRecord, CommitRecord, DiffHunkRecord, FileChangeRecord,
    FunctionChangeRecord, ImportRecord, PrRecord, PrStats, ReviewCommentRecord, ShardWriter,
};
use prmine_semantic::{analyze_patch, extract_imports, language_for_path, ChangeFact, Language};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::CrawlConfig;
use crate::listing::{RepoDescriptor, RepoListing};
use crate::remote::{
    collect_pages, ChangedFile, PrCommit, PullQuery, PullRequest, RemoteSource, RepoRef, PER_PAGE,
};
use crate::report::{CrawlReport, LanguageReport, PrOutcome, RepoOutcome};

/// A full first page with more merged PRs than this triggers the size estimate.
const SAMPLE_MERGED_THRESHOLD: usize = 80;
/// Estimated merged PRs = merged on page one × this.
const ESTIMATE_MULTIPLIER: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlPhase {
    Idle,
    Resuming,
    FetchingRepoBatch,
    ProcessingRepo,
    ProcessingPr,
    ProcessingCommit,
    Done,
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CrawlPhase::Idle => "idle",
            CrawlPhase::Resuming => "resuming",
            CrawlPhase::FetchingRepoBatch => "fetching-repo-batch",
            CrawlPhase::ProcessingRepo => "processing-repo",
            CrawlPhase::ProcessingPr => "processing-pr",
            CrawlPhase::ProcessingCommit => "processing-commit",
            CrawlPhase::Done => "done",
        };
        f.write_str(s)
    }
}

/// Result of listing a repository's merged pull requests.
#[derive(Debug, Clone, PartialEq)]
pub enum MergedPrs {
    Listed(Vec<PullRequest>),
    TooMany { estimate: usize },
}

pub struct CrawlController<R, L> {
    remote: R,
    listing: L,
    config: CrawlConfig,
    checkpoints: CheckpointStore,
    phase: CrawlPhase,
}

impl<R: RemoteSource, L: RepoListing> CrawlController<R, L> {
    /// Checkpoints are kept next to the shards in the output directory.
    pub fn new(remote: R, listing: L, config: CrawlConfig) -> Self {
        let checkpoints = CheckpointStore::new(config.crawl.output_dir.clone());
        Self {
            remote,
            listing,
            config,
            checkpoints,
            phase: CrawlPhase::Idle,
        }
    }

    pub fn phase(&self) -> CrawlPhase {
        self.phase
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn listing(&self) -> &L {
        &self.listing
    }

    fn enter(&mut self, phase: CrawlPhase) {
        if self.phase != phase {
            debug!("[CRAWL] {} -> {}", self.phase, phase);
            self.phase = phase;
        }
    }

    /// Crawl every configured language in order.
    pub async fn run(&mut self) -> Result<CrawlReport> {
        let languages = self.config.crawl.languages.clone();
        let mut report = CrawlReport::default();

        for (i, language) in languages.into_iter().enumerate() {
            if i > 0 {
                sleep(self.config.pacing.language()).await;
            }
            info!("[CRAWL] Starting {}", language);
            let language_report = self.crawl_language(language).await?;
            report.languages.push(language_report);
        }

        self.enter(CrawlPhase::Done);
        report.set_usage(self.remote.usage());
        Ok(report)
    }

    /// Crawl one language until the target, the end of the listing, or a
    /// short listing window.
    pub async fn crawl_language(&mut self, language: Language) -> Result<LanguageReport> {
        let mut report = LanguageReport::new(language);
        let target = self.config.crawl.target_repos;
        let batch_size = self.config.crawl.batch_size.max(1);
        let min_stars = self.config.crawl.min_stars;

        self.enter(CrawlPhase::Resuming);
        let mut checkpoint = self.resume(language)?;
        let mut completed = checkpoint.completed_count();
        info!(
            "[CRAWL] {}: {} repositories already processed, target {}",
            language, completed, target
        );
        if completed >= target {
            info!("[CRAWL] {}: target already reached", language);
            return Ok(report);
        }

        let mut writer = ShardWriter::new(self.config.crawl.output_dir.clone(), language)?;
        let mut start_index = 0;

        'batches: loop {
            self.enter(CrawlPhase::FetchingRepoBatch);
            let batch = self
                .listing
                .load_batch(language, start_index, batch_size, min_stars)?;
            if batch.is_empty() {
                info!("[CRAWL] {}: listing exhausted", language);
                break;
            }

            for repo in &batch {
                let full_name = repo.full_name();
                if checkpoint.is_completed(&full_name) {
                    debug!("[CRAWL] Skipping already processed {}", full_name);
                    report.record_repo(&RepoOutcome::SkippedAlreadyProcessed);
                    continue;
                }

                let outcome = self.process_repo(repo, &mut writer, &mut report).await;
                report.record_repo(&outcome);
                if let Some(status) = outcome.status() {
                    checkpoint.record(&full_name, status);
                    self.checkpoints.save(&checkpoint)?;
                }
                if outcome.is_completed() {
                    completed += 1;
                    info!(
                        "[CRAWL] {}: completed {} ({}/{})",
                        language, full_name, completed, target
                    );
                    if completed >= target {
                        break 'batches;
                    }
                }
            }

            if batch.len() < batch_size {
                info!("[CRAWL] {}: last listing window reached", language);
                break;
            }
            start_index += batch_size;
        }

        info!(
            "[CRAWL] {}: {} completed, {} PRs processed",
            language, report.repos_completed, report.prs_processed
        );
        Ok(report)
    }

    /// Load the language checkpoint, or seed one from the existing shards.
    fn resume(&self, language: Language) -> Result<Checkpoint> {
        if let Some(checkpoint) = self.checkpoints.load(language)? {
            return Ok(checkpoint);
        }
        let names = scan_repo_names(&self.config.crawl.output_dir, language)?;
        let checkpoint = Checkpoint::seeded(language, names);
        if !checkpoint.repos.is_empty() {
            info!(
                "[CRAWL] {}: seeded checkpoint with {} repositories found in shards",
                language,
                checkpoint.repos.len()
            );
            self.checkpoints.save(&checkpoint)?;
        }
        Ok(checkpoint)
    }

    async fn process_repo(
        &mut self,
        repo: &RepoDescriptor,
        writer: &mut ShardWriter,
        report: &mut LanguageReport,
    ) -> RepoOutcome {
        self.enter(CrawlPhase::ProcessingRepo);
        let full_name = repo.full_name();
        info!("[CRAWL] Processing {} ({} stars)", full_name, repo.stars);

        let prs = match self.fetch_merged_prs(&repo.repo).await {
            MergedPrs::Listed(prs) => prs,
            MergedPrs::TooMany { estimate } => {
                warn!(
                    "[CRAWL] Skipping {}: about {} merged PRs exceeds the ceiling of {}",
                    full_name, estimate, self.config.crawl.pr_ceiling
                );
                return RepoOutcome::SkippedTooManyPrs {
                    merged_estimate: estimate,
                };
            }
        };
        if prs.is_empty() {
            info!("[CRAWL] {} has no merged PRs", full_name);
            return RepoOutcome::SkippedNoPrs;
        }
        info!("[CRAWL] {}: {} merged PRs", full_name, prs.len());

        let mut prs_processed = 0;
        for pr in &prs {
            match self.process_pr(repo, pr, writer).await {
                Ok(outcome) => {
                    if outcome.processed {
                        prs_processed += 1;
                    }
                    report.record_pr(&outcome);
                }
                Err(e) => {
                    error!("[CRAWL] {} failed at PR #{}: {:#}", full_name, pr.number, e);
                    return RepoOutcome::Failed(format!("{e:#}"));
                }
            }
            sleep(self.config.pacing.pr()).await;
        }

        if prs_processed > 0 {
            RepoOutcome::Completed { prs_processed }
        } else {
            RepoOutcome::Incomplete
        }
    }

    /// Page through closed PRs, keeping merged ones, until the size policy
    /// rejects the repository or the list runs out.
    pub async fn fetch_merged_prs(&self, repo: &RepoRef) -> MergedPrs {
        let ceiling = self.config.crawl.pr_ceiling;
        let limit = self.config.crawl.max_prs_per_repo;
        let query = PullQuery::default();
        let mut merged = Vec::new();
        let mut page = 1;

        loop {
            let Some(batch) = self.remote.list_pulls(repo, &query, page).await else {
                break;
            };
            if batch.is_empty() {
                break;
            }
            let full_page = batch.len() >= PER_PAGE;
            let page_merged: Vec<PullRequest> =
                batch.into_iter().filter(|pr| pr.merged_at.is_some()).collect();

            if page == 1 && full_page && page_merged.len() > SAMPLE_MERGED_THRESHOLD {
                let estimate = page_merged.len() * ESTIMATE_MULTIPLIER;
                if estimate > ceiling {
                    return MergedPrs::TooMany { estimate };
                }
            }

            merged.extend(page_merged);
            if merged.len() > ceiling {
                return MergedPrs::TooMany {
                    estimate: merged.len(),
                };
            }

            if let Some(limit) = limit {
                if merged.len() >= limit {
                    merged.truncate(limit);
                    break;
                }
            }
            if !full_page {
                break;
            }
            page += 1;
            sleep(self.config.pacing.pr_page()).await;
        }

        MergedPrs::Listed(merged)
    }

    async fn process_pr(
        &mut self,
        repo: &RepoDescriptor,
        pr: &PullRequest,
        writer: &mut ShardWriter,
    ) -> Result<PrOutcome> {
        self.enter(CrawlPhase::ProcessingPr);
        let full_name = repo.full_name();
        let number = pr.number;
        debug!("[CRAWL] Processing PR #{} in {}", number, full_name);

        let pause = self.config.pacing.page();
        let remote = &self.remote;
        let target = &repo.repo;
        let commits =
            collect_pages(move |page| remote.list_pr_commits(target, number, page), pause).await;
        if commits.is_empty() {
            warn!("[CRAWL] No commits found for PR #{} in {}", number, full_name);
            return Ok(PrOutcome::skipped());
        }
        let files =
            collect_pages(move |page| remote.list_pr_files(target, number, page), pause).await;
        let reviews =
            collect_pages(move |page| remote.list_pr_reviews(target, number, page), pause).await;
        let comments = collect_pages(
            move |page| remote.list_pr_review_comments(target, number, page),
            pause,
        )
        .await;

        let pr_stats = PrStats {
            additions: files.iter().map(|f| f.additions).sum(),
            deletions: files.iter().map(|f| f.deletions).sum(),
            changed_files: files.len() as i64,
            commits_count: commits.len() as i64,
            reviews_count: reviews.len() as i64,
            review_comments_count: comments.len() as i64,
        };
        let repo_language = repo
            .language
            .clone()
            .unwrap_or_else(|| writer.language().as_str().to_string());
        writer.append(&PrRecord {
            repo_full_name: full_name.clone(),
            repo_language,
            repo_stars: repo.stars,
            pr_number: number,
            pr_title: pr.title.clone().unwrap_or_default(),
            pr_body: pr.body.clone(),
            pr_author: pr.user.as_ref().map(|u| u.login.clone()),
            pr_created_at: pr.created_at,
            pr_merged_at: pr.merged_at,
            pr_stats,
            processed_at: Utc::now(),
        })?;

        for review in &reviews {
            let Some(body) = review.body.as_deref().filter(|b| !b.is_empty()) else {
                continue;
            };
            writer.append(&ReviewCommentRecord {
                repo_full_name: full_name.clone(),
                pr_number: number,
                comment_type: "review".to_string(),
                reviewer: review.user.as_ref().map(|u| u.login.clone()),
                comment_text: body.to_string(),
                file_path: None,
                line_number: None,
                state: review.state.clone(),
                created_at: review.submitted_at,
            })?;
        }
        for comment in &comments {
            let Some(body) = comment.body.as_deref().filter(|b| !b.is_empty()) else {
                continue;
            };
            writer.append(&ReviewCommentRecord {
                repo_full_name: full_name.clone(),
                pr_number: number,
                comment_type: "review_comment".to_string(),
                reviewer: comment.user.as_ref().map(|u| u.login.clone()),
                comment_text: body.to_string(),
                file_path: comment.path.clone(),
                line_number: comment.line,
                state: None,
                created_at: comment.created_at,
            })?;
        }

        let mut outcome = PrOutcome::default();
        for commit in &commits {
            if self.process_commit(repo, number, commit, writer, &mut outcome).await? {
                outcome.commits_processed += 1;
            }
            sleep(self.config.pacing.commit()).await;
        }
        outcome.processed = outcome.commits_processed > 0;
        Ok(outcome)
    }

    /// Returns `false` when the commit detail is unavailable.
    async fn process_commit(
        &mut self,
        repo: &RepoDescriptor,
        pr_number: i64,
        commit: &PrCommit,
        writer: &mut ShardWriter,
        outcome: &mut PrOutcome,
    ) -> Result<bool> {
        self.enter(CrawlPhase::ProcessingCommit);
        let Some(detail) = self.remote.commit_detail(&repo.repo, &commit.sha).await else {
            debug!("[CRAWL] No detail for commit {}, skipping", commit.sha);
            return Ok(false);
        };

        let author = commit.commit.author.as_ref();
        writer.append(&CommitRecord {
            repo_full_name: repo.full_name(),
            pr_number,
            commit_hash: commit.sha.clone(),
            commit_message: commit.commit.message.clone(),
            commit_author: author.and_then(|a| a.name.clone()),
            commit_author_email: author.and_then(|a| a.email.clone()),
            committed_at: commit.commit.committer.as_ref().and_then(|c| c.date),
            commit_stats: ShardCommitStats {
                additions: detail.stats.additions,
                deletions: detail.stats.deletions,
                total: detail.stats.total,
            },
        })?;

        let site = FileSite {
            repo_full_name: repo.full_name(),
            pr_number,
            commit_hash: commit.sha.clone(),
        };
        for file in &detail.files {
            self.process_file(repo, &site, file, writer, outcome).await?;
        }
        Ok(true)
    }

    async fn process_file(
        &self,
        repo: &RepoDescriptor,
        site: &FileSite,
        file: &ChangedFile,
        writer: &mut ShardWriter,
        outcome: &mut PrOutcome,
    ) -> Result<()> {
        let language = language_for_path(&file.filename);
        writer.append(&FileChangeRecord {
            repo_full_name: site.repo_full_name.clone(),
            pr_number: site.pr_number,
            commit_hash: site.commit_hash.clone(),
            file_path: file.filename.clone(),
            file_language: language.map(|l| l.as_str().to_string()),
            change_type: file.status.clone(),
            additions: file.additions,
            deletions: file.deletions,
            changes: file.changes,
            patch_content: file.patch.clone(),
        })?;

        let Some(language) = language else {
            return Ok(());
        };
        *outcome.file_languages.entry(language).or_default() += 1;

        if let Some(patch) = file.patch.as_deref().filter(|p| !p.is_empty()) {
            let analysis = analyze_patch(patch, language);
            for fact in &analysis.functions {
                writer.append(&function_record(site, &file.filename, fact))?;
            }
            for fact in &analysis.classes {
                writer.append(&class_record(site, &file.filename, fact))?;
            }
            for (index, hunk) in analysis.hunks.iter().enumerate() {
                writer.append(&DiffHunkRecord {
                    repo_full_name: site.repo_full_name.clone(),
                    pr_number: site.pr_number,
                    commit_hash: site.commit_hash.clone(),
                    file_path: file.filename.clone(),
                    file_language: language.as_str().to_string(),
                    hunk_index: index as i64,
                    old_start: hunk.old_start.into(),
                    old_count: hunk.old_count.into(),
                    new_start: hunk.new_start.into(),
                    new_count: hunk.new_count.into(),
                    context: hunk.context.clone(),
                    content: hunk.content(),
                })?;
            }
            outcome.functions += analysis.functions.len();
            outcome.classes += analysis.classes.len();
        }

        if let Some(content) = self
            .remote
            .file_content(&repo.repo, &file.filename, &site.commit_hash)
            .await
        {
            let imports = extract_imports(&content, language);
            for import in &imports {
                writer.append(&ImportRecord {
                    repo_full_name: site.repo_full_name.clone(),
                    pr_number: site.pr_number,
                    commit_hash: site.commit_hash.clone(),
                    file_path: file.filename.clone(),
                    file_language: language.as_str().to_string(),
                    import_statement: import.statement.clone(),
                    import_type: import.kind.as_str().to_string(),
                    module_name: import.module_name.clone(),
                    imported_items: import.imported_items.clone(),
                    line_number: import.line_number as i64,
                })?;
            }
            outcome.imports += imports.len();
        }
        Ok(())
    }
}

/// Natural key shared by every fact derived from one commit.
struct FileSite {
    repo_full_name: String,
    pr_number: i64,
    commit_hash: String,
}

fn function_record(site: &FileSite, file_path: &str, fact: &ChangeFact) -> FunctionChangeRecord {
    FunctionChangeRecord {
        repo_full_name: site.repo_full_name.clone(),
        pr_number: site.pr_number,
        commit_hash: site.commit_hash.clone(),
        file_path: file_path.to_string(),
        file_language: fact.language.as_str().to_string(),
        function_name: fact.name.clone(),
        change_type: fact.change_type.as_str().to_string(),
        line_content: fact.line_content.clone(),
        source: fact.source.as_str().to_string(),
    }
}

fn class_record(site: &FileSite, file_path: &str, fact: &ChangeFact) -> ClassChangeRecord {
    ClassChangeRecord {
        repo_full_name: site.repo_full_name.clone(),
        pr_number: site.pr_number,
        commit_hash: site.commit_hash.clone(),
        file_path: file_path.to_string(),
        file_language: fact.language.as_str().to_string(),
        class_name: fact.name.clone(),
        change_type: fact.change_type.as_str().to_string(),
        line_content: fact.line_content.clone(),
        source: fact.source.as_str().to_string(),
    }
}

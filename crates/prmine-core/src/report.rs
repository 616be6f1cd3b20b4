//! Crawl outcomes, returned up the call chain and summed by the caller.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use prmine_semantic::Language;

use crate::checkpoint::RepoStatus;
use crate::remote::ApiUsage;

/// What happened to one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoOutcome {
    Completed { prs_processed: usize },
    SkippedAlreadyProcessed,
    SkippedNoPrs,
    SkippedTooManyPrs { merged_estimate: usize },
    /// Merged PRs were found but none had a processed commit.
    Incomplete,
    Failed(String),
}

impl RepoOutcome {
    /// Checkpoint status, if the outcome is worth recording.
    pub fn status(&self) -> Option<RepoStatus> {
        match self {
            RepoOutcome::Completed { .. } => Some(RepoStatus::Completed),
            RepoOutcome::SkippedAlreadyProcessed => None,
            RepoOutcome::SkippedNoPrs => Some(RepoStatus::SkippedNoPrs),
            RepoOutcome::SkippedTooManyPrs { .. } => Some(RepoStatus::SkippedTooManyPrs),
            RepoOutcome::Incomplete => Some(RepoStatus::Incomplete),
            RepoOutcome::Failed(_) => Some(RepoStatus::Failed),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RepoOutcome::Completed { .. })
    }
}

/// What one pull request contributed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrOutcome {
    pub processed: bool,
    pub commits_processed: usize,
    pub functions: usize,
    pub classes: usize,
    pub imports: usize,
    /// Changed files per resolved language.
    pub file_languages: BTreeMap<Language, usize>,
}

impl PrOutcome {
    pub fn skipped() -> Self {
        Self::default()
    }
}

/// Totals for one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageReport {
    pub language: Language,
    pub repos_attempted: usize,
    pub repos_completed: usize,
    pub skipped_already_processed: usize,
    pub skipped_no_prs: usize,
    pub skipped_too_many_prs: usize,
    pub repos_incomplete: usize,
    pub repos_failed: usize,
    pub prs_processed: usize,
    pub commits_processed: usize,
    pub functions: usize,
    pub classes: usize,
    pub imports: usize,
    pub file_languages: BTreeMap<Language, usize>,
}

impl LanguageReport {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            repos_attempted: 0,
            repos_completed: 0,
            skipped_already_processed: 0,
            skipped_no_prs: 0,
            skipped_too_many_prs: 0,
            repos_incomplete: 0,
            repos_failed: 0,
            prs_processed: 0,
            commits_processed: 0,
            functions: 0,
            classes: 0,
            imports: 0,
            file_languages: BTreeMap::new(),
        }
    }

    /// Count a repository outcome. Already-processed skips are not attempts.
    pub fn record_repo(&mut self, outcome: &RepoOutcome) {
        if *outcome != RepoOutcome::SkippedAlreadyProcessed {
            self.repos_attempted += 1;
        }
        match outcome {
            RepoOutcome::Completed { .. } => self.repos_completed += 1,
            RepoOutcome::SkippedAlreadyProcessed => self.skipped_already_processed += 1,
            RepoOutcome::SkippedNoPrs => self.skipped_no_prs += 1,
            RepoOutcome::SkippedTooManyPrs { .. } => self.skipped_too_many_prs += 1,
            RepoOutcome::Incomplete => self.repos_incomplete += 1,
            RepoOutcome::Failed(_) => self.repos_failed += 1,
        }
    }

    pub fn record_pr(&mut self, outcome: &PrOutcome) {
        if outcome.processed {
            self.prs_processed += 1;
        }
        self.commits_processed += outcome.commits_processed;
        self.functions += outcome.functions;
        self.classes += outcome.classes;
        self.imports += outcome.imports;
        for (language, n) in &outcome.file_languages {
            *self.file_languages.entry(*language).or_default() += n;
        }
    }
}

/// Result of a whole crawl.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlReport {
    pub languages: Vec<LanguageReport>,
    pub api_calls: u64,
    pub rate_remaining: u64,
}

impl CrawlReport {
    pub fn set_usage(&mut self, usage: ApiUsage) {
        self.api_calls = usage.calls;
        self.rate_remaining = usage.remaining;
    }

    pub fn totals(&self) -> LanguageReport {
        let mut total = LanguageReport::new(Language::Python);
        for r in &self.languages {
            total.repos_attempted += r.repos_attempted;
            total.repos_completed += r.repos_completed;
            total.skipped_already_processed += r.skipped_already_processed;
            total.skipped_no_prs += r.skipped_no_prs;
            total.skipped_too_many_prs += r.skipped_too_many_prs;
            total.repos_incomplete += r.repos_incomplete;
            total.repos_failed += r.repos_failed;
            total.prs_processed += r.prs_processed;
            total.commits_processed += r.commits_processed;
            total.functions += r.functions;
            total.classes += r.classes;
            total.imports += r.imports;
            for (language, n) in &r.file_languages {
                *total.file_languages.entry(*language).or_default() += n;
            }
        }
        total
    }

    pub fn log_summary(&self) {
        let t = self.totals();
        info!("Crawl finished");
        info!("  Repositories attempted:        {}", t.repos_attempted);
        info!("  Repositories completed:        {}", t.repos_completed);
        info!("  Skipped (already processed):   {}", t.skipped_already_processed);
        info!("  Skipped (no merged PRs):       {}", t.skipped_no_prs);
        info!("  Skipped (too many PRs):        {}", t.skipped_too_many_prs);
        info!("  Incomplete:                    {}", t.repos_incomplete);
        info!("  Failed:                        {}", t.repos_failed);
        info!("  PRs processed:                 {}", t.prs_processed);
        info!("  Commits processed:             {}", t.commits_processed);
        info!("  Functions detected:            {}", t.functions);
        info!("  Classes detected:              {}", t.classes);
        info!("  Imports detected:              {}", t.imports);
        for (language, n) in &t.file_languages {
            info!("  {} files: {}", language, n);
        }
        info!("  API calls: {}, remaining quota: {}", self.api_calls, self.rate_remaining);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_outcomes_are_counted() {
        let mut report = LanguageReport::new(Language::Java);
        report.record_repo(&RepoOutcome::Completed { prs_processed: 3 });
        report.record_repo(&RepoOutcome::SkippedAlreadyProcessed);
        report.record_repo(&RepoOutcome::SkippedTooManyPrs { merged_estimate: 900 });
        report.record_repo(&RepoOutcome::Failed("disk full".to_string()));

        assert_eq!(report.repos_attempted, 3);
        assert_eq!(report.repos_completed, 1);
        assert_eq!(report.skipped_already_processed, 1);
        assert_eq!(report.skipped_too_many_prs, 1);
        assert_eq!(report.repos_failed, 1);
    }

    #[test]
    fn test_totals_merge_languages() {
        let mut java = LanguageReport::new(Language::Java);
        let mut pr = PrOutcome {
            processed: true,
            commits_processed: 2,
            functions: 4,
            ..PrOutcome::default()
        };
        pr.file_languages.insert(Language::Java, 3);
        java.record_pr(&pr);
        java.record_pr(&PrOutcome::skipped());

        let mut go = LanguageReport::new(Language::Golang);
        pr.file_languages.insert(Language::Golang, 1);
        go.record_pr(&pr);

        let report = CrawlReport {
            languages: vec![java, go],
            api_calls: 10,
            rate_remaining: 4990,
        };
        let t = report.totals();
        assert_eq!(t.prs_processed, 2);
        assert_eq!(t.commits_processed, 4);
        assert_eq!(t.functions, 8);
        assert_eq!(t.file_languages[&Language::Java], 6);
        assert_eq!(t.file_languages[&Language::Golang], 1);
    }

    #[test]
    fn test_outcome_status() {
        assert_eq!(RepoOutcome::SkippedAlreadyProcessed.status(), None);
        assert_eq!(RepoOutcome::Incomplete.status(), Some(RepoStatus::Incomplete));
        assert!(RepoOutcome::Completed { prs_processed: 1 }.is_completed());
    }
}

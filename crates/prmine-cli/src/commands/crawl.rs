use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use prmine_core::{
    load_github_token, CrawlConfig, CrawlController, CrawlReport, GithubClient, JsonlRepoListing,
};

use crate::ui;

pub struct CrawlArgs {
    pub languages: Vec<String>,
    pub target: Option<usize>,
    pub max_prs: Option<usize>,
    pub repos_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub env_file: PathBuf,
}

pub async fn run(config_path: &Path, args: CrawlArgs) -> Result<()> {
    let mut config = CrawlConfig::load(config_path)?;
    config.apply_env_overrides();
    apply_args(&mut config, &args)?;

    // Missing credentials abort before any work.
    let token = load_github_token(&args.env_file)?;

    let client = GithubClient::from_settings(&token, &config.crawl, &config.retry)
        .context("Failed to build GitHub client")?;
    let listing = JsonlRepoListing::new(config.crawl.repos_dir.clone());

    ui::header("Crawling merged pull requests");
    ui::row(
        "Languages",
        config
            .crawl
            .languages
            .iter()
            .map(|l| l.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    );
    ui::row("Target repositories", config.crawl.target_repos);
    ui::row("Output", config.crawl.output_dir.display());
    println!();

    let mut controller = CrawlController::new(client, listing, config);
    let report = controller.run().await?;
    report.log_summary();
    print_report(&report);
    Ok(())
}

fn apply_args(config: &mut CrawlConfig, args: &CrawlArgs) -> Result<()> {
    if !args.languages.is_empty() {
        config.crawl.languages = super::parse_languages(&args.languages)?;
    }
    if let Some(target) = args.target {
        config.crawl.target_repos = target;
    }
    if let Some(max_prs) = args.max_prs {
        config.crawl.max_prs_per_repo = Some(max_prs);
    }
    if let Some(dir) = &args.repos_dir {
        config.crawl.repos_dir = dir.clone();
    }
    if let Some(dir) = &args.output_dir {
        config.crawl.output_dir = dir.clone();
    }
    Ok(())
}

fn print_report(report: &CrawlReport) {
    let t = report.totals();
    println!();
    if t.repos_completed > 0 {
        ui::success(&format!("Completed {} repositories", t.repos_completed));
    } else {
        ui::warn("No repositories completed");
    }
    for r in &report.languages {
        let skipped = r.skipped_already_processed + r.skipped_no_prs + r.skipped_too_many_prs;
        ui::info(&format!(
            "{}: {} completed, {} skipped, {} failed, {} PRs",
            r.language, r.repos_completed, skipped, r.repos_failed, r.prs_processed
        ));
        if r.repos_failed > 0 {
            ui::error(&format!(
                "{}: {} repositories failed and will be retried on the next run",
                r.language, r.repos_failed
            ));
        }
    }
    ui::info(&format!(
        "{} functions, {} classes, {} imports",
        t.functions, t.classes, t.imports
    ));
    ui::info(&format!(
        "{} API calls, {} remaining",
        report.api_calls, report.rate_remaining
    ));
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use prmine_semantic::Language;

    fn args(languages: &[&str]) -> CrawlArgs {
        CrawlArgs {
            languages: languages.iter().map(|s| s.to_string()).collect(),
            target: Some(3),
            max_prs: None,
            repos_dir: None,
            output_dir: Some(PathBuf::from("out")),
            env_file: PathBuf::from(".env"),
        }
    }

    #[test]
    fn test_args_override_config() {
        let mut config = CrawlConfig::default();
        apply_args(&mut config, &args(&["golang", "java"])).unwrap();
        assert_eq!(config.crawl.languages, vec![Language::Golang, Language::Java]);
        assert_eq!(config.crawl.target_repos, 3);
        assert_eq!(config.crawl.max_prs_per_repo, None);
        assert_eq!(config.crawl.output_dir, PathBuf::from("out"));
    }

    #[test]
    fn test_unknown_language_rejected() {
        let mut config = CrawlConfig::default();
        assert!(apply_args(&mut config, &args(&["cobol"])).is_err());
    }
}

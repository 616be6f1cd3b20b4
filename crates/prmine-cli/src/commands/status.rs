use std::path::Path;

use anyhow::Result;
use console::style;
use serde_json::json;

use prmine_core::{CheckpointStore, CrawlConfig, RepoStatus};
use prmine_ingest::{count_lines, ShardKind};
use prmine_semantic::Language;

use crate::ui;

const STATUSES: [(RepoStatus, &str); 5] = [
    (RepoStatus::Completed, "completed"),
    (RepoStatus::SkippedNoPrs, "skipped_no_prs"),
    (RepoStatus::SkippedTooManyPrs, "skipped_too_many_prs"),
    (RepoStatus::Incomplete, "incomplete"),
    (RepoStatus::Failed, "failed"),
];

pub async fn run(config_path: &Path, json: bool) -> Result<()> {
    let config = CrawlConfig::load(config_path)?;
    let output_dir = &config.crawl.output_dir;
    let store = CheckpointStore::new(output_dir.clone());

    let mut languages = Vec::new();
    for language in Language::ALL {
        let checkpoint = store.load(language)?;
        let mut shards = serde_json::Map::new();
        for kind in ShardKind::ALL {
            shards.insert(
                kind.stem().to_string(),
                json!(count_lines(output_dir, language, kind)?),
            );
        }
        let has_data = checkpoint.is_some() || shards.values().any(|v| v != &json!(0));
        if !has_data && !config.crawl.languages.contains(&language) {
            continue;
        }

        let mut repos = serde_json::Map::new();
        if let Some(checkpoint) = &checkpoint {
            for (status, name) in STATUSES {
                repos.insert(name.to_string(), json!(checkpoint.count(status)));
            }
        }
        languages.push(json!({
            "language": language.as_str(),
            "target": config.crawl.target_repos,
            "updated_at": checkpoint.as_ref().map(|c| c.updated_at.to_rfc3339()),
            "repositories": repos,
            "shard_lines": shards,
        }));
    }

    if json {
        let status = json!({
            "output_dir": output_dir.display().to_string(),
            "languages": languages,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    ui::header(&format!("Crawl status ({})", output_dir.display()));
    if languages.is_empty() {
        ui::info("Nothing crawled yet.");
        println!();
        return Ok(());
    }

    for entry in &languages {
        let name = entry["language"].as_str().unwrap_or_default();
        let completed = entry["repositories"]["completed"].as_u64().unwrap_or(0);
        println!(
            "  {} {}/{} repositories",
            style(format!("{name:<12}")).bold(),
            completed,
            config.crawl.target_repos
        );
        if let Some(repos) = entry["repositories"].as_object() {
            for (status, count) in repos {
                if status != "completed" && count.as_u64().unwrap_or(0) > 0 {
                    ui::row(&format!("  {status}"), count);
                }
            }
        }
        if let Some(shards) = entry["shard_lines"].as_object() {
            for (kind, count) in shards {
                ui::row(&format!("  {kind}"), count);
            }
        }
        println!();
    }
    Ok(())
}

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::info;

use prmine_core::CrawlConfig;
use prmine_ingest::{MaterializeReport, Materializer};
use prmine_semantic::Language;

use crate::ui;

pub async fn run(
    config_path: &Path,
    languages: Vec<String>,
    db: &Path,
    input_dir: Option<PathBuf>,
) -> Result<()> {
    let config = CrawlConfig::load(config_path)?;
    let input_dir = input_dir.unwrap_or(config.crawl.output_dir);
    let languages = if languages.is_empty() {
        Language::ALL.to_vec()
    } else {
        super::parse_languages(&languages)?
    };

    let materializer = Materializer::open(db).await?;
    ui::header(&format!(
        "Materializing {} into {}",
        input_dir.display(),
        db.display()
    ));

    let mut total = MaterializeReport::default();
    for language in languages {
        let report = materializer.materialize_language(&input_dir, language).await?;
        if report.lines_read > 0 {
            ui::success(&format!(
                "{}: {} lines, {} rows inserted",
                language,
                report.lines_read,
                report.total_inserted()
            ));
        } else {
            ui::info(&format!("{}: no shards", language));
        }
        total.merge(&report);
    }

    println!();
    ui::row("Lines read", total.lines_read);
    ui::row("Malformed lines", total.malformed_lines);
    ui::row("Invalid records", total.invalid_records);
    ui::row("Orphans dropped", total.orphans_dropped);
    ui::row("Already present", total.already_present);
    ui::row("Failed statements", total.failed_statements);

    println!();
    ui::info("Table                    inserted     total");
    for (table, count) in materializer.table_counts().await? {
        let inserted = total.inserted_into(table);
        info!(table, inserted, count, "Table summary");
        ui::info(&format!("{:<24} {:>8} {:>9}", table, inserted, count));
    }
    println!();
    Ok(())
}

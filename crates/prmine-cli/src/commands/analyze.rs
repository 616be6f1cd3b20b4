use std::path::Path;

use anyhow::{anyhow, Context, Result};
use console::style;

use prmine_semantic::{analyze_patch, extract_imports, language_for_path, ChangeFact, Language};

use crate::ui;

pub fn run(path: &Path, language: Option<&str>, patch: bool, json: bool) -> Result<()> {
    let language = resolve_language(path, language)?;
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    if patch {
        let analysis = analyze_patch(&content, language);
        if json {
            println!("{}", serde_json::to_string_pretty(&analysis)?);
            return Ok(());
        }
        ui::header(&format!("{} ({}, patch)", path.display(), language));
        ui::row("Hunks", analysis.hunks.len());
        print_facts("Functions", &analysis.functions);
        print_facts("Classes", &analysis.classes);
    } else {
        let imports = extract_imports(&content, language);
        if json {
            println!("{}", serde_json::to_string_pretty(&imports)?);
            return Ok(());
        }
        ui::header(&format!("{} ({})", path.display(), language));
        if imports.is_empty() {
            ui::info("No imports found.");
        }
        for import in &imports {
            let items = import
                .imported_items
                .as_ref()
                .map(|items| format!(" [{}]", items.join(", ")))
                .unwrap_or_default();
            ui::info(&format!(
                "{:>5}  {:<18} {}{}",
                import.line_number,
                style(import.kind.as_str()).cyan(),
                import.module_name,
                items
            ));
        }
    }
    println!();
    Ok(())
}

fn resolve_language(path: &Path, language: Option<&str>) -> Result<Language> {
    match language {
        Some(id) => Language::parse(id).ok_or_else(|| anyhow!("Unknown language '{}'", id)),
        None => language_for_path(&path.to_string_lossy()).ok_or_else(|| {
            anyhow!(
                "Cannot infer a language for {} (use --language)",
                path.display()
            )
        }),
    }
}

fn print_facts(title: &str, facts: &[ChangeFact]) {
    println!();
    ui::info(&format!("{} ({})", style(title).bold(), facts.len()));
    for fact in facts {
        ui::info(&format!(
            "  {:<9} {:<28} {}",
            fact.change_type.as_str(),
            fact.name,
            style(fact.source.as_str()).dim()
        ));
    }
}
